/// Byte-based RAM with support for misaligned memory access.
///
/// This is the *main memory* of the hart. It is zero-initialized and has a fixed capacity.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Ram {
    data: Box<[u8]>,
}

impl Ram {
    /// Create a new zero-initialized RAM resource that can hold `size` bytes.
    ///
    /// `size` must be at least one, and at most `1 << 31` (the RAM window is 31 bits wide).
    /// Otherwise `None` is returned and nothing is allocated.
    pub fn new(size: usize) -> Option<Self> {
        const_assert!(usize::BITS >= 32);
        if size == 0 || size > (1 << 31) {
            None
        } else {
            Some(Self {
                data: vec![0; size].into_boxed_slice(),
            })
        }
    }

    /// Returns the size expressed in bytes. Guaranteed to be at least one.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if `size` bytes starting at `address` all lie within this RAM.
    pub fn contains(&self, address: u32, size: usize) -> bool {
        (address as usize)
            .checked_add(size)
            .is_some_and(|end| end <= self.data.len())
    }

    /// Force RAM back to its reset state, which is all-zeros.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Reads a range of bytes from RAM into `buf`.
    ///
    /// Bytes of `buf` corresponding to addresses beyond the end of RAM are left untouched.
    pub fn read(&self, buf: &mut [u8], address: u32) {
        let start = address as usize;
        if start >= self.data.len() {
            return;
        }
        let size = buf.len().min(self.data.len() - start);
        buf[..size].copy_from_slice(&self.data[start..start + size]);
    }

    /// Writes a range of bytes from `buf` into RAM.
    ///
    /// Bytes of `buf` corresponding to addresses beyond the end of RAM are ignored.
    pub fn write(&mut self, address: u32, buf: &[u8]) {
        let start = address as usize;
        if start >= self.data.len() {
            return;
        }
        let size = buf.len().min(self.data.len() - start);
        self.data[start..start + size].copy_from_slice(&buf[..size]);
    }
}
