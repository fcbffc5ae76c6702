//! Places program images into RAM before the first cycle.

use std::io::{self, Write};
use std::ops::Range;

use goblin::elf::section_header::SHT_PROGBITS;
use goblin::elf::Elf;
use log::debug;
use rve_core::system_bus::MemoryError;
use rve_core::Core;
use thiserror::Error;

/// Physical addresses index RAM with their top bit dropped.
const RAM_OFFSET_MASK: u64 = 0x7FFF_FFFF;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read image: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse ELF: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("image ends at offset {end:#x}, beyond the {capacity:#x} bytes of RAM")]
    ImageTooLarge {
        end: u64,
        capacity: usize,
        #[source]
        source: MemoryError,
    },
    #[error("section {name} points outside of the file")]
    SectionOutOfRange { name: String },
    #[error("symbol {0} not found")]
    MissingSymbol(&'static str),
}

/// Copies a flat binary verbatim to the start of RAM.
pub fn load_raw(core: &mut Core, image: &[u8]) -> Result<(), LoadError> {
    debug!("loading {:#x} raw bytes at the start of RAM", image.len());
    core.write_physical(0, image)
        .map_err(|source| LoadError::ImageTooLarge {
            end: image.len() as u64,
            capacity: core.config().ram_size,
            source,
        })
}

/// Copies every allocated PROGBITS section of `elf` into RAM at its masked load address.
pub fn load_elf(core: &mut Core, elf: &Elf, program_elf: &[u8]) -> Result<(), LoadError> {
    let capacity = core.config().ram_size;

    let sections = elf
        .section_headers
        .iter()
        .filter(|h| h.is_alloc() && h.sh_type == SHT_PROGBITS && h.sh_size > 0);

    for h in sections {
        let name = elf.shdr_strtab.get_at(h.sh_name).unwrap_or("<unnamed>");
        let offset = h.sh_addr & RAM_OFFSET_MASK;
        let end = offset + h.sh_size;
        debug!(
            "loading section {name:?} into memory from [{:#010x?}..{:#010x?}]",
            h.sh_addr,
            h.sh_addr + h.sh_size,
        );

        let data = h
            .file_range()
            .and_then(|range| program_elf.get(range))
            .ok_or_else(|| LoadError::SectionOutOfRange {
                name: name.to_owned(),
            })?;
        core.write_physical(offset as u32, data)
            .map_err(|source| LoadError::ImageTooLarge {
                end,
                capacity,
                source,
            })?;
    }

    Ok(())
}

/// Finds the `[begin_signature, end_signature)` address range of a compliance test image.
pub fn signature_range(elf: &Elf) -> Result<Range<u32>, LoadError> {
    let find = |name: &'static str| {
        elf.syms
            .iter()
            .find(|sym| elf.strtab.get_at(sym.st_name) == Some(name))
            .map(|sym| sym.st_value as u32)
            .ok_or(LoadError::MissingSymbol(name))
    };
    Ok(find("begin_signature")?..find("end_signature")?)
}

/// Writes the words of `range` as lowercase hex, one per line.
pub fn write_signature(core: &Core, range: Range<u32>, out: &mut impl Write) -> io::Result<()> {
    for address in range.step_by(4) {
        let mut word = [0; 4];
        core.read_physical(address & RAM_OFFSET_MASK as u32, &mut word)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        writeln!(out, "{:08x}", u32::from_le_bytes(word))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rve_core::Config;

    fn core() -> Core {
        Core::new(Config {
            ram_size: 0x100,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn raw_image_lands_at_reset_vector() {
        let mut core = core();
        load_raw(&mut core, &[0x93, 0x00, 0x50, 0x00]).unwrap();
        let mut word = [0; 4];
        core.read_physical(0, &mut word).unwrap();
        assert_eq!(0x0050_0093, u32::from_le_bytes(word));
    }

    #[test]
    fn raw_image_filling_ram_exactly() {
        let mut core = core();
        load_raw(&mut core, &[0xAA; 0x100]).unwrap();
        let mut byte = [0];
        core.read_physical(0xFF, &mut byte).unwrap();
        assert_eq!([0xAA], byte);
    }

    #[test]
    fn raw_image_too_large() {
        let mut core = core();
        let err = load_raw(&mut core, &[0; 0x101]).unwrap_err();
        assert!(std::error::Error::source(&err)
            .is_some_and(|cause| cause.to_string().contains("0x80000000")));
        match err {
            LoadError::ImageTooLarge {
                end,
                capacity,
                source,
            } => {
                assert_eq!(0x101, end);
                assert_eq!(0x100, capacity);
                assert_eq!(
                    MemoryError::OutOfRange {
                        address: 0x8000_0000,
                        capacity: 0x100
                    },
                    source
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn garbage_is_not_an_elf() {
        assert!(Elf::parse(b"definitely not an ELF file").is_err());
    }

    #[test]
    fn signature_words_as_hex() {
        let mut core = core();
        let data: Vec<u8> = [0xDEAD_BEEF_u32, 0x0000_0001]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        core.write_physical(0x40, &data).unwrap();

        let mut out = Vec::new();
        write_signature(&core, 0x8000_0040..0x8000_0048, &mut out).unwrap();
        assert_eq!("deadbeef\n00000001\n", String::from_utf8(out).unwrap());
    }

    #[test]
    fn signature_outside_ram() {
        let core = core();
        let mut out = Vec::new();
        assert!(write_signature(&core, 0x8000_0100..0x8000_0104, &mut out).is_err());
    }
}
