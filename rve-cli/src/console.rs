//! Connects the host terminal to the guest UART.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use log::debug;
use rve_core::resources::uart::Uart;

pub struct Console {
    input: Receiver<u8>,
}

impl Console {
    /// Starts a background thread forwarding stdin byte by byte.
    ///
    /// The thread stops at end of input, or once the console is dropped.
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            for byte in io::stdin().lock().bytes() {
                match byte {
                    Ok(byte) => {
                        if sender.send(byte).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("stdin closed: {e}");
                        break;
                    }
                }
            }
        });
        Self { input: receiver }
    }

    /// Hands pending host input to `uart` and writes everything it transmitted to stdout.
    pub fn service(&mut self, uart: &mut Uart) -> io::Result<()> {
        let input: Vec<u8> = self.input.try_iter().collect();
        if !input.is_empty() {
            uart.push_input(&input);
        }
        if uart.has_output() {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&uart.take_output())?;
            stdout.flush()?;
        }
        Ok(())
    }
}
