use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

/// Byte stream behind a serial link.
///
/// The read loop owns one handle while `send` writes through a clone, so implementations must
/// allow a clone to be used from another thread.
pub trait Device: Read + Write + Send {
    fn try_clone_device(&self) -> io::Result<Box<dyn Device>>;

    /// Drops whatever a pending read would have returned.
    fn cancel_read(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Device for Box<dyn SerialPort> {
    fn try_clone_device(&self) -> io::Result<Box<dyn Device>> {
        let port = self.try_clone()?;
        Ok(Box::new(port))
    }

    fn cancel_read(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

pub fn open(port: &str, baudrate: u32, timeout: Duration) -> io::Result<Box<dyn Device>> {
    let port = serialport::new(port, baudrate).timeout(timeout).open()?;
    Ok(Box::new(port))
}
