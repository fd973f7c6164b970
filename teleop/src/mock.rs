use std::io::{self, Read, Write};

use crate::device::Device;

/// Port name selecting the simulated robot, compared case-insensitively
pub const TEST_PORT: &str = "test";

/// Telemetry frame produced by the simulated robot
pub const LOOPBACK_FRAME: [u8; 5] = [255, 1, 2, 3, 254];

pub fn is_test_port(port: &str) -> bool {
    port.eq_ignore_ascii_case(TEST_PORT)
}

/// Simulated robot: every read yields [`LOOPBACK_FRAME`] and writes are discarded.
#[derive(Default, Clone, Copy, Debug)]
pub struct Loopback;

impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(LOOPBACK_FRAME.len());
        buf[..len].copy_from_slice(&LOOPBACK_FRAME[..len]);
        Ok(len)
    }
}

impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Device for Loopback {
    fn try_clone_device(&self) -> io::Result<Box<dyn Device>> {
        Ok(Box::new(*self))
    }
}
