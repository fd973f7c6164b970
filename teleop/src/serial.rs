use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::codec;
use crate::config::SerialSettings;
use crate::device::{self, Device};
use crate::error::{Error, Result};
use crate::mock::{self, Loopback};
use crate::types::{CommandFrame, Event, LinkState, Rpy, TELEMETRY_LEN};

/// Anything a command frame can be pushed through.
pub trait FrameSink: Send {
    fn send(&self, frame: &CommandFrame) -> Result<()>;
}

/// Latest telemetry sample packed as `0x00RRPPYY`.
#[derive(Default)]
struct RpyCell(AtomicU32);

impl RpyCell {
    fn load(&self) -> Rpy {
        let [_, roll, pitch, yaw] = self.0.load(Ordering::Acquire).to_be_bytes();
        Rpy {
            roll,
            pitch,
            yaw,
        }
    }

    fn store(&self, rpy: Rpy) {
        self.0.store(u32::from_be_bytes([0, rpy.roll, rpy.pitch, rpy.yaw]), Ordering::Release);
    }
}

struct Shared {
    rpy: RpyCell,
    running: AtomicBool,
    state: Mutex<LinkState>,
    writer: Mutex<Option<Box<dyn Device>>>,
    simulated: AtomicBool,
    events: Sender<Event>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writer(&self) -> MutexGuard<'_, Option<Box<dyn Device>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LinkState) {
        *self.state() = state;
    }

    fn notify(&self, event: Event) {
        // Nobody listening is not an error for the link
        let _ = self.events.send(event);
    }

    fn send(&self, frame: &CommandFrame) -> Result<()> {
        debug!("Send data: {}", frame);
        let mut writer = self.writer();
        let device = match writer.as_mut() {
            Some(device) => device,
            None => {
                error!("Serial is not connected");
                return Err(Error::NotConnected);
            },
        };
        if self.simulated.load(Ordering::Acquire) {
            info!("[Test] Send data succeeded");
            return Ok(());
        }
        device
            .cancel_read()
            .and_then(|()| device.write_all(frame.as_bytes()))
            .and_then(|()| device.flush())
            .inspect_err(|e| error!("Send data failed: {}", e))?;
        info!("Send data succeeded");
        Ok(())
    }
}

/// Cloneable handle used to push frames from another thread, e.g. macro playback.
#[derive(Clone)]
pub struct LinkSender {
    shared: Arc<Shared>,
}

impl FrameSink for LinkSender {
    fn send(&self, frame: &CommandFrame) -> Result<()> {
        self.shared.send(frame)
    }
}

/// Connection to the robot.
///
/// A background thread polls telemetry for as long as the link is connected and keeps the last
/// well formed sample available through [`SerialLink::rpy`].
pub struct SerialLink {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl SerialLink {
    pub fn new(events: Sender<Event>) -> Self {
        Self {
            shared: Arc::new(Shared {
                rpy: RpyCell::default(),
                running: AtomicBool::new(false),
                state: Mutex::new(LinkState::Disconnected),
                writer: Mutex::new(None),
                simulated: AtomicBool::new(false),
                events,
            }),
            reader: None,
        }
    }

    /// Opens `settings.port` in the background, or the simulated robot when the port is `test`.
    ///
    /// Returns as soon as the reader thread is spawned. The outcome is reported with
    /// [`Event::SerialConnected`] or [`Event::SerialFailed`].
    pub fn connect(&mut self, settings: &SerialSettings) -> Result<()> {
        let port = settings.port.clone();
        let baudrate = settings.baudrate;
        let timeout = settings.timeout();
        let simulated = mock::is_test_port(&port);

        self.start(&settings.port, settings.poll_delay(), simulated, move || {
            if simulated {
                Ok(Box::new(Loopback) as Box<dyn Device>)
            } else {
                device::open(&port, baudrate, timeout)
            }
        })
    }

    /// Same as [`SerialLink::connect`] with a caller provided device opener.
    pub fn connect_with<F>(&mut self, port: &str, poll_delay: Duration, open: F) -> Result<()>
    where
        F: FnOnce() -> io::Result<Box<dyn Device>> + Send + 'static,
    {
        self.start(port, poll_delay, false, open)
    }

    fn start<F>(&mut self, port: &str, poll_delay: Duration, simulated: bool, open: F) -> Result<()>
    where
        F: FnOnce() -> io::Result<Box<dyn Device>> + Send + 'static,
    {
        {
            let mut state = self.shared.state();
            if matches!(*state, LinkState::Connecting | LinkState::Connected | LinkState::Disconnecting) {
                return Err(Error::AlreadyConnected);
            }
            *state = LinkState::Connecting;
        }
        // A previous attempt may have failed, its thread is already done
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }

        info!("Connecting serial port {}", port);
        self.shared.simulated.store(simulated, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let port = port.to_owned();
        let spawned = thread::Builder::new().name("serial".into()).spawn(move || {
            let device = match open().and_then(|device| Ok((device.try_clone_device()?, device))) {
                Ok((writer, device)) => {
                    *shared.writer() = Some(writer);
                    device
                },
                Err(e) => {
                    let err = Error::Connection {
                        port,
                        reason: e.to_string(),
                    };
                    error!("{}", err);
                    shared.running.store(false, Ordering::Release);
                    shared.set_state(LinkState::Failed);
                    shared.notify(Event::SerialFailed(err.to_string()));
                    return;
                },
            };
            shared.set_state(LinkState::Connected);
            info!("Serial port {} connected", port);
            shared.notify(Event::SerialConnected);
            read_loop(device, &shared, poll_delay);
            debug!("Serial read loop exited");
        });
        match spawned {
            Ok(reader) => {
                self.reader = Some(reader);
                Ok(())
            },
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.set_state(LinkState::Failed);
                Err(e.into())
            },
        }
    }

    /// Stops the read loop, closes the device and reports [`Event::SerialDisconnected`].
    ///
    /// Does nothing on a link that was never connected. A link whose open failed is reset
    /// without notification.
    pub fn disconnect(&mut self) {
        let previous = {
            let mut state = self.shared.state();
            let previous = *state;
            match previous {
                LinkState::Disconnected => return,
                LinkState::Failed => *state = LinkState::Disconnected,
                _ => *state = LinkState::Disconnecting,
            }
            previous
        };
        if previous == LinkState::Failed {
            if let Some(reader) = self.reader.take() {
                let _ = reader.join();
            }
            return;
        }

        self.shared.running.store(false, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            reader.thread().unpark();
            if reader.join().is_err() {
                warn!("Serial read loop panicked");
            }
        }
        // Dropping the last handle closes the device
        self.shared.writer().take();
        // An open still in flight may have failed meanwhile, SerialFailed was already sent
        let failed = *self.shared.state() == LinkState::Failed;
        self.shared.set_state(LinkState::Disconnected);
        if failed {
            return;
        }
        info!("Serial port disconnected");
        self.shared.notify(Event::SerialDisconnected);
    }

    /// Last well formed telemetry sample, `(0, 0, 0)` until the first one arrives.
    pub fn rpy(&self) -> Rpy {
        self.shared.rpy.load()
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state()
    }

    pub fn send(&self, frame: &CommandFrame) -> Result<()> {
        self.shared.send(frame)
    }

    pub fn sender(&self) -> LinkSender {
        LinkSender {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Serial port names found on the host, followed by the simulated port.
pub fn available_ports() -> Vec<String> {
    let mut ports: Vec<String> = serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_else(|e| {
            warn!("Cannot list serial ports: {}", e);
            Vec::new()
        });
    ports.push("Test".into());
    ports
}

fn read_loop(mut device: Box<dyn Device>, shared: &Shared, poll_delay: Duration) {
    let mut buf = [0u8; TELEMETRY_LEN];
    while shared.running.load(Ordering::Acquire) {
        match read_frame(device.as_mut(), &mut buf) {
            Ok(0) => debug!("Timeout read from serial"),
            Ok(len) => match codec::decode_telemetry(&buf[..len]) {
                Ok(rpy) => shared.rpy.store(rpy),
                Err(e) => error!("Get unexpected values from serial: {}", e),
            },
            Err(e) => error!("Serial read failed: {}", e),
        }
        pause(shared, poll_delay);
    }
}

/// Sleeps for `delay` unless the link is stopped first. Unparking only ends the wait once
/// `running` is cleared.
fn pause(shared: &Shared, delay: Duration) {
    let deadline = Instant::now() + delay;
    while shared.running.load(Ordering::Acquire) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::park_timeout(remaining);
    }
}

/// Reads up to one telemetry frame, stopping early on timeout or end of stream.
fn read_frame(device: &mut dyn Device, buf: &mut [u8; TELEMETRY_LEN]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match device.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
