//! Tele-operation of a legged robot over a serial link: command and telemetry frames, a grid of
//! motion presets and replayable macro programs.

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod log;
pub mod mock;
pub mod presets;
pub mod sequencer;
pub mod serial;
pub mod session;
pub mod store;
pub mod types;

pub use error::{Error, Result};
