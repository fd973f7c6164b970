//! Error types shared by the serial link, the preset grid and the macro sequencer.

use std::path::PathBuf;

use thiserror::Error;

/// Every failure the control panel can report.
///
/// None of them is fatal: each is logged where it happens and the state held before the failed
/// operation is kept.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial device could not be opened.
    #[error("cannot open serial port {port}: {reason}")]
    Connection {
        /// Port that was requested.
        port: String,
        /// Driver message.
        reason: String,
    },

    /// A frame has the wrong length or wrong header/trailer bytes.
    #[error("malformed frame {raw}, len: {len}")]
    MalformedFrame {
        /// Raw bytes, hex encoded.
        raw: String,
        /// Observed length.
        len: usize,
    },

    /// A frame was sent while no device is open.
    #[error("serial is not connected")]
    NotConnected,

    /// The text given for a macro step payload could not be parsed.
    #[error("malformed payload {text:?}: {reason}")]
    MalformedPayload {
        /// Text that was rejected.
        text: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A settings document could not be read or written.
    #[error("cannot persist {}: {reason}", .path.display())]
    Persistence {
        /// Document location.
        path: PathBuf,
        /// Underlying io or json error.
        reason: String,
    },

    #[error("serial link is already connected")]
    AlreadyConnected,

    #[error("a macro is already playing")]
    AlreadyPlaying,

    #[error("preset name must not be empty")]
    EmptyName,

    #[error("{0:?} is reserved for free preset slots")]
    ReservedName(String),

    #[error("no preset slot at {0}")]
    InvalidSlot(String),

    #[error("no macro step at index {0}")]
    InvalidStep(usize),

    #[error("no motion named {0:?}")]
    UnknownMotion(String),

    #[error("no macro named {0:?}")]
    UnknownMacro(String),

    /// Write on an open device failed.
    #[error("serial io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
