use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::Error;

/// Number of bytes in a host to robot command frame
pub const COMMAND_LEN: usize = 17;
/// Number of motion values carried by a command frame
pub const FIELD_COUNT: usize = 14;
/// Number of bytes in a robot to host telemetry frame
pub const TELEMETRY_LEN: usize = 5;

pub const HEADER: u8 = 255;
pub const END_DATA: u8 = 254;

/// Payload positions of a command frame, in wire order after the header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MotionField {
    SelectMode,
    StrideLeftLeg,
    StrideRightLeg,
    Speed,
    SwingLeftLeg,
    SwingRightLeg,
    UpLeftLeg,
    UpRightLeg,
    TurnLeftAngle,
    TurnRightAngle,
    OffsetLeftLeg,
    OffsetRightLeg,
    HeadLeftRight,
    HeadUpDown,
}

impl MotionField {
    pub const ALL: [MotionField; FIELD_COUNT] = [
        MotionField::SelectMode,
        MotionField::StrideLeftLeg,
        MotionField::StrideRightLeg,
        MotionField::Speed,
        MotionField::SwingLeftLeg,
        MotionField::SwingRightLeg,
        MotionField::UpLeftLeg,
        MotionField::UpRightLeg,
        MotionField::TurnLeftAngle,
        MotionField::TurnRightAngle,
        MotionField::OffsetLeftLeg,
        MotionField::OffsetRightLeg,
        MotionField::HeadLeftRight,
        MotionField::HeadUpDown,
    ];

    /// Byte offset inside the command frame
    pub fn offset(self) -> usize {
        self as usize + 1
    }
}

/// A complete command frame: `[255, 14 motion values, 254, 254]`.
///
/// Only built through [`codec::encode_command`] or the checked conversion from `Vec<u8>`, so the
/// header and trailer are always in place.
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct CommandFrame([u8; COMMAND_LEN]);

impl CommandFrame {
    pub(crate) fn from_raw(raw: [u8; COMMAND_LEN]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn fields(&self) -> [u8; FIELD_COUNT] {
        let mut fields = [0; FIELD_COUNT];
        fields.copy_from_slice(&self.0[1..=FIELD_COUNT]);
        fields
    }

    pub fn get(&self, field: MotionField) -> u8 {
        self.0[field.offset()]
    }

    pub fn set(&mut self, field: MotionField, value: u8) {
        self.0[field.offset()] = value;
    }
}

impl Default for CommandFrame {
    fn default() -> Self {
        codec::encode_command([0; FIELD_COUNT])
    }
}

impl TryFrom<Vec<u8>> for CommandFrame {
    type Error = Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        codec::decode_command(&bytes).map(codec::encode_command)
    }
}

impl From<CommandFrame> for Vec<u8> {
    fn from(frame: CommandFrame) -> Self {
        frame.0.to_vec()
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Robot attitude as reported by the telemetry frame
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rpy {
    pub roll: u8,
    pub pitch: u8,
    pub yaw: u8,
}

/// Lifecycle of one serial connection
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Opening the device failed, a fresh connect is required
    Failed,
}

/// Notifications sent to the front end
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    SerialConnected,
    SerialDisconnected,
    SerialFailed(String),
    MacroFinished {
        cancelled: bool,
    },
}
