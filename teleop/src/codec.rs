//! Fixed size frames exchanged with the robot.
//!
//! Command (host to robot), 17 bytes:
//! `[255, mode, strideL, strideR, speed, swingL, swingR, upL, upR, turnL, turnR,`
//! `offsetL, offsetR, headLR, headUD, 254, 254]`
//!
//! Telemetry (robot to host), 5 bytes: `[255, yaw, pitch, roll, 254]`

use crate::error::{Error, Result};
use crate::types::{CommandFrame, Rpy, COMMAND_LEN, END_DATA, FIELD_COUNT, HEADER};

pub fn encode_command(fields: [u8; FIELD_COUNT]) -> CommandFrame {
    let mut raw = [0; COMMAND_LEN];
    raw[0] = HEADER;
    raw[1..=FIELD_COUNT].copy_from_slice(&fields);
    raw[COMMAND_LEN - 2] = END_DATA;
    raw[COMMAND_LEN - 1] = END_DATA;
    CommandFrame::from_raw(raw)
}

/// Strips header and trailer from a command frame.
pub fn decode_command(bytes: &[u8]) -> Result<[u8; FIELD_COUNT]> {
    if bytes.len() != COMMAND_LEN
        || bytes[0] != HEADER
        || bytes[COMMAND_LEN - 2] != END_DATA
        || bytes[COMMAND_LEN - 1] != END_DATA
    {
        return Err(malformed(bytes));
    }
    let mut fields = [0; FIELD_COUNT];
    fields.copy_from_slice(&bytes[1..=FIELD_COUNT]);
    Ok(fields)
}

/// Decodes a telemetry sample. The wire carries yaw, pitch, roll in that order.
pub fn decode_telemetry(bytes: &[u8]) -> Result<Rpy> {
    match bytes {
        &[HEADER, yaw, pitch, roll, END_DATA] => Ok(Rpy {
            roll,
            pitch,
            yaw,
        }),
        _ => Err(malformed(bytes)),
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

fn malformed(bytes: &[u8]) -> Error {
    Error::MalformedFrame {
        raw: format!("[{}]", to_hex(bytes)),
        len: bytes.len(),
    }
}
