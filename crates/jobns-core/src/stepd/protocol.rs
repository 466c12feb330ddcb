//! Wire protocol for step daemon communication
//!
//! Each frame is a 4-byte big-endian length followed by a msgpack body.

use super::StepId;
use crate::{JobnsError, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::io::{Read, Write};

/// Protocol version spoken by this client
pub const PROTOCOL_VERSION: u16 = 1;

/// Oldest protocol version this client still understands
pub const MIN_PROTOCOL_VERSION: u16 = 1;

/// Upper bound on a single frame body
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Request sent to a step daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Negotiated protocol version, passed back unchanged on every call
    pub version: u16,
    /// Step the request is addressed to
    pub step: StepId,
    pub body: RequestBody,
}

/// Request types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Version handshake
    Hello,
    /// Process ids supervised by the step
    ListPids,
    /// Uid of the user that launched the step
    OwnerUid,
}

/// Response types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Hello { version: u16 },
    Pids { pids: Vec<u32> },
    Uid { uid: u32 },
    Error { message: String },
}

/// Encode a message to msgpack
pub fn encode<T: Serialize>(msg: &T) -> std::result::Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(msg)
}

/// Decode a message from msgpack
pub fn decode<'a, T: Deserialize<'a>>(data: &'a [u8]) -> std::result::Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}

/// Write one length-prefixed frame
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let body = encode(msg).map_err(|e| JobnsError::Protocol(format!("failed to encode: {e}")))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(JobnsError::Protocol(format!(
            "frame too large: {} bytes",
            body.len()
        )));
    }

    let len = u32::try_from(body.len())
        .map_err(|_| JobnsError::Protocol("frame length overflow".into()))?;
    writer
        .write_all(&len.to_be_bytes())
        .and_then(|()| writer.write_all(&body))
        .and_then(|()| writer.flush())
        .map_err(|e| JobnsError::Protocol(format!("failed to write frame: {e}")))
}

/// Read one length-prefixed frame
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| JobnsError::Protocol(format!("failed to read frame length: {e}")))?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(JobnsError::Protocol(format!("frame too large: {len} bytes")));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|e| JobnsError::Protocol(format!("failed to read frame body: {e}")))?;

    decode(&body).map_err(|e| JobnsError::Protocol(format!("failed to decode: {e}")))
}
