//! Wire messages and framing.
//!
//! Three message schemas travel between producer and workers, encoded as
//! field-tagged protobuf (field numbers are stable across versions). Each
//! message is delimited on the TCP stream by a big-endian u32 length prefix.
//! There is no on-wire type discriminator: the first frame a worker sends is
//! its registration, every later frame is a compile result. That is safe
//! because the producer assigns a fresh identity per connection.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use prost::Message;
use std::io::{Read, Write};

use crate::errors::*;

/// Upper bound on a single frame. Compile output can be large (template
/// errors), source text should not be.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterCompilerService {
    #[prost(enumeration = "crate::compiler::Language", tag = "1")]
    pub lang: i32,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(string, tag = "3")]
    pub procarch: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompileRequest {
    #[prost(string, tag = "1")]
    pub code: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompileResult {
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Compiler diagnostics; set on failure, absent on success.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub output: Option<Vec<u8>>,
}

pub fn encode<M: Message>(msg: &M) -> Vec<u8> {
    msg.encode_to_vec()
}

pub fn decode<M: Message + Default>(buf: &[u8]) -> Result<M> {
    M::decode(buf).map_err(|e| ErrorKind::MalformedMessage(e.to_string()).into())
}

/// Write one length-delimited frame and flush it.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        bail!(ErrorKind::MalformedMessage(format!(
            "refusing to send {} byte frame (limit {})",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }
    w.write_u32::<BigEndian>(payload.len() as u32)?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read one length-delimited frame. EOF mid-frame surfaces as an Io error,
/// which callers treat as disconnect.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u32::<BigEndian>()? as usize;
    if len > MAX_FRAME_LEN {
        bail!(ErrorKind::MalformedMessage(format!(
            "declared frame length {} exceeds limit {}",
            len, MAX_FRAME_LEN
        )));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
