// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Stream framing for broker messages
//!
//! Each message is preceded by a fixed [FrameHeader], allowing responses
//! to be matched to outstanding requests by tag.
//!
//! ## Encoding:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                              TAG                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    COMMAND    |                    LENGTH                     /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! /   (LENGTH)    |                    BODY...                    /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::io::{Error as IoError, ErrorKind};

use encdec::{Decode, Encode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Command, MAX_SHARED_MEMORY_SIZE};

/// Frame header length in bytes
pub const FRAME_HEADER_LEN: usize = 9;

/// Maximum frame body length, sufficient for an operation referencing
/// [MAX_PARAMS][crate::MAX_PARAMS] maximum-sized blocks
pub const MAX_FRAME_LEN: usize = 4 * 2 * MAX_SHARED_MEMORY_SIZE + 4096;

/// Frame header
#[derive(Copy, Clone, PartialEq, Debug, Encode, Decode)]
pub struct FrameHeader {
    /// Request tag, echoed in the matching response
    pub tag: u32,
    /// [Command] code
    pub command: u8,
    /// Body length in bytes
    pub length: u32,
}

impl FrameHeader {
    pub fn new(tag: u32, command: Command, length: usize) -> Self {
        Self {
            tag,
            command: command as u8,
            length: length as u32,
        }
    }

    /// Fetch parsed command code
    pub fn command(&self) -> Result<Command, IoError> {
        Command::try_from(self.command).map_err(|_| {
            IoError::new(
                ErrorKind::InvalidData,
                format!("unrecognised command: {:#04x}", self.command),
            )
        })
    }
}

/// Frame (header and body)
#[derive(Clone, PartialEq, Debug)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Vec<u8>,
}

/// Write a frame to the provided stream
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    tag: u32,
    command: Command,
    body: &[u8],
) -> Result<(), IoError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!("frame length {} exceeds maximum", body.len()),
        ));
    }

    let header = FrameHeader::new(tag, command, body.len());

    let mut buff = [0u8; FRAME_HEADER_LEN];
    header
        .encode(&mut buff)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("{e:?}")))?;

    w.write_all(&buff).await?;
    w.write_all(body).await?;
    w.flush().await?;

    Ok(())
}

/// Read a frame from the provided stream, returning `None` on a clean
/// end of stream
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Frame>, IoError> {
    let mut buff = [0u8; FRAME_HEADER_LEN];

    match r.read_exact(&mut buff).await {
        Ok(_) => (),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let (header, _n) = FrameHeader::decode(&buff)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("{e:?}")))?;

    let length = header.length as usize;
    if length > MAX_FRAME_LEN {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame length {length} exceeds maximum"),
        ));
    }

    let mut body = vec![0u8; length];
    r.read_exact(&mut body).await?;

    Ok(Some(Frame { header, body }))
}
