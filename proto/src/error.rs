// Copyright (c) 2022-2023 The MobileCoin Foundation

use crate::{ReturnCode, MAX_PARAMS};

/// Protocol encoding / decoding errors
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ProtoError {
    /// Message could not be decoded
    #[error("malformed message: {0}")]
    BadFormat(String),

    /// Operation carries more than [MAX_PARAMS] parameters
    #[error("too many parameters ({0}, maximum {MAX_PARAMS})")]
    TooManyParams(usize),

    /// Shared memory block exceeds [MAX_SHARED_MEMORY_SIZE][crate::MAX_SHARED_MEMORY_SIZE]
    #[error("shared memory block of {0} bytes exceeds maximum size")]
    Oversized(usize),

    /// Shared memory flags are empty or contain unknown bits
    #[error("invalid memory flags: {0:#x}")]
    InvalidFlags(u32),

    /// Memory reference offset is out of bounds or direction is not
    /// permitted by the parent block
    #[error("invalid memory reference (slot {0})")]
    InvalidReference(usize),
}

impl ProtoError {
    /// Return code reported for this error
    pub fn code(&self) -> ReturnCode {
        match self {
            ProtoError::BadFormat(_) => ReturnCode::BadFormat,
            ProtoError::TooManyParams(_) | ProtoError::Oversized(_) => ReturnCode::ExcessData,
            ProtoError::InvalidFlags(_) | ProtoError::InvalidReference(_) => {
                ReturnCode::BadParameters
            }
        }
    }
}

impl From<serde_cbor::Error> for ProtoError {
    fn from(e: serde_cbor::Error) -> Self {
        ProtoError::BadFormat(e.to_string())
    }
}

impl From<encdec::Error> for ProtoError {
    fn from(e: encdec::Error) -> Self {
        ProtoError::BadFormat(format!("{e:?}"))
    }
}
