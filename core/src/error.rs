// Copyright (c) 2022-2023 The MobileCoin Foundation

use otee_proto::{CallerId, ProtoError, ReturnCode, ReturnOrigin};

/// [Guard][crate::Guard] errors
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error {
    /// Caller has not initialised a context
    #[error("unknown caller: {0}")]
    UnknownCaller(CallerId),

    /// Caller transport has disconnected
    #[error("caller disconnected: {0}")]
    Disconnected(CallerId),

    /// Memory reference does not resolve within the callers tables
    #[error("unknown shared memory: {0}")]
    UnknownMemory(u32),

    /// Session does not resolve within the callers tables
    #[error("unknown session: {0}")]
    UnknownSession(u32),

    /// Local identifier is already in use by this caller
    #[error("duplicate identifier: {0}")]
    DuplicateId(u32),

    /// Memory reference is not permitted by the registered block
    #[error("memory reference not permitted (slot {0})")]
    NotPermitted(usize),

    /// Global identifier space exhausted
    #[error("identifier space exhausted")]
    IdsExhausted,

    /// Caller was finalised while a call was in flight
    #[error("caller finalised")]
    Finalized,

    /// Engine reported a failure
    #[error("engine error {code} (origin: {origin})")]
    Connector {
        code: ReturnCode,
        origin: ReturnOrigin,
    },

    /// Message encoding / decoding failed
    #[error("codec error: {0}")]
    Codec(#[from] ProtoError),
}

impl Error {
    /// Return code reported to the caller for this error
    pub fn code(&self) -> ReturnCode {
        match self {
            Error::UnknownCaller(_) => ReturnCode::AccessDenied,
            Error::Disconnected(_) => ReturnCode::Communication,
            Error::UnknownMemory(_) => ReturnCode::ItemNotFound,
            Error::UnknownSession(_) => ReturnCode::BadParameters,
            Error::DuplicateId(_) => ReturnCode::BadParameters,
            Error::NotPermitted(_) => ReturnCode::BadParameters,
            Error::IdsExhausted => ReturnCode::OutOfMemory,
            Error::Finalized => ReturnCode::BadState,
            Error::Connector { code, .. } => *code,
            Error::Codec(e) => e.code(),
        }
    }

    /// Origin reported to the caller for this error
    pub fn origin(&self) -> ReturnOrigin {
        match self {
            Error::Connector { origin, .. } => *origin,
            _ => ReturnOrigin::Comms,
        }
    }
}
