// Copyright (c) 2022-2023 The MobileCoin Foundation

use otee_proto::{ProtoError, ReturnCode, ReturnOrigin};

/// TEE Client API Error Type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation failed with a return code from the provided origin
    #[error("TEE error {code} (origin: {origin})")]
    Tee {
        code: ReturnCode,
        origin: ReturnOrigin,
    },

    /// Context is not initialised (or already finalised)
    #[error("Context not ready")]
    NotReady,

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an error for a locally detected contract violation
    pub fn api(code: ReturnCode) -> Self {
        Error::Tee {
            code,
            origin: ReturnOrigin::Api,
        }
    }

    /// Fetch the [ReturnCode] for this error
    pub fn code(&self) -> ReturnCode {
        match self {
            Error::Tee { code, .. } => *code,
            Error::NotReady => ReturnCode::BadState,
            Error::Transport(_) | Error::Io(_) => ReturnCode::Communication,
        }
    }

    /// Fetch the [ReturnOrigin] for this error
    pub fn origin(&self) -> ReturnOrigin {
        match self {
            Error::Tee { origin, .. } => *origin,
            Error::NotReady => ReturnOrigin::Api,
            Error::Transport(_) | Error::Io(_) => ReturnOrigin::Comms,
        }
    }
}

/// Codec errors raised while building requests are caller errors
impl From<ProtoError> for Error {
    fn from(e: ProtoError) -> Self {
        Error::api(e.code())
    }
}
