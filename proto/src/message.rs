// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Broker request and response messages
//!
//! Requests are issued by a client against its own (local) identifiers,
//! the caller identity is implied by the transport and never carried in
//! the message itself.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::{Command, ProtoError, ReturnCode, ReturnOrigin, TaUuid, WireMemory};

/// Session connection (login) method
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum ConnectionMethod {
    Public = 0x00,
    User = 0x01,
    Group = 0x02,
    Application = 0x04,
    UserApplication = 0x05,
    GroupApplication = 0x06,
}

impl Default for ConnectionMethod {
    fn default() -> Self {
        ConnectionMethod::Public
    }
}

/// Broker request message
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    InitializeContext {
        tee_name: Option<String>,
    },

    FinalizeContext,

    RegisterSharedMemory {
        memory: WireMemory,
    },

    ReleaseSharedMemory {
        id: u32,
    },

    OpenSession {
        session_id: u32,
        uuid: TaUuid,
        method: ConnectionMethod,
        data: u32,
        /// Encoded [WireOperation][crate::WireOperation], if provided
        operation: Option<Vec<u8>>,
        /// Operation sequence number for cancellation
        sequence: u64,
    },

    CloseSession {
        session_id: u32,
    },

    InvokeCommand {
        session_id: u32,
        command_id: u32,
        /// Encoded [WireOperation][crate::WireOperation], if provided
        operation: Option<Vec<u8>>,
        /// Operation sequence number for cancellation
        sequence: u64,
    },

    RequestCancellation {
        sequence: u64,
    },
}

impl Request {
    /// Fetch the [Command] code for a request
    pub fn command(&self) -> Command {
        match self {
            Request::InitializeContext { .. } => Command::InitializeContext,
            Request::FinalizeContext => Command::FinalizeContext,
            Request::RegisterSharedMemory { .. } => Command::RegisterSharedMemory,
            Request::ReleaseSharedMemory { .. } => Command::ReleaseSharedMemory,
            Request::OpenSession { .. } => Command::OpenSession,
            Request::CloseSession { .. } => Command::CloseSession,
            Request::InvokeCommand { .. } => Command::InvokeCommand,
            Request::RequestCancellation { .. } => Command::RequestCancellation,
        }
    }

    /// Check whether a request expects a [Response]
    ///
    /// Cancellation is fire-and-forget
    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::RequestCancellation { .. })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn decode(buff: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_cbor::from_slice(buff)?)
    }
}

/// Broker response message
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Response {
    /// Result code
    pub code: ReturnCode,
    /// Origin of the result code (open session / invoke command only)
    pub origin: Option<ReturnOrigin>,
    /// Updated encoded operation (open session / invoke command only)
    pub operation: Option<Vec<u8>>,
}

impl Response {
    /// Create a response carrying only a return code
    pub fn code(code: ReturnCode) -> Self {
        Self {
            code,
            origin: None,
            operation: None,
        }
    }

    /// Create a successful response
    pub fn success() -> Self {
        Self::code(ReturnCode::Success)
    }

    /// Create a response with a code and origin
    pub fn with_origin(code: ReturnCode, origin: ReturnOrigin) -> Self {
        Self {
            code,
            origin: Some(origin),
            operation: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn decode(buff: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_cbor::from_slice(buff)?)
    }
}
