// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol / wire definitions for TEE client broker communication
//!
//! This crate provides the message model shared by client applications, the
//! broker ([Guard](https://docs.rs/otee-core)) and engine connectors.
//!
//! Operations and shared memory blocks are encoded as CBOR so that every
//! message is self-describing, each operation carries up to [MAX_PARAMS]
//! parameter slots in order. Broker requests and responses are carried over
//! stream transports in length-prefixed frames, see [frame].
//!
//! Identifiers inside encoded operations are _local_ to the caller on the
//! client side of the broker and _global_ on the engine side, the broker
//! rewrites them in both directions.

use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter};

pub mod code;
pub use code::{ReturnCode, ReturnOrigin};

pub mod flags;
pub use flags::{Direction, MemoryFlags};

pub mod frame;

pub mod ids;
pub use ids::IdAllocator;

pub mod message;
pub use message::{ConnectionMethod, Request, Response};

pub mod operation;
pub use operation::{WireMemory, WireOperation, WireParam};

pub mod token;
pub use token::CorrelationToken;

pub mod uuid;
pub use uuid::TaUuid;

mod error;
pub use error::ProtoError;

/// Maximum number of parameters carried by an operation
pub const MAX_PARAMS: usize = 4;

/// Maximum size of a single shared memory block
pub const MAX_SHARED_MEMORY_SIZE: usize = 1 << 20;

/// Caller identity, assigned by the transport
pub type CallerId = u32;

/// Broker command codes, carried in each [frame::FrameHeader]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumIter, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    /// Connect a caller (and the engine, where required)
    InitializeContext = 0x01,

    /// Tear down a caller and every resource it still holds
    FinalizeContext = 0x02,

    /// Register a block of shared memory
    RegisterSharedMemory = 0x10,

    /// Release a block of shared memory
    ReleaseSharedMemory = 0x11,

    /// Open a session with a trusted application
    OpenSession = 0x20,

    /// Close a session
    CloseSession = 0x21,

    /// Invoke a command within a session
    InvokeCommand = 0x30,

    /// Request cancellation of a pending operation
    RequestCancellation = 0x31,

    /// Response to any of the above
    Response = 0x80,
}
