// Copyright (c) 2022-2023 The MobileCoin Foundation

//! TEE client broker core
//!
//! This provides the [Guard], an identifier broker multiplexing many
//! mutually-distrusting callers onto a single trusted engine connection
//! (abstracted by the [Connector] trait), see [otee_proto] for the message
//! model and wire encodings.
//!
//! ## Operations
//!
//! Callers are identified by a [CallerId][otee_proto::CallerId] assigned
//! by the transport (see [Guard::attach]), each caller must issue
//! `InitializeContext` prior to any other request and `FinalizeContext`
//! on exit. Callers that disconnect without finalising are torn down
//! by the transport via [Guard::disconnect].
//!
//! Shared memory blocks and sessions are addressed by _local_ identifiers
//! chosen by the caller, the [Guard] allocates engine-global identifiers
//! and rewrites every operation crossing it in both directions. References
//! that do not resolve inside the callers own tables are rejected.
//!
//! Requests may be dispatched directly via [Guard::dispatch], or served
//! over a unix socket with [service::serve].

pub use otee_proto::{self as proto};

mod caller;

mod connector;
pub use connector::{Connector, EngineResult};

mod error;
pub use error::Error;

mod guard;
pub use guard::{Guard, GuardConfig};

#[cfg(feature = "service")]
pub mod service;
