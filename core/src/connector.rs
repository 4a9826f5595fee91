// Copyright (c) 2022-2023 The MobileCoin Foundation

//! [Connector] trait abstracting the trusted execution engine

use std::sync::Arc;

use otee_proto::{ConnectionMethod, CorrelationToken, ReturnCode, ReturnOrigin, TaUuid};

/// Result of an engine call carrying an operation
#[derive(Clone, PartialEq, Debug)]
pub struct EngineResult {
    pub code: ReturnCode,
    pub origin: ReturnOrigin,
    /// Updated encoded operation, where one was provided
    pub operation: Option<Vec<u8>>,
}

impl EngineResult {
    pub fn new(code: ReturnCode, origin: ReturnOrigin, operation: Option<Vec<u8>>) -> Self {
        Self {
            code,
            origin,
            operation,
        }
    }

    /// Create a failed result with no operation
    pub fn error(code: ReturnCode, origin: ReturnOrigin) -> Self {
        Self::new(code, origin, None)
    }
}

/// [Connector] provides a narrow synchronous interface to the engine for
/// use by the [Guard][crate::Guard].
///
/// All identifiers are engine-global, operations and shared memory blocks
/// are passed in their encoded forms. Implementations must support calls
/// from multiple threads, in particular `request_cancellation` must not
/// block behind a pending `open_session` or `invoke_command`.
pub trait Connector: Send + Sync {
    /// Connect to the named engine
    fn initialize(&self, name: Option<&str>) -> ReturnCode;

    /// Disconnect from the engine
    fn finalize(&self);

    /// Register an encoded [WireMemory][otee_proto::WireMemory] block with the provided id
    fn register_shared_memory(&self, block: &[u8], id: u32) -> ReturnCode;

    fn release_shared_memory(&self, id: u32);

    /// Open a session with the provided id
    fn open_session(
        &self,
        session_id: u32,
        uuid: &TaUuid,
        method: ConnectionMethod,
        data: u32,
        operation: Option<&[u8]>,
        token: CorrelationToken,
    ) -> EngineResult;

    fn close_session(&self, session_id: u32);

    fn invoke_command(
        &self,
        session_id: u32,
        command_id: u32,
        operation: Option<&[u8]>,
        token: CorrelationToken,
    ) -> EngineResult;

    /// Request cancellation of a pending operation, best-effort
    fn request_cancellation(&self, token: CorrelationToken);
}

impl<T: Connector> Connector for Arc<T> {
    fn initialize(&self, name: Option<&str>) -> ReturnCode {
        T::initialize(self, name)
    }

    fn finalize(&self) {
        T::finalize(self)
    }

    fn register_shared_memory(&self, block: &[u8], id: u32) -> ReturnCode {
        T::register_shared_memory(self, block, id)
    }

    fn release_shared_memory(&self, id: u32) {
        T::release_shared_memory(self, id)
    }

    fn open_session(
        &self,
        session_id: u32,
        uuid: &TaUuid,
        method: ConnectionMethod,
        data: u32,
        operation: Option<&[u8]>,
        token: CorrelationToken,
    ) -> EngineResult {
        T::open_session(self, session_id, uuid, method, data, operation, token)
    }

    fn close_session(&self, session_id: u32) {
        T::close_session(self, session_id)
    }

    fn invoke_command(
        &self,
        session_id: u32,
        command_id: u32,
        operation: Option<&[u8]>,
        token: CorrelationToken,
    ) -> EngineResult {
        T::invoke_command(self, session_id, command_id, operation, token)
    }

    fn request_cancellation(&self, token: CorrelationToken) {
        T::request_cancellation(self, token)
    }
}
