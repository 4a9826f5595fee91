// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Simulated engine implementing [Connector]
//!
//! Trusted applications are registered by UUID and executed in-process,
//! each pending operation is tracked by [CorrelationToken] so that
//! cancellation requests can be delivered while the operation is running.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, info, warn};

use otee_core::{Connector, EngineResult};
use otee_proto::{
    ConnectionMethod, CorrelationToken, ReturnCode, ReturnOrigin, TaUuid, WireMemory,
    WireOperation, WireParam,
};

use crate::Cancellation;

/// Trusted application executed by the [SimEngine]
pub trait TrustedApp: Send + Sync {
    /// Application name, for logging
    fn name(&self) -> &str;

    /// Open a session, returning the session state on success
    fn open_session(
        &self,
        params: &mut [WireParam],
        cancel: &Cancellation,
    ) -> Result<Box<dyn TaSession>, ReturnCode>;
}

/// Session state for a [TrustedApp]
pub trait TaSession: Send + Sync {
    fn invoke_command(
        &self,
        command_id: u32,
        params: &mut [WireParam],
        cancel: &Cancellation,
    ) -> Result<(), ReturnCode>;

    fn close(&self) {}
}

struct SimSession {
    uuid: TaUuid,
    session: Arc<dyn TaSession>,
}

#[derive(Default)]
struct SimState {
    connected: bool,
    memory: HashMap<u32, WireMemory>,
    sessions: HashMap<u32, SimSession>,
    pending: HashMap<CorrelationToken, Cancellation>,
}

/// Simulated engine
pub struct SimEngine {
    name: String,
    apps: HashMap<TaUuid, Arc<dyn TrustedApp>>,
    state: Mutex<SimState>,
}

impl SimEngine {
    /// Create a new engine with the provided name and no applications
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            apps: HashMap::new(),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Register a trusted application under the provided UUID
    pub fn with_app(mut self, uuid: TaUuid, app: impl TrustedApp + 'static) -> Self {
        info!("Registering application {} ({uuid})", app.name());
        self.apps.insert(uuid, Arc::new(app));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Number of registered shared memory blocks
    pub fn memory_count(&self) -> usize {
        self.state().memory.len()
    }

    /// Number of operations currently executing
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decode an operation and check memory references resolve to registered blocks
    fn prepare(
        state: &SimState,
        operation: Option<&[u8]>,
    ) -> Result<Option<WireOperation>, ReturnCode> {
        let op = match operation {
            Some(b) => WireOperation::decode(b).map_err(|e| e.code())?,
            None => return Ok(None),
        };

        for (i, parent) in op.parents() {
            match state.memory.get(&parent.id) {
                Some(m) if m.size == parent.size => (),
                _ => {
                    warn!("Slot {i} references unregistered shared memory {}", parent.id);
                    return Err(ReturnCode::BadParameters);
                }
            }
        }

        Ok(Some(op))
    }

    /// Update registered blocks with output data and encode the returned operation
    fn complete(state: &mut SimState, op: Option<WireOperation>) -> Option<Vec<u8>> {
        let op = op?;

        for p in &op.params {
            let parent = match p {
                WireParam::MemRef {
                    parent, direction, ..
                } if direction.is_output() => parent,
                _ => continue,
            };

            match state.memory.get_mut(&parent.id) {
                Some(m) if m.buffer.len() == parent.buffer.len() => {
                    m.buffer.copy_from_slice(&parent.buffer);
                    m.return_size = parent.return_size;
                }
                _ => warn!("Output to released shared memory {}", parent.id),
            }
        }

        op.encode().ok()
    }

    /// Execute an operation with cancellation tracking.
    ///
    /// Engine-level failures (malformed operations, unresolved references)
    /// are returned as errors, application results are returned with the
    /// updated operation.
    fn execute<F>(
        &self,
        operation: Option<&[u8]>,
        token: CorrelationToken,
        f: F,
    ) -> Result<(Result<(), ReturnCode>, Option<Vec<u8>>), ReturnCode>
    where
        F: FnOnce(&mut [WireParam], &Cancellation) -> Result<(), ReturnCode>,
    {
        let cancel = Cancellation::new();

        let mut op = {
            let mut s = self.state();
            let op = Self::prepare(&s, operation)?;
            s.pending.insert(token, cancel.clone());
            op
        };

        let mut empty: [WireParam; 0] = [];
        let params = match &mut op {
            Some(op) => &mut op.params[..],
            None => &mut empty[..],
        };

        let r = f(params, &cancel);

        let mut s = self.state();
        s.pending.remove(&token);

        Ok((r, Self::complete(&mut s, op)))
    }
}

impl Connector for SimEngine {
    fn initialize(&self, name: Option<&str>) -> ReturnCode {
        match name {
            Some(n) if n != self.name => {
                warn!("Unknown engine name: {n}");
                ReturnCode::ItemNotFound
            }
            _ => {
                info!("Engine {} initialised", self.name);
                self.state().connected = true;
                ReturnCode::Success
            }
        }
    }

    fn finalize(&self) {
        let mut s = self.state();

        for (_id, session) in s.sessions.drain() {
            session.session.close();
        }
        s.memory.clear();
        s.connected = false;

        info!("Engine {} finalised", self.name);
    }

    fn register_shared_memory(&self, block: &[u8], id: u32) -> ReturnCode {
        let block = match WireMemory::decode(block) {
            Ok(b) => b,
            Err(e) => return e.code(),
        };

        let mut s = self.state();

        if !s.connected {
            return ReturnCode::BadState;
        }
        if block.id != id || s.memory.contains_key(&id) {
            return ReturnCode::BadParameters;
        }

        debug!("Registered shared memory {id} ({} bytes)", block.size);
        s.memory.insert(id, block);

        ReturnCode::Success
    }

    fn release_shared_memory(&self, id: u32) {
        if self.state().memory.remove(&id).is_none() {
            warn!("Release of unknown shared memory {id}");
        }
    }

    fn open_session(
        &self,
        session_id: u32,
        uuid: &TaUuid,
        method: ConnectionMethod,
        _data: u32,
        operation: Option<&[u8]>,
        token: CorrelationToken,
    ) -> EngineResult {
        let app = match (self.state().connected, self.apps.get(uuid)) {
            (false, _) => return EngineResult::error(ReturnCode::BadState, ReturnOrigin::Tee),
            (true, None) => {
                warn!("Unknown application: {uuid}");
                return EngineResult::error(ReturnCode::ItemNotFound, ReturnOrigin::Tee);
            }
            (true, Some(a)) => a.clone(),
        };

        debug!("Opening session {session_id} with {} ({method} login)", app.name());

        let mut session = None;
        let r = self.execute(operation, token, |params, cancel| {
            session = Some(app.open_session(params, cancel)?);
            Ok(())
        });

        let (r, operation) = match r {
            Ok(v) => v,
            Err(code) => return EngineResult::error(code, ReturnOrigin::Tee),
        };

        match (r, session) {
            (Ok(()), Some(s)) => {
                self.state().sessions.insert(
                    session_id,
                    SimSession {
                        uuid: *uuid,
                        session: Arc::from(s),
                    },
                );
                EngineResult::new(ReturnCode::Success, ReturnOrigin::TrustedApp, operation)
            }
            (Err(code), _) => EngineResult::new(code, ReturnOrigin::TrustedApp, operation),
            (Ok(()), None) => EngineResult::error(ReturnCode::Generic, ReturnOrigin::Tee),
        }
    }

    fn close_session(&self, session_id: u32) {
        match self.state().sessions.remove(&session_id) {
            Some(s) => {
                debug!("Closing session {session_id} ({})", s.uuid);
                s.session.close();
            }
            None => warn!("Close of unknown session {session_id}"),
        }
    }

    fn invoke_command(
        &self,
        session_id: u32,
        command_id: u32,
        operation: Option<&[u8]>,
        token: CorrelationToken,
    ) -> EngineResult {
        let session = match self.state().sessions.get(&session_id) {
            Some(s) => s.session.clone(),
            None => return EngineResult::error(ReturnCode::BadParameters, ReturnOrigin::Tee),
        };

        let r = self.execute(operation, token, |params, cancel| {
            session.invoke_command(command_id, params, cancel)
        });

        let (r, operation) = match r {
            Ok(v) => v,
            Err(code) => return EngineResult::error(code, ReturnOrigin::Tee),
        };

        match r {
            Ok(()) => EngineResult::new(ReturnCode::Success, ReturnOrigin::TrustedApp, operation),
            Err(code) => EngineResult::new(code, ReturnOrigin::TrustedApp, operation),
        }
    }

    fn request_cancellation(&self, token: CorrelationToken) {
        match self.state().pending.get(&token) {
            Some(c) => {
                debug!("Cancelling operation {token}");
                c.cancel();
            }
            None => debug!("Cancellation for {token} with no pending operation"),
        }
    }
}
