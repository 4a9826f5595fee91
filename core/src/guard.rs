// Copyright (c) 2022-2023 The MobileCoin Foundation

//! The [Guard] multiplexes callers onto a single engine [Connector]
//!
//! Each caller addresses shared memory and sessions by its own _local_
//! identifiers, the guard owns the engine-global identifier space and
//! translates between the two on every call. Operations on identifiers
//! not owned by the calling caller are rejected without reaching the engine.
//!
//! Locks are always taken in the order `engine -> callers -> caller -> ids`,
//! and no lock other than `engine` (during connect / teardown) is held
//! across a call into the [Connector].

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use log::{debug, error, info, warn};

use otee_proto::{
    CallerId, ConnectionMethod, CorrelationToken, IdAllocator, Request, Response, ReturnCode,
    ReturnOrigin, TaUuid, WireMemory, WireOperation,
};

use crate::{
    caller::{Caller, MemoryHandle, SessionHandle, SlotMap},
    Connector, EngineResult, Error,
};

/// [Guard] configuration
#[derive(Clone, PartialEq, Debug)]
pub struct GuardConfig {
    /// Size of the global identifier space (ids are allocated in `0..id_space`)
    pub id_space: u32,
    /// Number of random probes before sweeping the identifier space
    pub id_retries: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            id_space: 500_000,
            id_retries: 64,
        }
    }
}

/// Engine connection state
#[derive(Debug, Default)]
struct EngineState {
    connected: bool,
    name: Option<String>,
}

/// Global identifier tables
#[derive(Debug)]
struct GlobalIds {
    memory: IdAllocator,
    sessions: IdAllocator,
}

/// Identifier broker, shared between all callers of an engine
pub struct Guard<C: Connector> {
    connector: C,
    engine: Mutex<EngineState>,
    callers: Mutex<HashMap<CallerId, Arc<Mutex<Caller>>>>,
    ids: Mutex<GlobalIds>,
    /// Callers torn down by transport disconnect, never re-admitted
    detached: Mutex<HashSet<CallerId>>,
    next_caller: AtomicU32,
}

/// Helper to lock a mutex, recovering from poisoning
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<C: Connector> Guard<C> {
    /// Create a new guard with the default configuration
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, GuardConfig::default())
    }

    /// Create a new guard with the provided configuration
    pub fn with_config(connector: C, config: GuardConfig) -> Self {
        Self {
            connector,
            engine: Mutex::new(EngineState::default()),
            callers: Mutex::new(HashMap::new()),
            ids: Mutex::new(GlobalIds {
                memory: IdAllocator::new(config.id_space, config.id_retries),
                sessions: IdAllocator::new(config.id_space, config.id_retries),
            }),
            detached: Mutex::new(HashSet::new()),
            next_caller: AtomicU32::new(1),
        }
    }

    /// Fetch the underlying connector
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Allocate a fresh caller identity for a new transport connection
    pub fn attach(&self) -> CallerId {
        self.next_caller.fetch_add(1, Ordering::Relaxed)
    }

    /// Check whether the engine is connected
    pub fn is_connected(&self) -> bool {
        lock(&self.engine).connected
    }

    /// Fetch the name of the connected engine, if connected by name
    pub fn engine_name(&self) -> Option<String> {
        lock(&self.engine).name.clone()
    }

    /// Check whether a caller holds an initialised context
    pub fn has_caller(&self, caller_id: CallerId) -> bool {
        lock(&self.callers).contains_key(&caller_id)
    }

    /// Number of connected callers
    pub fn caller_count(&self) -> usize {
        lock(&self.callers).len()
    }

    /// Number of live global (shared memory, session) identifiers
    pub fn live_ids(&self) -> (usize, usize) {
        let ids = lock(&self.ids);
        (ids.memory.len(), ids.sessions.len())
    }

    fn caller(&self, caller_id: CallerId) -> Result<Arc<Mutex<Caller>>, Error> {
        lock(&self.callers)
            .get(&caller_id)
            .cloned()
            .ok_or(Error::UnknownCaller(caller_id))
    }

    /// Connect the engine where required and create a caller record
    pub fn initialize_context(
        &self,
        caller_id: CallerId,
        tee_name: Option<&str>,
    ) -> Result<(), Error> {
        let mut engine = lock(&self.engine);

        // Requests racing a disconnect must not resurrect the caller
        if lock(&self.detached).contains(&caller_id) {
            warn!("Initialise for disconnected caller {caller_id}");
            return Err(Error::Disconnected(caller_id));
        }

        if !engine.connected {
            info!("Connecting engine: {}", tee_name.unwrap_or("default"));

            let code = self.connector.initialize(tee_name);
            if !code.is_success() {
                error!("Engine initialisation failed: {code}");
                return Err(Error::Connector {
                    code,
                    origin: ReturnOrigin::Tee,
                });
            }

            engine.connected = true;
            engine.name = tee_name.map(String::from);
        }

        let mut callers = lock(&self.callers);
        if callers.contains_key(&caller_id) {
            debug!("Caller {caller_id} already initialised");
        } else {
            info!("Caller {caller_id} connected");
            callers.insert(caller_id, Arc::new(Mutex::new(Caller::new(caller_id))));
        }

        Ok(())
    }

    /// Tear down a caller, releasing every resource it still holds and
    /// disconnecting the engine once no callers remain
    pub fn finalize_context(&self, caller_id: CallerId) {
        let mut engine = lock(&self.engine);

        let caller = match lock(&self.callers).remove(&caller_id) {
            Some(c) => c,
            None => {
                debug!("Finalize for unknown caller {caller_id}");
                return;
            }
        };

        let (memory, sessions) = lock(&caller).finalize();

        if !memory.is_empty() {
            warn!(
                "Caller {caller_id} finalised with {} shared memory block(s) registered",
                memory.len()
            );
        }
        for m in memory {
            self.connector.release_shared_memory(m.global_id);
            lock(&self.ids).memory.release(m.global_id);
        }

        if !sessions.is_empty() {
            warn!(
                "Caller {caller_id} finalised with {} session(s) open",
                sessions.len()
            );
        }
        for s in sessions {
            self.connector.close_session(s.global_id);
            lock(&self.ids).sessions.release(s.global_id);
        }

        info!("Caller {caller_id} finalised");

        if engine.connected && lock(&self.callers).is_empty() {
            info!("No callers remaining, disconnecting engine");

            self.connector.finalize();
            engine.connected = false;
            engine.name = None;
        }
    }

    /// Forcibly tear down a caller on transport disconnect
    pub fn disconnect(&self, caller_id: CallerId) {
        lock(&self.detached).insert(caller_id);

        if self.has_caller(caller_id) {
            warn!("Caller {caller_id} disconnected without finalising");
        }
        self.finalize_context(caller_id);
    }

    /// Register a shared memory block under the callers local id
    pub fn register_shared_memory(
        &self,
        caller_id: CallerId,
        memory: WireMemory,
    ) -> Result<(), Error> {
        let caller = self.caller(caller_id)?;

        memory.validate()?;
        let local_id = memory.id;

        if lock(&caller).memory(local_id).is_some() {
            warn!("Caller {caller_id} re-registered shared memory {local_id}");
            return Err(Error::DuplicateId(local_id));
        }

        let flags = memory.flags()?;

        let global_id = lock(&self.ids)
            .memory
            .allocate()
            .ok_or(Error::IdsExhausted)?;

        let handle = MemoryHandle {
            global_id,
            flags,
            size: memory.size,
            return_size: memory.return_size,
        };

        let block = WireMemory { id: global_id, ..memory };
        let encoded = match block.encode() {
            Ok(v) => v,
            Err(e) => {
                lock(&self.ids).memory.release(global_id);
                return Err(e.into());
            }
        };

        debug!("Caller {caller_id} registering shared memory {local_id} as {global_id}");

        let code = self.connector.register_shared_memory(&encoded, global_id);
        if !code.is_success() {
            lock(&self.ids).memory.release(global_id);
            return Err(Error::Connector {
                code,
                origin: ReturnOrigin::Tee,
            });
        }

        let mut c = lock(&caller);
        let r = match c.is_finalized() {
            true => Err(Error::Finalized),
            false => c.add_memory(local_id, handle),
        };
        drop(c);

        // Undo registration where the caller went away or raced itself
        if let Err(e) = r {
            self.connector.release_shared_memory(global_id);
            lock(&self.ids).memory.release(global_id);
            return Err(e);
        }

        Ok(())
    }

    /// Release a shared memory block, unknown ids are ignored
    pub fn release_shared_memory(&self, caller_id: CallerId, local_id: u32) {
        let caller = match self.caller(caller_id) {
            Ok(c) => c,
            Err(_) => return,
        };

        let handle = match lock(&caller).remove_memory(local_id) {
            Some(h) => h,
            None => {
                debug!("Caller {caller_id} released unknown shared memory {local_id}");
                return;
            }
        };

        debug!(
            "Caller {caller_id} releasing shared memory {local_id} ({})",
            handle.global_id
        );

        self.connector.release_shared_memory(handle.global_id);
        lock(&self.ids).memory.release(handle.global_id);
    }

    /// Open a session with a trusted application
    #[allow(clippy::too_many_arguments)]
    pub fn open_session(
        &self,
        caller_id: CallerId,
        local_id: u32,
        uuid: &TaUuid,
        method: ConnectionMethod,
        data: u32,
        operation: Option<&[u8]>,
        sequence: u64,
    ) -> Result<EngineResult, Error> {
        let caller = self.caller(caller_id)?;

        let (operation, slots) = {
            let c = lock(&caller);

            if c.has_session(local_id) {
                return Err(Error::DuplicateId(local_id));
            }

            Self::outbound(&c, operation)?
        };

        let global_id = lock(&self.ids)
            .sessions
            .allocate()
            .ok_or(Error::IdsExhausted)?;

        debug!("Caller {caller_id} opening session {local_id} as {global_id} ({uuid})");

        let token = CorrelationToken::new(caller_id, sequence);
        let mut r = self.connector.open_session(
            global_id,
            uuid,
            method,
            data,
            operation.as_deref(),
            token,
        );

        let mut c = lock(&caller);

        if !r.code.is_success() {
            drop(c);
            lock(&self.ids).sessions.release(global_id);

            // Operations are only returned to the caller on success
            r.operation = None;
            return Ok(r);
        }

        let added = match c.is_finalized() {
            true => Err(Error::Finalized),
            false => c.add_session(
                local_id,
                SessionHandle {
                    global_id,
                    uuid: *uuid,
                },
            ),
        };

        if let Err(e) = added {
            drop(c);
            self.connector.close_session(global_id);
            lock(&self.ids).sessions.release(global_id);
            return Err(e);
        }

        match Self::inbound(&mut c, r.operation.take(), &slots) {
            Ok(op) => r.operation = op,
            Err(e) => {
                c.remove_session(local_id);
                drop(c);

                self.connector.close_session(global_id);
                lock(&self.ids).sessions.release(global_id);
                return Err(e);
            }
        }

        Ok(r)
    }

    /// Close a session, unknown ids are ignored
    pub fn close_session(&self, caller_id: CallerId, local_id: u32) {
        let caller = match self.caller(caller_id) {
            Ok(c) => c,
            Err(_) => {
                warn!("Close session for unknown caller {caller_id}");
                return;
            }
        };

        let handle = match lock(&caller).remove_session(local_id) {
            Some(h) => h,
            None => {
                debug!("Caller {caller_id} closed unknown session {local_id}");
                return;
            }
        };

        debug!(
            "Caller {caller_id} closing session {local_id} ({})",
            handle.global_id
        );

        self.connector.close_session(handle.global_id);
        lock(&self.ids).sessions.release(handle.global_id);
    }

    /// Invoke a command within an open session
    pub fn invoke_command(
        &self,
        caller_id: CallerId,
        local_id: u32,
        command_id: u32,
        operation: Option<&[u8]>,
        sequence: u64,
    ) -> Result<EngineResult, Error> {
        let caller = self.caller(caller_id)?;

        let (global_id, operation, slots) = {
            let c = lock(&caller);

            let global_id = match c.session(local_id) {
                Some(s) => s.global_id,
                None => {
                    warn!("Caller {caller_id} invoked unknown session {local_id}");
                    return Err(Error::UnknownSession(local_id));
                }
            };

            let (operation, slots) = Self::outbound(&c, operation)?;
            (global_id, operation, slots)
        };

        debug!("Caller {caller_id} invoking command {command_id} on session {local_id}");

        let token = CorrelationToken::new(caller_id, sequence);
        let mut r =
            self.connector
                .invoke_command(global_id, command_id, operation.as_deref(), token);

        let mut c = lock(&caller);
        r.operation = Self::inbound(&mut c, r.operation.take(), &slots)?;

        Ok(r)
    }

    /// Forward a cancellation request for a callers pending operation
    pub fn request_cancellation(&self, caller_id: CallerId, sequence: u64) {
        if !self.has_caller(caller_id) {
            debug!("Cancellation from unknown caller {caller_id}");
            return;
        }

        let token = CorrelationToken::new(caller_id, sequence);
        debug!("Requesting cancellation for {token}");

        self.connector.request_cancellation(token);
    }

    /// Decode, validate and rewrite an outbound operation
    fn outbound(
        caller: &Caller,
        operation: Option<&[u8]>,
    ) -> Result<(Option<Vec<u8>>, SlotMap), Error> {
        let buff = match operation {
            Some(b) => b,
            None => return Ok((None, SlotMap::new())),
        };

        let mut op = WireOperation::decode(buff)?;
        op.check_references()?;

        let slots = caller.rewrite_outbound(&mut op)?;

        Ok((Some(op.encode()?), slots))
    }

    /// Decode and rewrite an operation returned by the engine
    fn inbound(
        caller: &mut Caller,
        operation: Option<Vec<u8>>,
        slots: &SlotMap,
    ) -> Result<Option<Vec<u8>>, Error> {
        let buff = match operation {
            Some(b) => b,
            None => return Ok(None),
        };

        let mut op = WireOperation::decode(&buff).map_err(|e| {
            error!("Engine returned malformed operation: {e}");
            Error::Connector {
                code: ReturnCode::Communication,
                origin: ReturnOrigin::Comms,
            }
        })?;

        caller.rewrite_inbound(&mut op, slots)?;

        Ok(Some(op.encode()?))
    }

    /// Dispatch a [Request] from the provided caller, returning the [Response]
    pub fn dispatch(&self, caller_id: CallerId, request: Request) -> Response {
        let r = match request {
            Request::InitializeContext { tee_name } => self
                .initialize_context(caller_id, tee_name.as_deref())
                .map(|_| Response::success()),
            Request::FinalizeContext => {
                self.finalize_context(caller_id);
                Ok(Response::success())
            }
            Request::RegisterSharedMemory { memory } => self
                .register_shared_memory(caller_id, memory)
                .map(|_| Response::success()),
            Request::ReleaseSharedMemory { id } => {
                self.release_shared_memory(caller_id, id);
                Ok(Response::success())
            }
            Request::OpenSession {
                session_id,
                uuid,
                method,
                data,
                operation,
                sequence,
            } => self
                .open_session(
                    caller_id,
                    session_id,
                    &uuid,
                    method,
                    data,
                    operation.as_deref(),
                    sequence,
                )
                .map(Response::from),
            Request::CloseSession { session_id } => {
                self.close_session(caller_id, session_id);
                Ok(Response::success())
            }
            Request::InvokeCommand {
                session_id,
                command_id,
                operation,
                sequence,
            } => self
                .invoke_command(
                    caller_id,
                    session_id,
                    command_id,
                    operation.as_deref(),
                    sequence,
                )
                .map(Response::from),
            Request::RequestCancellation { sequence } => {
                self.request_cancellation(caller_id, sequence);
                Ok(Response::success())
            }
        };

        match r {
            Ok(r) => r,
            Err(e) => {
                debug!("Caller {caller_id} request failed: {e}");
                Response::with_origin(e.code(), e.origin())
            }
        }
    }
}

impl From<EngineResult> for Response {
    fn from(r: EngineResult) -> Self {
        Response {
            code: r.code,
            origin: Some(r.origin),
            operation: r.operation,
        }
    }
}
