// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Client [Context], the entry point for TEE client applications
//!
//! A context owns one [Transport] connection to the broker (and is thus
//! one broker caller), and allocates local identifiers for the shared
//! memory blocks and sessions it creates. All calls block the calling
//! thread until the broker responds, and must not be made from within an
//! async context.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use log::{debug, info, warn};
use strum::Display;

use otee_proto::{
    ConnectionMethod, IdAllocator, MemoryFlags, Request, Response, ReturnCode, ReturnOrigin,
    TaUuid, WireOperation,
};

use crate::{
    bridge,
    transport::Transport,
    Error, Operation, Session, SharedBuffer, SharedMemory,
};

/// [Context] configuration
#[derive(Clone, PartialEq, Debug)]
pub struct ContextConfig {
    /// Size of the local identifier space
    pub id_space: u32,
    /// Number of random probes before sweeping the identifier space
    pub id_retries: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            id_space: 50_000,
            id_retries: 64,
        }
    }
}

/// Context lifecycle state
#[derive(Copy, Clone, PartialEq, Debug, Display)]
pub enum ContextState {
    Uninitialized,
    Active,
    Finalized,
}

/// Local identifier tables
#[derive(Debug)]
struct LocalIds {
    memory: IdAllocator,
    sessions: IdAllocator,
}

/// Context state shared with [Session]s
pub(crate) struct ContextInner {
    transport: Arc<dyn Transport>,
    state: Mutex<ContextState>,
    ids: Mutex<LocalIds>,
    sequence: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Map a broker response to a result
fn check(r: Response) -> Result<Response, Error> {
    match r.code {
        ReturnCode::Success => Ok(r),
        code => Err(Error::Tee {
            code,
            origin: r.origin.unwrap_or(ReturnOrigin::Comms),
        }),
    }
}

/// Failure of an [Operation] backed call
pub(crate) enum ExecuteError {
    /// Call failed before or at the broker, nothing was created
    Call(Error),
    /// Broker succeeded but returned outputs could not be written back
    Update(Error),
}

impl From<ExecuteError> for Error {
    fn from(e: ExecuteError) -> Self {
        match e {
            ExecuteError::Call(e) | ExecuteError::Update(e) => e,
        }
    }
}

impl ContextInner {
    pub(crate) fn state(&self) -> ContextState {
        *lock(&self.state)
    }

    pub(crate) fn ensure_active(&self) -> Result<(), Error> {
        match self.state() {
            ContextState::Active => Ok(()),
            _ => Err(Error::NotReady),
        }
    }

    /// Issue a request, returning the response on success
    pub(crate) fn call(&self, request: Request) -> Result<Response, Error> {
        check(bridge::call(&self.transport, request)?)
    }

    /// Issue a request using an optional [Operation], writing returned
    /// outputs back on success
    pub(crate) fn execute<F>(
        &self,
        operation: Option<&Operation>,
        f: F,
    ) -> Result<(), ExecuteError>
    where
        F: FnOnce(Option<Vec<u8>>, u64) -> Request,
    {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        // Held until the call completes, returning the operation to idle
        let _started = match operation {
            Some(op) => Some(op.start(sequence).map_err(ExecuteError::Call)?),
            None => None,
        };

        let encoded = match operation {
            Some(op) => Some(
                op.to_wire()
                    .encode()
                    .map_err(|e| ExecuteError::Call(e.into()))?,
            ),
            None => None,
        };

        let r = self
            .call(f(encoded, sequence))
            .map_err(ExecuteError::Call)?;

        if let (Some(op), Some(b)) = (operation, r.operation.as_deref()) {
            let returned = WireOperation::decode(b).map_err(|e| {
                warn!("Failed to decode returned operation: {e}");
                ExecuteError::Update(Error::Tee {
                    code: ReturnCode::BadFormat,
                    origin: ReturnOrigin::Comms,
                })
            })?;

            op.update(&returned).map_err(ExecuteError::Update)?;
        }

        Ok(())
    }

    pub(crate) fn release_session_id(&self, id: u32) {
        lock(&self.ids).sessions.release(id);
    }
}

/// TEE client context, see module docs
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context over the provided transport
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_config(transport, ContextConfig::default())
    }

    /// Create a context over the provided transport with custom configuration
    pub fn with_config(transport: impl Transport + 'static, config: ContextConfig) -> Self {
        let ids = LocalIds {
            memory: IdAllocator::new(config.id_space, config.id_retries),
            sessions: IdAllocator::new(config.id_space, config.id_retries),
        };

        Self {
            inner: Arc::new(ContextInner {
                transport: Arc::new(transport),
                state: Mutex::new(ContextState::Uninitialized),
                ids: Mutex::new(ids),
                // Zero is reserved for idle operations
                sequence: AtomicU64::new(1),
            }),
        }
    }

    /// Create a context attached in-process to a shared broker
    #[cfg(feature = "transport_local")]
    pub fn local<C: otee_core::Connector + 'static>(guard: Arc<otee_core::Guard<C>>) -> Self {
        Self::new(crate::transport::LocalTransport::new(guard))
    }

    /// Create a context connected to a broker socket
    #[cfg(feature = "transport_socket")]
    pub fn connect(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        // Connect on a worker so runtime setup never happens on the caller thread
        let t = std::thread::Builder::new()
            .name("otee-connect".to_string())
            .spawn(move || crate::transport::SocketTransport::connect(path))?;

        let t = t
            .join()
            .map_err(|_| Error::Transport("connect worker panicked".to_string()))??;

        Ok(Self::new(t))
    }

    pub fn state(&self) -> ContextState {
        self.inner.state()
    }

    /// Initialise the context, connecting to the named (or default) engine
    pub fn initialize_context(&self, tee_name: Option<&str>) -> Result<(), Error> {
        match self.inner.state() {
            ContextState::Uninitialized => (),
            ContextState::Active => return Err(Error::api(ReturnCode::BadState)),
            ContextState::Finalized => return Err(Error::NotReady),
        }

        debug!("Initialising context (engine: {tee_name:?})");

        self.inner.call(Request::InitializeContext {
            tee_name: tee_name.map(String::from),
        })?;

        *lock(&self.inner.state) = ContextState::Active;

        info!("Context initialised");

        Ok(())
    }

    /// Finalise the context, releasing every resource still held by the
    /// broker and closing the transport. Repeated calls have no effect.
    pub fn finalize_context(&self) {
        let prev = std::mem::replace(&mut *lock(&self.inner.state), ContextState::Finalized);

        match prev {
            ContextState::Finalized => return,
            ContextState::Active => {
                if let Err(e) = self.inner.call(Request::FinalizeContext) {
                    warn!("Finalize failed: {e}");
                }
            }
            ContextState::Uninitialized => (),
        }

        self.inner.transport.close();

        let mut ids = lock(&self.inner.ids);
        ids.memory.clear();
        ids.sessions.clear();

        info!("Context finalised");
    }

    /// Register a client buffer as shared memory with the provided flags
    pub fn register_shared_memory(
        &self,
        buffer: impl Into<SharedBuffer>,
        flags: MemoryFlags,
    ) -> Result<SharedMemory, Error> {
        self.inner.ensure_active()?;

        let buffer = buffer.into();
        if buffer.is_empty() {
            return Err(Error::api(ReturnCode::BadParameters));
        }
        MemoryFlags::from_raw(flags.bits())?;

        let id = lock(&self.inner.ids)
            .memory
            .allocate()
            .ok_or_else(|| Error::api(ReturnCode::OutOfMemory))?;

        let memory = SharedMemory::new(id, flags, buffer);

        let r = memory
            .to_wire()
            .validate()
            .map_err(Error::from)
            .and_then(|_| {
                self.inner.call(Request::RegisterSharedMemory {
                    memory: memory.to_wire(),
                })
            });

        if let Err(e) = r {
            debug!("Failed to register shared memory {id}: {e}");
            lock(&self.inner.ids).memory.release(id);
            return Err(e);
        }

        debug!("Registered shared memory {id} ({} bytes)", memory.size());

        Ok(memory)
    }

    /// Release a shared memory block. Repeated calls have no effect.
    pub fn release_shared_memory(&self, memory: &SharedMemory) {
        if memory.released.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.inner.state() == ContextState::Active {
            if let Err(e) = self
                .inner
                .call(Request::ReleaseSharedMemory { id: memory.id })
            {
                warn!("Failed to release shared memory {}: {e}", memory.id);
            }
        }

        lock(&self.inner.ids).memory.release(memory.id);
    }

    /// Open a session with the trusted application identified by `uuid`
    pub fn open_session(
        &self,
        uuid: &TaUuid,
        method: ConnectionMethod,
        data: u32,
        operation: Option<&Operation>,
    ) -> Result<Session, Error> {
        self.inner.ensure_active()?;

        let session_id = lock(&self.inner.ids)
            .sessions
            .allocate()
            .ok_or_else(|| Error::api(ReturnCode::OutOfMemory))?;

        debug!("Opening session {session_id} with {uuid} ({method} login)");

        let r = self.inner.execute(operation, |operation, sequence| {
            Request::OpenSession {
                session_id,
                uuid: *uuid,
                method,
                data,
                operation,
                sequence,
            }
        });

        match r {
            Ok(()) => (),
            Err(ExecuteError::Call(e)) => {
                debug!("Failed to open session with {uuid}: {e}");
                self.inner.release_session_id(session_id);
                return Err(e);
            }
            // The broker holds the session open, close it before reporting
            Err(ExecuteError::Update(e)) => {
                warn!("Opened session {session_id} returned bad outputs: {e}");
                if let Err(e) = self.inner.call(Request::CloseSession { session_id }) {
                    warn!("Failed to close session {session_id}: {e}");
                }
                self.inner.release_session_id(session_id);
                return Err(e);
            }
        }

        Ok(Session::new(self.inner.clone(), session_id, *uuid))
    }

    /// Request cancellation of a pending open or invocation using the
    /// provided operation. Returns immediately, cancellation is best-effort.
    pub fn request_cancellation(&self, operation: &Operation) {
        let sequence = operation.sequence();
        if !operation.is_started() || sequence == 0 {
            debug!("Cancellation for idle operation");
            return;
        }

        if self.inner.state() != ContextState::Active {
            return;
        }

        debug!("Requesting cancellation of operation {sequence}");

        if let Err(e) = bridge::notify(
            &self.inner.transport,
            Request::RequestCancellation { sequence },
        ) {
            warn!("Failed to request cancellation: {e}");
        }
    }
}
