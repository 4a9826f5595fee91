// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, warn};

use otee_proto::{Request, ReturnCode, TaUuid};

use crate::{
    context::{ContextInner, ContextState},
    Error, Operation,
};

/// Session with a trusted application, opened via
/// [Context::open_session][crate::Context::open_session]
pub struct Session {
    inner: Arc<ContextInner>,
    id: u32,
    uuid: TaUuid,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(inner: Arc<ContextInner>, id: u32, uuid: TaUuid) -> Self {
        Self {
            inner,
            id,
            uuid,
            closed: AtomicBool::new(false),
        }
    }

    /// Local session identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Trusted application UUID
    pub fn uuid(&self) -> &TaUuid {
        &self.uuid
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Invoke a command, with an optional [Operation] carrying parameters
    pub fn invoke_command(
        &self,
        command_id: u32,
        operation: Option<&Operation>,
    ) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::api(ReturnCode::BadState));
        }
        self.inner.ensure_active()?;

        debug!("Invoking command {command_id:#x} on session {}", self.id);

        self.inner
            .execute(operation, |operation, sequence| Request::InvokeCommand {
                session_id: self.id,
                command_id,
                operation,
                sequence,
            })
            .map_err(Error::from)
    }

    /// Close the session. Repeated calls have no effect.
    pub fn close_session(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.inner.state() == ContextState::Active {
            if let Err(e) = self.inner.call(Request::CloseSession {
                session_id: self.id,
            }) {
                warn!("Failed to close session {}: {e}", self.id);
            }
        }

        self.inner.release_session_id(self.id);

        debug!("Closed session {}", self.id);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("closed", &self.is_closed())
            .finish()
    }
}
