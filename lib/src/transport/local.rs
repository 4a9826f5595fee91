// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::debug;

use otee_core::{Connector, Guard};
use otee_proto::{CallerId, Request};

use super::{Completion, Transport};
use crate::Error;

/// In-process transport, dispatching directly into a shared [Guard]
pub struct LocalTransport<C: Connector> {
    guard: Arc<Guard<C>>,
    caller_id: CallerId,
    closed: AtomicBool,
}

impl<C: Connector> LocalTransport<C> {
    /// Attach a new caller to the provided [Guard]
    pub fn new(guard: Arc<Guard<C>>) -> Self {
        let caller_id = guard.attach();
        debug!("Attached local caller {caller_id}");

        Self {
            guard,
            caller_id,
            closed: AtomicBool::new(false),
        }
    }

    /// Caller id assigned by the [Guard]
    pub fn caller_id(&self) -> CallerId {
        self.caller_id
    }
}

impl<C: Connector> Transport for LocalTransport<C> {
    fn submit(&self, request: Request, completion: Completion) {
        if self.closed.load(Ordering::Acquire) {
            return completion(Err(Error::Transport("transport closed".to_string())));
        }

        completion(Ok(self.guard.dispatch(self.caller_id, request)))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.guard.disconnect(self.caller_id);
        }
    }
}

/// Dropping a transport disconnects the caller
impl<C: Connector> Drop for LocalTransport<C> {
    fn drop(&mut self) {
        self.close();
    }
}
