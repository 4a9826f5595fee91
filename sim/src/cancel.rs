// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::sync::{Arc, Condvar, Mutex};

/// Cancellation flag shared between the engine and a pending operation
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<(Mutex<bool>, Condvar)>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation, waking any waiters
    pub fn cancel(&self) {
        let (m, c) = &*self.0;
        *m.lock().unwrap_or_else(|e| e.into_inner()) = true;
        c.notify_all();
    }

    /// Block until cancelled
    pub fn wait(&self) {
        let (m, c) = &*self.0;

        let mut cancelled = m.lock().unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            cancelled = c.wait(cancelled).unwrap_or_else(|e| e.into_inner());
        }
    }
}
