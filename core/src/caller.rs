// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Per-caller identifier tables

use std::collections::HashMap;

use log::warn;
use otee_proto::{CallerId, MemoryFlags, TaUuid, WireOperation};

use crate::Error;

/// Broker record of a registered shared memory block
#[derive(Clone, PartialEq, Debug)]
pub struct MemoryHandle {
    pub global_id: u32,
    pub flags: MemoryFlags,
    pub size: u32,
    /// Bytes written back by the engine in the most recent operation
    pub return_size: u32,
}

/// Broker record of an open session
#[derive(Clone, PartialEq, Debug)]
pub struct SessionHandle {
    pub global_id: u32,
    pub uuid: TaUuid,
}

/// Memory reference slot translations for a single call, as `(slot, local, global)`
pub type SlotMap = Vec<(usize, u32, u32)>;

/// Connected caller, owning the local to global id mappings for its
/// shared memory and sessions
#[derive(Debug)]
pub struct Caller {
    id: CallerId,
    memory: HashMap<u32, MemoryHandle>,
    sessions: HashMap<u32, SessionHandle>,
    finalized: bool,
}

impl Caller {
    pub fn new(id: CallerId) -> Self {
        Self {
            id,
            memory: HashMap::new(),
            sessions: HashMap::new(),
            finalized: false,
        }
    }

    /// Check whether the caller has been torn down
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn memory(&self, local_id: u32) -> Option<&MemoryHandle> {
        self.memory.get(&local_id)
    }

    pub fn add_memory(&mut self, local_id: u32, handle: MemoryHandle) -> Result<(), Error> {
        if self.memory.contains_key(&local_id) {
            return Err(Error::DuplicateId(local_id));
        }
        self.memory.insert(local_id, handle);
        Ok(())
    }

    pub fn remove_memory(&mut self, local_id: u32) -> Option<MemoryHandle> {
        self.memory.remove(&local_id)
    }

    pub fn session(&self, local_id: u32) -> Option<&SessionHandle> {
        self.sessions.get(&local_id)
    }

    pub fn has_session(&self, local_id: u32) -> bool {
        self.sessions.contains_key(&local_id)
    }

    pub fn add_session(&mut self, local_id: u32, handle: SessionHandle) -> Result<(), Error> {
        if self.sessions.contains_key(&local_id) {
            return Err(Error::DuplicateId(local_id));
        }
        self.sessions.insert(local_id, handle);
        Ok(())
    }

    pub fn remove_session(&mut self, local_id: u32) -> Option<SessionHandle> {
        self.sessions.remove(&local_id)
    }

    /// Mark the caller finalized, draining every remaining resource
    pub fn finalize(&mut self) -> (Vec<MemoryHandle>, Vec<SessionHandle>) {
        self.finalized = true;

        (
            self.memory.drain().map(|(_, m)| m).collect(),
            self.sessions.drain().map(|(_, s)| s).collect(),
        )
    }

    /// Rewrite memory references from local to global ids.
    ///
    /// References must resolve to blocks owned by this caller, match
    /// the registered size and be permitted by the registered flags.
    /// Returns the slot translations for use with [Caller::rewrite_inbound].
    pub fn rewrite_outbound(&self, op: &mut WireOperation) -> Result<SlotMap, Error> {
        let mut slots = SlotMap::new();

        for (i, parent) in op.parents_mut() {
            let local_id = parent.id;

            let handle = match self.memory.get(&local_id) {
                Some(h) => h,
                None => {
                    warn!("Caller {} referenced unknown shared memory {local_id}", self.id);
                    return Err(Error::UnknownMemory(local_id));
                }
            };

            if parent.size != handle.size || !handle.flags.contains(parent.flags()?) {
                warn!(
                    "Caller {} reference to shared memory {local_id} not permitted (slot {i})",
                    self.id
                );
                return Err(Error::NotPermitted(i));
            }

            parent.id = handle.global_id;
            slots.push((i, local_id, handle.global_id));
        }

        Ok(slots)
    }

    /// Rewrite memory references returned by the engine from global to
    /// local ids using the slot translations recorded for this call,
    /// updating the recorded return sizes of blocks still registered.
    pub fn rewrite_inbound(&mut self, op: &mut WireOperation, slots: &SlotMap) -> Result<(), Error> {
        for (i, parent) in op.parents_mut() {
            let (_, local_id, _) = slots
                .iter()
                .find(|(s, _, g)| *s == i && *g == parent.id)
                .ok_or(Error::UnknownMemory(parent.id))?;

            parent.id = *local_id;

            if let Some(h) = self.memory.get_mut(local_id) {
                h.return_size = parent.return_size;
            }
        }

        Ok(())
    }
}
