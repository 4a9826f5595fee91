// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Operation and shared memory wire messages
//!
//! An [WireOperation] carries up to [MAX_PARAMS] ordered parameter slots,
//! each of which is empty, a value pair or a reference into a shared
//! memory block ([WireMemory]). Memory references carry their parent block
//! so that output data can be copied back to the caller on completion.
//!
//! Messages are encoded as CBOR, decoding failures are reported as
//! [ProtoError::BadFormat].

use serde::{Deserialize, Serialize};

use crate::{Direction, MemoryFlags, ProtoError, MAX_PARAMS, MAX_SHARED_MEMORY_SIZE};

/// Shared memory block message
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct WireMemory {
    /// Block identifier (local or global depending on which side of the broker)
    pub id: u32,
    /// Raw [MemoryFlags]
    pub flags: u32,
    /// Declared block size in bytes
    pub size: u32,
    /// Bytes actually written back by the engine
    pub return_size: u32,
    /// Block contents
    pub buffer: Vec<u8>,
}

impl WireMemory {
    /// Create a new shared memory message for the provided buffer
    pub fn new(id: u32, flags: MemoryFlags, buffer: Vec<u8>) -> Self {
        Self {
            id,
            flags: flags.bits(),
            size: buffer.len() as u32,
            return_size: 0,
            buffer,
        }
    }

    /// Fetch parsed memory flags
    pub fn flags(&self) -> Result<MemoryFlags, ProtoError> {
        MemoryFlags::from_raw(self.flags)
    }

    /// Check declared sizes and flags are consistent
    pub fn validate(&self) -> Result<(), ProtoError> {
        self.flags()?;

        if self.buffer.len() > MAX_SHARED_MEMORY_SIZE {
            return Err(ProtoError::Oversized(self.buffer.len()));
        }

        if self.size as usize != self.buffer.len() {
            return Err(ProtoError::BadFormat(format!(
                "declared size {} does not match buffer length {}",
                self.size,
                self.buffer.len()
            )));
        }

        if self.return_size > self.size {
            return Err(ProtoError::BadFormat(format!(
                "return size {} exceeds block size {}",
                self.return_size, self.size
            )));
        }

        Ok(())
    }

    /// Encode shared memory message
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        self.validate()?;
        Ok(serde_cbor::to_vec(self)?)
    }

    /// Decode shared memory message
    pub fn decode(buff: &[u8]) -> Result<Self, ProtoError> {
        let m: Self = serde_cbor::from_slice(buff)?;
        m.validate()?;
        Ok(m)
    }
}

/// Operation parameter slot
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireParam {
    /// Unused slot
    Empty,

    /// Value pair
    Value { a: i32, b: i32, direction: Direction },

    /// Reference into a shared memory block
    MemRef {
        parent: WireMemory,
        offset: u32,
        direction: Direction,
    },
}

impl Default for WireParam {
    fn default() -> Self {
        WireParam::Empty
    }
}

/// Operation message
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct WireOperation {
    /// Operation started flag
    pub started: bool,
    /// Parameter slots, in order
    pub params: Vec<WireParam>,
}

impl WireOperation {
    /// Create a new operation message from a set of parameters
    pub fn new(params: Vec<WireParam>) -> Self {
        Self {
            started: false,
            params,
        }
    }

    /// Encode an operation, rejecting operations with more than [MAX_PARAMS] slots
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        if self.params.len() > MAX_PARAMS {
            return Err(ProtoError::TooManyParams(self.params.len()));
        }

        Ok(serde_cbor::to_vec(self)?)
    }

    /// Decode an operation
    pub fn decode(buff: &[u8]) -> Result<Self, ProtoError> {
        let op: Self = serde_cbor::from_slice(buff)?;

        if op.params.len() > MAX_PARAMS {
            return Err(ProtoError::BadFormat(format!(
                "operation carries {} parameters",
                op.params.len()
            )));
        }

        Ok(op)
    }

    /// Check memory references are in bounds and permitted by their parent block flags
    pub fn check_references(&self) -> Result<(), ProtoError> {
        for (i, p) in self.params.iter().enumerate() {
            if let WireParam::MemRef {
                parent,
                offset,
                direction,
            } = p
            {
                parent.validate()?;

                if *offset > parent.size || !direction.permitted_by(parent.flags()?) {
                    return Err(ProtoError::InvalidReference(i));
                }
            }
        }

        Ok(())
    }

    /// Iterate over memory reference parents with their slot index
    pub fn parents(&self) -> impl Iterator<Item = (usize, &WireMemory)> {
        self.params.iter().enumerate().filter_map(|(i, p)| match p {
            WireParam::MemRef { parent, .. } => Some((i, parent)),
            _ => None,
        })
    }

    /// Iterate mutably over memory reference parents with their slot index
    pub fn parents_mut(&mut self) -> impl Iterator<Item = (usize, &mut WireMemory)> {
        self.params
            .iter_mut()
            .enumerate()
            .filter_map(|(i, p)| match p {
                WireParam::MemRef { parent, .. } => Some((i, parent)),
                _ => None,
            })
    }
}
