// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Shared memory blocks
//!
//! Storage for a block is owned by the client as a [SharedBuffer], the
//! broker only tracks block metadata. Buffers may be shared between
//! blocks (registering one buffer twice yields two blocks over the same
//! storage) but are never resized.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex, MutexGuard,
};

use otee_proto::{MemoryFlags, WireMemory};

/// Client-owned storage backing one or more [SharedMemory] blocks
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Create a buffer with the provided contents
    pub fn new(data: Vec<u8>) -> Self {
        Self(Arc::new(Mutex::new(data)))
    }

    /// Create a zero-filled buffer of the provided length
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the buffer contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Read the buffer contents
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.lock())
    }

    /// Write to the buffer (in place, the length is fixed)
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.lock())
    }

    /// Check whether two handles share storage
    pub fn shares_storage(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl From<Vec<u8>> for SharedBuffer {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<&[u8]> for SharedBuffer {
    fn from(v: &[u8]) -> Self {
        Self::new(v.to_vec())
    }
}

/// Shared memory block registered with a [Context][crate::Context]
#[derive(Debug)]
pub struct SharedMemory {
    pub(crate) id: u32,
    flags: MemoryFlags,
    size: usize,
    buffer: SharedBuffer,
    return_size: AtomicU32,
    pub(crate) released: AtomicBool,
}

impl SharedMemory {
    pub(crate) fn new(id: u32, flags: MemoryFlags, buffer: SharedBuffer) -> Self {
        Self {
            id,
            flags,
            size: buffer.len(),
            buffer,
            return_size: AtomicU32::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// Local block identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn flags(&self) -> MemoryFlags {
        self.flags
    }

    /// Block size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes written by the last operation referencing this block as output
    pub fn return_size(&self) -> usize {
        self.return_size.load(Ordering::Acquire) as usize
    }

    /// Backing storage
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn set_return_size(&self, n: usize) {
        self.return_size.store(n as u32, Ordering::Release);
    }

    /// Build the wire message for this block with current buffer contents
    pub(crate) fn to_wire(&self) -> WireMemory {
        WireMemory::new(self.id, self.flags, self.buffer.to_vec())
    }
}
