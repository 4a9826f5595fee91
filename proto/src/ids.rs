// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Random identifier allocation over a bounded space
//!
//! Identifiers are probed at random (so they are not trivially guessable
//! across callers) up to a retry budget, after which the space is swept
//! from a random starting point. Allocation fails only once every
//! identifier in the space is live.

use std::collections::HashSet;

use rand::Rng;

/// Identifier allocator
#[derive(Clone, Debug)]
pub struct IdAllocator {
    space: u32,
    retries: usize,
    live: HashSet<u32>,
}

impl IdAllocator {
    /// Create a new allocator for identifiers in `0..space`,
    /// probing at most `retries` times before sweeping
    pub fn new(space: u32, retries: usize) -> Self {
        Self {
            space,
            retries,
            live: HashSet::new(),
        }
    }

    /// Allocate a fresh identifier, returning `None` when the space is exhausted
    pub fn allocate(&mut self) -> Option<u32> {
        if self.live.len() >= self.space as usize {
            return None;
        }

        let mut rng = rand::thread_rng();

        for _ in 0..self.retries {
            let id = rng.gen_range(0..self.space);
            if self.live.insert(id) {
                return Some(id);
            }
        }

        let start = rng.gen_range(0..self.space);
        for i in 0..self.space {
            let id = start.wrapping_add(i) % self.space;
            if self.live.insert(id) {
                return Some(id);
            }
        }

        None
    }

    /// Release an identifier for reuse
    pub fn release(&mut self, id: u32) -> bool {
        self.live.remove(&id)
    }

    /// Number of live identifiers
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Release every identifier
    pub fn clear(&mut self) {
        self.live.clear()
    }
}
