// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Shared memory and parameter direction flags

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::ProtoError;

bitflags::bitflags! {
    /// Shared memory flags, describing the direction(s) in which
    /// a block may be used
    pub struct MemoryFlags: u32 {
        /// Block may be read by the trusted application
        const INPUT = 1 << 0;

        /// Block may be written by the trusted application
        const OUTPUT = 1 << 1;
    }
}

impl MemoryFlags {
    /// Parse flags from their wire encoding, rejecting empty or unknown bits
    pub fn from_raw(v: u32) -> Result<Self, ProtoError> {
        match Self::from_bits(v) {
            Some(f) if !f.is_empty() => Ok(f),
            _ => Err(ProtoError::InvalidFlags(v)),
        }
    }
}

/// Direction of a value or memory reference parameter
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Direction {
    Input = 0x01,
    Output = 0x02,
    InOut = 0x03,
}

impl Direction {
    /// Memory flags required of a block referenced in this direction
    pub fn flags(&self) -> MemoryFlags {
        match self {
            Direction::Input => MemoryFlags::INPUT,
            Direction::Output => MemoryFlags::OUTPUT,
            Direction::InOut => MemoryFlags::INPUT | MemoryFlags::OUTPUT,
        }
    }

    /// Check whether data flows to the trusted application
    pub fn is_input(&self) -> bool {
        self.flags().contains(MemoryFlags::INPUT)
    }

    /// Check whether data flows back from the trusted application
    pub fn is_output(&self) -> bool {
        self.flags().contains(MemoryFlags::OUTPUT)
    }

    /// Check whether a block with the provided flags may be referenced in this direction
    pub fn permitted_by(&self, flags: MemoryFlags) -> bool {
        flags.contains(self.flags())
    }
}
