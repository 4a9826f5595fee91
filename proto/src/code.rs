// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Return codes and origins

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Result codes returned by the broker and engine
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    FromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[serde(into = "u32", from = "u32")]
#[repr(u32)]
pub enum ReturnCode {
    Success = 0x0000_0000,
    /// Generic failure, also used for codes not known to this library
    #[num_enum(default)]
    Generic = 0xFFFF_0000,
    AccessDenied = 0xFFFF_0001,
    /// Operation was cancelled at the callers request
    Cancel = 0xFFFF_0002,
    AccessConflict = 0xFFFF_0003,
    ExcessData = 0xFFFF_0004,
    BadFormat = 0xFFFF_0005,
    BadParameters = 0xFFFF_0006,
    BadState = 0xFFFF_0007,
    ItemNotFound = 0xFFFF_0008,
    NotImplemented = 0xFFFF_0009,
    NotSupported = 0xFFFF_000A,
    NoData = 0xFFFF_000B,
    OutOfMemory = 0xFFFF_000C,
    Busy = 0xFFFF_000D,
    Communication = 0xFFFF_000E,
    Security = 0xFFFF_000F,
    ShortBuffer = 0xFFFF_0010,
    ExternalCancel = 0xFFFF_0011,
    Overflow = 0xFFFF_300F,
    TargetDead = 0xFFFF_3024,
    StorageNoSpace = 0xFFFF_3041,
}

impl ReturnCode {
    /// Check whether a code indicates success
    pub fn is_success(&self) -> bool {
        *self == ReturnCode::Success
    }
}

/// Layer producing a [ReturnCode]
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum ReturnOrigin {
    /// Client API (local validation)
    Api = 0x01,
    /// Transport / communication stack (including the broker)
    Comms = 0x02,
    /// Common engine code
    Tee = 0x03,
    /// Trusted application
    TrustedApp = 0x04,
}
