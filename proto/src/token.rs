// Copyright (c) 2022-2023 The MobileCoin Foundation

use serde::{Deserialize, Serialize};

use crate::CallerId;

/// Correlation token identifying a pending operation for cancellation.
///
/// Tokens are scoped by caller so that one caller may never cancel
/// another callers operations, sequence numbers are allocated by the
/// client per-context.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct CorrelationToken {
    /// Caller owning the operation
    pub caller: CallerId,
    /// Per-caller operation sequence number
    pub sequence: u64,
}

impl CorrelationToken {
    pub fn new(caller: CallerId, sequence: u64) -> Self {
        Self { caller, sequence }
    }
}

impl core::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.caller, self.sequence)
    }
}
