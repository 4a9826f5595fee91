// Copyright (c) 2022-2023 The MobileCoin Foundation

use core::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Trusted application UUID (128-bit)
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct TaUuid(pub [u8; 16]);

impl TaUuid {
    pub const fn new(b: [u8; 16]) -> Self {
        Self(b)
    }
}

impl From<[u8; 16]> for TaUuid {
    fn from(b: [u8; 16]) -> Self {
        Self(b)
    }
}

/// Display in canonical `8-4-4-4-12` form
impl Display for TaUuid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..])
        )
    }
}

/// Parse from canonical or unhyphenated hex form
impl FromStr for TaUuid {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.replace('-', "");

        let mut b = [0u8; 16];
        hex::decode_to_slice(&s, &mut b)
            .map_err(|e| ProtoError::BadFormat(format!("invalid uuid '{s}': {e}")))?;

        Ok(Self(b))
    }
}
