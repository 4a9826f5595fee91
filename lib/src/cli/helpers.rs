// Copyright (c) 2022-2023 The MobileCoin Foundation

use strum::IntoEnumIterator;

use otee::ConnectionMethod;

/// Hex encoded data of arbitrary length
#[derive(Clone, PartialEq, Debug)]
pub struct HexData(pub Vec<u8>);

impl std::str::FromStr for HexData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(HexData)
    }
}

impl AsRef<[u8]> for HexData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Value parameter pair in `a:b` form
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ValuePair(pub i32, pub i32);

impl std::str::FromStr for ValuePair {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("expected a:b"))?;

        Ok(ValuePair(a.parse()?, b.parse()?))
    }
}

/// Parse a [ConnectionMethod] by (case insensitive) name
pub fn parse_method(s: &str) -> Result<ConnectionMethod, String> {
    ConnectionMethod::iter()
        .find(|m| m.to_string().eq_ignore_ascii_case(s))
        .ok_or_else(|| {
            let names: Vec<_> = ConnectionMethod::iter().map(|m| m.to_string()).collect();
            format!("unknown method '{s}' (expected one of: {})", names.join(", "))
        })
}
