use ethers_core::types::{Address, Bytes, U256};
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serialize, Serializer,
};
use std::collections::BTreeMap;

/// Largest integer losslessly representable as a JSON number (`2^53 - 1`).
///
/// Anything above this is emitted as a decimal string so that artifacts stay
/// exact across JSON tooling.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// A value extracted from a contract.
///
/// Handlers produce these, the output artifact serializes them. Numbers keep
/// full 256-bit precision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractValue {
    Address(Address),
    Number(U256),
    Bool(bool),
    Bytes(Bytes),
    String(String),
    Array(Vec<ContractValue>),
    Object(BTreeMap<String, ContractValue>),
}

impl ContractValue {
    /// Converts a raw JSON value, e.g. the body of a `hardcoded` handler.
    ///
    /// Strings that look like addresses become [`ContractValue::Address`] so
    /// that hardcoded references still participate in discovery. JSON `null`
    /// has no counterpart and is rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Null => Err("null is not a contract value".to_string()),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(n) = n.as_u64() {
                    Ok(Self::Number(n.into()))
                } else {
                    Err(format!("unsupported number literal: {n}"))
                }
            }
            serde_json::Value::String(s) => {
                if let Some(address) = parse_address(s) {
                    Ok(Self::Address(address))
                } else if let Some(stripped) = s.strip_prefix("0x") {
                    match hex::decode(stripped) {
                        Ok(bytes) => Ok(Self::Bytes(bytes.into())),
                        Err(_) => Ok(Self::String(s.clone())),
                    }
                } else {
                    Ok(Self::String(s.clone()))
                }
            }
            serde_json::Value::Array(values) => Ok(Self::Array(
                values.iter().map(Self::from_json).collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Object(entries) => Ok(Self::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_json(v)?)))
                    .collect::<Result<_, String>>()?,
            )),
        }
    }

    /// Every address mentioned anywhere in this value, in value order.
    pub fn addresses(&self) -> Vec<Address> {
        let mut out = Vec::new();
        self.collect_addresses(&mut out);
        out
    }

    fn collect_addresses(&self, out: &mut Vec<Address>) {
        match self {
            Self::Address(address) => out.push(*address),
            Self::Array(values) => {
                for value in values {
                    value.collect_addresses(out);
                }
            }
            Self::Object(entries) => {
                for value in entries.values() {
                    value.collect_addresses(out);
                }
            }
            _ => {}
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(address) => Some(*address),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<U256> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<Address> for ContractValue {
    fn from(address: Address) -> Self {
        Self::Address(address)
    }
}

impl From<U256> for ContractValue {
    fn from(n: U256) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for ContractValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for ContractValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl Serialize for ContractValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Address(address) => serializer.serialize_str(&format!("{address:#x}")),
            Self::Number(n) => {
                if *n <= U256::from(MAX_SAFE_INTEGER) {
                    serializer.serialize_u64(n.as_u64())
                } else {
                    serializer.serialize_str(&n.to_string())
                }
            }
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Bytes(bytes) => serializer.serialize_str(&format!("{bytes}")),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Self::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

fn parse_address(s: &str) -> Option<Address> {
    let stripped = s.strip_prefix("0x")?;
    if stripped.len() != 40 {
        return None;
    }
    s.parse().ok()
}
