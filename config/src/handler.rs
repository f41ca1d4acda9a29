//! Handler definitions: the closed set of per-field extractors a contract
//! configuration can declare. New kinds are compile-time additions.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, fmt, str::FromStr};

use ethers_core::types::U256;

/// One extractable field's recipe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandlerDefinition {
    #[serde(rename = "storage", rename_all = "camelCase")]
    Storage {
        slot: SlotDefinition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_type: Option<ReturnType>,
    },
    #[serde(rename = "call", rename_all = "camelCase")]
    Call {
        method: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_type: Option<ReturnType>,
    },
    /// Iterates a `function (uint256) returns (...)` getter from
    /// `start_index` until the call reverts or `length` entries were read.
    #[serde(rename = "array", rename_all = "camelCase")]
    Array {
        method: String,
        #[serde(default)]
        start_index: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<u64>,
    },
    #[serde(rename = "accessControl", rename_all = "camelCase")]
    AccessControl {
        /// Maps `bytes32` role hashes to readable labels.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        role_names: BTreeMap<String, String>,
        /// Projects the members of a single role instead of the full map.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pick_role_members: Option<String>,
    },
    /// Replays `SetValidKeyset`/`InvalidateKeyset` logs into the set of
    /// currently valid data-availability keysets.
    #[serde(rename = "arbitrumDAC")]
    ArbitrumDac {},
    #[serde(rename = "stateFromEvent", rename_all = "camelCase")]
    StateFromEvent {
        /// Human-readable event signature, e.g. `OwnerChanged(address newOwner)`.
        event: String,
        return_params: Vec<String>,
        #[serde(default)]
        only_latest: bool,
    },
    #[serde(rename = "eventCount", rename_all = "camelCase")]
    EventCount { event: String },
    #[serde(rename = "hardcoded")]
    Hardcoded { value: serde_json::Value },
    #[serde(rename = "constructorArgs", rename_all = "camelCase")]
    ConstructorArgs {
        #[serde(default)]
        name_args: bool,
    },
}

/// A raw slot, or a path `[base, k1, .., kn]` into (nested) mappings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotDefinition {
    Single(SlotKey),
    Path(Vec<SlotKey>),
}

impl SlotDefinition {
    /// The base slot followed by the mapping keys, outermost first.
    pub fn parts(&self) -> Vec<U256> {
        match self {
            Self::Single(key) => vec![key.0],
            Self::Path(keys) => keys.iter().map(|key| key.0).collect(),
        }
    }
}

/// A slot or mapping key: a JSON number, a decimal string, or 0x-hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotKey(pub U256);

impl From<u64> for SlotKey {
    fn from(n: u64) -> Self {
        Self(n.into())
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 <= U256::from(u64::MAX) {
            serializer.serialize_u64(self.0.as_u64())
        } else {
            serializer.serialize_str(&format!("{:#x}", self.0))
        }
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SlotKeyVisitor;

        impl de::Visitor<'_> for SlotKeyVisitor {
            type Value = SlotKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a slot number, decimal string, or 0x-hex string")
            }

            fn visit_u64<E: de::Error>(self, n: u64) -> Result<SlotKey, E> {
                Ok(SlotKey(n.into()))
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<SlotKey, E> {
                let parsed = if let Some(hex) = s.strip_prefix("0x") {
                    U256::from_str_radix(hex, 16).ok()
                } else {
                    U256::from_dec_str(s).ok()
                };
                parsed.map(SlotKey).ok_or_else(|| E::custom(format!("invalid slot key: {s}")))
            }
        }

        deserializer.deserialize_any(SlotKeyVisitor)
    }
}

/// How a raw 32-byte read or call output is shaped into a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnType {
    Address,
    Bool,
    Bytes,
    String,
    Uint(usize),
    Array(Box<ReturnType>),
}

impl FromStr for ReturnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "address" => Ok(Self::Address),
            "bool" => Ok(Self::Bool),
            "bytes" | "bytes32" => Ok(Self::Bytes),
            "string" => Ok(Self::String),
            "number" | "uint" => Ok(Self::Uint(256)),
            _ => {
                if let Some(bits) = s.strip_prefix("uint") {
                    let bits: usize =
                        bits.parse().map_err(|_| format!("invalid return type: {s}"))?;
                    if bits == 0 || bits > 256 || bits % 8 != 0 {
                        return Err(format!("invalid uint width: {s}"))
                    }
                    Ok(Self::Uint(bits))
                } else if let Some(inner) =
                    s.strip_prefix("array<").and_then(|s| s.strip_suffix('>'))
                {
                    Ok(Self::Array(Box::new(inner.parse()?)))
                } else {
                    Err(format!("invalid return type: {s}"))
                }
            }
        }
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => f.write_str("address"),
            Self::Bool => f.write_str("bool"),
            Self::Bytes => f.write_str("bytes"),
            Self::String => f.write_str("string"),
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Array(inner) => write!(f, "array<{inner}>"),
        }
    }
}

impl Serialize for ReturnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ReturnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn storage_handler_roundtrips() {
        let handler: HandlerDefinition = serde_json::from_value(json!({
            "type": "storage",
            "slot": 5,
            "returnType": "address",
        }))
        .unwrap();
        assert_eq!(
            handler,
            HandlerDefinition::Storage {
                slot: SlotDefinition::Single(5u64.into()),
                offset: None,
                return_type: Some(ReturnType::Address),
            }
        );
        assert_eq!(
            serde_json::to_value(&handler).unwrap(),
            json!({"type": "storage", "slot": 5, "returnType": "address"})
        );
    }

    #[test]
    fn slot_paths_accept_mixed_keys() {
        let slot: SlotDefinition =
            serde_json::from_value(json!([2, "0xdead", "10"])).unwrap();
        assert_eq!(
            slot.parts(),
            vec![U256::from(2), U256::from(0xdeadu64), U256::from(10)]
        );
    }

    #[test]
    fn handler_kind_tags_are_stable() {
        let dac: HandlerDefinition = serde_json::from_value(json!({"type": "arbitrumDAC"})).unwrap();
        assert_eq!(dac, HandlerDefinition::ArbitrumDac {});

        let count: HandlerDefinition =
            serde_json::from_value(json!({"type": "eventCount", "event": "Ping()"})).unwrap();
        assert_eq!(count, HandlerDefinition::EventCount { event: "Ping()".to_string() });
    }

    #[test]
    fn return_types_parse() {
        assert_eq!("uint8".parse::<ReturnType>().unwrap(), ReturnType::Uint(8));
        assert_eq!(
            "array<address>".parse::<ReturnType>().unwrap(),
            ReturnType::Array(Box::new(ReturnType::Address))
        );
        assert!("uint7".parse::<ReturnType>().is_err());
        assert!("elephant".parse::<ReturnType>().is_err());
    }

    #[test]
    fn unknown_handler_kinds_are_rejected_at_parse_time() {
        let err = serde_json::from_value::<HandlerDefinition>(json!({"type": "plugin"}));
        assert!(err.is_err());
    }
}
