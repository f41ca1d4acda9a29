//! Post-transforms for handler values.
//!
//! A field's `edit` attribute is a small s-expression encoded as JSON, e.g.
//! `["get", "pendingOwner"]` or `["map", ["get", 0]]`. Expressions are pure:
//! they see the handler's raw value and nothing else, and an evaluation
//! error is recorded per field like any other handler failure.

use scout_common::ContractValue;
use serde_json::Value;

/// Applies `expr` to `value`.
pub fn apply(expr: &Value, value: ContractValue) -> Result<ContractValue, String> {
    let Value::Array(parts) = expr else {
        return Err("edit expression must be an array".to_string())
    };
    let Some(Value::String(op)) = parts.first() else {
        return Err("edit expression must start with an operator".to_string())
    };

    match (op.as_str(), &parts[1..]) {
        ("get", [key]) => get(key, value),
        ("map", [inner]) => match value {
            ContractValue::Array(values) => Ok(ContractValue::Array(
                values.into_iter().map(|v| apply(inner, v)).collect::<Result<_, _>>()?,
            )),
            _ => Err("map expects an array value".to_string()),
        },
        ("first", []) => match value {
            ContractValue::Array(values) => {
                values.into_iter().next().ok_or_else(|| "first of an empty array".to_string())
            }
            _ => Err("first expects an array value".to_string()),
        },
        ("last", []) => match value {
            ContractValue::Array(values) => {
                values.into_iter().last().ok_or_else(|| "last of an empty array".to_string())
            }
            _ => Err("last expects an array value".to_string()),
        },
        ("count", []) => match value {
            ContractValue::Array(values) => Ok(ContractValue::Number(values.len().into())),
            _ => Err("count expects an array value".to_string()),
        },
        ("lowercase", []) => match value {
            ContractValue::String(s) => Ok(ContractValue::String(s.to_lowercase())),
            _ => Err("lowercase expects a string value".to_string()),
        },
        (op, _) => Err(format!("unknown edit operator `{op}`")),
    }
}

fn get(key: &Value, value: ContractValue) -> Result<ContractValue, String> {
    match (key, value) {
        (Value::String(key), ContractValue::Object(mut entries)) => {
            entries.remove(key).ok_or_else(|| format!("no entry `{key}`"))
        }
        (Value::Number(index), ContractValue::Array(values)) => {
            let index =
                index.as_u64().ok_or_else(|| format!("invalid index {index}"))? as usize;
            let len = values.len();
            values
                .into_iter()
                .nth(index)
                .ok_or_else(|| format!("index {index} out of bounds for length {len}"))
        }
        (key, _) => Err(format!("cannot get `{key}` from this value")),
    }
}
