//! Shaping raw chain data into [`ContractValue`]s.

use crate::errors::ErrorKind;
use ethers_core::{
    abi::{ParamType, Token},
    types::{Address, H256, U256},
};
use scout_common::ContractValue;
use scout_config::ReturnType;

/// Decodes a single 32-byte storage word per the declared return type.
/// Without one the raw word is kept as bytes.
pub fn decode_word(word: H256, ty: Option<&ReturnType>) -> Result<ContractValue, ErrorKind> {
    let Some(ty) = ty else { return Ok(ContractValue::Bytes(word.as_bytes().to_vec().into())) };
    match ty {
        ReturnType::Address => {
            Ok(ContractValue::Address(Address::from_slice(&word.as_bytes()[12..])))
        }
        ReturnType::Bool => Ok(ContractValue::Bool(!U256::from(word.as_bytes()).is_zero())),
        ReturnType::Bytes => Ok(ContractValue::Bytes(word.as_bytes().to_vec().into())),
        ReturnType::Uint(bits) => {
            let value = U256::from(word.as_bytes());
            let masked = if *bits == 256 {
                value
            } else {
                value & ((U256::one() << *bits) - U256::one())
            };
            Ok(ContractValue::Number(masked))
        }
        ReturnType::String => {
            // Solidity packs short strings into one word with the length in
            // the low byte; longer data cannot live in a single slot.
            let bytes = word.as_bytes();
            let trimmed: &[u8] = match bytes.last() {
                Some(&last) if last % 2 == 0 && (last as usize / 2) < 32 => {
                    &bytes[..last as usize / 2]
                }
                _ => return Err(ErrorKind::Handler("storage string longer than one slot".to_string())),
            };
            String::from_utf8(trimmed.to_vec())
                .map(ContractValue::String)
                .map_err(|err| ErrorKind::Handler(format!("invalid utf-8 in storage string: {err}")))
        }
        ReturnType::Array(_) => {
            Err(ErrorKind::Handler("a single storage word is not an array".to_string()))
        }
    }
}

/// Converts a decoded ABI token into a value.
pub fn token_to_value(token: Token) -> ContractValue {
    match token {
        Token::Address(address) => ContractValue::Address(address),
        Token::Uint(n) => ContractValue::Number(n),
        Token::Int(n) => ContractValue::Number(n),
        Token::Bool(b) => ContractValue::Bool(b),
        Token::FixedBytes(bytes) | Token::Bytes(bytes) => ContractValue::Bytes(bytes.into()),
        Token::String(s) => ContractValue::String(s),
        Token::Array(tokens) | Token::FixedArray(tokens) | Token::Tuple(tokens) => {
            ContractValue::Array(tokens.into_iter().map(token_to_value).collect())
        }
    }
}

/// Converts the decoded outputs of a call into a single value: one output
/// stands alone, multiple become an array.
pub fn tokens_to_value(mut tokens: Vec<Token>) -> ContractValue {
    if tokens.len() == 1 {
        token_to_value(tokens.remove(0))
    } else {
        ContractValue::Array(tokens.into_iter().map(token_to_value).collect())
    }
}

/// Parses a JSON argument from a handler definition into the ABI token the
/// method expects.
pub fn json_to_token(value: &serde_json::Value, kind: &ParamType) -> Result<Token, ErrorKind> {
    let invalid = || ErrorKind::Handler(format!("argument {value} does not fit {kind}"));
    match kind {
        ParamType::Address => {
            let s = value.as_str().ok_or_else(invalid)?;
            Ok(Token::Address(s.parse().map_err(|_| invalid())?))
        }
        ParamType::Uint(_) => match value {
            serde_json::Value::Number(n) => {
                Ok(Token::Uint(n.as_u64().ok_or_else(invalid)?.into()))
            }
            serde_json::Value::String(s) => {
                let parsed = if let Some(hex) = s.strip_prefix("0x") {
                    U256::from_str_radix(hex, 16).ok()
                } else {
                    U256::from_dec_str(s).ok()
                };
                Ok(Token::Uint(parsed.ok_or_else(invalid)?))
            }
            _ => Err(invalid()),
        },
        ParamType::Int(_) => {
            let n = value.as_u64().ok_or_else(invalid)?;
            Ok(Token::Int(n.into()))
        }
        ParamType::Bool => Ok(Token::Bool(value.as_bool().ok_or_else(invalid)?)),
        ParamType::String => Ok(Token::String(value.as_str().ok_or_else(invalid)?.to_string())),
        ParamType::Bytes => {
            let s = value.as_str().and_then(|s| s.strip_prefix("0x")).ok_or_else(invalid)?;
            Ok(Token::Bytes(hex::decode(s).map_err(|_| invalid())?))
        }
        ParamType::FixedBytes(len) => {
            let s = value.as_str().and_then(|s| s.strip_prefix("0x")).ok_or_else(invalid)?;
            let bytes = hex::decode(s).map_err(|_| invalid())?;
            if bytes.len() != *len {
                return Err(invalid())
            }
            Ok(Token::FixedBytes(bytes))
        }
        ParamType::Array(inner) => {
            let values = value.as_array().ok_or_else(invalid)?;
            Ok(Token::Array(
                values.iter().map(|v| json_to_token(v, inner)).collect::<Result<_, _>>()?,
            ))
        }
        ParamType::FixedArray(inner, len) => {
            let values = value.as_array().ok_or_else(invalid)?;
            if values.len() != *len {
                return Err(invalid())
            }
            Ok(Token::FixedArray(
                values.iter().map(|v| json_to_token(v, inner)).collect::<Result<_, _>>()?,
            ))
        }
        ParamType::Tuple(kinds) => {
            let values = value.as_array().ok_or_else(invalid)?;
            if values.len() != kinds.len() {
                return Err(invalid())
            }
            Ok(Token::Tuple(
                values
                    .iter()
                    .zip(kinds)
                    .map(|(v, k)| json_to_token(v, k))
                    .collect::<Result<_, _>>()?,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn word_with_address(byte: u8) -> H256 {
        H256::from(Address::from([byte; 20]))
    }

    #[test]
    fn words_decode_per_return_type() {
        let word = word_with_address(0xbb);
        assert_eq!(
            decode_word(word, Some(&ReturnType::Address)).unwrap(),
            ContractValue::Address(Address::from([0xbb; 20]))
        );

        let mut one = [0u8; 32];
        one[31] = 1;
        assert_eq!(
            decode_word(H256::from(one), Some(&ReturnType::Bool)).unwrap(),
            ContractValue::Bool(true)
        );
        assert_eq!(
            decode_word(H256::from(one), Some(&ReturnType::Uint(256))).unwrap(),
            ContractValue::Number(U256::one())
        );
        assert_eq!(
            decode_word(H256::from(one), None).unwrap(),
            ContractValue::Bytes(one.to_vec().into())
        );
    }

    #[test]
    fn uint_widths_mask_high_bits() {
        let mut word = [0xff_u8; 32];
        word[31] = 0x2a;
        assert_eq!(
            decode_word(H256::from(word), Some(&ReturnType::Uint(8))).unwrap(),
            ContractValue::Number(0x2au64.into())
        );
    }

    #[test]
    fn short_storage_strings_decode() {
        // "abc" stored in-place: data left-aligned, 2*len in the low byte
        let mut word = [0u8; 32];
        word[..3].copy_from_slice(b"abc");
        word[31] = 6;
        assert_eq!(
            decode_word(H256::from(word), Some(&ReturnType::String)).unwrap(),
            ContractValue::String("abc".to_string())
        );
    }

    #[test]
    fn long_storage_strings_are_an_error() {
        let word = [0xff_u8; 32];
        assert!(decode_word(H256::from(word), Some(&ReturnType::String)).is_err());
    }

    #[test]
    fn json_args_become_tokens() {
        assert_eq!(
            json_to_token(&json!(5), &ParamType::Uint(256)).unwrap(),
            Token::Uint(5u64.into())
        );
        assert_eq!(
            json_to_token(&json!("0x10"), &ParamType::Uint(256)).unwrap(),
            Token::Uint(16u64.into())
        );
        assert_eq!(
            json_to_token(&json!([1, 2]), &ParamType::Array(Box::new(ParamType::Uint(8))))
                .unwrap(),
            Token::Array(vec![Token::Uint(1u64.into()), Token::Uint(2u64.into())])
        );
        assert!(json_to_token(&json!("nope"), &ParamType::Uint(256)).is_err());
    }
}
