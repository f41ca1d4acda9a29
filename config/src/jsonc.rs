//! JSONC support: configs and templates may carry `//` and `/* */` comments
//! and trailing commas. Comments are stripped before handing the text to
//! serde, and object keys are scanned for duplicates, which are load errors
//! (a field declared twice would silently lose one definition otherwise).

use serde::de::DeserializeOwned;
use std::collections::HashSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JsoncError {
    #[error("duplicate key `{0}`")]
    DuplicateKey(String),
    #[error("{0}")]
    Syntax(String),
}

/// Parses JSONC text into `T`.
pub fn parse<T: DeserializeOwned>(input: &str) -> Result<T, JsoncError> {
    let stripped = strip(input);
    if let Some(key) = find_duplicate_key(&stripped) {
        return Err(JsoncError::DuplicateKey(key))
    }
    serde_json::from_str(&stripped).map_err(|err| JsoncError::Syntax(err.to_string()))
}

/// Removes comments and trailing commas, preserving line structure so serde
/// error positions stay meaningful.
pub fn strip(input: &str) -> String {
    strip_trailing_commas(&strip_comments(input))
}

fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if next == '\n' {
                        // keep line numbers stable
                        out.push('\n');
                    }
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Returns the first object key that occurs twice within the same object.
/// Expects comment-free JSON.
fn find_duplicate_key(input: &str) -> Option<String> {
    enum Ctx {
        Object(HashSet<String>),
        Array,
    }

    let mut stack: Vec<Ctx> = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        match c {
            '{' => stack.push(Ctx::Object(HashSet::new())),
            '[' => stack.push(Ctx::Array),
            '}' | ']' => {
                stack.pop();
            }
            '"' => {
                let mut value = String::new();
                let mut escaped = false;
                for (_, c) in chars.by_ref() {
                    if escaped {
                        value.push(c);
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        break;
                    } else {
                        value.push(c);
                    }
                }

                // a string is a key iff the next significant char is `:`
                while chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
                    chars.next();
                }
                if chars.peek().is_some_and(|(_, c)| *c == ':') {
                    if let Some(Ctx::Object(keys)) = stack.last_mut() {
                        if !keys.insert(value.clone()) {
                            return Some(value)
                        }
                    }
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    #[test]
    fn line_comments_are_stripped() {
        let parsed: Value = parse("{\n  // owner of the vault\n  \"a\": 1\n}").unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn block_comments_are_stripped() {
        let parsed: Value = parse("{ /* multi\nline */ \"a\": 1 }").unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        let parsed: Value = parse(r#"{"url": "https://example.com/*x*/"}"#).unwrap();
        assert_eq!(parsed, json!({"url": "https://example.com/*x*/"}));
    }

    #[test]
    fn trailing_commas_are_tolerated() {
        let parsed: Value = parse("{\"a\": [1, 2,],\n}").unwrap();
        assert_eq!(parsed, json!({"a": [1, 2]}));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = parse::<Value>(r#"{"fields": {"owner": 1, "owner": 2}}"#).unwrap_err();
        assert_eq!(err, JsoncError::DuplicateKey("owner".to_string()));
    }

    #[test]
    fn equal_keys_in_sibling_objects_are_fine() {
        let parsed: Value = parse(r#"{"a": {"x": 1}, "b": {"x": 2}}"#).unwrap();
        assert_eq!(parsed, json!({"a": {"x": 1}, "b": {"x": 2}}));
    }

    #[test]
    fn string_values_are_not_keys() {
        let parsed: Value = parse(r#"{"a": "dup", "b": "dup"}"#).unwrap();
        assert_eq!(parsed, json!({"a": "dup", "b": "dup"}));
    }
}
