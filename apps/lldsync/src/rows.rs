//! # Row Files
//!
//! Discovered rows as JSON. Two shapes are accepted:
//!
//! ```json
//! [{"{#FSNAME}": "/", "{#FSTYPE}": "ext4"}]
//! {"data": [{"{#FSNAME}": "/", "{#FSTYPE}": "ext4"}]}
//! ```
//!
//! String values are taken verbatim; numbers and booleans are rendered as
//! their JSON text. Anything else is rejected.

use lldsync_core::{LldError, Row};
use serde_json::Value;

/// Maximum rows per file.
pub const MAX_ROWS: usize = 100_000;

/// Parse a row file.
pub fn parse_rows(bytes: &[u8]) -> Result<Vec<Row>, LldError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| LldError::InvalidRows(e.to_string()))?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("data") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(LldError::InvalidRows(
                    "expected a \"data\" array".to_string(),
                ));
            }
        },
        _ => {
            return Err(LldError::InvalidRows(
                "expected an array of rows or an object with \"data\"".to_string(),
            ));
        }
    };

    if entries.len() > MAX_ROWS {
        return Err(LldError::InvalidRows(format!(
            "row count {} exceeds maximum {}",
            entries.len(),
            MAX_ROWS
        )));
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| parse_row(index, entry))
        .collect()
}

fn parse_row(index: usize, entry: Value) -> Result<Row, LldError> {
    let Value::Object(object) = entry else {
        return Err(LldError::InvalidRows(format!("row {index} is not an object")));
    };

    let mut row = Row::new();
    for (name, value) in object {
        let text = match value {
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            _ => {
                return Err(LldError::InvalidRows(format!(
                    "row {index}: value of \"{name}\" is not a scalar"
                )));
            }
        };
        row = row.with(name, text);
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_become_text() {
        let rows = parse_rows(br#"[{"{#PORT}": 8080, "{#UP}": true}]"#).expect("parse");
        assert_eq!(rows[0].get("{#PORT}"), Some(b"8080".as_slice()));
        assert_eq!(rows[0].get("{#UP}"), Some(b"true".as_slice()));
    }

    #[test]
    fn nested_values_are_rejected() {
        let result = parse_rows(br#"[{"{#A}": ["x"]}]"#);
        assert!(matches!(result, Err(LldError::InvalidRows(_))));
    }
}
