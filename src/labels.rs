//! Label merge and delete over a node's label map.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseLabelError {
    #[error("label '{0}' must have the form key=value")]
    Format(String),
    #[error("label '{0}' has an empty key")]
    EmptyKey(String),
}

/// Parse `key=value` pairs into a label map.
pub fn parse_labels<S: AsRef<str>>(raw: &[S]) -> Result<BTreeMap<String, String>, ParseLabelError> {
    raw.iter()
        .map(|pair| {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ParseLabelError::Format(pair.to_string()))?;
            if key.is_empty() {
                return Err(ParseLabelError::EmptyKey(pair.to_string()));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// `current` overwritten by `requested`. Values are never compared first.
pub fn merge(
    current: &BTreeMap<String, String>,
    requested: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = current.clone();
    merged.extend(requested.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// `current` without `keys`. Absent keys are ignored.
pub fn remove_keys<S: AsRef<str>>(
    current: &BTreeMap<String, String>,
    keys: &[S],
) -> BTreeMap<String, String> {
    let mut remaining = current.clone();
    for key in keys {
        remaining.remove(key.as_ref());
    }
    remaining
}
