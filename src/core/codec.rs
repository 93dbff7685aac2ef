//! Purpose: Serialize stored values to and from the raw strings held by host storage.
//! Exports: `encode`, `encode_serialize`, `to_value`, `decode`, `decode_slot`, `MAX_DEPTH`.
//! Role: Stateless leaf called synchronously by the bridge and the change observer.
//! Invariants: `decode(&encode(v)?)? == v` for every value `encode` accepts.
//! Invariants: Absence (`None`) and the encoded null (`"null"`) stay distinct.
//! Invariants: `encode` rejects anything `decode` could not read back.

use serde::Serialize;
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

/// Deepest container nesting accepted by `encode`. Kept below the decoder's
/// recursion limit so every encoded value decodes again.
pub const MAX_DEPTH: usize = 100;

pub fn encode(value: &Value) -> Result<String, Error> {
    let depth = nesting_depth(value);
    if depth > MAX_DEPTH {
        return Err(Error::new(ErrorKind::Encode)
            .with_message(format!(
                "value nests {depth} levels deep (limit {MAX_DEPTH})"
            )));
    }
    serde_json::to_string(value).map_err(|err| {
        Error::new(ErrorKind::Encode)
            .with_message("value is not serializable")
            .with_source(err)
    })
}

/// Convert an arbitrary serializable value into a stored value.
///
/// Fails with `Encode` for members JSON cannot express, such as maps keyed by
/// non-string types.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|err| {
        Error::new(ErrorKind::Encode)
            .with_message("value is not serializable")
            .with_source(err)
    })
}

pub fn encode_serialize<T: Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    encode(&to_value(value)?)
}

pub fn decode(raw: &str) -> Result<Value, Error> {
    serde_json::from_str(raw).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("stored value is not valid encoded json")
            .with_source(err)
    })
}

/// Decode an optional raw entry; a missing entry stays `None`.
pub fn decode_slot(raw: Option<&str>) -> Result<Option<Value>, Error> {
    raw.map(decode).transpose()
}

fn nesting_depth(value: &Value) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(value, 0usize)];
    while let Some((value, depth)) = stack.pop() {
        match value {
            Value::Array(items) => {
                deepest = deepest.max(depth + 1);
                stack.extend(items.iter().map(|item| (item, depth + 1)));
            }
            Value::Object(map) => {
                deepest = deepest.max(depth + 1);
                stack.extend(map.values().map(|item| (item, depth + 1)));
            }
            _ => {}
        }
    }
    deepest
}
