//! Text encoding for the structured columns of `t_user`
//!
//! `quota` and `preference` hold JSON wrapped in a versioned envelope:
//!
//! ```text
//! {"version":1,"data":{"spaceLimit":1073741824,"uploadSpeedLimit":52428800,...}}
//! ```
//!
//! Rows written before the envelope existed hold the bare record object;
//! those still decode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Schema version written by [`encode`]
pub const BLOB_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    data: serde_json::Value,
}

pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    let envelope = EnvelopeRef {
        version: BLOB_VERSION,
        data: value,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode a blob read from `column`.
pub fn decode<T: DeserializeOwned>(column: &str, text: &str) -> Result<T> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| StoreError::Decode(format!("{}: invalid JSON: {}", column, e)))?;

    let data = if is_envelope(&value) {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| StoreError::Decode(format!("{}: bad envelope: {}", column, e)))?;
        if envelope.version > BLOB_VERSION {
            return Err(StoreError::Decode(format!(
                "{}: unsupported version {} (max {})",
                column, envelope.version, BLOB_VERSION
            )));
        }
        envelope.data
    } else {
        value
    };

    serde_json::from_value(data).map_err(|e| StoreError::Decode(format!("{}: {}", column, e)))
}

fn is_envelope(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.len() == 2 && obj.contains_key("version") && obj.contains_key("data"))
        .unwrap_or(false)
}
