//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`.
//! Role: Shared contract helper for CLI diagnostics such as rejected port messages.
//! Invariants: Notices are non-fatal and never alter the stdout event stream.
//! Invariants: JSON schema is additive-only once published.
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub origin: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    json!({
        "notice": {
            "kind": notice.kind,
            "time": notice.time,
            "cmd": notice.cmd,
            "origin": notice.origin,
            "message": notice.message,
            "details": Value::Object(notice.details.clone()),
        }
    })
}
