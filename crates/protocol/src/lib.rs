//! Duplex wire protocol: JSON envelopes exchanged over a persistent
//! WebSocket, correlated by a connection-scoped numeric id.
//!
//! ```text
//! client → server   { "id": 7, "method": "POST", "body": { "path": "/helloWorld", "input": {...} } }
//! server → client   { "id": 7, "method": "POST", "body": { "status": 200, "path": "/helloWorld", "data": {...} } }
//! ```
//!
//! A `SUBSCRIBE` id stays live until the client sends `UNSUBSCRIBE` with
//! the same id or the connection closes; every emitted value arrives as a
//! new response envelope carrying that id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_METHOD_NOT_ALLOWED: u16 = 405;
pub const STATUS_INTERNAL: u16 = 500;

/// `true` for 2xx statuses.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Envelope verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Post,
    Subscribe,
    Unsubscribe,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Method::Post => "POST",
            Method::Subscribe => "SUBSCRIBE",
            Method::Unsubscribe => "UNSUBSCRIBE",
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallBody {
    pub path: String,
    /// Absent and `null` are equivalent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub id: u32,
    pub method: Method,
    pub body: CallBody,
}

impl CallEnvelope {
    pub fn new(id: u32, method: Method, path: impl Into<String>, input: Option<Value>) -> Self {
        Self {
            id,
            method,
            body: CallBody {
                path: path.into(),
                input,
            },
        }
    }

    pub fn post(id: u32, path: impl Into<String>, input: Option<Value>) -> Self {
        Self::new(id, Method::Post, path, input)
    }

    pub fn subscribe(id: u32, path: impl Into<String>, input: Option<Value>) -> Self {
        Self::new(id, Method::Subscribe, path, input)
    }

    pub fn unsubscribe(id: u32, path: impl Into<String>) -> Self {
        Self::new(id, Method::Unsubscribe, path, None)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub status: u16,
    pub path: String,
    #[serde(default)]
    pub data: Value,
}

impl ResponseBody {
    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u32,
    pub method: Method,
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    pub fn new(id: u32, method: Method, status: u16, path: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            method,
            body: ResponseBody {
                status,
                path: path.into(),
                data,
            },
        }
    }
}

/// Best-effort recovery of the correlation id from a frame that failed
/// to decode, so the error reply can still be matched by the sender.
pub fn salvage_id(raw: &str) -> u32 {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64))
        .and_then(|id| u32::try_from(id).ok())
        .unwrap_or(0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Single-shot transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP response body for a single-shot call: `{"data": ..}` on success,
/// `{"error": ..}` otherwise.  The HTTP status mirrors `status`.
pub fn single_shot_body(status: u16, data: Value) -> Value {
    if is_success(status) {
        serde_json::json!({ "data": data })
    } else {
        serde_json::json!({ "error": data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_envelope_wire_shape() {
        let env = CallEnvelope::subscribe(3, "/ticks", Some(json!({"every": 10})));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(
            v,
            json!({"id": 3, "method": "SUBSCRIBE", "body": {"path": "/ticks", "input": {"every": 10}}})
        );
    }

    #[test]
    fn absent_input_is_omitted() {
        let v = serde_json::to_value(CallEnvelope::unsubscribe(4, "/ticks")).unwrap();
        assert_eq!(v["method"], "UNSUBSCRIBE");
        assert!(v["body"].get("input").is_none());
    }

    #[test]
    fn null_input_decodes_as_absent() {
        let env: CallEnvelope =
            serde_json::from_str(r#"{"id":1,"method":"POST","body":{"path":"/a","input":null}}"#)
                .unwrap();
        assert_eq!(env.body.input, None);
    }

    #[test]
    fn unknown_method_rejected() {
        let res = serde_json::from_str::<CallEnvelope>(
            r#"{"id":1,"method":"GET","body":{"path":"/a"}}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn response_missing_data_is_null() {
        let env: ResponseEnvelope =
            serde_json::from_str(r#"{"id":9,"method":"POST","body":{"status":404,"path":"/x"}}"#)
                .unwrap();
        assert_eq!(env.body.data, Value::Null);
        assert!(!env.body.is_success());
    }

    #[test]
    fn salvage_id_from_partial_frame() {
        assert_eq!(salvage_id(r#"{"id": 12, "method": "BOGUS"}"#), 12);
        assert_eq!(salvage_id("not json"), 0);
        assert_eq!(salvage_id(r#"{"id": -1}"#), 0);
    }

    #[test]
    fn single_shot_body_by_status() {
        assert_eq!(single_shot_body(200, json!(1)), json!({"data": 1}));
        assert_eq!(
            single_shot_body(404, json!({"message": "Not found"})),
            json!({"error": {"message": "Not found"}})
        );
    }
}
