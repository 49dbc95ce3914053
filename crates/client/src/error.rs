//! Client error types.

use serde_json::Value;

/// Why a call or subscription did not produce a value.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CallError {
    /// The procedure answered with a non-success status.  `data` is the
    /// server's error payload (`{"message": .., "details": ..}`).
    #[error("remote error {status}: {}", message_of(.data))]
    Remote { status: u16, data: Value },

    /// A single transport operation failed (HTTP request, socket write).
    #[error("transport: {0}")]
    Transport(String),

    /// The duplex engine gave up reconnecting.
    #[error("connection failed after {0} reconnect attempts")]
    ConnectionFailed(u32),

    /// The response could not be decoded into the expected shape.
    #[error("decode: {0}")]
    Decode(String),

    /// The selected transport cannot carry this kind of operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The link chain ended without a link performing the call.
    #[error("link chain ended without a terminal transport link")]
    ChainExhausted,

    /// The client was closed while the call was in flight.
    #[error("client closed")]
    Closed,
}

impl CallError {
    /// Remote status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server error payload, if the server answered.
    pub fn data(&self) -> Option<&Value> {
        match self {
            CallError::Remote { data, .. } => Some(data),
            _ => None,
        }
    }
}

fn message_of(data: &Value) -> String {
    match data.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => data.to_string(),
    }
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        CallError::Decode(e.to_string())
    }
}

/// Construction-time errors.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("config: {0}")]
    Config(String),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_error_displays_server_message() {
        let err = CallError::Remote {
            status: 401,
            data: json!({"message": "sign in first", "details": null}),
        };
        assert_eq!(err.to_string(), "remote error 401: sign in first");
        assert_eq!(err.status(), Some(401));
        assert!(CallError::Closed.status().is_none());
    }
}
