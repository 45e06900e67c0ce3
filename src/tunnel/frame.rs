//! JSON frames exchanged with the relay.
//!
//! Relay → client: a [`RequestFrame`] per proxied HTTP request.
//! Client → relay: a [`ResponseFrame`] per request, plus periodic
//! [`ControlMessage::Heartbeat`]s that carry no correlation id.
//!
//! Request and response bodies are standard base64 so arbitrary bytes survive
//! the JSON text channel.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Error text sent back for frames that cannot be acted on.
pub const INVALID_REQUEST: &str = "Invalid request";

/// One header entry from a request frame.
///
/// The relay sends either a plain string or a list for repeated headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Sets the header, replacing any default.
    Single(String),
    /// One header occurrence per element, in order.
    Multi(Vec<String>),
}

impl HeaderValue {
    /// Interpret a raw JSON value. Shapes other than string or list yield `None`;
    /// non-string list elements are skipped.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Single(s.clone())),
            Value::Array(items) => Some(Self::Multi(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect(),
            )),
            _ => None,
        }
    }
}

/// A proxied HTTP request received from the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestFrame {
    /// Correlates this request with its response. Must be non-empty.
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,
    /// Path including the query string.
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(default, deserialize_with = "lenient_headers")]
    pub headers: BTreeMap<String, HeaderValue>,
    /// Base64 request body; missing, null and empty all mean no body.
    #[serde(default)]
    pub body: Option<String>,
}

impl RequestFrame {
    /// HTTP method, `GET` when the relay left it blank.
    pub fn method_or_default(&self) -> &str {
        if self.method.is_empty() {
            "GET"
        } else {
            &self.method
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, HeaderValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Object(map)) = raw else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .iter()
        .filter_map(|(name, value)| HeaderValue::from_json(value).map(|hv| (name.clone(), hv)))
        .collect())
}

/// A response (or error) sent back to the relay.
///
/// Either `status`/`headers`/`body` or `error` is populated, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFrame {
    pub fn success(
        id: impl Into<String>,
        status: u16,
        headers: BTreeMap<String, Vec<String>>,
        body: String,
    ) -> Self {
        Self {
            id: id.into(),
            status: Some(status),
            headers: Some(headers),
            body: Some(body),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: None,
            headers: None,
            body: None,
            error: Some(error.into()),
        }
    }
}

/// Uncorrelated control messages. No reply is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Heartbeat,
}

/// Classification of one inbound text message.
#[derive(Debug)]
pub enum Inbound {
    /// Actionable request.
    Request(RequestFrame),
    /// Error notice from the relay about a non-empty id it no longer tracks. Not answered.
    Notice { id: String, error: String },
    /// Unparseable or missing its id. `id` is whatever could be recovered.
    Invalid { id: String },
}

/// Decode one message from the relay.
pub fn decode(raw: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return Inbound::Invalid { id: String::new() };
    };
    let Value::Object(ref map) = value else {
        return Inbound::Invalid { id: String::new() };
    };

    let id = map
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // Notices without an id are answered like any other invalid frame.
    if let (Some(error), None) = (map.get("error").and_then(Value::as_str), map.get("method")) {
        if id.is_empty() {
            return Inbound::Invalid { id };
        }
        return Inbound::Notice {
            id,
            error: error.to_string(),
        };
    }

    match serde_json::from_value::<RequestFrame>(value) {
        Ok(frame) if !frame.id.is_empty() => Inbound::Request(frame),
        _ => Inbound::Invalid { id },
    }
}

/// Render a header name the way the relay expects it: `content-type` → `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(raw: &str) -> RequestFrame {
        match decode(raw) {
            Inbound::Request(frame) => frame,
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_full_frame() {
        let frame = request(
            r#"{"id":"7","method":"POST","path":"/api?x=1","headers":{"Accept":"text/html","X-Tag":["a","b"]},"body":"aGk="}"#,
        );
        assert_eq!(frame.id, "7");
        assert_eq!(frame.method_or_default(), "POST");
        assert_eq!(frame.path, "/api?x=1");
        assert_eq!(
            frame.headers.get("Accept"),
            Some(&HeaderValue::Single("text/html".to_string()))
        );
        assert_eq!(
            frame.headers.get("X-Tag"),
            Some(&HeaderValue::Multi(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(frame.body.as_deref(), Some("aGk="));
    }

    #[test]
    fn test_decode_minimal_frame_defaults() {
        let frame = request(r#"{"id":"1","headers":null,"body":null}"#);
        assert_eq!(frame.method_or_default(), "GET");
        assert_eq!(frame.path, "");
        assert!(frame.headers.is_empty());
        assert!(frame.body.is_none());
    }

    #[test]
    fn test_header_shapes_decoded_defensively() {
        let frame = request(
            r#"{"id":"1","method":"GET","path":"/","headers":{"A":["x",1,null,"y",{"z":1}],"B":42,"C":{"nested":true},"D":"ok"}}"#,
        );
        assert_eq!(
            frame.headers.get("A"),
            Some(&HeaderValue::Multi(vec!["x".to_string(), "y".to_string()]))
        );
        assert!(!frame.headers.contains_key("B"));
        assert!(!frame.headers.contains_key("C"));
        assert_eq!(frame.headers.get("D"), Some(&HeaderValue::Single("ok".to_string())));
    }

    #[test]
    fn test_not_json_is_invalid_with_empty_id() {
        assert!(matches!(decode("not-json"), Inbound::Invalid { id } if id.is_empty()));
    }

    #[test]
    fn test_non_object_is_invalid() {
        assert!(matches!(decode(r#"["id","1"]"#), Inbound::Invalid { id } if id.is_empty()));
    }

    #[test]
    fn test_missing_or_empty_id_is_invalid() {
        assert!(matches!(decode(r#"{"method":"GET","path":"/"}"#), Inbound::Invalid { id } if id.is_empty()));
        assert!(matches!(decode(r#"{"id":"","method":"GET"}"#), Inbound::Invalid { id } if id.is_empty()));
        assert!(matches!(decode(r#"{"type":"heartbeat"}"#), Inbound::Invalid { .. }));
    }

    #[test]
    fn test_partial_decode_keeps_id() {
        // `path` has the wrong type, but the id is still recoverable.
        assert!(matches!(
            decode(r#"{"id":"abc","method":"GET","path":12}"#),
            Inbound::Invalid { id } if id == "abc"
        ));
    }

    #[test]
    fn test_relay_error_notice() {
        assert!(matches!(
            decode(r#"{"id":"9","error":"Unknown request"}"#),
            Inbound::Notice { id, error } if id == "9" && error == "Unknown request"
        ));
    }

    #[test]
    fn test_error_without_id_is_invalid() {
        assert!(matches!(decode(r#"{"error":"x"}"#), Inbound::Invalid { id } if id.is_empty()));
        assert!(matches!(
            decode(r#"{"id":"","error":"Invalid message"}"#),
            Inbound::Invalid { id } if id.is_empty()
        ));
    }

    #[test]
    fn test_response_success_shape() {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), vec!["application/json".to_string()]);
        let frame = ResponseFrame::success("1", 200, headers, "eyJvayI6dHJ1ZX0=".to_string());
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "id": "1",
                "status": 200,
                "headers": {"Content-Type": ["application/json"]},
                "body": "eyJvayI6dHJ1ZX0=",
            })
        );
    }

    #[test]
    fn test_response_failure_shape() {
        let frame = ResponseFrame::failure("", INVALID_REQUEST);
        assert!(frame.status.is_none());
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"id": "", "error": "Invalid request"})
        );
    }

    #[test]
    fn test_heartbeat_shape() {
        assert_eq!(
            serde_json::to_string(&ControlMessage::Heartbeat).unwrap(),
            r#"{"type":"heartbeat"}"#
        );
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x-request-id"), "X-Request-Id");
        assert_eq!(canonical_header_name("ETAG"), "Etag");
        assert_eq!(canonical_header_name("www-authenticate"), "Www-Authenticate");
    }
}
