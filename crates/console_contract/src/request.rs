//! Request descriptors, collision policies, and response shapes for the
//! console's HTTP-like contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Form-encoded request content type.
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
/// JSON request content type.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// HTTP method subset used by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    /// Read request.
    Get,
    /// Headers-only read request.
    Head,
    /// Create or action request.
    Post,
    /// Replace request.
    Put,
    /// Delete request.
    Delete,
}

impl Method {
    /// Returns whether the method mutates server state.
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Delete)
    }

    /// Wire-format method name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// Structured request body prior to wire encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// Pre-encoded text body, sent form-encoded.
    Text(String),
    /// Structured body; encoding depends on the method.
    Json(Value),
}

impl RequestBody {
    /// Negotiates the content type for this body and method.
    ///
    /// Text bodies are form-encoded; structured bodies on mutating methods
    /// are JSON-encoded; everything else falls back to form encoding.
    pub fn negotiated_content_type(&self, method: Method) -> &'static str {
        match self {
            RequestBody::Json(_) if method.is_mutating() => CONTENT_TYPE_JSON,
            _ => CONTENT_TYPE_FORM,
        }
    }

    /// Encodes the body for the wire under the negotiated content type.
    pub fn encode(&self, method: Method) -> Option<String> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Text(text) => Some(text.clone()),
            RequestBody::Json(value) => {
                if method.is_mutating() {
                    Some(value.to_string())
                } else {
                    Some(form_encode(value))
                }
            }
        }
    }
}

/// Form-encodes the top level of a structured value as `key=value` pairs.
///
/// Non-object values encode as a single `value=` pair; nested structures
/// encode as their JSON text.
pub(crate) fn form_encode(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs = Vec::with_capacity(map.len());
            for (key, entry) in map {
                pairs.push(format!(
                    "{}={}",
                    form_component(key),
                    form_component(&scalar_text(entry))
                ));
            }
            pairs.join("&")
        }
        other => format!("value={}", form_component(&scalar_text(other))),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn form_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Policy applied when a named request collides with an in-flight request
/// of the same name in the owning context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Never deduplicate; the request is not tracked by name.
    #[default]
    Anonymous,
    /// Issue the new call and forget the old one; its late result is
    /// discarded.
    Replace,
    /// Actively cancel the old transport call before issuing the new one.
    Abort,
    /// Converge on the existing in-flight call without issuing a new one.
    Suppress,
    /// Reject the new request immediately without issuing anything.
    Error,
}

/// Describes one HTTP-like call issued through the request registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Structured request body.
    pub body: RequestBody,
    /// Explicit content-type override; `None` negotiates from the body.
    pub content_type: Option<String>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Deduplication name; presence activates the collision policy.
    pub name: Option<String>,
    /// Collision policy applied when `name` is set.
    pub collision: CollisionPolicy,
    /// Transport timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl RequestDescriptor {
    /// Creates a GET descriptor.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, Method::Get, RequestBody::Empty)
    }

    /// Creates a POST descriptor with a structured body.
    pub fn post_json(url: impl Into<String>, payload: Value) -> Self {
        Self::new(url, Method::Post, RequestBody::Json(payload))
    }

    /// Creates a descriptor with the given method and body.
    pub fn new(url: impl Into<String>, method: Method, body: RequestBody) -> Self {
        Self {
            url: url.into(),
            method,
            body,
            content_type: None,
            headers: Vec::new(),
            name: None,
            collision: CollisionPolicy::Anonymous,
            timeout_ms: None,
        }
    }

    /// Names the request and sets its collision policy.
    pub fn named(mut self, name: impl Into<String>, collision: CollisionPolicy) -> Self {
        self.name = Some(name.into());
        self.collision = collision;
        self
    }

    /// Effective collision policy: an unset name always forces
    /// [`CollisionPolicy::Anonymous`].
    pub fn effective_policy(&self) -> CollisionPolicy {
        if self.name.is_none() {
            CollisionPolicy::Anonymous
        } else {
            self.collision
        }
    }

    /// Content type after negotiation and overrides.
    pub fn resolved_content_type(&self) -> String {
        self.content_type
            .clone()
            .unwrap_or_else(|| self.body.negotiated_content_type(self.method).to_string())
    }
}

/// Decoded successful response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Decoded JSON payload; `Value::Null` for empty bodies.
    pub payload: Value,
}

impl ConsoleResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Extracts the revision carried by the response, preferring the `Etag`
    /// header over a `rev` field in the payload.
    pub fn revision(&self) -> Option<String> {
        if let Some(etag) = self.header("etag") {
            return Some(etag.trim_matches('"').to_string());
        }
        self.payload
            .get("rev")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// One server-side validation message, optionally mapped to a field key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    /// Field key the message maps to; `None` for form-level messages.
    pub key: Option<String>,
    /// Message text.
    pub error: String,
}

impl ValidationMessage {
    /// Splits messages into per-field errors (keyed, insertion order within
    /// a field preserved) and keyless form-level errors.
    pub fn split(
        messages: &[ValidationMessage],
    ) -> (std::collections::BTreeMap<String, Vec<String>>, Vec<String>) {
        let mut field_errors = std::collections::BTreeMap::<String, Vec<String>>::new();
        let mut form_errors = Vec::new();
        for message in messages {
            match &message.key {
                Some(key) => field_errors
                    .entry(key.clone())
                    .or_default()
                    .push(message.error.clone()),
                None => form_errors.push(message.error.clone()),
            }
        }
        (field_errors, form_errors)
    }
}

/// Why a dialog closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// Closed by a successful form submission.
    Submit,
    /// Closed by an explicit cancel affordance.
    Cancel,
    /// Dismissed without a decision (escape, shade click).
    Dismiss,
    /// Caller-defined reason.
    Custom(String),
}

impl CloseReason {
    /// Stable reason text.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Submit => "submit",
            Self::Cancel => "cancel",
            Self::Dismiss => "dismiss",
            Self::Custom(reason) => reason.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn text_body_negotiates_form_encoding() {
        let descriptor = RequestDescriptor::new(
            "/dictionary/entries",
            Method::Post,
            RequestBody::Text("name=Avocet".to_string()),
        );
        assert_eq!(descriptor.resolved_content_type(), CONTENT_TYPE_FORM);
        assert_eq!(
            descriptor.body.encode(Method::Post).as_deref(),
            Some("name=Avocet")
        );
    }

    #[test]
    fn structured_body_on_mutating_method_negotiates_json() {
        let body = RequestBody::Json(json!({ "name": "Avocet" }));
        assert_eq!(body.negotiated_content_type(Method::Put), CONTENT_TYPE_JSON);
        assert_eq!(
            body.encode(Method::Put).as_deref(),
            Some(r#"{"name":"Avocet"}"#)
        );
    }

    #[test]
    fn structured_body_on_read_method_form_encodes_top_level() {
        let body = RequestBody::Json(json!({ "q": "sea birds", "page": 2 }));
        assert_eq!(body.negotiated_content_type(Method::Get), CONTENT_TYPE_FORM);
        assert_eq!(body.encode(Method::Get).as_deref(), Some("page=2&q=sea+birds"));
    }

    #[test]
    fn unset_name_forces_anonymous_policy() {
        let mut descriptor = RequestDescriptor::get("/dictionary/entries");
        descriptor.collision = CollisionPolicy::Suppress;
        assert_eq!(descriptor.effective_policy(), CollisionPolicy::Anonymous);

        let named = descriptor.named("list", CollisionPolicy::Suppress);
        assert_eq!(named.effective_policy(), CollisionPolicy::Suppress);
    }

    #[test]
    fn validation_messages_split_by_field_key() {
        let messages = vec![
            ValidationMessage {
                key: Some("name".to_string()),
                error: "Required".to_string(),
            },
            ValidationMessage {
                key: None,
                error: "Entry is stale".to_string(),
            },
            ValidationMessage {
                key: Some("name".to_string()),
                error: "Too short".to_string(),
            },
        ];
        let (field_errors, form_errors) = ValidationMessage::split(&messages);
        assert_eq!(
            field_errors["name"],
            vec!["Required".to_string(), "Too short".to_string()]
        );
        assert_eq!(form_errors, vec!["Entry is stale".to_string()]);
    }

    #[test]
    fn revision_prefers_etag_header_over_payload_rev() {
        let response = ConsoleResponse {
            status: 200,
            headers: vec![("Etag".to_string(), "\"42-aa\"".to_string())],
            payload: json!({ "rev": "41-zz" }),
        };
        assert_eq!(response.revision().as_deref(), Some("42-aa"));

        let body_only = ConsoleResponse {
            status: 200,
            headers: Vec::new(),
            payload: json!({ "rev": "41-zz" }),
        };
        assert_eq!(body_only.revision().as_deref(), Some("41-zz"));
    }
}
