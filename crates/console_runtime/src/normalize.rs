//! Maps raw transport and server failures into the uniform
//! [`NormalizedError`] taxonomy.

use serde::Deserialize;
use serde_json::Value;

use console_contract::{escape_markup, ErrorKind, NormalizedError};
use platform_transport::{TransportFailure, TransportFailureKind};

/// Marker introducing the JSON error blob inside an HTML error document.
pub const EMBEDDED_ERROR_MARKER: &str = "<!--caboodle-error:";
const MARKER_CLOSE: &str = "-->";

/// Raw failure observed before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFailure {
    /// The transport itself failed.
    Transport(TransportFailure),
    /// The server answered with an error status.
    Status {
        /// Response status code.
        status: u16,
        /// Raw response body, JSON or HTML.
        body: String,
    },
    /// A successful response body could not be decoded.
    Decode {
        /// Decoder detail text.
        detail: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerErrorPayload {
    error_type: Option<String>,
    title: Option<String>,
    message: Option<String>,
    #[serde(default)]
    escape_message: bool,
    detail: Option<Value>,
}

/// Normalizes a raw failure into the closed taxonomy.
///
/// Total: absence of any usable information yields [`ErrorKind::Unknown`]
/// with its default text. Message escaping is applied exactly once: the
/// escape flag is consumed here, so feeding an already-normalized payload
/// back through produces byte-identical visible text.
pub fn normalize(raw: RawFailure) -> NormalizedError {
    match raw {
        RawFailure::Transport(failure) => {
            let kind = match failure.kind {
                TransportFailureKind::Network => ErrorKind::Http,
                TransportFailureKind::Timeout => ErrorKind::Timeout,
                TransportFailureKind::Cancelled => ErrorKind::Abort,
            };
            NormalizedError::of_kind(kind)
        }
        RawFailure::Decode { detail } => {
            NormalizedError::of_kind(ErrorKind::Parse).with_detail(Value::String(detail))
        }
        RawFailure::Status { status: _, body } => normalize_server_body(&body),
    }
}

fn normalize_server_body(body: &str) -> NormalizedError {
    let (payload, fragment) = match serde_json::from_str::<ServerErrorPayload>(body) {
        Ok(payload) => (Some(payload), None),
        Err(_) => extract_embedded_payload(body),
    };

    let Some(payload) = payload else {
        return NormalizedError::of_kind(ErrorKind::Unknown);
    };

    let kind = payload
        .error_type
        .as_deref()
        .map_or(ErrorKind::Unknown, ErrorKind::parse);

    let title = payload
        .title
        .unwrap_or_else(|| kind.default_title().to_string());
    let message = match payload.message {
        Some(message) if payload.escape_message => escape_markup(&message),
        Some(message) => message,
        None => kind.default_message().to_string(),
    };

    let detail = payload
        .detail
        .or_else(|| fragment.map(Value::String));

    let mut normalized = NormalizedError::with_text(kind, title, message);
    if let Some(detail) = detail {
        normalized = normalized.with_detail(detail);
    }
    normalized
}

/// Extracts the embedded JSON blob and the surrounding detail fragment from
/// an HTML error document.
fn extract_embedded_payload(body: &str) -> (Option<ServerErrorPayload>, Option<String>) {
    let Some(start) = body.find(EMBEDDED_ERROR_MARKER) else {
        return (None, None);
    };
    let blob_start = start + EMBEDDED_ERROR_MARKER.len();
    let Some(close) = body[blob_start..].find(MARKER_CLOSE) else {
        return (None, None);
    };
    let blob = &body[blob_start..blob_start + close];
    let payload = match serde_json::from_str::<ServerErrorPayload>(blob) {
        Ok(payload) => payload,
        Err(err) => {
            log::warn!("embedded error blob did not parse: {err}");
            return (None, None);
        }
    };

    let after = &body[blob_start + close + MARKER_CLOSE.len()..];
    let fragment = after.trim();
    let fragment = (!fragment.is_empty()).then(|| fragment.to_string());
    (Some(payload), fragment)
}
