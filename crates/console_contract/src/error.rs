//! Closed error taxonomy and the normalized error shape surfaced to UI
//! collaborators.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed classification for a failed console operation.
///
/// Server payloads carry the kind as an `errorType` string; transport and
/// decode failures are mapped onto the same set so every failure routes
/// through one taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The server could not bind the submitted payload to its model.
    ModelBind,
    /// The caller is not signed in or lacks permission.
    Unauthorized,
    /// The addressed item does not exist.
    NotFound,
    /// The item changed underneath the caller's revision.
    Conflict,
    /// An item with the same identity already exists.
    Exists,
    /// The payload failed server-side field validation.
    Validation,
    /// Another editor holds the pessimistic lock on the item.
    Locked,
    /// Generic server-reported failure.
    General,
    /// The server's data store failed.
    Database,
    /// A backing service the server depends on failed.
    Service,
    /// The transport could not reach the server.
    Http,
    /// The request exceeded its transport timeout.
    Timeout,
    /// The request was cancelled or superseded before finishing.
    Abort,
    /// The response body could not be decoded.
    Parse,
    /// The server could not translate the submitted data.
    Mapping,
    /// Unclassifiable failure.
    Unknown,
    /// The console is inside a scheduled quiet window.
    QuietWindow,
}

impl ErrorKind {
    /// Parses a server-provided `errorType` string.
    ///
    /// Matching is case-insensitive; unrecognized or empty input collapses
    /// to [`ErrorKind::Unknown`].
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "modelbind" | "model-bind" => Self::ModelBind,
            "unauthorized" => Self::Unauthorized,
            "notfound" | "not-found" => Self::NotFound,
            "conflict" => Self::Conflict,
            "exists" => Self::Exists,
            "validation" => Self::Validation,
            "locked" => Self::Locked,
            "general" => Self::General,
            "database" => Self::Database,
            "service" => Self::Service,
            "http" => Self::Http,
            "timeout" => Self::Timeout,
            "abort" => Self::Abort,
            "parse" => Self::Parse,
            "mapping" => Self::Mapping,
            "quietwindow" | "quiet-window" => Self::QuietWindow,
            _ => Self::Unknown,
        }
    }

    /// Default title used when the server or transport supplied none.
    pub const fn default_title(self) -> &'static str {
        match self {
            Self::ModelBind => "Request Not Understood",
            Self::Unauthorized => "Not Signed In",
            Self::NotFound => "Not Found",
            Self::Conflict => "Editing Conflict",
            Self::Exists => "Already Exists",
            Self::Validation => "Validation Failed",
            Self::Locked => "Item Locked",
            Self::General => "Something Went Wrong",
            Self::Database => "Storage Error",
            Self::Service => "Service Unavailable",
            Self::Http => "Connection Problem",
            Self::Timeout => "Request Timed Out",
            Self::Abort => "Request Cancelled",
            Self::Parse => "Bad Response",
            Self::Mapping => "Mapping Error",
            Self::Unknown => "Unexpected Error",
            Self::QuietWindow => "Maintenance In Progress",
        }
    }

    /// Default message used when the server or transport supplied none.
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ModelBind => "The server could not read the submitted data. Refresh and try again.",
            Self::Unauthorized => {
                "Your session has expired or you are not authorized to do that. Sign in and try again."
            }
            Self::NotFound => "The item you asked for no longer exists. It may have been deleted by another editor.",
            Self::Conflict => {
                "Someone else changed this item while you were working. Reload to pick up their changes."
            }
            Self::Exists => "An item with that name already exists.",
            Self::Validation => "Some fields need attention before this can be saved.",
            Self::Locked => "Another editor currently holds the lock on this item. Try again later.",
            Self::General => "The server reported a problem completing the request.",
            Self::Database => "The server could not read or write the underlying data store.",
            Self::Service => "A backing service did not respond. Try again in a moment.",
            Self::Http => "The server could not be reached. Check the connection and try again.",
            Self::Timeout => "The server took too long to respond. Try again.",
            Self::Abort => "The request was superseded before it finished.",
            Self::Parse => "The server's response could not be read.",
            Self::Mapping => "The server could not translate the submitted data.",
            Self::Unknown => "An unexpected problem occurred. Try again, and report it if it persists.",
            Self::QuietWindow => "The console is in a quiet window for maintenance. Try again shortly.",
        }
    }
}

/// Escapes text for safe markup display.
pub fn escape_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Uniform error shape produced by the normalizer and consumed by every UI
/// collaborator.
///
/// The message is always display-safe: escaping is applied exactly once at
/// normalization time, so re-normalizing an already-normalized error leaves
/// the visible text untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Display title.
    pub title: String,
    /// Display-safe message body.
    pub message: String,
    /// Optional rich detail payload supplied by the server.
    pub detail: Option<Value>,
}

impl NormalizedError {
    /// Creates an error carrying the kind's default title and message.
    pub fn of_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            title: kind.default_title().to_string(),
            message: kind.default_message().to_string(),
            detail: None,
        }
    }

    /// Creates an error with explicit display text.
    ///
    /// The caller asserts the message is already display-safe.
    pub fn with_text(kind: ErrorKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Attaches a rich detail payload.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Returns whether a details affordance should be offered.
    pub fn has_detail(&self) -> bool {
        self.detail.is_some()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_server_error_type_strings_case_insensitively() {
        assert_eq!(ErrorKind::parse("Validation"), ErrorKind::Validation);
        assert_eq!(ErrorKind::parse("NOTFOUND"), ErrorKind::NotFound);
        assert_eq!(ErrorKind::parse("quiet-window"), ErrorKind::QuietWindow);
        assert_eq!(ErrorKind::parse("  locked "), ErrorKind::Locked);
    }

    #[test]
    fn unrecognized_error_type_collapses_to_unknown() {
        assert_eq!(ErrorKind::parse("frobnicate"), ErrorKind::Unknown);
        assert_eq!(ErrorKind::parse(""), ErrorKind::Unknown);
    }

    #[test]
    fn default_error_carries_per_kind_text() {
        let err = NormalizedError::of_kind(ErrorKind::Conflict);
        assert_eq!(err.title, "Editing Conflict");
        assert!(err.message.contains("Someone else changed this item"));
        assert!(!err.has_detail());
    }

    #[test]
    fn escape_markup_covers_reserved_characters() {
        assert_eq!(
            escape_markup(r#"<b>"a" & 'b'</b>"#),
            "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;"
        );
    }
}
