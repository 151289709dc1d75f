//! Client-side revision tracking for conditional requests.
//!
//! Owned by a context and shared with its request registry; reads send
//! `If-None-Match`, mutations send `If-Match`, and successful mutating
//! responses update the tracked revision.

use std::{cell::RefCell, rc::Rc};

use console_contract::{ConsoleResponse, Method};

const IF_NONE_MATCH: &str = "If-None-Match";
const IF_MATCH: &str = "If-Match";

/// Shared tracked revision of the entity a context edits.
#[derive(Clone, Default)]
pub struct RevisionTracker {
    current: Rc<RefCell<Option<String>>>,
}

impl RevisionTracker {
    /// Creates a tracker seeded with a known revision.
    pub fn seeded(revision: impl Into<String>) -> Self {
        Self {
            current: Rc::new(RefCell::new(Some(revision.into()))),
        }
    }

    /// Currently tracked revision.
    pub fn current(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    /// Replaces the tracked revision.
    pub fn set(&self, revision: Option<String>) {
        *self.current.borrow_mut() = revision;
    }

    /// Conditional-request header for the given method, if a revision is
    /// tracked.
    pub fn conditional_header(&self, method: Method) -> Option<(String, String)> {
        let revision = self.current()?;
        let name = if method.is_mutating() {
            IF_MATCH
        } else {
            IF_NONE_MATCH
        };
        Some((name.to_string(), revision))
    }

    /// Absorbs the revision carried by a successful mutating response.
    pub fn absorb(&self, method: Method, response: &ConsoleResponse) {
        if !method.is_mutating() {
            return;
        }
        if let Some(revision) = response.revision() {
            self.set(Some(revision));
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_send_if_none_match_and_mutations_send_if_match() {
        let tracker = RevisionTracker::seeded("7-bc");
        assert_eq!(
            tracker.conditional_header(Method::Get),
            Some(("If-None-Match".to_string(), "7-bc".to_string()))
        );
        assert_eq!(
            tracker.conditional_header(Method::Put),
            Some(("If-Match".to_string(), "7-bc".to_string()))
        );
        assert_eq!(RevisionTracker::default().conditional_header(Method::Get), None);
    }

    #[test]
    fn only_mutating_responses_update_the_revision() {
        let tracker = RevisionTracker::seeded("7-bc");
        let response = ConsoleResponse {
            status: 200,
            headers: Vec::new(),
            payload: json!({ "rev": "8-dd" }),
        };

        tracker.absorb(Method::Get, &response);
        assert_eq!(tracker.current().as_deref(), Some("7-bc"));

        tracker.absorb(Method::Post, &response);
        assert_eq!(tracker.current().as_deref(), Some("8-dd"));
    }
}
