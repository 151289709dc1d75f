//! Page-level error notification boxes.
//!
//! Errors that are not aborts and not validation problems surface here as
//! dismissible boxes at the top of the notification section. Named boxes can
//! collide; the collision policy decides whether a repeat failure stacks,
//! replaces, or is dropped.

use std::{cell::RefCell, rc::Rc};

use console_contract::{ErrorKind, NormalizedError};

/// What to do when a named box is already displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxCollision {
    /// Show another box alongside the existing one.
    #[default]
    Add,
    /// Remove the existing box and show the new one in its place.
    Replace,
    /// Keep the existing box; drop the new error silently.
    Suppress,
}

/// One displayed notification box.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationBox {
    pub id: u64,
    pub name: Option<String>,
    pub error: NormalizedError,
}

/// Renderer-facing intents from the notification center.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyEffect {
    /// Scroll the page so the notification section is visible.
    ScrollToTop,
    /// Render the identified box.
    ShowBox(u64),
    /// Remove the identified box.
    RemoveBox(u64),
    /// No notification section exists on this page; show the error in a
    /// standalone message dialog instead.
    OpenMessageDialog(NormalizedError),
}

#[derive(Default)]
struct CenterState {
    next_id: u64,
    boxes: Vec<NotificationBox>,
    effects: Vec<NotifyEffect>,
    has_section: bool,
}

/// Collector for surfaced errors on one page.
#[derive(Clone, Default)]
pub struct NotificationCenter {
    state: Rc<RefCell<CenterState>>,
}

impl NotificationCenter {
    /// Marks whether the current page renders a notification section.
    /// Without one, surfaced errors open a message dialog instead.
    pub fn set_has_section(&self, has_section: bool) {
        self.state.borrow_mut().has_section = has_section;
    }

    /// Surfaces an error per the propagation rules: aborts are dropped
    /// outright, validation errors are logged and dropped (the owning form
    /// renders them inline), everything else becomes a box.
    pub fn surface(&self, error: NormalizedError) {
        self.surface_named(None, BoxCollision::Add, error);
    }

    /// [`surface`](Self::surface) with a box name and collision policy.
    pub fn surface_named(
        &self,
        name: Option<&str>,
        collision: BoxCollision,
        error: NormalizedError,
    ) {
        match error.kind {
            ErrorKind::Abort => return,
            ErrorKind::Validation => {
                log::warn!("validation error escaped its form: {}", error.message);
                return;
            }
            _ => {}
        }

        let mut state = self.state.borrow_mut();
        if !state.has_section {
            state.effects.push(NotifyEffect::OpenMessageDialog(error));
            return;
        }

        if let Some(name) = name {
            let existing = state
                .boxes
                .iter()
                .position(|b| b.name.as_deref() == Some(name));
            match (existing, collision) {
                (Some(_), BoxCollision::Suppress) => return,
                (Some(index), BoxCollision::Replace) => {
                    let removed = state.boxes.remove(index);
                    state.effects.push(NotifyEffect::RemoveBox(removed.id));
                }
                _ => {}
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.boxes.push(NotificationBox {
            id,
            name: name.map(str::to_string),
            error,
        });
        state.effects.push(NotifyEffect::ShowBox(id));
        state.effects.push(NotifyEffect::ScrollToTop);
    }

    /// Dismisses one box by id.
    pub fn dismiss(&self, id: u64) {
        let mut state = self.state.borrow_mut();
        if let Some(index) = state.boxes.iter().position(|b| b.id == id) {
            state.boxes.remove(index);
            state.effects.push(NotifyEffect::RemoveBox(id));
        }
    }

    /// Currently displayed boxes, oldest first.
    pub fn boxes(&self) -> Vec<NotificationBox> {
        self.state.borrow().boxes.clone()
    }

    /// Drains the queued renderer intents.
    pub fn take_effects(&self) -> Vec<NotifyEffect> {
        std::mem::take(&mut self.state.borrow_mut().effects)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn center() -> NotificationCenter {
        let center = NotificationCenter::default();
        center.set_has_section(true);
        center
    }

    #[test]
    fn aborts_and_validation_errors_never_become_boxes() {
        let center = center();
        center.surface(NormalizedError::of_kind(ErrorKind::Abort));
        center.surface(NormalizedError::of_kind(ErrorKind::Validation));
        assert_eq!(center.boxes(), vec![]);
        assert_eq!(center.take_effects(), vec![]);
    }

    #[test]
    fn surfaced_errors_show_a_box_and_scroll_to_it() {
        let center = center();
        center.surface(NormalizedError::of_kind(ErrorKind::Conflict));
        let boxes = center.boxes();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].error.kind, ErrorKind::Conflict);
        assert_eq!(
            center.take_effects(),
            vec![NotifyEffect::ShowBox(0), NotifyEffect::ScrollToTop]
        );

        center.dismiss(0);
        assert_eq!(center.boxes(), vec![]);
        assert_eq!(center.take_effects(), vec![NotifyEffect::RemoveBox(0)]);
    }

    #[test]
    fn named_collisions_follow_the_policy() {
        let center = center();
        let err = |kind| NormalizedError::of_kind(kind);

        center.surface_named(Some("fetch"), BoxCollision::Add, err(ErrorKind::Http));
        center.surface_named(Some("fetch"), BoxCollision::Suppress, err(ErrorKind::Timeout));
        assert_eq!(center.boxes().len(), 1);
        assert_eq!(center.boxes()[0].error.kind, ErrorKind::Http);

        center.surface_named(Some("fetch"), BoxCollision::Replace, err(ErrorKind::Timeout));
        assert_eq!(center.boxes().len(), 1);
        assert_eq!(center.boxes()[0].error.kind, ErrorKind::Timeout);

        center.surface_named(Some("fetch"), BoxCollision::Add, err(ErrorKind::Http));
        assert_eq!(center.boxes().len(), 2);
    }

    #[test]
    fn pages_without_a_section_open_a_message_dialog() {
        let center = NotificationCenter::default();
        center.surface(NormalizedError::of_kind(ErrorKind::Service));
        assert_eq!(center.boxes(), vec![]);
        let effects = center.take_effects();
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], NotifyEffect::OpenMessageDialog(ref e) if e.kind == ErrorKind::Service));
    }
}
