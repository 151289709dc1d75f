//! Client-side lifecycle state machines for the Caboodle Dictionary console:
//! layered shade/content stacking, named-request deduplication, pessimistic
//! lock renewal, dialog lifecycle, and form submission.
//!
//! The runtime is single-threaded and callback-driven. Every state machine
//! here is pure over an injected service bundle ([`context::ConsoleContext`]);
//! rendering is an external collaborator that drains the effect intents the
//! machines emit.

pub mod context;
pub mod dialog;
pub mod form;
pub mod layers;
pub mod lock;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod registry;
pub mod revision;

pub use context::{ConsoleContext, ConsoleServices};
pub use dialog::{solve_layout, Dialog, DialogError, DialogKind, DialogLayout, DialogOptions,
    DialogOutcome, DialogState, LayoutConstraints};
pub use form::{AcceptAll, FormConfig, FormEffect, FormSubmission, Validator, WorkingState};
pub use layers::{LayerEffect, LayerError, LayerStack, ShadeHandle};
pub use lock::{
    HttpLockService, LockConfig, LockFuture, LockService, LockSession, MemoryLockService,
};
pub use model::{DerivedLayerState, LayerId, LayerKind, LayerRecord, ShadeKind, TopLayer};
pub use normalize::{normalize, RawFailure};
pub use notify::{BoxCollision, NotificationBox, NotificationCenter, NotifyEffect};
pub use registry::{RequestFuture, RequestRegistry};
pub use revision::RevisionTracker;
