//! Shared console contracts used by the transport seams, the runtime state
//! machines, and any embedding shell.
//!
//! This crate is intentionally runtime-agnostic. It defines the serializable
//! error taxonomy, request descriptors, collision policies, and response
//! shapes without depending on a transport, a scheduler, or runtime
//! internals.

#![warn(missing_docs, rustdoc::broken_intra_doc_links)]

mod error;
mod request;

pub use error::{escape_markup, ErrorKind, NormalizedError};
pub use request::{
    CloseReason, CollisionPolicy, ConsoleResponse, Method, RequestBody, RequestDescriptor,
    ValidationMessage, CONTENT_TYPE_FORM, CONTENT_TYPE_JSON,
};
