//! Typed host seams for the console runtime: transport, scheduling, and
//! time.
//!
//! This crate is the API-first boundary between the pure runtime state
//! machines and whatever host actually performs I/O. It exposes object-safe
//! service traits with boxed futures plus in-memory and no-op
//! implementations so runtime behavior can be tested deterministically.

#![warn(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod scheduler;
pub mod time;
pub mod transport;

pub use scheduler::{ManualScheduler, NoopScheduler, ScheduledTask, Scheduler};
pub use time::{unix_time_ms_now, Clock, ManualClock, SystemClock};
pub use transport::{
    HttpTransport, MemoryTransport, NoopTransport, TransportFailure, TransportFailureKind,
    TransportFuture, TransportReply, TransportRequest,
};
