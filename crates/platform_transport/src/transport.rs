//! HTTP-like transport seam with scripted in-memory and no-op
//! implementations.

use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    pin::Pin,
    rc::Rc,
};

use futures::channel::oneshot;
use serde::{Deserialize, Serialize};

use console_contract::Method;

/// Wire-level request handed to the transport after encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Negotiated content type.
    pub content_type: String,
    /// Request headers, conditional-request headers included.
    pub headers: Vec<(String, String)>,
    /// Encoded body, if any.
    pub body: Option<String>,
    /// Timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Raw transport reply prior to decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportReply {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Raw response body text.
    pub body: String,
}

impl TransportReply {
    /// Creates a JSON reply with the given status and body text.
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.into(),
        }
    }
}

/// Transport-level failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportFailureKind {
    /// The server could not be reached.
    Network,
    /// The call exceeded its timeout.
    Timeout,
    /// The call was cancelled before completion.
    Cancelled,
}

/// Raw transport failure before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFailure {
    /// Failure classification.
    pub kind: TransportFailureKind,
    /// Transport-supplied detail text.
    pub message: String,
}

impl TransportFailure {
    /// Network-unreachable failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: TransportFailureKind::Network,
            message: message.into(),
        }
    }

    /// Timeout failure.
    pub fn timeout() -> Self {
        Self {
            kind: TransportFailureKind::Timeout,
            message: "transport timeout".to_string(),
        }
    }

    /// Cancellation failure.
    pub fn cancelled() -> Self {
        Self {
            kind: TransportFailureKind::Cancelled,
            message: "transport call cancelled".to_string(),
        }
    }
}

/// Object-safe boxed future returned by [`HttpTransport::send`].
pub type TransportFuture = Pin<Box<dyn Future<Output = Result<TransportReply, TransportFailure>>>>;

/// HTTP-like transport seam consumed by the request registry.
pub trait HttpTransport {
    /// Performs one wire call.
    fn send(&self, request: TransportRequest) -> TransportFuture;
}

/// Transport that fails every call with a network failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

impl HttpTransport for NoopTransport {
    fn send(&self, _request: TransportRequest) -> TransportFuture {
        Box::pin(async { Err(TransportFailure::network("transport unavailable")) })
    }
}

struct PendingCall {
    sender: Option<oneshot::Sender<Result<TransportReply, TransportFailure>>>,
}

#[derive(Default)]
struct MemoryTransportState {
    scripted: VecDeque<Result<TransportReply, TransportFailure>>,
    pending: VecDeque<PendingCall>,
    sent: Vec<TransportRequest>,
}

/// Scripted in-memory transport for deterministic tests.
///
/// Calls consume scripted settlements in order; when the script is empty the
/// call stays in flight until the test settles it explicitly, which is what
/// collision-policy tests need.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Rc<RefCell<MemoryTransportState>>,
}

impl MemoryTransport {
    /// Scripts the next settlement.
    pub fn enqueue(&self, settlement: Result<TransportReply, TransportFailure>) {
        self.inner.borrow_mut().scripted.push_back(settlement);
    }

    /// Scripts a successful JSON reply.
    pub fn enqueue_json(&self, status: u16, body: impl Into<String>) {
        self.enqueue(Ok(TransportReply::json(status, body)));
    }

    /// Scripts a transport failure.
    pub fn enqueue_failure(&self, failure: TransportFailure) {
        self.enqueue(Err(failure));
    }

    /// Requests sent so far.
    pub fn sent(&self) -> Vec<TransportRequest> {
        self.inner.borrow().sent.clone()
    }

    /// Number of calls sent so far.
    pub fn sent_len(&self) -> usize {
        self.inner.borrow().sent.len()
    }

    /// Number of calls currently in flight.
    pub fn pending_len(&self) -> usize {
        self.inner
            .borrow()
            .pending
            .iter()
            .filter(|call| call.sender.is_some())
            .count()
    }

    /// Settles the oldest still-listening in-flight call; returns whether
    /// one accepted the settlement. Calls whose caller already dropped the
    /// future (for example after an abort) are skipped.
    pub fn settle_next(&self, settlement: Result<TransportReply, TransportFailure>) -> bool {
        let mut settlement = settlement;
        loop {
            let sender = {
                let mut state = self.inner.borrow_mut();
                loop {
                    let Some(mut call) = state.pending.pop_front() else {
                        break None;
                    };
                    if let Some(sender) = call.sender.take() {
                        break Some(sender);
                    }
                }
            };
            let Some(sender) = sender else {
                return false;
            };
            match sender.send(settlement) {
                Ok(()) => return true,
                Err(returned) => settlement = returned,
            }
        }
    }
}

impl HttpTransport for MemoryTransport {
    fn send(&self, request: TransportRequest) -> TransportFuture {
        let mut state = self.inner.borrow_mut();
        state.sent.push(request);

        if let Some(settlement) = state.scripted.pop_front() {
            return Box::pin(async move { settlement });
        }

        let (sender, receiver) = oneshot::channel();
        state.pending.push_back(PendingCall {
            sender: Some(sender),
        });
        Box::pin(async move {
            match receiver.await {
                Ok(settlement) => settlement,
                Err(_) => Err(TransportFailure::cancelled()),
            }
        })
    }
}
