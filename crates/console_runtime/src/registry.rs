//! Named-request deduplication and the request/response/error pipeline.
//!
//! Each owning context (a dialog, a page section) holds its own registry.
//! Named requests are serialized through a per-name table whose entries are
//! removed atomically on settlement regardless of collision policy; the
//! table mutations themselves are synchronous with the single-threaded event
//! loop, so a second named call never races the first at the table level.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
};

use futures::{
    future::{AbortHandle, AbortRegistration, Abortable, LocalBoxFuture, Shared},
    task::{LocalSpawn, LocalSpawnExt},
    FutureExt,
};
use serde_json::Value;

use console_contract::{
    CollisionPolicy, ConsoleResponse, ErrorKind, Method, NormalizedError, RequestDescriptor,
};
use platform_transport::{HttpTransport, TransportFailure, TransportReply, TransportRequest};

use crate::{
    normalize::{normalize, RawFailure},
    revision::RevisionTracker,
};

/// Settlement future returned by [`RequestRegistry::issue`].
pub type RequestFuture = LocalBoxFuture<'static, Result<ConsoleResponse, NormalizedError>>;

type SharedRequest = Shared<RequestFuture>;

struct NamedEntry {
    epoch: u64,
    future: SharedRequest,
    abort: AbortHandle,
}

struct RegistryInner {
    transport: Rc<dyn HttpTransport>,
    spawner: Rc<dyn LocalSpawn>,
    revision: RevisionTracker,
    table: RefCell<HashMap<String, NamedEntry>>,
    alive: Cell<bool>,
    next_epoch: Cell<u64>,
    on_settled: RefCell<Option<Rc<dyn Fn()>>>,
}

impl RegistryInner {
    fn notify_settled(&self) {
        let hook = self.on_settled.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Per-context request issuer with named-promise deduplication.
#[derive(Clone)]
pub struct RequestRegistry {
    inner: Rc<RegistryInner>,
}

impl RequestRegistry {
    /// Creates a registry over the given transport and spawn seam, sharing
    /// the context's revision tracker.
    pub fn new(
        transport: Rc<dyn HttpTransport>,
        spawner: Rc<dyn LocalSpawn>,
        revision: RevisionTracker,
    ) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                transport,
                spawner,
                revision,
                table: RefCell::new(HashMap::new()),
                alive: Cell::new(true),
                next_epoch: Cell::new(1),
                on_settled: RefCell::new(None),
            }),
        }
    }

    /// Registers the hook invoked after every settlement, used by the shell
    /// to re-run layout-affecting recalculations.
    pub fn set_settled_hook(&self, hook: impl Fn() + 'static) {
        *self.inner.on_settled.borrow_mut() = Some(Rc::new(hook));
    }

    /// Whether the owning context is still alive.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.get()
    }

    /// Number of named requests currently tracked.
    pub fn in_flight_len(&self) -> usize {
        self.inner.table.borrow().len()
    }

    /// Issues one request under the descriptor's collision policy.
    ///
    /// Anonymous requests always perform a fresh call and are never stored.
    /// Named requests consult the table: `Suppress` converges on the
    /// in-flight settlement, `Error` rejects synchronously with
    /// [`ErrorKind::Abort`], `Abort` cancels the old transport call before
    /// issuing, and `Replace` issues anew while the superseded call settles
    /// unobserved.
    pub fn issue(&self, descriptor: RequestDescriptor) -> RequestFuture {
        if !self.inner.alive.get() {
            return futures::future::ready(Err(NormalizedError::of_kind(ErrorKind::Abort)))
                .boxed_local();
        }

        let policy = descriptor.effective_policy();
        let name = match (policy, descriptor.name.clone()) {
            (CollisionPolicy::Anonymous, _) | (_, None) => {
                return self.prepare_call(descriptor, None);
            }
            (_, Some(name)) => name,
        };

        {
            let table = self.inner.table.borrow();
            if let Some(entry) = table.get(&name) {
                match policy {
                    CollisionPolicy::Suppress => {
                        return entry.future.clone().boxed_local();
                    }
                    CollisionPolicy::Error => {
                        return futures::future::ready(Err(NormalizedError::of_kind(
                            ErrorKind::Abort,
                        )))
                        .boxed_local();
                    }
                    CollisionPolicy::Abort => entry.abort.abort(),
                    CollisionPolicy::Replace | CollisionPolicy::Anonymous => {}
                }
            }
        }

        let epoch = self.inner.next_epoch.get();
        self.inner.next_epoch.set(epoch + 1);
        let (abort, registration) = AbortHandle::new_pair();
        let base = self.prepare_call(descriptor, Some(registration));

        let weak = Rc::downgrade(&self.inner);
        let cleanup_name = name.clone();
        let wrapped: RequestFuture = async move {
            let result = base.await;
            if let Some(inner) = weak.upgrade() {
                let mut table = inner.table.borrow_mut();
                if table.get(&cleanup_name).map(|entry| entry.epoch) == Some(epoch) {
                    table.remove(&cleanup_name);
                }
            }
            result
        }
        .boxed_local();
        let shared = wrapped.shared();

        self.inner.table.borrow_mut().insert(
            name,
            NamedEntry {
                epoch,
                future: shared.clone(),
                abort,
            },
        );

        // Drive the call so it proceeds even when the caller drops its
        // handle (Replace leaves the superseded call to settle this way).
        let driver = shared.clone().map(|_| ());
        if let Err(err) = self.inner.spawner.spawn_local(driver) {
            log::warn!("request driver spawn failed: {err}");
        }

        shared.boxed_local()
    }

    /// Marks the context dead and aborts every in-flight named request so no
    /// stale continuation mutates destroyed state.
    pub fn shutdown(&self) {
        self.inner.alive.set(false);
        let entries: Vec<NamedEntry> = self.inner.table.borrow_mut().drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.abort.abort();
        }
    }

    fn prepare_call(
        &self,
        descriptor: RequestDescriptor,
        abort: Option<AbortRegistration>,
    ) -> RequestFuture {
        let transport = self.inner.transport.clone();
        let revision = self.inner.revision.clone();
        let weak = Rc::downgrade(&self.inner);

        let method = descriptor.method;
        let mut headers = descriptor.headers.clone();
        if let Some(conditional) = revision.conditional_header(method) {
            headers.push(conditional);
        }
        let request = TransportRequest {
            url: descriptor.url.clone(),
            method,
            content_type: descriptor.resolved_content_type(),
            headers,
            body: descriptor.body.encode(method),
            timeout_ms: descriptor.timeout_ms,
        };

        async move {
            let sent = transport.send(request);
            let outcome = match abort {
                Some(registration) => match Abortable::new(sent, registration).await {
                    Ok(outcome) => outcome,
                    Err(_aborted) => Err(TransportFailure::cancelled()),
                },
                None => sent.await,
            };
            let result = decode(method, outcome, &revision);
            settle_against(&weak, result)
        }
        .boxed_local()
    }
}

/// Runs the settlement hook and downgrades results for a dead context to an
/// abort so stale continuations cannot act on them.
fn settle_against(
    weak: &Weak<RegistryInner>,
    result: Result<ConsoleResponse, NormalizedError>,
) -> Result<ConsoleResponse, NormalizedError> {
    let Some(inner) = weak.upgrade() else {
        return Err(NormalizedError::of_kind(ErrorKind::Abort));
    };
    inner.notify_settled();
    if !inner.alive.get() {
        return Err(NormalizedError::of_kind(ErrorKind::Abort));
    }
    result
}

fn decode(
    method: Method,
    outcome: Result<TransportReply, TransportFailure>,
    revision: &RevisionTracker,
) -> Result<ConsoleResponse, NormalizedError> {
    let reply = outcome.map_err(|failure| normalize(RawFailure::Transport(failure)))?;
    if reply.status >= 400 {
        return Err(normalize(RawFailure::Status {
            status: reply.status,
            body: reply.body,
        }));
    }

    let payload = if reply.body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&reply.body).map_err(|err| {
            normalize(RawFailure::Decode {
                detail: err.to_string(),
            })
        })?
    };

    let response = ConsoleResponse {
        status: reply.status,
        headers: reply.headers,
        payload,
    };
    revision.absorb(method, &response);
    Ok(response)
}
