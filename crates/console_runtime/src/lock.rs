//! Pessimistic edit-lock leasing.
//!
//! A lock is a server-granted lease, not an open connection. The session
//! re-acquires it on a timer: every 45 seconds while renewal succeeds, every
//! 10 seconds while it fails, against a 90 second lease. Renewal attempts are
//! never pipelined; the next timer is armed only after the previous attempt
//! settles.

use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::Rc,
};

use futures::{
    channel::oneshot,
    future::LocalBoxFuture,
    task::{LocalSpawn, LocalSpawnExt},
    FutureExt,
};

use console_contract::{ErrorKind, NormalizedError, RequestDescriptor};
use platform_transport::{Clock, ScheduledTask, Scheduler};

use crate::registry::RequestRegistry;

/// Lease and renewal timing, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// How long a granted lease is trusted without a successful renewal.
    pub lease_ms: u64,
    /// Renewal period while the last attempt succeeded.
    pub nominal_period_ms: u64,
    /// Renewal period while the last attempt failed.
    pub retry_period_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ms: 90_000,
            nominal_period_ms: 45_000,
            retry_period_ms: 10_000,
        }
    }
}

/// Settlement of one acquire attempt: the server-issued lock token.
pub type LockFuture = LocalBoxFuture<'static, Result<String, NormalizedError>>;

/// Server-side lock operations. The session re-acquires through `acquire`;
/// passing the previously granted token renews in place.
pub trait LockService {
    /// Acquires or renews the lock on `resource`.
    fn acquire(&self, resource: &str, token: Option<&str>) -> LockFuture;
    /// Releases the lock identified by `token`.
    fn release(&self, resource: &str, token: &str) -> LockFuture;
}

/// Lock service backed by the console's lock endpoints.
pub struct HttpLockService {
    registry: RequestRegistry,
}

impl HttpLockService {
    pub fn new(registry: RequestRegistry) -> Self {
        Self { registry }
    }
}

impl LockService for HttpLockService {
    fn acquire(&self, resource: &str, token: Option<&str>) -> LockFuture {
        let mut payload = serde_json::json!({ "resource": resource });
        if let Some(token) = token {
            payload["token"] = serde_json::Value::String(token.to_string());
        }
        let request = self
            .registry
            .issue(RequestDescriptor::post_json("/console/lock", payload));
        async move {
            let response = request.await?;
            match response.payload.get("token").and_then(|v| v.as_str()) {
                Some(token) => Ok(token.to_string()),
                None => Err(NormalizedError::with_text(
                    ErrorKind::Parse,
                    "Lock Error",
                    "The lock grant carried no token.",
                )),
            }
        }
        .boxed_local()
    }

    fn release(&self, resource: &str, token: &str) -> LockFuture {
        let payload = serde_json::json!({ "resource": resource, "token": token });
        let request = self
            .registry
            .issue(RequestDescriptor::post_json("/console/unlock", payload));
        let token = token.to_string();
        async move {
            request.await?;
            Ok(token)
        }
        .boxed_local()
    }
}

#[derive(Default)]
struct MemoryLockState {
    scripted: VecDeque<Result<String, NormalizedError>>,
    pending: VecDeque<oneshot::Sender<Result<String, NormalizedError>>>,
    acquires: Vec<(String, Option<String>)>,
    releases: Vec<(String, String)>,
}

/// In-memory [`LockService`] double with scripted settlements.
#[derive(Clone, Default)]
pub struct MemoryLockService {
    state: Rc<RefCell<MemoryLockState>>,
}

impl MemoryLockService {
    /// Scripts the settlement of the next acquire attempt.
    pub fn enqueue_acquire(&self, settlement: Result<String, NormalizedError>) {
        self.state.borrow_mut().scripted.push_back(settlement);
    }

    /// Settles the oldest unscripted acquire attempt.
    pub fn settle_next_acquire(&self, settlement: Result<String, NormalizedError>) -> bool {
        let sender = self.state.borrow_mut().pending.pop_front();
        match sender {
            Some(sender) => sender.send(settlement).is_ok(),
            None => false,
        }
    }

    /// Every acquire attempt observed, as `(resource, renewal token)`.
    pub fn acquires(&self) -> Vec<(String, Option<String>)> {
        self.state.borrow().acquires.clone()
    }

    /// Every release observed, as `(resource, token)`.
    pub fn releases(&self) -> Vec<(String, String)> {
        self.state.borrow().releases.clone()
    }

    pub fn acquire_len(&self) -> usize {
        self.state.borrow().acquires.len()
    }
}

impl LockService for MemoryLockService {
    fn acquire(&self, resource: &str, token: Option<&str>) -> LockFuture {
        let mut state = self.state.borrow_mut();
        state
            .acquires
            .push((resource.to_string(), token.map(str::to_string)));
        if let Some(settlement) = state.scripted.pop_front() {
            return futures::future::ready(settlement).boxed_local();
        }
        let (sender, receiver) = oneshot::channel();
        state.pending.push_back(sender);
        async move {
            match receiver.await {
                Ok(settlement) => settlement,
                Err(_cancelled) => Err(NormalizedError::of_kind(ErrorKind::Abort)),
            }
        }
        .boxed_local()
    }

    fn release(&self, resource: &str, token: &str) -> LockFuture {
        self.state
            .borrow_mut()
            .releases
            .push((resource.to_string(), token.to_string()));
        let token = token.to_string();
        futures::future::ready(Ok(token)).boxed_local()
    }
}

struct LockState {
    running: bool,
    token: Option<String>,
    last_acquired_ms: Option<u64>,
    period_ms: u64,
    timer: Option<ScheduledTask>,
    attempt_in_flight: bool,
    first_settled: bool,
    first_waiters: Vec<oneshot::Sender<()>>,
}

struct LockInner {
    resource: String,
    config: LockConfig,
    service: Rc<dyn LockService>,
    scheduler: Rc<dyn Scheduler>,
    clock: Rc<dyn Clock>,
    spawner: Rc<dyn LocalSpawn>,
    state: RefCell<LockState>,
}

/// Renewal loop for one locked resource.
///
/// `lock` starts the loop and resolves once the first attempt settles,
/// whether or not it succeeded; a failed first attempt leaves the session
/// running in degraded retry cadence. `has_lock` answers from the lease
/// stamp alone.
#[derive(Clone)]
pub struct LockSession {
    inner: Rc<LockInner>,
}

impl LockSession {
    pub fn new(
        resource: impl Into<String>,
        config: LockConfig,
        service: Rc<dyn LockService>,
        scheduler: Rc<dyn Scheduler>,
        clock: Rc<dyn Clock>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            inner: Rc::new(LockInner {
                resource: resource.into(),
                config,
                service,
                scheduler,
                clock,
                spawner,
                state: RefCell::new(LockState {
                    running: false,
                    token: None,
                    last_acquired_ms: None,
                    period_ms: config.nominal_period_ms,
                    timer: None,
                    attempt_in_flight: false,
                    first_settled: false,
                    first_waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Starts the renewal loop. Resolves when the first acquire attempt of
    /// this run settles. Idempotent while running: a second call resolves on
    /// the same first settlement. A stopped session restarts with a fresh
    /// immediate attempt.
    pub fn lock(&self) -> LocalBoxFuture<'static, ()> {
        let (start, receiver) = {
            let mut state = self.inner.state.borrow_mut();
            let start = !state.running;
            if start {
                state.running = true;
                state.first_settled = false;
            }
            if state.first_settled {
                (start, None)
            } else {
                let (sender, receiver) = oneshot::channel();
                state.first_waiters.push(sender);
                (start, Some(receiver))
            }
        };
        if start {
            Self::run_attempt(&self.inner);
        }
        match receiver {
            None => futures::future::ready(()).boxed_local(),
            Some(receiver) => async move {
                let _ = receiver.await;
            }
            .boxed_local(),
        }
    }

    /// Stops renewing, forgets the lease stamp, and releases the lock in the
    /// background.
    pub fn unlock(&self) {
        let token = {
            let mut state = self.inner.state.borrow_mut();
            if !state.running {
                return;
            }
            state.running = false;
            state.last_acquired_ms = None;
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            state.token.take()
        };
        if let Some(token) = token {
            Self::release_in_background(&self.inner, token);
        }
    }

    fn release_in_background(inner: &Rc<LockInner>, token: String) {
        let release = inner.service.release(&inner.resource, &token);
        let spawned = inner.spawner.spawn_local(async move {
            if let Err(err) = release.await {
                log::warn!("lock release failed: {}", err.message);
            }
        });
        if let Err(err) = spawned {
            log::warn!("lock release spawn failed: {err}");
        }
    }

    /// Whether the lease is still trusted. Time-based: a session whose last
    /// successful acquire is older than the lease window answers `false`
    /// even while its retry loop keeps running.
    pub fn has_lock(&self) -> bool {
        let state = self.inner.state.borrow();
        match state.last_acquired_ms {
            Some(stamp) => stamp + self.inner.config.lease_ms > self.inner.clock.now_ms(),
            None => false,
        }
    }

    /// Current renewal cadence in milliseconds.
    pub fn current_period_ms(&self) -> u64 {
        self.inner.state.borrow().period_ms
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.borrow().running
    }

    fn run_attempt(inner: &Rc<LockInner>) {
        let token = {
            let mut state = inner.state.borrow_mut();
            if !state.running || state.attempt_in_flight {
                return;
            }
            state.attempt_in_flight = true;
            state.token.clone()
        };
        let attempt = inner.service.acquire(&inner.resource, token.as_deref());
        let weak = Rc::downgrade(inner);
        let spawned = inner.spawner.spawn_local(async move {
            let settlement = attempt.await;
            if let Some(inner) = weak.upgrade() {
                Self::settle_attempt(&inner, settlement);
            }
        });
        if let Err(err) = spawned {
            log::warn!("lock renewal spawn failed: {err}");
        }
    }

    fn settle_attempt(inner: &Rc<LockInner>, settlement: Result<String, NormalizedError>) {
        let (waiters, stale_token) = {
            let mut state = inner.state.borrow_mut();
            state.attempt_in_flight = false;
            let mut stale_token = None;
            match (state.running, settlement) {
                (true, Ok(token)) => {
                    state.token = Some(token);
                    state.last_acquired_ms = Some(inner.clock.now_ms());
                    state.period_ms = inner.config.nominal_period_ms;
                    state.first_settled = true;
                }
                (true, Err(err)) => {
                    log::warn!("lock renewal failed: {}", err.message);
                    state.last_acquired_ms = None;
                    state.period_ms = inner.config.retry_period_ms;
                    state.first_settled = true;
                }
                // The session stopped while this attempt was in flight; a
                // token granted now must go straight back to the server.
                (false, Ok(token)) => stale_token = Some(token),
                (false, Err(_)) => {}
            }
            (std::mem::take(&mut state.first_waiters), stale_token)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
        if let Some(token) = stale_token {
            Self::release_in_background(inner, token);
        }
        Self::arm_timer(inner);
    }

    fn arm_timer(inner: &Rc<LockInner>) {
        let mut state = inner.state.borrow_mut();
        if !state.running {
            return;
        }
        let weak = Rc::downgrade(inner);
        let task = inner.scheduler.schedule(
            state.period_ms,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::run_attempt(&inner);
                }
            }),
        );
        state.timer = Some(task);
    }
}
