//! Shared service bundle and per-page state threaded through every state
//! machine.
//!
//! The context replaces ambient globals: transport, scheduling, time, and
//! task spawning all arrive through [`ConsoleServices`], so tests substitute
//! manual doubles without touching the machines themselves.

use std::{cell::RefCell, rc::Rc};

use futures::task::LocalSpawn;
use serde_json::Value;

use platform_transport::{Clock, HttpTransport, Scheduler};

use crate::{
    layers::{LayerEffect, LayerStack},
    lock::{LockConfig, LockService, LockSession},
    notify::NotificationCenter,
    registry::RequestRegistry,
    revision::RevisionTracker,
};

/// Injected platform services.
#[derive(Clone)]
pub struct ConsoleServices {
    pub transport: Rc<dyn HttpTransport>,
    pub scheduler: Rc<dyn Scheduler>,
    pub clock: Rc<dyn Clock>,
    pub spawner: Rc<dyn LocalSpawn>,
    /// Lock backend; pages without pessimistic locking leave this unset.
    pub lock_service: Option<Rc<dyn LockService>>,
    /// Lease timing for sessions minted by [`ConsoleContext::lock_session`].
    pub lock_config: LockConfig,
}

type RefreshFn = Rc<dyn Fn(Value)>;

struct ContextInner {
    services: ConsoleServices,
    layers: RefCell<LayerStack>,
    notifications: NotificationCenter,
    revision: RevisionTracker,
    refresh: RefCell<Option<RefreshFn>>,
    layer_effects: RefCell<Vec<LayerEffect>>,
}

/// One page's shared state: the layer stack, the notification center, the
/// tracked revision, and the refresh hook dialogs invoke after a successful
/// submit.
#[derive(Clone)]
pub struct ConsoleContext {
    inner: Rc<ContextInner>,
}

impl ConsoleContext {
    pub fn new(services: ConsoleServices) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                services,
                layers: RefCell::new(LayerStack::new()),
                notifications: NotificationCenter::default(),
                revision: RevisionTracker::default(),
                refresh: RefCell::new(None),
                layer_effects: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Mints a request registry for one owning scope (the page itself, or a
    /// single dialog), sharing the page's revision tracker.
    pub fn new_registry(&self) -> RequestRegistry {
        RequestRegistry::new(
            self.inner.services.transport.clone(),
            self.inner.services.spawner.clone(),
            self.inner.revision.clone(),
        )
    }

    /// Runs `mutate` against the layer stack and queues the effects it
    /// produced for the renderer.
    pub fn with_layers<T>(&self, mutate: impl FnOnce(&mut LayerStack) -> (T, Vec<LayerEffect>)) -> T {
        let (value, effects) = mutate(&mut self.inner.layers.borrow_mut());
        self.inner.layer_effects.borrow_mut().extend(effects);
        value
    }

    /// Fallible variant of [`with_layers`](Self::with_layers); effects are
    /// queued only when the mutation succeeds.
    pub fn try_with_layers(
        &self,
        mutate: impl FnOnce(&mut LayerStack) -> Result<Vec<LayerEffect>, crate::layers::LayerError>,
    ) -> Result<(), crate::layers::LayerError> {
        let effects = mutate(&mut self.inner.layers.borrow_mut())?;
        self.inner.layer_effects.borrow_mut().extend(effects);
        Ok(())
    }

    /// Read-only view of the layer stack.
    pub fn inspect_layers<T>(&self, read: impl FnOnce(&LayerStack) -> T) -> T {
        read(&self.inner.layers.borrow())
    }

    /// Queues a single effect the machines emit outside a stack mutation.
    pub fn emit_layer_effect(&self, effect: LayerEffect) {
        self.inner.layer_effects.borrow_mut().push(effect);
    }

    /// Drains the queued renderer intents.
    pub fn take_layer_effects(&self) -> Vec<LayerEffect> {
        std::mem::take(&mut self.inner.layer_effects.borrow_mut())
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.inner.notifications
    }

    pub fn revision(&self) -> &RevisionTracker {
        &self.inner.revision
    }

    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.inner.services.scheduler.clone()
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        self.inner.services.clock.clone()
    }

    pub fn spawner(&self) -> Rc<dyn LocalSpawn> {
        self.inner.services.spawner.clone()
    }

    /// Installs the hook invoked with the submit payload after a dialog
    /// closes through a successful submit.
    pub fn set_refresh(&self, refresh: impl Fn(Value) + 'static) {
        *self.inner.refresh.borrow_mut() = Some(Rc::new(refresh));
    }

    /// Invokes the refresh hook, if installed.
    pub fn refresh(&self, payload: Value) {
        let hook = self.inner.refresh.borrow().clone();
        if let Some(hook) = hook {
            hook(payload);
        }
    }

    /// Creates a renewal session for `resource`, or `None` when the page has
    /// no lock backend.
    pub fn lock_session(&self, resource: &str) -> Option<LockSession> {
        let service = self.inner.services.lock_service.clone()?;
        Some(LockSession::new(
            resource,
            self.inner.services.lock_config,
            service,
            self.inner.services.scheduler.clone(),
            self.inner.services.clock.clone(),
            self.inner.services.spawner.clone(),
        ))
    }
}
