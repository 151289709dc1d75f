//! Dialog lifecycle over the layer stack.
//!
//! A dialog starts parked (rendered but invisible, inside a parking layer),
//! moves through `Opening` while it acquires its shade, content layer, and
//! optional edit lock, sits `Open` until closed, and settles its outcome
//! exactly once. Closing is the strict reverse of opening.

use std::{cell::RefCell, rc::Rc};

use futures::{channel::oneshot, future::LocalBoxFuture, FutureExt};
use serde_json::Value;
use thiserror::Error;

use console_contract::CloseReason;

use crate::{
    context::ConsoleContext,
    layers::{LayerEffect, LayerError, ShadeHandle},
    lock::LockSession,
    model::{LayerId, ShadeKind},
    registry::RequestRegistry,
};

/// Lifecycle phase of a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogState {
    /// Rendered into a parking layer, invisible, awaiting `open`.
    #[default]
    Parked,
    /// Acquiring shade, content layer, and optional lock.
    Opening,
    /// Visible and interactive.
    Open,
    /// Tearing down layers and releasing the lock.
    Closing,
    /// Fully torn down; the outcome has settled.
    Closed,
}

/// What kind of dialog this is; drives chrome and default buttons in the
/// renderer, not behavior here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogKind {
    #[default]
    Plain,
    Form,
    Confirmation,
}

/// Lifecycle contract violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DialogError {
    /// `open` requires the `Parked` state.
    #[error("cannot open a dialog in the {0:?} state")]
    InvalidOpen(DialogState),
    /// `close` requires the `Open` state.
    #[error("cannot close a dialog in the {0:?} state")]
    InvalidClose(DialogState),
    #[error(transparent)]
    Layer(#[from] LayerError),
}

/// The settled result of one dialog: why it closed and what it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogOutcome {
    pub reason: CloseReason,
    pub payload: Value,
}

/// Construction options.
#[derive(Debug, Clone, Default)]
pub struct DialogOptions {
    pub kind: DialogKind,
    /// Resource to hold a pessimistic lock on while the dialog is open.
    pub lock_resource: Option<String>,
    pub layout: Option<LayoutConstraints>,
}

struct DialogInner {
    context: ConsoleContext,
    kind: DialogKind,
    layout: Option<LayoutConstraints>,
    registry: RequestRegistry,
    lock: Option<LockSession>,
    state: RefCell<DialogMut>,
}

struct DialogMut {
    state: DialogState,
    parking: Option<LayerId>,
    shade: Option<ShadeHandle>,
    content: Option<LayerId>,
    sender: Option<oneshot::Sender<DialogOutcome>>,
    receiver: Option<oneshot::Receiver<DialogOutcome>>,
}

/// One dialog instance. Clones share the same lifecycle.
#[derive(Clone)]
pub struct Dialog {
    inner: Rc<DialogInner>,
}

impl Dialog {
    /// Creates a parked dialog: its parking layer exists immediately so the
    /// renderer can mount the (invisible) dialog content.
    pub fn new(context: &ConsoleContext, options: DialogOptions) -> Self {
        let parking = context.with_layers(|layers| (layers.push_parking_layer(), Vec::new()));
        let lock = options
            .lock_resource
            .as_deref()
            .and_then(|resource| context.lock_session(resource));
        let (sender, receiver) = oneshot::channel();
        Self {
            inner: Rc::new(DialogInner {
                context: context.clone(),
                kind: options.kind,
                layout: options.layout,
                registry: context.new_registry(),
                lock,
                state: RefCell::new(DialogMut {
                    state: DialogState::Parked,
                    parking: Some(parking),
                    shade: None,
                    content: None,
                    sender: Some(sender),
                    receiver: Some(receiver),
                }),
            }),
        }
    }

    pub fn state(&self) -> DialogState {
        self.inner.state.borrow().state
    }

    pub fn kind(&self) -> DialogKind {
        self.inner.kind
    }

    /// Request registry scoped to this dialog's lifetime.
    pub fn registry(&self) -> &RequestRegistry {
        &self.inner.registry
    }

    /// The page context the dialog was created on.
    pub fn context(&self) -> &ConsoleContext {
        &self.inner.context
    }

    /// Solves the dialog's geometry against the current viewport, when
    /// layout constraints were configured.
    pub fn layout(&self, viewport_height: u32) -> Option<DialogLayout> {
        self.inner
            .layout
            .as_ref()
            .map(|constraints| solve_layout(viewport_height, constraints))
    }

    /// Whether the dialog currently trusts its edit-lock lease. Lockless
    /// dialogs answer `false`.
    pub fn has_lock(&self) -> bool {
        self.inner.lock.as_ref().map_or(false, LockSession::has_lock)
    }

    /// Opens the dialog and resolves with its settled outcome.
    ///
    /// Opening acquires a normal shade, pushes the content layer, drops the
    /// parking layer, then gates on the first lock attempt when a lock
    /// resource was configured. A failed first attempt still opens the
    /// dialog; it runs degraded with `has_lock` answering `false` while the
    /// session retries.
    pub fn open(&self) -> LocalBoxFuture<'static, Result<DialogOutcome, DialogError>> {
        let staged = self.stage_open();
        let this = self.clone();
        async move {
            let receiver = staged?;
            if let Some(lock) = this.inner.lock.clone() {
                lock.lock().await;
            }
            let content = {
                let mut state = this.inner.state.borrow_mut();
                state.state = DialogState::Open;
                state.content
            };
            if let Some(content) = content {
                this.inner
                    .context
                    .emit_layer_effect(LayerEffect::FocusInto(content));
            }
            match receiver.await {
                Ok(outcome) => Ok(outcome),
                // The dialog was dropped without closing; treat as dismissal.
                Err(_cancelled) => Ok(DialogOutcome {
                    reason: CloseReason::Dismiss,
                    payload: Value::Null,
                }),
            }
        }
        .boxed_local()
    }

    fn stage_open(&self) -> Result<oneshot::Receiver<DialogOutcome>, DialogError> {
        let mut state = self.inner.state.borrow_mut();
        if state.state != DialogState::Parked {
            return Err(DialogError::InvalidOpen(state.state));
        }
        state.state = DialogState::Opening;
        let parking = state.parking.take();
        drop(state);

        let shade = self
            .inner
            .context
            .with_layers(|layers| layers.acquire_shade(ShadeKind::Normal));
        let content = self
            .inner
            .context
            .with_layers(|layers| layers.push_content_layer());
        if let Some(parking) = parking {
            self.inner
                .context
                .try_with_layers(|layers| layers.pop_parking_layer(parking).map(|()| Vec::new()))?;
        }

        let mut state = self.inner.state.borrow_mut();
        state.shade = Some(shade);
        state.content = Some(content);
        let receiver = state.receiver.take();
        match receiver {
            Some(receiver) => Ok(receiver),
            // A previous open already consumed the receiver.
            None => Err(DialogError::InvalidOpen(DialogState::Opening)),
        }
    }

    /// Closes an open dialog, settling its outcome exactly once.
    ///
    /// Teardown reverses opening: the lock is released first, then the shade,
    /// then the dialog returns to a parking layer before the content layer is
    /// popped, so the renderer unmounts from an invisible layer.
    pub fn close(&self, reason: CloseReason, payload: Value) -> Result<(), DialogError> {
        let (shade, content, sender) = {
            let mut state = self.inner.state.borrow_mut();
            if state.state != DialogState::Open {
                return Err(DialogError::InvalidClose(state.state));
            }
            state.state = DialogState::Closing;
            (state.shade.take(), state.content.take(), state.sender.take())
        };

        if let Some(lock) = &self.inner.lock {
            lock.unlock();
        }
        if let Some(shade) = shade {
            self.inner
                .context
                .try_with_layers(|layers| layers.release_shade(&shade))?;
        }
        if let Some(content) = content {
            let parking = self
                .inner
                .context
                .with_layers(|layers| (layers.push_parking_layer(), Vec::new()));
            self.inner
                .context
                .try_with_layers(|layers| layers.pop_content_layer(content))?;
            self.inner
                .context
                .try_with_layers(|layers| layers.pop_parking_layer(parking).map(|()| Vec::new()))?;
        }

        self.inner.registry.shutdown();
        if let Some(sender) = sender {
            let _ = sender.send(DialogOutcome { reason, payload });
        }
        self.inner.state.borrow_mut().state = DialogState::Closed;
        Ok(())
    }
}

/// Height constraints for the layout solver, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayoutConstraints {
    /// Hard floor; chrome must stay usable even on tiny viewports.
    pub min_height: u32,
    /// Viewport fraction the dialog may occupy, in percent.
    pub max_viewport_ratio: u32,
    /// Fixed chrome (title bar, button row) height.
    pub chrome_height: u32,
    /// Natural height of the scrollable content.
    pub content_height: u32,
}

/// Solved dialog geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialogLayout {
    /// Overall dialog height.
    pub height: u32,
    /// Height granted to the scrollable content region.
    pub scroll_height: u32,
    /// Whether the content overflows and must scroll.
    pub scrollable: bool,
}

/// Solves dialog height against ranked constraints: the minimum height wins
/// over the viewport cap, which wins over showing all content.
pub fn solve_layout(viewport_height: u32, constraints: &LayoutConstraints) -> DialogLayout {
    let desired = constraints
        .chrome_height
        .saturating_add(constraints.content_height);
    let cap = viewport_height.saturating_mul(constraints.max_viewport_ratio) / 100;
    let height = desired.min(cap).max(constraints.min_height);
    let scroll_height = height.saturating_sub(constraints.chrome_height);
    DialogLayout {
        height,
        scroll_height,
        scrollable: scroll_height < constraints.content_height,
    }
}

#[cfg(test)]
mod tests {
    use futures::{executor::LocalPool, task::LocalSpawnExt};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use platform_transport::{ManualClock, ManualScheduler, MemoryTransport, SystemClock};

    use crate::context::ConsoleServices;
    use crate::lock::{LockConfig, MemoryLockService};
    use crate::model::TopLayer;

    use super::*;

    fn context(pool: &LocalPool) -> ConsoleContext {
        let clock = ManualClock::starting_at(0);
        ConsoleContext::new(ConsoleServices {
            transport: Rc::new(MemoryTransport::default()),
            scheduler: Rc::new(ManualScheduler::with_clock(clock.clone())),
            clock: Rc::new(clock),
            spawner: Rc::new(pool.spawner()),
            lock_service: None,
            lock_config: LockConfig::default(),
        })
    }

    fn spawn_outcome(
        pool: &LocalPool,
        future: LocalBoxFuture<'static, Result<DialogOutcome, DialogError>>,
    ) -> Rc<RefCell<Option<Result<DialogOutcome, DialogError>>>> {
        let slot = Rc::new(RefCell::new(None));
        let out = slot.clone();
        pool.spawner()
            .spawn_local(async move {
                *out.borrow_mut() = Some(future.await);
            })
            .expect("spawn outcome task");
        slot
    }

    #[test]
    fn open_then_close_settles_the_outcome_once() {
        let mut pool = LocalPool::new();
        let ctx = context(&pool);
        let dialog = Dialog::new(&ctx, DialogOptions::default());
        assert_eq!(dialog.state(), DialogState::Parked);

        let outcome = spawn_outcome(&pool, dialog.open());
        pool.run_until_stalled();
        assert_eq!(dialog.state(), DialogState::Open);
        assert_eq!(ctx.inspect_layers(|layers| layers.live_shade_count()), 1);

        dialog
            .close(CloseReason::Submit, json!({ "id": 7 }))
            .expect("close");
        pool.run_until_stalled();
        assert_eq!(dialog.state(), DialogState::Closed);
        assert_eq!(
            outcome.borrow().clone().expect("settled").expect("outcome"),
            DialogOutcome {
                reason: CloseReason::Submit,
                payload: json!({ "id": 7 }),
            }
        );
        assert_eq!(ctx.inspect_layers(|layers| layers.live_shade_count()), 0);
        assert_eq!(
            ctx.inspect_layers(|layers| layers.derived().top),
            TopLayer::Base
        );
    }

    #[test]
    fn opening_emits_focus_into_the_content_layer() {
        let mut pool = LocalPool::new();
        let ctx = context(&pool);
        let dialog = Dialog::new(&ctx, DialogOptions::default());

        let _outcome = spawn_outcome(&pool, dialog.open());
        pool.run_until_stalled();

        let effects = ctx.take_layer_effects();
        let focused = effects
            .iter()
            .any(|effect| matches!(effect, LayerEffect::FocusInto(_)));
        assert!(focused, "expected FocusInto, got {effects:?}");
    }

    #[test]
    fn double_open_and_early_close_are_contract_violations() {
        let mut pool = LocalPool::new();
        let ctx = context(&pool);
        let dialog = Dialog::new(&ctx, DialogOptions::default());

        assert_eq!(
            dialog.close(CloseReason::Cancel, Value::Null),
            Err(DialogError::InvalidClose(DialogState::Parked))
        );

        let _outcome = spawn_outcome(&pool, dialog.open());
        pool.run_until_stalled();

        let again = spawn_outcome(&pool, dialog.open());
        pool.run_until_stalled();
        assert_eq!(
            again.borrow().clone().expect("settled"),
            Err(DialogError::InvalidOpen(DialogState::Open))
        );

        dialog.close(CloseReason::Cancel, Value::Null).expect("close");
        assert_eq!(
            dialog.close(CloseReason::Cancel, Value::Null),
            Err(DialogError::InvalidClose(DialogState::Closed))
        );
    }

    #[test]
    fn locked_dialog_opens_degraded_when_the_first_acquire_fails() {
        let mut pool = LocalPool::new();
        let clock = ManualClock::starting_at(0);
        let lock_service = MemoryLockService::default();
        let ctx = ConsoleContext::new(ConsoleServices {
            transport: Rc::new(MemoryTransport::default()),
            scheduler: Rc::new(ManualScheduler::with_clock(clock.clone())),
            clock: Rc::new(clock),
            spawner: Rc::new(pool.spawner()),
            lock_service: Some(Rc::new(lock_service.clone())),
            lock_config: LockConfig::default(),
        });
        lock_service.enqueue_acquire(Err(
            console_contract::NormalizedError::of_kind(console_contract::ErrorKind::Locked),
        ));

        let dialog = Dialog::new(
            &ctx,
            DialogOptions {
                kind: DialogKind::Form,
                lock_resource: Some("entry:9".to_string()),
                layout: None,
            },
        );
        let _outcome = spawn_outcome(&pool, dialog.open());
        pool.run_until_stalled();

        assert_eq!(dialog.state(), DialogState::Open);
        assert!(!dialog.has_lock());
        assert_eq!(lock_service.acquire_len(), 1);
    }

    #[test]
    fn lock_gate_holds_the_dialog_in_opening_until_the_attempt_settles() {
        let mut pool = LocalPool::new();
        let clock = ManualClock::starting_at(0);
        let lock_service = MemoryLockService::default();
        let ctx = ConsoleContext::new(ConsoleServices {
            transport: Rc::new(MemoryTransport::default()),
            scheduler: Rc::new(ManualScheduler::with_clock(clock.clone())),
            clock: Rc::new(clock),
            spawner: Rc::new(pool.spawner()),
            lock_service: Some(Rc::new(lock_service.clone())),
            lock_config: LockConfig::default(),
        });

        let dialog = Dialog::new(
            &ctx,
            DialogOptions {
                kind: DialogKind::Form,
                lock_resource: Some("entry:9".to_string()),
                layout: None,
            },
        );
        let _outcome = spawn_outcome(&pool, dialog.open());
        pool.run_until_stalled();
        assert_eq!(dialog.state(), DialogState::Opening);

        lock_service.settle_next_acquire(Ok("tok-9".to_string()));
        pool.run_until_stalled();
        assert_eq!(dialog.state(), DialogState::Open);
        assert!(dialog.has_lock());

        dialog.close(CloseReason::Cancel, Value::Null).expect("close");
        pool.run_until_stalled();
        assert_eq!(
            lock_service.releases(),
            vec![("entry:9".to_string(), "tok-9".to_string())]
        );
    }

    #[test]
    fn layout_uses_natural_height_when_everything_fits() {
        let constraints = LayoutConstraints {
            min_height: 200,
            max_viewport_ratio: 80,
            chrome_height: 100,
            content_height: 300,
        };
        let layout = solve_layout(1000, &constraints);
        assert_eq!(
            layout,
            DialogLayout {
                height: 400,
                scroll_height: 300,
                scrollable: false,
            }
        );
    }

    #[test]
    fn layout_caps_at_the_viewport_ratio_and_scrolls_the_content() {
        let constraints = LayoutConstraints {
            min_height: 200,
            max_viewport_ratio: 80,
            chrome_height: 100,
            content_height: 900,
        };
        let layout = solve_layout(1000, &constraints);
        assert_eq!(
            layout,
            DialogLayout {
                height: 800,
                scroll_height: 700,
                scrollable: true,
            }
        );
    }

    #[test]
    fn layout_never_drops_below_the_minimum_height() {
        let constraints = LayoutConstraints {
            min_height: 200,
            max_viewport_ratio: 80,
            chrome_height: 100,
            content_height: 900,
        };
        let layout = solve_layout(100, &constraints);
        assert_eq!(
            layout,
            DialogLayout {
                height: 200,
                scroll_height: 100,
                scrollable: true,
            }
        );
    }

    #[test]
    fn layout_stays_total_on_extreme_inputs() {
        let constraints = LayoutConstraints {
            min_height: 200,
            max_viewport_ratio: 80,
            chrome_height: u32::MAX,
            content_height: u32::MAX,
        };
        let layout = solve_layout(u32::MAX, &constraints);
        assert_eq!(
            layout,
            DialogLayout {
                height: u32::MAX / 100,
                scroll_height: 0,
                scrollable: true,
            }
        );
    }

    #[test]
    fn dialogs_solve_layout_only_when_constraints_are_configured() {
        let pool = LocalPool::new();
        let ctx = context(&pool);
        let constraints = LayoutConstraints {
            min_height: 200,
            max_viewport_ratio: 80,
            chrome_height: 100,
            content_height: 300,
        };
        let sized = Dialog::new(
            &ctx,
            DialogOptions {
                kind: DialogKind::Plain,
                lock_resource: None,
                layout: Some(constraints),
            },
        );
        assert_eq!(
            sized.layout(1000),
            Some(solve_layout(1000, &constraints))
        );

        let unsized_dialog = Dialog::new(&ctx, DialogOptions::default());
        assert_eq!(unsized_dialog.layout(1000), None);
    }

    #[test]
    fn system_clock_contexts_construct() {
        let pool = LocalPool::new();
        let ctx = ConsoleContext::new(ConsoleServices {
            transport: Rc::new(MemoryTransport::default()),
            scheduler: Rc::new(platform_transport::NoopScheduler),
            clock: Rc::new(SystemClock),
            spawner: Rc::new(pool.spawner()),
            lock_service: None,
            lock_config: LockConfig::default(),
        });
        let dialog = Dialog::new(&ctx, DialogOptions::default());
        assert_eq!(dialog.state(), DialogState::Parked);
    }
}
