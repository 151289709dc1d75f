//! End-to-end console flows over manual time, a memory transport, and a
//! memory lock backend.

use std::{cell::RefCell, rc::Rc};

use futures::{executor::LocalPool, task::LocalSpawnExt};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use console_contract::{CloseReason, ErrorKind, NormalizedError};
use console_runtime::{
    AcceptAll, ConsoleContext, ConsoleServices, Dialog, DialogKind, DialogOptions, DialogOutcome,
    DialogState, FormConfig, FormEffect, FormSubmission, LockConfig, MemoryLockService, ShadeKind,
    TopLayer,
};
use platform_transport::{ManualClock, ManualScheduler, MemoryTransport, TransportReply};

struct Console {
    pool: LocalPool,
    ctx: ConsoleContext,
    scheduler: ManualScheduler,
    clock: ManualClock,
    transport: MemoryTransport,
    locks: MemoryLockService,
}

fn console() -> Console {
    let pool = LocalPool::new();
    let clock = ManualClock::starting_at(0);
    let scheduler = ManualScheduler::with_clock(clock.clone());
    let transport = MemoryTransport::default();
    let locks = MemoryLockService::default();
    let ctx = ConsoleContext::new(ConsoleServices {
        transport: Rc::new(transport.clone()),
        scheduler: Rc::new(scheduler.clone()),
        clock: Rc::new(clock.clone()),
        spawner: Rc::new(pool.spawner()),
        lock_service: Some(Rc::new(locks.clone())),
        lock_config: LockConfig::default(),
    });
    ctx.notifications().set_has_section(true);
    Console {
        pool,
        ctx,
        scheduler,
        clock,
        transport,
        locks,
    }
}

fn open_edit_dialog(
    console: &mut Console,
    resource: &str,
) -> (Dialog, Rc<RefCell<Option<DialogOutcome>>>) {
    let dialog = Dialog::new(
        &console.ctx,
        DialogOptions {
            kind: DialogKind::Form,
            lock_resource: Some(resource.to_string()),
            layout: None,
        },
    );
    let outcome: Rc<RefCell<Option<DialogOutcome>>> = Rc::new(RefCell::new(None));
    let seen = outcome.clone();
    let opened = dialog.open();
    console
        .pool
        .spawner()
        .spawn_local(async move {
            if let Ok(settled) = opened.await {
                *seen.borrow_mut() = Some(settled);
            }
        })
        .expect("spawn open");
    console.pool.run_until_stalled();
    (dialog, outcome)
}

#[test]
fn edit_dialog_opens_degraded_when_the_lock_is_held_elsewhere() {
    let mut console = console();
    console.locks.enqueue_acquire(Err(NormalizedError::of_kind(
        ErrorKind::Locked,
    )));

    let (dialog, _outcome) = open_edit_dialog(&mut console, "entry:14");

    assert_eq!(dialog.state(), DialogState::Open);
    assert!(!dialog.has_lock());

    // The session keeps retrying on the degraded cadence and recovers.
    console.locks.enqueue_acquire(Ok("tok-14".to_string()));
    console.scheduler.advance(10_000);
    console.pool.run_until_stalled();
    assert!(dialog.has_lock());

    dialog.close(CloseReason::Cancel, Value::Null).expect("close");
    console.pool.run_until_stalled();
    assert_eq!(
        console.locks.releases(),
        vec![("entry:14".to_string(), "tok-14".to_string())]
    );
}

#[test]
fn server_validation_keeps_the_dialog_open_and_marks_the_field() {
    let mut console = console();
    console.locks.enqueue_acquire(Ok("tok-14".to_string()));
    let (dialog, _outcome) = open_edit_dialog(&mut console, "entry:14");

    let form = FormSubmission::new(
        dialog.clone(),
        FormConfig::post("/dictionary/entries/14"),
        Rc::new(AcceptAll),
    );
    let submit = form.submit(json!({ "name": "" }));
    console
        .pool
        .spawner()
        .spawn_local(async move {
            let _ = submit.await;
        })
        .expect("spawn submit");
    console.pool.run_until_stalled();

    console.transport.settle_next(Ok(TransportReply::json(
        422,
        r#"{"errorType":"validation","title":"Validation","message":"Fix the fields","detail":[{"key":"name","error":"Required"}]}"#,
    )));
    console.pool.run_until_stalled();

    assert_eq!(dialog.state(), DialogState::Open);
    assert_eq!(console.ctx.notifications().boxes(), vec![]);
    let effects = form.take_effects();
    assert!(effects.contains(&FormEffect::ScrollToField("name".to_string())));
    let field_errors = effects.iter().find_map(|effect| match effect {
        FormEffect::RenderFieldErrors(map) => Some(map.clone()),
        _ => None,
    });
    assert_eq!(
        field_errors.expect("field errors rendered")["name"],
        vec!["Required".to_string()]
    );
}

#[test]
fn successful_submit_closes_the_dialog_and_refreshes_the_page() {
    let mut console = console();
    console.locks.enqueue_acquire(Ok("tok-14".to_string()));

    let refreshed: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let seen = refreshed.clone();
    console.ctx.set_refresh(move |payload| {
        *seen.borrow_mut() = Some(payload);
    });

    let (dialog, outcome) = open_edit_dialog(&mut console, "entry:14");
    let form = FormSubmission::new(
        dialog.clone(),
        FormConfig::post("/dictionary/entries/14"),
        Rc::new(AcceptAll),
    );
    let submit = form.submit(json!({ "name": "Avocet" }));
    console
        .pool
        .spawner()
        .spawn_local(async move {
            let _ = submit.await;
        })
        .expect("spawn submit");
    console.pool.run_until_stalled();
    assert_eq!(console.transport.sent_len(), 1);
    assert_eq!(console.transport.sent()[0].url, "/dictionary/entries/14");

    console.transport.settle_next(Ok(TransportReply::json(
        200,
        r#"{"id":14,"name":"Avocet","rev":"2-bc"}"#,
    )));
    console.pool.run_until_stalled();

    assert_eq!(dialog.state(), DialogState::Closed);
    let settled = outcome.borrow().clone().expect("outcome settled");
    assert_eq!(settled.reason, CloseReason::Submit);
    assert_eq!(settled.payload["name"], json!("Avocet"));
    assert_eq!(
        refreshed.borrow().clone().expect("refresh ran")["id"],
        json!(14)
    );
    // The lock was released with the dialog.
    assert_eq!(console.locks.releases().len(), 1);
    // Everything torn down; the page is back to the base document.
    assert_eq!(
        console.ctx.inspect_layers(|layers| layers.derived().top),
        TopLayer::Base
    );
}

#[test]
fn overlapping_loading_shades_coalesce_and_release_cleanly() {
    let console = console();

    let (first, second) = console.ctx.with_layers(|layers| {
        let (first, effects_a) = layers.acquire_shade(ShadeKind::Loading);
        let (second, mut effects_b) = layers.acquire_shade(ShadeKind::Loading);
        let mut effects = effects_a;
        effects.append(&mut effects_b);
        ((first, second), effects)
    });
    assert_eq!(first.id(), second.id());
    assert_eq!(
        console
            .ctx
            .inspect_layers(|layers| layers.shade_ref_count(first.id())),
        Some(2)
    );

    let budget = console.ctx.inspect_layers(|layers| layers.z_budget());
    console
        .ctx
        .try_with_layers(|layers| layers.release_shade(&first))
        .expect("first release");
    assert_eq!(
        console.ctx.inspect_layers(|layers| layers.live_shade_count()),
        1
    );
    console
        .ctx
        .try_with_layers(|layers| layers.release_shade(&second))
        .expect("second release");
    assert_eq!(
        console.ctx.inspect_layers(|layers| layers.live_shade_count()),
        0
    );
    assert!(console.ctx.inspect_layers(|layers| layers.z_budget()) < budget);
    assert_eq!(
        console.ctx.inspect_layers(|layers| layers.derived().top),
        TopLayer::Base
    );
}

#[test]
fn lease_expiry_is_observable_while_renewals_hang() {
    let mut console = console();
    console.locks.enqueue_acquire(Ok("tok-14".to_string()));
    let (dialog, _outcome) = open_edit_dialog(&mut console, "entry:14");
    assert!(dialog.has_lock());

    // The 45s renewal parks unanswered; the lease runs out at 90s.
    console.scheduler.advance(45_000);
    console.pool.run_until_stalled();
    assert!(dialog.has_lock());

    console.scheduler.advance(44_999);
    assert!(dialog.has_lock());
    console.clock.advance(1);
    assert!(!dialog.has_lock());

    // A late successful renewal restores the lease.
    assert!(console.locks.settle_next_acquire(Ok("tok-14".to_string())));
    console.pool.run_until_stalled();
    assert!(dialog.has_lock());
}
