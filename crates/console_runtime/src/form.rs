//! Form submission over a dialog: local validation, the deduplicated submit
//! request, working affordances, and inline server validation rendering.
//!
//! A submit that fails local validation never reaches the wire. The wire
//! call itself is a named request under the `Suppress` policy, so hammering
//! the submit button converges every invocation onto the single in-flight
//! request.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use futures::{future::LocalBoxFuture, FutureExt};
use serde_json::Value;

use console_contract::{
    CloseReason, CollisionPolicy, ErrorKind, Method, NormalizedError, RequestDescriptor,
    ValidationMessage,
};
use platform_transport::ScheduledTask;

use crate::dialog::Dialog;
use crate::notify::BoxCollision;

/// Local, synchronous validation run before any request is issued.
pub trait Validator {
    /// Returns every problem with the payload; an empty vec means valid.
    fn validate(&self, payload: &Value) -> Vec<ValidationMessage>;
}

/// Validator that accepts everything.
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _payload: &Value) -> Vec<ValidationMessage> {
        Vec::new()
    }
}

/// Submit-affordance phase, rendered on the form's submit button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkingState {
    #[default]
    Idle,
    /// The request is in flight.
    Working,
    /// The request has been in flight past the slow threshold.
    StillWorking,
    /// The request succeeded; the affordance dwells briefly before the
    /// dialog closes.
    Done,
}

/// Renderer-facing intents from a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEffect {
    /// Clear every rendered validation error.
    ClearErrors,
    /// Render per-field errors, keyed by field name.
    RenderFieldErrors(BTreeMap<String, Vec<String>>),
    /// Render form-level errors with no field to attach to.
    RenderFormErrors(Vec<String>),
    /// Scroll the first offending field into view.
    ScrollToField(String),
}

/// Submission wiring for one form dialog.
#[derive(Debug, Clone)]
pub struct FormConfig {
    pub action_url: String,
    pub method: Method,
    /// Delay before `Working` escalates to `StillWorking`.
    pub still_working_after_ms: u64,
    /// How long a successful submit shows `Done` before the dialog closes.
    pub done_dwell_ms: u64,
}

impl FormConfig {
    pub fn post(action_url: impl Into<String>) -> Self {
        Self {
            action_url: action_url.into(),
            method: Method::Post,
            still_working_after_ms: 5_000,
            done_dwell_ms: 1_500,
        }
    }
}

struct FormState {
    working: WorkingState,
    effects: Vec<FormEffect>,
    slow_timer: Option<ScheduledTask>,
}

/// Drives submits for one form dialog.
pub struct FormSubmission {
    dialog: Dialog,
    config: FormConfig,
    validator: Rc<dyn Validator>,
    state: Rc<RefCell<FormState>>,
}

impl FormSubmission {
    pub fn new(dialog: Dialog, config: FormConfig, validator: Rc<dyn Validator>) -> Self {
        Self {
            dialog,
            config,
            validator,
            state: Rc::new(RefCell::new(FormState {
                working: WorkingState::Idle,
                effects: Vec::new(),
                slow_timer: None,
            })),
        }
    }

    pub fn working_state(&self) -> WorkingState {
        self.state.borrow().working
    }

    /// The dialog this form submits through.
    pub fn dialog(&self) -> &Dialog {
        &self.dialog
    }

    /// Drains the queued renderer intents.
    pub fn take_effects(&self) -> Vec<FormEffect> {
        std::mem::take(&mut self.state.borrow_mut().effects)
    }

    /// Submits the payload.
    ///
    /// Resolves `Ok(true)` when the submit succeeded and the dialog closed,
    /// `Ok(false)` when the dialog stayed open (server validation, or a
    /// surfaced error), and `Err` only for local validation failures.
    pub fn submit(
        &self,
        payload: Value,
    ) -> LocalBoxFuture<'static, Result<bool, Vec<ValidationMessage>>> {
        let problems = self.validator.validate(&payload);
        if !problems.is_empty() {
            self.render_validation(&problems);
            return futures::future::ready(Err(problems)).boxed_local();
        }

        {
            let mut state = self.state.borrow_mut();
            state.effects.push(FormEffect::ClearErrors);
            if state.working == WorkingState::Idle {
                state.working = WorkingState::Working;
                state.slow_timer = Some(self.arm_slow_timer());
            }
        }

        let descriptor = RequestDescriptor::new(
            &self.config.action_url,
            self.config.method,
            console_contract::RequestBody::Json(payload.clone()),
        )
        .named("submit", CollisionPolicy::Suppress);
        let request = self.dialog.registry().issue(descriptor);

        let dialog = self.dialog.clone();
        let context = dialog_context(&dialog).clone();
        let state = self.state.clone();
        let config = self.config.clone();
        async move {
            let settlement = request.await;
            let slow = {
                let mut form = state.borrow_mut();
                if let Some(timer) = form.slow_timer.take() {
                    timer.cancel();
                }
                form.working == WorkingState::StillWorking
            };

            match settlement {
                Ok(response) => {
                    state.borrow_mut().working = WorkingState::Done;
                    let close_payload = if response.payload.is_null() {
                        payload
                    } else {
                        response.payload
                    };
                    let scheduler = context.scheduler();
                    let finish = move || {
                        if dialog.close(CloseReason::Submit, close_payload.clone()).is_ok() {
                            context.refresh(close_payload.clone());
                        }
                    };
                    if slow && config.done_dwell_ms > 0 {
                        // The affordance dwells on Done so a long-running
                        // submit visibly finished before the dialog vanishes.
                        let _ = scheduler.schedule(config.done_dwell_ms, Box::new(finish));
                    } else {
                        finish();
                    }
                    Ok(true)
                }
                Err(error) => {
                    state.borrow_mut().working = WorkingState::Idle;
                    match error.kind {
                        ErrorKind::Abort => {}
                        ErrorKind::Validation => {
                            let problems = decode_server_validation(&error);
                            render_validation_into(&state, &problems);
                        }
                        // The submit request is named, so its box replaces
                        // any earlier one instead of stacking.
                        _ => context.notifications().surface_named(
                            Some("submit"),
                            BoxCollision::Replace,
                            error,
                        ),
                    }
                    Ok(false)
                }
            }
        }
        .boxed_local()
    }

    fn arm_slow_timer(&self) -> ScheduledTask {
        let state = Rc::downgrade(&self.state);
        dialog_context(&self.dialog).scheduler().schedule(
            self.config.still_working_after_ms,
            Box::new(move || {
                if let Some(state) = state.upgrade() {
                    let mut form = state.borrow_mut();
                    if form.working == WorkingState::Working {
                        form.working = WorkingState::StillWorking;
                    }
                }
            }),
        )
    }

    fn render_validation(&self, problems: &[ValidationMessage]) {
        render_validation_into(&self.state, problems);
    }
}

fn dialog_context(dialog: &Dialog) -> &crate::context::ConsoleContext {
    dialog.context()
}

fn render_validation_into(state: &Rc<RefCell<FormState>>, problems: &[ValidationMessage]) {
    let (field_errors, form_errors) = ValidationMessage::split(problems);
    let first_field = problems.iter().find_map(|problem| problem.key.clone());

    let mut form = state.borrow_mut();
    form.effects.push(FormEffect::ClearErrors);
    if !field_errors.is_empty() {
        form.effects.push(FormEffect::RenderFieldErrors(field_errors));
    }
    if !form_errors.is_empty() {
        form.effects.push(FormEffect::RenderFormErrors(form_errors));
    }
    if let Some(field) = first_field {
        form.effects.push(FormEffect::ScrollToField(field));
    }
}

/// Pulls the per-field messages out of a normalized validation error's
/// detail payload.
fn decode_server_validation(error: &NormalizedError) -> Vec<ValidationMessage> {
    let Some(detail) = &error.detail else {
        return vec![ValidationMessage {
            key: None,
            error: error.message.clone(),
        }];
    };
    match serde_json::from_value::<Vec<ValidationMessage>>(detail.clone()) {
        Ok(problems) if !problems.is_empty() => problems,
        _ => vec![ValidationMessage {
            key: None,
            error: error.message.clone(),
        }],
    }
}
