//! The submission controller.
//!
//! Owns the form fields, gates submit on the required fields, and runs the
//! submit protocol:
//!
//! 1. ignore the call if a submission is already in flight, refuse it if the
//!    readiness gate is closed, otherwise mark it in flight;
//! 2. clear the previous error;
//! 3. snapshot the form plus the cached client address into a [`LeadRecord`]
//!    and form-encode it;
//! 4. hand the payload to the [`Transport`] without waiting for delivery;
//! 5. clear the fields and call `on_success`;
//! 6. schedule the redirect after the settle delay;
//! 7. schedule clearing the in-flight flag.
//!
//! Only a synchronous failure in steps 3–4 produces an error, and it leaves
//! the fields untouched so the visitor can retry. Whether the collector ever
//! received the lead is unknowable here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::enricher::AddressSlot;
use crate::error::{ErrorKind, SubmissionError};
use crate::form::{Field, FormState, ReadinessGate};
use crate::lead::{LeadPayload, LeadRecord};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::transport::{DispatchRoute, Transport};

/// Performs the post-submit full-page redirect.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &Url);
}

/// Where a controller is in its submission lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting edits and submits.
    Idle,
    /// A lead was dispatched; waiting for the in-flight timer.
    Submitted,
    /// The last submit failed locally; cleared by the next edit.
    Error,
}

/// Result of a [`SubmissionController::submit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The lead was handed to the transport.
    Dispatched(DispatchRoute),
    /// A submission was already in flight; nothing happened.
    Ignored,
    /// A required field is empty; nothing was sent.
    Blocked,
    /// Assembly or dispatch failed synchronously.
    Failed(ErrorKind),
}

/// Timing and gating settings for a controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub gate: ReadinessGate,
    pub redirect_url: Url,
    pub settle_delay: Duration,
    pub in_flight_delay: Duration,
}

impl From<&CollectorConfig> for ControllerSettings {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            gate: if config.require_phone {
                ReadinessGate::requiring_phone()
            } else {
                ReadinessGate::new()
            },
            redirect_url: config.redirect_url.clone(),
            settle_delay: config.settle_delay,
            in_flight_delay: config.in_flight_delay,
        }
    }
}

/// Collaborators a controller is wired to.
pub struct ControllerDeps {
    pub address: AddressSlot,
    pub transport: Arc<dyn Transport>,
    pub scheduler: Arc<dyn Scheduler>,
    pub navigator: Arc<dyn Navigator>,
}

/// Form state plus the submit protocol for one mounted form.
///
/// Dropping the controller cancels any pending redirect or in-flight timer.
pub struct SubmissionController {
    form: FormState,
    phase: Phase,
    last_error: Option<ErrorKind>,
    in_flight: Arc<AtomicBool>,
    settings: ControllerSettings,
    deps: ControllerDeps,
    on_success: Box<dyn FnMut() + Send>,
    timers: Vec<ScheduledTask>,
}

impl SubmissionController {
    /// Mount a controller with all-empty fields.
    pub fn new(
        settings: ControllerSettings,
        deps: ControllerDeps,
        on_success: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            form: FormState::new(),
            phase: Phase::Idle,
            last_error: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            settings,
            deps,
            on_success: Box::new(on_success),
            timers: Vec::new(),
        }
    }

    /// Current field values.
    #[must_use]
    pub fn form(&self) -> &FormState {
        &self.form
    }

    /// The error shown inline, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// Whether a submission is in flight.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        match self.phase {
            Phase::Submitted if !self.is_in_flight() => Phase::Idle,
            phase => phase,
        }
    }

    /// Whether the readiness gate is open for the current fields.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.settings.gate.is_open(&self.form)
    }

    /// Whether the submit button should be enabled.
    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.is_ready() && !self.is_in_flight()
    }

    /// Apply one keystroke's worth of change to a single field.
    ///
    /// Editing after a failed submit clears the error.
    pub fn set_field(&mut self, field: Field, value: impl Into<String>) {
        self.form.set(field, value);
        if self.phase == Phase::Error {
            self.phase = Phase::Idle;
            self.last_error = None;
        }
    }

    /// Run the submit protocol once.
    pub fn submit(&mut self) -> SubmitOutcome {
        if self.is_in_flight() {
            debug!("submit ignored, a submission is already in flight");
            return SubmitOutcome::Ignored;
        }
        if !self.is_ready() {
            debug!("submit blocked, required fields are empty");
            return SubmitOutcome::Blocked;
        }

        self.in_flight.store(true, Ordering::SeqCst);
        self.last_error = None;

        let outcome = match self.assemble_and_dispatch() {
            Ok(route) => {
                self.form.clear();
                self.phase = Phase::Submitted;
                (self.on_success)();
                self.schedule_redirect();
                SubmitOutcome::Dispatched(route)
            }
            Err(e) => {
                warn!(error = %e, "lead submission failed");
                let kind = ErrorKind::from(&e);
                self.last_error = Some(kind);
                self.phase = Phase::Error;
                SubmitOutcome::Failed(kind)
            }
        };

        self.schedule_in_flight_reset();
        outcome
    }

    fn assemble_and_dispatch(&self) -> Result<DispatchRoute, SubmissionError> {
        let address = self.deps.address.get();
        let record = LeadRecord::from_form(&self.form, address);
        let payload = LeadPayload::encode(record)?;
        info!(
            has_phone = !self.form.get(Field::Phone).is_empty(),
            has_address = address.is_some(),
            "dispatching lead"
        );
        self.deps.transport.dispatch(payload)
    }

    fn schedule_redirect(&mut self) {
        let navigator = Arc::clone(&self.deps.navigator);
        let url = self.settings.redirect_url.clone();
        let task = self.deps.scheduler.schedule(
            self.settings.settle_delay,
            Box::new(move || {
                info!(url = %url, "redirecting");
                navigator.navigate(&url);
            }),
        );
        self.track(task);
    }

    fn schedule_in_flight_reset(&mut self) {
        let flag = Arc::clone(&self.in_flight);
        let task = self.deps.scheduler.schedule(
            self.settings.in_flight_delay,
            Box::new(move || flag.store(false, Ordering::SeqCst)),
        );
        self.track(task);
    }

    fn track(&mut self, task: ScheduledTask) {
        self.timers.retain(ScheduledTask::is_pending);
        self.timers.push(task);
    }
}

impl Drop for SubmissionController {
    fn drop(&mut self) {
        for task in &self.timers {
            task.cancel();
        }
    }
}

impl std::fmt::Debug for SubmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionController")
            .field("phase", &self.phase())
            .field("last_error", &self.last_error)
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}
