//! Conflict-Correction Coordinator.
//!
//! One [`RegistrationCoordinator`] backs one registration form. A submission
//! walks `Idle -> Submitting -> {Committed, ConflictPending, Failed}`; a
//! conflict asks the operator through the [`ConfirmationPrompt`] and, on
//! confirmation, re-enters `Submitting` exactly once with the override flag
//! set. An overridden submission that still conflicts is terminal.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use shared::{
    domain::{Movement, MovementKind, VehicleId},
    error::ValidationError,
    protocol::{ConflictNotice, MovementRegistrationRequest},
};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::registry::{MovementRegistry, RegisterOutcome, RegistryError};

pub const MSG_COMMITTED: &str = "Movimentação registrada com sucesso!";
pub const MSG_CANCELLED: &str = "Registro cancelado pelo usuário.";
pub const MSG_CONFLICT_UNRESOLVED: &str = "Erro de conflito inesperado. Tente novamente.";
pub const MSG_FAILED: &str = "Erro ao registrar a movimentação. Verifique os dados.";
pub const MSG_INCOMPLETE: &str = "Por favor, selecione um veículo e informe a quilometragem.";
pub const MSG_UNKNOWN_VEHICLE: &str = "Veículo selecionado inválido.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDecision {
    Confirm,
    Cancel,
}

/// Blocking two-choice question shown when a movement would break the
/// entry/exit alternation. Must not resolve until the operator picks.
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn confirm(&self, notice: &ConflictNotice) -> PromptDecision;
}

/// Values the operator has entered for one movement.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementForm {
    pub vehicle: Option<VehicleId>,
    pub kind: MovementKind,
    pub odometer: Option<f64>,
    pub driver_name: String,
    pub gate_operator_name: String,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl Default for MovementForm {
    fn default() -> Self {
        Self {
            vehicle: None,
            kind: MovementKind::Entry,
            odometer: None,
            driver_name: String::new(),
            gate_operator_name: String::new(),
            date: None,
            time: None,
        }
    }
}

impl MovementForm {
    pub fn validate(&self) -> Result<(VehicleId, f64), ValidationError> {
        let vehicle = self.vehicle.ok_or(ValidationError::MissingVehicle)?;
        let odometer = self.odometer.ok_or(ValidationError::MissingOdometer)?;
        if odometer.is_nan() || odometer < 0.0 {
            return Err(ValidationError::NegativeOdometer(odometer));
        }
        Ok((vehicle, odometer))
    }

    /// Builds the request, taking the date and time from `now` when the
    /// operator left them blank. Operator times have minute precision.
    pub fn to_request(&self, now: NaiveDateTime) -> Result<MovementRegistrationRequest, ValidationError> {
        let (vehicle, odometer) = self.validate()?;
        let date = self.date.unwrap_or_else(|| now.date());
        let time = self.time.unwrap_or_else(|| now.time());
        let time = NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time);

        Ok(MovementRegistrationRequest {
            driver_name: self.driver_name.trim().to_string(),
            gate_operator_name: self.gate_operator_name.trim().to_string(),
            occurred_at: Some(date.and_time(time)),
            ..MovementRegistrationRequest::new(vehicle, self.kind, odometer)
        })
    }

    /// Forgets everything entered except the movement kind.
    pub fn clear(&mut self) {
        *self = Self {
            kind: self.kind,
            ..Self::default()
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    Idle,
    Submitting { override_correction: bool },
    /// `None` when the backend accepted the movement without a readable echo.
    Committed(Option<Movement>),
    ConflictPending(ConflictNotice),
    AwaitingConfirmation(ConflictNotice),
    Retrying,
    Cancelled,
    Failed(String),
}

impl AttemptState {
    /// True while a submission (including its confirmation) is unresolved.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            Self::Submitting { .. }
                | Self::ConflictPending(_)
                | Self::AwaitingConfirmation(_)
                | Self::Retrying
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Committed(Option<Movement>),
    Cancelled,
    Invalid(ValidationError),
    /// Malformed conflict answer, or a conflict on the overridden retry.
    ConflictUnresolved,
    Failed(String),
}

impl SubmissionOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Committed(_) => MSG_COMMITTED,
            Self::Cancelled => MSG_CANCELLED,
            Self::Invalid(ValidationError::UnknownVehicle(_) | ValidationError::UnknownPlate(_)) => {
                MSG_UNKNOWN_VEHICLE
            }
            Self::Invalid(_) => MSG_INCOMPLETE,
            Self::ConflictUnresolved => MSG_CONFLICT_UNRESOLVED,
            Self::Failed(_) => MSG_FAILED,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("a registration from this form is still in progress")]
    Busy,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RegistrationCoordinator {
    registry: Arc<dyn MovementRegistry>,
    prompt: Arc<dyn ConfirmationPrompt>,
    form: Mutex<MovementForm>,
    state: watch::Sender<AttemptState>,
    in_flight: AtomicBool,
}

impl RegistrationCoordinator {
    pub fn new(registry: Arc<dyn MovementRegistry>, prompt: Arc<dyn ConfirmationPrompt>) -> Self {
        let (state, _) = watch::channel(AttemptState::Idle);
        Self {
            registry,
            prompt,
            form: Mutex::new(MovementForm::default()),
            state,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AttemptState> {
        self.state.subscribe()
    }

    pub async fn form(&self) -> MovementForm {
        self.form.lock().await.clone()
    }

    pub async fn edit_form(&self, edit: impl FnOnce(&mut MovementForm)) {
        let mut form = self.form.lock().await;
        edit(&mut form);
    }

    fn set_state(&self, next: AttemptState) {
        self.state.send_replace(next);
    }

    fn begin(&self) -> Option<InFlight<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(&self.in_flight))
    }

    /// Submits the form using the current local time for blank date/time fields.
    pub async fn submit(&self) -> Result<SubmissionOutcome, SubmitError> {
        self.submit_at(Local::now().naive_local()).await
    }

    pub async fn submit_at(&self, now: NaiveDateTime) -> Result<SubmissionOutcome, SubmitError> {
        let Some(_in_flight) = self.begin() else {
            warn!("submit ignored: previous registration unresolved");
            return Err(SubmitError::Busy);
        };

        let request = match self.form.lock().await.to_request(now) {
            Ok(request) => request,
            Err(err) => {
                info!(error = %err, "registration form incomplete");
                self.set_state(AttemptState::Idle);
                return Ok(SubmissionOutcome::Invalid(err));
            }
        };

        let mut override_correction = false;
        loop {
            self.set_state(AttemptState::Submitting { override_correction });
            let attempt = request.clone().with_override(override_correction);

            let notice = match self.registry.register(&attempt).await {
                Ok(RegisterOutcome::Committed(movement)) => {
                    return Ok(self.committed(Some(movement)).await);
                }
                Ok(RegisterOutcome::CommittedUnreadable) => {
                    return Ok(self.committed(None).await);
                }
                Ok(RegisterOutcome::Conflict(notice)) => notice,
                Err(RegistryError::Validation(err)) => {
                    self.set_state(AttemptState::Idle);
                    return Ok(SubmissionOutcome::Invalid(err));
                }
                Err(RegistryError::MalformedConflict) => {
                    self.set_state(AttemptState::Failed(MSG_CONFLICT_UNRESOLVED.into()));
                    return Ok(SubmissionOutcome::ConflictUnresolved);
                }
                Err(err) => {
                    error!(vehicle_id = attempt.vehicle_id().0, error = %err, "registration failed");
                    self.set_state(AttemptState::Failed(err.to_string()));
                    return Ok(SubmissionOutcome::Failed(err.to_string()));
                }
            };

            if override_correction {
                warn!(
                    vehicle_id = attempt.vehicle_id().0,
                    message = %notice.message,
                    "conflict persisted on overridden submission"
                );
                self.set_state(AttemptState::Failed(MSG_CONFLICT_UNRESOLVED.into()));
                return Ok(SubmissionOutcome::ConflictUnresolved);
            }

            self.set_state(AttemptState::ConflictPending(notice.clone()));
            // Subscribers get a turn to see the notice before the prompt takes over.
            tokio::task::yield_now().await;
            self.set_state(AttemptState::AwaitingConfirmation(notice.clone()));
            match self.prompt.confirm(&notice).await {
                PromptDecision::Confirm => {
                    info!(vehicle_id = attempt.vehicle_id().0, "operator confirmed correction");
                    self.set_state(AttemptState::Retrying);
                    override_correction = true;
                }
                PromptDecision::Cancel => {
                    info!(vehicle_id = attempt.vehicle_id().0, "operator cancelled registration");
                    self.set_state(AttemptState::Cancelled);
                    return Ok(SubmissionOutcome::Cancelled);
                }
            }
        }
    }

    async fn committed(&self, movement: Option<Movement>) -> SubmissionOutcome {
        self.form.lock().await.clear();
        self.set_state(AttemptState::Committed(movement.clone()));
        SubmissionOutcome::Committed(movement)
    }

    /// Selects a vehicle and prefills odometer and driver from its last
    /// movement. Failed lookups leave those fields blank.
    pub async fn select_vehicle(&self, id: VehicleId) -> MovementForm {
        self.edit_form(|form| form.vehicle = Some(id)).await;

        let (odometer, driver) = tokio::join!(
            self.registry.last_odometer(id),
            self.registry.last_driver(id)
        );
        let odometer = odometer.unwrap_or_else(|err| {
            warn!(vehicle_id = id.0, error = %err, "could not load last odometer");
            None
        });
        let driver = driver.unwrap_or_else(|err| {
            warn!(vehicle_id = id.0, error = %err, "could not load last driver");
            None
        });

        let mut form = self.form.lock().await;
        // Another selection may have happened while the lookups ran.
        if form.vehicle == Some(id) {
            form.odometer = odometer;
            form.driver_name = driver.unwrap_or_default();
        }
        form.clone()
    }

    pub async fn suggest_drivers(&self, term: &str) -> Vec<String> {
        match self.registry.list_drivers().await {
            Ok(names) => filter_drivers(&names, term),
            Err(err) => {
                warn!(error = %err, "could not load driver names");
                Vec::new()
            }
        }
    }
}

/// Names with any word starting with `term`, ignoring case. Blank matches all.
pub fn filter_drivers(names: &[String], term: &str) -> Vec<String> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return names.to_vec();
    }
    names
        .iter()
        .filter(|name| {
            name.to_lowercase()
                .split_whitespace()
                .any(|word| word.starts_with(&term))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
