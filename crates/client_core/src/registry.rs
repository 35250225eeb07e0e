//! Movement Registry client: writes that signal the update channel, and
//! side-effect-free reads that always hit the backend.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Movement, MovementId, MovementKind, VehicleId},
    error::{BackendErrorBody, ValidationError},
    protocol::{ConflictNotice, HistoryFilter, LastDriverResponse, MovementRegistrationRequest, Page},
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{notify::UpdateChannel, ApiEndpoint};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("movement registry request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("movement registry answered {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("conflict response did not carry a correction notice")]
    MalformedConflict,
    #[error("movement registry is unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Committed(Movement),
    /// Accepted with a 2xx whose body could not be read back as a movement.
    /// The movement exists; it must not be submitted again.
    CommittedUnreadable,
    /// Rejected because it would break the entry/exit alternation; nothing was recorded.
    Conflict(ConflictNotice),
}

#[async_trait]
pub trait MovementRegistry: Send + Sync {
    async fn register(
        &self,
        request: &MovementRegistrationRequest,
    ) -> Result<RegisterOutcome, RegistryError>;
    async fn update(&self, id: MovementId, movement: &Movement) -> Result<Movement, RegistryError>;
    async fn count_today(&self, kind: MovementKind) -> Result<u64, RegistryError>;
    async fn history(
        &self,
        filter: &HistoryFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<Movement>, RegistryError>;
    async fn last_odometer(&self, vehicle_id: VehicleId) -> Result<Option<f64>, RegistryError>;
    async fn last_driver(&self, vehicle_id: VehicleId) -> Result<Option<String>, RegistryError>;
    async fn list_drivers(&self) -> Result<Vec<String>, RegistryError>;
}

pub struct MissingMovementRegistry;

#[async_trait]
impl MovementRegistry for MissingMovementRegistry {
    async fn register(
        &self,
        _request: &MovementRegistrationRequest,
    ) -> Result<RegisterOutcome, RegistryError> {
        Err(RegistryError::Unavailable)
    }

    async fn update(&self, _id: MovementId, _movement: &Movement) -> Result<Movement, RegistryError> {
        Err(RegistryError::Unavailable)
    }

    async fn count_today(&self, _kind: MovementKind) -> Result<u64, RegistryError> {
        Err(RegistryError::Unavailable)
    }

    async fn history(
        &self,
        _filter: &HistoryFilter,
        _page: u32,
        _size: u32,
    ) -> Result<Page<Movement>, RegistryError> {
        Err(RegistryError::Unavailable)
    }

    async fn last_odometer(&self, _vehicle_id: VehicleId) -> Result<Option<f64>, RegistryError> {
        Err(RegistryError::Unavailable)
    }

    async fn last_driver(&self, _vehicle_id: VehicleId) -> Result<Option<String>, RegistryError> {
        Err(RegistryError::Unavailable)
    }

    async fn list_drivers(&self) -> Result<Vec<String>, RegistryError> {
        Err(RegistryError::Unavailable)
    }
}

pub struct HttpMovementRegistry {
    http: Client,
    endpoint: ApiEndpoint,
    updates: UpdateChannel,
}

impl HttpMovementRegistry {
    pub fn new(endpoint: ApiEndpoint, updates: UpdateChannel) -> Self {
        Self::with_client(Client::new(), endpoint, updates)
    }

    pub fn with_client(http: Client, endpoint: ApiEndpoint, updates: UpdateChannel) -> Self {
        Self {
            http,
            endpoint,
            updates,
        }
    }

    pub fn updates(&self) -> &UpdateChannel {
        &self.updates
    }

    fn url(&self, path: &str) -> String {
        self.endpoint.url(&format!("movimentacoes{path}"))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RegistryError> {
        let response = self.http.get(self.url(path)).query(query).send().await?;
        decode(response).await
    }

    /// Endpoints answering with a bare value that may be `null` or empty.
    async fn get_optional_text(&self, path: &str) -> Result<Option<String>, RegistryError> {
        let response = self.http.get(self.url(path)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        let body = body.trim();
        if body.is_empty() || body == "null" {
            Ok(None)
        } else {
            Ok(Some(body.to_string()))
        }
    }
}

#[async_trait]
impl MovementRegistry for HttpMovementRegistry {
    async fn register(
        &self,
        request: &MovementRegistrationRequest,
    ) -> Result<RegisterOutcome, RegistryError> {
        if is_invalid_odometer(request.odometer_reading) {
            return Err(ValidationError::NegativeOdometer(request.odometer_reading).into());
        }

        let response = self.http.post(self.url("")).json(request).send().await?;
        let status = response.status();

        if status.is_success() {
            let decoded = response.json::<Movement>().await;
            // The movement is committed whether or not its echo decodes.
            self.updates.notify();
            let movement = match decoded {
                Ok(movement) => movement,
                Err(err) => {
                    warn!(
                        vehicle_id = request.vehicle_id().0,
                        status = status.as_u16(),
                        error = %err,
                        "movement registered but its echo could not be decoded"
                    );
                    return Ok(RegisterOutcome::CommittedUnreadable);
                }
            };
            info!(
                movement_id = movement.id.0,
                vehicle_id = movement.vehicle_id().0,
                kind = %movement.kind,
                override_correction = request.override_correction,
                "movement registered"
            );
            return Ok(RegisterOutcome::Committed(movement));
        }

        let body = response.bytes().await?;
        if status == StatusCode::CONFLICT {
            return match ConflictNotice::from_body(&body) {
                Some(notice) => {
                    info!(
                        vehicle_id = request.vehicle_id().0,
                        kind = %request.kind,
                        override_correction = request.override_correction,
                        "movement rejected with status conflict"
                    );
                    Ok(RegisterOutcome::Conflict(notice))
                }
                None => {
                    warn!(
                        vehicle_id = request.vehicle_id().0,
                        body = %String::from_utf8_lossy(&body),
                        "conflict response without correction payload"
                    );
                    Err(RegistryError::MalformedConflict)
                }
            };
        }

        let err = status_error(status, &String::from_utf8_lossy(&body));
        error!(vehicle_id = request.vehicle_id().0, error = %err, "movement registration failed");
        Err(err)
    }

    async fn update(&self, id: MovementId, movement: &Movement) -> Result<Movement, RegistryError> {
        if is_invalid_odometer(movement.odometer_reading) {
            return Err(ValidationError::NegativeOdometer(movement.odometer_reading).into());
        }

        let response = self
            .http
            .put(self.url(&format!("/{}", id.0)))
            .json(movement)
            .send()
            .await?;
        let updated: Movement = decode(response).await?;
        self.updates.notify();
        info!(movement_id = id.0, "movement updated");
        Ok(updated)
    }

    async fn count_today(&self, kind: MovementKind) -> Result<u64, RegistryError> {
        let path = match kind {
            MovementKind::Entry => "/entradas-hoje",
            MovementKind::Exit => "/saidas-hoje",
        };
        self.get_json(path, &[]).await
    }

    async fn history(
        &self,
        filter: &HistoryFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<Movement>, RegistryError> {
        self.get_json("", &filter.query_pairs(page, size)).await
    }

    async fn last_odometer(&self, vehicle_id: VehicleId) -> Result<Option<f64>, RegistryError> {
        let raw = self
            .get_optional_text(&format!("/veiculo/{}/ultima-quilometragem", vehicle_id.0))
            .await?;
        raw.map(|raw| {
            raw.parse::<f64>().map_err(|_| RegistryError::Status {
                status: StatusCode::OK.as_u16(),
                reason: format!("unexpected odometer value '{raw}'"),
            })
        })
        .transpose()
    }

    async fn last_driver(&self, vehicle_id: VehicleId) -> Result<Option<String>, RegistryError> {
        let response: LastDriverResponse = self
            .get_json(&format!("/veiculo/{}/ultimo-motorista", vehicle_id.0), &[])
            .await?;
        Ok(response.into_driver())
    }

    async fn list_drivers(&self) -> Result<Vec<String>, RegistryError> {
        self.get_json("/motoristas", &[]).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RegistryError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    Ok(response.json().await?)
}

fn is_invalid_odometer(reading: f64) -> bool {
    reading.is_nan() || reading < 0.0
}

fn status_error(status: StatusCode, body: &str) -> RegistryError {
    RegistryError::Status {
        status: status.as_u16(),
        reason: BackendErrorBody::reason(body),
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
