use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::VehicleId;

/// Problems caught before a registration ever reaches the network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("no vehicle selected")]
    MissingVehicle,
    #[error("odometer reading is required")]
    MissingOdometer,
    #[error("odometer reading must not be negative (got {0})")]
    NegativeOdometer(f64),
    #[error("vehicle {0} is not in the directory")]
    UnknownVehicle(VehicleId),
    #[error("no vehicle with plate '{0}' in the directory")]
    UnknownPlate(String),
}

/// `{ "error": "..." }` body the backend uses for rejected requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

impl BackendErrorBody {
    /// Best-effort extraction of a readable reason from a raw error body.
    pub fn reason(body: &str) -> String {
        serde_json::from_str::<BackendErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.error)
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| body.trim().to_string())
    }
}
