use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::{MovementKind, VehicleId, VehicleRef};

/// Remediation text shown when a conflict response does not carry one.
pub const DEFAULT_SUGGESTED_ACTION: &str = "Correção de status anterior ou ajuste de dados.";

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Body of `POST /movimentacoes`. Produces exactly one movement on success and
/// none when the backend answers with a status conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRegistrationRequest {
    #[serde(rename = "veiculo")]
    pub vehicle: VehicleRef,
    #[serde(rename = "quilometragem")]
    pub odometer_reading: f64,
    #[serde(rename = "tipoMovimento")]
    pub kind: MovementKind,
    #[serde(rename = "motorista", default)]
    pub driver_name: String,
    #[serde(rename = "porteiro", default)]
    pub gate_operator_name: String,
    #[serde(
        rename = "dataHora",
        default,
        with = "crate::wire_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub occurred_at: Option<NaiveDateTime>,
    #[serde(rename = "forceCorrection", default)]
    pub override_correction: bool,
}

impl MovementRegistrationRequest {
    pub fn new(vehicle_id: VehicleId, kind: MovementKind, odometer_reading: f64) -> Self {
        Self {
            vehicle: VehicleRef::from(vehicle_id),
            odometer_reading,
            kind,
            driver_name: String::new(),
            gate_operator_name: String::new(),
            occurred_at: None,
            override_correction: false,
        }
    }

    pub fn vehicle_id(&self) -> VehicleId {
        self.vehicle.id
    }

    pub fn with_override(mut self, override_correction: bool) -> Self {
        self.override_correction = override_correction;
        self
    }
}

/// Wire shape of a `409 Conflict` answer to a movement registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRequiredResponse {
    #[serde(rename = "correctionRequired", default)]
    pub correction_required: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "suggestedAction", default)]
    pub suggested_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Explanation of a status conflict, presented verbatim to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictNotice {
    pub message: String,
    pub suggested_action: String,
}

impl ConflictNotice {
    pub fn new(message: impl Into<String>, suggested_action: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggested_action: suggested_action.into(),
        }
    }

    /// Returns `None` unless the body is an explicit correction request with a
    /// non-empty message.
    pub fn from_response(response: CorrectionRequiredResponse) -> Option<Self> {
        if !response.correction_required {
            return None;
        }
        let message = response.message.filter(|m| !m.trim().is_empty())?;
        let suggested_action = response
            .suggested_action
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SUGGESTED_ACTION.to_string());
        Some(Self {
            message,
            suggested_action,
        })
    }

    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<CorrectionRequiredResponse>(body)
            .ok()
            .and_then(Self::from_response)
    }
}

/// Page envelope returned by paginated endpoints. `number` is 0-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
    #[serde(rename = "totalElements")]
    pub total_elements: u64,
    pub number: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn empty(size: u32) -> Self {
        Self {
            content: Vec::new(),
            total_pages: 0,
            total_elements: 0,
            number: 0,
            size,
        }
    }

    pub fn has_next(&self) -> bool {
        self.number + 1 < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }
}

impl<T: Clone> Page<T> {
    /// Cuts page `page` of `size` items out of an already ordered list.
    /// Out-of-range pages come back with empty content and the real totals.
    pub fn from_slice(items: &[T], page: u32, size: u32) -> Self {
        let size = size.max(1);
        let total = items.len();
        let total_pages = total.div_ceil(size as usize) as u32;
        let start = (page as usize).saturating_mul(size as usize);
        let content = if start < total {
            let end = (start + size as usize).min(total);
            items[start..end].to_vec()
        } else {
            Vec::new()
        };

        Self {
            content,
            total_pages,
            total_elements: total as u64,
            number: page,
            size,
        }
    }
}

/// History filters. Blank values are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub plate: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl HistoryFilter {
    pub fn is_empty(&self) -> bool {
        self.plate().is_none() && self.from.is_none() && self.to.is_none()
    }

    pub fn plate(&self) -> Option<&str> {
        self.plate
            .as_deref()
            .map(str::trim)
            .filter(|plate| !plate.is_empty())
    }

    pub fn query_pairs(&self, page: u32, size: u32) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("page", page.to_string()), ("size", size.to_string())];
        if let Some(plate) = self.plate() {
            pairs.push(("placa", plate.to_string()));
        }
        if let Some(from) = self.from {
            pairs.push(("dataInicio", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            pairs.push(("dataFim", to.format("%Y-%m-%d").to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastDriverResponse {
    #[serde(rename = "motorista", default)]
    pub driver_name: Option<String>,
}

impl LastDriverResponse {
    /// An empty name means the vehicle has no prior movement.
    pub fn into_driver(self) -> Option<String> {
        self.driver_name.filter(|name| !name.trim().is_empty())
    }
}
