use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(VehicleId);
id_newtype!(MovementId);

/// Presence of a vehicle inside the facility, derived from its latest movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VehicleStatus {
    #[serde(rename = "Presente")]
    Present,
    #[serde(rename = "Ausente")]
    Absent,
}

impl VehicleStatus {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Present => "Presente",
            Self::Absent => "Ausente",
        }
    }

    /// The only movement kind that keeps the entry/exit alternation intact.
    pub fn expected_next(self) -> MovementKind {
        match self {
            Self::Present => MovementKind::Exit,
            Self::Absent => MovementKind::Entry,
        }
    }
}

impl<'de> Deserialize<'de> for VehicleStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(raw) if raw.trim().eq_ignore_ascii_case("presente") => Ok(Self::Present),
            // Vehicles that never moved come back with a null or blank status.
            _ => Ok(Self::Absent),
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MovementKind {
    #[serde(rename = "entrada")]
    Entry,
    #[serde(rename = "saida")]
    Exit,
}

impl MovementKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Entry => "entrada",
            Self::Exit => "saida",
        }
    }

    pub fn resulting_status(self) -> VehicleStatus {
        match self {
            Self::Entry => VehicleStatus::Present,
            Self::Exit => VehicleStatus::Absent,
        }
    }

    pub fn conflicts_with(self, current: VehicleStatus) -> bool {
        current.expected_next() != self
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("entrada") || raw.eq_ignore_ascii_case("entry") {
            Some(Self::Entry)
        } else if raw.eq_ignore_ascii_case("saida")
            || raw.eq_ignore_ascii_case("saída")
            || raw.eq_ignore_ascii_case("exit")
        {
            Some(Self::Exit)
        } else {
            None
        }
    }
}

impl<'de> Deserialize<'de> for MovementKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown movement type '{raw}'")))
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    #[serde(rename = "placa")]
    pub plate: String,
    #[serde(rename = "motorista", default, deserialize_with = "null_as_default")]
    pub driver_name: String,
    #[serde(rename = "marca", default, deserialize_with = "null_as_default")]
    pub make: String,
    #[serde(rename = "modelo", default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(rename = "cor", default, deserialize_with = "null_as_default")]
    pub color: String,
    #[serde(
        rename = "dataCriacao",
        default,
        with = "crate::wire_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<NaiveDateTime>,
    #[serde(
        rename = "ultimaMovimentacao",
        default,
        with = "crate::wire_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_movement_at: Option<NaiveDateTime>,
    #[serde(default = "absent")]
    pub status: VehicleStatus,
}

fn absent() -> VehicleStatus {
    VehicleStatus::Absent
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Vehicle {
    pub fn is_present(&self) -> bool {
        self.status == VehicleStatus::Present
    }

    pub fn to_ref(&self) -> VehicleRef {
        VehicleRef {
            id: self.id,
            plate: Some(self.plate.clone()),
        }
    }
}

/// Operator-editable vehicle fields. Status and movement timestamps are
/// owned by the movement history and are never sent from here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleDraft {
    #[serde(rename = "placa")]
    pub plate: String,
    #[serde(rename = "motorista")]
    pub driver_name: String,
    #[serde(rename = "marca")]
    pub make: String,
    #[serde(rename = "modelo")]
    pub model: String,
    #[serde(rename = "cor")]
    pub color: String,
}

impl From<&Vehicle> for VehicleDraft {
    fn from(vehicle: &Vehicle) -> Self {
        Self {
            plate: vehicle.plate.clone(),
            driver_name: vehicle.driver_name.clone(),
            make: vehicle.make.clone(),
            model: vehicle.model.clone(),
            color: vehicle.color.clone(),
        }
    }
}

/// The `veiculo` object nested inside movements. Responses carry the full
/// vehicle; requests only need the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRef {
    pub id: VehicleId,
    #[serde(rename = "placa", default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
}

impl From<VehicleId> for VehicleRef {
    fn from(id: VehicleId) -> Self {
        Self { id, plate: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    #[serde(rename = "veiculo")]
    pub vehicle: VehicleRef,
    #[serde(rename = "tipoMovimento")]
    pub kind: MovementKind,
    #[serde(rename = "quilometragem", default, deserialize_with = "null_as_default")]
    pub odometer_reading: f64,
    #[serde(rename = "dataHora", with = "crate::wire_time")]
    pub occurred_at: NaiveDateTime,
    #[serde(rename = "motorista", default, deserialize_with = "null_as_default")]
    pub driver_name: String,
    #[serde(rename = "porteiro", default, deserialize_with = "null_as_default")]
    pub gate_operator_name: String,
}

impl Movement {
    pub fn vehicle_id(&self) -> VehicleId {
        self.vehicle.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternation_expects_exit_after_entry() {
        assert!(!MovementKind::Exit.conflicts_with(VehicleStatus::Present));
        assert!(MovementKind::Entry.conflicts_with(VehicleStatus::Present));
        assert!(!MovementKind::Entry.conflicts_with(VehicleStatus::Absent));
        assert!(MovementKind::Exit.conflicts_with(VehicleStatus::Absent));
    }

    #[test]
    fn movement_decodes_nested_vehicle_and_wire_names() {
        let raw = serde_json::json!({
            "id": 9,
            "quilometragem": 10500.5,
            "dataHora": "2026-03-14T08:30:00.000Z",
            "tipoMovimento": "ENTRADA",
            "motorista": "ROBERTO ELIAS",
            "porteiro": "Ana",
            "veiculo": {
                "id": 3,
                "placa": "ABC-1234",
                "motorista": "ROBERTO ELIAS",
                "marca": "Fiat",
                "modelo": "Strada",
                "cor": "Branco",
                "status": "Presente"
            }
        });

        let movement: Movement = serde_json::from_value(raw).expect("decode");
        assert_eq!(movement.id, MovementId(9));
        assert_eq!(movement.vehicle_id(), VehicleId(3));
        assert_eq!(movement.vehicle.plate.as_deref(), Some("ABC-1234"));
        assert_eq!(movement.kind, MovementKind::Entry);
        assert_eq!(movement.gate_operator_name, "Ana");
    }

    #[test]
    fn movement_echoes_its_time_unshifted_with_utc_marker() {
        let raw = serde_json::json!({
            "id": 9,
            "quilometragem": 10500.5,
            "dataHora": "2026-03-14T08:30:00.000Z",
            "tipoMovimento": "SAIDA",
            "veiculo": { "id": 3 }
        });
        let movement: Movement = serde_json::from_value(raw).expect("decode");
        let encoded = serde_json::to_value(&movement).expect("encode");
        assert_eq!(encoded["dataHora"], serde_json::json!("2026-03-14T08:30:00.000Z"));
    }

    #[test]
    fn vehicle_without_status_is_absent() {
        let raw = serde_json::json!({
            "id": 1,
            "placa": "XYZ-0001",
            "status": null
        });
        let vehicle: Vehicle = serde_json::from_value(raw).expect("decode null status");
        assert_eq!(vehicle.status, VehicleStatus::Absent);

        let raw = serde_json::json!({ "id": 1, "placa": "XYZ-0001" });
        let vehicle: Vehicle = serde_json::from_value(raw).expect("decode");
        assert_eq!(vehicle.status, VehicleStatus::Absent);
        assert!(vehicle.last_movement_at.is_none());
    }
}
