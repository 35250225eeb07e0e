//! In-process fake of the gate backend, served by axum on an ephemeral port.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;
use serde_json::json;
use shared::{
    domain::{
        Movement, MovementId, MovementKind, Vehicle, VehicleDraft, VehicleId, VehicleRef,
        VehicleStatus,
    },
    protocol::{CorrectionRequiredResponse, MovementRegistrationRequest, Page},
};
use tokio::{net::TcpListener, sync::Mutex};

use crate::ApiEndpoint;

#[derive(Default)]
pub(crate) struct BackendState {
    pub vehicles: Vec<Vehicle>,
    pub movements: Vec<Movement>,
    pub registrations: Vec<MovementRegistrationRequest>,
    pub vehicle_list_requests: usize,
    pub presence_requests: usize,
    pub conflict_despite_override: bool,
    pub malformed_conflict: bool,
    pub fail_registrations: bool,
    /// Commit registrations but answer with a body that is not a movement.
    pub unreadable_echo: bool,
    pub fail_vehicle_list: bool,
    pub presence_delay: Option<Duration>,
    /// Per-request delays for the full vehicle list, consumed in order.
    pub vehicle_list_delays: VecDeque<Duration>,
    pub drivers: Vec<String>,
    next_vehicle_id: i64,
    next_movement_id: i64,
}

impl BackendState {
    fn vehicle_mut(&mut self, id: VehicleId) -> Option<&mut Vehicle> {
        self.vehicles.iter_mut().find(|v| v.id == id)
    }

    fn sorted_movements(&self) -> Vec<Movement> {
        let mut movements = self.movements.clone();
        movements.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        movements
    }

    fn latest_for(&self, vehicle_id: VehicleId) -> Option<&Movement> {
        self.movements
            .iter()
            .filter(|m| m.vehicle_id() == vehicle_id)
            .max_by_key(|m| m.id)
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    inner: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub async fn spawn() -> (ApiEndpoint, Self) {
        let backend = Self::default();
        let app = Router::new()
            .route("/api/movimentacoes", get(history).post(register_movement))
            .route("/api/movimentacoes/:id", put(update_movement))
            .route("/api/movimentacoes/entradas-hoje", get(entries_today))
            .route("/api/movimentacoes/saidas-hoje", get(exits_today))
            .route("/api/movimentacoes/motoristas", get(drivers))
            .route(
                "/api/movimentacoes/veiculo/:id/ultima-quilometragem",
                get(last_odometer),
            )
            .route(
                "/api/movimentacoes/veiculo/:id/ultimo-motorista",
                get(last_driver),
            )
            .route("/api/veiculos", get(list_vehicles).post(create_vehicle))
            .route("/api/veiculos/presentes", get(present_vehicles))
            .route("/api/veiculos/ausentes", get(absent_vehicles))
            .route(
                "/api/veiculos/:id",
                get(get_vehicle).put(update_vehicle).delete(delete_vehicle),
            )
            .with_state(backend.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        let endpoint = ApiEndpoint::parse(&format!("http://{addr}/api")).expect("endpoint");
        (endpoint, backend)
    }

    pub async fn add_vehicle(&self, plate: &str) -> VehicleId {
        let mut state = self.inner.lock().await;
        insert_vehicle(
            &mut state,
            VehicleDraft {
                plate: plate.to_string(),
                driver_name: "JOAQUIM".into(),
                make: "Fiat".into(),
                model: "Strada".into(),
                color: "Branco".into(),
            },
        )
        .id
    }

    pub async fn vehicle(&self, id: VehicleId) -> Vehicle {
        let state = self.inner.lock().await;
        state
            .vehicles
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .expect("vehicle exists")
    }

    pub async fn with_state<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        let mut state = self.inner.lock().await;
        f(&mut state)
    }
}

pub(crate) fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, day)
        .expect("date")
        .and_hms_opt(hour, minute, 0)
        .expect("time")
}

fn now_minute() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_second(0)
        .and_then(|n| n.with_nanosecond(0))
        .unwrap_or(now)
}

fn insert_vehicle(state: &mut BackendState, draft: VehicleDraft) -> Vehicle {
    state.next_vehicle_id += 1;
    let vehicle = Vehicle {
        id: VehicleId(state.next_vehicle_id),
        plate: draft.plate,
        driver_name: draft.driver_name,
        make: draft.make,
        model: draft.model,
        color: draft.color,
        created_at: Some(now_minute()),
        last_movement_at: None,
        status: VehicleStatus::Absent,
    };
    state.vehicles.push(vehicle.clone());
    vehicle
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn register_movement(
    State(backend): State<FakeBackend>,
    Json(request): Json<MovementRegistrationRequest>,
) -> Response {
    let mut state = backend.inner.lock().await;
    state.registrations.push(request.clone());

    if state.fail_registrations {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, "database offline");
    }

    let conflict_despite_override = state.conflict_despite_override;
    let malformed_conflict = state.malformed_conflict;
    let Some(vehicle) = state.vehicle_mut(request.vehicle_id()) else {
        return error_body(
            StatusCode::BAD_REQUEST,
            "Veículo associado à movimentação não encontrado!",
        );
    };

    if request.kind.conflicts_with(vehicle.status)
        && (!request.override_correction || conflict_despite_override)
    {
        if malformed_conflict {
            return (StatusCode::CONFLICT, "conflict").into_response();
        }
        let (message, suggested_action) = match request.kind {
            MovementKind::Entry => (
                "O veículo está PRESENTE. Deseja registrar uma SAÍDA automática antes da ENTRADA?",
                "saidaAutomatica",
            ),
            MovementKind::Exit => (
                "O veículo está AUSENTE. Deseja registrar uma ENTRADA automática?",
                "entradaAutomatica",
            ),
        };
        let body = CorrectionRequiredResponse {
            correction_required: true,
            message: Some(message.to_string()),
            suggested_action: Some(suggested_action.to_string()),
            status: Some(409),
        };
        return (StatusCode::CONFLICT, Json(body)).into_response();
    }

    let occurred_at = request.occurred_at.unwrap_or_else(now_minute);
    vehicle.status = request.kind.resulting_status();
    vehicle.last_movement_at = Some(occurred_at);
    let vehicle_ref = vehicle.to_ref();

    state.next_movement_id += 1;
    let movement = Movement {
        id: MovementId(state.next_movement_id),
        vehicle: vehicle_ref,
        kind: request.kind,
        odometer_reading: request.odometer_reading,
        occurred_at,
        driver_name: request.driver_name,
        gate_operator_name: request.gate_operator_name,
    };
    state.movements.push(movement.clone());
    if state.unreadable_echo {
        return (StatusCode::CREATED, "ok").into_response();
    }
    (StatusCode::CREATED, Json(movement)).into_response()
}

async fn update_movement(
    State(backend): State<FakeBackend>,
    Path(id): Path<i64>,
    Json(changes): Json<Movement>,
) -> Response {
    let mut state = backend.inner.lock().await;
    let plate = state
        .vehicles
        .iter()
        .find(|v| v.id == changes.vehicle_id())
        .map(|v| v.plate.clone());
    let Some(movement) = state.movements.iter_mut().find(|m| m.id == MovementId(id)) else {
        return error_body(StatusCode::NOT_FOUND, "Movimentação não encontrada");
    };

    movement.odometer_reading = changes.odometer_reading;
    movement.occurred_at = changes.occurred_at;
    movement.driver_name = changes.driver_name;
    movement.kind = changes.kind;
    movement.gate_operator_name = changes.gate_operator_name;
    movement.vehicle = VehicleRef {
        id: changes.vehicle.id,
        plate,
    };
    let updated = movement.clone();

    let latest = state
        .movements
        .iter()
        .filter(|m| m.vehicle_id() == updated.vehicle_id())
        .map(|m| m.occurred_at)
        .max();
    if let Some(vehicle) = state.vehicle_mut(updated.vehicle_id()) {
        vehicle.last_movement_at = latest;
    }

    Json(updated).into_response()
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    placa: Option<String>,
    #[serde(rename = "dataInicio")]
    data_inicio: Option<NaiveDate>,
    #[serde(rename = "dataFim")]
    data_fim: Option<NaiveDate>,
    page: Option<u32>,
    size: Option<u32>,
}

async fn history(
    State(backend): State<FakeBackend>,
    Query(query): Query<HistoryQuery>,
) -> Json<Page<Movement>> {
    let state = backend.inner.lock().await;
    let filtered: Vec<Movement> = state
        .sorted_movements()
        .into_iter()
        .filter(|m| match &query.placa {
            Some(plate) => m.vehicle.plate.as_deref().is_some_and(|p| p.contains(plate.as_str())),
            None => true,
        })
        .filter(|m| query.data_inicio.map_or(true, |from| m.occurred_at.date() >= from))
        .filter(|m| query.data_fim.map_or(true, |to| m.occurred_at.date() <= to))
        .collect();

    Json(Page::from_slice(
        &filtered,
        query.page.unwrap_or(0),
        query.size.unwrap_or(20),
    ))
}

async fn count_today(backend: &FakeBackend, kind: MovementKind) -> u64 {
    let today = Local::now().date_naive();
    let state = backend.inner.lock().await;
    state
        .movements
        .iter()
        .filter(|m| m.kind == kind && m.occurred_at.date() == today)
        .count() as u64
}

async fn entries_today(State(backend): State<FakeBackend>) -> Json<u64> {
    Json(count_today(&backend, MovementKind::Entry).await)
}

async fn exits_today(State(backend): State<FakeBackend>) -> Json<u64> {
    Json(count_today(&backend, MovementKind::Exit).await)
}

async fn drivers(State(backend): State<FakeBackend>) -> Json<Vec<String>> {
    let state = backend.inner.lock().await;
    Json(state.drivers.clone())
}

async fn last_odometer(State(backend): State<FakeBackend>, Path(id): Path<i64>) -> Json<Option<f64>> {
    let state = backend.inner.lock().await;
    Json(state.latest_for(VehicleId(id)).map(|m| m.odometer_reading))
}

async fn last_driver(State(backend): State<FakeBackend>, Path(id): Path<i64>) -> Response {
    let state = backend.inner.lock().await;
    let driver = state
        .latest_for(VehicleId(id))
        .map(|m| m.driver_name.clone())
        .unwrap_or_default();
    Json(json!({ "motorista": driver })).into_response()
}

async fn list_vehicles(State(backend): State<FakeBackend>) -> Response {
    // The list is read on arrival, so a delayed answer is as old as its request.
    let (vehicles, delay) = {
        let mut state = backend.inner.lock().await;
        state.vehicle_list_requests += 1;
        if state.fail_vehicle_list {
            return error_body(StatusCode::SERVICE_UNAVAILABLE, "vehicle store offline");
        }
        (state.vehicles.clone(), state.vehicle_list_delays.pop_front())
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    Json(vehicles).into_response()
}

async fn presence(backend: &FakeBackend, status: VehicleStatus) -> Json<Vec<Vehicle>> {
    let delay = {
        let mut state = backend.inner.lock().await;
        state.presence_requests += 1;
        state.presence_delay
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let state = backend.inner.lock().await;
    // Insertion order reversed so callers cannot rely on backend ordering.
    Json(
        state
            .vehicles
            .iter()
            .rev()
            .filter(|v| v.status == status)
            .cloned()
            .collect(),
    )
}

async fn present_vehicles(State(backend): State<FakeBackend>) -> Json<Vec<Vehicle>> {
    presence(&backend, VehicleStatus::Present).await
}

async fn absent_vehicles(State(backend): State<FakeBackend>) -> Json<Vec<Vehicle>> {
    presence(&backend, VehicleStatus::Absent).await
}

async fn get_vehicle(State(backend): State<FakeBackend>, Path(id): Path<i64>) -> Response {
    let state = backend.inner.lock().await;
    match state.vehicles.iter().find(|v| v.id == VehicleId(id)) {
        Some(vehicle) => Json(vehicle.clone()).into_response(),
        None => error_body(StatusCode::NOT_FOUND, "Veículo não encontrado"),
    }
}

async fn create_vehicle(
    State(backend): State<FakeBackend>,
    Json(draft): Json<VehicleDraft>,
) -> Response {
    let mut state = backend.inner.lock().await;
    let vehicle = insert_vehicle(&mut state, draft);
    (StatusCode::CREATED, Json(vehicle)).into_response()
}

async fn update_vehicle(
    State(backend): State<FakeBackend>,
    Path(id): Path<i64>,
    Json(draft): Json<VehicleDraft>,
) -> Response {
    let mut state = backend.inner.lock().await;
    let Some(vehicle) = state.vehicle_mut(VehicleId(id)) else {
        return error_body(
            StatusCode::BAD_REQUEST,
            &format!("Veículo não encontrado com o ID: {id}"),
        );
    };
    vehicle.plate = draft.plate;
    vehicle.make = draft.make;
    vehicle.model = draft.model;
    vehicle.color = draft.color;
    Json(vehicle.clone()).into_response()
}

async fn delete_vehicle(State(backend): State<FakeBackend>, Path(id): Path<i64>) -> Response {
    let mut state = backend.inner.lock().await;
    let before = state.vehicles.len();
    state.vehicles.retain(|v| v.id != VehicleId(id));
    if state.vehicles.len() == before {
        return error_body(
            StatusCode::BAD_REQUEST,
            &format!("Veículo não encontrado com id: {id}"),
        );
    }
    StatusCode::NO_CONTENT.into_response()
}
