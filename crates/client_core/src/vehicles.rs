//! Vehicle Directory: one shared snapshot of the full vehicle list.
//!
//! The snapshot lives in a `watch` channel and is replaced wholesale on every
//! refresh, so readers always see a complete list. Each refresh takes a ticket
//! before fetching; an answer is only published if no refresh with a newer
//! ticket got there first. Refreshes run at construction and on every update
//! signal; a signal arriving while a signalled refresh is still in flight
//! drops that refresh unpublished. When one fails, the previous snapshot keeps
//! serving.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

use futures::{future::BoxFuture, FutureExt, Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Vehicle, VehicleDraft, VehicleId},
    error::BackendErrorBody,
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::{
    notify::{RefreshTrigger, UpdateChannel},
    view::LiveView,
    ApiEndpoint,
};

type ListFetch = BoxFuture<'static, (u64, Result<Vec<Vehicle>, DirectoryError>)>;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("vehicle request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("vehicle service answered {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("vehicle {0} not found")]
    NotFound(VehicleId),
    #[error("vehicle plate must not be blank")]
    BlankPlate,
    /// The write was committed; only the follow-up reload failed.
    #[error("vehicle change saved but the directory could not reload: {0}")]
    Refresh(#[source] Box<DirectoryError>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectorySnapshot {
    /// Ticket of the refresh that produced this snapshot; 0 before the first load.
    pub generation: u64,
    pub vehicles: Arc<[Vehicle]>,
}

impl Default for DirectorySnapshot {
    fn default() -> Self {
        Self {
            generation: 0,
            vehicles: Arc::from(Vec::new()),
        }
    }
}

impl DirectorySnapshot {
    pub fn find(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.iter().find(|vehicle| vehicle.id == id)
    }

    pub fn find_by_plate(&self, plate: &str) -> Option<&Vehicle> {
        let plate = plate.trim();
        self.vehicles
            .iter()
            .find(|vehicle| vehicle.plate.eq_ignore_ascii_case(plate))
    }

    pub fn total(&self) -> usize {
        self.vehicles.len()
    }

    pub fn present_count(&self) -> usize {
        self.vehicles.iter().filter(|v| v.is_present()).count()
    }

    /// Case-insensitive substring match on the plate. A blank term matches all.
    pub fn search_by_plate(&self, term: &str) -> Vec<Vehicle> {
        let term = term.trim().to_lowercase();
        self.vehicles
            .iter()
            .filter(|vehicle| term.is_empty() || vehicle.plate.to_lowercase().contains(&term))
            .cloned()
            .collect()
    }
}

pub struct VehicleDirectory {
    http: Client,
    endpoint: ApiEndpoint,
    updates: UpdateChannel,
    snapshot: watch::Sender<Arc<DirectorySnapshot>>,
    tickets: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl VehicleDirectory {
    fn new(http: Client, endpoint: ApiEndpoint, updates: UpdateChannel) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(DirectorySnapshot::default()));
        Self {
            http,
            endpoint,
            updates,
            snapshot,
            tickets: AtomicU64::new(0),
            listener: Mutex::new(None),
        }
    }

    /// Loads the first snapshot and keeps it fresh on every update signal.
    /// A failed first load is logged and leaves the directory empty.
    pub async fn start(http: Client, endpoint: ApiEndpoint, updates: UpdateChannel) -> Arc<Self> {
        let trigger = updates.subscribe_raw();
        let directory = Arc::new(Self::new(http, endpoint, updates));

        if let Err(err) = directory.refresh().await {
            warn!(error = %err, "initial vehicle load failed; starting empty");
        }

        let handle = tokio::spawn(listen(Arc::downgrade(&directory), trigger));

        if let Ok(mut listener) = directory.listener.lock() {
            *listener = Some(handle);
        }
        directory
    }

    pub fn updates(&self) -> &UpdateChannel {
        &self.updates
    }

    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DirectorySnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn total_count(&self) -> usize {
        self.snapshot.borrow().total()
    }

    pub fn present_count(&self) -> usize {
        self.snapshot.borrow().present_count()
    }

    pub fn total_count_stream(&self) -> impl Stream<Item = usize> + Send + 'static {
        WatchStream::new(self.subscribe()).map(|snapshot| snapshot.total())
    }

    pub fn present_count_stream(&self) -> impl Stream<Item = usize> + Send + 'static {
        WatchStream::new(self.subscribe()).map(|snapshot| snapshot.present_count())
    }

    pub fn search_by_plate(&self, term: &str) -> Vec<Vehicle> {
        self.snapshot.borrow().search_by_plate(term)
    }

    /// Fetches the full list and publishes it unless a newer refresh already has.
    pub async fn refresh(&self) -> Result<Arc<DirectorySnapshot>, DirectoryError> {
        let (ticket, fetched) = self.start_fetch().await;
        self.publish(ticket, fetched?);
        Ok(self.snapshot())
    }

    /// Takes a ticket now; the returned future only fetches and never publishes.
    fn start_fetch(&self) -> ListFetch {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let request = self.http.get(self.endpoint.url("veiculos"));
        async move { (ticket, fetch_list(request).await) }.boxed()
    }

    fn publish(&self, ticket: u64, vehicles: Vec<Vehicle>) -> bool {
        let count = vehicles.len();
        let published = self.snapshot.send_if_modified(|current| {
            if ticket <= current.generation {
                return false;
            }
            *current = Arc::new(DirectorySnapshot {
                generation: ticket,
                vehicles: vehicles.into(),
            });
            true
        });

        if published {
            debug!(ticket, count, "vehicle snapshot replaced");
        } else {
            debug!(ticket, "discarding vehicle list older than current snapshot");
        }
        published
    }

    /// Vehicles inside the facility, most recently moved first.
    pub fn present_vehicles(&self) -> LiveView<Vec<Vehicle>> {
        self.presence_view("present_vehicles", "veiculos/presentes")
    }

    /// Vehicles outside the facility, most recently moved first.
    pub fn absent_vehicles(&self) -> LiveView<Vec<Vehicle>> {
        self.presence_view("absent_vehicles", "veiculos/ausentes")
    }

    fn presence_view(&self, name: &'static str, path: &str) -> LiveView<Vec<Vehicle>> {
        let http = self.http.clone();
        let url = self.endpoint.url(path);
        LiveView::spawn(name, self.updates.subscribe(), move || {
            let request = http.get(url.as_str());
            async move {
                let response = request.send().await.map_err(DirectoryError::from)?;
                let mut vehicles: Vec<Vehicle> = decode(response).await?;
                sort_by_last_movement(&mut vehicles);
                Ok::<_, anyhow::Error>(vehicles)
            }
        })
    }

    pub async fn get(&self, id: VehicleId) -> Result<Vehicle, DirectoryError> {
        let response = self
            .http
            .get(self.endpoint.url(&format!("veiculos/{}", id.0)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(id));
        }
        decode(response).await
    }

    pub async fn create(&self, draft: &VehicleDraft) -> Result<Vehicle, DirectoryError> {
        ensure_plate(draft)?;
        let response = self
            .http
            .post(self.endpoint.url("veiculos"))
            .json(draft)
            .send()
            .await?;
        let vehicle: Vehicle = decode(response).await?;
        info!(vehicle_id = vehicle.id.0, plate = %vehicle.plate, "vehicle created");
        self.after_write().await?;
        Ok(vehicle)
    }

    pub async fn update(&self, id: VehicleId, draft: &VehicleDraft) -> Result<Vehicle, DirectoryError> {
        ensure_plate(draft)?;
        let response = self
            .http
            .put(self.endpoint.url(&format!("veiculos/{}", id.0)))
            .json(draft)
            .send()
            .await?;
        let vehicle: Vehicle = decode(response).await?;
        info!(vehicle_id = id.0, "vehicle updated");
        self.after_write().await?;
        Ok(vehicle)
    }

    pub async fn delete(&self, id: VehicleId) -> Result<(), DirectoryError> {
        let response = self
            .http
            .delete(self.endpoint.url(&format!("veiculos/{}", id.0)))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        info!(vehicle_id = id.0, "vehicle deleted");
        self.after_write().await
    }

    /// Reloads this directory, then tells every other view.
    async fn after_write(&self) -> Result<(), DirectoryError> {
        let refreshed = self.refresh().await;
        self.updates.notify();
        match refreshed {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, "vehicle change committed but reload failed");
                Err(DirectoryError::Refresh(Box::new(err)))
            }
        }
    }
}

impl Drop for VehicleDirectory {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

/// Refreshes on every signal, replacing any signalled refresh still in flight.
async fn listen(directory: Weak<VehicleDirectory>, mut trigger: RefreshTrigger) {
    let mut in_flight: Option<ListFetch> = None;
    let mut listening = true;

    while listening || in_flight.is_some() {
        tokio::select! {
            signal = trigger.recv(), if listening => {
                let Some(current) = signal.and_then(|()| directory.upgrade()) else {
                    listening = false;
                    continue;
                };
                if in_flight.is_some() {
                    debug!("newer signal supersedes vehicle refresh in flight");
                }
                in_flight = Some(current.start_fetch());
            }
            Some((ticket, fetched)) = poll_in_flight(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                let Some(current) = directory.upgrade() else {
                    break;
                };
                match fetched {
                    Ok(vehicles) => {
                        current.publish(ticket, vehicles);
                    }
                    Err(err) => {
                        warn!(error = %err, "vehicle refresh failed; serving previous snapshot");
                    }
                }
            }
        }
    }
    debug!("vehicle directory listener stopped");
}

async fn poll_in_flight(
    in_flight: &mut Option<ListFetch>,
) -> Option<(u64, Result<Vec<Vehicle>, DirectoryError>)> {
    match in_flight {
        Some(fetch) => Some(fetch.await),
        None => None,
    }
}

async fn fetch_list(request: RequestBuilder) -> Result<Vec<Vehicle>, DirectoryError> {
    let response = request.send().await?;
    decode(response).await
}

/// Most recently moved first; vehicles that never moved go last.
pub fn sort_by_last_movement(vehicles: &mut [Vehicle]) {
    vehicles.sort_by(|a, b| b.last_movement_at.cmp(&a.last_movement_at));
}

fn ensure_plate(draft: &VehicleDraft) -> Result<(), DirectoryError> {
    if draft.plate.trim().is_empty() {
        return Err(DirectoryError::BlankPlate);
    }
    Ok(())
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, DirectoryError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    Ok(response.json().await?)
}

fn status_error(status: StatusCode, body: &str) -> DirectoryError {
    DirectoryError::Status {
        status: status.as_u16(),
        reason: BackendErrorBody::reason(body),
    }
}

#[cfg(test)]
#[path = "tests/vehicles_tests.rs"]
mod tests;
