//! Client-side reconciliation core for the vehicle gate.
//!
//! Movement writes go through [`registry`], which signals the
//! [`notify::UpdateChannel`] after every commit. The [`vehicles`] directory and
//! every [`view::LiveView`] re-query on that signal, and the
//! [`coordinator`] drives the confirm-and-retry exchange for status conflicts.

use std::sync::Arc;

use thiserror::Error;
use url::Url;

pub mod coordinator;
pub mod dashboard;
pub mod history;
pub mod notify;
pub mod registry;
pub mod vehicles;
pub mod view;

pub use coordinator::{
    AttemptState, ConfirmationPrompt, MovementForm, PromptDecision, RegistrationCoordinator,
    SubmissionOutcome, SubmitError,
};
pub use dashboard::{Dashboard, DashboardSummary};
pub use history::{HistoryQuery, HistoryView};
pub use notify::{RefreshTrigger, UpdateChannel};
pub use registry::{
    HttpMovementRegistry, MissingMovementRegistry, MovementRegistry, RegisterOutcome,
    RegistryError,
};
pub use vehicles::{DirectoryError, DirectorySnapshot, VehicleDirectory};
pub use view::{LiveView, ViewState};

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid API url: {0}")]
    Invalid(#[from] url::ParseError),
    #[error("API url must be http or https, got '{0}'")]
    UnsupportedScheme(String),
}

/// Base URL of the backend API, e.g. `http://localhost:8080/api`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    base: Url,
}

impl ApiEndpoint {
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let mut base = Url::parse(raw.trim())?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(EndpointError::UnsupportedScheme(base.scheme().to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    pub fn as_str(&self) -> &str {
        self.base.as_str()
    }
}

/// Everything a front end needs, wired to one shared update channel.
pub struct GateClient {
    pub updates: UpdateChannel,
    pub registry: Arc<HttpMovementRegistry>,
    pub vehicles: Arc<VehicleDirectory>,
}

impl GateClient {
    pub async fn connect(endpoint: ApiEndpoint) -> Self {
        let http = reqwest::Client::new();
        let updates = UpdateChannel::new();
        let registry = Arc::new(HttpMovementRegistry::with_client(
            http.clone(),
            endpoint.clone(),
            updates.clone(),
        ));
        let vehicles = VehicleDirectory::start(http, endpoint, updates.clone()).await;
        Self {
            updates,
            registry,
            vehicles,
        }
    }

    pub fn coordinator(&self, prompt: Arc<dyn ConfirmationPrompt>) -> RegistrationCoordinator {
        RegistrationCoordinator::new(self.registry.clone(), prompt)
    }

    pub fn dashboard(&self) -> Dashboard {
        Dashboard::new(Arc::clone(&self.vehicles), self.registry.clone())
    }

    pub fn history(&self, page_size: u32) -> HistoryView {
        HistoryView::new(self.registry.clone(), &self.updates, page_size)
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
