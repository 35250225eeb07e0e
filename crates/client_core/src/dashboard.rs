use std::sync::Arc;

use futures::Stream;
use shared::domain::MovementKind;

use crate::{registry::MovementRegistry, vehicles::VehicleDirectory, view::LiveView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardSummary {
    pub total_vehicles: usize,
    pub present_vehicles: usize,
    pub entries_today: Option<u64>,
    pub exits_today: Option<u64>,
}

/// Vehicle totals come from the directory snapshot; daily counts are queried.
pub struct Dashboard {
    directory: Arc<VehicleDirectory>,
    entries_today: LiveView<u64>,
    exits_today: LiveView<u64>,
}

impl Dashboard {
    pub fn new(directory: Arc<VehicleDirectory>, registry: Arc<dyn MovementRegistry>) -> Self {
        let entries_today = count_view("entries_today", &directory, &registry, MovementKind::Entry);
        let exits_today = count_view("exits_today", &directory, &registry, MovementKind::Exit);
        Self {
            directory,
            entries_today,
            exits_today,
        }
    }

    pub fn total_vehicles(&self) -> usize {
        self.directory.total_count()
    }

    pub fn present_vehicles(&self) -> usize {
        self.directory.present_count()
    }

    pub fn total_vehicles_stream(&self) -> impl Stream<Item = usize> + Send + 'static {
        self.directory.total_count_stream()
    }

    pub fn present_vehicles_stream(&self) -> impl Stream<Item = usize> + Send + 'static {
        self.directory.present_count_stream()
    }

    pub fn entries_today(&self) -> &LiveView<u64> {
        &self.entries_today
    }

    pub fn exits_today(&self) -> &LiveView<u64> {
        &self.exits_today
    }

    /// Waits for the first answer of each daily count, then reads everything.
    pub async fn summary(&self) -> DashboardSummary {
        let (entries, exits) = tokio::join!(
            self.entries_today.wait_for_generation(1),
            self.exits_today.wait_for_generation(1)
        );
        DashboardSummary {
            total_vehicles: self.total_vehicles(),
            present_vehicles: self.present_vehicles(),
            entries_today: entries.value,
            exits_today: exits.value,
        }
    }
}

fn count_view(
    name: &'static str,
    directory: &VehicleDirectory,
    registry: &Arc<dyn MovementRegistry>,
    kind: MovementKind,
) -> LiveView<u64> {
    let registry = Arc::clone(registry);
    LiveView::spawn(name, directory.updates().subscribe(), move || {
        let registry = Arc::clone(&registry);
        async move { Ok::<_, anyhow::Error>(registry.count_today(kind).await?) }
    })
}

#[cfg(test)]
#[path = "tests/dashboard_tests.rs"]
mod tests;
