//! Paged movement history that follows both query changes and update signals.

use std::sync::Arc;

use shared::{
    domain::Movement,
    protocol::{HistoryFilter, Page, DEFAULT_PAGE_SIZE},
};
use tokio::sync::watch;
use tracing::debug;

use crate::{
    notify::UpdateChannel,
    registry::{MovementRegistry, RegistryError},
    view::LiveView,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub filter: HistoryFilter,
    /// 0-based.
    pub page: u32,
    pub size: u32,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            filter: HistoryFilter::default(),
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub struct HistoryView {
    registry: Arc<dyn MovementRegistry>,
    query: watch::Sender<HistoryQuery>,
    view: LiveView<Page<Movement>>,
}

impl HistoryView {
    pub fn new(registry: Arc<dyn MovementRegistry>, updates: &UpdateChannel, size: u32) -> Self {
        let (query, current) = watch::channel(HistoryQuery {
            size: size.max(1),
            ..HistoryQuery::default()
        });

        let fetch_registry = Arc::clone(&registry);
        let view = LiveView::spawn("history", updates.subscribe(), move || {
            let registry = Arc::clone(&fetch_registry);
            let query = current.borrow().clone();
            async move {
                let page = registry.history(&query.filter, query.page, query.size).await?;
                Ok::<_, anyhow::Error>(page)
            }
        });

        Self {
            registry,
            query,
            view,
        }
    }

    pub fn view(&self) -> &LiveView<Page<Movement>> {
        &self.view
    }

    pub fn page(&self) -> Option<Page<Movement>> {
        self.view.current()
    }

    pub fn query(&self) -> HistoryQuery {
        self.query.borrow().clone()
    }

    fn set_query(&self, change: impl FnOnce(&mut HistoryQuery)) {
        let changed = self.query.send_if_modified(|query| {
            let before = query.clone();
            change(query);
            *query != before
        });
        if changed {
            debug!(query = ?&*self.query.borrow(), "history query changed");
        }
        self.view.refresh();
    }

    /// Replaces the filter and goes back to the first page.
    pub fn apply_filter(&self, filter: HistoryFilter) {
        self.set_query(|query| {
            query.filter = filter;
            query.page = 0;
        });
    }

    pub fn clear_filter(&self) {
        self.apply_filter(HistoryFilter::default());
    }

    /// Moves to `page` if the last loaded page says it exists.
    pub fn go_to(&self, page: u32) -> bool {
        let Some(total_pages) = self.page().map(|p| p.total_pages) else {
            return false;
        };
        if page >= total_pages || page == self.query.borrow().page {
            return false;
        }
        self.set_query(|query| query.page = page);
        true
    }

    pub fn next_page(&self) -> bool {
        let current = self.query.borrow().page;
        self.go_to(current.saturating_add(1))
    }

    pub fn previous_page(&self) -> bool {
        let current = self.query.borrow().page;
        current > 0 && self.go_to(current - 1)
    }

    /// Saves an edited movement. The registry broadcasts, which reloads this view.
    pub async fn edit(&self, movement: &Movement) -> Result<Movement, RegistryError> {
        self.registry.update(movement.id, movement).await
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
