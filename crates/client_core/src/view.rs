//! Views that re-query on every refresh signal and keep only the newest answer.
//!
//! A [`LiveView`] owns a background task. Each signal from its
//! [`RefreshTrigger`] (or an explicit [`LiveView::refresh`]) starts the view's
//! fetch. A fetch still in flight when a newer signal arrives is dropped, so a
//! slow stale answer can never overwrite a fresher one. Failed fetches leave
//! the last good value in place.

use std::{future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt, Stream};
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use crate::notify::RefreshTrigger;

pub type FetchFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState<T> {
    pub value: Option<T>,
    /// Number of fetches that have completed (successfully or not).
    pub generation: u64,
    pub last_error: Option<String>,
}

impl<T> Default for ViewState<T> {
    fn default() -> Self {
        Self {
            value: None,
            generation: 0,
            last_error: None,
        }
    }
}

pub struct LiveView<T> {
    name: &'static str,
    state: watch::Receiver<ViewState<T>>,
    kick: Arc<Notify>,
    task: JoinHandle<()>,
}

impl<T> LiveView<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn spawn<F, Fut>(name: &'static str, trigger: RefreshTrigger, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (tx, state) = watch::channel(ViewState::default());
        let kick = Arc::new(Notify::new());
        let fetch = move || fetch().boxed();
        let task = tokio::spawn(drive(name, trigger, Arc::clone(&kick), fetch, tx));

        Self {
            name,
            state,
            kick,
            task,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn current(&self) -> Option<T> {
        self.state.borrow().value.clone()
    }

    pub fn state(&self) -> ViewState<T> {
        self.state.borrow().clone()
    }

    /// Re-run the fetch now, superseding any fetch in flight.
    pub fn refresh(&self) {
        self.kick.notify_one();
    }

    /// Waits for the next published state. `None` if the view task has ended.
    pub async fn changed(&mut self) -> Option<ViewState<T>> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Waits until at least `generation` fetches have completed.
    pub async fn wait_for_generation(&self, generation: u64) -> ViewState<T> {
        let mut state = self.state.clone();
        let reached = match state.wait_for(|s| s.generation >= generation).await {
            Ok(reached) => Some(reached.clone()),
            Err(_) => None,
        };
        reached.unwrap_or_else(|| state.borrow().clone())
    }

    /// Waits for the first state whose value satisfies `accept`.
    pub async fn wait_until(&self, accept: impl Fn(&T) -> bool) -> Option<T> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| s.value.as_ref().is_some_and(&accept))
            .await
            .ok()?;
        reached.value.clone()
    }

    pub fn stream(&self) -> impl Stream<Item = ViewState<T>> + Send + 'static {
        WatchStream::new(self.state.clone())
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive<T, F>(
    name: &'static str,
    mut trigger: RefreshTrigger,
    kick: Arc<Notify>,
    fetch: F,
    tx: watch::Sender<ViewState<T>>,
) where
    T: Send + Sync + 'static,
    F: Fn() -> FetchFuture<T>,
{
    let mut in_flight: Option<FetchFuture<T>> = None;
    let mut generation = 0_u64;
    let mut listening = true;

    loop {
        tokio::select! {
            signal = trigger.recv(), if listening => match signal {
                Some(()) => {
                    if in_flight.is_some() {
                        debug!(view = name, "newer signal supersedes refresh in flight");
                    }
                    in_flight = Some(fetch());
                }
                None => {
                    debug!(view = name, "update channel closed");
                    listening = false;
                }
            },
            _ = kick.notified() => {
                in_flight = Some(fetch());
            }
            Some(result) = poll_in_flight(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                generation += 1;
                match result {
                    Ok(value) => {
                        tx.send_replace(ViewState {
                            value: Some(value),
                            generation,
                            last_error: None,
                        });
                    }
                    Err(err) => {
                        warn!(view = name, error = %format!("{err:#}"), "refresh failed; keeping last value");
                        tx.send_modify(|state| {
                            state.generation = generation;
                            state.last_error = Some(format!("{err:#}"));
                        });
                    }
                }
            }
        }
    }
}

async fn poll_in_flight<T>(in_flight: &mut Option<FetchFuture<T>>) -> Option<anyhow::Result<T>> {
    match in_flight {
        Some(fetch) => Some(fetch.await),
        None => None,
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
