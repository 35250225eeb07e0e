//! Zero-payload "movement state changed" signal.
//!
//! Every committed write (movement registration, history edit, vehicle
//! change) emits one signal. Views never learn *what* changed; they re-query.

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct UpdateChannel {
    sender: broadcast::Sender<()>,
}

impl UpdateChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Fan the signal out to every live subscriber. Having none is fine.
    pub fn notify(&self) {
        let receivers = self.sender.send(()).unwrap_or(0);
        debug!(receivers, "movement update signalled");
    }

    /// Subscription that fires once immediately and then once per emission.
    pub fn subscribe(&self) -> RefreshTrigger {
        RefreshTrigger {
            rx: self.sender.subscribe(),
            seeded: false,
        }
    }

    /// Subscription that only sees emissions made after this call.
    pub fn subscribe_raw(&self) -> RefreshTrigger {
        RefreshTrigger {
            rx: self.sender.subscribe(),
            seeded: true,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for UpdateChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct RefreshTrigger {
    rx: broadcast::Receiver<()>,
    seeded: bool,
}

impl RefreshTrigger {
    /// Waits for the next refresh signal. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<()> {
        if !self.seeded {
            self.seeded = true;
            return Some(());
        }

        match self.rx.recv().await {
            Ok(()) => Some(()),
            // Signals carry nothing, so any number of missed ones is one refresh.
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "refresh trigger lagged; collapsing");
                self.rx = self.rx.resubscribe();
                Some(())
            }
            Err(RecvError::Closed) => None,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ()> + Send + 'static {
        futures::stream::unfold(self, |mut trigger| async move {
            trigger.recv().await.map(|signal| (signal, trigger))
        })
    }
}

#[cfg(test)]
#[path = "tests/notify_tests.rs"]
mod tests;
