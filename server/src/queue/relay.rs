//! Background outbox relay.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::{Store, StoreError};
use crate::queue::Distributor;

/// Periodically moves outbox entries that were not dispatched at commit
/// time into the broker.
pub struct OutboxRelay {
    store: Arc<Store>,
    distributor: Arc<Distributor>,
    interval: Duration,
    grace: TimeDelta,
}

impl OutboxRelay {
    /// Entries younger than five seconds are left to the unit of work that
    /// staged them.
    #[must_use]
    pub fn new(store: Arc<Store>, distributor: Arc<Distributor>, interval: Duration) -> Self {
        Self {
            store,
            distributor,
            interval,
            grace: TimeDelta::seconds(5),
        }
    }

    #[must_use]
    pub const fn with_grace(mut self, grace: TimeDelta) -> Self {
        self.grace = grace;
        self
    }

    /// Relay every due entry once. Returns how many reached the broker.
    pub async fn drain_once(&self) -> Result<usize, StoreError> {
        self.store.relay_outbox(&self.distributor, self.grace).await
    }

    /// Start draining every `interval` on the current tokio runtime.
    pub fn start(self) -> RelayHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(10)));
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => match self.drain_once().await {
                        Ok(0) => {}
                        Ok(relayed) => tracing::info!("relayed {relayed} outbox entries"),
                        Err(e) => tracing::warn!("outbox relay failed: {e}"),
                    },
                }
            }
            tracing::info!("outbox relay stopped");
        });
        RelayHandle { shutdown, join }
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RelayHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!("outbox relay task failed: {e}");
        }
    }
}
