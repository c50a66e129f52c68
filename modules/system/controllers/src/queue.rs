//! Generic resync controller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::client::ResourceClient;
use crate::error::{ClientError, HandlerError};
use crate::object::{ObjectKey, resource_version};

/// Domain step run for each changed object of the watched resource.
///
/// Handlers must tolerate seeing the same object again: their own updates
/// change the object's resource version.
#[async_trait]
pub trait Handler: Send + Sync {
    /// # Errors
    /// A retryable error hands the object over again on the next resync.
    async fn handle(&self, object: &Value) -> Result<(), HandlerError>;
}

/// Counters of one [`QueueController::sync_once`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub handled: usize,
    pub retried: usize,
    pub dropped: usize,
}

impl SyncStats {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.handled == 0 && self.retried == 0 && self.dropped == 0
    }
}

/// Lists the watched resource every resync interval and hands each object
/// whose resource version changed since it was last handled to the handler.
pub struct QueueController {
    name: String,
    watched: Arc<dyn ResourceClient>,
    handler: Arc<dyn Handler>,
    resync: Duration,
    seen: Mutex<HashMap<ObjectKey, String>>,
}

impl std::fmt::Debug for QueueController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueController")
            .field("name", &self.name)
            .field("watched", &self.watched.resource())
            .field("resync", &self.resync)
            .finish_non_exhaustive()
    }
}

impl QueueController {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        watched: Arc<dyn ResourceClient>,
        handler: Arc<dyn Handler>,
        resync: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            watched,
            handler,
            resync,
            seen: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One pass over the watched resource.
    ///
    /// # Errors
    /// Returns the client error if the watched resource cannot be listed.
    pub async fn sync_once(&self) -> Result<SyncStats, ClientError> {
        let objects = self.watched.list("").await?;
        let mut stats = SyncStats::default();
        let mut live = HashSet::with_capacity(objects.len());

        for obj in &objects {
            let Some(key) = ObjectKey::of(obj) else {
                continue;
            };
            let version = resource_version(obj).to_owned();
            let unchanged = self.seen.lock().get(&key).is_some_and(|v| *v == version);
            live.insert(key.clone());
            if unchanged {
                continue;
            }

            match self.handler.handle(obj).await {
                Ok(()) => {
                    stats.handled += 1;
                    self.seen.lock().insert(key, version);
                }
                Err(e) if e.is_retryable() => {
                    stats.retried += 1;
                    tracing::warn!(controller = %self.name, object = %key, error = %e, "Will retry on next resync");
                }
                Err(e) => {
                    stats.dropped += 1;
                    tracing::error!(controller = %self.name, object = %key, error = %e, "Skipping object until it changes");
                    self.seen.lock().insert(key, version);
                }
            }
        }

        self.seen.lock().retain(|k, _| live.contains(k));
        Ok(stats)
    }

    /// Resync forever. Returns only when listing fails, so that the
    /// supervisor restarts the loop.
    ///
    /// # Errors
    /// Returns the listing failure.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        tracing::info!(controller = %self.name, resource = self.watched.resource(), "Controller started");
        loop {
            let stats = self.sync_once().await.with_context(|| {
                format!("{} cannot list {}", self.name, self.watched.resource())
            })?;
            if !stats.is_idle() {
                tracing::debug!(controller = %self.name, ?stats, "Resync finished");
            }
            tokio::time::sleep(self.resync).await;
        }
    }
}
