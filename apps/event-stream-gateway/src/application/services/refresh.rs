//! Periodic Stream Configuration Refresh
//!
//! Re-resolves the stream table on a fixed interval and publishes it. A
//! failed refresh is logged and the previously published snapshot stays
//! in place.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::registry::{RegistrySnapshot, StreamRegistry};
use super::resolver::{StreamConfigError, StreamConfigResolver};
use super::spec::SpecError;
use crate::application::ports::{LoadOutcome, MetricsRecorder};

/// Reloads and republishes the stream table.
pub struct StreamRefresher {
    resolver: Arc<StreamConfigResolver>,
    registry: Arc<StreamRegistry>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl StreamRefresher {
    /// Create a refresher.
    #[must_use]
    pub fn new(
        resolver: Arc<StreamConfigResolver>,
        registry: Arc<StreamRegistry>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            resolver,
            registry,
            metrics,
        }
    }

    /// Resolve and publish once.
    ///
    /// # Errors
    ///
    /// Returns `RefreshError` if resolving or publishing fails; the
    /// registry is left unchanged.
    pub async fn refresh_once(&self) -> Result<Arc<RegistrySnapshot>, RefreshError> {
        let result = match self.resolver.load().await {
            Ok(table) => self.registry.publish(table).map_err(RefreshError::from),
            Err(e) => Err(RefreshError::from(e)),
        };

        match &result {
            Ok(snapshot) => self
                .metrics
                .record_config_load(LoadOutcome::Success, snapshot.table.len()),
            Err(_) => self
                .metrics
                .record_config_load(LoadOutcome::Failure, self.registry.table().len()),
        }

        result
    }

    /// Spawn the refresh loop.
    ///
    /// Returns `None` when refreshing is disabled: a zero interval, or a
    /// stream set given statically in configuration.
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if interval.is_zero() || self.resolver.options().is_static() {
            tracing::debug!("Stream config refresh disabled");
            return None;
        }

        tracing::info!(
            interval_secs = interval.as_secs(),
            "Stream config refresh enabled"
        );

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial load already ran.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!("Stream config refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh_once().await {
                            tracing::warn!(
                                error = %e,
                                "Stream config refresh failed, keeping previous streams"
                            );
                        }
                    }
                }
            }
        }))
    }
}

/// A refresh did not publish a new table.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The stream table could not be resolved.
    #[error(transparent)]
    Load(#[from] StreamConfigError),

    /// The API description could not be generated.
    #[error(transparent)]
    Publish(#[from] SpecError),
}
