//! Long-poll watch of one service in one datacenter

use crate::change::{checks_equal, clusters_changed};
use crate::client::RegistryClient;
use crate::cluster::ClusterBuilder;
use crate::passing::passing_services;
use crate::types::{Cluster, HealthCheck};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, info, warn};

/// Pause after a failed blocking query.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Watches the health of one service in one datacenter and emits the
/// cluster list each time the effective topology changes.
///
/// The loop keeps its watermark and baselines to itself. It stops when the
/// receiving side of its output channel is dropped.
pub struct DatacenterWatcher {
    client: Arc<dyn RegistryClient>,
    service: String,
    status: Vec<String>,
    builder: ClusterBuilder,
    retry_backoff: Duration,
    span: Span,
}

impl DatacenterWatcher {
    pub fn new(
        client: Arc<dyn RegistryClient>,
        service: impl Into<String>,
        status: Vec<String>,
        datacenter: impl Into<String>,
    ) -> Self {
        let builder = ClusterBuilder::new(client.clone(), datacenter);
        Self {
            client,
            service: service.into(),
            status,
            builder,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            span: Span::current(),
        }
    }

    pub fn with_env_tag(mut self, env_tag: Option<String>) -> Self {
        self.builder = self.builder.with_env_tag(env_tag);
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Span the watch loop logs under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Start the watch on the current runtime.
    pub fn spawn(self) -> mpsc::Receiver<Vec<Cluster>> {
        let (tx, rx) = mpsc::channel(1);
        let span = self.span.clone();
        tokio::spawn(self.run(tx).instrument(span));
        rx
    }

    /// Run the watch loop until `tx` is closed.
    pub async fn run(self, tx: mpsc::Sender<Vec<Cluster>>) {
        let datacenter = self.builder.datacenter().to_string();
        let mut last_index = 0u64;
        let mut last_passing: Option<Vec<HealthCheck>> = None;
        let mut last_clusters: Option<Vec<Cluster>> = None;

        info!(service = %self.service, datacenter = %datacenter, status = ?self.status, "watching service");

        loop {
            let fetched = tokio::select! {
                result = self.client.fetch_health(&self.service, &datacenter, last_index) => result,
                _ = tx.closed() => break,
            };

            let (checks, index) = match fetched {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(service = %self.service, datacenter = %datacenter, error = %e, "error fetching health state");
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_backoff) => continue,
                        _ = tx.closed() => break,
                    }
                }
            };

            let index = next_index(last_index, index);
            let passing = passing_services(&checks, &self.status);
            debug!(service = %self.service, datacenter = %datacenter, index, "health changed");

            if let Some(previous) = &last_passing {
                if checks_equal(previous, &passing) {
                    // Advance so the next query blocks on new state instead
                    // of replaying this snapshot.
                    last_index = index;
                    debug!(service = %self.service, datacenter = %datacenter, index, "passing list not changed");
                    continue;
                }
            }

            // On failure neither baseline nor watermark moves, so the next
            // cycle returns at once and rebuilds from the same snapshot.
            let clusters = match self.builder.build(&passing).await {
                Ok(clusters) => clusters,
                Err(e) => {
                    warn!(service = %self.service, datacenter = %datacenter, error = %e, "error getting catalog service");
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_backoff) => continue,
                        _ = tx.closed() => break,
                    }
                }
            };
            last_index = index;

            let changed = match &last_clusters {
                Some(last) => clusters_changed(&clusters, last),
                None => true,
            };

            if changed {
                info!(
                    service = %self.service,
                    datacenter = %datacenter,
                    index,
                    endpoints = clusters.iter().map(|c| c.endpoints.len()).sum::<usize>(),
                    "server list changed"
                );
                if tx.send(clusters.clone()).await.is_err() {
                    break;
                }
                last_clusters = Some(clusters);
            } else {
                info!(service = %self.service, datacenter = %datacenter, index, "health changed but server list not changed");
            }
            last_passing = Some(passing);
        }

        debug!(service = %self.service, datacenter = %datacenter, "watch consumer gone, stopping");
    }
}

/// Watermark for the next blocking query.
///
/// A registry index that moved backwards (snapshot restore, leader change)
/// restarts the watch from 0 instead of blocking on an index that may
/// never be reached again.
fn next_index(last_index: u64, index: u64) -> u64 {
    if index < last_index { 0 } else { index }
}
