//! Fan-in of per-datacenter watches into one merged cluster

use crate::change::clusters_changed;
use crate::client::RegistryClient;
use crate::types::Cluster;
use crate::watch::{DEFAULT_RETRY_BACKOFF, DatacenterWatcher};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt, StreamMap};
use tracing::{Instrument, Span, info, info_span, warn};
use upstream_config::{WatchConfig, split_datacenters};

/// One datacenter's emissions, then `None` once its watch has ended.
type DatacenterStream = Pin<Box<dyn Stream<Item = Option<Vec<Cluster>>> + Send>>;

/// Watches one service across several datacenters.
///
/// Emits a single cluster named after the service whose endpoints are the
/// union of every datacenter's latest endpoints, in datacenter order, and
/// only when that union changes.
pub struct DatacenterAggregator {
    client: Arc<dyn RegistryClient>,
    service: String,
    status: Vec<String>,
    datacenters: Vec<String>,
    env_tag: Option<String>,
    retry_backoff: Duration,
    span: Span,
}

impl DatacenterAggregator {
    /// Watch `service` in the agent's own datacenter
    pub fn new(client: Arc<dyn RegistryClient>, service: impl Into<String>, status: Vec<String>) -> Self {
        Self {
            client,
            service: service.into(),
            status,
            datacenters: split_datacenters(""),
            env_tag: None,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            span: Span::current(),
        }
    }

    pub fn from_config(client: Arc<dyn RegistryClient>, config: &WatchConfig) -> Self {
        Self::new(client, config.service.clone(), config.status.clone())
            .with_datacenter_list(config.datacenter_list())
            .with_retry_backoff(config.retry_backoff())
    }

    /// Comma-delimited datacenters
    pub fn with_datacenters(self, datacenters: &str) -> Self {
        self.with_datacenter_list(split_datacenters(datacenters))
    }

    pub fn with_datacenter_list(mut self, datacenters: Vec<String>) -> Self {
        self.datacenters = if datacenters.is_empty() {
            split_datacenters("")
        } else {
            datacenters
        };
        self
    }

    pub fn with_env_tag(mut self, env_tag: Option<String>) -> Self {
        self.env_tag = env_tag;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn datacenters(&self) -> &[String] {
        &self.datacenters
    }

    /// Start one watcher per datacenter plus the fan-in task.
    pub fn spawn(self) -> mpsc::Receiver<Vec<Cluster>> {
        let (tx, rx) = mpsc::channel(1);
        let span = info_span!(parent: &self.span, "watch", service = %self.service);
        tokio::spawn(self.run(tx).instrument(span));
        rx
    }

    /// Run the fan-in until every watcher has ended or `tx` is closed.
    pub async fn run(self, tx: mpsc::Sender<Vec<Cluster>>) {
        info!(service = %self.service, datacenters = ?self.datacenters, "watching services");

        let mut streams: StreamMap<usize, DatacenterStream> = StreamMap::new();
        for (position, datacenter) in self.datacenters.iter().enumerate() {
            let rx = DatacenterWatcher::new(
                self.client.clone(),
                self.service.clone(),
                self.status.clone(),
                datacenter.clone(),
            )
            .with_env_tag(self.env_tag.clone())
            .with_retry_backoff(self.retry_backoff)
            .with_span(info_span!("datacenter", name = %datacenter))
            .spawn();
            streams.insert(position, datacenter_stream(rx));
        }

        self.fan_in(streams, tx).await;
    }

    /// Merge per-datacenter emissions, keyed by position in `datacenters`.
    async fn fan_in(self, mut streams: StreamMap<usize, DatacenterStream>, tx: mpsc::Sender<Vec<Cluster>>) {
        let mut slots: Vec<Vec<Cluster>> = vec![Vec::new(); self.datacenters.len()];
        let mut last_result: Option<Vec<Cluster>> = None;

        loop {
            let next = tokio::select! {
                next = streams.next() => next,
                _ = tx.closed() => break,
            };
            let Some((position, update)) = next else {
                info!(service = %self.service, "all datacenter watches ended");
                break;
            };

            match update {
                Some(clusters) => slots[position] = clusters,
                None => {
                    warn!(
                        service = %self.service,
                        datacenter = %self.datacenters[position],
                        "datacenter watch ended, dropping its endpoints"
                    );
                    slots[position].clear();
                }
            }

            let result = vec![merge(&self.service, &slots)];
            let changed = match &last_result {
                Some(last) => clusters_changed(&result, last),
                None => true,
            };

            if changed {
                if tx.send(result.clone()).await.is_err() {
                    break;
                }
            } else {
                info!(
                    service = %self.service,
                    datacenter = %self.datacenters[position],
                    "health changed but server list not changed"
                );
            }
            last_result = Some(result);
        }
    }
}

fn datacenter_stream(rx: mpsc::Receiver<Vec<Cluster>>) -> DatacenterStream {
    Box::pin(
        ReceiverStream::new(rx)
            .map(Some)
            .chain(tokio_stream::once(None)),
    )
}

/// Concatenate the endpoints of `service` from every datacenter slot.
fn merge(service: &str, slots: &[Vec<Cluster>]) -> Cluster {
    let endpoints = slots
        .iter()
        .flatten()
        .filter(|cluster| cluster.name == service)
        .flat_map(|cluster| cluster.endpoints.iter().cloned())
        .collect();
    Cluster::new(service).with_endpoints(endpoints)
}
