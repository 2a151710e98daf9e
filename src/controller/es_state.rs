//! Cluster facts fetched lazily, at most once per reconciliation pass

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::crd::ElasticsearchHealth;
use crate::error::{Error, Result};
use crate::es_client::EsClient;

/// Read-only view of the state of an Elasticsearch cluster
#[async_trait]
pub trait EsState: Send + Sync {
    /// True if every name in `node_names` is currently part of the cluster
    async fn nodes_in_cluster(&self, node_names: &[String]) -> Result<bool>;

    /// False only when `cluster.routing.allocation.enable` is transiently set to `none`
    async fn shard_allocations_enabled(&self) -> Result<bool>;

    async fn health(&self) -> Result<ElasticsearchHealth>;
}

/// A value computed on first access. Failures are kept as well and replayed
/// as [`Error::Cached`].
struct Memoized<T> {
    cell: OnceCell<std::result::Result<T, Arc<Error>>>,
}

impl<T> Default for Memoized<T> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }
}

impl<T> Memoized<T> {
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = self
            .cell
            .get_or_init(|| async move { fetch().await.map_err(Arc::new) })
            .await;
        match outcome {
            Ok(value) => Ok(value),
            Err(e) => Err(Error::Cached(Arc::clone(e))),
        }
    }
}

/// [`EsState`] backed by the Elasticsearch API.
///
/// Meant to live for a single reconciliation pass: each fact is requested
/// from the cluster at most once, so all decisions taken during the pass
/// see the same state.
pub struct MemoizingEsState {
    client: Arc<dyn EsClient>,
    timeout: Duration,
    nodes: Memoized<HashSet<String>>,
    shard_allocations_enabled: Memoized<bool>,
    health: Memoized<ElasticsearchHealth>,
}

impl MemoizingEsState {
    pub fn new(client: Arc<dyn EsClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            nodes: Memoized::default(),
            shard_allocations_enabled: Memoized::default(),
            health: Memoized::default(),
        }
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }
}

#[async_trait]
impl EsState for MemoizingEsState {
    async fn nodes_in_cluster(&self, node_names: &[String]) -> Result<bool> {
        let nodes = self
            .nodes
            .get_or_fetch(|| async {
                let nodes = self.with_timeout(self.client.get_nodes()).await?;
                debug!(count = nodes.nodes.len(), "Fetched cluster nodes");
                Ok(nodes.names().into_iter().collect())
            })
            .await?;
        Ok(node_names.iter().all(|name| nodes.contains(name)))
    }

    async fn shard_allocations_enabled(&self) -> Result<bool> {
        let enabled = self
            .shard_allocations_enabled
            .get_or_fetch(|| async {
                let allocation = self
                    .with_timeout(self.client.get_cluster_routing_allocation())
                    .await?;
                Ok(allocation.is_shard_allocation_enabled())
            })
            .await?;
        Ok(*enabled)
    }

    async fn health(&self) -> Result<ElasticsearchHealth> {
        let health = self
            .health
            .get_or_fetch(|| async {
                let health = self.with_timeout(self.client.get_cluster_health(&[])).await?;
                Ok(health.status)
            })
            .await?;
        Ok(*health)
    }
}
