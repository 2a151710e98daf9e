//! Node shutdown through shard allocation filtering
//!
//! Leaving nodes are added to `cluster.routing.allocation.exclude._name`, which
//! makes Elasticsearch relocate their shards. A node is done once no shard is
//! left on it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::shutdown::{NodeShutdown, NodeShutdownStatus, ShutdownStatus};
use crate::error::Result;
use crate::es_client::{AllocationSetter, ShardLister};

/// Exclusion value used when no node is leaving
pub const NONE_EXCLUDED: &str = "none_excluded";

/// [`NodeShutdown`] implementation based on data migration
pub struct ShardMigration<C: ?Sized, S: ?Sized> {
    namespace: String,
    es_name: String,
    client: Arc<C>,
    shard_lister: Arc<S>,
}

impl<C, S> ShardMigration<C, S>
where
    C: AllocationSetter + ?Sized,
    S: ShardLister + ?Sized,
{
    pub fn new(
        namespace: impl Into<String>,
        es_name: impl Into<String>,
        client: Arc<C>,
        shard_lister: Arc<S>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            es_name: es_name.into(),
            client,
            shard_lister,
        }
    }

    /// True if `pod_name` holds a shard, or if some shard has no node at all.
    ///
    /// Shards of a node that just restarted show up unassigned for a while, so
    /// an unassigned shard may well belong to `pod_name`.
    async fn node_may_have_shard(&self, pod_name: &str) -> Result<bool> {
        let shards = self.shard_lister.get_shards().await?;
        for shard in &shards {
            if shard.node_name() == pod_name {
                return Ok(true);
            }
            if shard.is_unassigned() {
                info!(
                    namespace = %self.namespace,
                    es_name = %self.es_name,
                    index = %shard.index,
                    shard = %shard.shard,
                    shard_state = %shard.state,
                    "Found orphan shard, preventing data migration"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Value of the allocation exclusion filter for `leaving_nodes`
pub fn exclusion_value(leaving_nodes: &[String]) -> String {
    if leaving_nodes.is_empty() {
        NONE_EXCLUDED.to_string()
    } else {
        leaving_nodes.join(",")
    }
}

#[async_trait]
impl<C, S> NodeShutdown for ShardMigration<C, S>
where
    C: AllocationSetter + ?Sized,
    S: ShardLister + ?Sized,
{
    async fn reconcile_shutdowns(&self, leaving_nodes: &[String]) -> Result<()> {
        let exclusions = exclusion_value(leaving_nodes);
        info!(
            namespace = %self.namespace,
            es_name = %self.es_name,
            value = %exclusions,
            "Setting routing allocation excludes"
        );
        self.client.exclude_from_shard_allocation(&exclusions).await
    }

    async fn shutdown_status(&self, pod_name: &str) -> Result<NodeShutdownStatus> {
        if self.node_may_have_shard(pod_name).await? {
            return Ok(NodeShutdownStatus::new(ShutdownStatus::Started)
                .with_explanation("shards are still being migrated"));
        }
        Ok(NodeShutdownStatus::new(ShutdownStatus::Complete))
    }
}
