//! Background listing of the nodes that joined a cluster

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::manager::{LogicalTime, Task, TaskManager};
use crate::error::{Error, Result};
use crate::es_client::EsClient;

/// Fetches the names of the nodes currently in a cluster
pub struct NodesTask {
    namespace: String,
    name: String,
    client: Arc<dyn EsClient>,
    timeout: Duration,
}

impl NodesTask {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        client: Arc<dyn EsClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            client,
            timeout,
        }
    }

    /// Node names computed at or after `as_of`, `None` while not ready
    pub fn node_names(
        task: &Arc<Self>,
        tasks: &TaskManager,
        as_of: LogicalTime,
    ) -> Option<Result<Vec<String>>> {
        tasks.consume_result(task, as_of)
    }
}

#[async_trait]
impl Task for NodesTask {
    type Output = Vec<String>;

    fn key(&self) -> String {
        format!("{}/{}/nodes", self.namespace, self.name)
    }

    async fn run(&self) -> Result<Vec<String>> {
        let nodes = tokio::time::timeout(self.timeout, self.client.get_nodes())
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;
        Ok(nodes.names())
    }
}
