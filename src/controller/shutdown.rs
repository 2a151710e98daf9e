//! Node shutdown protocol
//!
//! Before a pod is removed from a cluster its data must be moved elsewhere.
//! Implementations of [`NodeShutdown`] start that process for a set of leaving
//! nodes and tell whether a given node can be terminated safely.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// Progress of the shutdown of a single node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownStatus {
    #[default]
    NotStarted,
    /// Data is still being moved away from the node
    Started,
    /// The node can be terminated
    Complete,
}

impl fmt::Display for ShutdownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownStatus::NotStarted => write!(f, "NOT_STARTED"),
            ShutdownStatus::Started => write!(f, "STARTED"),
            ShutdownStatus::Complete => write!(f, "COMPLETE"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeShutdownStatus {
    pub status: ShutdownStatus,
    pub explanation: Option<String>,
}

impl NodeShutdownStatus {
    pub fn new(status: ShutdownStatus) -> Self {
        Self {
            status,
            explanation: None,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status == ShutdownStatus::Complete
    }
}

#[async_trait]
pub trait NodeShutdown: Send + Sync {
    /// Prepare the cluster for the removal of `leaving_nodes`.
    /// An empty slice clears any previous preparation.
    async fn reconcile_shutdowns(&self, leaving_nodes: &[String]) -> Result<()>;

    /// Whether the node backed by `pod_name` can be terminated
    async fn shutdown_status(&self, pod_name: &str) -> Result<NodeShutdownStatus>;
}
