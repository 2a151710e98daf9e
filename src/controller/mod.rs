//! Controller module for Elasticsearch reconciliation
//! This module contains the main controller loop, the orchestration of node
//! changes, and the collaborators it talks to.

pub mod certificates;
pub mod change_budget;
pub mod conditions;
pub mod es_state;
pub mod events;
pub mod license;
pub mod migration;
pub mod node_sets;
mod reconciler;
pub mod resources;
pub mod shutdown;
#[cfg(test)]
mod test_utils;

pub use certificates::{DynamicWatches, KubeSecretStore, RotationParams, SecretStore};
pub use es_state::{EsState, MemoizingEsState};
pub use events::{EventRecorder, KubeEventRecorder};
pub use license::{KubeLicenseChecker, LicenseChecker};
pub use migration::ShardMigration;
pub use reconciler::{run_controller, ControllerState, ELASTICSEARCH_FINALIZER};
pub use shutdown::{NodeShutdown, NodeShutdownStatus, ShutdownStatus};
