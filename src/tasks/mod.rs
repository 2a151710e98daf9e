//! Background tasks decoupled from the reconciliation cadence

mod manager;
mod nodes;

pub use manager::{LogicalTime, Task, TaskManager};
pub use nodes::NodesTask;
