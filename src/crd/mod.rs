//! Custom Resource Definitions for the Elasticsearch operator

mod elasticsearch;
pub mod types;


pub use elasticsearch::{
    naming, Elasticsearch, ElasticsearchSpec, ElasticsearchStatus, NodeSet, CLUSTER_NAME_LABEL,
    NODE_SET_LABEL,
};
pub use types::*;
