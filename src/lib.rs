//! Elastic-K8s: Kubernetes operator core for Elasticsearch clusters
//!
//! This crate orchestrates node changes of Elasticsearch clusters running on
//! Kubernetes: shard migration before node removal, rolling change budgets,
//! the transport layer certificate authority, and license propagation.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod es_client;
pub mod tasks;

pub use crate::error::{Error, Result};
