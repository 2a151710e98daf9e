//! Operator configuration assembled from command line flags and environment

use std::time::Duration;

use clap::Args;

use crate::controller::RotationParams;
use crate::error::{Error, Result};

/// Flags of the `run` command
#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Namespace the operator runs in, holds the leader lease and license secrets
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "elastic-system")]
    pub namespace: String,

    /// Validity of generated CA certificates, in days
    #[arg(long, env = "CA_VALIDITY_DAYS", default_value_t = 365)]
    pub ca_validity_days: u64,

    /// Rotate generated CA certificates this many hours before they expire
    #[arg(long, env = "CA_ROTATE_BEFORE_HOURS", default_value_t = 24)]
    pub ca_rotate_before_hours: u64,

    /// Deadline of every request sent to Elasticsearch, in seconds
    #[arg(long, env = "ES_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub es_request_timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Validated configuration shared with the controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub namespace: String,
    pub ca_rotation: RotationParams,
    pub es_request_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "elastic-system".to_string(),
            ca_rotation: RotationParams::default(),
            es_request_timeout: crate::es_client::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl TryFrom<&RunArgs> for OperatorConfig {
    type Error = Error;

    fn try_from(args: &RunArgs) -> Result<Self> {
        if args.namespace.trim().is_empty() {
            return Err(Error::ConfigError("namespace must not be empty".to_string()));
        }
        if args.es_request_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "es-request-timeout-secs must be positive".to_string(),
            ));
        }
        let validity = Duration::from_secs(args.ca_validity_days * 24 * 60 * 60);
        let rotate_before = Duration::from_secs(args.ca_rotate_before_hours * 60 * 60);
        if rotate_before >= validity {
            return Err(Error::ConfigError(format!(
                "ca-rotate-before-hours ({}) must be shorter than ca-validity-days ({})",
                args.ca_rotate_before_hours, args.ca_validity_days
            )));
        }

        Ok(Self {
            namespace: args.namespace.clone(),
            ca_rotation: RotationParams {
                validity,
                rotate_before,
            },
            es_request_timeout: Duration::from_secs(args.es_request_timeout_secs),
        })
    }
}
