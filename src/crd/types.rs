//! Shared types used by the Elasticsearch custom resource

use std::cmp::Ordering;
use std::fmt;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Health of the cluster as returned by the `_cluster/health` API.
///
/// Ranked from worst to best: red, yellow, green. `Unknown` is not
/// comparable with anything, including itself.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElasticsearchHealth {
    Red,
    Yellow,
    Green,
    #[default]
    Unknown,
}

impl ElasticsearchHealth {
    fn rank(self) -> Option<u8> {
        match self {
            ElasticsearchHealth::Red => Some(1),
            ElasticsearchHealth::Yellow => Some(2),
            ElasticsearchHealth::Green => Some(3),
            ElasticsearchHealth::Unknown => None,
        }
    }

    /// True if `self` is strictly worse than `other`. Always false when
    /// either side is `Unknown`.
    pub fn is_worse_than(self, other: ElasticsearchHealth) -> bool {
        match (self.rank(), other.rank()) {
            (Some(l), Some(r)) => l.cmp(&r) == Ordering::Less,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ElasticsearchHealth::Red => "red",
            ElasticsearchHealth::Yellow => "yellow",
            ElasticsearchHealth::Green => "green",
            ElasticsearchHealth::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ElasticsearchHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the cluster from the controller point of view
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum OrchestrationPhase {
    /// Operating at the desired spec
    Ready,
    /// Working towards the desired state, the cluster can be unavailable
    #[default]
    ApplyingChanges,
    /// Data is being migrated away from nodes that are about to be removed
    MigratingData,
    /// The resource is invalid and cannot be reconciled
    Invalid,
}

impl fmt::Display for OrchestrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestrationPhase::Ready => "Ready",
            OrchestrationPhase::ApplyingChanges => "ApplyingChanges",
            OrchestrationPhase::MigratingData => "MigratingData",
            OrchestrationPhase::Invalid => "Invalid",
        };
        f.write_str(s)
    }
}

/// Reference to a secret in the namespace of the referencing resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    #[serde(default)]
    pub secret_name: String,
}

impl SecretRef {
    pub fn is_defined(&self) -> bool {
        !self.secret_name.is_empty()
    }
}

/// Transport layer settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(default)]
    pub tls: TransportTlsOptions,
}

/// TLS options for inter-node communication
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransportTlsOptions {
    /// Secret holding a user-supplied CA (`tls.crt` and `tls.key`, or `ca.crt` and `ca.key`).
    /// When absent, the operator manages a self-signed transport CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<SecretRef>,
}

impl TransportTlsOptions {
    /// The custom CA secret reference, if one is actually set
    pub fn custom_certificate(&self) -> Option<&SecretRef> {
        self.certificate.as_ref().filter(|r| r.is_defined())
    }
}

/// Specifies how updates to the cluster should be performed
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_budget: Option<ChangeBudget>,
}

impl UpdateStrategy {
    /// The user-provided budget, or the default one
    pub fn resolve_change_budget(&self) -> ChangeBudget {
        self.change_budget.clone().unwrap_or_default()
    }
}

/// How many Pods may be added or removed concurrently during a change.
///
/// Values are absolute numbers (`5`) or percentages of the Pod count at the
/// start of the update (`"10%"`). Percentages round down for `maxUnavailable`
/// and up for `maxSurge`. With both set to 0 automatic rolling changes
/// cannot make progress.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBudget {
    /// Maximum number of Pods that can be unavailable during the update (default 0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub max_unavailable: Option<IntOrString>,

    /// Maximum number of Pods that can be scheduled above the target count (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub max_surge: Option<IntOrString>,
}

pub const DEFAULT_MAX_SURGE: i32 = 1;
pub const DEFAULT_MAX_UNAVAILABLE: i32 = 0;

impl Default for ChangeBudget {
    fn default() -> Self {
        Self {
            max_unavailable: Some(IntOrString::Int(DEFAULT_MAX_UNAVAILABLE)),
            max_surge: Some(IntOrString::Int(DEFAULT_MAX_SURGE)),
        }
    }
}

impl ChangeBudget {
    pub fn max_surge_or_default(&self) -> IntOrString {
        self.max_surge
            .clone()
            .unwrap_or(IntOrString::Int(DEFAULT_MAX_SURGE))
    }

    pub fn max_unavailable_or_default(&self) -> IntOrString {
        self.max_unavailable
            .clone()
            .unwrap_or(IntOrString::Int(DEFAULT_MAX_UNAVAILABLE))
    }

    /// Check that both values are non-negative integers or well-formed percentages
    pub fn validate(&self) -> Result<(), String> {
        validate_int_or_percent("maxSurge", &self.max_surge_or_default())?;
        validate_int_or_percent("maxUnavailable", &self.max_unavailable_or_default())?;
        Ok(())
    }
}

fn validate_int_or_percent(field: &str, value: &IntOrString) -> Result<(), String> {
    match value {
        IntOrString::Int(i) if *i < 0 => Err(format!("{field} must not be negative, got {i}")),
        IntOrString::Int(_) => Ok(()),
        IntOrString::String(s) => parse_percent(s)
            .map(|_| ())
            .ok_or_else(|| format!("{field} must be an integer or a percentage like \"25%\", got {s:?}")),
    }
}

/// Parse `"30%"` into `30`. Returns `None` for anything that is not a
/// non-negative integer percentage.
pub fn parse_percent(value: &str) -> Option<u32> {
    value.trim().strip_suffix('%')?.trim().parse::<u32>().ok()
}

/// Reports the status of a condition on the Elasticsearch resource.
/// Follows Kubernetes convention for condition reporting.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "ReconciliationComplete")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
