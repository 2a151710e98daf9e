//! User-visible Kubernetes events

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;

use crate::error::{Error, Result};

/// Reason used when user-provided configuration fails validation
pub const REASON_VALIDATION: &str = "Validation";
pub const REASON_CHANGE_BUDGET_STALLED: &str = "ChangeBudgetStalled";
pub const REASON_UNEXPECTED: &str = "Unexpected";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// Publishes events about a Kubernetes object
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: &str,
    ) -> Result<()>;
}

/// [`EventRecorder`] creating `core/v1` events
#[derive(Clone)]
pub struct KubeEventRecorder {
    client: Client,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        let namespace = object
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let time = chrono::Utc::now();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!(
                    "{}-event-",
                    object.name.as_deref().unwrap_or("elasticsearch")
                )),
                ..Default::default()
            },
            type_: Some(type_.to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: object.clone(),
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            ..Default::default()
        };

        events
            .create(&PostParams::default(), &event)
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }
}
