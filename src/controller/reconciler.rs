//! Main reconciler for Elasticsearch resources
//!
//! Implements the controller pattern using kube-rs runtime.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        reflector::ObjectRef,
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::certificates::{DynamicWatches, SecretStore, TransportCaReconciler};
use super::change_budget::ResolvedChangeBudget;
use super::conditions::{
    remove_condition, set_bool_condition, CONDITION_TYPE_CHANGE_BUDGET_STALLED,
    CONDITION_TYPE_ELASTICSEARCH_REACHABLE, CONDITION_TYPE_READY,
    CONDITION_TYPE_RECONCILIATION_COMPLETE,
};
use super::es_state::{EsState, MemoizingEsState};
use super::events::{
    EventRecorder, EventType, REASON_CHANGE_BUDGET_STALLED, REASON_UNEXPECTED, REASON_VALIDATION,
};
use super::license::{apply_linked_license, has_requested_license_level, LicenseChecker};
use super::migration::ShardMigration;
use super::node_sets::NodeChanges;
use super::resources::{self, FIELD_MANAGER};
use super::shutdown::NodeShutdown;
use crate::config::OperatorConfig;
use crate::crd::{
    Elasticsearch, ElasticsearchHealth, ElasticsearchStatus, OrchestrationPhase,
    CLUSTER_NAME_LABEL,
};
use crate::error::{Error, Result};
use crate::es_client::EsClientFactory;
use crate::tasks::{NodesTask, TaskManager};

pub const ELASTICSEARCH_FINALIZER: &str = "elasticsearch.k8s.elastic.co/finalizer";

/// Requeue delay while changes are in progress
const REQUEUE_PENDING: Duration = Duration::from_secs(10);
/// Requeue delay while the cluster cannot be reached yet
const REQUEUE_UNREACHABLE: Duration = Duration::from_secs(30);
/// Periodic resync of a converged cluster
const REQUEUE_STEADY: Duration = Duration::from_secs(300);

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub config: OperatorConfig,
    pub tasks: TaskManager,
    pub watches: DynamicWatches,
    pub es_clients: Arc<dyn EsClientFactory>,
    pub secrets: Arc<dyn SecretStore>,
    pub recorder: Arc<dyn EventRecorder>,
    pub license_checker: Arc<dyn LicenseChecker>,
    /// Only the lease holder reconciles
    pub is_leader: Arc<AtomicBool>,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let clusters: Api<Elasticsearch> = Api::all(client.clone());

    info!("Starting Elasticsearch controller");

    // Verify CRD exists
    match clusters.list(&Default::default()).await {
        Ok(_) => info!("Elasticsearch CRD is available"),
        Err(e) => {
            error!(
                "Elasticsearch CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "Elasticsearch CRD not installed".to_string(),
            ));
        }
    }

    let watches = state.watches.clone();

    Controller::new(clusters, Config::default())
        .owns::<StatefulSet>(Api::all(client.clone()), Config::default())
        // custom certificate secrets are only known once a cluster references them
        .watches(Api::<Secret>::all(client.clone()), Config::default(), move |secret| {
            watches.watchers_of(&secret)
        })
        .watches(
            Api::<Pod>::all(client.clone()),
            Config::default().labels(CLUSTER_NAME_LABEL),
            cluster_of_pod,
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// The cluster a Pod belongs to, from its cluster name label
fn cluster_of_pod(pod: Pod) -> Option<ObjectRef<Elasticsearch>> {
    let name = pod.labels().get(CLUSTER_NAME_LABEL)?;
    let mut cluster = ObjectRef::new(name);
    if let Some(namespace) = pod.namespace() {
        cluster = cluster.within(&namespace);
    }
    Some(cluster)
}

/// Main reconciliation function
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Elasticsearch>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping reconciliation");
        return Ok(Action::requeue(REQUEUE_PENDING));
    }

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Elasticsearch> = Api::namespaced(ctx.client.clone(), &namespace);

    info!("Reconciling Elasticsearch {}/{}", namespace, obj.name_any());

    finalizer(&api, ELASTICSEARCH_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(es) => apply_elasticsearch(&ctx, &es).await,
            FinalizerEvent::Cleanup(es) => cleanup_elasticsearch(&ctx, &es).await,
        }
    })
    .await
    .map_err(Error::from)
}

/// Converge the cluster towards its spec
async fn apply_elasticsearch(ctx: &ControllerState, es: &Elasticsearch) -> Result<Action> {
    let namespace = es.namespace().unwrap_or_else(|| "default".to_string());
    let name = es.name_any();
    let generation = es.metadata.generation;
    let previous = es.status.clone().unwrap_or_default();
    let mut status = ElasticsearchStatus {
        observed_generation: generation,
        ..previous.clone()
    };

    if let Err(e) = es.spec.validate() {
        warn!("Validation failed for {}/{}: {}", namespace, name, e);
        publish_event(ctx, es, EventType::Warning, REASON_VALIDATION, &e).await;
        status.phase = OrchestrationPhase::Invalid;
        update_status(&ctx.client, es, &status).await?;
        return Err(Error::ValidationError(e));
    }

    // Node changes wait for a usable transport CA.
    let transport = TransportCaReconciler {
        secrets: ctx.secrets.as_ref(),
        watches: &ctx.watches,
        recorder: ctx.recorder.as_ref(),
        rotation: ctx.config.ca_rotation,
    };
    transport.reconcile_or_retrieve_ca(es).await?;

    let client = match ctx.es_clients.client_for(es).await {
        Ok(client) => client,
        Err(e) if e.is_not_found() => {
            info!("Elasticsearch {}/{} is not reachable yet: {}", namespace, name, e);
            status.health = ElasticsearchHealth::Unknown;
            status.phase = OrchestrationPhase::ApplyingChanges;
            set_bool_condition(
                &mut status.conditions,
                CONDITION_TYPE_ELASTICSEARCH_REACHABLE,
                false,
                "CredentialsMissing",
                &e.to_string(),
                generation,
            );
            update_status(&ctx.client, es, &status).await?;
            return Ok(Action::requeue(REQUEUE_UNREACHABLE));
        }
        Err(e) => return Err(e),
    };
    let es_state = MemoizingEsState::new(client.clone(), ctx.config.es_request_timeout);

    let pods = resources::list_pods(&ctx.client, es).await?;
    let stateful_sets = resources::list_stateful_sets(&ctx.client, es).await?;
    let changes = NodeChanges::compute(es, &stateful_sets, &pods);
    for node_set in &changes.missing {
        debug!("No StatefulSet for node set {} yet", node_set);
    }

    let migration = ShardMigration::new(&namespace, &name, client.clone(), client.clone());
    let plan = plan_node_changes(es, &changes, &previous, &es_state, &migration).await?;
    for (stateful_set, replicas) in plan.scale_ups.iter().chain(&plan.scale_downs) {
        resources::scale_stateful_set(&ctx.client, &namespace, stateful_set, *replicas).await?;
    }

    status.phase = plan.phase;
    status.update_starting_pods = plan.update_starting_pods;
    match &plan.stalled {
        Some(message) => {
            warn!("Change budget stalled for {}/{}: {}", namespace, name, message);
            publish_event(
                ctx,
                es,
                EventType::Warning,
                REASON_CHANGE_BUDGET_STALLED,
                message,
            )
            .await;
            set_bool_condition(
                &mut status.conditions,
                CONDITION_TYPE_CHANGE_BUDGET_STALLED,
                true,
                "ZeroChangeBudget",
                message,
                generation,
            );
        }
        None => remove_condition(&mut status.conditions, CONDITION_TYPE_CHANGE_BUDGET_STALLED),
    }

    match has_requested_license_level(es.annotations(), ctx.license_checker.as_ref()).await {
        Ok(true) => {
            if let Err(e) = apply_linked_license(ctx.secrets.as_ref(), es, client.as_ref()).await {
                warn!("Could not apply linked license to {}/{}: {}", namespace, name, e);
            }
        }
        Ok(false) => warn!(
            "Enterprise license required for {}/{}, skipping linked license",
            namespace, name
        ),
        Err(e) => warn!("License check failed: {}", e),
    }

    let nodes_task = Arc::new(NodesTask::new(
        &namespace,
        &name,
        client,
        ctx.config.es_request_timeout,
    ));
    match NodesTask::node_names(&nodes_task, &ctx.tasks, generation.unwrap_or_default()) {
        Some(Ok(names)) => {
            status.available_nodes = i32::try_from(names.len()).unwrap_or(i32::MAX)
        }
        Some(Err(e)) => debug!("Could not list cluster nodes: {}", e),
        None => debug!("Node listing still in progress"),
    }

    let reachable = match es_state.health().await {
        Ok(health) => {
            status.health = health;
            true
        }
        Err(e) => {
            debug!("Could not retrieve cluster health: {}", e);
            status.health = ElasticsearchHealth::Unknown;
            false
        }
    };
    set_bool_condition(
        &mut status.conditions,
        CONDITION_TYPE_ELASTICSEARCH_REACHABLE,
        reachable,
        if reachable { "Reachable" } else { "Unreachable" },
        "",
        generation,
    );

    let converged = !changes.counts.has_pending_changes();
    set_bool_condition(
        &mut status.conditions,
        CONDITION_TYPE_RECONCILIATION_COMPLETE,
        converged,
        if converged { "Converged" } else { "ChangesPending" },
        &format!(
            "{} Pod(s) to create, {} to delete",
            changes.counts.to_create, changes.counts.to_delete
        ),
        generation,
    );
    let ready = converged && status.health == ElasticsearchHealth::Green;
    set_bool_condition(
        &mut status.conditions,
        CONDITION_TYPE_READY,
        ready,
        if ready { "AllNodesReady" } else { "NotReady" },
        &format!("health is {}", status.health),
        generation,
    );

    if status.is_degraded(&previous) {
        let message = format!(
            "Elasticsearch health degraded from {} to {}",
            previous.health, status.health
        );
        warn!("{}/{}: {}", namespace, name, message);
        publish_event(ctx, es, EventType::Warning, REASON_UNEXPECTED, &message).await;
    }

    update_status(&ctx.client, es, &status).await?;

    if converged || plan.stalled.is_some() {
        Ok(Action::requeue(REQUEUE_STEADY))
    } else {
        Ok(Action::requeue(REQUEUE_PENDING))
    }
}

/// Drop everything the operator keeps in memory for the cluster
async fn cleanup_elasticsearch(ctx: &ControllerState, es: &Elasticsearch) -> Result<Action> {
    info!(
        "Cleaning up Elasticsearch {}/{}",
        es.namespace().unwrap_or_default(),
        es.name_any()
    );
    ctx.watches.remove_all_for(&ObjectRef::from_obj(es));
    Ok(Action::await_change())
}

/// Node changes decided for one pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct NodePlan {
    pub scale_ups: Vec<(String, i32)>,
    pub scale_downs: Vec<(String, i32)>,
    pub phase: OrchestrationPhase,
    /// Why the change budget forbids any progress
    pub stalled: Option<String>,
    pub update_starting_pods: Option<i32>,
}

/// Decide which StatefulSets to resize in this pass.
///
/// Leaving Pods are excluded from shard allocation first; a StatefulSet only
/// shrinks once the data of its trailing Pods has moved and the remaining
/// nodes are part of the cluster.
pub(crate) async fn plan_node_changes(
    es: &Elasticsearch,
    changes: &NodeChanges,
    previous: &ElasticsearchStatus,
    es_state: &dyn EsState,
    shutdown: &dyn NodeShutdown,
) -> Result<NodePlan> {
    let counts = changes.counts;

    if !counts.has_pending_changes() {
        clear_exclusions(shutdown).await;
        return Ok(NodePlan {
            phase: OrchestrationPhase::Ready,
            ..Default::default()
        });
    }

    let starting_pods = previous
        .update_starting_pods
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(counts.current);
    let budget = ResolvedChangeBudget::resolve(
        &es.spec.update_strategy.resolve_change_budget(),
        starting_pods,
    )?;
    let mut plan = NodePlan {
        phase: OrchestrationPhase::ApplyingChanges,
        update_starting_pods: Some(starting_pods as i32),
        ..Default::default()
    };

    let allowance = match budget.allowance(counts) {
        Ok(allowance) => allowance,
        Err(Error::ChangeBudgetStalled(message)) => {
            plan.stalled = Some(message);
            return Ok(plan);
        }
        Err(e) => return Err(e),
    };
    debug!(?counts, ?allowance, "Change budget allowance");
    plan.scale_ups = changes.scale_ups(allowance.creations);

    if changes.leaving.is_empty() {
        clear_exclusions(shutdown).await;
        return Ok(plan);
    }

    if !es_state.shard_allocations_enabled().await? {
        info!("Shard allocation is disabled, delaying node removal");
        return Ok(plan);
    }

    shutdown.reconcile_shutdowns(&changes.leaving).await?;
    plan.phase = OrchestrationPhase::MigratingData;

    let mut complete = HashSet::new();
    for pod in &changes.leaving {
        let status = shutdown.shutdown_status(pod).await?;
        if status.is_complete() {
            complete.insert(pod.clone());
        } else {
            debug!(
                pod = %pod,
                status = %status.status,
                explanation = status.explanation.as_deref().unwrap_or_default(),
                "Node shutdown in progress"
            );
        }
    }

    if complete.is_empty() {
        return Ok(plan);
    }
    if !es_state.nodes_in_cluster(&changes.remaining).await? {
        info!("Remaining nodes have not all joined the cluster, delaying node removal");
        return Ok(plan);
    }
    plan.scale_downs = changes.scale_downs(&es.name_any(), &complete, allowance.deletions);
    Ok(plan)
}

/// Lift allocation exclusions left over by an earlier migration.
///
/// Runs on every pass without leaving nodes since the pass that set them may
/// not be the last one. Failures only delay the cleanup to the next pass.
async fn clear_exclusions(shutdown: &dyn NodeShutdown) {
    if let Err(e) = shutdown.reconcile_shutdowns(&[]).await {
        warn!("Could not clear shard allocation exclusions: {}", e);
    }
}

/// Patch the status subresource.
///
/// The whole status is sent so that cleared fields are written as null.
async fn update_status(
    client: &Client,
    es: &Elasticsearch,
    status: &ElasticsearchStatus,
) -> Result<()> {
    let namespace = es.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Elasticsearch> = Api::namespaced(client.clone(), &namespace);

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &es.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(Error::KubeError)?;

    Ok(())
}

/// Publish an event, a failure is only logged
async fn publish_event(
    ctx: &ControllerState,
    es: &Elasticsearch,
    type_: EventType,
    reason: &str,
    message: &str,
) {
    if let Err(e) = ctx
        .recorder
        .publish(&es.object_ref(&()), type_, reason, message)
        .await
    {
        warn!("Failed to publish {} event: {}", reason, e);
    }
}

/// Error policy for the controller
fn error_policy(es: Arc<Elasticsearch>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", es.name_any(), error);
    Action::requeue(error.requeue_after())
}
