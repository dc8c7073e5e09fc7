//! Node registry: registration, heartbeat tracking, lifecycle transitions,
//! and eviction when a node is lost or drained.
//!
//! Lifecycle: `online -> unhealthy -> offline` on heartbeat silence, back to
//! `online` on the next accepted heartbeat. `draining` and `maintenance` are
//! administrative. Pods on an offline node are evicted; the service
//! reconciler grows replacements on its next pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use stark_common::args::TimingArgs;
use stark_common::protocol::{PodStateSummary, ServerFrame};
use stark_common::types::{
    Labels, Node, NodeResources, NodeStatus, Pod, PodStatus, RuntimeType, Taint, tolerated,
    TaintEffect,
};
use stark_common::{Error, Result};
use stark_store::nodes::{NewNode, NodePatch};
use stark_store::pods::{PodFilter, TransitionPatch};
use stark_store::{Store, nodes, pods};
use uuid::Uuid;

use crate::agent::Connections;
use crate::auth::Principal;
use crate::metrics;

/// Label the registry stamps on every node so DaemonSet pods can pin to it.
pub const NODE_NAME_LABEL: &str = "stark.dev/node-name";

#[derive(Debug, Clone)]
pub struct RegisterSpec {
    pub name: String,
    pub runtime_type: RuntimeType,
    pub runtime_version: Option<String>,
    pub allocatable: NodeResources,
    pub labels: Labels,
    pub taints: Vec<Taint>,
}

pub struct NodeRegistry {
    store: Store,
    connections: Arc<Connections>,
    timing: TimingArgs,
    /// Per-node bind locks: `allocated` is only updated while holding one,
    /// which is what prevents double-booking between concurrent binds.
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    banned_connections: RwLock<HashSet<Uuid>>,
}

impl NodeRegistry {
    pub fn new(store: Store, connections: Arc<Connections>, timing: TimingArgs) -> Self {
        Self {
            store,
            connections,
            timing,
            locks: Mutex::new(HashMap::new()),
            banned_connections: RwLock::new(HashSet::new()),
        }
    }

    pub fn node_lock(&self, node_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(node_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn ban_connection(&self, connection_id: Uuid) {
        self.banned_connections.write().insert(connection_id);
    }

    /// Register a node, creating the record or resuming an existing one by
    /// name. Always lands the node in `online`.
    pub async fn register(
        &self,
        corr: Uuid,
        principal: &Principal,
        connection_id: Uuid,
        spec: RegisterSpec,
    ) -> Result<Node> {
        let mut labels = spec.labels.clone();
        labels.insert(NODE_NAME_LABEL.to_string(), spec.name.clone());

        let node = match nodes::get_by_name(&self.store, &spec.name).await {
            Ok(existing) => {
                if let Some(other) = existing.connection_id
                    && other != connection_id
                    && self.connections.get(other).is_some()
                {
                    return Err(Error::Conflict(format!(
                        "node {} is active on another connection",
                        spec.name
                    )));
                }
                nodes::update(
                    &self.store,
                    corr,
                    existing.id,
                    NodePatch {
                        status: Some(NodeStatus::Online),
                        allocatable: Some(spec.allocatable),
                        labels: Some(labels),
                        taints: Some(spec.taints.clone()),
                        runtime_version: spec.runtime_version.clone(),
                        last_heartbeat: Some(Utc::now()),
                        connection_id: Some(Some(connection_id)),
                        ..Default::default()
                    },
                )
                .await?
            }
            Err(stark_store::StoreError::NotFound(_)) => {
                nodes::create(
                    &self.store,
                    corr,
                    NewNode {
                        name: spec.name.clone(),
                        runtime_type: spec.runtime_type,
                        runtime_version: spec.runtime_version.clone(),
                        allocatable: spec.allocatable,
                        labels,
                        taints: spec.taints.clone(),
                        registered_by: principal.id,
                        connection_id: Some(connection_id),
                    },
                )
                .await?
            }
            Err(e) => return Err(e.into()),
        };

        self.connections.bind_node(connection_id, node.id)?;
        metrics::node_transition("online");
        tracing::info!(node = %node.name, node_id = %node.id, "node registered");
        Ok(node)
    }

    /// Ingest a heartbeat. Refused when the connection is banned or does not
    /// own the node. An accepted heartbeat from an unhealthy or offline node
    /// resyncs it back to `online`.
    pub async fn heartbeat(
        &self,
        corr: Uuid,
        connection_id: Uuid,
        node_id: Uuid,
        allocated: NodeResources,
        runtime_version: Option<String>,
        pod_states: &[PodStateSummary],
    ) -> Result<()> {
        if self.banned_connections.read().contains(&connection_id) {
            metrics::heartbeat_refused();
            return Err(Error::Auth("connection is banned".into()));
        }
        let node = nodes::get_by_id(&self.store, node_id).await?;
        if node.connection_id != Some(connection_id) {
            metrics::heartbeat_refused();
            return Err(Error::Auth(format!(
                "connection does not own node {node_id}"
            )));
        }
        metrics::heartbeat_received();

        // Observed allocation is advisory; never let it break the
        // allocated <= allocatable invariant.
        let clamped = NodeResources {
            cpu: allocated.cpu.min(node.allocatable.cpu),
            memory: allocated.memory.min(node.allocatable.memory),
            storage: allocated.storage.min(node.allocatable.storage),
            pods: allocated.pods.min(node.allocatable.pods),
        };
        let status = match node.status {
            NodeStatus::Unhealthy | NodeStatus::Offline => {
                metrics::node_transition("online");
                tracing::info!(node = %node.name, "node resynced to online");
                Some(NodeStatus::Online)
            }
            _ => None,
        };
        nodes::update(
            &self.store,
            corr,
            node_id,
            NodePatch {
                status,
                allocated: Some(clamped),
                runtime_version,
                last_heartbeat: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;

        for summary in pod_states {
            if let Err(e) = self.reconcile_pod_state(corr, summary).await {
                tracing::debug!(pod_id = %summary.pod_id, "pod state resync skipped: {e}");
            }
        }
        Ok(())
    }

    /// Fold an agent-reported pod status into the store, but only along
    /// declared state-machine edges.
    async fn reconcile_pod_state(&self, corr: Uuid, summary: &PodStateSummary) -> Result<()> {
        let pod = pods::get_by_id(&self.store, summary.pod_id).await?;
        if pod.status == summary.status || !pod.status.can_transition_to(summary.status) {
            return Ok(());
        }
        let mut patch = TransitionPatch {
            status_message: summary.message.clone().map(Some),
            ..Default::default()
        };
        if summary.status == PodStatus::Running && pod.started_at.is_none() {
            patch.started_at = Some(Utc::now());
        }
        if summary.status.is_terminal() && pod.stopped_at.is_none() {
            patch.stopped_at = Some(Utc::now());
        }
        pods::transition(&self.store, corr, pod.id, pod.status, summary.status, patch).await?;
        Ok(())
    }

    /// Periodic lifecycle sweep: missed-heartbeat transitions, lost-node
    /// eviction, drain progress, and NoExecute taint enforcement.
    pub async fn sweep(&self, corr: Uuid, now: DateTime<Utc>) -> Result<()> {
        let unhealthy_after = self.timing.unhealthy_after_secs() as i64;
        let offline_after = self.timing.offline_after_secs() as i64;

        for node in nodes::list_all(&self.store).await? {
            let lag = now
                .signed_duration_since(node.last_heartbeat.unwrap_or(node.created_at))
                .num_seconds();
            match node.status {
                NodeStatus::Online if lag > unhealthy_after => {
                    tracing::warn!(node = %node.name, lag, "node unhealthy: heartbeats missed");
                    metrics::node_transition("unhealthy");
                    if let Err(e) = nodes::transition(
                        &self.store,
                        corr,
                        node.id,
                        NodeStatus::Online,
                        NodeStatus::Unhealthy,
                    )
                    .await
                    {
                        tracing::debug!(node = %node.name, "unhealthy transition lost: {e}");
                    }
                }
                NodeStatus::Unhealthy if lag > offline_after => {
                    tracing::warn!(node = %node.name, lag, "node offline: evicting pods");
                    metrics::node_transition("offline");
                    match nodes::transition(
                        &self.store,
                        corr,
                        node.id,
                        NodeStatus::Unhealthy,
                        NodeStatus::Offline,
                    )
                    .await
                    {
                        Ok(_) => self.evict_all(corr, node.id, "node lost").await?,
                        Err(e) => {
                            tracing::debug!(node = %node.name, "offline transition lost: {e}")
                        }
                    }
                }
                NodeStatus::Draining => {
                    self.drain_step(corr, &node).await?;
                }
                NodeStatus::Online => {
                    self.enforce_no_execute(corr, &node).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Transition every non-terminal pod on `node_id` to evicted.
    pub async fn evict_all(&self, corr: Uuid, node_id: Uuid, reason: &str) -> Result<()> {
        let on_node = pods::list_all(
            &self.store,
            &PodFilter {
                node_id: Some(node_id),
                ..Default::default()
            },
        )
        .await?;
        let mut evicted = 0;
        for pod in on_node.iter().filter(|p| !p.status.is_terminal()) {
            if self.evict_pod(corr, pod, reason).await.is_ok() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            metrics::pods_evicted(evicted);
        }
        Ok(())
    }

    pub async fn evict_pod(&self, corr: Uuid, pod: &Pod, reason: &str) -> Result<()> {
        if !pod.status.can_transition_to(PodStatus::Evicted) {
            return Ok(());
        }
        pods::transition(
            &self.store,
            corr,
            pod.id,
            pod.status,
            PodStatus::Evicted,
            TransitionPatch {
                status_message: Some(Some(reason.to_string())),
                stopped_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;
        // Best effort: a lost node has no connection to tell.
        if let Some(node_id) = pod.node_id {
            let _ = self
                .connections
                .send_to_node(
                    node_id,
                    ServerFrame::PodStop {
                        pod_id: pod.id,
                        reason: reason.to_string(),
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Drain evicts one pod per sweep; the tick cadence is the backoff.
    async fn drain_step(&self, corr: Uuid, node: &Node) -> Result<()> {
        let on_node = pods::list_all(
            &self.store,
            &PodFilter {
                node_id: Some(node.id),
                ..Default::default()
            },
        )
        .await?;
        let Some(victim) = on_node
            .iter()
            .filter(|p| !p.status.is_terminal())
            .min_by_key(|p| (p.created_at, p.id))
        else {
            return Ok(());
        };
        tracing::info!(node = %node.name, pod_id = %victim.id, "drain: evicting pod");
        metrics::pods_evicted(1);
        if !victim.status.can_transition_to(PodStatus::Evicted) {
            return Ok(());
        }
        pods::transition(
            &self.store,
            corr,
            victim.id,
            victim.status,
            PodStatus::Evicted,
            TransitionPatch {
                status_message: Some(Some("node draining".to_string())),
                stopped_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;
        let _ = self
            .connections
            .send_to_node(node.id, ServerFrame::PodDrain { pod_id: victim.id })
            .await;
        Ok(())
    }

    /// A NoExecute taint evicts pods that no longer tolerate it, including
    /// pods whose toleration was removed mid-life.
    async fn enforce_no_execute(&self, corr: Uuid, node: &Node) -> Result<()> {
        let no_execute: Vec<&Taint> = node
            .taints
            .iter()
            .filter(|t| t.effect == TaintEffect::NoExecute)
            .collect();
        if no_execute.is_empty() {
            return Ok(());
        }
        let on_node = pods::list_all(
            &self.store,
            &PodFilter {
                node_id: Some(node.id),
                ..Default::default()
            },
        )
        .await?;
        for pod in on_node.iter().filter(|p| !p.status.is_terminal()) {
            let intolerable = no_execute
                .iter()
                .find(|taint| !tolerated(taint, &pod.tolerations));
            if let Some(taint) = intolerable {
                tracing::info!(
                    node = %node.name,
                    pod_id = %pod.id,
                    taint = %taint.key,
                    "evicting pod for untolerated NoExecute taint"
                );
                metrics::pods_evicted(1);
                self.evict_pod(corr, pod, &format!("NoExecute taint {}", taint.key))
                    .await?;
            }
        }
        Ok(())
    }

    /// Operator drain: cordon plus staged eviction handled by the sweep.
    pub async fn drain(&self, corr: Uuid, node_id: Uuid) -> Result<Node> {
        Ok(nodes::update(
            &self.store,
            corr,
            node_id,
            NodePatch {
                status: Some(NodeStatus::Draining),
                unschedulable: Some(true),
                ..Default::default()
            },
        )
        .await?)
    }

    /// Delete a node: evict everything on it and soft-delete the record.
    pub async fn delete(&self, corr: Uuid, node_id: Uuid) -> Result<Node> {
        self.evict_all(corr, node_id, "node deleted").await?;
        let node = nodes::delete(&self.store, corr, node_id).await?;
        Ok(node)
    }

    /// Connection teardown hook: clear the stored connection id so a resumed
    /// registration is not mistaken for a duplicate.
    pub async fn connection_closed(&self, corr: Uuid, node_id: Uuid, connection_id: Uuid) {
        match nodes::get_by_id(&self.store, node_id).await {
            Ok(node) if node.connection_id == Some(connection_id) => {
                if let Err(e) = nodes::update(
                    &self.store,
                    corr,
                    node_id,
                    NodePatch {
                        connection_id: Some(None),
                        ..Default::default()
                    },
                )
                .await
                {
                    tracing::warn!(node_id = %node_id, "failed to clear connection: {e}");
                }
            }
            _ => {}
        }
    }
}
