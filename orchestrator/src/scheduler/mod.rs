//! Scheduler: filter -> score -> bind pipeline with preemption.
//!
//! Invoked on pod-pending events, node status changes, and every controller
//! tick. The pipeline itself is pure over a cluster snapshot, so a frozen
//! snapshot always yields the same binding; only [`Scheduler::bind`] touches
//! the store, under the per-node lock that prevents double-booking.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use std::sync::Arc;

use stark_common::types::{
    Labels, Namespace, Node, Pack, Pod, PodResources, PodStatus, ResourceQuota,
};
use stark_common::{Error, Result};
use stark_store::pods::{NamespaceUsage, PodFilter, TransitionPatch};
use stark_store::{Store, StoreError, namespaces, nodes, packs, pods};
use uuid::Uuid;

use crate::agent::Connections;
use crate::metrics;
use crate::registry::NodeRegistry;

pub mod filter;
pub mod preempt;
pub mod score;

use filter::{FilterReject, filter_node};
use preempt::plan_preemption;

/// Slice of a pod the pipeline needs when it looks at nodes.
#[derive(Debug, Clone)]
pub struct PodOnNode {
    pub id: Uuid,
    pub labels: Labels,
    pub priority: i32,
    pub requests: PodResources,
    pub status: PodStatus,
}

#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub node: Node,
    pub pods: Vec<PodOnNode>,
}

/// Failure outcomes written to `pod.statusMessage`, never retried inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleFailure {
    NoMatchingNodes,
    InsufficientResources,
    QuotaExceeded,
    IncompatibleRuntime,
    PackNotFound,
    PolicyDenied,
    ChaosInjected,
}

impl ScheduleFailure {
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleFailure::NoMatchingNodes => "NoMatchingNodes",
            ScheduleFailure::InsufficientResources => "InsufficientResources",
            ScheduleFailure::QuotaExceeded => "QuotaExceeded",
            ScheduleFailure::IncompatibleRuntime => "IncompatibleRuntime",
            ScheduleFailure::PackNotFound => "PackNotFound",
            ScheduleFailure::PolicyDenied => "PolicyDenied",
            ScheduleFailure::ChaosInjected => "ChaosInjected",
        }
    }
}

/// Pure pipeline core: pick the node for `pod`, or the most specific
/// failure the snapshot supports.
pub fn decide(
    pod: &Pod,
    pack: &Pack,
    nodes: &[NodeSnapshot],
    admin_owners: &HashSet<Uuid>,
) -> std::result::Result<Uuid, ScheduleFailure> {
    let mut candidates: Vec<&NodeSnapshot> = Vec::new();
    let mut rejects: Vec<FilterReject> = Vec::new();

    for snap in nodes {
        match filter_node(pod, pack, snap, admin_owners) {
            Ok(()) => candidates.push(snap),
            Err(reject) => rejects.push(reject),
        }
    }

    if candidates.is_empty() {
        return Err(aggregate_failure(&rejects));
    }
    score::rank(pod, &mut candidates);
    Ok(candidates[0].node.id)
}

/// Collapse per-node rejects into the outcome recorded on the pod.
fn aggregate_failure(rejects: &[FilterReject]) -> ScheduleFailure {
    if rejects.is_empty() {
        return ScheduleFailure::NoMatchingNodes;
    }
    if rejects.iter().any(|r| *r == FilterReject::Resources) {
        return ScheduleFailure::InsufficientResources;
    }
    if rejects
        .iter()
        .all(|r| matches!(r, FilterReject::Runtime | FilterReject::RuntimeVersion))
    {
        return ScheduleFailure::IncompatibleRuntime;
    }
    if rejects.iter().all(|r| *r == FilterReject::Ownership) {
        return ScheduleFailure::PolicyDenied;
    }
    ScheduleFailure::NoMatchingNodes
}

/// Would admitting `requests` keep the namespace within its quota?
pub fn quota_allows(
    quota: &ResourceQuota,
    usage: &NamespaceUsage,
    requests: &PodResources,
) -> bool {
    if let Some(max) = quota.max_pods
        && usage.pods + 1 > max
    {
        return false;
    }
    if let Some(max) = quota.max_cpu
        && usage.cpu + requests.cpu > max
    {
        return false;
    }
    if let Some(max) = quota.max_memory
        && usage.memory + requests.memory > max
    {
        return false;
    }
    if let Some(max) = quota.max_storage
        && usage.storage + requests.storage_or_zero() > max
    {
        return false;
    }
    true
}

pub struct Scheduler {
    store: Store,
    registry: Arc<NodeRegistry>,
    connections: Arc<Connections>,
    preempt_threshold: i32,
}

impl Scheduler {
    pub fn new(
        store: Store,
        registry: Arc<NodeRegistry>,
        connections: Arc<Connections>,
        preempt_threshold: i32,
    ) -> Self {
        Self {
            store,
            registry,
            connections,
            preempt_threshold,
        }
    }

    /// One pass over every pending pod, highest priority first.
    pub async fn schedule_pass(&self, corr: Uuid) -> Result<()> {
        let started = Instant::now();
        let pending = pods::list_all(
            &self.store,
            &PodFilter {
                statuses: Some(vec![PodStatus::Pending]),
                ..Default::default()
            },
        )
        .await?;
        if pending.is_empty() {
            return Ok(());
        }
        let mut ordered = pending;
        ordered.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        for pod in ordered {
            if let Err(e) = self.schedule_one(corr, &pod).await {
                tracing::warn!(pod_id = %pod.id, "scheduling error: {e}");
            }
        }
        metrics::scheduling_pass(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Full pipeline for one pod: admission, filter, score, bind, with one
    /// retry on a stale bind and preemption as the last resort.
    pub async fn schedule_one(&self, corr: Uuid, pod: &Pod) -> Result<()> {
        let pack = match packs::get_by_id(&self.store, pod.pack_id).await {
            Ok(pack) => pack,
            Err(StoreError::NotFound(_)) => {
                return self.record_failure(corr, pod, ScheduleFailure::PackNotFound).await;
            }
            Err(e) => return Err(e.into()),
        };

        // Namespace admission happens before any node is considered.
        match namespaces::get(&self.store, &pod.namespace).await {
            Ok(ns) if ns.phase == stark_common::types::NamespacePhase::Terminating => {
                return self.record_failure(corr, pod, ScheduleFailure::PolicyDenied).await;
            }
            Ok(ns) => {
                if !self.namespace_admits(&ns, pod).await? {
                    return self.record_failure(corr, pod, ScheduleFailure::QuotaExceeded).await;
                }
            }
            Err(StoreError::NotFound(_)) => {
                // The default namespace needs no record.
                if pod.namespace != stark_common::types::DEFAULT_NAMESPACE {
                    return self.record_failure(corr, pod, ScheduleFailure::PolicyDenied).await;
                }
            }
            Err(e) => return Err(e.into()),
        }

        #[cfg(feature = "chaos")]
        if crate::chaos::bind_veto() {
            return self.record_failure(corr, pod, ScheduleFailure::ChaosInjected).await;
        }

        let mut retried = false;
        loop {
            let (snapshots, admin_owners) = self.snapshot().await?;
            let chosen = match decide(pod, &pack, &snapshots, &admin_owners) {
                Ok(node_id) => node_id,
                Err(ScheduleFailure::InsufficientResources | ScheduleFailure::NoMatchingNodes)
                    if pod.priority > self.preempt_threshold =>
                {
                    return self
                        .preempt(corr, pod, &pack, &snapshots, &admin_owners)
                        .await;
                }
                Err(failure) => return self.record_failure(corr, pod, failure).await,
            };

            match self.bind(corr, pod, &pack, chosen).await {
                Ok(()) => return Ok(()),
                Err(Error::PreconditionFailed(_)) if !retried => {
                    // Stale snapshot; rerun the whole pipeline once.
                    retried = true;
                    continue;
                }
                Err(Error::PreconditionFailed(_)) => {
                    // Leave the pod pending for the next tick.
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn namespace_admits(&self, ns: &Namespace, pod: &Pod) -> Result<bool> {
        let Some(quota) = &ns.resource_quota else {
            return Ok(true);
        };
        let usage = pods::namespace_usage(&self.store, &ns.name).await?;
        // The pod being scheduled is already pending in this namespace and
        // thus already counted; admission asks whether *binding* it fits.
        let usage = NamespaceUsage {
            pods: usage.pods - 1,
            cpu: usage.cpu - pod.resource_requests.cpu,
            memory: usage.memory - pod.resource_requests.memory,
            storage: usage.storage - pod.resource_requests.storage_or_zero(),
        };
        Ok(quota_allows(quota, &usage, &pod.resource_requests))
    }

    /// Cluster snapshot plus the set of node owners with admin rights on a
    /// live connection.
    async fn snapshot(&self) -> Result<(Vec<NodeSnapshot>, HashSet<Uuid>)> {
        let node_list = nodes::list_all(&self.store).await?;
        let placed = pods::list_all(&self.store, &PodFilter::default()).await?;
        let mut by_node: HashMap<Uuid, Vec<PodOnNode>> = HashMap::new();
        for pod in placed {
            if pod.status.is_terminal() {
                continue;
            }
            let Some(node_id) = pod.node_id else { continue };
            by_node.entry(node_id).or_default().push(PodOnNode {
                id: pod.id,
                labels: pod.labels,
                priority: pod.priority,
                requests: pod.resource_requests,
                status: pod.status,
            });
        }
        let mut admin_owners = HashSet::new();
        let snapshots = node_list
            .into_iter()
            .map(|node| {
                if let Some(handle) = self.connections.for_node(node.id)
                    && handle.principal.is_admin()
                {
                    admin_owners.insert(node.registered_by);
                }
                let pods = by_node.remove(&node.id).unwrap_or_default();
                NodeSnapshot { node, pods }
            })
            .collect();
        Ok((snapshots, admin_owners))
    }

    /// Transactionally bind: CAS the pod to `scheduled` and grow the node's
    /// allocation, all under the node's bind lock.
    async fn bind(&self, corr: Uuid, pod: &Pod, pack: &Pack, node_id: Uuid) -> Result<()> {
        let lock = self.registry.node_lock(node_id);
        let _guard = lock.lock().await;

        // Re-read under the lock; the snapshot may be stale.
        let node = nodes::get_by_id(&self.store, node_id).await?;
        if node.status != stark_common::types::NodeStatus::Online
            || node.unschedulable
            || !node
                .allocatable
                .remaining(&node.allocated)
                .fits(&pod.resource_requests)
        {
            return Err(Error::PreconditionFailed(format!(
                "node {node_id} no longer admits the pod"
            )));
        }

        nodes::update(
            &self.store,
            corr,
            node_id,
            stark_store::nodes::NodePatch {
                allocated: Some(node.allocated.plus(&pod.resource_requests)),
                ..Default::default()
            },
        )
        .await?;

        let bound = pods::transition(
            &self.store,
            corr,
            pod.id,
            PodStatus::Pending,
            PodStatus::Scheduled,
            TransitionPatch {
                node_id: Some(Some(node_id)),
                status_message: Some(None),
                ..Default::default()
            },
        )
        .await;

        match bound {
            Ok(_) => {
                metrics::pod_scheduled();
                tracing::info!(pod_id = %pod.id, node = %node.name, "pod bound");
                self.dispatch_start(pod, pack, node_id).await;
                Ok(())
            }
            Err(e) => {
                // Roll the allocation back before surfacing the conflict.
                let fresh = nodes::get_by_id(&self.store, node_id).await?;
                nodes::update(
                    &self.store,
                    corr,
                    node_id,
                    stark_store::nodes::NodePatch {
                        allocated: Some(fresh.allocated.minus(&pod.resource_requests)),
                        ..Default::default()
                    },
                )
                .await?;
                Err(e.into())
            }
        }
    }

    /// Release a bound pod's allocation after it reaches a terminal state.
    pub async fn release(&self, corr: Uuid, pod: &Pod) -> Result<()> {
        let Some(node_id) = pod.node_id else {
            return Ok(());
        };
        let lock = self.registry.node_lock(node_id);
        let _guard = lock.lock().await;
        let node = match nodes::get_by_id(&self.store, node_id).await {
            Ok(node) => node,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        nodes::update(
            &self.store,
            corr,
            node_id,
            stark_store::nodes::NodePatch {
                allocated: Some(node.allocated.minus(&pod.resource_requests)),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    async fn dispatch_start(&self, pod: &Pod, pack: &Pack, node_id: Uuid) {
        let mut env = std::collections::BTreeMap::new();
        env.insert("STARK_POD_ID".to_string(), pod.id.to_string());
        env.insert("STARK_NAMESPACE".to_string(), pod.namespace.clone());
        if let Some(service_id) = pod.service_id {
            env.insert("STARK_SERVICE_ID".to_string(), service_id.to_string());
        }
        let frame = stark_common::protocol::ServerFrame::PodStart {
            pod_id: pod.id,
            pack_id: pack.id,
            pack_version: pod.pack_version.clone(),
            bundle_ref: pack.bundle_path.clone(),
            env,
            resource_limits: pod.resource_limits,
        };
        if let Err(e) = self.connections.send_to_node(node_id, frame).await {
            // The node will learn about the pod when it reconnects; the
            // reconciler retries through the normal convergence path.
            tracing::warn!(pod_id = %pod.id, node_id = %node_id, "pod:start not delivered: {e}");
        }
    }

    /// Evict a minimal set of lower-priority victims and leave the incoming
    /// pod pending; binding into the freed room happens next tick, outside
    /// the eviction window.
    async fn preempt(
        &self,
        corr: Uuid,
        pod: &Pod,
        pack: &Pack,
        snapshots: &[NodeSnapshot],
        admin_owners: &HashSet<Uuid>,
    ) -> Result<()> {
        let Some(plan) = plan_preemption(pod, pack, snapshots, admin_owners) else {
            return self
                .record_failure(corr, pod, ScheduleFailure::InsufficientResources)
                .await;
        };
        metrics::preemption(plan.victims.len());
        tracing::info!(
            pod_id = %pod.id,
            node_id = %plan.node_id,
            victims = plan.victims.len(),
            "preempting lower-priority pods"
        );
        for victim_id in &plan.victims {
            let victim = pods::get_by_id(&self.store, *victim_id).await?;
            self.registry
                .evict_pod(corr, &victim, "preempted by higher-priority pod")
                .await?;
            self.release(corr, &victim).await?;
        }
        pods::update(
            &self.store,
            corr,
            pod.id,
            stark_store::pods::PodPatch {
                status_message: Some("PreemptionScheduled".to_string()),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    async fn record_failure(&self, corr: Uuid, pod: &Pod, failure: ScheduleFailure) -> Result<()> {
        metrics::scheduling_failed(failure.code());
        if pod.status_message.as_deref() == Some(failure.code()) {
            return Ok(());
        }
        pods::update(
            &self.store,
            corr,
            pod.id,
            stark_store::pods::PodPatch {
                status_message: Some(failure.code().to_string()),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stark_common::types::*;

    fn pack(tag: RuntimeTag, visibility: Visibility) -> Pack {
        Pack {
            id: Uuid::new_v4(),
            name: "hello".into(),
            version: "1.0.0".into(),
            runtime_tag: tag,
            owner_id: Uuid::new_v4(),
            visibility,
            bundle_path: "bundles/hello-1.0.0.js".into(),
            min_node_version: None,
            created_at: Utc::now(),
        }
    }

    fn pod(requests: PodResources) -> Pod {
        Pod {
            id: Uuid::new_v4(),
            pack_id: Uuid::new_v4(),
            pack_version: "1.0.0".into(),
            node_id: None,
            namespace: DEFAULT_NAMESPACE.into(),
            status: PodStatus::Pending,
            status_message: None,
            priority: 0,
            labels: Labels::new(),
            tolerations: vec![],
            scheduling: SchedulingConstraints::default(),
            resource_requests: requests,
            resource_limits: None,
            created_by: Uuid::new_v4(),
            service_id: None,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
        }
    }

    fn node(id: u128, allocatable: NodeResources, allocated: NodeResources) -> NodeSnapshot {
        NodeSnapshot {
            node: Node {
                id: Uuid::from_u128(id),
                name: format!("n{id}"),
                runtime_type: RuntimeType::Node,
                runtime_version: Some("22.0.0".into()),
                status: NodeStatus::Online,
                unschedulable: false,
                labels: Labels::new(),
                taints: vec![],
                allocatable,
                allocated,
                last_heartbeat: Some(Utc::now()),
                registered_by: Uuid::new_v4(),
                connection_id: None,
                created_at: Utc::now(),
                deleted_at: None,
            },
            pods: vec![],
        }
    }

    fn small() -> PodResources {
        PodResources {
            cpu: 100,
            memory: 128,
            storage: None,
        }
    }

    fn cap(cpu: i64, memory: i64) -> NodeResources {
        NodeResources {
            cpu,
            memory,
            storage: 10_000,
            pods: 10,
        }
    }

    #[test]
    fn decide_prefers_least_allocated_node() {
        let pack = pack(RuntimeTag::Node, Visibility::Public);
        let pod = pod(small());
        let busy = node(
            1,
            cap(1000, 1024),
            NodeResources {
                cpu: 800,
                memory: 800,
                storage: 0,
                pods: 5,
            },
        );
        let idle = node(2, cap(1000, 1024), NodeResources::default());
        let chosen = decide(&pod, &pack, &[busy, idle], &HashSet::new()).unwrap();
        assert_eq!(chosen, Uuid::from_u128(2));
    }

    #[test]
    fn decide_is_deterministic_on_ties() {
        let pack = pack(RuntimeTag::Node, Visibility::Public);
        let pod = pod(small());
        let a = node(7, cap(1000, 1024), NodeResources::default());
        let b = node(3, cap(1000, 1024), NodeResources::default());
        // Same capacity, same load: lexicographically smaller id wins, in
        // either input order.
        let first = decide(&pod, &pack, &[a.clone(), b.clone()], &HashSet::new()).unwrap();
        let second = decide(&pod, &pack, &[b, a], &HashSet::new()).unwrap();
        assert_eq!(first, Uuid::from_u128(3));
        assert_eq!(first, second);
    }

    #[test]
    fn incompatible_runtime_everywhere_is_reported_as_such() {
        let pack = pack(RuntimeTag::Browser, Visibility::Public);
        let pod = pod(small());
        let n = node(1, cap(1000, 1024), NodeResources::default());
        let err = decide(&pod, &pack, &[n], &HashSet::new()).unwrap_err();
        assert_eq!(err, ScheduleFailure::IncompatibleRuntime);
    }

    #[test]
    fn full_nodes_report_insufficient_resources() {
        let pack = pack(RuntimeTag::Node, Visibility::Public);
        let pod = pod(small());
        let full = node(1, cap(1000, 1024), cap(1000, 1024));
        let err = decide(&pod, &pack, &[full], &HashSet::new()).unwrap_err();
        assert_eq!(err, ScheduleFailure::InsufficientResources);
    }

    #[test]
    fn private_pack_needs_owner_or_admin_node() {
        let pack = pack(RuntimeTag::Node, Visibility::Private);
        let pod = pod(small());
        let foreign = node(1, cap(1000, 1024), NodeResources::default());
        let err = decide(&pod, &pack, &[foreign.clone()], &HashSet::new()).unwrap_err();
        assert_eq!(err, ScheduleFailure::PolicyDenied);

        let mut admins = HashSet::new();
        admins.insert(foreign.node.registered_by);
        assert!(decide(&pod, &pack, &[foreign], &admins).is_ok());
    }

    #[test]
    fn empty_cluster_has_no_matching_nodes() {
        let pack = pack(RuntimeTag::Node, Visibility::Public);
        let pod = pod(small());
        let err = decide(&pod, &pack, &[], &HashSet::new()).unwrap_err();
        assert_eq!(err, ScheduleFailure::NoMatchingNodes);
    }

    #[test]
    fn node_selector_filters_nodes() {
        let pack = pack(RuntimeTag::Node, Visibility::Public);
        let mut p = pod(small());
        p.scheduling
            .node_selector
            .insert("zone".into(), "eu-1".into());
        let mut labeled = node(1, cap(1000, 1024), NodeResources::default());
        labeled
            .node
            .labels
            .insert("zone".into(), "eu-1".into());
        let unlabeled = node(2, cap(1000, 1024), NodeResources::default());
        let chosen = decide(&p, &pack, &[unlabeled, labeled], &HashSet::new()).unwrap();
        assert_eq!(chosen, Uuid::from_u128(1));
    }

    #[test]
    fn untolerated_no_schedule_taint_rejects() {
        let pack = pack(RuntimeTag::Node, Visibility::Public);
        let mut p = pod(small());
        let mut tainted = node(1, cap(1000, 1024), NodeResources::default());
        tainted.node.taints.push(Taint {
            key: "dedicated".into(),
            value: Some("batch".into()),
            effect: TaintEffect::NoSchedule,
        });
        let err = decide(&p, &pack, &[tainted.clone()], &HashSet::new()).unwrap_err();
        assert_eq!(err, ScheduleFailure::NoMatchingNodes);

        p.tolerations.push(Toleration {
            key: "dedicated".into(),
            operator: TolerationOperator::Exists,
            value: None,
            effect: None,
        });
        assert!(decide(&p, &pack, &[tainted], &HashSet::new()).is_ok());
    }

    #[test]
    fn anti_affinity_spreads_replicas() {
        let pack = pack(RuntimeTag::Node, Visibility::Public);
        let mut p = pod(small());
        p.labels.insert("app".into(), "web".into());
        p.scheduling.pod_anti_affinity = Some(PodAffinityTerm {
            label_selector: [("app".to_string(), "web".to_string())].into_iter().collect(),
        });
        let mut crowded = node(1, cap(1000, 1024), NodeResources::default());
        crowded.pods.push(PodOnNode {
            id: Uuid::new_v4(),
            labels: [("app".to_string(), "web".to_string())].into_iter().collect(),
            priority: 0,
            requests: small(),
            status: PodStatus::Running,
        });
        let empty = node(2, cap(1000, 1024), NodeResources::default());
        let chosen = decide(&p, &pack, &[crowded, empty], &HashSet::new()).unwrap();
        assert_eq!(chosen, Uuid::from_u128(2));
    }

    #[test]
    fn preemption_picks_cheapest_victims() {
        let pack = pack(RuntimeTag::Node, Visibility::Public);
        let mut incoming = pod(small());
        incoming.priority = 800;

        let mut full = node(1, cap(200, 256), NodeResources { cpu: 200, memory: 256, storage: 0, pods: 2 });
        full.pods.push(PodOnNode {
            id: Uuid::from_u128(11),
            labels: Labels::new(),
            priority: 100,
            requests: small(),
            status: PodStatus::Running,
        });
        full.pods.push(PodOnNode {
            id: Uuid::from_u128(12),
            labels: Labels::new(),
            priority: 400,
            requests: small(),
            status: PodStatus::Running,
        });
        let plan = plan_preemption(&incoming, &pack, &[full], &HashSet::new()).unwrap();
        assert_eq!(plan.victims, vec![Uuid::from_u128(11)]);
        assert_eq!(plan.cost, 100);
    }

    #[test]
    fn preemption_never_evicts_equal_or_higher_priority() {
        let pack = pack(RuntimeTag::Node, Visibility::Public);
        let mut incoming = pod(small());
        incoming.priority = 600;

        let mut full = node(1, cap(100, 128), NodeResources { cpu: 100, memory: 128, storage: 0, pods: 1 });
        full.pods.push(PodOnNode {
            id: Uuid::from_u128(11),
            labels: Labels::new(),
            priority: 600,
            requests: small(),
            status: PodStatus::Running,
        });
        assert!(plan_preemption(&incoming, &pack, &[full], &HashSet::new()).is_none());
    }

    #[test]
    fn quota_admits_exactly_at_the_limit() {
        let quota = ResourceQuota {
            max_pods: Some(3),
            max_cpu: Some(300),
            ..Default::default()
        };
        let usage = NamespaceUsage {
            pods: 2,
            cpu: 200,
            memory: 0,
            storage: 0,
        };
        // The third pod lands exactly on both limits: admitted.
        assert!(quota_allows(&quota, &usage, &small()));
        let usage = NamespaceUsage {
            pods: 3,
            cpu: 300,
            memory: 0,
            storage: 0,
        };
        assert!(!quota_allows(&quota, &usage, &small()));
    }
}
