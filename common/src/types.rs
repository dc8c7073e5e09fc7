//! Core entity types shared by the store gateway and the orchestrator.
//!
//! All wire-facing structs serialize as camelCase JSON. The entity shapes
//! here are the contract between components; the relational schema behind
//! them is owned by the store gateway.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// String-keyed label map. BTreeMap keeps iteration deterministic.
pub type Labels = BTreeMap<String, String>;

// =============================================================================
// Packs
// =============================================================================

/// Which runtimes a pack's bundle can execute on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeTag {
    Node,
    Browser,
    Universal,
}

/// The runtime a worker node hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Node,
    Browser,
}

impl RuntimeTag {
    /// `universal` packs run on either runtime.
    pub fn compatible_with(&self, runtime: RuntimeType) -> bool {
        match self {
            RuntimeTag::Universal => true,
            RuntimeTag::Node => runtime == RuntimeType::Node,
            RuntimeTag::Browser => runtime == RuntimeType::Browser,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
    System,
}

/// An immutable versioned bundle. `(name, version)` is unique; a registered
/// pack is only ever superseded by a newer version, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    pub id: Uuid,
    pub name: String,
    /// Semver string, validated at registration.
    pub version: String,
    pub runtime_tag: RuntimeTag,
    pub owner_id: Uuid,
    pub visibility: Visibility,
    pub bundle_path: String,
    /// Minimum node runtime version required to run this bundle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_node_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Resources
// =============================================================================

/// Per-node resource vector: cpu in millicores, memory/storage in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResources {
    pub cpu: i64,
    pub memory: i64,
    pub storage: i64,
    pub pods: i64,
}

/// What a single pod asks for. Storage is optional; absent means 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodResources {
    pub cpu: i64,
    pub memory: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<i64>,
}

impl PodResources {
    pub fn storage_or_zero(&self) -> i64 {
        self.storage.unwrap_or(0)
    }
}

impl NodeResources {
    /// Remaining headroom after `allocated` is taken out of `self`.
    pub fn remaining(&self, allocated: &NodeResources) -> NodeResources {
        NodeResources {
            cpu: self.cpu.saturating_sub(allocated.cpu),
            memory: self.memory.saturating_sub(allocated.memory),
            storage: self.storage.saturating_sub(allocated.storage),
            pods: self.pods.saturating_sub(allocated.pods),
        }
    }

    /// True when `requests` fits inside this headroom, counting one pod slot.
    pub fn fits(&self, requests: &PodResources) -> bool {
        self.cpu >= requests.cpu
            && self.memory >= requests.memory
            && self.storage >= requests.storage_or_zero()
            && self.pods >= 1
    }

    pub fn plus(&self, requests: &PodResources) -> NodeResources {
        NodeResources {
            cpu: self.cpu + requests.cpu,
            memory: self.memory + requests.memory,
            storage: self.storage + requests.storage_or_zero(),
            pods: self.pods + 1,
        }
    }

    pub fn minus(&self, requests: &PodResources) -> NodeResources {
        NodeResources {
            cpu: self.cpu.saturating_sub(requests.cpu),
            memory: self.memory.saturating_sub(requests.memory),
            storage: self.storage.saturating_sub(requests.storage_or_zero()),
            pods: self.pods.saturating_sub(1),
        }
    }

    /// Component-wise `self <= other`, the registry invariant.
    pub fn within(&self, other: &NodeResources) -> bool {
        self.cpu <= other.cpu
            && self.memory <= other.memory
            && self.storage <= other.storage
            && self.pods <= other.pods
    }
}

// =============================================================================
// Taints, tolerations, affinity
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    Equal,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    pub key: String,
    pub operator: TolerationOperator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// None tolerates the key under every effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if self.key != taint.key {
            return false;
        }
        if let Some(effect) = self.effect
            && effect != taint.effect
        {
            return false;
        }
        match self.operator {
            TolerationOperator::Exists => true,
            TolerationOperator::Equal => self.value == taint.value,
        }
    }
}

/// True when some toleration in `tolerations` covers `taint`.
pub fn tolerated(taint: &Taint, tolerations: &[Toleration]) -> bool {
    tolerations.iter().any(|t| t.tolerates(taint))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelExpression {
    pub key: String,
    pub operator: LabelOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelExpression {
    pub fn matches(&self, labels: &Labels) -> bool {
        match self.operator {
            LabelOperator::In => labels
                .get(&self.key)
                .is_some_and(|v| self.values.iter().any(|x| x == v)),
            LabelOperator::NotIn => labels
                .get(&self.key)
                .is_none_or(|v| !self.values.iter().any(|x| x == v)),
            LabelOperator::Exists => labels.contains_key(&self.key),
            LabelOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// A conjunction of label expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorTerm {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelExpression>,
}

impl NodeSelectorTerm {
    pub fn matches(&self, labels: &Labels) -> bool {
        self.match_expressions.iter().all(|e| e.matches(labels))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedNodeSelectorTerm {
    /// Contribution to the scheduling score when the term matches.
    pub weight: i32,
    pub term: NodeSelectorTerm,
}

/// Required terms are ORed (any term admits the node); preferred terms feed
/// the scoring stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAffinity {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<NodeSelectorTerm>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred: Vec<WeightedNodeSelectorTerm>,
}

/// Selects other pods by label, evaluated against pods on the same node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodAffinityTerm {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: Labels,
}

impl PodAffinityTerm {
    pub fn matches(&self, pod_labels: &Labels) -> bool {
        !self.label_selector.is_empty()
            && self
                .label_selector
                .iter()
                .all(|(k, v)| pod_labels.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingConstraints {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_affinity: Option<NodeAffinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_affinity: Option<PodAffinityTerm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_anti_affinity: Option<PodAffinityTerm>,
}

// =============================================================================
// Nodes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Unhealthy,
    Draining,
    Maintenance,
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Unhealthy => "unhealthy",
            NodeStatus::Draining => "draining",
            NodeStatus::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// A worker that has registered with the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub runtime_type: RuntimeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    pub status: NodeStatus,
    pub unschedulable: bool,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub taints: Vec<Taint>,
    pub allocatable: NodeResources,
    pub allocated: NodeResources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_by: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker; name uniqueness only applies to live rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Pods
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodStatus {
    Pending,
    Scheduled,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Evicted,
    Unknown,
}

impl Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodStatus::Pending => "pending",
            PodStatus::Scheduled => "scheduled",
            PodStatus::Starting => "starting",
            PodStatus::Running => "running",
            PodStatus::Stopping => "stopping",
            PodStatus::Stopped => "stopped",
            PodStatus::Failed => "failed",
            PodStatus::Evicted => "evicted",
            PodStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl PodStatus {
    /// Terminal states never transition out; replacements are new records.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PodStatus::Stopped | PodStatus::Failed | PodStatus::Evicted
        )
    }

    /// The declared edge set of the pod state machine.
    pub fn can_transition_to(&self, to: PodStatus) -> bool {
        use PodStatus::*;
        if self.is_terminal() || *self == to {
            return false;
        }
        match (*self, to) {
            (Pending, Scheduled | Failed | Stopped) => true,
            (Scheduled, Starting | Running | Stopping | Stopped | Failed | Evicted | Unknown) => {
                true
            }
            (Starting, Running | Stopping | Failed | Evicted | Unknown) => true,
            (Running, Stopping | Stopped | Failed | Evicted | Unknown) => true,
            (Stopping, Stopped | Failed | Evicted | Unknown) => true,
            (Unknown, Running | Stopping | Stopped | Failed | Evicted) => true,
            _ => false,
        }
    }
}

/// An instance of a pack bound (or waiting to be bound) to a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub id: Uuid,
    pub pack_id: Uuid,
    pub pack_version: String,
    /// None while the pod is pending placement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
    pub namespace: String,
    pub status: PodStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// 0..=1000; higher preempts lower when capacity runs out.
    pub priority: i32,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub scheduling: SchedulingConstraints,
    pub resource_requests: PodResources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<PodResources>,
    pub created_by: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

pub const PRIORITY_MIN: i32 = 0;
pub const PRIORITY_MAX: i32 = 1000;

/// One row of a pod's transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodEvent {
    pub id: i64,
    pub pod_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<PodStatus>,
    pub to_status: PodStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

// =============================================================================
// Services
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Pending,
    Active,
    Rolling,
    Paused,
    Failed,
    Deleted,
}

impl Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Active => "active",
            ServiceStatus::Rolling => "rolling",
            ServiceStatus::Paused => "paused",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Crash-loop bookkeeping carried on the service row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureState {
    pub consecutive_failures: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failed_version: Option<String>,
    /// Most recent version that reached stable running, rollback target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_good_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_until: Option<DateTime<Utc>>,
    pub backoff_attempts: i32,
}

/// Declarative replica specification owning a set of pods.
/// `replicas = 0` means DaemonSet mode: one pod per matching node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub namespace: String,
    pub pack_id: Uuid,
    pub pack_name: String,
    pub pack_version: String,
    pub replicas: i32,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub visibility: Visibility,
    pub exposed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_port: Option<u16>,
    #[serde(default)]
    pub scheduling: SchedulingConstraints,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    pub resource_requests: PodResources,
    #[serde(default)]
    pub pod_labels: Labels,
    /// Service names allowed to call this service (ingress side of policy).
    #[serde(default)]
    pub allowed_sources: Vec<String>,
    pub follow_latest: bool,
    #[serde(default)]
    pub failure_state: FailureState,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Namespaces
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespacePhase {
    Active,
    Terminating,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuota {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pods: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cpu: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_storage: Option<i64>,
}

/// Default requests applied to pods that declare none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_cpu: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_memory: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub name: String,
    pub phase: NamespacePhase,
    #[serde(default)]
    pub labels: Labels,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_quota: Option<ResourceQuota>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_range: Option<LimitRange>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_NAMESPACE: &str = "default";

// =============================================================================
// Network policies
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Deny,
}

/// At most one policy per ordered (source, target, namespace) triple.
/// Absence of an allow rule denies traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    pub id: Uuid,
    pub source_service: String,
    pub target_service: String,
    pub action: PolicyAction,
    pub namespace: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn runtime_compatibility() {
        assert!(RuntimeTag::Universal.compatible_with(RuntimeType::Node));
        assert!(RuntimeTag::Universal.compatible_with(RuntimeType::Browser));
        assert!(RuntimeTag::Node.compatible_with(RuntimeType::Node));
        assert!(!RuntimeTag::Node.compatible_with(RuntimeType::Browser));
        assert!(!RuntimeTag::Browser.compatible_with(RuntimeType::Node));
    }

    #[test]
    fn resource_fit_counts_pod_slot() {
        let headroom = NodeResources {
            cpu: 100,
            memory: 128,
            storage: 0,
            pods: 1,
        };
        assert!(headroom.fits(&PodResources {
            cpu: 100,
            memory: 128,
            storage: None,
        }));
        let no_slots = NodeResources { pods: 0, ..headroom };
        assert!(!no_slots.fits(&PodResources {
            cpu: 1,
            memory: 1,
            storage: None,
        }));
    }

    #[test]
    fn toleration_matching() {
        let taint = Taint {
            key: "gpu".into(),
            value: Some("a100".into()),
            effect: TaintEffect::NoSchedule,
        };
        let exists = Toleration {
            key: "gpu".into(),
            operator: TolerationOperator::Exists,
            value: None,
            effect: None,
        };
        let equal_wrong = Toleration {
            key: "gpu".into(),
            operator: TolerationOperator::Equal,
            value: Some("h100".into()),
            effect: Some(TaintEffect::NoSchedule),
        };
        let wrong_effect = Toleration {
            key: "gpu".into(),
            operator: TolerationOperator::Exists,
            value: None,
            effect: Some(TaintEffect::NoExecute),
        };
        assert!(exists.tolerates(&taint));
        assert!(!equal_wrong.tolerates(&taint));
        assert!(!wrong_effect.tolerates(&taint));
    }

    #[test]
    fn label_expressions() {
        let l = labels(&[("zone", "eu-1"), ("tier", "edge")]);
        let in_expr = LabelExpression {
            key: "zone".into(),
            operator: LabelOperator::In,
            values: vec!["eu-1".into(), "eu-2".into()],
        };
        let not_in = LabelExpression {
            key: "tier".into(),
            operator: LabelOperator::NotIn,
            values: vec!["edge".into()],
        };
        let missing_ok = LabelExpression {
            key: "arch".into(),
            operator: LabelOperator::NotIn,
            values: vec!["arm".into()],
        };
        assert!(in_expr.matches(&l));
        assert!(!not_in.matches(&l));
        assert!(missing_ok.matches(&l));
    }

    #[test]
    fn pod_state_machine_edges() {
        use PodStatus::*;
        assert!(Pending.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Evicted));
        assert!(Unknown.can_transition_to(Running));
        // terminal states stay terminal
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Evicted.can_transition_to(Scheduled));
        // no re-pending
        assert!(!Running.can_transition_to(Pending));
        // self loops are not transitions
        assert!(!Running.can_transition_to(Running));
    }

    #[test]
    fn entities_serialize_camel_case() {
        let svc = Service {
            id: Uuid::nil(),
            name: "svc".into(),
            namespace: DEFAULT_NAMESPACE.into(),
            pack_id: Uuid::nil(),
            pack_name: "hello".into(),
            pack_version: "1.0.0".into(),
            replicas: 2,
            status: ServiceStatus::Active,
            status_message: None,
            visibility: Visibility::Public,
            exposed: false,
            ingress_port: None,
            scheduling: SchedulingConstraints::default(),
            tolerations: vec![],
            resource_requests: PodResources::default(),
            pod_labels: Labels::new(),
            allowed_sources: vec![],
            follow_latest: true,
            failure_state: FailureState::default(),
            created_by: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let v = serde_json::to_value(&svc).unwrap();
        assert!(v.get("packVersion").is_some());
        assert!(v.get("followLatest").is_some());
        assert!(v.get("pack_version").is_none());
    }
}
