//! Filter stage: which nodes may host a pod at all.

use std::collections::HashSet;

use stark_common::types::{Node, Pack, Pod, PodStatus, TaintEffect, Visibility, tolerated};
use uuid::Uuid;

use super::NodeSnapshot;

/// Why a node was rejected, in evaluation order. The aggregate of rejects
/// across all nodes picks the failure outcome written to the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReject {
    /// Not online, or cordoned off.
    Status,
    /// Runtime type does not match the pack's runtime tag.
    Runtime,
    /// Node runtime is older than the pack's minimum.
    RuntimeVersion,
    /// nodeSelector key missing or wrong value.
    Selector,
    /// Required node affinity unsatisfied.
    Affinity,
    /// Untolerated NoSchedule/NoExecute taint.
    Taint,
    /// Private pack on a foreign node.
    Ownership,
    /// Everything matched but the headroom does not fit.
    Resources,
}

fn runtime_version_ok(node: &Node, pack: &Pack) -> bool {
    let Some(min) = &pack.min_node_version else {
        return true;
    };
    let Ok(min) = semver::Version::parse(min) else {
        // An unparseable constraint never admits anything; the pack is bad.
        return false;
    };
    match node
        .runtime_version
        .as_deref()
        .and_then(|v| semver::Version::parse(v).ok())
    {
        Some(have) => have >= min,
        None => false,
    }
}

/// Evaluate every filter predicate for one node, reporting the first that
/// fails. `admin_owners` are principals allowed to host anyone's private
/// packs on their nodes.
pub fn filter_node(
    pod: &Pod,
    pack: &Pack,
    snap: &NodeSnapshot,
    admin_owners: &HashSet<Uuid>,
) -> Result<(), FilterReject> {
    let node = &snap.node;

    if node.status != stark_common::types::NodeStatus::Online || node.unschedulable {
        return Err(FilterReject::Status);
    }

    if !pack.runtime_tag.compatible_with(node.runtime_type) {
        return Err(FilterReject::Runtime);
    }

    if !runtime_version_ok(node, pack) {
        return Err(FilterReject::RuntimeVersion);
    }

    for (key, value) in &pod.scheduling.node_selector {
        if node.labels.get(key) != Some(value) {
            return Err(FilterReject::Selector);
        }
    }

    if let Some(affinity) = &pod.scheduling.node_affinity
        && !affinity.required.is_empty()
        && !affinity.required.iter().any(|t| t.matches(&node.labels))
    {
        return Err(FilterReject::Affinity);
    }

    for taint in &node.taints {
        let repels = matches!(
            taint.effect,
            TaintEffect::NoSchedule | TaintEffect::NoExecute
        );
        if repels && !tolerated(taint, &pod.tolerations) {
            return Err(FilterReject::Taint);
        }
    }

    if pack.visibility == Visibility::Private
        && node.registered_by != pack.owner_id
        && !admin_owners.contains(&node.registered_by)
    {
        return Err(FilterReject::Ownership);
    }

    if !node
        .allocatable
        .remaining(&node.allocated)
        .fits(&pod.resource_requests)
    {
        return Err(FilterReject::Resources);
    }

    Ok(())
}

/// The same predicates with the resource check skipped; used to find nodes
/// where preemption could free enough room.
pub fn filter_node_ignoring_resources(
    pod: &Pod,
    pack: &Pack,
    snap: &NodeSnapshot,
    admin_owners: &HashSet<Uuid>,
) -> bool {
    match filter_node(pod, pack, snap, admin_owners) {
        Ok(()) | Err(FilterReject::Resources) => true,
        Err(_) => false,
    }
}

/// Whether pods of a service could run on this node at all, for DaemonSet
/// fan-out. Resource fit is left to the scheduler proper.
pub fn daemonset_eligible(
    pod_template: &Pod,
    pack: &Pack,
    snap: &NodeSnapshot,
    admin_owners: &HashSet<Uuid>,
) -> bool {
    filter_node_ignoring_resources(pod_template, pack, snap, admin_owners)
}

/// Count pods already on the node that a pod-affinity style selector hits.
pub fn matching_pods(snap: &NodeSnapshot, selector: &stark_common::types::PodAffinityTerm) -> usize {
    snap.pods
        .iter()
        .filter(|p| !matches!(p.status, PodStatus::Stopping) && selector.matches(&p.labels))
        .count()
}
