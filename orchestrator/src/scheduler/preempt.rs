//! Preemption: make room for a high-priority pod by evicting strictly
//! lower-priority pods, minimizing the aggregate priority destroyed.

use std::collections::HashSet;

use stark_common::types::{NodeResources, Pack, Pod};
use uuid::Uuid;

use super::NodeSnapshot;
use super::filter::filter_node_ignoring_resources;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreemptionPlan {
    pub node_id: Uuid,
    pub victims: Vec<Uuid>,
    /// Sum of evicted priorities, the quantity the plan minimizes.
    pub cost: i64,
}

/// Victims needed on one node, cheapest-first, or None when even evicting
/// every lower-priority pod would not fit the incoming pod.
fn plan_for_node(pod: &Pod, snap: &NodeSnapshot) -> Option<PreemptionPlan> {
    let node = &snap.node;
    let mut headroom = node.allocatable.remaining(&node.allocated);

    let mut evictable: Vec<_> = snap
        .pods
        .iter()
        .filter(|p| !p.status.is_terminal() && p.priority < pod.priority)
        .collect();
    // Cheapest victims first; id keeps the order stable.
    evictable.sort_by_key(|p| (p.priority, p.id));

    let mut victims = Vec::new();
    let mut cost = 0i64;
    for victim in evictable {
        if headroom.fits(&pod.resource_requests) {
            break;
        }
        headroom = NodeResources {
            cpu: headroom.cpu + victim.requests.cpu,
            memory: headroom.memory + victim.requests.memory,
            storage: headroom.storage + victim.requests.storage_or_zero(),
            pods: headroom.pods + 1,
        };
        victims.push(victim.id);
        cost += victim.priority as i64;
    }

    if victims.is_empty() || !headroom.fits(&pod.resource_requests) {
        return None;
    }
    Some(PreemptionPlan {
        node_id: node.id,
        victims,
        cost,
    })
}

/// Search all nodes that would admit the pod but for resources, and pick the
/// cheapest workable eviction set. Deterministic: cost, then victim count,
/// then node id.
pub fn plan_preemption(
    pod: &Pod,
    pack: &Pack,
    nodes: &[NodeSnapshot],
    admin_owners: &HashSet<Uuid>,
) -> Option<PreemptionPlan> {
    nodes
        .iter()
        .filter(|snap| filter_node_ignoring_resources(pod, pack, snap, admin_owners))
        .filter_map(|snap| plan_for_node(pod, snap))
        .min_by_key(|plan| (plan.cost, plan.victims.len(), plan.node_id))
}
