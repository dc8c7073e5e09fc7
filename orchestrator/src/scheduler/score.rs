//! Score stage: rank the nodes that survived filtering.
//!
//! Terms are kept on a 0..=100 scale before weighting:
//!   least-allocated  (w  1.0)  100 x (1 - max(cpu_frac, mem_frac))
//!   preferred node affinity (w 1.0) sum of matched weights, clamped
//!   pod anti-affinity (w 1.0)  penalty per already-matching pod
//!   PreferNoSchedule  (w -0.5) per untolerated taint
//! Ties are broken by node id so a frozen snapshot always schedules the
//! same way.

use stark_common::types::{Pod, TaintEffect, tolerated};

use super::NodeSnapshot;
use super::filter::matching_pods;

const TERM_SCALE: f64 = 100.0;
/// Points deducted per pod matched by the anti-affinity selector.
const ANTI_AFFINITY_PENALTY: f64 = 10.0;
/// Untolerated PreferNoSchedule taints score the full term at weight -0.5.
const PREFER_NO_SCHEDULE_WEIGHT: f64 = 0.5;

fn fraction(used: i64, capacity: i64) -> f64 {
    if capacity <= 0 {
        return 1.0;
    }
    (used as f64 / capacity as f64).clamp(0.0, 1.0)
}

pub fn score_node(pod: &Pod, snap: &NodeSnapshot) -> f64 {
    let node = &snap.node;
    let mut score = 0.0;

    // Least-allocated: prefer the node that stays emptiest after admission.
    let cpu_frac = fraction(
        node.allocated.cpu + pod.resource_requests.cpu,
        node.allocatable.cpu,
    );
    let mem_frac = fraction(
        node.allocated.memory + pod.resource_requests.memory,
        node.allocatable.memory,
    );
    score += TERM_SCALE * (1.0 - cpu_frac.max(mem_frac));

    // Preferred node affinity.
    if let Some(affinity) = &pod.scheduling.node_affinity {
        let matched: i64 = affinity
            .preferred
            .iter()
            .filter(|w| w.term.matches(&node.labels))
            .map(|w| w.weight as i64)
            .sum();
        score += (matched as f64).clamp(0.0, TERM_SCALE);
    }

    // Pod anti-affinity: penalize co-location with matching pods.
    if let Some(anti) = &pod.scheduling.pod_anti_affinity {
        let count = matching_pods(snap, anti) as f64;
        score -= (count * ANTI_AFFINITY_PENALTY).min(TERM_SCALE);
    }

    // Soft taints.
    let soft_taints = node
        .taints
        .iter()
        .filter(|t| t.effect == TaintEffect::PreferNoSchedule)
        .filter(|t| !tolerated(t, &pod.tolerations))
        .count() as f64;
    score -= soft_taints * PREFER_NO_SCHEDULE_WEIGHT * TERM_SCALE;

    score
}

/// Order candidates best-first with the deterministic tie-break.
pub fn rank<'a>(pod: &Pod, candidates: &mut Vec<&'a NodeSnapshot>) {
    let mut scored: Vec<(f64, &NodeSnapshot)> = candidates
        .drain(..)
        .map(|snap| (score_node(pod, snap), snap))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.node.id.cmp(&b.1.node.id))
    });
    candidates.extend(scored.into_iter().map(|(_, snap)| snap));
}
