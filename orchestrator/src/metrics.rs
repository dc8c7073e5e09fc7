//! Metrics for the control plane, exported in Prometheus format.

use metrics::{counter, gauge, histogram};

pub fn pod_scheduled() {
    counter!("stark_pods_scheduled_total").increment(1);
}

pub fn scheduling_failed(reason: &'static str) {
    counter!("stark_scheduling_failures_total", "reason" => reason).increment(1);
}

pub fn scheduling_pass(duration_secs: f64) {
    histogram!("stark_scheduling_pass_seconds").record(duration_secs);
}

pub fn preemption(victims: usize) {
    counter!("stark_preemptions_total").increment(1);
    counter!("stark_preemption_victims_total").increment(victims as u64);
}

pub fn reconcile_pass(duration_secs: f64) {
    counter!("stark_reconcile_passes_total").increment(1);
    histogram!("stark_reconcile_pass_seconds").record(duration_secs);
}

pub fn service_rollback() {
    counter!("stark_service_rollbacks_total").increment(1);
}

pub fn heartbeat_received() {
    counter!("stark_heartbeats_total").increment(1);
}

pub fn heartbeat_refused() {
    counter!("stark_heartbeats_refused_total").increment(1);
}

pub fn node_transition(to: &'static str) {
    counter!("stark_node_transitions_total", "to" => to).increment(1);
}

pub fn pods_evicted(count: usize) {
    counter!("stark_pods_evicted_total").increment(count as u64);
}

pub fn agent_connected(active: usize) {
    counter!("stark_agent_connections_total").increment(1);
    gauge!("stark_agent_connections_active").set(active as f64);
}

pub fn agent_disconnected(active: usize) {
    gauge!("stark_agent_connections_active").set(active as f64);
}

pub fn frame_received(kind: &'static str) {
    counter!("stark_agent_frames_received_total", "kind" => kind).increment(1);
}

pub fn backpressure_rejected() {
    counter!("stark_backpressure_rejections_total").increment(1);
}

pub fn route_resolved(allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    counter!("stark_route_resolutions_total", "outcome" => outcome).increment(1);
}

pub fn peer_signal_relayed() {
    counter!("stark_peer_signals_relayed_total").increment(1);
}

pub fn ingress_request(status: u16, duration_secs: f64) {
    counter!("stark_ingress_requests_total", "status" => status.to_string()).increment(1);
    histogram!("stark_ingress_request_seconds").record(duration_secs);
}

pub fn ingress_timeout() {
    counter!("stark_ingress_timeouts_total").increment(1);
}
