//! In-memory service registry: which pod endpoints answer for a service.
//!
//! Entries appear when a pod reports `running`, go stale when their node's
//! heartbeat lags, and disappear on pod stop or node loss. Route resolution
//! is read-heavy; the map sits behind a read-write lock and the
//! least-recently-used bookkeeping is atomic so reads stay reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug)]
pub struct Endpoint {
    pub pod_id: Uuid,
    pub node_id: Uuid,
    pub health: RwLock<EndpointHealth>,
    pub last_heartbeat: RwLock<DateTime<Utc>>,
    /// Epoch millis of the last time this endpoint was handed out.
    last_used: AtomicI64,
}

/// Wire shape for `GET /api/network/registry`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointView {
    pub pod_id: Uuid,
    pub node_id: Uuid,
    pub status: EndpointHealth,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<HashMap<String, Vec<Arc<Endpoint>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pod became routable.
    pub fn add(&self, service: &str, pod_id: Uuid, node_id: Uuid) {
        let mut map = self.inner.write();
        let endpoints = map.entry(service.to_string()).or_default();
        if endpoints.iter().any(|e| e.pod_id == pod_id) {
            return;
        }
        endpoints.push(Arc::new(Endpoint {
            pod_id,
            node_id,
            health: RwLock::new(EndpointHealth::Healthy),
            last_heartbeat: RwLock::new(Utc::now()),
            last_used: AtomicI64::new(0),
        }));
        endpoints.sort_by_key(|e| e.pod_id);
    }

    /// Returns the owning service name when the pod was registered.
    pub fn remove_pod(&self, pod_id: Uuid) -> Option<String> {
        let mut map = self.inner.write();
        let mut owner = None;
        for (service, endpoints) in map.iter_mut() {
            let before = endpoints.len();
            endpoints.retain(|e| e.pod_id != pod_id);
            if endpoints.len() != before {
                owner = Some(service.clone());
            }
        }
        map.retain(|_, endpoints| !endpoints.is_empty());
        owner
    }

    /// Drop every endpoint on a lost node; returns (service, pod) pairs for
    /// peer-gone fan-out.
    pub fn remove_node(&self, node_id: Uuid) -> Vec<(String, Uuid)> {
        let mut map = self.inner.write();
        let mut removed = Vec::new();
        for (service, endpoints) in map.iter_mut() {
            endpoints.retain(|e| {
                if e.node_id == node_id {
                    removed.push((service.clone(), e.pod_id));
                    false
                } else {
                    true
                }
            });
        }
        map.retain(|_, endpoints| !endpoints.is_empty());
        removed
    }

    /// Refresh heartbeat age for everything on a node.
    pub fn touch_node(&self, node_id: Uuid, at: DateTime<Utc>) {
        let map = self.inner.read();
        for endpoints in map.values() {
            for endpoint in endpoints.iter().filter(|e| e.node_id == node_id) {
                *endpoint.last_heartbeat.write() = at;
                *endpoint.health.write() = EndpointHealth::Healthy;
            }
        }
    }

    /// Mark endpoints whose node has gone quiet.
    pub fn expire(&self, now: DateTime<Utc>, unhealthy_after_secs: i64) {
        let map = self.inner.read();
        for endpoints in map.values() {
            for endpoint in endpoints.iter() {
                let lag = now
                    .signed_duration_since(*endpoint.last_heartbeat.read())
                    .num_seconds();
                if lag > unhealthy_after_secs {
                    *endpoint.health.write() = EndpointHealth::Unhealthy;
                }
            }
        }
    }

    /// Least-recently-used healthy endpoint, pod id as the tie-break.
    pub fn pick(&self, service: &str) -> Option<(Uuid, Uuid)> {
        let map = self.inner.read();
        let endpoints = map.get(service)?;
        let chosen = endpoints
            .iter()
            .filter(|e| *e.health.read() == EndpointHealth::Healthy)
            .min_by_key(|e| (e.last_used.load(Ordering::Relaxed), e.pod_id))?;
        chosen
            .last_used
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        Some((chosen.pod_id, chosen.node_id))
    }

    /// Healthy endpoints in pod-id order, for hash-based ingress selection.
    pub fn healthy(&self, service: &str) -> Vec<(Uuid, Uuid)> {
        let map = self.inner.read();
        map.get(service)
            .map(|endpoints| {
                endpoints
                    .iter()
                    .filter(|e| *e.health.read() == EndpointHealth::Healthy)
                    .map(|e| (e.pod_id, e.node_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<EndpointView>> {
        let map = self.inner.read();
        map.iter()
            .map(|(service, endpoints)| {
                (
                    service.clone(),
                    endpoints
                        .iter()
                        .map(|e| EndpointView {
                            pod_id: e.pod_id,
                            node_id: e.node_id,
                            status: *e.health.read(),
                            last_heartbeat: *e.last_heartbeat.read(),
                        })
                        .collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_rotates_least_recently_used() {
        let registry = ServiceRegistry::new();
        let node = Uuid::new_v4();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        registry.add("svc", a, node);
        registry.add("svc", b, node);

        // Fresh endpoints tie on last_used; pod id breaks the tie.
        let (first, _) = registry.pick("svc").unwrap();
        assert_eq!(first, a);
        let (second, _) = registry.pick("svc").unwrap();
        assert_eq!(second, b);
    }

    #[test]
    fn pick_skips_unhealthy_endpoints() {
        let registry = ServiceRegistry::new();
        let node_a = Uuid::from_u128(10);
        let node_b = Uuid::from_u128(11);
        registry.add("svc", Uuid::from_u128(1), node_a);
        registry.add("svc", Uuid::from_u128(2), node_b);
        registry.expire(Utc::now() + chrono::Duration::seconds(120), 35);
        assert!(registry.pick("svc").is_none());

        registry.touch_node(node_b, Utc::now());
        let (pod, node) = registry.pick("svc").unwrap();
        assert_eq!(pod, Uuid::from_u128(2));
        assert_eq!(node, node_b);
    }

    #[test]
    fn remove_node_reports_evicted_endpoints() {
        let registry = ServiceRegistry::new();
        let node = Uuid::from_u128(10);
        registry.add("a", Uuid::from_u128(1), node);
        registry.add("b", Uuid::from_u128(2), node);
        registry.add("b", Uuid::from_u128(3), Uuid::from_u128(11));
        let mut removed = registry.remove_node(node);
        removed.sort();
        assert_eq!(
            removed,
            vec![
                ("a".to_string(), Uuid::from_u128(1)),
                ("b".to_string(), Uuid::from_u128(2))
            ]
        );
        assert!(registry.pick("a").is_none());
        assert!(registry.pick("b").is_some());
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let registry = ServiceRegistry::new();
        let node = Uuid::new_v4();
        let pod = Uuid::new_v4();
        registry.add("svc", pod, node);
        registry.add("svc", pod, node);
        assert_eq!(registry.healthy("svc").len(), 1);
        assert_eq!(registry.remove_pod(pod), Some("svc".to_string()));
        assert_eq!(registry.remove_pod(pod), None);
    }
}
