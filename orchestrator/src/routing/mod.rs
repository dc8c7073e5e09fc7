//! Routing fabric: service registry, policy evaluation, route resolution,
//! and peer-gone invalidation.
//!
//! The orchestrator answers route queries and relays signaling frames, but
//! is never on the data path between pods.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stark_common::events::{ChangeAction, ChangeEvent};
use stark_common::protocol::ServerFrame;
use stark_common::types::{NodeStatus, Pod, PodStatus, Service};
use stark_common::{Error, Result};
use stark_store::{Store, StoreError, policies, services};
use uuid::Uuid;

use crate::agent::Connections;
use crate::metrics;

pub mod ingress;
pub mod policy;
pub mod service_registry;

pub use policy::{Decision, PolicyEngine, PolicySnapshot};
pub use service_registry::ServiceRegistry;

/// Answer to a route query, over the agent channel or the control API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResolution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_pod_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_node_id: Option<Uuid>,
    pub policy_allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
}

pub struct RoutingFabric {
    pub registry: Arc<ServiceRegistry>,
    pub policy: PolicyEngine,
    store: Store,
    connections: Arc<Connections>,
}

impl RoutingFabric {
    /// The endpoint registry is shared with the ingress listeners, so it is
    /// handed in rather than owned.
    pub fn new(
        store: Store,
        connections: Arc<Connections>,
        registry: Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            registry,
            policy: PolicyEngine::new(),
            store,
            connections,
        }
    }

    /// Resolve a source -> target route by service ids: policy first, then a
    /// least-recently-used healthy endpoint.
    pub async fn resolve(
        &self,
        source_service_id: Uuid,
        target_service_id: Uuid,
    ) -> Result<RouteResolution> {
        let source = services::get_by_id(&self.store, source_service_id).await?;
        let target = services::get_by_id(&self.store, target_service_id).await?;
        Ok(self.resolve_services(&source.name, &target))
    }

    /// Policy is evaluated in the target's namespace.
    pub fn resolve_services(&self, source_name: &str, target: &Service) -> RouteResolution {
        let decision = self
            .policy
            .evaluate(source_name, &target.name, &target.namespace);
        metrics::route_resolved(decision.allowed);
        if !decision.allowed {
            return RouteResolution {
                target_pod_id: None,
                target_node_id: None,
                policy_allowed: false,
                deny_reason: decision.deny_reason,
            };
        }
        match self.registry.pick(&target.name) {
            Some((pod_id, node_id)) => RouteResolution {
                target_pod_id: Some(pod_id),
                target_node_id: Some(node_id),
                policy_allowed: true,
                deny_reason: None,
            },
            None => RouteResolution {
                target_pod_id: None,
                target_node_id: None,
                policy_allowed: true,
                deny_reason: Some("NoHealthyEndpoints".into()),
            },
        }
    }

    /// Rebuild the policy snapshot from the store.
    pub async fn sync_policies(&self) -> Result<()> {
        let policy_rows = policies::list(&self.store, None).await?;
        let service_rows = services::list_all(&self.store).await?;
        self.policy
            .replace(PolicySnapshot::build(&policy_rows, &service_rows));
        Ok(())
    }

    /// React to a pod change event: pods entering `running` become
    /// routable, pods leaving it are withdrawn and peers are told.
    pub async fn on_pod_event(&self, event: &ChangeEvent) -> Result<()> {
        let new: Option<Pod> = event
            .new
            .clone()
            .and_then(|v| serde_json::from_value(v).ok());
        let old: Option<Pod> = event
            .old
            .clone()
            .and_then(|v| serde_json::from_value(v).ok());

        match (&old, &new) {
            (_, Some(pod)) if pod.status == PodStatus::Running => {
                let Some(service_id) = pod.service_id else {
                    return Ok(());
                };
                let Some(node_id) = pod.node_id else {
                    return Ok(());
                };
                let service = match services::get_by_id(&self.store, service_id).await {
                    Ok(svc) => svc,
                    Err(StoreError::NotFound(_)) => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                self.registry.add(&service.name, pod.id, node_id);
            }
            (Some(was), current) => {
                let gone = match current {
                    Some(pod) => pod.status != PodStatus::Running,
                    None => true,
                };
                if was.status == PodStatus::Running && gone {
                    self.withdraw_pod(was.id).await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// React to node change events: heartbeat refreshes endpoint ages,
    /// offline/deleted nodes lose all endpoints.
    pub async fn on_node_event(&self, event: &ChangeEvent) -> Result<()> {
        let Some(new) = event.new.clone() else {
            return Ok(());
        };
        let node: stark_common::types::Node = match serde_json::from_value(new) {
            Ok(node) => node,
            Err(_) => return Ok(()),
        };
        match node.status {
            NodeStatus::Offline | NodeStatus::Draining => {
                for (service, pod_id) in self.registry.remove_node(node.id) {
                    self.broadcast_peer_gone(&service, pod_id).await;
                }
            }
            _ if event.action == ChangeAction::Deleted => {
                for (service, pod_id) in self.registry.remove_node(node.id) {
                    self.broadcast_peer_gone(&service, pod_id).await;
                }
            }
            _ => {
                if let Some(at) = node.last_heartbeat {
                    self.registry.touch_node(node.id, at);
                }
            }
        }
        Ok(())
    }

    async fn withdraw_pod(&self, pod_id: Uuid) {
        if let Some(service) = self.registry.remove_pod(pod_id) {
            self.broadcast_peer_gone(&service, pod_id).await;
        }
    }

    /// Tell every agent a routable pod is gone so cached resolutions drop.
    async fn broadcast_peer_gone(&self, service: &str, pod_id: Uuid) {
        self.connections
            .broadcast(ServerFrame::PeerGone {
                pod_id,
                service: service.to_string(),
            })
            .await;
    }

    /// Expire endpoints whose node heartbeats lag past the threshold.
    pub fn expire(&self, now: DateTime<Utc>, unhealthy_after_secs: i64) {
        self.registry.expire(now, unhealthy_after_secs);
    }

    /// Relay a peer-signal frame to the target pod's node, untouched.
    pub async fn relay_peer_signal(
        &self,
        signal: stark_common::protocol::PeerSignal,
    ) -> Result<()> {
        let pod = stark_store::pods::get_by_id(&self.store, signal.target_pod_id).await?;
        let node_id = pod
            .node_id
            .ok_or_else(|| Error::NotFound(format!("pod {} is not placed", pod.id)))?;
        metrics::peer_signal_relayed();
        self.connections
            .send_to_node(node_id, ServerFrame::PeerSignal(signal))
            .await
    }
}
