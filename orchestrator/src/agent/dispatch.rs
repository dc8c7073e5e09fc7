//! Incoming frame dispatch: one place that turns agent frames into registry,
//! store, and routing calls.

use std::sync::Arc;

use stark_common::protocol::{AgentFrame, LogStream, ServerFrame};
use stark_common::{Error, Result};
use stark_store::Store;
use uuid::Uuid;

use super::ConnectionHandle;
use crate::metrics;
use crate::registry::{NodeRegistry, RegisterSpec};
use crate::routing::RoutingFabric;

pub struct Dispatcher {
    store: Store,
    registry: Arc<NodeRegistry>,
    routing: Arc<RoutingFabric>,
    heartbeat_interval_secs: u64,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        registry: Arc<NodeRegistry>,
        routing: Arc<RoutingFabric>,
        heartbeat_interval_secs: u64,
    ) -> Self {
        Self {
            store,
            registry,
            routing,
            heartbeat_interval_secs,
        }
    }

    /// Handle one frame from one connection. Errors are reported back on
    /// the channel, never allowed to kill the read loop.
    pub async fn handle_frame(&self, conn: &Arc<ConnectionHandle>, frame: AgentFrame) {
        // Every frame gets a fresh correlation id that follows the work it
        // triggers through store events and logs.
        let corr = Uuid::new_v4();

        #[cfg(feature = "chaos")]
        if crate::chaos::drop_frame() {
            tracing::warn!(connection_id = %conn.id, "chaos: dropping agent frame");
            return;
        }

        // Responses complete a parked waiter with the whole frame, so they
        // are matched before the destructuring below consumes it.
        if let AgentFrame::IngressResponse { correlation_id, .. } = &frame {
            metrics::frame_received("ingress:response");
            let correlation_id = *correlation_id;
            if !conn.pending.complete(correlation_id, frame) {
                tracing::debug!(%correlation_id, "late ingress response dropped");
            }
            return;
        }

        let result = match frame {
            AgentFrame::Auth { .. } => {
                // Authentication already happened during the handshake.
                Err(Error::Validation("connection is already authenticated".into()))
            }
            AgentFrame::NodeRegister {
                name,
                runtime_type,
                runtime_version,
                allocatable,
                labels,
                taints,
            } => {
                metrics::frame_received("node:register");
                let spec = RegisterSpec {
                    name,
                    runtime_type,
                    runtime_version,
                    allocatable,
                    labels,
                    taints,
                };
                match self
                    .registry
                    .register(corr, &conn.principal, conn.id, spec)
                    .await
                {
                    Ok(node) => {
                        conn.send(ServerFrame::NodeRegistered {
                            node_id: node.id,
                            heartbeat_interval_secs: self.heartbeat_interval_secs,
                        })
                        .await
                    }
                    Err(e) => Err(e),
                }
            }
            AgentFrame::NodeHeartbeat {
                node_id,
                allocated,
                runtime_version,
                pod_states,
            } => {
                metrics::frame_received("node:heartbeat");
                #[cfg(feature = "chaos")]
                if crate::chaos::attenuate_heartbeat() {
                    tracing::warn!(node_id = %node_id, "chaos: heartbeat attenuated");
                    return;
                }
                let result = self
                    .registry
                    .heartbeat(
                        corr,
                        conn.id,
                        node_id,
                        allocated,
                        runtime_version,
                        &pod_states,
                    )
                    .await;
                // A connection heartbeating for a node it does not own is
                // violating the protocol; refuse everything it sends next.
                if let Err(Error::Auth(_)) = &result {
                    self.registry.ban_connection(conn.id);
                }
                result
            }
            AgentFrame::PodStatus {
                pod_id,
                status,
                message,
                started_at,
            } => {
                metrics::frame_received("pod:status");
                self.pod_status(corr, conn, pod_id, status, message, started_at)
                    .await
            }
            AgentFrame::PodLog {
                pod_id,
                stream,
                line,
            } => {
                let stream = match stream {
                    LogStream::Stdout => "stdout",
                    LogStream::Stderr => "stderr",
                };
                tracing::info!(target: "pod", pod_id = %pod_id, stream, "{line}");
                Ok(())
            }
            AgentFrame::PeerSignal(signal) => {
                metrics::frame_received("peer:signal");
                self.routing.relay_peer_signal(signal).await
            }
            AgentFrame::IngressResponse { .. } => unreachable!("handled above"),
            AgentFrame::RouteRequest {
                correlation_id,
                source_pod_id,
                source_service_id,
                target_service_id,
            } => {
                metrics::frame_received("network:route:request");
                self.route_request(
                    conn,
                    correlation_id,
                    source_pod_id,
                    source_service_id,
                    target_service_id,
                )
                .await
            }
        };

        if let Err(e) = result {
            tracing::debug!(connection_id = %conn.id, "frame handling failed: {e}");
            let _ = conn
                .send(ServerFrame::Error {
                    correlation_id: None,
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
                .await;
        }
    }

    async fn pod_status(
        &self,
        corr: Uuid,
        conn: &Arc<ConnectionHandle>,
        pod_id: Uuid,
        status: stark_common::types::PodStatus,
        message: Option<String>,
        started_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        // Only the connection owning the pod's node may report for it.
        let pod = stark_store::pods::get_by_id(&self.store, pod_id).await?;
        if pod.node_id != conn.node_id() {
            return Err(Error::Policy(format!(
                "connection does not host pod {pod_id}"
            )));
        }
        if pod.status == status || !pod.status.can_transition_to(status) {
            return Ok(());
        }
        let mut patch = stark_store::pods::TransitionPatch {
            status_message: Some(message),
            ..Default::default()
        };
        if status == stark_common::types::PodStatus::Running {
            patch.started_at = started_at.or(pod.started_at).or(Some(chrono::Utc::now()));
        }
        if status.is_terminal() {
            patch.stopped_at = Some(chrono::Utc::now());
        }
        stark_store::pods::transition(&self.store, corr, pod_id, pod.status, status, patch)
            .await?;
        Ok(())
    }

    async fn route_request(
        &self,
        conn: &Arc<ConnectionHandle>,
        correlation_id: Uuid,
        _source_pod_id: Uuid,
        source_service_id: Uuid,
        target_service_id: Uuid,
    ) -> Result<()> {
        let resolution = self
            .routing
            .resolve(source_service_id, target_service_id)
            .await?;
        conn.send(ServerFrame::RouteResponse {
            correlation_id,
            target_pod_id: resolution.target_pod_id,
            target_node_id: resolution.target_node_id,
            policy_allowed: resolution.policy_allowed,
            deny_reason: resolution.deny_reason,
        })
        .await
    }
}
