//! Agent channel: connection registry, socket lifecycle, frame dispatch.
//!
//! Each worker node keeps exactly one authenticated WebSocket to the
//! orchestrator. Outbound frames for a connection funnel through a single
//! sender task, which is what gives per-node send-order: a later frame is
//! not handed to the socket until the earlier one has been written.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use stark_common::protocol::ServerFrame;
use stark_common::{Error, Result};
use uuid::Uuid;

use crate::auth::Principal;

pub mod connection;
pub mod dispatch;
pub mod pending;

pub use dispatch::Dispatcher;
pub use pending::{PendingError, PendingMap};

/// Outbound queue depth per connection. Beyond this, sends apply backpressure
/// to the caller rather than buffering without bound.
const SEND_QUEUE_DEPTH: usize = 256;

pub struct ConnectionHandle {
    pub id: Uuid,
    pub principal: Principal,
    tx: async_channel::Sender<ServerFrame>,
    node_id: RwLock<Option<Uuid>>,
    pub pending: PendingMap,
}

impl ConnectionHandle {
    pub fn new(
        id: Uuid,
        principal: Principal,
        pending_ceiling: usize,
    ) -> (Arc<Self>, async_channel::Receiver<ServerFrame>) {
        let (tx, rx) = async_channel::bounded(SEND_QUEUE_DEPTH);
        (
            Arc::new(Self {
                id,
                principal,
                tx,
                node_id: RwLock::new(None),
                pending: PendingMap::new(pending_ceiling),
            }),
            rx,
        )
    }

    pub fn node_id(&self) -> Option<Uuid> {
        *self.node_id.read()
    }

    /// Queue a frame for the sender task. Fails `ConnectionClosed` when the
    /// socket is gone.
    pub async fn send(&self, frame: ServerFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| Error::BackendUnavailable("ConnectionClosed".into()))
    }
}

#[derive(Default)]
pub struct Connections {
    by_id: RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>,
    by_node: RwLock<HashMap<Uuid, Uuid>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<ConnectionHandle>) {
        self.by_id.write().insert(handle.id, handle);
    }

    /// Tear down a connection: unmap its node and fail all outstanding
    /// correlated requests in one step.
    pub fn remove(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let handle = self.by_id.write().remove(&connection_id)?;
        if let Some(node_id) = handle.node_id() {
            let mut by_node = self.by_node.write();
            if by_node.get(&node_id) == Some(&connection_id) {
                by_node.remove(&node_id);
            }
        }
        let failed = handle.pending.fail_all();
        if failed > 0 {
            tracing::warn!(
                connection_id = %connection_id,
                failed,
                "failed outstanding requests on disconnect"
            );
        }
        Some(handle)
    }

    /// Claim `node_id` for `connection_id`. A node registered on another
    /// live connection is refused; a stale mapping (socket already gone) is
    /// displaced.
    pub fn bind_node(&self, connection_id: Uuid, node_id: Uuid) -> Result<()> {
        let by_id = self.by_id.read();
        let handle = by_id
            .get(&connection_id)
            .ok_or_else(|| Error::BackendUnavailable("ConnectionClosed".into()))?;
        let mut by_node = self.by_node.write();
        if let Some(existing) = by_node.get(&node_id)
            && *existing != connection_id
            && by_id.contains_key(existing)
        {
            return Err(Error::Conflict(format!(
                "node {node_id} is already registered on another connection"
            )));
        }
        by_node.insert(node_id, connection_id);
        *handle.node_id.write() = Some(node_id);
        Ok(())
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.by_id.read().get(&connection_id).cloned()
    }

    pub fn for_node(&self, node_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let connection_id = *self.by_node.read().get(&node_id)?;
        self.get(connection_id)
    }

    pub async fn send_to_node(&self, node_id: Uuid, frame: ServerFrame) -> Result<()> {
        let handle = self
            .for_node(node_id)
            .ok_or_else(|| Error::BackendUnavailable("ConnectionClosed".into()))?;
        handle.send(frame).await
    }

    /// Best-effort fan-out to every live connection (peer-gone notices).
    pub async fn broadcast(&self, frame: ServerFrame) {
        let handles: Vec<_> = self.by_id.read().values().cloned().collect();
        for handle in handles {
            let _ = handle.send(frame.clone()).await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.by_id.read().len()
    }

    /// Correlated request/response to a node: park a waiter, send the frame,
    /// and await the agent's answer within `timeout`.
    pub async fn request_to_node(
        &self,
        node_id: Uuid,
        correlation_id: Uuid,
        frame: ServerFrame,
        timeout: std::time::Duration,
    ) -> Result<stark_common::protocol::AgentFrame> {
        let handle = self
            .for_node(node_id)
            .ok_or_else(|| Error::BackendUnavailable("ConnectionClosed".into()))?;
        let rx = handle.pending.register(correlation_id).map_err(|e| match e {
            PendingError::Backpressure => {
                crate::metrics::backpressure_rejected();
                Error::BackendUnavailable("Backpressure".into())
            }
            PendingError::ConnectionClosed => {
                Error::BackendUnavailable("ConnectionClosed".into())
            }
        })?;
        if let Err(e) = handle.send(frame).await {
            handle.pending.forget(correlation_id);
            return Err(e);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(Error::BackendUnavailable("ConnectionClosed".into())),
            Err(_) => {
                handle.pending.forget(correlation_id);
                Err(Error::Timeout(format!(
                    "no response for correlation {correlation_id}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            username: "agent".into(),
            roles: vec![],
        }
    }

    #[tokio::test]
    async fn duplicate_node_registration_is_refused() {
        let connections = Connections::new();
        let (a, _rx_a) = ConnectionHandle::new(Uuid::new_v4(), principal(), 8);
        let (b, _rx_b) = ConnectionHandle::new(Uuid::new_v4(), principal(), 8);
        connections.insert(a.clone());
        connections.insert(b.clone());
        let node = Uuid::new_v4();
        connections.bind_node(a.id, node).unwrap();
        let err = connections.bind_node(b.id, node).unwrap_err();
        assert_eq!(err.code(), "Conflict");
    }

    #[tokio::test]
    async fn stale_binding_is_displaced_after_disconnect() {
        let connections = Connections::new();
        let (a, _rx_a) = ConnectionHandle::new(Uuid::new_v4(), principal(), 8);
        let (b, _rx_b) = ConnectionHandle::new(Uuid::new_v4(), principal(), 8);
        connections.insert(a.clone());
        connections.insert(b.clone());
        let node = Uuid::new_v4();
        connections.bind_node(a.id, node).unwrap();
        connections.remove(a.id);
        connections.bind_node(b.id, node).unwrap();
        assert_eq!(connections.for_node(node).unwrap().id, b.id);
    }

    #[tokio::test]
    async fn remove_fails_outstanding_requests() {
        let connections = Connections::new();
        let (a, _rx) = ConnectionHandle::new(Uuid::new_v4(), principal(), 8);
        connections.insert(a.clone());
        let corr = Uuid::new_v4();
        let waiter = a.pending.register(corr).unwrap();
        connections.remove(a.id);
        assert!(waiter.await.is_err());
        assert!(connections.get(a.id).is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_node_is_connection_closed() {
        let connections = Connections::new();
        let err = connections
            .send_to_node(
                Uuid::new_v4(),
                ServerFrame::PodDrain {
                    pod_id: Uuid::new_v4(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BackendUnavailable");
    }
}
