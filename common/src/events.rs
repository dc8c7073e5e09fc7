//! Process-local pub/sub for entity change events.
//!
//! Every store write publishes one event carrying the old and new row and a
//! correlation id that follows the request through the system. Subscribers
//! (controller loop workers, the routing fabric, the audit stream) filter by
//! entity kind. A lagging subscriber drops the oldest events rather than
//! blocking publishers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Pack,
    Node,
    Pod,
    Service,
    Namespace,
    NetworkPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub correlation_id: Uuid,
    pub kind: EntityKind,
    pub action: ChangeAction,
    /// Entity id, or name for name-keyed entities.
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        correlation_id: Uuid,
        kind: EntityKind,
        action: ChangeAction,
        key: impl Into<String>,
        old: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Self {
        Self {
            correlation_id,
            kind,
            action,
            key: key.into(),
            old,
            new,
            at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<ChangeEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish never blocks and never fails; with no subscribers the event
    /// is dropped, which is fine for a change notification.
    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(
            correlation_id = %event.correlation_id,
            kind = ?event.kind,
            action = ?event.action,
            key = %event.key,
            "change event"
        );
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.tx.subscribe()
    }

    /// Receiver that only yields events matching `kinds`.
    pub fn subscribe_kinds(&self, kinds: &[EntityKind]) -> FilteredReceiver {
        FilteredReceiver {
            rx: self.tx.subscribe(),
            kinds: kinds.to_vec(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub struct FilteredReceiver {
    rx: broadcast::Receiver<Arc<ChangeEvent>>,
    kinds: Vec<EntityKind>,
}

impl FilteredReceiver {
    /// Next matching event. Lag is tolerated by skipping ahead: missed
    /// events are compensated by the periodic reconcile tick.
    pub async fn recv(&mut self) -> Option<Arc<ChangeEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(ev) if self.kinds.contains(&ev.kind) => return Some(ev),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_event(action: ChangeAction) -> ChangeEvent {
        ChangeEvent::new(
            Uuid::new_v4(),
            EntityKind::Pod,
            action,
            Uuid::nil().to_string(),
            None,
            Some(serde_json::json!({"status": "pending"})),
        )
    }

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let ev = pod_event(ChangeAction::Created);
        let id = ev.correlation_id;
        bus.publish(ev);
        let got = rx.recv().await.unwrap();
        assert_eq!(got.correlation_id, id);
        assert_eq!(got.kind, EntityKind::Pod);
    }

    #[tokio::test]
    async fn kind_filter_skips_other_entities() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe_kinds(&[EntityKind::Service]);
        bus.publish(pod_event(ChangeAction::Created));
        bus.publish(ChangeEvent::new(
            Uuid::new_v4(),
            EntityKind::Service,
            ChangeAction::Updated,
            "svc-1",
            None,
            None,
        ));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, EntityKind::Service);
        assert_eq!(got.key, "svc-1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish(pod_event(ChangeAction::Deleted));
    }
}
