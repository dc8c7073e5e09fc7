//! Outstanding correlated requests for one agent connection.
//!
//! Requests the orchestrator sends down a connection (ingress relays) park a
//! oneshot here keyed by correlation id. The matching response completes it;
//! a disconnect fails every outstanding entry at once. A per-connection
//! ceiling turns overload into an immediate `Backpressure` failure instead
//! of an unbounded queue.

use std::collections::HashMap;

use parking_lot::Mutex;
use stark_common::protocol::AgentFrame;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PendingError {
    #[error("pending-request ceiling reached")]
    Backpressure,
    #[error("connection closed")]
    ConnectionClosed,
}

pub struct PendingMap {
    inner: Mutex<HashMap<Uuid, oneshot::Sender<AgentFrame>>>,
    ceiling: usize,
}

impl PendingMap {
    pub fn new(ceiling: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ceiling,
        }
    }

    /// Park a waiter for `correlation_id`.
    pub fn register(
        &self,
        correlation_id: Uuid,
    ) -> Result<oneshot::Receiver<AgentFrame>, PendingError> {
        let mut map = self.inner.lock();
        if map.len() >= self.ceiling {
            return Err(PendingError::Backpressure);
        }
        let (tx, rx) = oneshot::channel();
        map.insert(correlation_id, tx);
        Ok(rx)
    }

    /// Complete a waiter with the agent's response. Returns false when no
    /// waiter exists (late or unsolicited response).
    pub fn complete(&self, correlation_id: Uuid, frame: AgentFrame) -> bool {
        match self.inner.lock().remove(&correlation_id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Drop a waiter that gave up (timeout or caller cancellation).
    pub fn forget(&self, correlation_id: Uuid) {
        self.inner.lock().remove(&correlation_id);
    }

    /// Fail every outstanding request atomically; dropping the senders wakes
    /// all waiters with a closed-channel error.
    pub fn fail_all(&self) -> usize {
        let mut map = self.inner.lock();
        let n = map.len();
        map.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(corr: Uuid) -> AgentFrame {
        AgentFrame::IngressResponse {
            correlation_id: corr,
            status: 200,
            headers: Default::default(),
            body: None,
        }
    }

    #[tokio::test]
    async fn complete_wakes_the_waiter() {
        let pending = PendingMap::new(4);
        let corr = Uuid::new_v4();
        let rx = pending.register(corr).unwrap();
        assert!(pending.complete(corr, response(corr)));
        let frame = rx.await.unwrap();
        match frame {
            AgentFrame::IngressResponse { correlation_id, .. } => {
                assert_eq!(correlation_id, corr)
            }
            other => panic!("wrong frame: {other:?}"),
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn ceiling_rejects_with_backpressure() {
        let pending = PendingMap::new(2);
        let _a = pending.register(Uuid::new_v4()).unwrap();
        let _b = pending.register(Uuid::new_v4()).unwrap();
        assert_eq!(
            pending.register(Uuid::new_v4()).unwrap_err(),
            PendingError::Backpressure
        );
        pending.forget(Uuid::new_v4()); // unknown id is a no-op
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn fail_all_wakes_every_waiter_with_an_error() {
        let pending = PendingMap::new(8);
        let rx1 = pending.register(Uuid::new_v4()).unwrap();
        let rx2 = pending.register(Uuid::new_v4()).unwrap();
        assert_eq!(pending.fail_all(), 2);
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[test]
    fn late_response_is_ignored() {
        let pending = PendingMap::new(4);
        let corr = Uuid::new_v4();
        assert!(!pending.complete(corr, response(corr)));
    }
}
