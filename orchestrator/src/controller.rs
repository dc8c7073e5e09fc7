//! Controller loop: one worker per reconciler kind, woken by change events
//! and by a jittered periodic tick.
//!
//! Workers never run concurrently for the same entity key; events that
//! arrive mid-run coalesce into a single trailing-edge re-run. On shutdown
//! the loop drains within a bounded deadline, then cancels what is left.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use stark_common::events::{ChangeAction, EntityKind};
use stark_common::types::{Pod, PodStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state::AppState;

/// Serializes work per key with trailing-edge coalescing: a submit for a
/// running key marks it dirty and the worker re-runs once after finishing.
pub struct KeyedRunner<K> {
    inner: Arc<Mutex<HashMap<K, bool>>>,
}

impl<K> KeyedRunner<K>
where
    K: Eq + Hash + Copy + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn submit<F, Fut>(&self, key: K, run: F)
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        {
            let mut map = self.inner.lock();
            if let Some(dirty) = map.get_mut(&key) {
                *dirty = true;
                return;
            }
            map.insert(key, false);
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                run(key).await;
                let mut map = inner.lock();
                if map.get(&key) == Some(&true) {
                    map.insert(key, false);
                } else {
                    map.remove(&key);
                    break;
                }
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().len()
    }
}

impl<K> Default for KeyedRunner<K>
where
    K: Eq + Hash + Copy + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Tick period with +-20% jitter so fleets do not align.
fn jittered(period: Duration) -> Duration {
    let factor = 0.8 + 0.4 * rand::random::<f64>();
    period.mul_f64(factor)
}

fn parse_pod(value: &Option<serde_json::Value>) -> Option<Pod> {
    value.clone().and_then(|v| serde_json::from_value(v).ok())
}

pub struct Controller {
    state: AppState,
}

impl Controller {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Spawn every worker and wait for shutdown. Returns once the drain
    /// deadline passes or all workers stop.
    pub async fn run(self, cancel: CancellationToken, drain: Duration) {
        let tick = Duration::from_secs(self.state.timing.controller_tick_secs);

        let handles = vec![
            tokio::spawn(reconcile_worker(self.state.clone(), cancel.clone(), tick)),
            tokio::spawn(schedule_worker(self.state.clone(), cancel.clone(), tick)),
            tokio::spawn(lifecycle_worker(self.state.clone(), cancel.clone(), tick)),
            tokio::spawn(routing_worker(self.state.clone(), cancel.clone(), tick)),
            tokio::spawn(accounting_worker(self.state.clone(), cancel.clone())),
            tokio::spawn(audit_worker(self.state.clone(), cancel.clone())),
        ];

        cancel.cancelled().await;
        tracing::info!("controller draining workers");
        let all = futures_util::future::join_all(handles);
        if tokio::time::timeout(drain, all).await.is_err() {
            tracing::warn!("controller drain deadline passed, forcing cancellation");
        }
    }
}

/// Service reconciliation: woken by service, pod, and pack changes, plus
/// the tick which re-enqueues every service.
async fn reconcile_worker(state: AppState, cancel: CancellationToken, tick: Duration) {
    let mut events = state
        .bus
        .subscribe_kinds(&[EntityKind::Service, EntityKind::Pod, EntityKind::Pack]);
    let runner: Arc<KeyedRunner<Uuid>> = Arc::new(KeyedRunner::new());

    let enqueue = {
        let runner = runner.clone();
        let state = state.clone();
        move |corr: Uuid, service_id: Uuid| {
            let state = state.clone();
            runner.submit(service_id, move |key| {
                let state = state.clone();
                async move {
                    if let Err(e) = state.reconciler.reconcile_service(corr, key).await {
                        tracing::warn!(service_id = %key, "reconcile pass failed: {e}");
                    }
                }
            });
        }
    };

    let enqueue_all = {
        let state = state.clone();
        let enqueue = enqueue.clone();
        move |corr: Uuid| {
            let state = state.clone();
            let enqueue = enqueue.clone();
            async move {
                match state.reconciler.all_service_ids().await {
                    Ok(ids) => {
                        for id in ids {
                            enqueue(corr, id);
                        }
                    }
                    Err(e) => tracing::warn!("failed to list services: {e}"),
                }
            }
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(jittered(tick)) => {
                enqueue_all(Uuid::new_v4()).await;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event.kind {
                    EntityKind::Service => {
                        if let Ok(id) = event.key.parse::<Uuid>() {
                            enqueue(event.correlation_id, id);
                        }
                    }
                    EntityKind::Pod => {
                        let service_id = parse_pod(&event.new)
                            .or_else(|| parse_pod(&event.old))
                            .and_then(|p| p.service_id);
                        if let Some(id) = service_id {
                            enqueue(event.correlation_id, id);
                        }
                    }
                    // A new pack version may unblock backoffs or move
                    // follow-latest services.
                    EntityKind::Pack => enqueue_all(event.correlation_id).await,
                    _ => {}
                }
            }
        }
    }
}

/// Scheduling: woken by pending pods and node changes; the pass itself is
/// serial, so bursts of events coalesce into the next run.
async fn schedule_worker(state: AppState, cancel: CancellationToken, tick: Duration) {
    let mut events = state
        .bus
        .subscribe_kinds(&[EntityKind::Pod, EntityKind::Node]);
    let retry = Duration::from_secs(state.timing.scheduling_retry_secs);
    loop {
        let should_run = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(jittered(tick.min(retry))) => true,
            event = events.recv() => {
                match event {
                    None => break,
                    Some(event) => match event.kind {
                        // Only pending pods make a pass worthwhile.
                        EntityKind::Pod => parse_pod(&event.new)
                            .map(|p| p.status == PodStatus::Pending)
                            .unwrap_or(false),
                        EntityKind::Node => true,
                        _ => false,
                    },
                }
            }
        };
        if should_run
            && let Err(e) = state.scheduler.schedule_pass(Uuid::new_v4()).await
        {
            tracing::warn!("scheduling pass failed: {e}");
        }
    }
}

/// Node lifecycle sweep and namespace teardown, tick-driven only.
async fn lifecycle_worker(state: AppState, cancel: CancellationToken, tick: Duration) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(jittered(tick)) => {}
        }
        let corr = Uuid::new_v4();
        if let Err(e) = state.registry.sweep(corr, Utc::now()).await {
            tracing::warn!("registry sweep failed: {e}");
        }
        if let Err(e) = state.reconciler.sweep_terminating_namespaces(corr).await {
            tracing::warn!("namespace sweep failed: {e}");
        }
        state
            .routing
            .expire(Utc::now(), state.timing.unhealthy_after_secs() as i64);
    }
}

/// Routing fabric upkeep: registry membership, policy snapshots, ingress
/// listeners.
async fn routing_worker(state: AppState, cancel: CancellationToken, tick: Duration) {
    let mut events = state.bus.subscribe_kinds(&[
        EntityKind::Pod,
        EntityKind::Node,
        EntityKind::Service,
        EntityKind::NetworkPolicy,
    ]);
    // Initial sync so restarts come up with current policies and listeners.
    if let Err(e) = state.routing.sync_policies().await {
        tracing::warn!("initial policy sync failed: {e}");
    }
    if let Err(e) = state.ingress.sync().await {
        tracing::warn!("initial ingress sync failed: {e}");
    }
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(jittered(tick)) => {
                if let Err(e) = state.routing.sync_policies().await {
                    tracing::warn!("policy sync failed: {e}");
                }
                if let Err(e) = state.ingress.sync().await {
                    tracing::warn!("ingress sync failed: {e}");
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let result = match event.kind {
                    EntityKind::Pod => state.routing.on_pod_event(&event).await,
                    EntityKind::Node => state.routing.on_node_event(&event).await,
                    EntityKind::Service | EntityKind::NetworkPolicy => {
                        let policies = state.routing.sync_policies().await;
                        let ingress = state.ingress.sync().await;
                        policies.and(ingress)
                    }
                    _ => Ok(()),
                };
                if let Err(e) = result {
                    tracing::warn!("routing event handling failed: {e}");
                }
            }
        }
    }
    state.ingress.shutdown();
}

/// Pod bookkeeping that must see every transition exactly once: crash-loop
/// accounting and node allocation release.
async fn accounting_worker(state: AppState, cancel: CancellationToken) {
    let mut events = state.bus.subscribe_kinds(&[EntityKind::Pod]);
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if event.action != ChangeAction::Updated {
            continue;
        }
        let (Some(old), Some(new)) = (parse_pod(&event.old), parse_pod(&event.new)) else {
            continue;
        };
        if old.status == new.status {
            continue;
        }
        if let Err(e) = state
            .reconciler
            .note_pod_transition(event.correlation_id, old.status, &new)
            .await
        {
            tracing::warn!(pod_id = %new.id, "failure accounting failed: {e}");
        }
        if new.status.is_terminal() && !old.status.is_terminal() && new.node_id.is_some() {
            if let Err(e) = state.scheduler.release(event.correlation_id, &new).await {
                tracing::warn!(pod_id = %new.id, "allocation release failed: {e}");
            }
        }
    }
}

/// Structured audit stream: every state transition, with its correlation
/// id, at info level under the `audit` target.
async fn audit_worker(state: AppState, cancel: CancellationToken) {
    let mut events = state.bus.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(target: "audit", missed, "audit stream lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        };
        tracing::info!(
            target: "audit",
            correlation_id = %event.correlation_id,
            kind = ?event.kind,
            action = ?event.action,
            key = %event.key,
            "state change"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn keyed_runner_serializes_and_coalesces() {
        let runner: KeyedRunner<u32> = KeyedRunner::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let runs = runs.clone();
            runner.submit(1, move |_| {
                let runs = runs.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        // First run plus exactly one trailing-edge re-run.
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn keyed_runner_runs_different_keys_concurrently() {
        let runner: KeyedRunner<u32> = KeyedRunner::new();
        let runs = Arc::new(AtomicUsize::new(0));
        for key in 0..4 {
            let runs = runs.clone();
            runner.submit(key, move |_| {
                let runs = runs.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d >= Duration::from_secs(8));
            assert!(d <= Duration::from_secs(12));
        }
    }
}
