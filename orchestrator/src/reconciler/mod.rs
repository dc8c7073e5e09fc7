//! Service reconciler: converges each service's pods to its declaration.
//!
//! Each pass loads the service and its pods, asks the pure planner what to
//! do, and applies the actions through the store gateway. The reconciler
//! never mutates a pod in place: it creates new pods or stops existing
//! ones. Passes run serially per service and concurrently across services
//! (the controller loop enforces the keying).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use stark_common::args::TimingArgs;
use stark_common::protocol::ServerFrame;
use stark_common::types::{
    FailureState, Pod, PodStatus, Service, ServiceStatus,
};
use stark_common::Result;
use stark_store::pods::{NewPod, PodFilter, TransitionPatch};
use stark_store::services::ServicePatch;
use stark_store::{Store, StoreError, namespaces, nodes, packs, pods, services};
use uuid::Uuid;

use crate::agent::Connections;
use crate::metrics;
use crate::registry::NODE_NAME_LABEL;
use crate::scheduler::NodeSnapshot;
use crate::scheduler::filter::daemonset_eligible;

pub mod planner;

use planner::{Action, PlanInput, plan};

/// Priority given to service-owned pods; free pods choose their own.
const SERVICE_POD_PRIORITY: i32 = 100;

pub struct Reconciler {
    store: Store,
    connections: Arc<Connections>,
    timing: TimingArgs,
}

impl Reconciler {
    pub fn new(store: Store, connections: Arc<Connections>, timing: TimingArgs) -> Self {
        Self {
            store,
            connections,
            timing,
        }
    }

    /// One reconcile pass for one service.
    pub async fn reconcile_service(&self, corr: Uuid, service_id: Uuid) -> Result<()> {
        let started = Instant::now();
        let svc = match services::get_by_id(&self.store, service_id).await {
            Ok(svc) => svc,
            // Already gone; nothing to converge.
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let owned = pods::list_all(
            &self.store,
            &PodFilter {
                service_id: Some(service_id),
                ..Default::default()
            },
        )
        .await?;

        let latest_pack = packs::latest(&self.store, &svc.pack_name).await?;
        let latest = latest_pack
            .as_ref()
            .map(|p| (p.version.as_str(), p.id));

        let eligible_nodes = if svc.replicas == 0 {
            self.daemonset_nodes(&svc).await?
        } else {
            Vec::new()
        };

        let actions = plan(&PlanInput {
            service: &svc,
            pods: &owned,
            eligible_nodes: &eligible_nodes,
            latest,
            now: Utc::now(),
            stable_running_secs: self.timing.stable_running_secs as i64,
            backoff_max_secs: self.timing.backoff_max_secs as i64,
        });

        for action in actions {
            if let Err(e) = self.apply(corr, &svc, action).await {
                tracing::warn!(service = %svc.name, "reconcile action failed: {e}");
            }
        }
        metrics::reconcile_pass(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Enqueue-all entry used by the periodic tick.
    pub async fn all_service_ids(&self) -> Result<Vec<Uuid>> {
        Ok(services::list_all(&self.store)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect())
    }

    /// Which nodes a DaemonSet service covers right now.
    async fn daemonset_nodes(&self, svc: &Service) -> Result<Vec<(Uuid, String)>> {
        let pack = match packs::get_by_id(&self.store, svc.pack_id).await {
            Ok(pack) => pack,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let template = self.pod_template(svc, None);
        let mut admin_owners = HashSet::new();
        let mut eligible = Vec::new();
        for node in nodes::list_all(&self.store).await? {
            if let Some(handle) = self.connections.for_node(node.id)
                && handle.principal.is_admin()
            {
                admin_owners.insert(node.registered_by);
            }
            let name = node.name.clone();
            let id = node.id;
            let snap = NodeSnapshot {
                node,
                pods: Vec::new(),
            };
            if daemonset_eligible(&template, &pack, &snap, &admin_owners) {
                eligible.push((id, name));
            }
        }
        eligible.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(eligible)
    }

    /// A pod shaped like the service wants, not yet persisted.
    fn pod_template(&self, svc: &Service, pinned: Option<&str>) -> Pod {
        let mut labels = svc.pod_labels.clone();
        labels.insert("stark.dev/service".to_string(), svc.name.clone());
        let mut scheduling = svc.scheduling.clone();
        if let Some(node_name) = pinned {
            scheduling
                .node_selector
                .insert(NODE_NAME_LABEL.to_string(), node_name.to_string());
        }
        Pod {
            id: Uuid::nil(),
            pack_id: svc.pack_id,
            pack_version: svc.pack_version.clone(),
            node_id: None,
            namespace: svc.namespace.clone(),
            status: PodStatus::Pending,
            status_message: None,
            priority: SERVICE_POD_PRIORITY,
            labels,
            tolerations: svc.tolerations.clone(),
            scheduling,
            resource_requests: svc.resource_requests,
            resource_limits: None,
            created_by: svc.created_by,
            service_id: Some(svc.id),
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
        }
    }

    async fn apply(&self, corr: Uuid, svc: &Service, action: Action) -> Result<()> {
        match action {
            Action::FollowLatest { version, pack_id } => {
                tracing::info!(service = %svc.name, %version, "following latest pack version");
                let status = if svc.status == ServiceStatus::Paused {
                    Some(ServiceStatus::Active)
                } else {
                    None
                };
                services::update(
                    &self.store,
                    corr,
                    svc.id,
                    ServicePatch {
                        pack_id: Some(pack_id),
                        pack_version: Some(version),
                        status,
                        status_message: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
            }
            Action::Activate => {
                let _ = services::transition(
                    &self.store,
                    corr,
                    svc.id,
                    ServiceStatus::Pending,
                    ServiceStatus::Active,
                )
                .await;
            }
            Action::EnterRolling => {
                tracing::info!(service = %svc.name, version = %svc.pack_version, "rolling update started");
                let _ = services::transition(
                    &self.store,
                    corr,
                    svc.id,
                    svc.status,
                    ServiceStatus::Rolling,
                )
                .await;
            }
            Action::ExitRolling => {
                tracing::info!(service = %svc.name, "rolling update complete");
                let _ = services::transition(
                    &self.store,
                    corr,
                    svc.id,
                    ServiceStatus::Rolling,
                    ServiceStatus::Active,
                )
                .await;
            }
            Action::CreatePods { count, pinned_node } => {
                for _ in 0..count {
                    let template =
                        self.pod_template(svc, pinned_node.as_ref().map(|(_, n)| n.as_str()));
                    pods::create(
                        &self.store,
                        corr,
                        NewPod {
                            pack_id: template.pack_id,
                            pack_version: template.pack_version.clone(),
                            namespace: template.namespace.clone(),
                            priority: template.priority,
                            labels: template.labels.clone(),
                            tolerations: template.tolerations.clone(),
                            scheduling: template.scheduling.clone(),
                            resource_requests: template.resource_requests,
                            resource_limits: None,
                            created_by: template.created_by,
                            service_id: template.service_id,
                        },
                    )
                    .await?;
                }
            }
            Action::StopPod { pod_id, reason } => {
                self.stop_pod(corr, pod_id, &reason).await?;
            }
            Action::Rollback {
                to_version,
                backoff_until,
                attempts,
            } => {
                metrics::service_rollback();
                tracing::warn!(
                    service = %svc.name,
                    from = %svc.pack_version,
                    to = %to_version,
                    "crash loop: rolling back"
                );
                let pack_id =
                    match packs::get_by_name_version(&self.store, &svc.pack_name, &to_version)
                        .await
                    {
                        Ok(pack) => Some(pack.id),
                        Err(StoreError::NotFound(_)) => None,
                        Err(e) => return Err(e.into()),
                    };
                services::update(
                    &self.store,
                    corr,
                    svc.id,
                    ServicePatch {
                        pack_id,
                        pack_version: Some(to_version),
                        failure_state: Some(FailureState {
                            consecutive_failures: 0,
                            last_failed_version: svc.failure_state.last_failed_version.clone(),
                            last_good_version: svc.failure_state.last_good_version.clone(),
                            backoff_until: Some(backoff_until),
                            backoff_attempts: attempts,
                        }),
                        ..Default::default()
                    },
                )
                .await?;
            }
            Action::EnterBackoff {
                until,
                attempts,
                message,
            } => {
                tracing::warn!(service = %svc.name, %message, "pausing with backoff");
                services::update(
                    &self.store,
                    corr,
                    svc.id,
                    ServicePatch {
                        status: Some(ServiceStatus::Paused),
                        status_message: Some(Some(message)),
                        failure_state: Some(FailureState {
                            consecutive_failures: svc.failure_state.consecutive_failures,
                            last_failed_version: svc.failure_state.last_failed_version.clone(),
                            last_good_version: svc.failure_state.last_good_version.clone(),
                            backoff_until: Some(until),
                            backoff_attempts: attempts,
                        }),
                        ..Default::default()
                    },
                )
                .await?;
            }
            Action::ClearFailures => {
                services::update(
                    &self.store,
                    corr,
                    svc.id,
                    ServicePatch {
                        status_message: Some(None),
                        failure_state: Some(FailureState {
                            last_good_version: svc.failure_state.last_good_version.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                )
                .await?;
            }
            Action::RecordGoodVersion { version } => {
                services::update(
                    &self.store,
                    corr,
                    svc.id,
                    ServicePatch {
                        failure_state: Some(FailureState {
                            last_good_version: Some(version),
                            ..svc.failure_state.clone()
                        }),
                        ..Default::default()
                    },
                )
                .await?;
            }
            Action::RemoveService => {
                tracing::info!(service = %svc.name, "removing deleted service record");
                services::delete(&self.store, corr, svc.id).await?;
            }
        }
        Ok(())
    }

    /// Stop a pod: pending pods die in place, placed pods get a graceful
    /// stop command and pass through `stopping`.
    pub async fn stop_pod(&self, corr: Uuid, pod_id: Uuid, reason: &str) -> Result<()> {
        let pod = match pods::get_by_id(&self.store, pod_id).await {
            Ok(pod) => pod,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match pod.status {
            PodStatus::Pending => {
                pods::transition(
                    &self.store,
                    corr,
                    pod.id,
                    PodStatus::Pending,
                    PodStatus::Stopped,
                    TransitionPatch {
                        status_message: Some(Some(reason.to_string())),
                        stopped_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            }
            s if s.is_terminal() || s == PodStatus::Stopping => {}
            s => {
                let connected = pod
                    .node_id
                    .map(|n| self.connections.for_node(n).is_some())
                    .unwrap_or(false);
                if connected {
                    pods::transition(
                        &self.store,
                        corr,
                        pod.id,
                        s,
                        PodStatus::Stopping,
                        TransitionPatch {
                            status_message: Some(Some(reason.to_string())),
                            ..Default::default()
                        },
                    )
                    .await?;
                    let _ = self
                        .connections
                        .send_to_node(
                            pod.node_id.expect("connected pod has a node"),
                            ServerFrame::PodStop {
                                pod_id: pod.id,
                                reason: reason.to_string(),
                            },
                        )
                        .await;
                } else {
                    // No agent to ask; record the stop directly.
                    pods::transition(
                        &self.store,
                        corr,
                        pod.id,
                        s,
                        PodStatus::Stopped,
                        TransitionPatch {
                            status_message: Some(Some(reason.to_string())),
                            stopped_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Crash-loop accounting driven by pod change events: a service-owned
    /// pod failing inside the window bumps the counter; reaching `running`
    /// resets it and remembers the version as a rollback target.
    pub async fn note_pod_transition(
        &self,
        corr: Uuid,
        old_status: PodStatus,
        pod: &Pod,
    ) -> Result<()> {
        let Some(service_id) = pod.service_id else {
            return Ok(());
        };
        if pod.status == old_status {
            return Ok(());
        }
        match pod.status {
            PodStatus::Failed => {
                let age = Utc::now()
                    .signed_duration_since(pod.created_at)
                    .num_seconds();
                if age > self.timing.crash_loop_window_secs as i64 {
                    return Ok(());
                }
                let svc = match services::get_by_id(&self.store, service_id).await {
                    Ok(svc) => svc,
                    Err(StoreError::NotFound(_)) => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                let mut failure_state = svc.failure_state.clone();
                failure_state.consecutive_failures += 1;
                failure_state.last_failed_version = Some(pod.pack_version.clone());
                tracing::warn!(
                    service = %svc.name,
                    pod_id = %pod.id,
                    failures = failure_state.consecutive_failures,
                    "service pod failed inside crash-loop window"
                );
                services::update(
                    &self.store,
                    corr,
                    service_id,
                    ServicePatch {
                        failure_state: Some(failure_state),
                        ..Default::default()
                    },
                )
                .await?;
            }
            PodStatus::Running => {
                let svc = match services::get_by_id(&self.store, service_id).await {
                    Ok(svc) => svc,
                    Err(StoreError::NotFound(_)) => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                let needs_reset = svc.failure_state.consecutive_failures != 0
                    || svc.failure_state.last_good_version.as_deref()
                        != Some(pod.pack_version.as_str());
                if needs_reset {
                    let mut failure_state = svc.failure_state.clone();
                    failure_state.consecutive_failures = 0;
                    failure_state.last_good_version = Some(pod.pack_version.clone());
                    services::update(
                        &self.store,
                        corr,
                        service_id,
                        ServicePatch {
                            failure_state: Some(failure_state),
                            ..Default::default()
                        },
                    )
                    .await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Namespace teardown: a Terminating namespace is removed once nothing
    /// in it is still running.
    pub async fn sweep_terminating_namespaces(&self, corr: Uuid) -> Result<()> {
        for ns in namespaces::list(&self.store, 0, i64::MAX).await? {
            if ns.phase != stark_common::types::NamespacePhase::Terminating {
                continue;
            }
            let in_ns = pods::list_all(
                &self.store,
                &PodFilter {
                    namespace: Some(ns.name.clone()),
                    ..Default::default()
                },
            )
            .await?;
            let mut live = 0;
            for pod in in_ns.iter().filter(|p| !p.status.is_terminal()) {
                live += 1;
                self.stop_pod(corr, pod.id, "namespace terminating").await?;
            }
            if live == 0 {
                tracing::info!(namespace = %ns.name, "terminating namespace is empty, removing");
                namespaces::remove(&self.store, corr, &ns.name).await?;
            }
        }
        Ok(())
    }
}
