//! Pure planning for one service reconcile pass.
//!
//! The planner looks at the service record, its owned pods, and the node
//! set, and emits the actions the executor should take. Keeping it free of
//! I/O makes convergence behavior testable against frozen inputs.

use chrono::{DateTime, Duration, Utc};
use stark_common::types::{Pod, PodStatus, Service, ServiceStatus};
use uuid::Uuid;

/// Rolling updates keep at most one surge pod and never dip below the
/// declared replica count.
const MAX_SURGE: usize = 1;

pub const BACKOFF_BASE_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Patch the service to the newest registered pack version.
    FollowLatest { version: String, pack_id: Uuid },
    /// `pending` service has converged enough to be `active`.
    Activate,
    EnterRolling,
    ExitRolling,
    /// Create `count` replica pods; `pinned_node` carries DaemonSet
    /// placement as a (node id, node name) pair.
    CreatePods {
        count: usize,
        pinned_node: Option<(Uuid, String)>,
    },
    StopPod { pod_id: Uuid, reason: String },
    /// Crash loop with a known-good version: roll back and keep converging.
    Rollback {
        to_version: String,
        backoff_until: DateTime<Utc>,
        attempts: i32,
    },
    /// Crash loop with nowhere to roll back to: pause with backoff.
    EnterBackoff {
        until: DateTime<Utc>,
        attempts: i32,
        message: String,
    },
    /// Pods have been stably running; clear crash-loop bookkeeping.
    ClearFailures,
    /// Remember the running version as the rollback target.
    RecordGoodVersion { version: String },
    /// Deleted service with no pods left: drop the record.
    RemoveService,
}

pub struct PlanInput<'a> {
    pub service: &'a Service,
    /// Every owned pod, terminal ones included.
    pub pods: &'a [Pod],
    /// Nodes a DaemonSet pod could run on, as (id, name).
    pub eligible_nodes: &'a [(Uuid, String)],
    /// Highest registered semver for the service's pack, with its id.
    pub latest: Option<(&'a str, Uuid)>,
    pub now: DateTime<Utc>,
    /// Running this long clears the crash-loop counter.
    pub stable_running_secs: i64,
    pub backoff_max_secs: i64,
}

fn backoff_until(now: DateTime<Utc>, attempts: i32, max_secs: i64) -> DateTime<Utc> {
    let exp = BACKOFF_BASE_SECS.saturating_mul(1i64 << attempts.clamp(0, 30));
    now + Duration::seconds(exp.min(max_secs))
}

fn newer_than(candidate: &str, current: &str) -> bool {
    match (
        semver::Version::parse(candidate),
        semver::Version::parse(current),
    ) {
        (Ok(c), Ok(cur)) => c > cur,
        _ => false,
    }
}

/// The node a DaemonSet pod was pinned to at creation.
pub fn pinned_node_name(pod: &Pod) -> Option<&str> {
    pod.scheduling
        .node_selector
        .get(crate::registry::NODE_NAME_LABEL)
        .map(String::as_str)
}

pub fn plan(input: &PlanInput) -> Vec<Action> {
    let svc = input.service;
    let mut actions = Vec::new();

    let live: Vec<&Pod> = input
        .pods
        .iter()
        .filter(|p| !p.status.is_terminal())
        .collect();

    // Deleted services only ever shrink: stop everything, then vanish.
    if svc.status == ServiceStatus::Deleted {
        if live.is_empty() {
            return vec![Action::RemoveService];
        }
        return live
            .iter()
            .map(|p| Action::StopPod {
                pod_id: p.id,
                reason: "service deleted".into(),
            })
            .collect();
    }

    // Crash-loop decay: anything that has run stably long enough clears the
    // counter and becomes the rollback target.
    let stable_version = live
        .iter()
        .filter(|p| p.status == PodStatus::Running)
        .filter(|p| {
            p.started_at.is_some_and(|t| {
                input.now.signed_duration_since(t).num_seconds() >= input.stable_running_secs
            })
        })
        .map(|p| p.pack_version.clone())
        .next();
    if let Some(version) = &stable_version {
        if svc.failure_state.consecutive_failures > 0 || svc.failure_state.backoff_attempts > 0 {
            actions.push(Action::ClearFailures);
        }
        if svc.failure_state.last_good_version.as_deref() != Some(version) {
            actions.push(Action::RecordGoodVersion {
                version: version.clone(),
            });
        }
    }

    // Manual pause short-circuits everything. A backoff pause resumes once a
    // newer pack version supersedes the failed one.
    if svc.status == ServiceStatus::Paused {
        let superseded = match (
            &svc.failure_state.last_failed_version,
            input.latest,
        ) {
            (Some(failed), Some((latest, _))) => newer_than(latest, failed),
            _ => false,
        };
        if svc.failure_state.backoff_until.is_some() && superseded && svc.follow_latest {
            let (latest, pack_id) = input.latest.expect("checked above");
            return vec![
                Action::ClearFailures,
                Action::FollowLatest {
                    version: latest.to_string(),
                    pack_id,
                },
            ];
        }
        return actions;
    }

    // Follow-latest advances the declared version; the rolling machinery
    // picks the change up on the next pass.
    if svc.follow_latest
        && let Some((latest, pack_id)) = input.latest
        && newer_than(latest, &svc.pack_version)
    {
        actions.push(Action::FollowLatest {
            version: latest.to_string(),
            pack_id,
        });
        return actions;
    }

    // Crash-loop trip point.
    if svc.failure_state.consecutive_failures >= 3 {
        let attempts = svc.failure_state.backoff_attempts;
        let until = backoff_until(input.now, attempts, input.backoff_max_secs);
        match &svc.failure_state.last_good_version {
            Some(good) if *good != svc.pack_version => {
                actions.push(Action::Rollback {
                    to_version: good.clone(),
                    backoff_until: until,
                    attempts: attempts + 1,
                });
            }
            _ => {
                actions.push(Action::EnterBackoff {
                    until,
                    attempts: attempts + 1,
                    message: format!(
                        "crash loop on version {}: {} consecutive failures",
                        svc.pack_version, svc.failure_state.consecutive_failures
                    ),
                });
            }
        }
        return actions;
    }

    // Backoff window: do not grow pods of the still-failing version unless a
    // newer pack has been registered since.
    if let (Some(until), Some(failed)) = (
        svc.failure_state.backoff_until,
        svc.failure_state.last_failed_version.as_deref(),
    ) && until > input.now
        && svc.pack_version == failed
        && !input.latest.is_some_and(|(latest, _)| newer_than(latest, failed))
    {
        return actions;
    }

    if svc.replicas > 0 {
        plan_replicas(input, &live, &mut actions);
    } else {
        plan_daemonset(input, &live, &mut actions);
    }
    actions
}

fn plan_replicas(input: &PlanInput, live: &[&Pod], actions: &mut Vec<Action>) {
    let svc = input.service;
    let desired = svc.replicas as usize;

    let old: Vec<&&Pod> = live
        .iter()
        .filter(|p| p.pack_version != svc.pack_version)
        .collect();
    let new: Vec<&&Pod> = live
        .iter()
        .filter(|p| p.pack_version == svc.pack_version)
        .collect();
    let new_running = new
        .iter()
        .filter(|p| p.status == PodStatus::Running)
        .count();
    let new_in_flight = new.len() - new_running;

    if !old.is_empty() {
        // A version change is in progress: surge one new pod, wait for it to
        // run, then retire one old pod, and repeat.
        if svc.status != ServiceStatus::Rolling {
            actions.push(Action::EnterRolling);
        }
        if new_in_flight == 0 && new.len() < desired && live.len() < desired + MAX_SURGE {
            actions.push(Action::CreatePods {
                count: 1,
                pinned_node: None,
            });
        }
        if new_running > 0 && new_running + old.len() > desired {
            // Retire the oldest outdated pod first.
            if let Some(victim) = old.iter().min_by_key(|p| (p.created_at, p.id)) {
                actions.push(Action::StopPod {
                    pod_id: victim.id,
                    reason: format!("rolling update to {}", svc.pack_version),
                });
            }
        }
        return;
    }

    // Versions are aligned; converge the count.
    if live.len() < desired {
        actions.push(Action::CreatePods {
            count: desired - live.len(),
            pinned_node: None,
        });
    } else if live.len() > desired {
        // Shed surplus, preferring pods that never made it to running.
        let mut surplus: Vec<&&Pod> = live.iter().collect();
        surplus.sort_by_key(|p| {
            (
                p.status == PodStatus::Running,
                std::cmp::Reverse((p.created_at, p.id)),
            )
        });
        for victim in surplus.iter().take(live.len() - desired) {
            actions.push(Action::StopPod {
                pod_id: victim.id,
                reason: "surplus replica".into(),
            });
        }
    }

    match svc.status {
        ServiceStatus::Rolling if new_running == desired => actions.push(Action::ExitRolling),
        ServiceStatus::Pending => actions.push(Action::Activate),
        _ => {}
    }
}

fn plan_daemonset(input: &PlanInput, live: &[&Pod], actions: &mut Vec<Action>) {
    let svc = input.service;

    // One pod per eligible node, keyed by the pin label.
    for (node_id, node_name) in input.eligible_nodes {
        let on_node: Vec<&&Pod> = live
            .iter()
            .filter(|p| pinned_node_name(p) == Some(node_name.as_str()))
            .collect();
        match on_node.first() {
            None => actions.push(Action::CreatePods {
                count: 1,
                pinned_node: Some((*node_id, node_name.clone())),
            }),
            Some(pod) if pod.pack_version != svc.pack_version => {
                // Per-node replacement: stop now, recreate next pass.
                actions.push(Action::StopPod {
                    pod_id: pod.id,
                    reason: format!("daemonset update to {}", svc.pack_version),
                });
            }
            Some(_) => {}
        }
    }

    // Pods whose node left the eligible set.
    for pod in live {
        let still_eligible = pinned_node_name(pod)
            .is_some_and(|name| input.eligible_nodes.iter().any(|(_, n)| n == name));
        if !still_eligible {
            actions.push(Action::StopPod {
                pod_id: pod.id,
                reason: "node no longer eligible".into(),
            });
        }
    }

    if svc.status == ServiceStatus::Pending {
        actions.push(Action::Activate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stark_common::types::*;
    use std::collections::BTreeMap;

    fn service(replicas: i32, version: &str, status: ServiceStatus) -> Service {
        Service {
            id: Uuid::from_u128(1),
            name: "svc".into(),
            namespace: DEFAULT_NAMESPACE.into(),
            pack_id: Uuid::from_u128(2),
            pack_name: "hello".into(),
            pack_version: version.into(),
            replicas,
            status,
            status_message: None,
            visibility: Visibility::Public,
            exposed: false,
            ingress_port: None,
            scheduling: SchedulingConstraints::default(),
            tolerations: vec![],
            resource_requests: PodResources {
                cpu: 100,
                memory: 128,
                storage: None,
            },
            pod_labels: Labels::new(),
            allowed_sources: vec![],
            follow_latest: false,
            failure_state: FailureState::default(),
            created_by: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn pod(id: u128, version: &str, status: PodStatus) -> Pod {
        Pod {
            id: Uuid::from_u128(id),
            pack_id: Uuid::from_u128(2),
            pack_version: version.into(),
            node_id: Some(Uuid::from_u128(90)),
            namespace: DEFAULT_NAMESPACE.into(),
            status,
            status_message: None,
            priority: 0,
            labels: Labels::new(),
            tolerations: vec![],
            scheduling: SchedulingConstraints::default(),
            resource_requests: PodResources {
                cpu: 100,
                memory: 128,
                storage: None,
            },
            resource_limits: None,
            created_by: Uuid::nil(),
            service_id: Some(Uuid::from_u128(1)),
            created_at: Utc::now() - Duration::seconds(600),
            started_at: None,
            stopped_at: None,
        }
    }

    fn input<'a>(svc: &'a Service, pods: &'a [Pod]) -> PlanInput<'a> {
        PlanInput {
            service: svc,
            pods,
            eligible_nodes: &[],
            latest: None,
            now: Utc::now(),
            stable_running_secs: 300,
            backoff_max_secs: 3600,
        }
    }

    #[test]
    fn scales_up_to_declared_replicas() {
        let svc = service(2, "1.0.0", ServiceStatus::Active);
        let pods = vec![pod(10, "1.0.0", PodStatus::Running)];
        let actions = plan(&input(&svc, &pods));
        assert_eq!(
            actions,
            vec![Action::CreatePods {
                count: 1,
                pinned_node: None
            }]
        );
    }

    #[test]
    fn converged_service_plans_nothing() {
        let svc = service(2, "1.0.0", ServiceStatus::Active);
        let pods = vec![
            pod(10, "1.0.0", PodStatus::Running),
            pod(11, "1.0.0", PodStatus::Running),
        ];
        assert!(plan(&input(&svc, &pods)).is_empty());
    }

    #[test]
    fn surplus_prefers_stopping_non_running_pods() {
        let svc = service(1, "1.0.0", ServiceStatus::Active);
        let pods = vec![
            pod(10, "1.0.0", PodStatus::Running),
            pod(11, "1.0.0", PodStatus::Starting),
        ];
        let actions = plan(&input(&svc, &pods));
        assert_eq!(
            actions,
            vec![Action::StopPod {
                pod_id: Uuid::from_u128(11),
                reason: "surplus replica".into()
            }]
        );
    }

    #[test]
    fn version_change_enters_rolling_with_one_surge_pod() {
        let svc = service(2, "1.1.0", ServiceStatus::Active);
        let pods = vec![
            pod(10, "1.0.0", PodStatus::Running),
            pod(11, "1.0.0", PodStatus::Running),
        ];
        let actions = plan(&input(&svc, &pods));
        assert_eq!(
            actions,
            vec![
                Action::EnterRolling,
                Action::CreatePods {
                    count: 1,
                    pinned_node: None
                }
            ]
        );
    }

    #[test]
    fn rolling_waits_for_surge_pod_before_stopping_old() {
        let svc = service(2, "1.1.0", ServiceStatus::Rolling);
        let pods = vec![
            pod(10, "1.0.0", PodStatus::Running),
            pod(11, "1.0.0", PodStatus::Running),
            pod(12, "1.1.0", PodStatus::Starting),
        ];
        // Surge pod not running yet: do nothing, total stays at three.
        assert!(plan(&input(&svc, &pods)).is_empty());
    }

    #[test]
    fn rolling_retires_oldest_old_pod_once_surge_runs() {
        let svc = service(2, "1.1.0", ServiceStatus::Rolling);
        let mut old_a = pod(10, "1.0.0", PodStatus::Running);
        old_a.created_at = Utc::now() - Duration::seconds(1000);
        let pods = vec![
            old_a,
            pod(11, "1.0.0", PodStatus::Running),
            pod(12, "1.1.0", PodStatus::Running),
        ];
        let actions = plan(&input(&svc, &pods));
        assert_eq!(
            actions,
            vec![Action::StopPod {
                pod_id: Uuid::from_u128(10),
                reason: "rolling update to 1.1.0".into()
            }]
        );
    }

    #[test]
    fn rolling_finishes_when_all_replicas_run_new_version() {
        let svc = service(2, "1.1.0", ServiceStatus::Rolling);
        let pods = vec![
            pod(12, "1.1.0", PodStatus::Running),
            pod(13, "1.1.0", PodStatus::Running),
        ];
        let actions = plan(&input(&svc, &pods));
        assert_eq!(actions, vec![Action::ExitRolling]);
    }

    #[test]
    fn follow_latest_advances_version_first() {
        let mut svc = service(2, "1.0.0", ServiceStatus::Active);
        svc.follow_latest = true;
        let pods = vec![
            pod(10, "1.0.0", PodStatus::Running),
            pod(11, "1.0.0", PodStatus::Running),
        ];
        let mut inp = input(&svc, &pods);
        inp.latest = Some(("1.2.0", Uuid::from_u128(7)));
        let actions = plan(&inp);
        assert_eq!(
            actions,
            vec![Action::FollowLatest {
                version: "1.2.0".into(),
                pack_id: Uuid::from_u128(7)
            }]
        );
    }

    #[test]
    fn crash_loop_rolls_back_to_known_good_version() {
        let mut svc = service(2, "1.2.0", ServiceStatus::Rolling);
        svc.failure_state.consecutive_failures = 3;
        svc.failure_state.last_failed_version = Some("1.2.0".into());
        svc.failure_state.last_good_version = Some("1.1.0".into());
        let pods = vec![pod(10, "1.1.0", PodStatus::Running)];
        let actions = plan(&input(&svc, &pods));
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::Rollback {
                to_version,
                attempts,
                ..
            } => {
                assert_eq!(to_version, "1.1.0");
                assert_eq!(*attempts, 1);
            }
            other => panic!("expected rollback, got {other:?}"),
        }
    }

    #[test]
    fn crash_loop_without_good_version_pauses_with_backoff() {
        let mut svc = service(2, "1.0.0", ServiceStatus::Active);
        svc.failure_state.consecutive_failures = 3;
        svc.failure_state.last_failed_version = Some("1.0.0".into());
        let actions = plan(&input(&svc, &[]));
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::EnterBackoff { attempts, message, .. } => {
                assert_eq!(*attempts, 1);
                assert!(message.contains("crash loop"));
            }
            other => panic!("expected backoff, got {other:?}"),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let now = Utc::now();
        let first = backoff_until(now, 0, 3600);
        let second = backoff_until(now, 1, 3600);
        let huge = backoff_until(now, 20, 3600);
        assert_eq!((first - now).num_seconds(), 60);
        assert_eq!((second - now).num_seconds(), 120);
        assert_eq!((huge - now).num_seconds(), 3600);
    }

    #[test]
    fn backoff_window_blocks_creates_for_failed_version() {
        let mut svc = service(2, "1.0.0", ServiceStatus::Active);
        svc.failure_state.last_failed_version = Some("1.0.0".into());
        svc.failure_state.backoff_until = Some(Utc::now() + Duration::seconds(600));
        let actions = plan(&input(&svc, &[]));
        assert!(actions.is_empty());
    }

    #[test]
    fn newer_registered_version_clears_the_backoff_block() {
        let mut svc = service(2, "1.0.0", ServiceStatus::Active);
        svc.failure_state.last_failed_version = Some("1.0.0".into());
        svc.failure_state.backoff_until = Some(Utc::now() + Duration::seconds(600));
        let mut inp = input(&svc, &[]);
        inp.latest = Some(("1.0.1", Uuid::from_u128(9)));
        let actions = plan(&inp);
        assert_eq!(
            actions,
            vec![Action::CreatePods {
                count: 2,
                pinned_node: None
            }]
        );
    }

    #[test]
    fn stable_running_clears_failures_and_records_good_version() {
        let mut svc = service(1, "1.1.0", ServiceStatus::Active);
        svc.failure_state.consecutive_failures = 2;
        let mut p = pod(10, "1.1.0", PodStatus::Running);
        p.started_at = Some(Utc::now() - Duration::seconds(900));
        let pods = vec![p];
        let actions = plan(&input(&svc, &pods));
        assert_eq!(
            actions,
            vec![
                Action::ClearFailures,
                Action::RecordGoodVersion {
                    version: "1.1.0".into()
                }
            ]
        );
    }

    #[test]
    fn paused_service_short_circuits() {
        let svc = service(3, "1.0.0", ServiceStatus::Paused);
        assert!(plan(&input(&svc, &[])).is_empty());
    }

    #[test]
    fn deleted_service_stops_pods_then_removes_record() {
        let svc = service(2, "1.0.0", ServiceStatus::Deleted);
        let pods = vec![pod(10, "1.0.0", PodStatus::Running)];
        let actions = plan(&input(&svc, &pods));
        assert_eq!(
            actions,
            vec![Action::StopPod {
                pod_id: Uuid::from_u128(10),
                reason: "service deleted".into()
            }]
        );
        let actions = plan(&input(&svc, &[]));
        assert_eq!(actions, vec![Action::RemoveService]);
    }

    #[test]
    fn daemonset_creates_one_pod_per_eligible_node() {
        let svc = service(0, "1.0.0", ServiceStatus::Active);
        let nodes = vec![
            (Uuid::from_u128(20), "n1".to_string()),
            (Uuid::from_u128(21), "n2".to_string()),
        ];
        let mut pinned = pod(10, "1.0.0", PodStatus::Running);
        pinned.scheduling.node_selector = BTreeMap::from([(
            crate::registry::NODE_NAME_LABEL.to_string(),
            "n1".to_string(),
        )]);
        let pods = vec![pinned];
        let mut inp = input(&svc, &pods);
        inp.eligible_nodes = &nodes;
        let actions = plan(&inp);
        assert_eq!(
            actions,
            vec![Action::CreatePods {
                count: 1,
                pinned_node: Some((Uuid::from_u128(21), "n2".into()))
            }]
        );
    }

    #[test]
    fn daemonset_stops_pods_on_ineligible_nodes() {
        let svc = service(0, "1.0.0", ServiceStatus::Active);
        let mut pinned = pod(10, "1.0.0", PodStatus::Running);
        pinned.scheduling.node_selector = BTreeMap::from([(
            crate::registry::NODE_NAME_LABEL.to_string(),
            "gone".to_string(),
        )]);
        let pods = vec![pinned];
        let inp = input(&svc, &pods);
        let actions = plan(&inp);
        assert_eq!(
            actions,
            vec![Action::StopPod {
                pod_id: Uuid::from_u128(10),
                reason: "node no longer eligible".into()
            }]
        );
    }
}
