//! Network policy engine.
//!
//! Evaluation order: explicit deny beats any allow, then explicit allow,
//! then default deny. Policies are namespace-scoped; a cross-namespace call
//! is judged in the target's namespace. The rule set is immutable between
//! syncs: a sync builds a fresh snapshot that is swapped in atomically.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use stark_common::types::{NetworkPolicy, PolicyAction, Service};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            deny_reason: None,
        }
    }

    pub fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            deny_reason: Some(reason.to_string()),
        }
    }
}

#[derive(Default)]
pub struct PolicySnapshot {
    /// (source, target, namespace) -> action.
    rules: HashMap<(String, String, String), PolicyAction>,
}

impl PolicySnapshot {
    /// Build from the persisted policy set plus each service's
    /// `allowedSources`, which act as allow rules contributed by the target.
    pub fn build(policies: &[NetworkPolicy], services: &[Service]) -> Self {
        let mut rules = HashMap::new();
        for svc in services {
            for source in &svc.allowed_sources {
                rules.insert(
                    (source.clone(), svc.name.clone(), svc.namespace.clone()),
                    PolicyAction::Allow,
                );
            }
        }
        // Explicit policies override allowed-sources entries.
        for policy in policies {
            rules.insert(
                (
                    policy.source_service.clone(),
                    policy.target_service.clone(),
                    policy.namespace.clone(),
                ),
                policy.action,
            );
        }
        Self { rules }
    }

    pub fn evaluate(&self, source: &str, target: &str, namespace: &str) -> Decision {
        match self.rules.get(&(
            source.to_string(),
            target.to_string(),
            namespace.to_string(),
        )) {
            Some(PolicyAction::Deny) => Decision::deny("explicit-deny"),
            Some(PolicyAction::Allow) => Decision::allow(),
            None => Decision::deny("default-deny"),
        }
    }
}

pub struct PolicyEngine {
    snapshot: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(PolicySnapshot::default())),
        }
    }

    pub fn replace(&self, snapshot: PolicySnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    pub fn evaluate(&self, source: &str, target: &str, namespace: &str) -> Decision {
        let snap = self.snapshot.read().clone();
        snap.evaluate(source, target, namespace)
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn policy(source: &str, target: &str, action: PolicyAction, ns: &str) -> NetworkPolicy {
        NetworkPolicy {
            id: Uuid::new_v4(),
            source_service: source.into(),
            target_service: target.into(),
            action,
            namespace: ns.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn default_is_deny() {
        let snap = PolicySnapshot::build(&[], &[]);
        let decision = snap.evaluate("a", "b", "default");
        assert!(!decision.allowed);
        assert_eq!(decision.deny_reason.as_deref(), Some("default-deny"));
    }

    #[test]
    fn explicit_allow_admits() {
        let snap = PolicySnapshot::build(&[policy("a", "b", PolicyAction::Allow, "default")], &[]);
        assert!(snap.evaluate("a", "b", "default").allowed);
        // Direction matters.
        assert!(!snap.evaluate("b", "a", "default").allowed);
    }

    #[test]
    fn explicit_deny_wins_over_allowed_sources() {
        let svc = stark_common::types::Service {
            id: Uuid::new_v4(),
            name: "b".into(),
            namespace: "default".into(),
            pack_id: Uuid::new_v4(),
            pack_name: "p".into(),
            pack_version: "1.0.0".into(),
            replicas: 1,
            status: stark_common::types::ServiceStatus::Active,
            status_message: None,
            visibility: stark_common::types::Visibility::Public,
            exposed: false,
            ingress_port: None,
            scheduling: Default::default(),
            tolerations: vec![],
            resource_requests: Default::default(),
            pod_labels: Default::default(),
            allowed_sources: vec!["a".into()],
            follow_latest: false,
            failure_state: Default::default(),
            created_by: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        // allowedSources admits a -> b ...
        let snap = PolicySnapshot::build(&[], std::slice::from_ref(&svc));
        assert!(snap.evaluate("a", "b", "default").allowed);

        // ... but an explicit deny overrides it.
        let snap = PolicySnapshot::build(
            &[policy("a", "b", PolicyAction::Deny, "default")],
            std::slice::from_ref(&svc),
        );
        let decision = snap.evaluate("a", "b", "default");
        assert!(!decision.allowed);
        assert_eq!(decision.deny_reason.as_deref(), Some("explicit-deny"));
    }

    #[test]
    fn policies_are_namespace_scoped() {
        let snap = PolicySnapshot::build(&[policy("a", "b", PolicyAction::Allow, "prod")], &[]);
        assert!(snap.evaluate("a", "b", "prod").allowed);
        assert!(!snap.evaluate("a", "b", "staging").allowed);
    }

    #[test]
    fn engine_swaps_snapshots_atomically() {
        let engine = PolicyEngine::new();
        assert!(!engine.evaluate("a", "b", "default").allowed);
        engine.replace(PolicySnapshot::build(
            &[policy("a", "b", PolicyAction::Allow, "default")],
            &[],
        ));
        assert!(engine.evaluate("a", "b", "default").allowed);
    }
}
