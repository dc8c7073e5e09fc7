//! Agent channel wire frames.
//!
//! The node agent keeps one persistent duplex WebSocket to the orchestrator.
//! Frames are JSON text with a `type` discriminator; request/response pairs
//! carry a `correlationId`. Ingress bodies are opaque bytes, base64-encoded
//! on the wire.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    Labels, NodeResources, PodResources, PodStatus, RuntimeType, Taint,
};

/// Per-pod status line carried inside a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStateSummary {
    pub pod_id: Uuid,
    pub status: PodStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Relay-only signaling frame. The orchestrator forwards the payload to the
/// target pod's agent without inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSignal {
    pub source_pod_id: Uuid,
    pub target_pod_id: Uuid,
    pub payload: serde_json::Value,
}

/// Frames the agent sends to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentFrame {
    /// First frame on every connection; a bearer token bound to a principal.
    #[serde(rename = "auth")]
    Auth { token: String },

    #[serde(rename = "node:register")]
    #[serde(rename_all = "camelCase")]
    NodeRegister {
        name: String,
        runtime_type: RuntimeType,
        #[serde(skip_serializing_if = "Option::is_none")]
        runtime_version: Option<String>,
        allocatable: NodeResources,
        #[serde(default)]
        labels: Labels,
        #[serde(default)]
        taints: Vec<Taint>,
    },

    #[serde(rename = "node:heartbeat")]
    #[serde(rename_all = "camelCase")]
    NodeHeartbeat {
        node_id: Uuid,
        allocated: NodeResources,
        #[serde(skip_serializing_if = "Option::is_none")]
        runtime_version: Option<String>,
        #[serde(default)]
        pod_states: Vec<PodStateSummary>,
    },

    #[serde(rename = "pod:status")]
    #[serde(rename_all = "camelCase")]
    PodStatus {
        pod_id: Uuid,
        status: PodStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
    },

    #[serde(rename = "pod:log")]
    #[serde(rename_all = "camelCase")]
    PodLog {
        pod_id: Uuid,
        stream: LogStream,
        line: String,
    },

    #[serde(rename = "peer:signal")]
    PeerSignal(PeerSignal),

    #[serde(rename = "ingress:response")]
    #[serde(rename_all = "camelCase")]
    IngressResponse {
        correlation_id: Uuid,
        status: u16,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// Base64-encoded body; None means empty.
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },

    #[serde(rename = "network:route:request")]
    #[serde(rename_all = "camelCase")]
    RouteRequest {
        correlation_id: Uuid,
        source_pod_id: Uuid,
        source_service_id: Uuid,
        target_service_id: Uuid,
    },
}

/// Frames the orchestrator sends to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "auth:ok")]
    #[serde(rename_all = "camelCase")]
    AuthOk { connection_id: Uuid },

    #[serde(rename = "auth:rejected")]
    AuthRejected { reason: String },

    /// Registration ack carrying the node id the agent must heartbeat with.
    #[serde(rename = "node:registered")]
    #[serde(rename_all = "camelCase")]
    NodeRegistered {
        node_id: Uuid,
        heartbeat_interval_secs: u64,
    },

    #[serde(rename = "pod:start")]
    #[serde(rename_all = "camelCase")]
    PodStart {
        pod_id: Uuid,
        pack_id: Uuid,
        pack_version: String,
        bundle_ref: String,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_limits: Option<PodResources>,
    },

    #[serde(rename = "pod:stop")]
    #[serde(rename_all = "camelCase")]
    PodStop { pod_id: Uuid, reason: String },

    #[serde(rename = "pod:drain")]
    #[serde(rename_all = "camelCase")]
    PodDrain { pod_id: Uuid },

    #[serde(rename = "node:config")]
    #[serde(rename_all = "camelCase")]
    NodeConfig {
        #[serde(default)]
        labels: Labels,
        #[serde(default)]
        taints: Vec<Taint>,
    },

    #[serde(rename = "peer:signal")]
    PeerSignal(PeerSignal),

    #[serde(rename = "ingress:request")]
    #[serde(rename_all = "camelCase")]
    IngressRequest {
        correlation_id: Uuid,
        pod_id: Uuid,
        method: String,
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },

    #[serde(rename = "network:route:response")]
    #[serde(rename_all = "camelCase")]
    RouteResponse {
        correlation_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_pod_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_node_id: Option<Uuid>,
        policy_allowed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        deny_reason: Option<String>,
    },

    /// Broadcast when a routable pod leaves `running`; route caches holding
    /// it must invalidate.
    #[serde(rename = "network:peer-gone")]
    #[serde(rename_all = "camelCase")]
    PeerGone { pod_id: Uuid, service: String },

    /// Request-scoped failure, e.g. Backpressure when the pending ceiling
    /// is hit.
    #[serde(rename = "error")]
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<Uuid>,
        code: String,
        message: String,
    },
}

pub fn encode_body(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        None
    } else {
        Some(BASE64.encode(bytes))
    }
}

pub fn decode_body(body: Option<&str>) -> anyhow::Result<Vec<u8>> {
    match body {
        None => Ok(Vec::new()),
        Some(b) => Ok(BASE64.decode(b)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_with_type_tags() {
        let frame = AgentFrame::NodeHeartbeat {
            node_id: Uuid::nil(),
            allocated: NodeResources {
                cpu: 200,
                memory: 256,
                storage: 0,
                pods: 2,
            },
            runtime_version: Some("22.1.0".into()),
            pod_states: vec![PodStateSummary {
                pod_id: Uuid::nil(),
                status: PodStatus::Running,
                message: None,
            }],
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains(r#""type":"node:heartbeat""#));
        assert!(text.contains(r#""nodeId""#));
        let back: AgentFrame = serde_json::from_str(&text).unwrap();
        match back {
            AgentFrame::NodeHeartbeat { allocated, .. } => assert_eq!(allocated.cpu, 200),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn route_response_carries_correlation() {
        let id = Uuid::new_v4();
        let frame = ServerFrame::RouteResponse {
            correlation_id: id,
            target_pod_id: None,
            target_node_id: None,
            policy_allowed: false,
            deny_reason: Some("default-deny".into()),
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "network:route:response");
        assert_eq!(v["correlationId"], serde_json::json!(id));
        assert_eq!(v["denyReason"], "default-deny");
    }

    #[test]
    fn body_encoding_round_trips() {
        assert_eq!(encode_body(b""), None);
        let enc = encode_body(b"hello pods").unwrap();
        assert_eq!(decode_body(Some(&enc)).unwrap(), b"hello pods");
        assert!(decode_body(None).unwrap().is_empty());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let res: Result<AgentFrame, _> =
            serde_json::from_str(r#"{"type":"node:unknown","nodeId":"x"}"#);
        assert!(res.is_err());
    }
}
