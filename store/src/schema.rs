//! Idempotent schema bootstrap.
//!
//! The relational schema is owned by the gateway; entity shapes from
//! `stark_common::types` are the contract everyone else sees. Structured
//! fields (labels, taints, scheduling, resources) live in JSONB columns.

use anyhow::{Context, Result};
use deadpool_postgres::Pool;

const STATEMENTS: &[(&str, &str)] = &[
    (
        "packs",
        r#"
        CREATE TABLE IF NOT EXISTS packs (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            runtime_tag TEXT NOT NULL,
            owner_id UUID NOT NULL,
            visibility TEXT NOT NULL,
            bundle_path TEXT NOT NULL,
            min_node_version TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (name, version)
        )
        "#,
    ),
    (
        "nodes",
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            runtime_type TEXT NOT NULL,
            runtime_version TEXT,
            status TEXT NOT NULL,
            unschedulable BOOLEAN NOT NULL DEFAULT FALSE,
            labels JSONB NOT NULL DEFAULT '{}',
            taints JSONB NOT NULL DEFAULT '[]',
            allocatable JSONB NOT NULL,
            allocated JSONB NOT NULL,
            last_heartbeat TIMESTAMPTZ,
            registered_by UUID NOT NULL,
            connection_id UUID,
            created_at TIMESTAMPTZ NOT NULL,
            deleted_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "nodes name index",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_live_name
        ON nodes (name) WHERE deleted_at IS NULL
        "#,
    ),
    (
        "pods",
        r#"
        CREATE TABLE IF NOT EXISTS pods (
            id UUID PRIMARY KEY,
            pack_id UUID NOT NULL,
            pack_version TEXT NOT NULL,
            node_id UUID,
            namespace TEXT NOT NULL,
            status TEXT NOT NULL,
            status_message TEXT,
            priority INT NOT NULL DEFAULT 0,
            labels JSONB NOT NULL DEFAULT '{}',
            tolerations JSONB NOT NULL DEFAULT '[]',
            scheduling JSONB NOT NULL DEFAULT '{}',
            resource_requests JSONB NOT NULL,
            resource_limits JSONB,
            created_by UUID NOT NULL,
            service_id UUID,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            stopped_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "pods service index",
        "CREATE INDEX IF NOT EXISTS idx_pods_service ON pods (service_id)",
    ),
    (
        "pods node index",
        "CREATE INDEX IF NOT EXISTS idx_pods_node ON pods (node_id)",
    ),
    (
        "pods namespace index",
        "CREATE INDEX IF NOT EXISTS idx_pods_namespace ON pods (namespace)",
    ),
    (
        "pod_events",
        r#"
        CREATE TABLE IF NOT EXISTS pod_events (
            id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
            pod_id UUID NOT NULL,
            from_status TEXT,
            to_status TEXT NOT NULL,
            message TEXT,
            at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "pod_events pod index",
        "CREATE INDEX IF NOT EXISTS idx_pod_events_pod ON pod_events (pod_id, id)",
    ),
    (
        "services",
        r#"
        CREATE TABLE IF NOT EXISTS services (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            namespace TEXT NOT NULL,
            pack_id UUID NOT NULL,
            pack_name TEXT NOT NULL,
            pack_version TEXT NOT NULL,
            replicas INT NOT NULL,
            status TEXT NOT NULL,
            status_message TEXT,
            visibility TEXT NOT NULL,
            exposed BOOLEAN NOT NULL DEFAULT FALSE,
            ingress_port INT,
            scheduling JSONB NOT NULL DEFAULT '{}',
            tolerations JSONB NOT NULL DEFAULT '[]',
            resource_requests JSONB NOT NULL,
            pod_labels JSONB NOT NULL DEFAULT '{}',
            allowed_sources JSONB NOT NULL DEFAULT '[]',
            follow_latest BOOLEAN NOT NULL DEFAULT FALSE,
            failure_state JSONB NOT NULL DEFAULT '{}',
            created_by UUID NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (namespace, name)
        )
        "#,
    ),
    (
        "namespaces",
        r#"
        CREATE TABLE IF NOT EXISTS namespaces (
            name TEXT PRIMARY KEY,
            phase TEXT NOT NULL,
            labels JSONB NOT NULL DEFAULT '{}',
            resource_quota JSONB,
            limit_range JSONB,
            created_by UUID NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "network_policies",
        r#"
        CREATE TABLE IF NOT EXISTS network_policies (
            id UUID PRIMARY KEY,
            source_service TEXT NOT NULL,
            target_service TEXT NOT NULL,
            action TEXT NOT NULL,
            namespace TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (source_service, target_service, namespace)
        )
        "#,
    ),
];

pub async fn init_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;
    for (what, sql) in STATEMENTS {
        client
            .execute(*sql, &[])
            .await
            .with_context(|| format!("failed to create {what}"))?;
    }
    tracing::info!("store schema initialized");
    Ok(())
}
