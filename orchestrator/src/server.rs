//! Control API assembly: public health/auth surface, the protected `/api`
//! resources, the agent channel at `/ws`, and the metrics endpoint.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use metrics_exporter_prometheus::PrometheusBuilder;
use stark_common::shutdown::shutdown_signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::connection::ws_handler;
use crate::args::ServerArgs;
use crate::auth::require_principal;
use crate::controller::Controller;
use crate::handlers;
use crate::state::AppState;

pub async fn run_server(args: ServerArgs) -> Result<()> {
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let cancel = CancellationToken::new();
    let state = AppState::build(&args, cancel.clone()).await?;

    let controller = tokio::spawn(
        Controller::new(state.clone()).run(
            cancel.clone(),
            Duration::from_secs(args.shutdown_drain_secs),
        ),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/packs", get(handlers::packs::list).post(handlers::packs::create))
        .route("/packs/{name}/versions", get(handlers::packs::versions))
        .route("/packs/{id}", delete(handlers::packs::delete))
        .route("/pods", get(handlers::pods::list).post(handlers::pods::create))
        .route(
            "/pods/{id}",
            get(handlers::pods::get).delete(handlers::pods::delete),
        )
        .route("/pods/{id}/status", get(handlers::pods::status))
        .route("/pods/{id}/history", get(handlers::pods::history))
        .route("/pods/{id}/rollback", post(handlers::pods::rollback))
        .route("/nodes", get(handlers::nodes::list).post(handlers::nodes::create))
        .route(
            "/nodes/{id}",
            get(handlers::nodes::get)
                .patch(handlers::nodes::patch)
                .delete(handlers::nodes::delete),
        )
        .route("/nodes/name/{name}", get(handlers::nodes::get_by_name))
        .route("/nodes/{id}/drain", post(handlers::nodes::drain))
        .route(
            "/services",
            get(handlers::services::list).post(handlers::services::create),
        )
        .route(
            "/services/{id}",
            get(handlers::services::get)
                .patch(handlers::services::patch)
                .delete(handlers::services::delete),
        )
        .route("/services/name/{name}", get(handlers::services::get_by_name))
        .route("/services/{id}/scale", post(handlers::services::scale))
        .route("/services/{id}/expose", post(handlers::services::expose))
        .route("/services/{id}/unexpose", post(handlers::services::unexpose))
        .route(
            "/services/{id}/visibility",
            post(handlers::services::visibility),
        )
        .route(
            "/namespaces",
            get(handlers::namespaces::list).post(handlers::namespaces::create),
        )
        .route(
            "/namespaces/name/{name}",
            get(handlers::namespaces::get)
                .patch(handlers::namespaces::patch)
                .delete(handlers::namespaces::delete),
        )
        .route(
            "/namespaces/name/{name}/quota",
            get(handlers::namespaces::quota),
        )
        .route(
            "/network/policies",
            get(handlers::network::list_policies).post(handlers::network::create_policy),
        )
        .route(
            "/network/policies/{id}",
            delete(handlers::network::delete_policy),
        )
        .route("/network/registry", get(handlers::network::registry))
        .route("/network/route", post(handlers::network::route))
        .layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_principal,
        ));

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/live", get(handlers::health::live))
        .route("/auth/{action}", post(handlers::session::proxy))
        .route("/ws", get(ws_handler))
        .route(
            "/metrics",
            get(move || {
                let prometheus = prometheus.clone();
                async move { prometheus.render() }
            }),
        )
        .nest("/api", api)
        .layer(cors)
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", args.bind_addr, args.port).parse()?;
    tracing::info!(%addr, "starting control plane");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
        })
        .await?;

    tracing::info!("control listener stopped, draining controller");
    cancel.cancel();
    let _ = controller.await;
    state.ingress.shutdown();
    tracing::info!("control plane stopped");
    Ok(())
}
