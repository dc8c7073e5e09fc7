//! Ingress: per-service HTTP listeners relaying traffic to healthy pods.
//!
//! When a service declares an ingress port, a listener is bound on it and
//! every request is relayed to one of the service's healthy pods over the
//! agent channel, correlated by id. Pod selection hashes a route key taken
//! from the `X-Stark-Route` header, the `stark-route` query parameter, or a
//! monotonic counter, so a caller can pin a pod while anonymous traffic
//! round-robins.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use stark_common::protocol::{self, AgentFrame, ServerFrame};
use stark_common::types::{Service, ServiceStatus};
use stark_common::{Error, Result};
use stark_store::{Store, services};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ServiceRegistry;
use crate::agent::Connections;
use crate::metrics;

pub const ROUTE_HEADER: &str = "x-stark-route";
pub const ROUTE_QUERY_PARAM: &str = "stark-route";

struct Listener {
    service_id: Uuid,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

pub struct IngressManager {
    store: Store,
    connections: Arc<Connections>,
    registry: Arc<ServiceRegistry>,
    bind_addr: String,
    timeout: Duration,
    listeners: Mutex<HashMap<u16, Listener>>,
    counter: Arc<AtomicU64>,
}

struct IngressState {
    service_name: String,
    connections: Arc<Connections>,
    registry: Arc<ServiceRegistry>,
    timeout: Duration,
    counter: Arc<AtomicU64>,
}

impl IngressManager {
    pub fn new(
        store: Store,
        connections: Arc<Connections>,
        registry: Arc<ServiceRegistry>,
        bind_addr: String,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            connections,
            registry,
            bind_addr,
            timeout,
            listeners: Mutex::new(HashMap::new()),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Converge listeners with the set of exposed services.
    pub async fn sync(&self) -> Result<()> {
        let all = services::list_all(&self.store).await?;
        let desired: HashMap<u16, &Service> = all
            .iter()
            .filter(|s| s.exposed && s.status != ServiceStatus::Deleted)
            .filter_map(|s| s.ingress_port.map(|p| (p, s)))
            .collect();

        let mut listeners = self.listeners.lock();
        // Stop listeners whose service went away or moved port.
        let stale: Vec<u16> = listeners
            .iter()
            .filter(|(port, l)| {
                desired
                    .get(port)
                    .map(|s| s.id != l.service_id)
                    .unwrap_or(true)
            })
            .map(|(port, _)| *port)
            .collect();
        for port in stale {
            if let Some(listener) = listeners.remove(&port) {
                tracing::info!(port, "stopping ingress listener");
                listener.cancel.cancel();
                listener.handle.abort();
            }
        }
        // Start missing ones.
        for (port, svc) in desired {
            if listeners.contains_key(&port) {
                continue;
            }
            tracing::info!(port, service = %svc.name, "starting ingress listener");
            let cancel = CancellationToken::new();
            let state = Arc::new(IngressState {
                service_name: svc.name.clone(),
                connections: self.connections.clone(),
                registry: self.registry.clone(),
                timeout: self.timeout,
                counter: self.counter.clone(),
            });
            let addr = format!("{}:{}", self.bind_addr, port);
            let child = cancel.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = serve_ingress(addr, state, child).await {
                    tracing::error!(port, "ingress listener failed: {e}");
                }
            });
            listeners.insert(
                port,
                Listener {
                    service_id: svc.id,
                    cancel,
                    handle,
                },
            );
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        let mut listeners = self.listeners.lock();
        for (_, listener) in listeners.drain() {
            listener.cancel.cancel();
            listener.handle.abort();
        }
    }
}

async fn serve_ingress(
    addr: String,
    state: Arc<IngressState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = Router::new()
        .fallback(relay_request)
        .with_state(state);
    let addr: SocketAddr = addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// Route key precedence: header, then query param, then counter.
fn route_key(headers: &HeaderMap, uri: &Uri, counter: &AtomicU64) -> String {
    if let Some(value) = headers.get(ROUTE_HEADER)
        && let Ok(value) = value.to_str()
    {
        return value.to_string();
    }
    if let Some(query) = uri.query() {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=')
                && key == ROUTE_QUERY_PARAM
            {
                return value.to_string();
            }
        }
    }
    counter.fetch_add(1, Ordering::Relaxed).to_string()
}

fn hash_select<T>(key: &str, items: &[T]) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    Some((hasher.finish() % items.len() as u64) as usize)
}

async fn relay_request(
    State(state): State<Arc<IngressState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let started = Instant::now();
    match relay_inner(&state, method, uri, headers, body).await {
        Ok(response) => {
            metrics::ingress_request(response.status().as_u16(), started.elapsed().as_secs_f64());
            response
        }
        Err(e) => {
            let status = e.status();
            metrics::ingress_request(status.as_u16(), started.elapsed().as_secs_f64());
            e.into_response()
        }
    }
}

async fn relay_inner(
    state: &IngressState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response> {
    let endpoints = state.registry.healthy(&state.service_name);
    let key = route_key(&headers, &uri, &state.counter);
    let Some(index) = hash_select(&key, &endpoints) else {
        return Err(Error::BackendUnavailable(format!(
            "no healthy pods for service {}",
            state.service_name
        )));
    };
    let (pod_id, node_id) = endpoints[index];

    let correlation_id = Uuid::new_v4();
    let mut frame_headers = BTreeMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            frame_headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    let frame = ServerFrame::IngressRequest {
        correlation_id,
        pod_id,
        method: method.to_string(),
        url: uri.to_string(),
        headers: frame_headers,
        body: protocol::encode_body(&body),
    };

    let response = state
        .connections
        .request_to_node(node_id, correlation_id, frame, state.timeout)
        .await;
    let frame = match response {
        Ok(frame) => frame,
        Err(Error::Timeout(_)) => {
            metrics::ingress_timeout();
            return Err(Error::Timeout(format!(
                "pod {pod_id} did not answer within {:?}",
                state.timeout
            )));
        }
        Err(e) => return Err(e),
    };

    let AgentFrame::IngressResponse {
        status,
        headers,
        body,
        ..
    } = frame
    else {
        return Err(Error::Internal(anyhow::anyhow!(
            "unexpected frame kind answering an ingress request"
        )));
    };

    let mut response = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    let response_headers = response.headers_mut().expect("fresh builder");
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(&value),
        ) {
            response_headers.insert(name, value);
        }
    }
    let bytes = protocol::decode_body(body.as_deref())
        .map_err(|e| Error::Internal(anyhow::anyhow!("bad ingress response body: {e}")))?;
    response
        .body(Body::from(bytes))
        .map_err(|e| Error::Internal(anyhow::anyhow!("building ingress response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_selection_is_stable_per_key() {
        let endpoints = vec![1, 2, 3, 4, 5];
        let first = hash_select("tenant-42", &endpoints).unwrap();
        for _ in 0..10 {
            assert_eq!(hash_select("tenant-42", &endpoints), Some(first));
        }
        assert_eq!(hash_select("anything", &Vec::<i32>::new()), None);
    }

    #[test]
    fn route_key_prefers_header_then_query_then_counter() {
        let counter = AtomicU64::new(0);
        let mut headers = HeaderMap::new();
        headers.insert(ROUTE_HEADER, HeaderValue::from_static("from-header"));
        let uri: Uri = "/x?stark-route=from-query".parse().unwrap();
        assert_eq!(route_key(&headers, &uri, &counter), "from-header");

        let headers = HeaderMap::new();
        assert_eq!(route_key(&headers, &uri, &counter), "from-query");

        let plain: Uri = "/x".parse().unwrap();
        assert_eq!(route_key(&headers, &plain, &counter), "0");
        assert_eq!(route_key(&headers, &plain, &counter), "1");
    }
}
