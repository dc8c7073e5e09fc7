//! Root composition: one store, one event bus, one controller loop, one
//! routing fabric. Everything else borrows these through `AppState`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use stark_common::args::TimingArgs;
use stark_common::events::EventBus;
use stark_store::Store;
use tokio_util::sync::CancellationToken;

use crate::agent::{Connections, Dispatcher};
use crate::args::ServerArgs;
use crate::auth::Authenticator;
use crate::reconciler::Reconciler;
use crate::registry::NodeRegistry;
use crate::routing::RoutingFabric;
use crate::routing::ingress::IngressManager;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub bus: EventBus,
    pub auth: Arc<Authenticator>,
    pub connections: Arc<Connections>,
    pub registry: Arc<NodeRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub reconciler: Arc<Reconciler>,
    pub routing: Arc<RoutingFabric>,
    pub ingress: Arc<IngressManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub timing: TimingArgs,
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    pub async fn build(args: &ServerArgs, cancel: CancellationToken) -> Result<Self> {
        let bus = EventBus::new(args.event_bus_capacity);
        let store = Store::connect(&args.postgres, bus.clone()).await?;
        let auth = Arc::new(Authenticator::new(
            args.auth.auth_endpoint.clone(),
            Duration::from_secs(args.auth.auth_cache_secs),
        ));
        let connections = Arc::new(Connections::new());
        let registry = Arc::new(NodeRegistry::new(
            store.clone(),
            connections.clone(),
            args.timing.clone(),
        ));
        let endpoints = Arc::new(crate::routing::ServiceRegistry::new());
        let routing = Arc::new(RoutingFabric::new(
            store.clone(),
            connections.clone(),
            endpoints.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            registry.clone(),
            connections.clone(),
            args.preempt_threshold,
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            connections.clone(),
            args.timing.clone(),
        ));
        let ingress = Arc::new(IngressManager::new(
            store.clone(),
            connections.clone(),
            endpoints,
            args.bind_addr.clone(),
            Duration::from_secs(args.timing.ingress_timeout_secs),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            registry.clone(),
            routing.clone(),
            args.timing.heartbeat_interval_secs,
        ));
        Ok(Self {
            store,
            bus,
            auth,
            connections,
            registry,
            scheduler,
            reconciler,
            routing,
            ingress,
            dispatcher,
            timing: args.timing.clone(),
            cancel,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
