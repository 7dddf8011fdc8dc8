use axum::{routing::get, Router};
use exhibition_core::config::ExhibitionConfig;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::ws::registry::ClientRegistry;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ExhibitionConfig,
    /// Live dashboard connections; shared with the broadcast cycle.
    pub registry: Arc<ClientRegistry>,
    /// Upgraded sockets are detached from the HTTP server, so their tasks live here.
    connections: Mutex<JoinSet<()>>,
}

impl AppState {
    pub fn new(config: ExhibitionConfig, registry: Arc<ClientRegistry>) -> Self {
        Self {
            config,
            registry,
            connections: Mutex::new(JoinSet::new()),
        }
    }

    /// Run a connection task on the tracked set, reaping finished ones first.
    pub fn track<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        while set.try_join_next().is_some() {}
        set.spawn(task);
    }

    /// Wait up to `limit` for every tracked connection to finish, then abort
    /// the rest. Returns how many were outstanding.
    pub async fn drain_connections(&self, limit: Duration) -> usize {
        let mut set = {
            let mut guard = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        let outstanding = set.len();

        let drained = tokio::time::timeout(limit, async {
            while set.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = set.len(), "connections still open after grace period, aborting");
            set.abort_all();
        }
        outstanding
    }
}

/// Assemble the full Axum router. Dashboard and socket paths honour the
/// configured prefix; `/health` stays at the root for load balancers.
pub fn build_router(state: Arc<AppState>) -> Router {
    let gateway = &state.config.gateway;
    Router::new()
        .route(&gateway.index_path(), get(crate::http::ui::ui_handler))
        .route(&gateway.ws_path(), get(crate::ws::connection::ws_handler))
        .route("/health", get(crate::http::health::health_handler))
        .with_state(Arc::clone(&state))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
