//! Identity server replication node.
//!
//! Exposes the inbound push endpoint peers replicate into and drives outbound
//! pushes of this server's own associations.

pub mod api_replication;
pub mod config;
pub mod pusher;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::PeerConfig;
use idrep_db::DbPool;
use idrep_replication::{JsonTransport, PeerIdentity, RemotePeer};
use idrep_types::REPLICATION_PUSH_PATH;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// The name this server signs as.
    pub server_name: String,
    /// Peers allowed to push to us, keyed by server name.
    pub peers: Arc<BTreeMap<String, PeerIdentity>>,
}

const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            REPLICATION_PUSH_PATH,
            post(api_replication::push_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

/// Builds the trusted-peer table and the outbound peers from configuration.
///
/// A peer without public keys can neither be verified nor pushed to; it is
/// logged and left out of both.
pub fn build_peers(
    configs: &[PeerConfig],
    transport: Arc<dyn JsonTransport>,
) -> (BTreeMap<String, PeerIdentity>, Vec<RemotePeer>) {
    let mut identities = BTreeMap::new();
    let mut remote_peers = Vec::with_capacity(configs.len());

    for peer_config in configs {
        let identity = peer_config.identity();
        match RemotePeer::new(identity.clone(), transport.clone()) {
            Ok(peer) => {
                remote_peers.push(peer.with_port(peer_config.port));
                identities.insert(identity.server_name.clone(), identity);
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unusable peer configuration");
            }
        }
    }

    (identities, remote_peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use idrep_db::{create_pool, run_migrations, DbRuntimeSettings};
    use idrep_replication::{Peer, ReplicationHttpClient, Scheme};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AppState {
        let pool = create_pool(":memory:", DbRuntimeSettings::in_memory()).unwrap();
        run_migrations(&pool.get().unwrap()).unwrap();
        AppState {
            pool,
            server_name: "id.example.com".to_string(),
            peers: Arc::new(BTreeMap::new()),
        }
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let response = app(state())
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], "0.0.1");
    }

    #[test]
    fn peers_without_keys_are_left_out() {
        let configs: Vec<PeerConfig> = toml::from_str::<config::Config>(
            r#"
                [[peers]]
                server_name = "keyed.example"
                port = 4434
                public_keys = { ed25519 = "aa" }

                [[peers]]
                server_name = "keyless.example"
            "#,
        )
        .unwrap()
        .peers;
        let transport =
            Arc::new(ReplicationHttpClient::new(Scheme::Http, Duration::from_secs(1)).unwrap());

        let (identities, remote_peers) = build_peers(&configs, transport);

        assert_eq!(identities.len(), 1);
        assert!(identities.contains_key("keyed.example"));
        assert_eq!(remote_peers.len(), 1);
        assert_eq!(remote_peers[0].server_name(), "keyed.example");
        assert_eq!(remote_peers[0].port(), 4434);
    }
}
