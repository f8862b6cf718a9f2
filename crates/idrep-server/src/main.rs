//! Identity replication server binary.
//!
//! Starts the inbound push endpoint and the outbound push task, with
//! structured logging, database initialization, and graceful shutdown on
//! SIGTERM/SIGINT.

use ed25519_dalek::SigningKey;
use idrep_replication::ReplicationHttpClient;
use idrep_server::{app, build_peers, config, pusher, AppState};
use rand::rngs::OsRng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("IDREP_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = idrep_db::create_pool(
        &config.database.path,
        idrep_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool; check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = idrep_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let signing_key = match config
        .signing
        .signing_key()
        .expect("invalid signing.key_hex in config")
    {
        Some(key) => key,
        None => {
            let key = SigningKey::generate(&mut OsRng);
            tracing::warn!(
                verify_key = %hex::encode(key.verifying_key().as_bytes()),
                "no signing key configured; generated an ephemeral key, peers must be given this verify key"
            );
            key
        }
    };
    tracing::info!(
        server_name = %config.server.server_name,
        verify_key = %hex::encode(signing_key.verifying_key().as_bytes()),
        "signing as"
    );

    let transport = Arc::new(
        ReplicationHttpClient::new(
            config.replication.scheme,
            Duration::from_secs(config.replication.request_timeout_secs),
        )
        .expect("failed to build replication HTTP client"),
    );
    let (trusted_peers, remote_peers) = build_peers(&config.peers, transport);
    tracing::info!(count = trusted_peers.len(), "configured replication peers");

    let push_task = pusher::Pusher::new(
        pool.clone(),
        config.server.server_name.clone(),
        signing_key,
        remote_peers,
        config.replication.batch_limit,
    );
    tokio::spawn(pusher::start_push_task(
        Arc::new(push_task),
        config.replication.push_interval_secs,
    ));

    let app = app(AppState {
        pool,
        server_name: config.server.server_name.clone(),
        peers: Arc::new(trusted_peers),
    });
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting idrep server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("idrep server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
