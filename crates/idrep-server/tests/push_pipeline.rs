use ed25519_dalek::SigningKey;
use idrep_db::{
    add_local_association, create_pool, last_id_from_server, last_sent_version, run_migrations,
    DbPool, DbRuntimeSettings,
};
use idrep_replication::{
    PeerIdentity, PushError, PushReceipt, RemotePeer, ReplicationHttpClient, Scheme,
};
use idrep_server::pusher::Pusher;
use idrep_server::{app, AppState};
use idrep_types::ThreepidAssociation;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const SERVER_A: &str = "id.a.test";
const SERVER_B: &str = "127.0.0.1";

fn key_a() -> SigningKey {
    SigningKey::from_bytes(&[1u8; 32])
}

fn key_b() -> SigningKey {
    SigningKey::from_bytes(&[2u8; 32])
}

fn identity(server_name: &str, key: &SigningKey) -> PeerIdentity {
    let mut keys = BTreeMap::new();
    keys.insert(
        "ed25519".to_string(),
        hex::encode(key.verifying_key().as_bytes()),
    );
    PeerIdentity::new(server_name, keys)
}

fn memory_pool() -> DbPool {
    let pool = create_pool(":memory:", DbRuntimeSettings::in_memory()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();
    pool
}

fn add_local(pool: &DbPool, address: &str) -> i64 {
    add_local_association(
        &pool.get().unwrap(),
        &ThreepidAssociation {
            medium: "email".to_string(),
            address: address.to_string(),
            mxid: format!("@{}:a.test", address.replace('@', "_")),
            ts: 1_000,
            not_before: 1_000,
            not_after: 9_000_000_000_000,
        },
    )
    .unwrap()
}

/// Starts server B, which trusts server A, and returns its pool and port.
async fn spawn_server_b() -> (DbPool, u16) {
    let pool = memory_pool();
    let mut peers = BTreeMap::new();
    peers.insert(SERVER_A.to_string(), identity(SERVER_A, &key_a()));
    let router = app(AppState {
        pool: pool.clone(),
        server_name: SERVER_B.to_string(),
        peers: Arc::new(peers),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (pool, port)
}

fn remote_b(port: u16) -> RemotePeer {
    let transport =
        Arc::new(ReplicationHttpClient::new(Scheme::Http, Duration::from_secs(5)).unwrap());
    RemotePeer::new(identity(SERVER_B, &key_b()), transport)
        .unwrap()
        .with_port(port)
}

fn origin_ids(pool: &DbPool, origin_server: &str) -> Vec<i64> {
    let conn = pool.get().unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT origin_id FROM global_threepid_associations
             WHERE origin_server = ?1 ORDER BY origin_id",
        )
        .unwrap();
    let ids = stmt
        .query_map([origin_server], |row| row.get(0))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    ids
}

#[tokio::test]
async fn local_associations_reach_self_and_remote_peer() {
    let (pool_b, port) = spawn_server_b().await;
    let pool_a = memory_pool();
    let first = add_local(&pool_a, "a@example.com");
    let second = add_local(&pool_a, "b@example.com");

    let pusher = Pusher::new(pool_a.clone(), SERVER_A, key_a(), vec![remote_b(port)], 100);
    pusher.run_once().await;

    assert_eq!(origin_ids(&pool_a, SERVER_A), vec![first, second]);
    assert_eq!(origin_ids(&pool_b, SERVER_A), vec![first, second]);
    assert_eq!(
        last_sent_version(&pool_a.get().unwrap(), SERVER_B).unwrap(),
        Some(second)
    );

    // Nothing new: neither side changes.
    assert_eq!(pusher.push_to_peer(&pusher.remote_peers()[0]).await.unwrap(), None);
    let receipt = pusher.push_local().await.unwrap();
    assert!(matches!(receipt, PushReceipt::Applied { applied: 0, skipped: 0 }));

    let third = add_local(&pool_a, "c@example.com");
    pusher.run_once().await;
    assert_eq!(origin_ids(&pool_b, SERVER_A), vec![first, second, third]);
    assert_eq!(
        last_id_from_server(&pool_a.get().unwrap(), SERVER_A).unwrap(),
        Some(third)
    );
}

#[tokio::test]
async fn remote_batches_respect_the_limit() {
    let (pool_b, port) = spawn_server_b().await;
    let pool_a = memory_pool();
    let ids: Vec<i64> = (0..5)
        .map(|n| add_local(&pool_a, &format!("user{n}@example.com")))
        .collect();

    let pusher = Pusher::new(pool_a.clone(), SERVER_A, key_a(), vec![remote_b(port)], 2);
    let peer = &pusher.remote_peers()[0];

    assert_eq!(pusher.push_to_peer(peer).await.unwrap(), Some(ids[1]));
    assert_eq!(origin_ids(&pool_b, SERVER_A), ids[..2].to_vec());

    assert_eq!(pusher.push_to_peer(peer).await.unwrap(), Some(ids[3]));
    assert_eq!(pusher.push_to_peer(peer).await.unwrap(), Some(ids[4]));
    assert_eq!(pusher.push_to_peer(peer).await.unwrap(), None);
    assert_eq!(origin_ids(&pool_b, SERVER_A), ids);
}

#[tokio::test]
async fn rejected_push_leaves_progress_untouched() {
    // B does not know A's real key, so it rejects everything A signs.
    let pool_b = memory_pool();
    let mut peers = BTreeMap::new();
    peers.insert(SERVER_A.to_string(), identity(SERVER_A, &key_b()));
    let router = app(AppState {
        pool: pool_b.clone(),
        server_name: SERVER_B.to_string(),
        peers: Arc::new(peers),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let pool_a = memory_pool();
    add_local(&pool_a, "a@example.com");
    let pusher = Pusher::new(pool_a.clone(), SERVER_A, key_a(), vec![remote_b(port)], 10);

    let err = pusher
        .push_to_peer(&pusher.remote_peers()[0])
        .await
        .unwrap_err();
    match err {
        PushError::Remote { status, body, .. } => {
            assert_eq!(status, 400);
            assert_eq!(body["errcode"], "M_VERIFICATION_FAILED");
        }
        other => panic!("expected a remote rejection, got {other:?}"),
    }

    assert_eq!(last_sent_version(&pool_a.get().unwrap(), SERVER_B).unwrap(), None);
    assert!(origin_ids(&pool_b, SERVER_A).is_empty());
}

#[tokio::test]
async fn unreachable_peer_does_not_block_local_replication() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let pool_a = memory_pool();
    let id = add_local(&pool_a, "a@example.com");

    let pusher = Pusher::new(pool_a.clone(), SERVER_A, key_a(), vec![remote_b(port)], 10);
    pusher.run_once().await;

    assert_eq!(origin_ids(&pool_a, SERVER_A), vec![id]);
    assert_eq!(last_sent_version(&pool_a.get().unwrap(), SERVER_B).unwrap(), None);
}
