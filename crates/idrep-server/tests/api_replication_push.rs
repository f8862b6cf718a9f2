use axum::body::Body;
use axum::http::{Request, StatusCode};
use ed25519_dalek::SigningKey;
use idrep_db::{create_pool, last_id_from_server, run_migrations, DbPool, DbRuntimeSettings};
use idrep_replication::{sign_json, PeerIdentity};
use idrep_server::{app, AppState};
use idrep_types::{SignedAssociation, ThreepidAssociation, REPLICATION_PUSH_PATH};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

const PEER: &str = "id.peer.org";

fn peer_key() -> SigningKey {
    SigningKey::from_bytes(&[3u8; 32])
}

fn setup() -> (DbPool, AppState) {
    let pool = create_pool(":memory:", DbRuntimeSettings::in_memory()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();

    let mut keys = BTreeMap::new();
    keys.insert(
        "ed25519".to_string(),
        hex::encode(peer_key().verifying_key().as_bytes()),
    );
    let mut peers = BTreeMap::new();
    peers.insert(PEER.to_string(), PeerIdentity::new(PEER, keys));

    let state = AppState {
        pool: pool.clone(),
        server_name: "id.example.com".to_string(),
        peers: Arc::new(peers),
    };
    (pool, state)
}

fn signed_by(server_name: &str, key: &SigningKey, address: &str) -> SignedAssociation {
    let mut assoc = ThreepidAssociation {
        medium: "email".to_string(),
        address: address.to_string(),
        mxid: format!("@{}:example.com", address.replace('@', "_")),
        ts: 1_000,
        not_before: 1_000,
        not_after: 9_000_000_000_000,
    }
    .to_json_object();
    sign_json(&mut assoc, server_name, key).unwrap();
    assoc
}

async fn push(state: AppState, body: String) -> (StatusCode, Value) {
    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(REPLICATION_PUSH_PATH)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn stored_count(pool: &DbPool) -> i64 {
    pool.get()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM global_threepid_associations", [], |row| {
            row.get(0)
        })
        .unwrap()
}

#[tokio::test]
async fn signed_batch_is_stored_under_the_sending_peer() {
    let (pool, state) = setup();
    let body = json!({"sgAssocs": [
        [4, signed_by(PEER, &peer_key(), "a@example.com")],
        [7, signed_by(PEER, &peer_key(), "b@example.com")],
    ]});

    let (status, reply) = push(state.clone(), body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, json!({"success": true}));

    assert_eq!(stored_count(&pool), 2);
    assert_eq!(last_id_from_server(&pool.get().unwrap(), PEER).unwrap(), Some(7));

    // A replay is accepted and changes nothing.
    let (status, _) = push(state, body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored_count(&pool), 2);
}

#[tokio::test]
async fn stored_record_is_served_for_lookup() {
    let (pool, state) = setup();
    let assoc = signed_by(PEER, &peer_key(), "a@example.com");
    let body = json!({"sgAssocs": [[1, assoc.clone()]]});

    let (status, _) = push(state, body.to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let found = idrep_db::signed_association_for_threepid(
        &pool.get().unwrap(),
        "email",
        "a@example.com",
        2_000,
    )
    .unwrap();
    assert_eq!(found, Some(assoc));
}

#[tokio::test]
async fn tampered_record_rejects_the_whole_batch() {
    let (pool, state) = setup();
    let mut tampered = signed_by(PEER, &peer_key(), "b@example.com");
    tampered.insert("mxid".to_string(), json!("@mallory:evil.org"));
    let body = json!({"sgAssocs": [
        [1, signed_by(PEER, &peer_key(), "a@example.com")],
        [2, tampered],
    ]});

    let (status, reply) = push(state, body.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["errcode"], "M_VERIFICATION_FAILED");
    assert_eq!(stored_count(&pool), 0);
}

#[tokio::test]
async fn batch_from_unknown_server_is_forbidden() {
    let (pool, state) = setup();
    let stranger = SigningKey::from_bytes(&[8u8; 32]);
    let body = json!({"sgAssocs": [[1, signed_by("id.stranger.net", &stranger, "a@example.com")]]});

    let (status, reply) = push(state, body.to_string()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(reply["errcode"], "M_UNKNOWN_PEER");
    assert_eq!(stored_count(&pool), 0);
}

#[tokio::test]
async fn known_name_with_wrong_key_fails_verification() {
    let (pool, state) = setup();
    let impostor = SigningKey::from_bytes(&[9u8; 32]);
    let body = json!({"sgAssocs": [[1, signed_by(PEER, &impostor, "a@example.com")]]});

    let (status, reply) = push(state, body.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["errcode"], "M_VERIFICATION_FAILED");
    assert_eq!(stored_count(&pool), 0);
}

#[tokio::test]
async fn unsigned_record_fails_verification() {
    let (_pool, state) = setup();
    let body = json!({"sgAssocs": [[1, {"medium": "email", "address": "a@example.com"}]]});

    let (status, reply) = push(state, body.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["errcode"], "M_VERIFICATION_FAILED");
}

#[tokio::test]
async fn signed_but_incomplete_association_is_bad_json() {
    let (pool, state) = setup();
    let mut partial: SignedAssociation = json!({"medium": "email", "address": "a@example.com"})
        .as_object()
        .cloned()
        .unwrap();
    sign_json(&mut partial, PEER, &peer_key()).unwrap();
    let body = json!({"sgAssocs": [[1, partial]]});

    let (status, reply) = push(state, body.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["errcode"], "M_BAD_JSON");
    assert_eq!(stored_count(&pool), 0);
}

#[tokio::test]
async fn body_that_is_not_a_push_is_bad_json() {
    let (_pool, state) = setup();

    let (status, reply) = push(state.clone(), "not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["errcode"], "M_BAD_JSON");

    let (status, reply) = push(state, json!({"sgAssocs": {"1": {}}}).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["errcode"], "M_BAD_JSON");
}

#[tokio::test]
async fn empty_batch_succeeds() {
    let (pool, state) = setup();
    let (status, reply) = push(state, json!({"sgAssocs": []}).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, json!({"success": true}));
    assert_eq!(stored_count(&pool), 0);
}
