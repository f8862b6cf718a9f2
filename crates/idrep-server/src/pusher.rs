//! Outbound replication of this server's own associations.
//!
//! Each round first copies new local associations into our own global view
//! through a freshly loaded [`LocalPeer`], then offers each remote peer the
//! next batch after what it last acknowledged. A peer's progress only moves
//! when its push succeeds; a failed peer is simply offered the same batch on
//! the next round.

use ed25519_dalek::SigningKey;
use idrep_db::{
    last_sent_version, local_associations_after, set_last_sent_version, DbPool, StoreError,
};
use idrep_replication::{sign_json, LocalPeer, Peer, PushError, PushReceipt, RemotePeer};
use idrep_types::{ThreepidAssociation, Update};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Pushes local associations to this server and to its remote peers.
pub struct Pusher {
    pool: DbPool,
    server_name: String,
    signing_key: Arc<SigningKey>,
    remote_peers: Vec<RemotePeer>,
    batch_limit: usize,
}

impl Pusher {
    pub fn new(
        pool: DbPool,
        server_name: impl Into<String>,
        signing_key: SigningKey,
        remote_peers: Vec<RemotePeer>,
        batch_limit: usize,
    ) -> Self {
        Self {
            pool,
            server_name: server_name.into(),
            signing_key: Arc::new(signing_key),
            remote_peers,
            batch_limit: batch_limit.max(1),
        }
    }

    pub fn remote_peers(&self) -> &[RemotePeer] {
        &self.remote_peers
    }

    /// Copies local associations above the local watermark into the global
    /// store.
    pub async fn push_local(&self) -> Result<PushReceipt, PushError> {
        let pool = self.pool.clone();
        let server_name = self.server_name.clone();
        let signing_key = self.signing_key.clone();

        let (local_peer, updates) = tokio::task::spawn_blocking(move || {
            let local_peer = LocalPeer::load(pool.clone(), server_name.clone())?;
            let conn = pool.get().map_err(StoreError::from)?;
            let pending = local_associations_after(&conn, local_peer.last_id(), None)?;
            let updates = sign_all(pending, &server_name, &signing_key)?;
            Ok::<_, PushError>((local_peer, updates))
        })
        .await??;

        if updates.is_empty() {
            return Ok(PushReceipt::Applied {
                applied: 0,
                skipped: 0,
            });
        }
        local_peer.push_updates(&updates).await
    }

    /// Pushes the next batch to `peer` and records its progress.
    ///
    /// Returns the new last-sent version, or `None` if the peer was already up
    /// to date.
    pub async fn push_to_peer(&self, peer: &RemotePeer) -> Result<Option<i64>, PushError> {
        let pool = self.pool.clone();
        let server_name = self.server_name.clone();
        let peer_name = peer.server_name().to_string();
        let signing_key = self.signing_key.clone();
        let batch_limit = self.batch_limit;

        let updates = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(StoreError::from)?;
            let after = last_sent_version(&conn, &peer_name)?;
            let pending = local_associations_after(&conn, after, Some(batch_limit))?;
            sign_all(pending, &server_name, &signing_key)
        })
        .await??;

        let Some(version) = updates.iter().map(|update| update.origin_id).max() else {
            return Ok(None);
        };

        peer.push_updates(&updates).await?;

        let pool = self.pool.clone();
        let peer_name = peer.server_name().to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(StoreError::from)?;
            set_last_sent_version(&conn, &peer_name, version)
        })
        .await??;

        Ok(Some(version))
    }

    /// Runs one replication round. Failures are logged, never propagated.
    pub async fn run_once(&self) {
        match self.push_local().await {
            Ok(PushReceipt::Applied { applied, skipped }) if applied > 0 || skipped > 0 => {
                tracing::info!(applied, skipped, "replicated local associations to self");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "failed to replicate local associations to self"),
        }

        for peer in &self.remote_peers {
            match self.push_to_peer(peer).await {
                Ok(Some(version)) => {
                    tracing::info!(peer = peer.server_name(), version, "pushed associations");
                }
                Ok(None) => {
                    tracing::debug!(peer = peer.server_name(), "peer is up to date");
                }
                Err(e) => {
                    tracing::warn!(peer = peer.server_name(), error = %e, "push to peer failed");
                }
            }
        }
    }
}

fn sign_all(
    pending: Vec<(i64, ThreepidAssociation)>,
    server_name: &str,
    signing_key: &SigningKey,
) -> Result<Vec<Update>, PushError> {
    pending
        .into_iter()
        .map(|(origin_id, association)| {
            let mut signed = association.to_json_object();
            sign_json(&mut signed, server_name, signing_key).map_err(PushError::Encode)?;
            Ok(Update::new(origin_id, signed))
        })
        .collect()
}

/// Starts the periodic push task.
///
/// Runs indefinitely, one round every `interval_secs` seconds.
pub async fn start_push_task(pusher: Arc<Pusher>, interval_secs: u64) {
    if interval_secs == 0 {
        tracing::warn!("replication push task disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_secs);
    tracing::info!(
        interval_secs,
        peers = pusher.remote_peers().len(),
        "starting replication push task"
    );

    loop {
        pusher.run_once().await;
        sleep(interval).await;
    }
}
