//! The local peer: this server replicating into its own global view.

use async_trait::async_trait;
use idrep_db::{add_association, last_id_from_server, AddOutcome, DbPool, StoreError};
use idrep_types::{parse_association, Update};

use crate::error::PushError;
use crate::peer::{Peer, PeerIdentity, PushReceipt};

/// Copies this server's own associations into the global association store.
///
/// The watermark is read once, when the peer is loaded. Updates at or below it
/// are skipped without touching the store. Everything above it is offered to
/// the store, which deduplicates on `(origin_server, origin_id)`, so a stale
/// watermark (another writer applied records since the load) costs a lookup
/// but never produces a duplicate.
///
/// No signature check happens here: these records were signed by this server.
pub struct LocalPeer {
    identity: PeerIdentity,
    pool: DbPool,
    last_id: Option<i64>,
}

impl LocalPeer {
    /// Loads the local peer for `server_name`, snapshotting the store's
    /// watermark for this server as origin.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the watermark cannot be read.
    pub fn load(pool: DbPool, server_name: impl Into<String>) -> Result<Self, StoreError> {
        let server_name = server_name.into();
        let last_id = {
            let conn = pool.get()?;
            last_id_from_server(&conn, &server_name)?
        };

        tracing::debug!(server_name = %server_name, ?last_id, "loaded local peer");

        Ok(Self {
            identity: PeerIdentity::local(server_name),
            pool,
            last_id,
        })
    }

    /// The watermark snapshot taken at load time; `None` when nothing from
    /// this server had been applied.
    pub fn last_id(&self) -> Option<i64> {
        self.last_id
    }

    fn is_above_watermark(&self, origin_id: i64) -> bool {
        self.last_id.map_or(true, |last_id| origin_id > last_id)
    }
}

#[async_trait]
impl Peer for LocalPeer {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Applies updates in the given order.
    ///
    /// A record that cannot be parsed stops the batch with
    /// [`PushError::MalformedRecord`]; records before it stay applied.
    async fn push_updates(&self, updates: &[Update]) -> Result<PushReceipt, PushError> {
        let mut pending = Vec::with_capacity(updates.len());
        for update in updates {
            if self.is_above_watermark(update.origin_id) {
                pending.push(update.clone());
            } else {
                tracing::debug!(
                    origin_id = update.origin_id,
                    last_id = ?self.last_id,
                    "skipping update at or below watermark"
                );
            }
        }

        let pool = self.pool.clone();
        let origin_server = self.identity.server_name.clone();
        let applied =
            tokio::task::spawn_blocking(move || apply_updates(&pool, &origin_server, &pending))
                .await??;

        Ok(PushReceipt::Applied {
            applied,
            skipped: updates.len() - applied,
        })
    }
}

fn apply_updates(pool: &DbPool, origin_server: &str, updates: &[Update]) -> Result<usize, PushError> {
    let mut conn = pool.get().map_err(StoreError::from)?;
    let mut applied = 0;

    for update in updates {
        let association =
            parse_association(&update.association).map_err(|source| PushError::MalformedRecord {
                origin_id: update.origin_id,
                source,
            })?;
        let signed_json = serde_json::to_string(&update.association).map_err(PushError::Encode)?;

        match add_association(
            &mut conn,
            &association,
            &signed_json,
            origin_server,
            update.origin_id,
        )? {
            AddOutcome::Inserted => applied += 1,
            AddOutcome::AlreadyPresent => {}
        }
    }

    Ok(applied)
}
