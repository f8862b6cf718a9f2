//! The global association store.
//!
//! Holds associations from every origin server, this one included, tagged
//! with the origin server name and the id that server assigned. The pair
//! `(origin_server, origin_id)` is unique, which makes replaying a record a
//! no-op.
//!
//! Appends run inside an IMMEDIATE transaction: the existence check and the
//! insert happen under SQLite's write lock, so two writers applying the same
//! record cannot both insert it. Appends for different origin servers still
//! take the same lock; SQLite has no finer granularity.

use idrep_types::{SignedAssociation, ThreepidAssociation};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::StoreError;

/// Result of appending a single record to the global store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The record was new and has been stored.
    Inserted,
    /// A record with the same origin server and origin id already exists.
    AlreadyPresent,
}

/// A record received from an origin server, ready to be stored.
#[derive(Debug, Clone)]
pub struct ReplicatedAssociation {
    /// Id assigned by the origin server.
    pub origin_id: i64,
    /// The parsed association.
    pub association: ThreepidAssociation,
    /// The signed payload exactly as received, serialized.
    pub signed_json: String,
}

/// Returns the highest origin id stored for `server_name`, or `None` if no
/// record from that server has been applied yet.
pub fn last_id_from_server(conn: &Connection, server_name: &str) -> Result<Option<i64>, StoreError> {
    let last_id = conn.query_row(
        "SELECT MAX(origin_id) FROM global_threepid_associations WHERE origin_server = ?1",
        params![server_name],
        |row| row.get(0),
    )?;
    Ok(last_id)
}

/// Appends one association to the global store.
///
/// # Errors
///
/// Returns `StoreError::Database` if the transaction or insert fails.
pub fn add_association(
    conn: &mut Connection,
    association: &ThreepidAssociation,
    signed_json: &str,
    origin_server: &str,
    origin_id: i64,
) -> Result<AddOutcome, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = insert_if_absent(&tx, association, signed_json, origin_server, origin_id)?;
    tx.commit()?;
    Ok(outcome)
}

/// Appends a batch of associations from one origin server in a single
/// transaction and returns how many were new.
///
/// Either the whole batch is committed or none of it is.
pub fn add_associations(
    conn: &mut Connection,
    origin_server: &str,
    batch: &[ReplicatedAssociation],
) -> Result<usize, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut inserted = 0;
    for record in batch {
        let outcome = insert_if_absent(
            &tx,
            &record.association,
            &record.signed_json,
            origin_server,
            record.origin_id,
        )?;
        if outcome == AddOutcome::Inserted {
            inserted += 1;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

fn insert_if_absent(
    conn: &Connection,
    association: &ThreepidAssociation,
    signed_json: &str,
    origin_server: &str,
    origin_id: i64,
) -> Result<AddOutcome, StoreError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM global_threepid_associations
            WHERE origin_server = ?1 AND origin_id = ?2
         )",
        params![origin_server, origin_id],
        |row| row.get(0),
    )?;

    if exists {
        tracing::debug!(origin_server, origin_id, "association already in global store");
        return Ok(AddOutcome::AlreadyPresent);
    }

    conn.execute(
        "INSERT INTO global_threepid_associations (
            medium, address, mxid, ts, not_before, not_after,
            origin_server, origin_id, sg_assoc
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            association.medium,
            association.address,
            association.mxid,
            association.ts,
            association.not_before,
            association.not_after,
            origin_server,
            origin_id,
            signed_json,
        ],
    )?;

    Ok(AddOutcome::Inserted)
}

/// Returns the newest signed association for a third-party identifier that is
/// valid at `now_ms`.
pub fn signed_association_for_threepid(
    conn: &Connection,
    medium: &str,
    address: &str,
    now_ms: i64,
) -> Result<Option<SignedAssociation>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT sg_assoc FROM global_threepid_associations
             WHERE medium = ?1 AND address = ?2 AND not_before <= ?3 AND not_after > ?3
             ORDER BY ts DESC
             LIMIT 1",
            params![medium, address, now_ms],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}
