//! Associations created by this server.
//!
//! The autoincrement row id of each local association is the origin id it
//! carries when replicated, so ids are strictly increasing per server.

use idrep_types::ThreepidAssociation;
use rusqlite::{params, Connection};

use crate::error::StoreError;

/// Records a newly created local association and returns its origin id.
pub fn add_local_association(
    conn: &Connection,
    association: &ThreepidAssociation,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO local_threepid_associations (
            medium, address, mxid, ts, not_before, not_after
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            association.medium,
            association.address,
            association.mxid,
            association.ts,
            association.not_before,
            association.not_after,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Returns local associations with an id greater than `after_id`, in
/// ascending id order, at most `limit` of them.
///
/// `after_id = None` starts from the beginning; `limit = None` means no limit.
pub fn local_associations_after(
    conn: &Connection,
    after_id: Option<i64>,
    limit: Option<usize>,
) -> Result<Vec<(i64, ThreepidAssociation)>, StoreError> {
    // SQLite treats a negative LIMIT as "no limit".
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

    let mut stmt = conn.prepare(
        "SELECT id, medium, address, mxid, ts, not_before, not_after
         FROM local_threepid_associations
         WHERE id > ?1
         ORDER BY id ASC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![after_id.unwrap_or(-1), limit], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            ThreepidAssociation {
                medium: row.get(1)?,
                address: row.get(2)?,
                mxid: row.get(3)?,
                ts: row.get(4)?,
                not_before: row.get(5)?,
                not_after: row.get(6)?,
            },
        ))
    })?;

    let mut associations = Vec::new();
    for row in rows {
        associations.push(row?);
    }
    Ok(associations)
}
