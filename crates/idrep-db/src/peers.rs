//! Outbound replication progress per remote peer.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;

/// Returns the highest local origin id successfully pushed to `peer_name`.
pub fn last_sent_version(conn: &Connection, peer_name: &str) -> Result<Option<i64>, StoreError> {
    let version: Option<Option<i64>> = conn
        .query_row(
            "SELECT last_sent_version FROM peers WHERE name = ?1",
            params![peer_name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.flatten())
}

/// Records that every local association up to `version` reached `peer_name`.
pub fn set_last_sent_version(
    conn: &Connection,
    peer_name: &str,
    version: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO peers (name, last_sent_version, last_poke_succeeded_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(name) DO UPDATE SET
            last_sent_version = excluded.last_sent_version,
            last_poke_succeeded_at = excluded.last_poke_succeeded_at",
        params![peer_name, version],
    )?;
    Ok(())
}
