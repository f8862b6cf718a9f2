//! Inbound replication push endpoint.
//!
//! A peer POSTs `{"sgAssocs": [[originId, signedAssociation], ...]}`. The
//! batch is accepted whole or not at all: the sender is identified from the
//! first record's signatures, every record must verify against that peer and
//! parse, and then all of them are stored in one transaction.

use crate::AppState;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use idrep_db::{add_associations, ReplicatedAssociation, StoreError};
use idrep_replication::{verify_message, PeerIdentity, VerifyError};
use idrep_types::{
    parse_association, AssociationParseError, ReplicationPushBody, Update, SIGNATURES_FIELD,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum ReplicationApiError {
    #[error("request body is not a valid push: {0}")]
    BadJson(String),

    #[error("batch is not signed by any known peer (found signatures: {0:?})")]
    UnknownPeer(Vec<String>),

    #[error("association {origin_id} failed verification: {source}")]
    Verification {
        origin_id: i64,
        #[source]
        source: VerifyError,
    },

    #[error("association {origin_id} is malformed: {source}")]
    MalformedAssociation {
        origin_id: i64,
        #[source]
        source: AssociationParseError,
    },

    #[error("failed to re-encode association {origin_id}: {source}")]
    Encode {
        origin_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("database error: {0}")]
    Store(#[from] StoreError),

    #[error("storage task failed: {0}")]
    Join(#[from] JoinError),
}

impl ReplicationApiError {
    fn status_and_errcode(&self) -> (StatusCode, &'static str) {
        match self {
            ReplicationApiError::BadJson(_) | ReplicationApiError::MalformedAssociation { .. } => {
                (StatusCode::BAD_REQUEST, "M_BAD_JSON")
            }
            ReplicationApiError::UnknownPeer(_) => (StatusCode::FORBIDDEN, "M_UNKNOWN_PEER"),
            ReplicationApiError::Verification { .. } => {
                (StatusCode::BAD_REQUEST, "M_VERIFICATION_FAILED")
            }
            ReplicationApiError::Encode { .. }
            | ReplicationApiError::Store(_)
            | ReplicationApiError::Join(_) => (StatusCode::INTERNAL_SERVER_ERROR, "M_UNKNOWN"),
        }
    }
}

impl IntoResponse for ReplicationApiError {
    fn into_response(self) -> Response {
        let (status, errcode) = self.status_and_errcode();
        if status.is_server_error() {
            tracing::error!(error = %self, "replication push failed");
        } else {
            tracing::warn!(error = %self, "rejected replication push");
        }
        (
            status,
            Json(json!({ "errcode": errcode, "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Handler for `POST /matrix/identity/replicate/v1/push`.
pub async fn push_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<ReplicationPushBody>, JsonRejection>,
) -> Result<Json<Value>, ReplicationApiError> {
    let Json(body) = payload.map_err(|e| ReplicationApiError::BadJson(e.body_text()))?;
    let Some(first) = body.sg_assocs.first() else {
        return Ok(Json(json!({ "success": true })));
    };

    let peer = resolve_sender(&state.peers, first)?;

    let mut batch = Vec::with_capacity(body.sg_assocs.len());
    for update in &body.sg_assocs {
        batch.push(check_update(update, peer)?);
    }

    let pool = state.pool.clone();
    let origin_server = peer.server_name.clone();
    let received = batch.len();
    let inserted = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        add_associations(&mut conn, &origin_server, &batch)
    })
    .await??;

    tracing::info!(
        origin_server = %peer.server_name,
        received,
        inserted,
        "accepted replication push"
    );

    Ok(Json(json!({ "success": true })))
}

/// Picks the trusted peer named in the first record's signature descriptors.
fn resolve_sender<'a>(
    peers: &'a BTreeMap<String, PeerIdentity>,
    first: &Update,
) -> Result<&'a PeerIdentity, ReplicationApiError> {
    let signatures = match first.association.get(SIGNATURES_FIELD) {
        Some(Value::Object(signatures)) => signatures,
        Some(_) => {
            return Err(ReplicationApiError::Verification {
                origin_id: first.origin_id,
                source: VerifyError::MalformedSignatures,
            })
        }
        None => {
            return Err(ReplicationApiError::Verification {
                origin_id: first.origin_id,
                source: VerifyError::NoSignatures,
            })
        }
    };

    signatures
        .keys()
        .filter_map(|descriptor| descriptor.rsplit_once(':'))
        .find_map(|(server_name, _)| peers.get(server_name))
        .ok_or_else(|| ReplicationApiError::UnknownPeer(signatures.keys().cloned().collect()))
}

fn check_update(
    update: &Update,
    peer: &PeerIdentity,
) -> Result<ReplicatedAssociation, ReplicationApiError> {
    let origin_id = update.origin_id;

    verify_message(&update.association, peer)
        .map_err(|source| ReplicationApiError::Verification { origin_id, source })?;

    let association = parse_association(&update.association)
        .map_err(|source| ReplicationApiError::MalformedAssociation { origin_id, source })?;

    let signed_json = serde_json::to_string(&update.association)
        .map_err(|source| ReplicationApiError::Encode { origin_id, source })?;

    Ok(ReplicatedAssociation {
        origin_id,
        association,
        signed_json,
    })
}
