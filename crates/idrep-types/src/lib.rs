//! Shared types and constants for identity-association replication.
//!
//! This crate holds the data model exchanged between cooperating identity
//! servers: the structured third-party-identifier association, the opaque
//! signed form that travels between servers, the `(originId, association)`
//! update tuple, and the JSON body of a replication push.
//!
//! Every other crate in the workspace depends on `idrep-types` for these
//! definitions, so the wire format lives in exactly one place.

mod association;

pub use association::{parse_association, AssociationParseError, ThreepidAssociation};

use serde::{Deserialize, Serialize};

/// A signed association in transport form.
///
/// The object is opaque to replication: it carries the association fields
/// plus a `signatures` map keyed by `"<servername>:<keytype>"`. It is
/// immutable once signed.
pub type SignedAssociation = serde_json::Map<String, serde_json::Value>;

/// Path of the replication push endpoint on every identity server.
pub const REPLICATION_PUSH_PATH: &str = "/matrix/identity/replicate/v1/push";

/// Well-known port that replication pushes are sent to.
pub const DEFAULT_REPLICATION_PORT: u16 = 1001;

/// The only key type signatures can currently be verified with.
pub const ED25519_KEY_TYPE: &str = "ed25519";

/// Name of the field holding signatures inside a signed object.
pub const SIGNATURES_FIELD: &str = "signatures";

/// A single replicated record: the id assigned by the origin server and the
/// signed association itself.
///
/// On the wire an update is a two-element array `[originId, association]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "(i64, SignedAssociation)",
    into = "(i64, SignedAssociation)"
)]
pub struct Update {
    /// Strictly increasing id assigned by the origin server.
    pub origin_id: i64,
    /// The signed association payload.
    pub association: SignedAssociation,
}

impl Update {
    pub fn new(origin_id: i64, association: SignedAssociation) -> Self {
        Self {
            origin_id,
            association,
        }
    }
}

impl From<(i64, SignedAssociation)> for Update {
    fn from((origin_id, association): (i64, SignedAssociation)) -> Self {
        Self::new(origin_id, association)
    }
}

impl From<Update> for (i64, SignedAssociation) {
    fn from(update: Update) -> Self {
        (update.origin_id, update.association)
    }
}

/// JSON body of `POST /matrix/identity/replicate/v1/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationPushBody {
    /// The ordered batch of updates.
    #[serde(rename = "sgAssocs")]
    pub sg_assocs: Vec<Update>,
}
