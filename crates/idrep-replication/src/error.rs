//! Error types for replication.
//!
//! | Error | Raised by | Meaning |
//! |-------|-----------|---------|
//! | [`VerifyError`] | [`verify_message`](crate::verify_message) | An inbound record is not trustworthy. |
//! | [`TransportError`] | [`JsonTransport`](crate::JsonTransport) | The push never produced a usable HTTP exchange. |
//! | [`PushError`] | [`Peer::push_updates`](crate::Peer::push_updates) | A push resolved as failed. |
//! | [`PeerConfigError`] | [`RemotePeer::new`](crate::RemotePeer::new) | A peer was configured unusably. |
//!
//! Nothing here is retried internally. Every failure goes back to the caller.

use idrep_db::StoreError;
use idrep_types::AssociationParseError;
use thiserror::Error;

/// Reasons a signed message fails verification against a peer.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The message has no `signatures` field at all.
    #[error("message carries no signatures")]
    NoSignatures,

    /// The `signatures` field is present but is not an object.
    #[error("signatures field is not an object")]
    MalformedSignatures,

    /// The message is signed, but not by the server we trust under any of its
    /// configured key types.
    #[error("found signatures: {found:?}, required server name: {required_server_name}")]
    NoMatchingSignature {
        /// The signature descriptors present in the message.
        found: Vec<String>,
        /// The server name a signature was required from.
        required_server_name: String,
    },

    /// A configured public key could not be decoded.
    #[error("invalid {key_type} public key: {reason}")]
    InvalidPublicKey { key_type: String, reason: String },

    /// A matching signature was found but does not verify.
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),

    /// The message could not be encoded as canonical JSON.
    #[error("failed to encode canonical JSON: {0}")]
    Canonicalization(#[from] serde_json::Error),
}

/// Network-level failures of a push.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting, sending, timing out, or reading the response body failed.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The remote answered with a non-2xx status and a body that is not JSON.
    #[error("unparseable error body with status {status}: {source}")]
    MalformedErrorBody {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of [`Peer::push_updates`](crate::Peer::push_updates).
#[derive(Debug, Error)]
pub enum PushError {
    /// The remote peer rejected the push with a structured error body.
    #[error("peer {server_name} rejected push with status {status}: {body}")]
    Remote {
        server_name: String,
        status: u16,
        /// The parsed error object, verbatim.
        body: serde_json::Value,
    },

    /// The push could not be completed at the network layer.
    #[error("push transport failed: {0}")]
    Transport(#[from] TransportError),

    /// A record could not be parsed while applying it locally.
    #[error("malformed association with origin id {origin_id}: {source}")]
    MalformedRecord {
        origin_id: i64,
        #[source]
        source: AssociationParseError,
    },

    /// The global association store failed.
    #[error("association store failed: {0}")]
    Store(#[from] StoreError),

    /// The blocking task applying updates locally panicked or was cancelled.
    #[error("local apply task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The push body or a record could not be serialized.
    #[error("failed to encode updates: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Invalid peer configuration.
#[derive(Debug, Error)]
pub enum PeerConfigError {
    /// A remote peer needs at least one public key to be verifiable.
    #[error("remote peer {0} has no public keys configured")]
    NoPublicKeys(String),
}
