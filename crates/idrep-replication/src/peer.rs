//! The peer contract.

use async_trait::async_trait;
use idrep_types::Update;
use std::collections::BTreeMap;

use crate::error::PushError;
use crate::transport::TransportResponse;

/// Who a peer is: its server name and the public keys its signatures can be
/// checked with, keyed by key type (e.g. `"ed25519"`) with hex-encoded key
/// material as values.
///
/// Identity is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub server_name: String,
    pub public_keys: BTreeMap<String, String>,
}

impl PeerIdentity {
    pub fn new(server_name: impl Into<String>, public_keys: BTreeMap<String, String>) -> Self {
        Self {
            server_name: server_name.into(),
            public_keys,
        }
    }

    /// Identity of this server as its own peer. It has no keys because
    /// self-originated records are never verified.
    pub fn local(server_name: impl Into<String>) -> Self {
        Self::new(server_name, BTreeMap::new())
    }
}

/// How a successful push resolved.
#[derive(Debug, Clone)]
pub enum PushReceipt {
    /// Updates were applied to the local global store.
    Applied {
        /// Records newly stored.
        applied: usize,
        /// Records skipped as already applied.
        skipped: usize,
    },
    /// A remote peer accepted the push with a 2xx response.
    Delivered(TransportResponse),
}

/// A participant that replication updates can be pushed to.
///
/// Implemented by [`LocalPeer`](crate::LocalPeer) and
/// [`RemotePeer`](crate::RemotePeer).
#[async_trait]
pub trait Peer: Send + Sync {
    fn identity(&self) -> &PeerIdentity;

    fn server_name(&self) -> &str {
        &self.identity().server_name
    }

    /// Pushes an ordered batch of `(originId, signedAssociation)` updates.
    ///
    /// Updates are handled in the given order. The returned future resolves
    /// exactly once, with success or a typed failure; nothing is retried.
    async fn push_updates(&self, updates: &[Update]) -> Result<PushReceipt, PushError>;
}
