//! Remote peers reached over the replication HTTP endpoint.

use async_trait::async_trait;
use idrep_types::{
    ReplicationPushBody, SignedAssociation, Update, DEFAULT_REPLICATION_PORT,
    REPLICATION_PUSH_PATH,
};
use std::sync::Arc;

use crate::error::{PeerConfigError, PushError, TransportError, VerifyError};
use crate::peer::{Peer, PeerIdentity, PushReceipt};
use crate::transport::JsonTransport;
use crate::verify::verify_message;

/// Another identity server.
///
/// A push is a single `POST https://<server_name>:<port>/matrix/identity/replicate/v1/push`
/// carrying `{"sgAssocs": [[originId, association], ...]}`. It resolves in
/// exactly one of three ways:
///
/// - 2xx: success, with the response.
/// - any other status: [`PushError::Remote`] carrying the parsed JSON error
///   body.
/// - no usable exchange (connect error, timeout, unreadable body, or a non-2xx
///   body that is not JSON): [`PushError::Transport`].
pub struct RemotePeer {
    identity: PeerIdentity,
    port: u16,
    transport: Arc<dyn JsonTransport>,
}

impl RemotePeer {
    /// Creates a peer on the default replication port.
    ///
    /// # Errors
    ///
    /// Returns `PeerConfigError::NoPublicKeys` if the identity has no keys;
    /// such a peer could never be verified.
    pub fn new(
        identity: PeerIdentity,
        transport: Arc<dyn JsonTransport>,
    ) -> Result<Self, PeerConfigError> {
        if identity.public_keys.is_empty() {
            return Err(PeerConfigError::NoPublicKeys(identity.server_name));
        }
        Ok(Self {
            identity,
            port: DEFAULT_REPLICATION_PORT,
            transport,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Verifies that `message` was signed by this peer.
    pub fn verify_message(&self, message: &SignedAssociation) -> Result<(), VerifyError> {
        verify_message(message, &self.identity)
    }
}

#[async_trait]
impl Peer for RemotePeer {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    async fn push_updates(&self, updates: &[Update]) -> Result<PushReceipt, PushError> {
        let body = ReplicationPushBody {
            sg_assocs: updates.to_vec(),
        };
        let body = serde_json::to_value(&body).map_err(PushError::Encode)?;

        let response = self
            .transport
            .post_json(
                &self.identity.server_name,
                self.port,
                REPLICATION_PUSH_PATH,
                &body,
            )
            .await?;

        if response.is_success() {
            tracing::debug!(
                server_name = %self.identity.server_name,
                status = response.status,
                count = updates.len(),
                "push accepted"
            );
            return Ok(PushReceipt::Delivered(response));
        }

        let error_body: serde_json::Value =
            serde_json::from_slice(&response.body).map_err(|source| {
                TransportError::MalformedErrorBody {
                    status: response.status,
                    source,
                }
            })?;

        Err(PushError::Remote {
            server_name: self.identity.server_name.clone(),
            status: response.status,
            body: error_body,
        })
    }
}
