//! Verification of inbound signed records against a peer's keys.

use idrep_types::{SignedAssociation, ED25519_KEY_TYPE, SIGNATURES_FIELD};
use serde_json::Value;

use crate::error::VerifyError;
use crate::peer::PeerIdentity;
use crate::signing::{decode_verify_key, signature_descriptor, verify_signed_json};

/// Checks that `message` carries a valid signature from `peer`.
///
/// The peer's key types are tried in order; the first one that has a
/// `"<server>:<keytype>"` entry in the message and is supported decides the
/// outcome. Key types other than ed25519 are skipped.
///
/// # Errors
///
/// - `NoSignatures` if the message has no `signatures` field.
/// - `NoMatchingSignature` if no configured, supported key type has a
///   signature entry; the error lists the descriptors that were present.
/// - `InvalidPublicKey` / `InvalidSignature` if the matching entry fails.
pub fn verify_message(message: &SignedAssociation, peer: &PeerIdentity) -> Result<(), VerifyError> {
    let signatures = match message.get(SIGNATURES_FIELD) {
        None => return Err(VerifyError::NoSignatures),
        Some(Value::Object(signatures)) => signatures,
        Some(_) => return Err(VerifyError::MalformedSignatures),
    };

    for (key_type, public_key) in &peer.public_keys {
        let descriptor = signature_descriptor(&peer.server_name, key_type);
        if !signatures.contains_key(&descriptor) {
            continue;
        }
        if key_type != ED25519_KEY_TYPE {
            tracing::debug!(
                server_name = %peer.server_name,
                key_type = %key_type,
                "ignoring unknown key type"
            );
            continue;
        }

        let verifying_key = decode_verify_key(public_key)?;
        verify_signed_json(message, &peer.server_name, &verifying_key)?;
        return Ok(());
    }

    Err(VerifyError::NoMatchingSignature {
        found: signatures.keys().cloned().collect(),
        required_server_name: peer.server_name.clone(),
    })
}
