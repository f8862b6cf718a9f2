//! Canonical-JSON signing and verification with ed25519.
//!
//! A signed object carries its signatures inline:
//!
//! ```json
//! {"medium": "email", ..., "signatures": {"id.example.com:ed25519": "<base64>"}}
//! ```
//!
//! The signed bytes are the canonical JSON encoding of the object without its
//! `signatures` and `unsigned` fields: object keys sorted, no insignificant
//! whitespace, UTF-8. Signatures are unpadded standard base64. Public keys are
//! configured as hex.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use idrep_types::{SignedAssociation, ED25519_KEY_TYPE, SIGNATURES_FIELD};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::error::VerifyError;

const UNSIGNED_FIELD: &str = "unsigned";

/// Returns the `"<server>:<keytype>"` key a signature is stored under.
pub fn signature_descriptor(server_name: &str, key_type: &str) -> String {
    format!("{server_name}:{key_type}")
}

/// Serializes a JSON value with object keys in sorted order regardless of how
/// the map stores them.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    out.serialize_entry(key, &Canonical(value))?;
                }
                out.end()
            }
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            other => other.serialize(serializer),
        }
    }
}

/// Encodes the signable part of `object` as canonical JSON.
pub fn canonical_json(object: &SignedAssociation) -> Result<Vec<u8>, serde_json::Error> {
    let mut signable = object.clone();
    signable.remove(SIGNATURES_FIELD);
    signable.remove(UNSIGNED_FIELD);
    serde_json::to_vec(&Canonical(&Value::Object(signable)))
}

/// Signs `object` as `server_name` and stores the signature under
/// `"<server_name>:ed25519"`, keeping any signatures already present.
pub fn sign_json(
    object: &mut SignedAssociation,
    server_name: &str,
    signing_key: &SigningKey,
) -> Result<(), serde_json::Error> {
    let signable = canonical_json(object)?;
    let signature = signing_key.sign(&signable);
    let encoded = STANDARD_NO_PAD.encode(signature.to_bytes());

    let signatures = object
        .entry(SIGNATURES_FIELD)
        .or_insert_with(|| Value::Object(Map::new()));
    if !signatures.is_object() {
        *signatures = Value::Object(Map::new());
    }
    if let Value::Object(map) = signatures {
        map.insert(
            signature_descriptor(server_name, ED25519_KEY_TYPE),
            Value::String(encoded),
        );
    }
    Ok(())
}

/// Checks the `"<server_name>:ed25519"` signature on `object`.
///
/// # Errors
///
/// `NoSignatures` / `MalformedSignatures` when the signature map is missing or
/// not an object, `InvalidSignature` when the entry is missing, undecodable,
/// or does not verify.
pub fn verify_signed_json(
    object: &SignedAssociation,
    server_name: &str,
    verifying_key: &VerifyingKey,
) -> Result<(), VerifyError> {
    let signatures = match object.get(SIGNATURES_FIELD) {
        None => return Err(VerifyError::NoSignatures),
        Some(Value::Object(signatures)) => signatures,
        Some(_) => return Err(VerifyError::MalformedSignatures),
    };

    let descriptor = signature_descriptor(server_name, ED25519_KEY_TYPE);
    let encoded = signatures
        .get(&descriptor)
        .and_then(Value::as_str)
        .ok_or_else(|| VerifyError::InvalidSignature(format!("no {descriptor} signature")))?;

    let raw = STANDARD_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| VerifyError::InvalidSignature(format!("invalid base64: {e}")))?;
    let raw: [u8; 64] = raw
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::InvalidSignature("invalid signature length".to_string()))?;
    let signature = Signature::from_bytes(&raw);

    let signable = canonical_json(object)?;
    verifying_key
        .verify(&signable, &signature)
        .map_err(|e| VerifyError::InvalidSignature(e.to_string()))
}

/// Decodes a hex-encoded ed25519 public key.
pub fn decode_verify_key(key_hex: &str) -> Result<VerifyingKey, VerifyError> {
    let invalid = |reason: String| VerifyError::InvalidPublicKey {
        key_type: ED25519_KEY_TYPE.to_string(),
        reason,
    };

    let bytes = hex::decode(key_hex).map_err(|e| invalid(format!("invalid hex: {e}")))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| invalid("invalid public key length".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| invalid(e.to_string()))
}
