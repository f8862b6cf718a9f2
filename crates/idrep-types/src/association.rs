//! Structured third-party-identifier associations.

use serde::{Deserialize, Serialize};

use crate::SignedAssociation;

/// A binding of a third-party identifier (e.g. an email address) to an
/// account identifier, valid within `[not_before, not_after]`.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreepidAssociation {
    /// The identifier kind, e.g. `"email"` or `"msisdn"`.
    pub medium: String,
    /// The identifier value, e.g. the email address.
    pub address: String,
    /// The account the identifier is bound to.
    pub mxid: String,
    /// When the association was created.
    pub ts: i64,
    /// Start of the validity window.
    pub not_before: i64,
    /// End of the validity window.
    pub not_after: i64,
}

impl ThreepidAssociation {
    /// Returns the unsigned JSON object form of this association, ready to be
    /// signed.
    pub fn to_json_object(&self) -> SignedAssociation {
        let mut obj = SignedAssociation::new();
        obj.insert("medium".to_string(), self.medium.clone().into());
        obj.insert("address".to_string(), self.address.clone().into());
        obj.insert("mxid".to_string(), self.mxid.clone().into());
        obj.insert("ts".to_string(), self.ts.into());
        obj.insert("not_before".to_string(), self.not_before.into());
        obj.insert("not_after".to_string(), self.not_after.into());
        obj
    }
}

/// Errors produced when turning a signed payload into a structured association.
#[derive(Debug, thiserror::Error)]
pub enum AssociationParseError {
    /// A required field is missing or has the wrong type.
    #[error("malformed association: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parses a signed association payload into its structured form.
///
/// Unknown fields (including `signatures`) are ignored; every field of
/// [`ThreepidAssociation`] is required.
///
/// # Errors
///
/// Returns [`AssociationParseError::Malformed`] if a field is missing or
/// mistyped.
pub fn parse_association(
    signed: &SignedAssociation,
) -> Result<ThreepidAssociation, AssociationParseError> {
    let assoc = serde_json::from_value(serde_json::Value::Object(signed.clone()))?;
    Ok(assoc)
}
