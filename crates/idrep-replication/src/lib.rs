//! Peer-to-peer replication of identity associations.
//!
//! Every identity server keeps the associations it created and pushes them to
//! its peers, itself included, so that each server accumulates the same global
//! view. This crate defines that protocol contract:
//!
//! - [`Peer`]: a participant updates can be pushed to.
//! - [`LocalPeer`]: this server talking to itself. Updates go straight into the
//!   global association store, with no network and no signature check.
//! - [`RemotePeer`]: another server, reached over HTTPS at
//!   `/matrix/identity/replicate/v1/push`.
//! - [`verify_message`]: the signature check a receiving server applies to
//!   every inbound record. It is deliberately separate from pushing so inbound
//!   handlers can reuse it without a network round trip.
//!
//! Idempotence comes from the origin ids: a record is identified by
//! `(origin_server, origin_id)` and the global store never holds it twice.

pub mod error;
pub mod local;
pub mod peer;
pub mod remote;
pub mod signing;
pub mod transport;
pub mod verify;

pub use error::{PeerConfigError, PushError, TransportError, VerifyError};
pub use local::LocalPeer;
pub use peer::{Peer, PeerIdentity, PushReceipt};
pub use remote::RemotePeer;
pub use signing::{canonical_json, decode_verify_key, sign_json, verify_signed_json};
pub use transport::{JsonTransport, ReplicationHttpClient, Scheme, TransportResponse};
pub use verify::verify_message;
