//! Cryptographic primitives for the Polycentric engine.
//!
//! Provides Ed25519 identity keys and the signing/verification of
//! [`SignedEvent`](poly_types::SignedEvent)s. An identity's public key is its
//! permanent address, so verifying an event means checking its signature
//! against the `system` field of the event it carries.

pub mod event;
pub mod signer;

pub use event::{sign_event, verify_event, CryptoError, CryptoResult};
pub use signer::{Signature, SignatureError, SigningKey, VerifyingKey};
