use poly_types::{Event, SignedEvent, TypeError};

use crate::signer::{Signature, SignatureError, SigningKey, VerifyingKey};

/// Errors from event signing and verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The signed bytes do not decode to an [`Event`].
    #[error("decode error: {0}")]
    Decode(#[from] TypeError),

    /// The signature does not verify against the event's system key.
    #[error("signature rejected: {0}")]
    Signature(#[from] SignatureError),

    /// Attempted to sign an event with a key for a different system.
    #[error("signing key does not belong to system {0}")]
    ForeignSystem(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Encode and sign `event`. The key must belong to `event.system`.
pub fn sign_event(key: &SigningKey, event: &Event) -> CryptoResult<SignedEvent> {
    if key.system() != event.system {
        return Err(CryptoError::ForeignSystem(event.system.to_hex()));
    }
    let bytes = event.encode()?;
    let signature = key.sign(&bytes);
    Ok(SignedEvent::new(bytes, signature.to_bytes().to_vec()))
}

/// Decode the event and check its signature against `event.system`.
///
/// Returns the decoded event only when the signature verifies; callers must
/// not persist anything from a [`SignedEvent`] that failed here.
pub fn verify_event(signed: &SignedEvent) -> CryptoResult<Event> {
    let event = signed.decode_event()?;
    let key = VerifyingKey::from_public_key(&event.system)?;
    let signature = Signature::from_slice(&signed.signature)?;
    key.verify(&signed.event, &signature)?;
    Ok(event)
}
