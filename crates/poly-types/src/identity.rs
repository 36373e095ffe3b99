use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length of a system public key in bytes (Ed25519).
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of a process identifier in bytes.
pub const PROCESS_LEN: usize = 16;

/// Permanent address of an identity ("system").
///
/// Holds the raw Ed25519 public key bytes. Validation of the key as a curve
/// point happens in `poly-crypto` when a signature is checked; here it is an
/// opaque, totally ordered byte string usable as a storage key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: PUBLIC_KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_id(&self) -> String {
        format!("sys:{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.short_id())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

/// Random identifier minted per device or session.
///
/// Each process owns a strictly increasing logical clock for its own log.
/// Membership in a system's process set is by structural equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Process([u8; PROCESS_LEN]);

impl Process {
    /// Mint a fresh random process.
    pub fn random() -> Self {
        let mut bytes = [0u8; PROCESS_LEN];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; PROCESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; PROCESS_LEN] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: PROCESS_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; PROCESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc:{}", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let key = PublicKey::from_bytes([7u8; 32]);
        let parsed = PublicKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        let err = PublicKey::from_slice(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, TypeError::InvalidLength { expected: 32, actual: 3 });
        assert!(Process::from_slice(&[0u8; 15]).is_err());
    }

    #[test]
    fn random_processes_are_unique() {
        assert_ne!(Process::random(), Process::random());
    }

    #[test]
    fn short_id_format() {
        let key = PublicKey::from_bytes([0xab; 32]);
        assert_eq!(key.short_id(), "sys:abababab");
        assert_eq!(format!("{}", Process::from_bytes([0x01; 16])), "proc:01010101");
    }

    #[test]
    fn processes_compare_structurally() {
        let a = Process::from_bytes([3u8; 16]);
        let b = Process::from_slice(&[3u8; 16]).unwrap();
        assert_eq!(a, b);
    }
}
