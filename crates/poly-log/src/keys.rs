//! Key layout inside an identity store.
//!
//! All multi-part keys are fixed-width concatenations so that byte order
//! equals field order: `system (32) | process (16) | clock (8, big-endian)`.
//! A range scan over a key prefix therefore walks one system, or one process
//! of one system, in clock order.

use poly_types::identity::{PROCESS_LEN, PUBLIC_KEY_LEN};
use poly_types::{Pointer, Process, PublicKey};

use crate::error::{LogError, LogResult};

/// Sublevel holding signed event bodies.
pub const EVENTS: &str = "events";
/// Sublevel holding one folded [`SystemState`](poly_types::SystemState) per system.
pub const SYSTEM_STATES: &str = "system_states";
/// Sublevel holding one [`ProcessState`](poly_types::ProcessState) per (system, process).
pub const PROCESS_STATES: &str = "process_states";
/// Sublevel holding tombstones keyed by the deleted pointer.
pub const DELETIONS: &str = "deletions";

const CLOCK_LEN: usize = 8;
const POINTER_KEY_LEN: usize = PUBLIC_KEY_LEN + PROCESS_LEN + CLOCK_LEN;

pub fn system_key(system: &PublicKey) -> Vec<u8> {
    system.as_bytes().to_vec()
}

pub fn process_key(system: &PublicKey, process: &Process) -> Vec<u8> {
    let mut key = Vec::with_capacity(PUBLIC_KEY_LEN + PROCESS_LEN);
    key.extend_from_slice(system.as_bytes());
    key.extend_from_slice(process.as_bytes());
    key
}

pub fn pointer_key(pointer: &Pointer) -> Vec<u8> {
    let mut key = process_key(&pointer.system, &pointer.process);
    key.extend_from_slice(&pointer.logical_clock.to_be_bytes());
    key
}

/// Inverse of [`pointer_key`].
pub fn parse_pointer_key(key: &[u8]) -> LogResult<Pointer> {
    if key.len() != POINTER_KEY_LEN {
        return Err(LogError::corrupt(key, "pointer key has wrong length"));
    }
    let (system, rest) = key.split_at(PUBLIC_KEY_LEN);
    let (process, clock) = rest.split_at(PROCESS_LEN);
    let system = PublicKey::from_slice(system).map_err(|e| LogError::corrupt(key, e))?;
    let process = Process::from_slice(process).map_err(|e| LogError::corrupt(key, e))?;
    let mut clock_bytes = [0u8; CLOCK_LEN];
    clock_bytes.copy_from_slice(clock);
    Ok(Pointer::new(system, process, u64::from_be_bytes(clock_bytes)))
}

/// The process half of a [`process_key`].
pub fn parse_process_key(key: &[u8]) -> LogResult<Process> {
    key.get(PUBLIC_KEY_LEN..)
        .filter(|rest| rest.len() == PROCESS_LEN)
        .ok_or_else(|| LogError::corrupt(key, "process key has wrong length"))
        .and_then(|rest| Process::from_slice(rest).map_err(|e| LogError::corrupt(key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer(clock: u64) -> Pointer {
        Pointer::new(
            PublicKey::from_bytes([1; 32]),
            Process::from_bytes([2; 16]),
            clock,
        )
    }

    #[test]
    fn pointer_key_round_trips() {
        let p = pointer(513);
        assert_eq!(parse_pointer_key(&pointer_key(&p)).unwrap(), p);
    }

    #[test]
    fn pointer_keys_sort_by_clock() {
        assert!(pointer_key(&pointer(2)) < pointer_key(&pointer(256)));
        assert!(pointer_key(&pointer(255)) < pointer_key(&pointer(256)));
    }

    #[test]
    fn process_key_is_prefix_of_pointer_key() {
        let p = pointer(7);
        assert!(pointer_key(&p).starts_with(&process_key(&p.system, &p.process)));
        assert_eq!(
            parse_process_key(&process_key(&p.system, &p.process)).unwrap(),
            p.process
        );
    }

    #[test]
    fn short_keys_are_corrupt() {
        assert!(matches!(
            parse_pointer_key(&[0; 10]),
            Err(LogError::Corrupt { .. })
        ));
        assert!(parse_process_key(&[0; 32]).is_err());
    }
}
