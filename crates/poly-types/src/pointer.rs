use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{Process, PublicKey};

/// Stable reference to one event, independent of where it is stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pointer {
    pub system: PublicKey,
    pub process: Process,
    pub logical_clock: u64,
}

impl Pointer {
    pub fn new(system: PublicKey, process: Process, logical_clock: u64) -> Self {
        Self {
            system,
            process,
            logical_clock,
        }
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({}/{}#{})", self.system, self.process, self.logical_clock)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.system, self.process, self.logical_clock)
    }
}
