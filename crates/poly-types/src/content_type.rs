use std::fmt;

use serde::{Deserialize, Serialize};

/// Discriminates the payload carried by an [`Event`](crate::Event).
///
/// The set is open: unknown values are stored and replicated untouched, and
/// still participate in the LWW fold when they carry an `lww_element`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentType(pub u64);

impl ContentType {
    pub const DELETE: Self = Self(1);
    pub const SYSTEM_PROCESSES: Self = Self(2);
    pub const POST: Self = Self(3);
    pub const FOLLOW: Self = Self(4);
    pub const USERNAME: Self = Self(5);
    pub const DESCRIPTION: Self = Self(6);
    pub const BLOB_META: Self = Self(7);
    pub const BLOB_SECTION: Self = Self(8);
    pub const AVATAR: Self = Self(9);
    pub const SERVER: Self = Self(10);
    pub const VOUCH: Self = Self(11);
    pub const CLAIM: Self = Self(12);
    pub const BANNER: Self = Self(13);
    pub const OPINION: Self = Self(14);
    pub const STORE: Self = Self(15);
    pub const AUTHORITY: Self = Self(16);
    pub const JOURNEY: Self = Self(17);

    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::DELETE => "Delete",
            Self::SYSTEM_PROCESSES => "SystemProcesses",
            Self::POST => "Post",
            Self::FOLLOW => "Follow",
            Self::USERNAME => "Username",
            Self::DESCRIPTION => "Description",
            Self::BLOB_META => "BlobMeta",
            Self::BLOB_SECTION => "BlobSection",
            Self::AVATAR => "Avatar",
            Self::SERVER => "Server",
            Self::VOUCH => "Vouch",
            Self::CLAIM => "Claim",
            Self::BANNER => "Banner",
            Self::OPINION => "Opinion",
            Self::STORE => "Store",
            Self::AUTHORITY => "Authority",
            Self::JOURNEY => "Journey",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "ContentType::{name}"),
            None => write!(f, "ContentType({})", self.0),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{}", self.0),
        }
    }
}
