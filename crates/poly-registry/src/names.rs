//! Physical store naming.
//!
//! Every `(system, version)` pair maps to one driver-level store name of the
//! form `store_<system hex>_v<version>`. The mapping is injective and
//! reversible so a driver listing can be matched back to registry rows.

use poly_types::PublicKey;

use crate::error::{RegistryError, RegistryResult};

const PREFIX: &str = "store_";
const VERSION_MARKER: &str = "_v";

/// Driver-level name of the store for `(system, version)`.
///
/// ```
/// use poly_registry::store_name;
/// use poly_types::PublicKey;
///
/// let name = store_name(&PublicKey::from_bytes([0xab; 32]), 7);
/// assert!(name.starts_with("store_abab"));
/// assert!(name.ends_with("_v7"));
/// ```
pub fn store_name(system: &PublicKey, version: u32) -> String {
    format!("{PREFIX}{}{VERSION_MARKER}{version}", system.to_hex())
}

/// Inverse of [`store_name`].
pub fn parse_store_name(name: &str) -> RegistryResult<(PublicKey, u32)> {
    let invalid = |reason: &str| RegistryError::InvalidStoreName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let rest = name
        .strip_prefix(PREFIX)
        .ok_or_else(|| invalid("missing store_ prefix"))?;
    let (system_hex, version) = rest
        .rsplit_once(VERSION_MARKER)
        .ok_or_else(|| invalid("missing version suffix"))?;
    let system = PublicKey::from_hex(system_hex).map_err(|e| invalid(&e.to_string()))?;
    let version = version
        .parse::<u32>()
        .map_err(|e| invalid(&e.to_string()))?;
    Ok((system, version))
}
