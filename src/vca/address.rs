//! Virtual contract address derivation
//!
//! Addresses look like EVM contract addresses (`0x` + 40 hex digits) so a VCA
//! and the contract it is later mapped to share one format. A candidate is
//! the truncated SHA-256 of `namespace ‖ 0x00 ‖ slug ‖ 0x00 ‖ nonce`; the nonce
//! only moves past zero when an earlier candidate is already taken.

use sha2::{Digest, Sha256};

use crate::types::CuratorError;

/// Address prefix
pub const ADDRESS_PREFIX: &str = "0x";

/// Hex digits after the prefix
pub const ADDRESS_HEX_LEN: usize = 40;

/// Default namespace salt
pub const DEFAULT_NAMESPACE: &str = "curator-vca-v1";

/// Default number of nonces tried before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1024;

/// Deterministic address generator and format checker
#[derive(Debug, Clone)]
pub struct AddressCodec {
    namespace: String,
    max_attempts: u32,
}

impl Default for AddressCodec {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE, DEFAULT_MAX_ATTEMPTS)
    }
}

impl AddressCodec {
    pub fn new(namespace: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            namespace: namespace.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Trim and lower-case a slug
    pub fn normalize_slug(slug: &str) -> String {
        slug.trim().to_lowercase()
    }

    /// Derive the candidate address for `slug` at `nonce`
    pub fn derive(&self, slug: &str, nonce: u32) -> Result<String, CuratorError> {
        let slug = Self::normalize_slug(slug);
        if slug.is_empty() {
            return Err(CuratorError::Validation("slug must not be empty".into()));
        }

        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(slug.as_bytes());
        hasher.update([0u8]);
        hasher.update(nonce.to_be_bytes());
        let digest = hex::encode(hasher.finalize());

        Ok(format!("{}{}", ADDRESS_PREFIX, &digest[..ADDRESS_HEX_LEN]))
    }

    /// Generate the first candidate for `slug` that `is_taken` rejects
    ///
    /// Pure for a fixed `is_taken` predicate.
    pub fn generate<F>(&self, slug: &str, mut is_taken: F) -> Result<String, CuratorError>
    where
        F: FnMut(&str) -> bool,
    {
        for nonce in 0..self.max_attempts {
            let candidate = self.derive(slug, nonce)?;
            if !is_taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(self.exhausted(slug))
    }

    /// Error reported when every nonce for `slug` collided
    pub fn exhausted(&self, slug: &str) -> CuratorError {
        CuratorError::Validation(format!(
            "address space exhausted for slug '{}' after {} attempts",
            Self::normalize_slug(slug),
            self.max_attempts
        ))
    }

    /// Format check only; does not consult the registry
    pub fn is_valid_address(address: &str) -> bool {
        match address.strip_prefix(ADDRESS_PREFIX) {
            Some(hex_part) => {
                hex_part.len() == ADDRESS_HEX_LEN
                    && hex_part.bytes().all(|b| b.is_ascii_hexdigit())
            }
            None => false,
        }
    }

    /// Format check that fails with `InvalidAddressFormat`
    pub fn require_valid(address: &str) -> Result<(), CuratorError> {
        if Self::is_valid_address(address) {
            Ok(())
        } else {
            Err(CuratorError::InvalidAddressFormat(address.to_string()))
        }
    }

    /// Format-check an address and return its stored, lower-case form
    pub fn canonical(address: &str) -> Result<String, CuratorError> {
        let address = address.trim();
        Self::require_valid(address)?;
        Ok(address.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_lowercases_valid_addresses() {
        let codec = AddressCodec::default();
        let address = codec.derive("vaderai", 0).unwrap();
        let shouted = format!("0x{}", address[2..].to_uppercase());

        assert_eq!(AddressCodec::canonical(&shouted).unwrap(), address);
        assert_eq!(AddressCodec::canonical(&format!(" {} ", address)).unwrap(), address);
        assert!(matches!(
            AddressCodec::canonical("0xzz"),
            Err(CuratorError::InvalidAddressFormat(_))
        ));
    }
    use std::collections::HashSet;

    #[test]
    fn test_derive_is_deterministic_and_normalized() {
        let codec = AddressCodec::default();
        let a = codec.derive("VaderAI", 0).unwrap();
        let b = codec.derive("  vaderai ", 0).unwrap();
        assert_eq!(a, b);
        assert!(AddressCodec::is_valid_address(&a));
        assert_ne!(a, codec.derive("vaderai", 1).unwrap());
    }

    #[test]
    fn test_namespace_changes_address() {
        let a = AddressCodec::new("ns-a", 8).derive("vaderai", 0).unwrap();
        let b = AddressCodec::new("ns-b", 8).derive("vaderai", 0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_slug_rejected() {
        let codec = AddressCodec::default();
        assert!(matches!(codec.derive("   ", 0), Err(CuratorError::Validation(_))));
        assert!(codec.generate("", |_| false).is_err());
    }

    #[test]
    fn test_generate_skips_taken_candidates() {
        let codec = AddressCodec::default();
        let first = codec.derive("vaderai", 0).unwrap();
        let second = codec.generate("vaderai", |c| c == first).unwrap();
        assert_eq!(second, codec.derive("vaderai", 1).unwrap());
    }

    #[test]
    fn test_generate_exhaustion() {
        let codec = AddressCodec::new(DEFAULT_NAMESPACE, 3);
        let err = codec.generate("vaderai", |_| true).unwrap_err();
        assert!(matches!(err, CuratorError::Validation(_)));
    }

    #[test]
    fn test_address_format() {
        assert!(AddressCodec::is_valid_address(
            "0xABCDEF0123456789abcdef0123456789ABCDEF01"
        ));
        assert!(!AddressCodec::is_valid_address("0xABC"));
        assert!(!AddressCodec::is_valid_address(
            "ABCDEF0123456789abcdef0123456789ABCDEF0123"
        ));
        assert!(!AddressCodec::is_valid_address(
            "0xZZCDEF0123456789abcdef0123456789ABCDEF01"
        ));
        assert!(!AddressCodec::is_valid_address(""));
    }

    #[test]
    fn test_ten_thousand_slugs_do_not_collide() {
        let codec = AddressCodec::default();
        let mut taken = HashSet::new();
        for i in 0..10_000 {
            let slug = format!("project-{}", i);
            let address = codec.generate(&slug, |c| taken.contains(c)).unwrap();
            assert!(AddressCodec::is_valid_address(&address));
            assert!(taken.insert(address), "collision for {}", slug);
        }
        assert_eq!(taken.len(), 10_000);
    }
}
