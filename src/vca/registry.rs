//! VCA registry
//!
//! Thin query layer over [`VcaStore`]: slug normalization, address
//! allocation against the live namespace, and pagination bounds. Store
//! failures pass through with their kind intact.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::schemas::VcaDoc;
use crate::db::{PatchOutcome, StoreError, VcaPatch, VcaStore};
use crate::types::CuratorError;
use crate::vca::AddressCodec;

/// Largest page `list` will return
pub const MAX_PAGE_SIZE: usize = 100;

/// Page size used when the caller passes zero
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// VCA registry over an injected store handle
#[derive(Clone)]
pub struct VcaRegistry {
    store: Arc<dyn VcaStore>,
    codec: AddressCodec,
}

impl VcaRegistry {
    pub fn new(store: Arc<dyn VcaStore>, codec: AddressCodec) -> Self {
        Self { store, codec }
    }

    pub fn codec(&self) -> &AddressCodec {
        &self.codec
    }

    /// Insert a VCA; `Conflict` names the field that collided
    pub async fn insert(&self, vca: VcaDoc) -> Result<VcaDoc, StoreError> {
        self.store.insert_vca(vca).await
    }

    pub async fn get_by_address(&self, address: &str) -> Result<Option<VcaDoc>, StoreError> {
        self.store.find_vca_by_address(address).await
    }

    /// Lookup by slug after normalization
    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<VcaDoc>, StoreError> {
        let slug = AddressCodec::normalize_slug(slug);
        if slug.is_empty() {
            return Ok(None);
        }
        self.store.find_vca_by_slug(&slug).await
    }

    pub async fn get_by_project(&self, project_id: &str) -> Result<Option<VcaDoc>, StoreError> {
        self.store.find_vca_by_project(project_id).await
    }

    /// First free address for `slug`, starting at nonce `from`
    ///
    /// Returns the address and the nonce it was found at, so a caller that
    /// loses an insert race can resume after it.
    pub async fn allocate_address(&self, slug: &str, from: u32) -> Result<(String, u32), CuratorError> {
        for nonce in from..self.codec.max_attempts() {
            let candidate = self.codec.derive(slug, nonce)?;
            if !self.store.vca_address_exists(&candidate).await? {
                if nonce > 0 {
                    debug!(slug, nonce, address = %candidate, "Address collision resolved");
                }
                return Ok((candidate, nonce));
            }
        }
        warn!(slug, "Address space exhausted");
        Err(self.codec.exhausted(slug))
    }

    /// Apply a field-disjoint patch
    pub async fn update(&self, address: &str, patch: VcaPatch) -> Result<PatchOutcome, StoreError> {
        self.store.update_vca(address, patch).await
    }

    /// Newest first; `limit` is clamped to `1..=MAX_PAGE_SIZE`
    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<VcaDoc>, StoreError> {
        self.store.list_vcas(clamp_limit(limit), offset).await
    }
}

/// Clamp a caller-supplied page size
pub fn clamp_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        limit.min(MAX_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn registry() -> (Arc<MemoryStore>, VcaRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = VcaRegistry::new(store.clone(), AddressCodec::default());
        (store, registry)
    }

    #[tokio::test]
    async fn test_allocate_skips_existing_address() {
        let (_store, registry) = registry();
        let (first, nonce) = registry.allocate_address("vaderai", 0).await.unwrap();
        assert_eq!(nonce, 0);

        // Occupy the nonce-0 address under another slug
        registry
            .insert(VcaDoc::new(first.clone(), "squatter".into(), "u".into()))
            .await
            .unwrap();

        let (second, nonce) = registry.allocate_address("vaderai", 0).await.unwrap();
        assert_eq!(nonce, 1);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_slug_lookup_is_tri_state() {
        let (store, registry) = registry();
        assert!(registry.get_by_slug("missing").await.unwrap().is_none());

        store.set_offline(true);
        assert!(matches!(
            registry.get_by_slug("missing").await,
            Err(StoreError::Transient(_))
        ));
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(5), 5);
        assert_eq!(clamp_limit(10_000), MAX_PAGE_SIZE);
    }
}
