//! Document store layer
//!
//! The store traits are the contract Curator needs from its document
//! database. Every lookup distinguishes "absent" (`Ok(None)` / `Ok(false)`)
//! from a backend failure (`Err(StoreError::Transient)`), and every mutation
//! that other requests may race against is a single atomic store operation.
//!
//! Two backends implement the traits: [`MongoStore`] for production and
//! [`MemoryStore`] for development mode and tests.

pub mod memory;
pub mod mongo;
pub mod mongo_store;
pub mod schemas;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
pub use mongo_store::MongoStore;

use schemas::{
    Activity, ProjectReviewDoc, ShareDoc, ShareEvent, VcaDoc, VerificationMethod,
};

/// Unique field that rejected an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictField {
    Address,
    Slug,
    ShareId,
    ProjectId,
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictField::Address => "address",
            ConflictField::Slug => "slug",
            ConflictField::ShareId => "share_id",
            ConflictField::ProjectId => "project_id",
        })
    }
}

/// Failure reported by a store backend
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// A unique index rejected the write
    #[error("{field} '{value}' already exists")]
    Conflict { field: ConflictField, value: String },

    /// Backend unreachable, timed out or failed the operation
    #[error("store unavailable: {0}")]
    Transient(String),

    /// Document could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Field-disjoint update applied to a single VCA
#[derive(Debug, Clone)]
pub enum VcaPatch {
    /// Append to the activity log
    AppendActivity(Activity),
    /// Append a share award unless the log already credits `share_id`
    AppendShareCredit { share_id: String, activity: Activity },
    /// Set the mapped contract; without `overwrite` only an unmapped VCA matches
    MapContract { contract: String, overwrite: bool },
}

/// Result of a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    NotFound,
    PreconditionFailed,
}

/// Aggregate counters over all share records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShareCounts {
    pub total: u64,
    pub verified: u64,
    pub points_awarded: u64,
    pub manual_review: u64,
    pub by_method: BTreeMap<VerificationMethod, u64>,
}

/// VCA persistence contract
#[async_trait]
pub trait VcaStore: Send + Sync {
    /// Insert a new VCA; fails with `Conflict` on a taken address or slug
    async fn insert_vca(&self, vca: VcaDoc) -> Result<VcaDoc, StoreError>;

    async fn find_vca_by_address(&self, address: &str) -> Result<Option<VcaDoc>, StoreError>;

    async fn find_vca_by_slug(&self, slug: &str) -> Result<Option<VcaDoc>, StoreError>;

    async fn find_vca_by_project(&self, project_id: &str) -> Result<Option<VcaDoc>, StoreError>;

    async fn vca_address_exists(&self, address: &str) -> Result<bool, StoreError>;

    /// Apply one patch atomically
    async fn update_vca(&self, address: &str, patch: VcaPatch) -> Result<PatchOutcome, StoreError>;

    /// Newest first
    async fn list_vcas(&self, limit: usize, offset: usize) -> Result<Vec<VcaDoc>, StoreError>;
}

/// Share record persistence contract
#[async_trait]
pub trait ShareStore: Send + Sync {
    async fn insert_share(&self, share: ShareDoc) -> Result<ShareDoc, StoreError>;

    async fn find_share(&self, share_id: &str) -> Result<Option<ShareDoc>, StoreError>;

    /// Append an event; `false` when the share does not exist
    async fn push_share_event(&self, share_id: &str, event: ShareEvent) -> Result<bool, StoreError>;

    /// Flip `verified` false→true and append `events` in the same write.
    /// Returns `false` when the share is missing or already verified.
    async fn mark_share_verified(
        &self,
        share_id: &str,
        method: VerificationMethod,
        events: Vec<ShareEvent>,
    ) -> Result<bool, StoreError>;

    /// Flip `points_awarded` false→true on a verified share.
    /// Returns `false` when the award was already committed.
    async fn mark_points_awarded(&self, share_id: &str, event: ShareEvent) -> Result<bool, StoreError>;

    /// Flag an unverified share for manual review, once
    async fn flag_manual_review(&self, share_id: &str, event: ShareEvent) -> Result<bool, StoreError>;

    /// Shares without a committed award, oldest first. Every unverified
    /// share is included, as is a verified share whose award was interrupted.
    async fn list_unsettled_shares(&self) -> Result<Vec<ShareDoc>, StoreError>;

    async fn share_counts(&self) -> Result<ShareCounts, StoreError>;
}

/// Project review persistence contract
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert or replace the review outcome for `review.project_id`
    async fn record_review(&self, review: ProjectReviewDoc) -> Result<(), StoreError>;

    async fn find_review(&self, project_id: &str) -> Result<Option<ProjectReviewDoc>, StoreError>;
}
