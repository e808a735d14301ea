//! In-memory store
//!
//! Used in development mode when MongoDB is unreachable, and by tests. Each
//! document lives in a `DashMap` entry, so an update holding the entry's
//! shard lock is atomic with respect to every other request.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bson::{oid::ObjectId, DateTime};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::db::schemas::{ProjectReviewDoc, ShareDoc, ShareEvent, VcaDoc, VerificationMethod};
use crate::db::{
    ConflictField, PatchOutcome, ProjectStore, ShareCounts, ShareStore, StoreError, VcaPatch,
    VcaStore,
};

/// Document plus its insertion sequence, used as an ordering tie-break
#[derive(Debug, Clone)]
struct Stored<T> {
    seq: u64,
    doc: T,
}

/// Concurrent in-process document store
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// address -> VCA
    vcas: DashMap<String, Stored<VcaDoc>>,
    /// slug -> address
    vca_slugs: DashMap<String, String>,
    /// share_id -> share
    shares: DashMap<String, Stored<ShareDoc>>,
    /// project_id -> review
    reviews: DashMap<String, ProjectReviewDoc>,
    seq: AtomicU64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a transient error, as an unreachable
    /// backend would
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Transient("memory store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl VcaStore for MemoryStore {
    async fn insert_vca(&self, mut vca: VcaDoc) -> Result<VcaDoc, StoreError> {
        self.check_online()?;

        // Lock order: slug map, then address map
        let slug_entry = match self.vca_slugs.entry(vca.slug.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::Conflict {
                    field: ConflictField::Slug,
                    value: vca.slug,
                })
            }
            Entry::Vacant(v) => v,
        };

        match self.vcas.entry(vca.address.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                field: ConflictField::Address,
                value: vca.address,
            }),
            Entry::Vacant(v) => {
                vca._id = Some(ObjectId::new());
                vca.metadata.stamp_created();
                slug_entry.insert(vca.address.clone());
                v.insert(Stored {
                    seq: self.next_seq(),
                    doc: vca.clone(),
                });
                Ok(vca)
            }
        }
    }

    async fn find_vca_by_address(&self, address: &str) -> Result<Option<VcaDoc>, StoreError> {
        self.check_online()?;
        Ok(self.vcas.get(address).map(|s| s.doc.clone()))
    }

    async fn find_vca_by_slug(&self, slug: &str) -> Result<Option<VcaDoc>, StoreError> {
        self.check_online()?;
        let Some(address) = self.vca_slugs.get(slug).map(|a| a.clone()) else {
            return Ok(None);
        };
        Ok(self.vcas.get(&address).map(|s| s.doc.clone()))
    }

    async fn find_vca_by_project(&self, project_id: &str) -> Result<Option<VcaDoc>, StoreError> {
        self.check_online()?;
        Ok(self
            .vcas
            .iter()
            .filter(|s| s.doc.project_id.as_deref() == Some(project_id))
            .min_by_key(|s| s.seq)
            .map(|s| s.doc.clone()))
    }

    async fn vca_address_exists(&self, address: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        Ok(self.vcas.contains_key(address))
    }

    async fn update_vca(&self, address: &str, patch: VcaPatch) -> Result<PatchOutcome, StoreError> {
        self.check_online()?;
        let Some(mut stored) = self.vcas.get_mut(address) else {
            return Ok(PatchOutcome::NotFound);
        };
        let vca = &mut stored.doc;

        match patch {
            VcaPatch::AppendActivity(activity) => vca.activities.push(activity),
            VcaPatch::AppendShareCredit { share_id, activity } => {
                if vca.credits_share(&share_id) {
                    return Ok(PatchOutcome::PreconditionFailed);
                }
                vca.activities.push(activity);
            }
            VcaPatch::MapContract { contract, overwrite } => {
                if vca.mapped_contract.is_some() && !overwrite {
                    return Ok(PatchOutcome::PreconditionFailed);
                }
                vca.mapped_contract = Some(contract);
                vca.mapped_at = Some(DateTime::now());
            }
        }
        vca.metadata.touch();
        Ok(PatchOutcome::Applied)
    }

    async fn list_vcas(&self, limit: usize, offset: usize) -> Result<Vec<VcaDoc>, StoreError> {
        self.check_online()?;
        let mut all: Vec<Stored<VcaDoc>> = self.vcas.iter().map(|s| s.clone()).collect();
        all.sort_by_key(|s| Reverse((s.doc.metadata.created_at, s.seq)));
        Ok(all
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|s| s.doc)
            .collect())
    }
}

#[async_trait]
impl ShareStore for MemoryStore {
    async fn insert_share(&self, mut share: ShareDoc) -> Result<ShareDoc, StoreError> {
        self.check_online()?;
        match self.shares.entry(share.share_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                field: ConflictField::ShareId,
                value: share.share_id,
            }),
            Entry::Vacant(v) => {
                share._id = Some(ObjectId::new());
                share.metadata.stamp_created();
                v.insert(Stored {
                    seq: self.next_seq(),
                    doc: share.clone(),
                });
                Ok(share)
            }
        }
    }

    async fn find_share(&self, share_id: &str) -> Result<Option<ShareDoc>, StoreError> {
        self.check_online()?;
        Ok(self.shares.get(share_id).map(|s| s.doc.clone()))
    }

    async fn push_share_event(&self, share_id: &str, event: ShareEvent) -> Result<bool, StoreError> {
        self.check_online()?;
        let Some(mut stored) = self.shares.get_mut(share_id) else {
            return Ok(false);
        };
        stored.doc.events.push(event);
        stored.doc.metadata.touch();
        Ok(true)
    }

    async fn mark_share_verified(
        &self,
        share_id: &str,
        method: VerificationMethod,
        events: Vec<ShareEvent>,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let Some(mut stored) = self.shares.get_mut(share_id) else {
            return Ok(false);
        };
        let share = &mut stored.doc;
        if share.verified {
            return Ok(false);
        }
        share.verified = true;
        share.verification_method = Some(method);
        share.verified_at = Some(DateTime::now());
        share.events.extend(events);
        share.metadata.touch();
        Ok(true)
    }

    async fn mark_points_awarded(&self, share_id: &str, event: ShareEvent) -> Result<bool, StoreError> {
        self.check_online()?;
        let Some(mut stored) = self.shares.get_mut(share_id) else {
            return Ok(false);
        };
        let share = &mut stored.doc;
        if !share.verified || share.points_awarded {
            return Ok(false);
        }
        share.points_awarded = true;
        share.points_awarded_at = Some(DateTime::now());
        share.events.push(event);
        share.metadata.touch();
        Ok(true)
    }

    async fn flag_manual_review(&self, share_id: &str, event: ShareEvent) -> Result<bool, StoreError> {
        self.check_online()?;
        let Some(mut stored) = self.shares.get_mut(share_id) else {
            return Ok(false);
        };
        let share = &mut stored.doc;
        if share.verified || share.manual_review {
            return Ok(false);
        }
        share.manual_review = true;
        share.events.push(event);
        share.metadata.touch();
        Ok(true)
    }

    async fn list_unsettled_shares(&self) -> Result<Vec<ShareDoc>, StoreError> {
        self.check_online()?;
        let mut pending: Vec<Stored<ShareDoc>> = self
            .shares
            .iter()
            .filter(|s| !s.doc.points_awarded)
            .map(|s| s.clone())
            .collect();
        pending.sort_by_key(|s| (s.doc.created_at, s.seq));
        Ok(pending.into_iter().map(|s| s.doc).collect())
    }

    async fn share_counts(&self) -> Result<ShareCounts, StoreError> {
        self.check_online()?;
        let mut counts = ShareCounts::default();
        for stored in self.shares.iter() {
            let share = &stored.doc;
            counts.total += 1;
            if share.verified {
                counts.verified += 1;
                if let Some(method) = share.verification_method {
                    *counts.by_method.entry(method).or_insert(0) += 1;
                }
            } else if share.manual_review {
                counts.manual_review += 1;
            }
            if share.points_awarded {
                counts.points_awarded += 1;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn record_review(&self, mut review: ProjectReviewDoc) -> Result<(), StoreError> {
        self.check_online()?;
        match self.reviews.entry(review.project_id.clone()) {
            Entry::Occupied(mut o) => {
                review._id = o.get()._id;
                review.metadata.created_at = o.get().metadata.created_at;
                review.metadata.touch();
                o.insert(review);
            }
            Entry::Vacant(v) => {
                review._id = Some(ObjectId::new());
                review.metadata.stamp_created();
                v.insert(review);
            }
        }
        Ok(())
    }

    async fn find_review(&self, project_id: &str) -> Result<Option<ProjectReviewDoc>, StoreError> {
        self.check_online()?;
        Ok(self.reviews.get(project_id).map(|r| r.clone()))
    }
}
