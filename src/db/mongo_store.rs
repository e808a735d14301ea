//! MongoDB implementation of the store traits
//!
//! Races between requests are settled by the server: activity appends use
//! `$push`, and every state flip filters on the state it expects so a second
//! writer matches nothing.

use async_trait::async_trait;
use bson::{doc, Bson, DateTime};
use tracing::debug;

use crate::db::mongo::{to_bson, MongoClient, MongoCollection};
use crate::db::schemas::{
    ProjectReviewDoc, ShareDoc, ShareEvent, VcaDoc, VerificationMethod,
    PROJECT_REVIEW_COLLECTION, SHARE_COLLECTION, VCA_COLLECTION,
};
use crate::db::{
    PatchOutcome, ProjectStore, ShareCounts, ShareStore, StoreError, VcaPatch, VcaStore,
};

/// Store handle backed by three MongoDB collections
#[derive(Clone)]
pub struct MongoStore {
    vcas: MongoCollection<VcaDoc>,
    shares: MongoCollection<ShareDoc>,
    reviews: MongoCollection<ProjectReviewDoc>,
}

impl MongoStore {
    /// Open the collections and apply their indexes
    pub async fn new(mongo: &MongoClient) -> Result<Self, StoreError> {
        Ok(Self {
            vcas: mongo.collection::<VcaDoc>(VCA_COLLECTION).await?,
            shares: mongo.collection::<ShareDoc>(SHARE_COLLECTION).await?,
            reviews: mongo
                .collection::<ProjectReviewDoc>(PROJECT_REVIEW_COLLECTION)
                .await?,
        })
    }
}

#[async_trait]
impl VcaStore for MongoStore {
    async fn insert_vca(&self, mut vca: VcaDoc) -> Result<VcaDoc, StoreError> {
        let id = self.vcas.insert_one(&mut vca).await?;
        vca._id = Some(id);
        Ok(vca)
    }

    async fn find_vca_by_address(&self, address: &str) -> Result<Option<VcaDoc>, StoreError> {
        self.vcas.find_one(doc! { "address": address }).await
    }

    async fn find_vca_by_slug(&self, slug: &str) -> Result<Option<VcaDoc>, StoreError> {
        self.vcas.find_one(doc! { "slug": slug }).await
    }

    async fn find_vca_by_project(&self, project_id: &str) -> Result<Option<VcaDoc>, StoreError> {
        self.vcas.find_one(doc! { "project_id": project_id }).await
    }

    async fn vca_address_exists(&self, address: &str) -> Result<bool, StoreError> {
        Ok(self.vcas.count(doc! { "address": address }).await? > 0)
    }

    async fn update_vca(&self, address: &str, patch: VcaPatch) -> Result<PatchOutcome, StoreError> {
        let now = DateTime::now();
        let (filter, update) = match patch {
            VcaPatch::AppendActivity(activity) => (
                doc! { "address": address },
                doc! {
                    "$push": { "activities": to_bson(&activity)? },
                    "$set": { "metadata.updated_at": now },
                },
            ),
            VcaPatch::AppendShareCredit { share_id, activity } => (
                doc! {
                    "address": address,
                    "activities": {
                        "$not": {
                            "$elemMatch": {
                                "details.type": "share",
                                "details.data.share_id": &share_id,
                            }
                        }
                    },
                },
                doc! {
                    "$push": { "activities": to_bson(&activity)? },
                    "$set": { "metadata.updated_at": now },
                },
            ),
            VcaPatch::MapContract { contract, overwrite } => {
                let filter = if overwrite {
                    doc! { "address": address }
                } else {
                    // `null` also matches a missing field
                    doc! { "address": address, "mapped_contract": Bson::Null }
                };
                (
                    filter,
                    doc! {
                        "$set": {
                            "mapped_contract": contract,
                            "mapped_at": now,
                            "metadata.updated_at": now,
                        }
                    },
                )
            }
        };

        let result = self.vcas.update_one(filter, update).await?;
        if result.matched_count > 0 {
            return Ok(PatchOutcome::Applied);
        }

        // Nothing matched: either the VCA is gone or the precondition failed
        if self.vca_address_exists(address).await? {
            Ok(PatchOutcome::PreconditionFailed)
        } else {
            Ok(PatchOutcome::NotFound)
        }
    }

    async fn list_vcas(&self, limit: usize, offset: usize) -> Result<Vec<VcaDoc>, StoreError> {
        self.vcas
            .find_page(
                doc! {},
                doc! { "metadata.created_at": -1, "_id": -1 },
                offset as u64,
                Some(limit as i64),
            )
            .await
    }
}

#[async_trait]
impl ShareStore for MongoStore {
    async fn insert_share(&self, mut share: ShareDoc) -> Result<ShareDoc, StoreError> {
        let id = self.shares.insert_one(&mut share).await?;
        share._id = Some(id);
        Ok(share)
    }

    async fn find_share(&self, share_id: &str) -> Result<Option<ShareDoc>, StoreError> {
        self.shares.find_one(doc! { "share_id": share_id }).await
    }

    async fn push_share_event(&self, share_id: &str, event: ShareEvent) -> Result<bool, StoreError> {
        let result = self
            .shares
            .update_one(
                doc! { "share_id": share_id },
                doc! {
                    "$push": { "events": to_bson(&event)? },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn mark_share_verified(
        &self,
        share_id: &str,
        method: VerificationMethod,
        events: Vec<ShareEvent>,
    ) -> Result<bool, StoreError> {
        let now = DateTime::now();
        let events = events
            .iter()
            .map(to_bson)
            .collect::<Result<Vec<_>, _>>()?;

        let result = self
            .shares
            .update_one(
                doc! { "share_id": share_id, "verified": false },
                doc! {
                    "$set": {
                        "verified": true,
                        "verification_method": method.as_str(),
                        "verified_at": now,
                        "metadata.updated_at": now,
                    },
                    "$push": { "events": { "$each": events } },
                },
            )
            .await?;

        debug!(share_id, %method, modified = result.modified_count, "mark_share_verified");
        Ok(result.modified_count > 0)
    }

    async fn mark_points_awarded(&self, share_id: &str, event: ShareEvent) -> Result<bool, StoreError> {
        let now = DateTime::now();
        let result = self
            .shares
            .update_one(
                doc! { "share_id": share_id, "verified": true, "points_awarded": false },
                doc! {
                    "$set": {
                        "points_awarded": true,
                        "points_awarded_at": now,
                        "metadata.updated_at": now,
                    },
                    "$push": { "events": to_bson(&event)? },
                },
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn flag_manual_review(&self, share_id: &str, event: ShareEvent) -> Result<bool, StoreError> {
        let result = self
            .shares
            .update_one(
                doc! { "share_id": share_id, "verified": false, "manual_review": false },
                doc! {
                    "$set": {
                        "manual_review": true,
                        "metadata.updated_at": DateTime::now(),
                    },
                    "$push": { "events": to_bson(&event)? },
                },
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn list_unsettled_shares(&self) -> Result<Vec<ShareDoc>, StoreError> {
        // points_awarded implies verified, so this also covers every unverified share
        self.shares
            .find_page(
                doc! { "points_awarded": false },
                doc! { "created_at": 1, "_id": 1 },
                0,
                None,
            )
            .await
    }

    async fn share_counts(&self) -> Result<ShareCounts, StoreError> {
        let mut counts = ShareCounts {
            total: self.shares.count(doc! {}).await?,
            verified: self.shares.count(doc! { "verified": true }).await?,
            points_awarded: self.shares.count(doc! { "points_awarded": true }).await?,
            manual_review: self
                .shares
                .count(doc! { "verified": false, "manual_review": true })
                .await?,
            ..Default::default()
        };

        let groups = self
            .shares
            .aggregate(vec![
                doc! { "$match": { "verified": true } },
                doc! { "$group": { "_id": "$verification_method", "count": { "$sum": 1 } } },
            ])
            .await?;

        for group in groups {
            let Some(method) = group
                .get("_id")
                .cloned()
                .and_then(|b| bson::from_bson::<VerificationMethod>(b).ok())
            else {
                continue;
            };
            let count = match group.get("count") {
                Some(Bson::Int32(n)) => *n as u64,
                Some(Bson::Int64(n)) => *n as u64,
                _ => 0,
            };
            counts.by_method.insert(method, count);
        }

        Ok(counts)
    }
}

#[async_trait]
impl ProjectStore for MongoStore {
    async fn record_review(&self, review: ProjectReviewDoc) -> Result<(), StoreError> {
        let now = DateTime::now();
        self.reviews
            .upsert_one(
                doc! { "project_id": &review.project_id },
                doc! {
                    "$set": {
                        "status": to_bson(&review.status)?,
                        "reviewed_by": &review.reviewed_by,
                        "reviewed_at": review.reviewed_at.unwrap_or(now),
                        "vca_address": to_bson(&review.vca_address)?,
                        "annotation": to_bson(&review.annotation)?,
                        "metadata.updated_at": now,
                    },
                    "$setOnInsert": { "metadata.created_at": now },
                },
            )
            .await?;
        Ok(())
    }

    async fn find_review(&self, project_id: &str) -> Result<Option<ProjectReviewDoc>, StoreError> {
        self.reviews.find_one(doc! { "project_id": project_id }).await
    }
}
