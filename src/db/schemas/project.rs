//! Project review schema
//!
//! Projects themselves are owned by the submission flow; Curator only records
//! the review outcome and the VCA issued on approval.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for project review records
pub const PROJECT_REVIEW_COLLECTION: &str = "project_reviews";

/// Review status of a submitted project
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Review outcome for one project
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProjectReviewDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub project_id: String,

    pub status: ProjectStatus,

    /// Admin who approved or rejected
    pub reviewed_by: String,

    pub reviewed_at: Option<DateTime>,

    /// VCA issued on approval, if issuance succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vca_address: Option<String>,

    /// Free-text note, e.g. a VCA issuance failure or rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl IntoIndexes for ProjectReviewDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "project_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("project_id_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for ProjectReviewDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
