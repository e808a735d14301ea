//! Share record schema
//!
//! A share record is one tracked share action plus every visit and click
//! attributed to it. Records are never deleted; they feed the verification
//! statistics.

use std::fmt;

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for share records
pub const SHARE_COLLECTION: &str = "shares";

/// How a share came to be verified
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    ReferralTracking,
    TimeBased,
    Behavior,
    Fallback,
    Manual,
}

impl VerificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMethod::ReferralTracking => "referral_tracking",
            VerificationMethod::TimeBased => "time_based",
            VerificationMethod::Behavior => "behavior",
            VerificationMethod::Fallback => "fallback",
            VerificationMethod::Manual => "manual",
        }
    }
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata carried by a visit or click
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VisitMetadata {
    /// `ref` query parameter (sharer's user id as carried by the link)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_user_id: Option<String>,

    /// HTTP referrer of the visiting browser
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Logged-in visitor, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VisitMetadata {
    /// Signature used to tell visitors apart when no visitor id is known
    pub fn visitor_signature(&self) -> String {
        match &self.visitor_id {
            Some(id) => format!("id:{}", id),
            None => format!(
                "ua:{}|ref:{}",
                self.user_agent.as_deref().unwrap_or(""),
                self.referrer.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Event payload, tagged by event type
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "metadata", rename_all = "snake_case")]
pub enum ShareEventKind {
    ShareCreated {
        share_url: String,
    },
    Click(VisitMetadata),
    Visit(VisitMetadata),
    ShareVerified {
        method: VerificationMethod,
    },
    ManualVerification {
        admin_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evidence_url: Option<String>,
    },
    ManualReviewRequired {
        reason: String,
    },
    PointsAwarded {
        points: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vca_address: Option<String>,
    },
}

impl ShareEventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ShareEventKind::ShareCreated { .. } => "share_created",
            ShareEventKind::Click(_) => "click",
            ShareEventKind::Visit(_) => "visit",
            ShareEventKind::ShareVerified { .. } => "share_verified",
            ShareEventKind::ManualVerification { .. } => "manual_verification",
            ShareEventKind::ManualReviewRequired { .. } => "manual_review_required",
            ShareEventKind::PointsAwarded { .. } => "points_awarded",
        }
    }

    /// Visit metadata for click and visit events
    pub fn visit(&self) -> Option<&VisitMetadata> {
        match self {
            ShareEventKind::Click(meta) | ShareEventKind::Visit(meta) => Some(meta),
            _ => None,
        }
    }
}

/// One timestamped entry in a share's event log
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ShareEvent {
    pub timestamp: DateTime,
    pub event: ShareEventKind,
}

impl ShareEvent {
    pub fn now(event: ShareEventKind) -> Self {
        Self {
            timestamp: DateTime::now(),
            event,
        }
    }

    pub fn at(timestamp: DateTime, event: ShareEventKind) -> Self {
        Self { timestamp, event }
    }
}

/// Share record stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ShareDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Time-based unique share token
    pub share_id: String,

    /// Sharing user
    pub user_id: String,

    pub project_id: String,

    /// Link handed to the user, carrying `share` and `ref` parameters
    pub share_url: String,

    pub created_at: DateTime,

    #[serde(default)]
    pub events: Vec<ShareEvent>,

    /// Set once, never cleared
    #[serde(default)]
    pub verified: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_method: Option<VerificationMethod>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime>,

    /// Set once, only after `verified`
    #[serde(default)]
    pub points_awarded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_awarded_at: Option<DateTime>,

    /// Fallback window passed with fallback disabled; waits for an admin
    #[serde(default)]
    pub manual_review: bool,
}

impl ShareDoc {
    /// Create a new share record with its `share_created` event
    pub fn new(share_id: String, user_id: String, project_id: String, share_url: String) -> Self {
        let now = DateTime::now();
        Self {
            _id: None,
            metadata: Metadata::new(),
            share_id,
            user_id,
            project_id,
            events: vec![ShareEvent::at(
                now,
                ShareEventKind::ShareCreated {
                    share_url: share_url.clone(),
                },
            )],
            share_url,
            created_at: now,
            verified: false,
            verification_method: None,
            verified_at: None,
            points_awarded: false,
            points_awarded_at: None,
            manual_review: false,
        }
    }

    /// Visit and click metadata in arrival order
    pub fn visits(&self) -> impl Iterator<Item = (&DateTime, &VisitMetadata)> {
        self.events
            .iter()
            .filter_map(|e| e.event.visit().map(|meta| (&e.timestamp, meta)))
    }

    /// Whether the verification state satisfies `points_awarded ⇒ verified`
    pub fn is_consistent(&self) -> bool {
        !self.points_awarded || self.verified
    }
}

impl Default for ShareDoc {
    fn default() -> Self {
        Self::new(String::new(), String::new(), String::new(), String::new())
    }
}

impl IntoIndexes for ShareDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "share_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("share_id_unique".to_string())
                        .build(),
                ),
            ),
            // Sweep scans unsettled shares oldest first
            (
                doc! { "points_awarded": 1, "created_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("points_awarded_created_at".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "user_id": 1, "project_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("user_project_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ShareDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
