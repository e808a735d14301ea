//! VCA document schema
//!
//! Stores virtual contract addresses, their contract mapping and the
//! append-only activity log.

use std::fmt;
use std::str::FromStr;

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{Metadata, VerificationMethod};
use crate::types::CuratorError;

/// Collection name for VCAs
pub const VCA_COLLECTION: &str = "vcas";

/// Virtual contract address document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VcaDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Generated address (`0x` + 40 hex digits)
    pub address: String,

    /// Normalized slug, unique across VCAs
    pub slug: String,

    /// Account that owns the VCA, immutable after creation
    pub owner: String,

    /// Project the VCA was issued for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Real contract address once deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_contract: Option<String>,

    /// When the contract mapping was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_at: Option<DateTime>,

    /// Append-only activity log, insertion ordered
    #[serde(default)]
    pub activities: Vec<Activity>,
}

impl VcaDoc {
    /// Create a new VCA document
    pub fn new(address: String, slug: String, owner: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            address,
            slug,
            owner,
            project_id: None,
            mapped_contract: None,
            mapped_at: None,
            activities: Vec::new(),
        }
    }

    /// Attach the originating project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped_contract.is_some()
    }

    /// Whether the activity log already holds the award for `share_id`
    pub fn credits_share(&self, share_id: &str) -> bool {
        self.activities.iter().any(|a| match &a.details {
            ActivityDetails::Share(credit) => credit.share_id == share_id,
            _ => false,
        })
    }
}

impl IntoIndexes for VcaDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "address": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("address_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "slug": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("slug_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "project_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("project_id_index".to_string())
                        .build(),
                ),
            ),
            // Listing is newest first
            (
                doc! { "metadata.created_at": -1, "_id": -1 },
                Some(
                    IndexOptions::builder()
                        .name("created_at_desc".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for VcaDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

// ============================================================================
// Activities
// ============================================================================

/// The three activity kinds recorded against a VCA
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Backing,
    Review,
    Share,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Backing => "backing",
            ActivityKind::Review => "review",
            ActivityKind::Share => "share",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backing" => Ok(ActivityKind::Backing),
            "review" => Ok(ActivityKind::Review),
            "share" => Ok(ActivityKind::Share),
            other => Err(CuratorError::Validation(format!(
                "unknown activity type '{}', expected backing, review or share",
                other
            ))),
        }
    }
}

/// Payload for a backing activity
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BackingDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Fields this version does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload for a review activity
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ReviewDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload for a share award
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ShareCredit {
    pub share_id: String,
    pub method: VerificationMethod,
    pub points: u64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Activity payload, tagged by activity type
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ActivityDetails {
    Backing(BackingDetails),
    Review(ReviewDetails),
    Share(ShareCredit),
}

impl ActivityDetails {
    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityDetails::Backing(_) => ActivityKind::Backing,
            ActivityDetails::Review(_) => ActivityKind::Review,
            ActivityDetails::Share(_) => ActivityKind::Share,
        }
    }

    /// Build a payload from a raw type string and JSON object
    ///
    /// Unknown keys land in the `extra` bag of the chosen variant.
    pub fn from_json(kind: &str, payload: Value) -> Result<Self, CuratorError> {
        let kind: ActivityKind = kind.parse()?;
        let payload = match payload {
            Value::Null => Value::Object(Map::new()),
            obj @ Value::Object(_) => obj,
            other => {
                return Err(CuratorError::Validation(format!(
                    "activity details must be an object, got {}",
                    other
                )))
            }
        };
        let bad = |e: serde_json::Error| {
            CuratorError::Validation(format!("invalid {} details: {}", kind, e))
        };
        Ok(match kind {
            ActivityKind::Backing => {
                ActivityDetails::Backing(serde_json::from_value(payload).map_err(bad)?)
            }
            ActivityKind::Review => {
                ActivityDetails::Review(serde_json::from_value(payload).map_err(bad)?)
            }
            ActivityKind::Share => {
                ActivityDetails::Share(serde_json::from_value(payload).map_err(bad)?)
            }
        })
    }
}

/// One entry of a VCA's activity log
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Activity {
    pub user_id: String,
    pub timestamp: DateTime,
    pub details: ActivityDetails,
}

impl Activity {
    pub fn new(user_id: impl Into<String>, details: ActivityDetails) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp: DateTime::now(),
            details,
        }
    }

    /// Activity recording a one-time share award
    pub fn share_award(
        user_id: impl Into<String>,
        share_id: impl Into<String>,
        method: VerificationMethod,
        points: u64,
    ) -> Self {
        Self::new(
            user_id,
            ActivityDetails::Share(ShareCredit {
                share_id: share_id.into(),
                method,
                points,
                extra: Map::new(),
            }),
        )
    }

    pub fn kind(&self) -> ActivityKind {
        self.details.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_activity_kind_parse() {
        assert_eq!("review".parse::<ActivityKind>().unwrap(), ActivityKind::Review);
        assert!("upvote".parse::<ActivityKind>().is_err());
    }

    #[test]
    fn test_details_from_json_keeps_unknown_fields() {
        let details = ActivityDetails::from_json(
            "backing",
            json!({ "amount": 12.5, "currency": "BOB", "tier": "gold" }),
        )
        .unwrap();

        match details {
            ActivityDetails::Backing(b) => {
                assert_eq!(b.amount, Some(12.5));
                assert_eq!(b.extra.get("tier"), Some(&json!("gold")));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_details_from_json_rejects_non_object() {
        let err = ActivityDetails::from_json("review", json!([1, 2])).unwrap_err();
        assert!(matches!(err, CuratorError::Validation(_)));
    }

    #[test]
    fn test_activity_serializes_type_tag() {
        let activity = Activity::share_award("u1", "share_1_ab", VerificationMethod::Manual, 10);
        let value = serde_json::to_value(&activity).unwrap();
        assert_eq!(value["details"]["type"], "share");
        assert_eq!(value["details"]["data"]["method"], "manual");
    }
}
