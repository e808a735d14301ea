//! Database schemas for Curator
//!
//! Defines MongoDB document structures for VCAs, share records and project
//! review outcomes.

mod metadata;
mod project;
mod share;
mod vca;

pub use metadata::Metadata;
pub use project::{ProjectReviewDoc, ProjectStatus, PROJECT_REVIEW_COLLECTION};
pub use share::{
    ShareDoc, ShareEvent, ShareEventKind, VerificationMethod, VisitMetadata, SHARE_COLLECTION,
};
pub use vca::{
    Activity, ActivityDetails, ActivityKind, BackingDetails, ReviewDetails, ShareCredit, VcaDoc,
    VCA_COLLECTION,
};
