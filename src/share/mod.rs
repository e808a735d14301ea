//! Share tracking and verification
//!
//! - **link**: share URL construction and query parameter parsing
//! - **heuristics**: pure verification decision over a share record
//! - **ShareTracker**: issues shares and attributes visits
//! - **ShareVerifier**: commits verification and the one-time award

pub mod heuristics;
pub mod link;
pub mod tracker;
pub mod verifier;

pub use heuristics::{assess, Assessment, VerificationPolicy, VisitSummary};
pub use link::{build_share_url, new_share_id, ShareLinkParams, REF_PARAM, SHARE_PARAM};
pub use tracker::{ShareTracker, VisitInput, VisitKind, VisitOutcome};
pub use verifier::{
    spawn_verification_sweep, ShareVerifier, SweepReport, VerificationStats, VerifyOutcome,
    DEFAULT_SHARE_POINTS,
};
