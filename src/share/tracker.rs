//! Share fingerprint tracker
//!
//! Issues share ids and attributes visits and clicks to them. The tracker
//! reports whether an award looks due but never changes verification or
//! award state itself; that is the verification engine's job.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::schemas::{ShareDoc, ShareEvent, ShareEventKind, VerificationMethod, VisitMetadata};
use crate::db::ShareStore;
use crate::share::heuristics::{self, Assessment, VerificationPolicy};
use crate::share::link::{build_share_url, new_share_id};
use crate::types::{CuratorError, Result};

/// Whether an incoming hit was a click on the link or a page visit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitKind {
    Click,
    #[default]
    Visit,
}

/// Incoming visit attributed to a share
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitInput {
    pub share_id: String,
    #[serde(default)]
    pub kind: VisitKind,
    #[serde(default)]
    pub ref_user_id: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub visitor_id: Option<String>,
}

impl VisitInput {
    pub fn new(share_id: impl Into<String>) -> Self {
        Self {
            share_id: share_id.into(),
            ..Default::default()
        }
    }

    pub fn with_ref(mut self, ref_user_id: impl Into<String>) -> Self {
        self.ref_user_id = Some(ref_user_id.into());
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_visitor(mut self, visitor_id: impl Into<String>) -> Self {
        self.visitor_id = Some(visitor_id.into());
        self
    }

    pub fn click(mut self) -> Self {
        self.kind = VisitKind::Click;
        self
    }

    fn into_event(self) -> ShareEvent {
        let meta = VisitMetadata {
            ref_user_id: self.ref_user_id,
            referrer: self.referrer,
            user_agent: self.user_agent,
            visitor_id: self.visitor_id,
            ..Default::default()
        };
        ShareEvent::now(match self.kind {
            VisitKind::Click => ShareEventKind::Click(meta),
            VisitKind::Visit => ShareEventKind::Visit(meta),
        })
    }
}

/// What the tracker learned from a visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitOutcome {
    /// The share id exists
    pub is_valid_share: bool,
    /// A heuristic fired and no award has been committed yet
    pub should_award_points: bool,
    /// Signal that fired, when one did
    pub method: Option<VerificationMethod>,
}

impl VisitOutcome {
    fn invalid() -> Self {
        Self {
            is_valid_share: false,
            should_award_points: false,
            method: None,
        }
    }
}

/// Share tracker over an injected store handle
#[derive(Clone)]
pub struct ShareTracker {
    store: Arc<dyn ShareStore>,
    policy: VerificationPolicy,
    public_base_url: String,
    own_host: Option<String>,
}

impl ShareTracker {
    pub fn new(store: Arc<dyn ShareStore>, policy: VerificationPolicy, public_base_url: &str) -> Self {
        Self {
            store,
            policy,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            own_host: heuristics::url_host(public_base_url),
        }
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    /// Host share links point at; its referrers are internal
    pub fn own_host(&self) -> Option<&str> {
        self.own_host.as_deref()
    }

    /// Issue a new share for `user_id` on `project_id`
    pub async fn create_share(&self, user_id: &str, project_id: &str) -> Result<ShareDoc> {
        let user_id = user_id.trim();
        let project_id = project_id.trim();
        if user_id.is_empty() {
            return Err(CuratorError::Validation("user_id must not be empty".into()));
        }
        if project_id.is_empty() {
            return Err(CuratorError::Validation("project_id must not be empty".into()));
        }

        let share_id = new_share_id();
        let share_url = build_share_url(&self.public_base_url, project_id, &share_id, user_id);
        let share = ShareDoc::new(share_id, user_id.to_string(), project_id.to_string(), share_url);

        let share = self.store.insert_share(share).await?;
        info!(share_id = %share.share_id, user_id, project_id, "Share created");
        Ok(share)
    }

    pub async fn get_share(&self, share_id: &str) -> Result<ShareDoc> {
        self.store
            .find_share(share_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("no share '{}'", share_id)))
    }

    /// Attribute a visit to its share and report whether an award is due
    ///
    /// Unknown share ids are not an error; the visit is dropped and the
    /// outcome says the share is invalid.
    pub async fn record_visit(&self, visit: VisitInput) -> Result<VisitOutcome> {
        let share_id = visit.share_id.trim().to_string();
        if share_id.is_empty() {
            return Ok(VisitOutcome::invalid());
        }

        if !self.store.push_share_event(&share_id, visit.into_event()).await? {
            debug!(share_id = %share_id, "Visit for unknown share dropped");
            return Ok(VisitOutcome::invalid());
        }

        // Re-read so the assessment sees this visit and any concurrent ones
        let Some(share) = self.store.find_share(&share_id).await? else {
            return Ok(VisitOutcome::invalid());
        };

        let (should_award_points, method) =
            match heuristics::assess(&share, Utc::now(), &self.policy, self.own_host()) {
                Assessment::Verify(method) => (true, Some(method)),
                Assessment::AlreadyVerified => (!share.points_awarded, share.verification_method),
                Assessment::ManualReview | Assessment::Pending => (false, None),
            };

        debug!(share_id = %share_id, should_award_points, ?method, "Visit recorded");

        Ok(VisitOutcome {
            is_valid_share: true,
            should_award_points,
            method,
        })
    }
}
