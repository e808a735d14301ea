//! Share verification engine
//!
//! Runs the heuristic chain against a share and commits the outcome:
//!
//! 1. `verified` false→true, with the verification event in the same write
//! 2. one `share` activity on the VCA of the share's project, appended only
//!    if the log does not already credit the share
//! 3. `points_awarded` false→true, the single commit point for the award
//!
//! Both flips are conditional updates and the credit is keyed by share id,
//! so a sweep racing an interactive verification (or another process) can
//! never award twice, and a failed step is retried by the next sweep. Within one
//! process a single-flight guard keeps two tasks from evaluating the same
//! share at once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::db::schemas::{
    Activity, ShareDoc, ShareEvent, ShareEventKind, VcaDoc, VerificationMethod,
};
use crate::db::ShareStore;
use crate::share::heuristics::{self, Assessment};
use crate::share::tracker::{ShareTracker, VisitInput, VisitOutcome};
use crate::types::{CuratorError, Result};
use crate::vca::VcaService;

/// Points credited per verified share
pub const DEFAULT_SHARE_POINTS: u64 = 10;

/// Result of evaluating one share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// This call verified the share
    Verified {
        method: VerificationMethod,
        awarded: bool,
    },
    /// Verified earlier; `awarded_now` is set when this call completed an
    /// interrupted award
    AlreadyVerified { awarded_now: bool },
    /// Fallback window passed with fallback disabled
    FlaggedForReview,
    /// No signal yet
    Pending,
    /// Another task in this process is evaluating the share
    InFlight,
}

/// Counters from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    pub verified: usize,
    pub awarded: usize,
    pub flagged_for_review: usize,
    pub pending: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

/// Aggregate verification statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationStats {
    pub total: u64,
    pub verified: u64,
    pub pending: u64,
    /// `verified / total`, 0 when there are no shares
    pub verification_rate: f64,
    pub by_method: BTreeMap<String, u64>,
    pub points_awarded: u64,
    pub manual_review: u64,
}

/// Removes its share id from the in-flight set on drop
struct InFlightGuard {
    in_flight: Arc<DashMap<String, ()>>,
    share_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.share_id);
    }
}

/// Share verification engine
pub struct ShareVerifier {
    store: Arc<dyn ShareStore>,
    tracker: ShareTracker,
    vcas: VcaService,
    share_points: u64,
    in_flight: Arc<DashMap<String, ()>>,
}

impl ShareVerifier {
    pub fn new(
        store: Arc<dyn ShareStore>,
        tracker: ShareTracker,
        vcas: VcaService,
        share_points: u64,
    ) -> Self {
        Self {
            store,
            tracker,
            vcas,
            share_points,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn tracker(&self) -> &ShareTracker {
        &self.tracker
    }

    fn try_acquire(&self, share_id: &str) -> Option<InFlightGuard> {
        match self.in_flight.entry(share_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(v) => {
                v.insert(());
                Some(InFlightGuard {
                    in_flight: self.in_flight.clone(),
                    share_id: share_id.to_string(),
                })
            }
        }
    }

    /// Record a visit and, when the tracker signals an award, verify the share
    pub async fn process_visit(
        &self,
        visit: VisitInput,
    ) -> Result<(VisitOutcome, Option<VerifyOutcome>)> {
        let share_id = visit.share_id.clone();
        let outcome = self.tracker.record_visit(visit).await?;
        if !outcome.should_award_points {
            return Ok((outcome, None));
        }
        let verified = self.verify_share(&share_id).await?;
        Ok((outcome, Some(verified)))
    }

    /// Run the heuristic chain against one share and commit the result
    pub async fn verify_share(&self, share_id: &str) -> Result<VerifyOutcome> {
        let Some(_guard) = self.try_acquire(share_id) else {
            debug!(share_id, "Share already being verified");
            return Ok(VerifyOutcome::InFlight);
        };

        let share = self.tracker.get_share(share_id).await?;
        let policy = self.tracker.policy();

        match heuristics::assess(&share, Utc::now(), policy, self.tracker.own_host()) {
            Assessment::AlreadyVerified => {
                let awarded_now = self.complete_award(&share).await?;
                Ok(VerifyOutcome::AlreadyVerified { awarded_now })
            }
            Assessment::Verify(method) => {
                let events = vec![ShareEvent::now(ShareEventKind::ShareVerified { method })];
                self.commit(&share, method, events).await
            }
            Assessment::ManualReview => {
                let event = ShareEvent::now(ShareEventKind::ManualReviewRequired {
                    reason: format!(
                        "no corroborating visits after {} hours and fallback disabled",
                        policy.fallback_after.num_hours()
                    ),
                });
                if self.store.flag_manual_review(share_id, event).await? {
                    info!(share_id, "Share flagged for manual review");
                }
                Ok(VerifyOutcome::FlaggedForReview)
            }
            Assessment::Pending => Ok(VerifyOutcome::Pending),
        }
    }

    /// Admin override: verify regardless of the heuristics
    pub async fn manually_verify_share(
        &self,
        share_id: &str,
        admin_id: &str,
        evidence_url: Option<&str>,
    ) -> Result<VerifyOutcome> {
        if admin_id.trim().is_empty() {
            return Err(CuratorError::Validation("admin_id must not be empty".into()));
        }
        let evidence_url = evidence_url.map(str::trim).filter(|u| !u.is_empty());
        if let Some(url) = evidence_url {
            if heuristics::url_host(url).is_none() {
                return Err(CuratorError::Validation(format!(
                    "evidence_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }

        let share = self.tracker.get_share(share_id).await?;
        if share.verified {
            let awarded_now = self.complete_award(&share).await?;
            return Ok(VerifyOutcome::AlreadyVerified { awarded_now });
        }

        let method = VerificationMethod::Manual;
        let events = vec![
            ShareEvent::now(ShareEventKind::ManualVerification {
                admin_id: admin_id.to_string(),
                evidence_url: evidence_url.map(str::to_string),
            }),
            ShareEvent::now(ShareEventKind::ShareVerified { method }),
        ];
        info!(share_id, admin_id, evidence_url, "Manual share verification");
        self.commit(&share, method, events).await
    }

    /// Flip `verified`, then award
    async fn commit(
        &self,
        share: &ShareDoc,
        method: VerificationMethod,
        events: Vec<ShareEvent>,
    ) -> Result<VerifyOutcome> {
        if !self
            .store
            .mark_share_verified(&share.share_id, method, events)
            .await?
        {
            // Lost the race to another verifier; finish its award if needed
            let current = self.tracker.get_share(&share.share_id).await?;
            let awarded_now = self.complete_award(&current).await?;
            return Ok(VerifyOutcome::AlreadyVerified { awarded_now });
        }

        info!(share_id = %share.share_id, %method, "Share verified");
        let awarded = self.award(share, method).await?;
        Ok(VerifyOutcome::Verified { method, awarded })
    }

    /// Award a share that is verified but has no committed award yet
    async fn complete_award(&self, share: &ShareDoc) -> Result<bool> {
        if !share.verified || share.points_awarded {
            return Ok(false);
        }
        let method = share
            .verification_method
            .unwrap_or(VerificationMethod::Manual);
        warn!(share_id = %share.share_id, %method, "Completing interrupted share award");
        self.award(share, method).await
    }

    /// Record the award on the project's VCA, then commit it on the share
    ///
    /// The VCA credit is keyed by share id, so a retry after a failed or lost
    /// commit finds the credit already present and only flips the share.
    async fn award(&self, share: &ShareDoc, method: VerificationMethod) -> Result<bool> {
        let vca = self.project_vca(&share.project_id).await?;

        match &vca {
            Some(vca) => {
                let activity = Activity::share_award(
                    share.user_id.clone(),
                    share.share_id.clone(),
                    method,
                    self.share_points,
                );
                if !self.vcas.add_share_credit(&vca.address, activity).await? {
                    debug!(
                        share_id = %share.share_id,
                        address = %vca.address,
                        "VCA already credits share"
                    );
                }
            }
            None => warn!(
                share_id = %share.share_id,
                project_id = %share.project_id,
                "No VCA for project; award recorded on the share only"
            ),
        }

        let event = ShareEvent::now(ShareEventKind::PointsAwarded {
            points: self.share_points,
            vca_address: vca.map(|v| v.address),
        });
        if !self.store.mark_points_awarded(&share.share_id, event).await? {
            debug!(share_id = %share.share_id, "Award already committed");
            return Ok(false);
        }

        info!(
            share_id = %share.share_id,
            user_id = %share.user_id,
            points = self.share_points,
            %method,
            "Share points awarded"
        );
        Ok(true)
    }

    /// VCA for a project id, falling back to a slug match
    async fn project_vca(&self, project_id: &str) -> Result<Option<VcaDoc>> {
        match self.vcas.get_vca_by_project(project_id).await {
            Ok(vca) => return Ok(Some(vca)),
            Err(CuratorError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.vcas.get_vca_by_slug(project_id).await {
            Ok(vca) => Ok(Some(vca)),
            Err(CuratorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Evaluate every share without a committed award
    ///
    /// Per-share failures are logged and counted; they never stop the sweep.
    pub async fn verify_pending_shares(&self) -> Result<SweepReport> {
        let start = Instant::now();
        let shares = self.store.list_unsettled_shares().await?;
        let mut report = SweepReport::default();

        for share in shares {
            report.examined += 1;
            match self.verify_share(&share.share_id).await {
                Ok(VerifyOutcome::Verified { awarded, .. }) => {
                    report.verified += 1;
                    if awarded {
                        report.awarded += 1;
                    }
                }
                Ok(VerifyOutcome::AlreadyVerified { awarded_now }) => {
                    if awarded_now {
                        report.awarded += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                Ok(VerifyOutcome::FlaggedForReview) => report.flagged_for_review += 1,
                Ok(VerifyOutcome::Pending) => report.pending += 1,
                Ok(VerifyOutcome::InFlight) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(share_id = %share.share_id, error = %e, "Share verification failed");
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            examined = report.examined,
            verified = report.verified,
            awarded = report.awarded,
            flagged = report.flagged_for_review,
            errors = report.errors,
            duration_ms = report.duration_ms,
            "Verification sweep complete"
        );
        Ok(report)
    }

    pub async fn verification_stats(&self) -> Result<VerificationStats> {
        let counts = self.store.share_counts().await?;
        let verification_rate = if counts.total == 0 {
            0.0
        } else {
            counts.verified as f64 / counts.total as f64
        };
        Ok(VerificationStats {
            total: counts.total,
            verified: counts.verified,
            pending: counts.total - counts.verified,
            verification_rate,
            by_method: counts
                .by_method
                .into_iter()
                .map(|(method, n)| (method.as_str().to_string(), n))
                .collect(),
            points_awarded: counts.points_awarded,
            manual_review: counts.manual_review,
        })
    }
}

/// Run the verification sweep on a fixed interval
pub fn spawn_verification_sweep(
    verifier: Arc<ShareVerifier>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = verifier.verify_pending_shares().await {
                error!(error = %e, "Verification sweep failed");
            }
        }
    })
}
