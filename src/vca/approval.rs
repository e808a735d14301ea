//! Project approval hook
//!
//! Approval and VCA issuance are decoupled: the project is always recorded
//! as approved, and a failed issuance is kept as an annotation on the review
//! record instead of failing or rolling back the approval.

use std::sync::Arc;

use bson::DateTime;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::db::schemas::{ProjectReviewDoc, ProjectStatus, VcaDoc};
use crate::db::ProjectStore;
use crate::types::{CuratorError, Result};
use crate::vca::VcaService;

/// Annotation prefix written when issuance fails
pub const VCA_FAILURE_ANNOTATION: &str = "VCA creation failed";

/// Project submitted for review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSubmission {
    pub project_id: String,
    pub slug: String,
    pub owner: String,
}

/// Result of an approval
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub review: ProjectReviewDoc,
    /// Issued or reused VCA; `None` when issuance failed
    pub vca: Option<VcaDoc>,
}

impl ApprovalOutcome {
    pub fn vca_failed(&self) -> bool {
        self.vca.is_none()
    }
}

/// Approval workflow
pub struct ProjectApproval {
    projects: Arc<dyn ProjectStore>,
    vcas: VcaService,
}

impl ProjectApproval {
    pub fn new(projects: Arc<dyn ProjectStore>, vcas: VcaService) -> Self {
        Self { projects, vcas }
    }

    /// Approve a project and issue its VCA
    ///
    /// Fails only on invalid input or when the approval itself cannot be
    /// recorded.
    pub async fn approve_project(
        &self,
        submission: &ProjectSubmission,
        admin_id: &str,
    ) -> Result<ApprovalOutcome> {
        if submission.project_id.trim().is_empty() {
            return Err(CuratorError::Validation("project_id must not be empty".into()));
        }
        if admin_id.trim().is_empty() {
            return Err(CuratorError::Validation("admin_id must not be empty".into()));
        }

        let issued = self.issue_vca(submission).await;

        let (vca, annotation) = match issued {
            Ok(vca) => (Some(vca), None),
            Err(e) => {
                warn!(
                    project_id = %submission.project_id,
                    slug = %submission.slug,
                    error = %e,
                    "VCA issuance failed, approving without VCA"
                );
                (None, Some(format!("{}: {}", VCA_FAILURE_ANNOTATION, e)))
            }
        };

        let review = ProjectReviewDoc {
            project_id: submission.project_id.clone(),
            status: ProjectStatus::Approved,
            reviewed_by: admin_id.to_string(),
            reviewed_at: Some(DateTime::now()),
            vca_address: vca.as_ref().map(|v| v.address.clone()),
            annotation,
            ..Default::default()
        };

        self.projects.record_review(review.clone()).await.map_err(|e| {
            error!(project_id = %submission.project_id, error = %e, "Failed to record approval");
            CuratorError::from(e)
        })?;

        info!(
            project_id = %submission.project_id,
            admin_id,
            vca = ?review.vca_address,
            "Project approved"
        );

        Ok(ApprovalOutcome { review, vca })
    }

    /// Reuse the slug's VCA when the same owner already holds it
    async fn issue_vca(&self, submission: &ProjectSubmission) -> Result<VcaDoc> {
        match self.vcas.get_vca_by_slug(&submission.slug).await {
            Ok(existing) if existing.owner == submission.owner.trim() => return Ok(existing),
            Ok(existing) => {
                return Err(CuratorError::Conflict(format!(
                    "slug '{}' belongs to VCA {} of another owner",
                    existing.slug, existing.address
                )))
            }
            Err(CuratorError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.vcas
            .create_vca_for_project(&submission.project_id, &submission.slug, &submission.owner)
            .await
    }

    /// Reject a project; no VCA is issued
    pub async fn reject_project(
        &self,
        project_id: &str,
        admin_id: &str,
        reason: Option<&str>,
    ) -> Result<ProjectReviewDoc> {
        if project_id.trim().is_empty() {
            return Err(CuratorError::Validation("project_id must not be empty".into()));
        }
        if admin_id.trim().is_empty() {
            return Err(CuratorError::Validation("admin_id must not be empty".into()));
        }

        let review = ProjectReviewDoc {
            project_id: project_id.to_string(),
            status: ProjectStatus::Rejected,
            reviewed_by: admin_id.to_string(),
            reviewed_at: Some(DateTime::now()),
            annotation: reason.map(str::to_string),
            ..Default::default()
        };
        self.projects.record_review(review.clone()).await?;
        info!(project_id, admin_id, "Project rejected");
        Ok(review)
    }

    pub async fn get_review(&self, project_id: &str) -> Result<ProjectReviewDoc> {
        self.projects
            .find_review(project_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("no review for project '{}'", project_id)))
    }
}
