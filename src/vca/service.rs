//! VCA service
//!
//! Public operations consumed by the route layer. Input and address-format
//! checks run before any store round-trip; "absent" always comes back as
//! [`CuratorError::NotFound`], never as a store error or an empty success.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::schemas::{Activity, ActivityDetails, VcaDoc};
use crate::db::{ConflictField, PatchOutcome, StoreError, VcaPatch};
use crate::types::{CuratorError, Result};
use crate::vca::{AddressCodec, VcaRegistry};

/// Contract mapping view of a VCA
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractMapping {
    pub address: String,
    pub slug: String,
    pub mapped_contract: Option<String>,
    pub mapped_at: Option<bson::DateTime>,
}

/// VCA orchestration
#[derive(Clone)]
pub struct VcaService {
    registry: VcaRegistry,
}

impl VcaService {
    pub fn new(registry: VcaRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &VcaRegistry {
        &self.registry
    }

    /// Issue a VCA for `slug`; a reused slug is a `Conflict`
    pub async fn create_vca(&self, slug: &str, owner: &str) -> Result<VcaDoc> {
        self.create(None, slug, owner).await
    }

    /// Issue a VCA tied to a project
    pub async fn create_vca_for_project(
        &self,
        project_id: &str,
        slug: &str,
        owner: &str,
    ) -> Result<VcaDoc> {
        if project_id.trim().is_empty() {
            return Err(CuratorError::Validation("project_id must not be empty".into()));
        }
        self.create(Some(project_id), slug, owner).await
    }

    async fn create(&self, project_id: Option<&str>, slug: &str, owner: &str) -> Result<VcaDoc> {
        let slug = AddressCodec::normalize_slug(slug);
        let owner = owner.trim();
        if slug.is_empty() {
            return Err(CuratorError::Validation("slug must not be empty".into()));
        }
        if owner.is_empty() {
            return Err(CuratorError::Validation("owner must not be empty".into()));
        }

        let mut nonce = 0;
        loop {
            let (address, used) = self.registry.allocate_address(&slug, nonce).await?;

            let mut vca = VcaDoc::new(address.clone(), slug.clone(), owner.to_string());
            if let Some(project_id) = project_id {
                vca = vca.with_project(project_id);
            }

            match self.registry.insert(vca).await {
                Ok(created) => {
                    info!(
                        address = %created.address,
                        slug = %created.slug,
                        owner = %created.owner,
                        project_id = ?created.project_id,
                        "VCA created"
                    );
                    return Ok(created);
                }
                // Another request took this address between the existence
                // check and the insert; move on to the next nonce
                Err(StoreError::Conflict {
                    field: ConflictField::Address,
                    ..
                }) => {
                    warn!(slug = %slug, address = %address, "Address taken during insert, retrying");
                    nonce = used + 1;
                    if nonce >= self.registry.codec().max_attempts() {
                        return Err(self.registry.codec().exhausted(&slug));
                    }
                }
                Err(StoreError::Conflict {
                    field: ConflictField::Slug,
                    ..
                }) => {
                    return Err(CuratorError::Conflict(format!(
                        "slug '{}' is already mapped to a VCA",
                        slug
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Map a VCA to its deployed contract
    ///
    /// Mapping is set-once: a second call with the same contract succeeds
    /// unchanged, a different contract is a `Conflict`. Use [`Self::remap`] to
    /// overwrite.
    pub async fn map_to_contract(&self, address: &str, contract_address: &str) -> Result<VcaDoc> {
        self.apply_mapping(address, contract_address, false).await
    }

    /// Overwrite the contract mapping
    pub async fn remap(&self, address: &str, contract_address: &str) -> Result<VcaDoc> {
        self.apply_mapping(address, contract_address, true).await
    }

    async fn apply_mapping(
        &self,
        address: &str,
        contract_address: &str,
        overwrite: bool,
    ) -> Result<VcaDoc> {
        let address = AddressCodec::canonical(address)?;
        let address = address.as_str();
        let contract_address = AddressCodec::canonical(contract_address)?;
        let contract_address = contract_address.as_str();

        let patch = VcaPatch::MapContract {
            contract: contract_address.to_string(),
            overwrite,
        };

        match self.registry.update(address, patch).await? {
            PatchOutcome::Applied => {
                info!(address, contract = contract_address, overwrite, "VCA mapped to contract");
                self.get_vca(address).await
            }
            PatchOutcome::NotFound => Err(not_found(address)),
            PatchOutcome::PreconditionFailed => {
                let current = self.get_vca(address).await?;
                match current.mapped_contract.as_deref() {
                    Some(existing) if existing.eq_ignore_ascii_case(contract_address) => Ok(current),
                    Some(existing) => {
                        warn!(address, existing, requested = contract_address, "Re-map rejected");
                        Err(CuratorError::Conflict(format!(
                            "VCA {} is already mapped to {}",
                            address, existing
                        )))
                    }
                    // Mapping vanished between the update and the read; treat as a lost race
                    None => Err(CuratorError::Conflict(format!(
                        "VCA {} mapping changed concurrently, retry",
                        address
                    ))),
                }
            }
        }
    }

    /// Append an activity to a VCA's log
    pub async fn add_activity(&self, address: &str, activity: Activity) -> Result<()> {
        let address = AddressCodec::canonical(address)?;
        let address = address.as_str();
        if activity.user_id.trim().is_empty() {
            return Err(CuratorError::Validation("activity user_id must not be empty".into()));
        }

        let kind = activity.kind();
        match self
            .registry
            .update(address, VcaPatch::AppendActivity(activity))
            .await?
        {
            PatchOutcome::Applied => {
                info!(address, %kind, "Activity recorded");
                Ok(())
            }
            PatchOutcome::NotFound | PatchOutcome::PreconditionFailed => Err(not_found(address)),
        }
    }

    /// Record a share award on a VCA at most once per share
    ///
    /// Returns `false` when the log already credits the share, so a retried
    /// award never appends a second entry.
    pub async fn add_share_credit(&self, address: &str, activity: Activity) -> Result<bool> {
        let address = AddressCodec::canonical(address)?;
        let address = address.as_str();
        let share_id = match &activity.details {
            ActivityDetails::Share(credit) => credit.share_id.clone(),
            _ => {
                return Err(CuratorError::Validation(format!(
                    "expected a share activity, got {}",
                    activity.kind()
                )))
            }
        };
        if share_id.trim().is_empty() || activity.user_id.trim().is_empty() {
            return Err(CuratorError::Validation(
                "share credit needs a share_id and user_id".into(),
            ));
        }

        let patch = VcaPatch::AppendShareCredit {
            share_id: share_id.clone(),
            activity,
        };
        match self.registry.update(address, patch).await? {
            PatchOutcome::Applied => {
                info!(address, share_id = %share_id, "Share credit recorded");
                Ok(true)
            }
            PatchOutcome::PreconditionFailed => {
                debug!(address, share_id = %share_id, "Share already credited");
                Ok(false)
            }
            PatchOutcome::NotFound => Err(not_found(address)),
        }
    }

    pub async fn get_vca(&self, address: &str) -> Result<VcaDoc> {
        let address = AddressCodec::canonical(address)?;
        self.registry
            .get_by_address(&address)
            .await?
            .ok_or_else(|| not_found(&address))
    }

    pub async fn get_vca_by_slug(&self, slug: &str) -> Result<VcaDoc> {
        self.registry
            .get_by_slug(slug)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("no VCA for slug '{}'", slug.trim())))
    }

    pub async fn get_vca_by_project(&self, project_id: &str) -> Result<VcaDoc> {
        self.registry
            .get_by_project(project_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("no VCA for project '{}'", project_id)))
    }

    pub async fn get_mapping(&self, address: &str) -> Result<ContractMapping> {
        let vca = self.get_vca(address).await?;
        Ok(ContractMapping {
            address: vca.address,
            slug: vca.slug,
            mapped_contract: vca.mapped_contract,
            mapped_at: vca.mapped_at,
        })
    }

    pub async fn list_vcas(&self, limit: usize, offset: usize) -> Result<Vec<VcaDoc>> {
        Ok(self.registry.list(limit, offset).await?)
    }

    /// Most recent activities first
    pub async fn get_activities(&self, address: &str, limit: usize) -> Result<Vec<Activity>> {
        let vca = self.get_vca(address).await?;
        let limit = crate::vca::registry::clamp_limit(limit);
        Ok(vca.activities.into_iter().rev().take(limit).collect())
    }
}

fn not_found(address: &str) -> CuratorError {
    CuratorError::NotFound(format!("no VCA at address {}", address))
}
