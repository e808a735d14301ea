//! VCA lifecycle: issuance, contract mapping, activity log and approval

use std::sync::Arc;

use futures_util::future::join_all;
use tokio_test::{assert_err, assert_ok};

use curator::db::schemas::{Activity, ActivityDetails, BackingDetails, ProjectStatus};
use curator::db::MemoryStore;
use curator::vca::{
    AddressCodec, ProjectApproval, ProjectSubmission, VcaRegistry, VcaService,
    VCA_FAILURE_ANNOTATION,
};
use curator::CuratorError;

const CONTRACT_A: &str = "0x1111111111111111111111111111111111111111";
const CONTRACT_B: &str = "0x2222222222222222222222222222222222222222";

fn service(store: Arc<MemoryStore>) -> VcaService {
    VcaService::new(VcaRegistry::new(store, AddressCodec::default()))
}

fn backing(user: &str, amount: f64) -> Activity {
    Activity::new(
        user,
        ActivityDetails::Backing(BackingDetails {
            amount: Some(amount),
            currency: Some("USD".into()),
            ..Default::default()
        }),
    )
}

#[tokio::test]
async fn test_create_map_and_read_back() {
    let vcas = service(Arc::new(MemoryStore::new()));

    let vca = vcas.create_vca("VaderAI", "user-42").await.unwrap();
    assert!(AddressCodec::is_valid_address(&vca.address));
    assert_eq!(vca.slug, "vaderai");
    assert_eq!(vca.owner, "user-42");
    assert!(vca.mapped_contract.is_none());

    assert_eq!(vcas.get_vca_by_slug("vaderai").await.unwrap().address, vca.address);

    let mapped = vcas.map_to_contract(&vca.address, CONTRACT_A).await.unwrap();
    assert_eq!(mapped.mapped_contract.as_deref(), Some(CONTRACT_A));

    let mapping = vcas.get_mapping(&vca.address).await.unwrap();
    assert_eq!(mapping.slug, "vaderai");
    assert_eq!(mapping.mapped_contract.as_deref(), Some(CONTRACT_A));
    assert!(mapping.mapped_at.is_some());
}

#[tokio::test]
async fn test_remapping_requires_explicit_overwrite() {
    let vcas = service(Arc::new(MemoryStore::new()));
    let vca = vcas.create_vca("vaderai", "user-42").await.unwrap();

    assert_ok!(vcas.map_to_contract(&vca.address, CONTRACT_A).await);

    // Same contract again is a no-op
    assert_ok!(vcas.map_to_contract(&vca.address, CONTRACT_A).await);

    let err = vcas.map_to_contract(&vca.address, CONTRACT_B).await.unwrap_err();
    assert!(matches!(err, CuratorError::Conflict(_)));
    assert_eq!(
        vcas.get_mapping(&vca.address).await.unwrap().mapped_contract.as_deref(),
        Some(CONTRACT_A)
    );

    let remapped = vcas.remap(&vca.address, CONTRACT_B).await.unwrap();
    assert_eq!(remapped.mapped_contract.as_deref(), Some(CONTRACT_B));
}

#[tokio::test]
async fn test_duplicate_slug_is_conflict() {
    let vcas = service(Arc::new(MemoryStore::new()));
    vcas.create_vca("vaderai", "user-42").await.unwrap();

    let err = assert_err!(vcas.create_vca("VADERAI", "user-7").await);
    assert!(matches!(err, CuratorError::Conflict(_)));
}

#[tokio::test]
async fn test_unknown_lookups_are_not_found() {
    let vcas = service(Arc::new(MemoryStore::new()));

    assert!(matches!(
        vcas.get_vca_by_slug("nobody").await,
        Err(CuratorError::NotFound(_))
    ));

    let unknown = AddressCodec::default().derive("nobody", 0).unwrap();
    assert!(matches!(vcas.get_vca(&unknown).await, Err(CuratorError::NotFound(_))));
    assert!(matches!(
        vcas.add_activity(&unknown, backing("u1", 5.0)).await,
        Err(CuratorError::NotFound(_))
    ));

    assert!(matches!(
        vcas.get_vca("0xnothex").await,
        Err(CuratorError::InvalidAddressFormat(_))
    ));
}

#[tokio::test]
async fn test_upper_case_address_reaches_stored_vca() {
    let vcas = service(Arc::new(MemoryStore::new()));
    let vca = vcas.create_vca("vaderai", "user-42").await.unwrap();
    let shouted = format!("0x{}", vca.address[2..].to_uppercase());
    assert_ne!(shouted, vca.address);

    assert_eq!(vcas.get_vca(&shouted).await.unwrap().address, vca.address);
    assert_ok!(vcas.add_activity(&shouted, backing("u1", 5.0)).await);

    let contract = format!("0x{}", CONTRACT_A[2..].to_uppercase().replace('1', "A"));
    let mapped = vcas.map_to_contract(&shouted, &contract).await.unwrap();
    assert_eq!(mapped.mapped_contract, Some(contract.to_ascii_lowercase()));

    let mapping = vcas.get_mapping(&shouted).await.unwrap();
    assert_eq!(mapping.address, vca.address);
    assert_eq!(vcas.get_activities(&vca.address, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_store_outage_is_not_reported_as_missing() {
    let store = Arc::new(MemoryStore::new());
    let vcas = service(store.clone());
    store.set_offline(true);

    let err = vcas.get_vca_by_slug("vaderai").await.unwrap_err();
    assert!(matches!(err, CuratorError::TransientStore(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_concurrent_activity_appends_are_not_lost() {
    let vcas = service(Arc::new(MemoryStore::new()));
    let vca = vcas.create_vca("vaderai", "user-42").await.unwrap();

    let writes = (0..50).map(|i| {
        let vcas = vcas.clone();
        let address = vca.address.clone();
        tokio::spawn(async move {
            vcas.add_activity(&address, backing(&format!("backer-{}", i), i as f64))
                .await
        })
    });
    for result in join_all(writes).await {
        result.unwrap().unwrap();
    }

    let stored = vcas.get_vca(&vca.address).await.unwrap();
    assert_eq!(stored.activities.len(), 50);

    let recent = vcas.get_activities(&vca.address, 10).await.unwrap();
    assert_eq!(recent.len(), 10);
    assert_eq!(recent[0], stored.activities[49]);
}

#[tokio::test]
async fn test_approval_issues_and_reuses_vca() {
    let store = Arc::new(MemoryStore::new());
    let approval = ProjectApproval::new(store.clone(), service(store.clone()));
    let submission = ProjectSubmission {
        project_id: "p-vader".into(),
        slug: "VaderAI".into(),
        owner: "user-42".into(),
    };

    let first = approval.approve_project(&submission, "admin-1").await.unwrap();
    assert!(!first.vca_failed());
    let vca = first.vca.unwrap();
    assert_eq!(vca.project_id.as_deref(), Some("p-vader"));
    assert_eq!(first.review.status, ProjectStatus::Approved);
    assert_eq!(first.review.vca_address.as_deref(), Some(vca.address.as_str()));

    // Approving again reuses the owner's VCA
    let second = approval.approve_project(&submission, "admin-2").await.unwrap();
    assert_eq!(second.vca.unwrap().address, vca.address);

    let review = approval.get_review("p-vader").await.unwrap();
    assert_eq!(review.reviewed_by, "admin-2");
}

#[tokio::test]
async fn test_approval_survives_vca_failure() {
    let vca_store = Arc::new(MemoryStore::new());
    let project_store = Arc::new(MemoryStore::new());
    vca_store.set_offline(true);

    let approval = ProjectApproval::new(project_store, service(vca_store));
    let submission = ProjectSubmission {
        project_id: "p-vader".into(),
        slug: "vaderai".into(),
        owner: "user-42".into(),
    };

    let outcome = approval.approve_project(&submission, "admin-1").await.unwrap();
    assert!(outcome.vca_failed());
    assert_eq!(outcome.review.status, ProjectStatus::Approved);
    assert!(outcome.review.vca_address.is_none());
    assert!(outcome
        .review
        .annotation
        .as_deref()
        .unwrap()
        .starts_with(VCA_FAILURE_ANNOTATION));

    let stored = approval.get_review("p-vader").await.unwrap();
    assert_eq!(stored.status, ProjectStatus::Approved);
}

#[tokio::test]
async fn test_rejection_issues_no_vca() {
    let store = Arc::new(MemoryStore::new());
    let vcas = service(store.clone());
    let approval = ProjectApproval::new(store, vcas.clone());

    let review = approval
        .reject_project("p-spam", "admin-1", Some("duplicate submission"))
        .await
        .unwrap();
    assert_eq!(review.status, ProjectStatus::Rejected);
    assert!(matches!(
        vcas.get_vca_by_project("p-spam").await,
        Err(CuratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_rejection_requires_admin() {
    let store = Arc::new(MemoryStore::new());
    let approval = ProjectApproval::new(store.clone(), service(store));

    for admin in ["", "   "] {
        let err = assert_err!(approval.reject_project("p-spam", admin, None).await);
        assert!(matches!(err, CuratorError::Validation(_)));
    }
    // Nothing was recorded
    assert!(matches!(
        approval.get_review("p-spam").await,
        Err(CuratorError::NotFound(_))
    ));
}
