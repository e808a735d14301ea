//! Virtual contract addresses
//!
//! - **AddressCodec**: deterministic address derivation and format checks
//! - **VcaRegistry**: store-backed CRUD and queries
//! - **VcaService**: public operations for the route layer
//! - **ProjectApproval**: issues a VCA when an admin approves a project

pub mod address;
pub mod approval;
pub mod registry;
pub mod service;

pub use address::{AddressCodec, ADDRESS_HEX_LEN, ADDRESS_PREFIX};
pub use approval::{ApprovalOutcome, ProjectApproval, ProjectSubmission, VCA_FAILURE_ANNOTATION};
pub use registry::VcaRegistry;
pub use service::{ContractMapping, VcaService};
