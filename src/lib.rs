//! Curator - virtual contract addresses and verified share rewards
//!
//! Curator issues each approved project a virtual contract address (VCA)
//! before it has a real on-chain contract, records community activity
//! against that address, and rewards users for sharing projects once a
//! share has been verified.
//!
//! ## Components
//!
//! - **VCA**: address derivation, registry, contract mapping and activity log
//! - **Approval**: issues a VCA when an admin approves a project
//! - **Share tracker**: share links and visit attribution
//! - **Verifier**: heuristic verification and the one-time point award
//! - **Store**: MongoDB collections, with an in-memory store for dev mode

pub mod config;
pub mod db;
pub mod share;
pub mod types;
pub mod vca;

pub use config::Args;
pub use types::{CuratorError, Result};
