//! Shared error type for Curator
//!
//! Every public operation returns [`CuratorError`] so the route layer can map
//! failures onto the right status code without inspecting messages.

use crate::db::StoreError;

/// Error kinds surfaced by the VCA and share services
#[derive(Debug, Clone, thiserror::Error)]
pub enum CuratorError {
    /// Malformed or missing input (caller's fault)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation or state conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend unreachable, timed out or returned garbage
    #[error("Store error: {0}")]
    TransientStore(String),

    /// Address failed the format check
    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),
}

impl CuratorError {
    /// HTTP-equivalent status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CuratorError::Validation(_) => 400,
            CuratorError::InvalidAddressFormat(_) => 400,
            CuratorError::NotFound(_) => 404,
            CuratorError::Conflict(_) => 409,
            CuratorError::TransientStore(_) => 500,
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, CuratorError::TransientStore(_))
    }
}

impl From<StoreError> for CuratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { field, value } => {
                CuratorError::Conflict(format!("{} '{}' already exists", field, value))
            }
            StoreError::Transient(msg) => CuratorError::TransientStore(msg),
            StoreError::Serialization(msg) => {
                CuratorError::TransientStore(format!("serialization: {}", msg))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CuratorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ConflictField;

    #[test]
    fn test_status_codes() {
        assert_eq!(CuratorError::Validation("x".into()).status_code(), 400);
        assert_eq!(CuratorError::NotFound("x".into()).status_code(), 404);
        assert_eq!(CuratorError::Conflict("x".into()).status_code(), 409);
        assert_eq!(CuratorError::TransientStore("x".into()).status_code(), 500);
        assert_eq!(CuratorError::InvalidAddressFormat("x".into()).status_code(), 400);
    }

    #[test]
    fn test_store_error_kind_preserved() {
        let conflict: CuratorError = StoreError::Conflict {
            field: ConflictField::Slug,
            value: "vaderai".into(),
        }
        .into();
        assert!(matches!(conflict, CuratorError::Conflict(_)));

        let transient: CuratorError = StoreError::Transient("timeout".into()).into();
        assert!(matches!(transient, CuratorError::TransientStore(_)));
        assert!(transient.is_retryable());
    }
}
