//! Unified error types for the signer core.
//!
//! Every domain module defines its own `thiserror` enum; this module
//! aggregates them so screen-level code can handle one error type.

use thiserror::Error;

use crate::camera::CameraError;
use crate::entropy::EntropyError;
use crate::keys::KeyError;
use crate::qr::QrError;
use crate::router::RouteError;
use crate::sign::SignError;
use crate::storage::StorageError;
use crate::summary::SummaryError;
use crate::vault::VaultError;

/// Top-level error for signer operations.
#[derive(Error, Debug)]
pub enum SignerError {
    #[error(transparent)]
    Entropy(#[from] EntropyError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Qr(#[from] QrError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Summary(#[from] SummaryError),

    #[error(transparent)]
    Sign(#[from] SignError),

    #[error("Invalid session command: {0}")]
    InvalidCommand(String),
}

/// Result type alias for signer operations.
pub type SignerResult<T> = Result<T, SignerError>;

impl SignerError {
    /// User-facing description, suitable for rendering in place of the
    /// affected screen element. No internals, no key material.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}
