use thiserror::Error;

use crate::{catalog::CatalogError, dispatch::DispatchError, storage::job_store::StoreError};

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
