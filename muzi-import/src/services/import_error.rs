//! Reasons an import job ends in the `error` state

use thiserror::Error;

use crate::models::import_job::IllegalTransition;
use crate::sources::SourceError;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import cancelled")]
    Cancelled,

    /// First page could not be fetched or carried no page count
    #[error("failed to discover total pages: {0}")]
    Discovery(#[source] SourceError),

    #[error(transparent)]
    Lifecycle(#[from] IllegalTransition),
}
