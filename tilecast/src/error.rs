//! Library-level error contract.
//!
//! These variants map directly to the failure surface seen by callers:
//! transient unavailability, genuine absence, configuration mismatches and
//! cooperative cancellation are distinct conditions and must stay
//! distinguishable all the way to the serving layer.

use thiserror::Error;

/// Errors surfaced by the tile-proxy core.
#[derive(Debug, Error)]
pub enum Error {
    /// No such tile, resource or file variant. Surfaces to the client.
    #[error("not found: {0}")]
    NotFound(String),

    /// Registry or generator not ready yet; transient from the client's
    /// point of view.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Debug flavor of [`Error::NotFound`] for mask endpoints.
    #[error("empty debug mask")]
    EmptyDebugMask,

    /// Programmer error: unknown file class, impossible branch.
    #[error("internal error: {0}")]
    InternalError(String),

    /// Resource definition does not match the declared generator kind.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Lookup of an absent resource id.
    #[error("unknown generator <{0}>")]
    UnknownGenerator(String),

    /// Dataset type autodetection failed.
    #[error("unsupported dataset: {0}")]
    UnsupportedDataset(String),

    /// Cooperative cancellation.
    #[error("operation aborted")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Dataset(#[from] crate::dataset::DatasetError),

    #[error(transparent)]
    Srs(#[from] crate::geo::srs::SrsError),
}

impl Error {
    /// True for conditions a client may meaningfully retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::Aborted)
    }
}
