//! Daily "wrapped" usage summaries: aggregation, snapshot lifecycle and expiry.

pub mod aggregator;
pub mod lifecycle;
pub mod provider;
pub mod ranking;
pub mod sweeper;
pub mod types;

use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::clock::ClockError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WrappedError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("background task failed: {0}")]
    Task(String),
}
