pub mod api;
pub mod artifacts;
pub mod client;
pub mod error;
pub mod run;

pub use api::{ExperimentId, Metric, Param, RunId, RunStatus, RunTag};
pub use artifacts::{ArtifactStore, LocalArtifactStore, ProxyArtifactStore};
pub use client::MlflowClient;
pub use error::{Result, TrackingError};
pub use run::{ActiveRun, RunGuard, Tracker};
