//! Tracking of server-side document conversion jobs.
//!
//! - [`api`]: the status and preview endpoints ([`ConversionApi`]) behind
//!   the [`ConversionSource`] seam.
//! - [`poller`]: [`JobPoller`], bounded status polling.
//! - [`artifact`]: [`ArtifactStore`], handles to fetched previews.
//! - [`machine`]: the view state machine and [`ConversionViewer`].

pub mod api;
pub mod artifact;
pub mod machine;
pub mod poller;

pub use api::{Artifact, ConversionApi, ConversionApiError, ConversionSource, FetchOutcome, JobStatus};
pub use artifact::{ArtifactHandle, ArtifactStore};
pub use machine::{
    transition, ConversionEvent, ConversionJob, ConversionStatus, ConversionViewer, InvalidTransition,
    ViewerConfig,
};
pub use poller::{JobPoller, PollOutcome, PollReport, MAX_POLL_ATTEMPTS, POLL_INTERVAL};
