//! Publish jobs: state machine, store, rendering and the coordinator that runs them.

pub mod coordinator;
pub mod job;
pub mod render;
pub mod store;

pub use coordinator::{CoordinatorSettings, DeploymentTarget, DeploymentTargets, PublishCoordinator};
pub use job::{
    FileRenameResult, FileUpdateResult, JobStatus, JobStep, NewPostResult, PublishJob,
    PublishJobKind, StepId, StepStatus,
};
pub use render::{render_post, PostSource, RenderedPost};
pub use store::JobStore;
