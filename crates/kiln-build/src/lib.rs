//! kiln image pipeline
//!
//! This crate builds, tests and pushes container images for every
//! version/tag/registry combination in the build manifest, either through
//! the Docker Engine API or by driving a compose-style CLI.

pub mod auth;
pub mod backend;
pub mod builder;
pub mod compose;
pub mod context;
pub mod error;
pub mod native;
pub mod orchestrator;
pub mod process;
pub mod pusher;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{CredentialLookup, Credentials, env_lookup, resolve_credentials};
pub use backend::{BuildUnit, ImageBackend, Transcript};
pub use builder::ImageBuilder;
pub use compose::{ComposeBackend, ComposeCommand, IntegrationTest};
pub use context::ContextBuilder;
pub use error::{BuildError, BuildResult, Stage, StageError};
pub use native::NativeBackend;
pub use orchestrator::Orchestrator;
pub use process::{CommandOutput, CommandRunner, Invocation, ProcessError, ProcessRunner};
pub use pusher::{ImagePusher, split_image_tag};
pub use report::ExecutionReport;
