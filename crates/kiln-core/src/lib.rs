//! kiln core
//!
//! Build manifest model (`build.yaml`), its loader, and the run
//! configuration assembled once at startup.

pub mod config;
pub mod error;
pub mod loader;
pub mod model;

pub use config::{INHERITED_VARIABLES, RunConfig};
pub use error::{ManifestError, Result};
pub use loader::{DEFAULT_MANIFEST, load_manifest, parse_manifest};
pub use model::{
    Backend, BuildManifest, FileMapping, OutputMode, PipelineSettings, ProductSettings, Registry,
};
