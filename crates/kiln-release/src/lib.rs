//! Release artifact retrieval for kiln
//!
//! Resolves a GitHub release by version, downloads its assets, and pulls a
//! fixed set of files out of a gzip-compressed tarball.

pub mod client;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod resolver;

#[cfg(any(test, feature = "test-support"))]
pub mod test_server;

pub use client::ReleaseClient;
pub use error::{ReleaseError, Result};
pub use extractor::{ExtractSummary, extract};
pub use resolver::{Release, ReleaseAsset, select_release};
