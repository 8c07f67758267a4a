//! Selective extraction from a `.tar.gz` archive
//!
//! Only entries named in the entry map are written out; everything else in
//! the archive is skipped. The scan ends cleanly at end-of-archive whether or
//! not every mapped entry was seen. [`ExtractSummary::missing`] lists the ones
//! that were not, and the caller decides what to do about them.

use crate::error::{ReleaseError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Which entry-map keys were found in the archive
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub extracted: Vec<String>,
    pub missing: Vec<String>,
}

/// Extract the regular-file entries named in `entries` from `archive`
///
/// `entries` pairs an archive-internal path with its destination. The first
/// pair whose source matches an entry wins.
pub fn extract(archive: &Path, entries: &[(String, PathBuf)]) -> Result<ExtractSummary> {
    let file = File::open(archive).map_err(|source| ReleaseError::Open {
        path: archive.to_path_buf(),
        source,
    })?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut tar = tar::Archive::new(decoder);

    let decode_error = |e: io::Error| ReleaseError::Decode {
        what: format!("archive {}", archive.display()),
        reason: e.to_string(),
    };

    let mut summary = ExtractSummary::default();
    for entry in tar.entries().map_err(decode_error)? {
        let mut entry = entry.map_err(decode_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some((source, target)) = entries.iter().find(|(source, _)| *source == name) else {
            continue;
        };

        let io_error = |source: io::Error| ReleaseError::Io {
            path: target.clone(),
            source,
        };
        // 読み取り専用の既存ファイルは上書きできないので先に消す
        match fs::remove_file(target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(e)),
        }
        let mut out = File::create(target).map_err(io_error)?;
        copy_entry(&mut entry, &mut out, &decode_error, &io_error)?;

        #[cfg(unix)]
        if let Ok(mode) = entry.header().mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o777))
                .map_err(io_error)?;
        }

        tracing::debug!("Extracted {} -> {}", source, target.display());
        summary.extracted.push(source.clone());
    }

    summary.missing = entries
        .iter()
        .map(|(source, _)| source)
        .filter(|source| !summary.extracted.contains(source))
        .cloned()
        .collect();

    Ok(summary)
}

/// Copy one entry's data, keeping decode failures apart from write failures
fn copy_entry(
    entry: &mut impl Read,
    out: &mut impl Write,
    decode_error: &impl Fn(io::Error) -> ReleaseError,
    io_error: &impl Fn(io::Error) -> ReleaseError,
) -> Result<u64> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut copied = 0u64;
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(decode_error(e)),
        };
        out.write_all(&buf[..n]).map_err(io_error)?;
        copied += n as u64;
    }
    out.flush().map_err(io_error)?;
    Ok(copied)
}
