//! Final archive assembly.
//!
//! All compressed artifacts go into one `tar` stream compressed with the
//! run's codec, built in the scratch directory and then renamed into the
//! destination as `backup_db_<host>_<YYYYMMDD_HHMMSS_micros>.tar.<ext>`.
//! An existing file with the same name is never overwritten.

use super::codec::Codec;
use super::manifest::{ArchiveResult, CompressedArtifact};
use super::target::ScratchLayout;
use crate::utils::ArchiveError;
use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use nix::errno::Errno;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Archiver {
    destination: PathBuf,
    host: String,
    layout: ScratchLayout,
    level: i32,
}

impl Archiver {
    pub fn new(destination: impl Into<PathBuf>, host: impl Into<String>, layout: ScratchLayout, level: i32) -> Self {
        Self {
            destination: destination.into(),
            host: host.into(),
            layout,
            level,
        }
    }

    /// Archive every manifest entry. `attempted` is the number of targets the
    /// run started with, used for the excluded count.
    pub async fn archive(
        &self,
        manifest: &[CompressedArtifact],
        codec: Codec,
        attempted: usize,
    ) -> Result<ArchiveResult, ArchiveError> {
        if manifest.is_empty() {
            warn!("No files to archive");
            return Err(ArchiveError::NothingToArchive);
        }

        let started = Instant::now();
        let name = archive_name(&self.host, codec, Local::now());
        let staging = self.layout.dir().join(&name);
        let final_path = self.destination.join(&name);
        info!("Saving archive {} ({} entries)", name, manifest.len());

        let entries: Vec<PathBuf> = manifest.iter().map(|a| a.path.clone()).collect();
        let level = codec.level(self.level);
        let build_path = staging.clone();
        let built = tokio::task::spawn_blocking(move || build_archive(&build_path, &entries, codec, level)).await?;

        if let Err(e) = built {
            discard(&staging);
            return Err(e.into());
        }

        let move_result = {
            let staging = staging.clone();
            let final_path = final_path.clone();
            tokio::task::spawn_blocking(move || move_into_place(&staging, &final_path)).await?
        };
        if let Err(e) = move_result {
            discard(&staging);
            return Err(e);
        }

        info!(
            path = %final_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Archive stored"
        );

        Ok(ArchiveResult {
            path: final_path,
            codec,
            included: manifest.len(),
            excluded: attempted.saturating_sub(manifest.len()),
        })
    }
}

/// `backup_db_<host>_<YYYYMMDD_HHMMSS_micros>.tar.<ext>`
pub fn archive_name(host: &str, codec: Codec, at: DateTime<Local>) -> String {
    format!(
        "backup_db_{}_{}.tar.{}",
        host,
        at.format("%Y%m%d_%H%M%S_%6f"),
        codec.extension()
    )
}

fn build_archive(path: &Path, entries: &[PathBuf], codec: Codec, level: i32) -> std::io::Result<()> {
    let file = File::create(path)?;
    let file = match codec {
        Codec::Zstd => {
            let encoder = zstd::stream::write::Encoder::new(file, level)?;
            append_entries(encoder, entries)?.finish()?
        }
        Codec::Gzip => {
            let encoder = GzEncoder::new(file, Compression::new(level as u32));
            append_entries(encoder, entries)?.finish()?
        }
    };
    file.sync_all()
}

fn append_entries<W: Write>(writer: W, entries: &[PathBuf]) -> std::io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    for path in entries {
        let name = path
            .file_name()
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, format!("no file name in {}", path.display())))?;
        debug!("Adding {} to archive", path.display());
        builder.append_path_with_name(path, name)?;
    }
    builder.into_inner()
}

/// Link into the destination, then drop the staging name. `hard_link` never
/// replaces an existing file. Across filesystems the archive is copied to a
/// hidden temporary name next to the target and linked from there, so the
/// final name only ever appears complete.
fn move_into_place(staging: &Path, final_path: &Path) -> Result<(), ArchiveError> {
    match link_new(staging, final_path) {
        Ok(()) => {
            discard(staging);
            Ok(())
        }
        Err(ArchiveError::Io(e)) if e.raw_os_error() == Some(Errno::EXDEV as i32) => {
            let file_name = final_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let partial = final_path.with_file_name(format!(".{}.partial", file_name));
            debug!("Destination is on another filesystem, copying via {}", partial.display());

            let copied = std::fs::copy(staging, &partial)
                .and_then(|_| File::open(&partial)?.sync_all())
                .map_err(ArchiveError::from)
                .and_then(|_| link_new(&partial, final_path));
            discard(&partial);
            copied?;
            discard(staging);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn link_new(from: &Path, to: &Path) -> Result<(), ArchiveError> {
    match std::fs::hard_link(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            warn!("{} already exists, leaving it untouched", to.display());
            Err(ArchiveError::DestinationExists(to.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
