//! Per-target compression of a raw dump into `<target>.sql.<ext>`.

use super::codec::Codec;
use super::manifest::CompressedArtifact;
use super::target::{DumpArtifact, ScratchLayout, TargetStatus};
use crate::utils::CompressError;
use async_compression::tokio::bufread::{GzipEncoder, ZstdEncoder};
use async_compression::Level;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Compressor {
    codec: Codec,
    level: i32,
    layout: ScratchLayout,
    timeout: Duration,
}

impl Compressor {
    pub fn new(codec: Codec, level: i32, layout: ScratchLayout, timeout: Duration) -> Self {
        Self {
            codec,
            level: codec.level(level),
            layout,
            timeout,
        }
    }

    /// Compress one dump. The raw file is left in place for cleanup; only
    /// this target's compressed file is ever written or removed.
    pub async fn compress(
        &self,
        artifact: &DumpArtifact,
        cancel: &CancellationToken,
    ) -> Result<CompressedArtifact, CompressError> {
        let name = &artifact.target.name;
        let source = &artifact.path;

        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            warn!(target = %name, "There is no raw dump at {}", source.display());
            return Err(CompressError::SourceMissing(source.clone()));
        }

        let dest = self.layout.compressed_path(name, self.codec);
        let started = Instant::now();
        info!(target = %name, codec = %self.codec, "Compressing dump");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CompressError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.encode(source, &dest)) => match res {
                Ok(res) => res,
                Err(_) => Err(CompressError::TimedOut(self.timeout)),
            },
        };

        match result {
            Ok((read, written)) => {
                info!(
                    target = %name,
                    raw_bytes = read,
                    compressed_bytes = written,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Compression complete"
                );
                Ok(CompressedArtifact {
                    target: artifact.target.clone(),
                    path: dest,
                    status: TargetStatus::Compressed,
                })
            }
            Err(e) => {
                warn!(target = %name, "Compression failed: {}", e);
                discard(&dest).await;
                Err(e)
            }
        }
    }

    async fn encode(&self, source: &Path, dest: &Path) -> Result<(u64, u64), CompressError> {
        let input = File::open(source).await?;
        let read = input.metadata().await?.len();
        let reader = BufReader::new(input);
        let level = Level::Precise(self.level);

        let written = match self.codec {
            Codec::Zstd => pump(ZstdEncoder::with_quality(reader, level), dest).await?,
            Codec::Gzip => pump(GzipEncoder::with_quality(reader, level), dest).await?,
        };
        Ok((read, written))
    }
}

async fn pump<R: AsyncRead + Unpin>(mut encoder: R, dest: &Path) -> std::io::Result<u64> {
    let mut out = File::create(dest).await?;
    let written = tokio::io::copy(&mut encoder, &mut out).await?;
    out.flush().await?;
    out.sync_all().await?;
    Ok(written)
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial artifact {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial artifact {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::target::{BackupTarget, Credentials};
    use std::io::Read;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DUMP: &str = "CREATE TABLE radacct (id INT);\nINSERT INTO radacct VALUES (1),(2),(3);\n";

    fn raw_dump(dir: &Path, name: &str) -> DumpArtifact {
        let path = dir.join(format!("{}.sql", name));
        std::fs::write(&path, DUMP.repeat(50)).unwrap();
        DumpArtifact {
            target: BackupTarget::new(name, "127.0.0.1", Arc::new(Credentials::new("u", "p"))).unwrap(),
            path,
            status: TargetStatus::Dumped,
        }
    }

    fn compressor(dir: &Path, codec: Codec) -> Compressor {
        Compressor::new(codec, 6, ScratchLayout::new(dir), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_zstd_artifact_decodes_to_dump() {
        let dir = TempDir::new().unwrap();
        let dump = raw_dump(dir.path(), "radius");

        let out = compressor(dir.path(), Codec::Zstd)
            .compress(&dump, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.path, dir.path().join("radius.sql.zst"));
        assert_eq!(out.status, TargetStatus::Compressed);
        let decoded = zstd::decode_all(std::fs::File::open(&out.path).unwrap()).unwrap();
        assert_eq!(decoded, DUMP.repeat(50).into_bytes());
        assert!(dump.path.exists());
    }

    #[tokio::test]
    async fn test_gzip_artifact_decodes_to_dump() {
        let dir = TempDir::new().unwrap();
        let dump = raw_dump(dir.path(), "mysql");

        let out = compressor(dir.path(), Codec::Gzip)
            .compress(&dump, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.path, dir.path().join("mysql.sql.gz"));
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(std::fs::File::open(&out.path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, DUMP.repeat(50));
    }

    #[tokio::test]
    async fn test_missing_source_is_reported() {
        let dir = TempDir::new().unwrap();
        let dump = raw_dump(dir.path(), "ghost");
        std::fs::remove_file(&dump.path).unwrap();

        let err = compressor(dir.path(), Codec::Zstd)
            .compress(&dump, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CompressError::SourceMissing(_)));
        assert!(!dir.path().join("ghost.sql.zst").exists());
    }

    #[tokio::test]
    async fn test_cancelled_compression_leaves_no_artifact() {
        let dir = TempDir::new().unwrap();
        let dump = raw_dump(dir.path(), "radius");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = compressor(dir.path(), Codec::Zstd).compress(&dump, &cancel).await.unwrap_err();
        assert!(matches!(err, CompressError::Cancelled));
        assert!(!dir.path().join("radius.sql.zst").exists());
        assert!(dump.path.exists());
    }

    #[tokio::test]
    async fn test_other_targets_files_untouched() {
        let dir = TempDir::new().unwrap();
        let a = raw_dump(dir.path(), "a");
        let b = raw_dump(dir.path(), "b");
        let c = compressor(dir.path(), Codec::Gzip);

        c.compress(&a, &CancellationToken::new()).await.unwrap();
        assert!(b.path.exists());
        assert!(!dir.path().join("b.sql.gz").exists());
    }
}
