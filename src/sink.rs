// src/sink.rs

use crate::error::Result;
use crate::integrity::{sha256_hex, verify_sha256};
use crate::models::Artifact;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const PART_SUFFIX: &str = "plgrab-part";

/// Where a saved artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

/// Persists the payload of a successful transfer.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn save(&self, artifact: &Artifact) -> Result<SavedArtifact>;
}

/// Writes artifacts into a directory. Each file is written under a partial
/// name first and renamed once complete; existing files are never replaced.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First free path for `name`, appending ` (n)` before the extension on collision.
    async fn free_path(&self, name: &str) -> Result<PathBuf> {
        let candidate = self.dir.join(name);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        let path = Path::new(name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
        let ext = path.extension().and_then(|e| e.to_str());
        let mut n = 1;
        loop {
            let numbered = match ext {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            let candidate = self.dir.join(numbered);
            if !tokio::fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn save(&self, artifact: &Artifact) -> Result<SavedArtifact> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let name = sanitize_filename(&artifact.filename);
        let destination = self.free_path(&name).await?;
        let temp_path = PathBuf::from(format!("{}.{PART_SUFFIX}", destination.display()));
        let sha256 = sha256_hex(&artifact.payload);

        let write = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(&artifact.payload).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &destination).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        verify_sha256(&destination, &sha256).await?;

        debug!(path = %destination.display(), %sha256, "artifact verified");
        info!(path = %destination.display(), bytes = artifact.payload.len(), "saved");
        Ok(SavedArtifact {
            path: destination,
            sha256,
            bytes: artifact.payload.len() as u64,
        })
    }
}

/// Reduces a server supplied name to a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace(['\0', ':', '*', '?', '"', '<', '>', '|'], "_");
    match last.as_str() {
        "" | "." | ".." => "download".to_string(),
        _ => last,
    }
}
