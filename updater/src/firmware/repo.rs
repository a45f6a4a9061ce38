//! Firmware repository
//!
//! Ordinary filesystem management of the local firmware directory: resolve a
//! named image to a path and size, list what is available, import new files,
//! and verify integrity with a SHA-256 digest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::errors::UpdaterError;
use crate::models::firmware::{date_code_from_name, FirmwareInfo};
use crate::progress::ProgressSink;

/// Firmware images carry this extension
const FIRMWARE_EXT: &str = "bin";

/// Local firmware file store
pub struct FirmwareRepository {
    dir: PathBuf,
    sink: Arc<dyn ProgressSink>,
}

impl FirmwareRepository {
    pub fn new(dir: impl Into<PathBuf>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            dir: dir.into(),
            sink,
        }
    }

    /// The repository directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the repository directory if missing
    pub async fn ensure_dir(&self) -> Result<(), UpdaterError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Resolve a firmware name to a readable path plus metadata.
    ///
    /// Fails with `FileNotFound` when the image is absent or empty.
    pub async fn resolve(&self, name: &str) -> Result<FirmwareInfo, UpdaterError> {
        let path = self.dir.join(name);
        let meta = fs::metadata(&path)
            .await
            .map_err(|_| UpdaterError::FileNotFound(path.display().to_string()))?;
        if meta.len() == 0 {
            return Err(UpdaterError::FileNotFound(format!(
                "{} is empty",
                path.display()
            )));
        }

        let sha256 = sha256_file(&path).await?;
        let info = FirmwareInfo {
            file_name: name.to_string(),
            size: meta.len(),
            version: date_code_from_name(name),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            sha256: Some(sha256),
            path,
        };
        self.sink.info(&format!(
            "Firmware {}: {:.2} MB, version {}",
            info.file_name,
            info.size_mb(),
            info.version.as_deref().unwrap_or("unknown")
        ));
        Ok(info)
    }

    /// List all firmware images in the repository
    pub async fn list(&self) -> Result<Vec<FirmwareInfo>, UpdaterError> {
        self.ensure_dir().await?;

        let mut images = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FIRMWARE_EXT) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match self.resolve(name).await {
                Ok(info) => images.push(info),
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }
        images.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(images)
    }

    /// Copy an image into the repository, overwriting any existing copy
    pub async fn import(&self, source: &Path) -> Result<FirmwareInfo, UpdaterError> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UpdaterError::ConfigError(format!("bad path: {}", source.display())))?
            .to_string();
        if !fs::metadata(source).await.map(|m| m.is_file()).unwrap_or(false) {
            return Err(UpdaterError::FileNotFound(source.display().to_string()));
        }

        self.ensure_dir().await?;
        let target = self.dir.join(&name);
        fs::copy(source, &target).await?;
        self.sink
            .info(&format!("Imported firmware {}", target.display()));
        self.resolve(&name).await
    }

    /// Delete an image from the repository
    pub async fn delete(&self, name: &str) -> Result<(), UpdaterError> {
        let path = self.dir.join(name);
        fs::remove_file(&path)
            .await
            .map_err(|_| UpdaterError::FileNotFound(path.display().to_string()))?;
        self.sink.info(&format!("Deleted firmware {}", name));
        Ok(())
    }

    /// Compare a file's digest against an expected hex digest
    pub async fn verify_integrity(
        &self,
        name: &str,
        expected_sha256: &str,
    ) -> Result<bool, UpdaterError> {
        let path = self.dir.join(name);
        let actual = sha256_file(&path).await?;
        Ok(actual.eq_ignore_ascii_case(expected_sha256))
    }
}

/// Streaming SHA-256 of a file, hex-encoded
pub async fn sha256_file(path: &Path) -> Result<String, UpdaterError> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    Ok(hex)
}
