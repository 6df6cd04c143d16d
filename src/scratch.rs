//! Request-scoped storage for uploaded files.
//!
//! Every pipeline run gets its own directory under the configured root. The
//! directory is removed when the run finishes, whichever way it finishes:
//! explicitly through [`ScratchDir::cleanup`], or on drop if the run was
//! cut short by an error, a panic or a cancelled future.

use crate::types::{AnalyzedFile, FileCategory, UploadedFile};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    pub async fn create(root: &Path) -> io::Result<Self> {
        let path = root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Created scratch directory.");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes an upload into the directory and describes it for the planner.
    pub async fn store(&self, upload: &UploadedFile) -> io::Result<AnalyzedFile> {
        let filename = sanitize_filename(&upload.filename).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unusable upload file name '{}'", upload.filename),
            )
        })?;
        let filename = self.unused_name(filename).await?;
        let storage_path = self.path.join(&filename);
        tokio::fs::write(&storage_path, &upload.bytes).await?;

        Ok(analyze_file(filename, upload.bytes.len() as u64, storage_path))
    }

    /// `name`, or `stem (n).ext` with the smallest free `n` when an earlier
    /// upload already took it.
    async fn unused_name(&self, name: String) -> io::Result<String> {
        if !tokio::fs::try_exists(self.path.join(&name)).await? {
            return Ok(name);
        }
        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (name.as_str(), None),
        };
        for n in 1.. {
            let candidate = match extension {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            if !tokio::fs::try_exists(self.path.join(&candidate)).await? {
                warn!(original = %name, renamed = %candidate, "Upload name already taken, renamed.");
                return Ok(candidate);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for upload '{}'", name),
        ))
    }

    pub async fn store_all(&self, uploads: &[UploadedFile]) -> io::Result<Vec<AnalyzedFile>> {
        let mut analyzed = Vec::with_capacity(uploads.len());
        for upload in uploads {
            analyzed.push(self.store(upload).await?);
        }
        Ok(analyzed)
    }

    /// Path of a stored file, or `None` if no such file exists here.
    ///
    /// Names that would leave the directory are never resolved.
    pub async fn resolve(&self, name: &str) -> Option<PathBuf> {
        let filename = sanitize_filename(name)?;
        if filename != name.trim() {
            return None;
        }
        let candidate = self.path.join(filename);
        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.is_file() => Some(candidate),
            _ => None,
        }
    }

    /// Removes the directory and everything in it. Failures are logged only.
    pub fn cleanup(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed scratch directory."),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to remove scratch directory.")
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Final path component of an upload name, if there is a usable one.
pub(crate) fn sanitize_filename(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Path::new(&trimmed.replace('\\', "/"))
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| sanitize_filename(n));
    }
    match trimmed {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

pub fn analyze_file(filename: String, size_bytes: u64, storage_path: PathBuf) -> AnalyzedFile {
    let content_type = mime_guess::from_path(&filename)
        .first()
        .map(|m| m.essence_str().to_string());
    let category = FileCategory::from_mime(content_type.as_deref());
    AnalyzedFile {
        filename,
        content_type,
        size_bytes,
        storage_path,
        category,
    }
}
