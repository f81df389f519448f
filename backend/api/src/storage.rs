//! Object storage — validation and the external blob-store collaborator.
//!
//! Files arrive inline on JSON DTOs as base64 payloads.  The storage
//! collaborator is a trait so tests can substitute failing or in-memory
//! implementations; production uses a disk-backed store serving objects
//! under a public URL prefix.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::{AppError, Result};

const IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg", "image/gif", "image/webp"];
const DOCUMENT_TYPES: &[&str] = &["application/pdf", "image/png", "image/jpeg"];

/// An uploaded file as carried inline on a JSON request body.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    /// Base64-encoded file content.
    pub data: String,
}

/// Accepted content-type classes for the attachment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Image,
    Document,
}

/// A validated, decoded upload ready to hand to the object store.
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Validate content-type and size, and decode the payload.
///
/// Rejects with `FileIsNotImage` on a content-type outside the class
/// allow-list and `FileSizeExceedsLimit` when the decoded payload exceeds
/// `max_bytes`.
pub fn validate(file: &UploadedFile, class: FileClass, max_bytes: u64) -> Result<ValidatedFile> {
    let allowed = match class {
        FileClass::Image => IMAGE_TYPES,
        FileClass::Document => DOCUMENT_TYPES,
    };
    if !allowed.contains(&file.content_type.as_str()) {
        return Err(AppError::FileIsNotImage);
    }

    let bytes = BASE64
        .decode(&file.data)
        .map_err(|e| AppError::UploadFailed(format!("invalid base64 payload: {e}")))?;
    if bytes.len() as u64 > max_bytes {
        return Err(AppError::FileSizeExceedsLimit);
    }

    Ok(ValidatedFile {
        filename: file.filename.clone(),
        content_type: file.content_type.clone(),
        bytes,
    })
}

/// External blob-store collaborator.
///
/// `upload` returns the public URL of the stored object; `delete_by_url`
/// reports whether an object was actually removed.  Both may fail with an
/// I/O-class error, which callers must surface before committing any
/// database writes.
pub trait ObjectStorage: Send + Sync {
    fn upload(&self, file: &ValidatedFile, folder: &str) -> Result<String>;

    fn upload_many(&self, files: &[ValidatedFile], folder: &str) -> Result<Vec<String>> {
        files.iter().map(|f| self.upload(f, folder)).collect()
    }

    fn delete_by_url(&self, url: &str) -> Result<bool>;
}

/// Disk-backed object store.
///
/// Objects land under `media_dir/<folder>/<uuid>-<filename>` and are served
/// as `<public_base_url>/<folder>/<uuid>-<filename>`.
pub struct DiskStorage {
    media_dir: PathBuf,
    public_base_url: String,
}

impl DiskStorage {
    pub fn new(media_dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            media_dir: media_dir.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Map a public URL back to the on-disk path, if it is ours.
    fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let rel = url.strip_prefix(&self.public_base_url)?;
        let rel = rel.trim_start_matches('/');
        // Reject anything trying to climb out of the media directory.
        if rel.is_empty() || rel.split('/').any(|seg| seg == "..") {
            return None;
        }
        Some(self.media_dir.join(rel))
    }
}

impl ObjectStorage for DiskStorage {
    fn upload(&self, file: &ValidatedFile, folder: &str) -> Result<String> {
        let name = format!("{}-{}", Uuid::new_v4().simple(), sanitize(&file.filename));
        let dir = self.media_dir.join(folder);
        fs::create_dir_all(&dir).map_err(|e| AppError::UploadFailed(e.to_string()))?;
        fs::write(dir.join(&name), &file.bytes)
            .map_err(|e| AppError::UploadFailed(e.to_string()))?;
        Ok(format!("{}/{folder}/{name}", self.public_base_url))
    }

    fn delete_by_url(&self, url: &str) -> Result<bool> {
        let Some(path) = self.path_for_url(url) else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| AppError::DeleteFileFailed(e.to_string()))?;
        Ok(true)
    }
}

/// Strip path separators and whitespace from a client-supplied filename.
fn sanitize(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    Path::new(&cleaned)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}


#[cfg(test)]
mod tests {
    use super::testing::file_of_len;
    use super::*;

    #[test]
    fn rejects_non_image_content_type() {
        let f = file_of_len("a.txt", "text/plain", 10);
        let err = validate(&f, FileClass::Image, 1024).unwrap_err();
        assert_eq!(err.code(), "FILE_IS_NOT_IMAGE");
    }

    #[test]
    fn rejects_oversized_payload() {
        let f = file_of_len("a.png", "image/png", 2048);
        let err = validate(&f, FileClass::Image, 1024).unwrap_err();
        assert_eq!(err.code(), "FILE_SIZE_EXCEEDS_LIMIT");
    }

    #[test]
    fn accepts_pdf_as_document_but_not_image() {
        let f = file_of_len("c.pdf", "application/pdf", 10);
        assert!(validate(&f, FileClass::Document, 1024).is_ok());
        assert!(validate(&f, FileClass::Image, 1024).is_err());
    }

    #[test]
    fn disk_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStorage::new(dir.path(), "http://localhost/media");
        let f = validate(
            &file_of_len("logo.png", "image/png", 64),
            FileClass::Image,
            1024,
        )
        .unwrap();

        let url = store.upload(&f, "logos").unwrap();
        assert!(url.starts_with("http://localhost/media/logos/"));
        assert!(store.delete_by_url(&url).unwrap());
        // Second delete is a no-op, not an error.
        assert!(!store.delete_by_url(&url).unwrap());
    }

    #[test]
    fn delete_ignores_foreign_urls() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStorage::new(dir.path(), "http://localhost/media");
        assert!(!store.delete_by_url("http://elsewhere/media/x.png").unwrap());
    }

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize("../a b.png"), ".._a_b.png");
        assert_eq!(sanitize("logo.png"), "logo.png");
    }
}
