//! Upload intake: person-name validation, file-name sanitizing, and storage.
//!
//! Uploaded screenshots are kept in `uploads.dir` under a sanitized version
//! of the client-supplied name. A file is never overwritten; a short random
//! suffix is added when the name is taken.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("person name must not be empty")]
    EmptyPerson,

    #[error("no file was uploaded")]
    MissingFile,

    #[error("file name '{0}' has no usable characters")]
    UnusableName(String),

    #[error("failed to store upload {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Trim a submitted person name; empty names are refused.
pub fn validate_person(name: &str) -> Result<String, UploadError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(UploadError::EmptyPerson);
    }
    Ok(trimmed.to_string())
}

/// Reduce a client-supplied file name to `[A-Za-z0-9_.-]`, with whitespace
/// and path separators turned into `_`. Leading and trailing dots and
/// underscores are dropped, so the result never escapes the upload dir.
pub fn secure_filename(name: &str) -> Option<String> {
    let spaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = filtered.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn with_suffix(name: &str) -> String {
    let tag = Uuid::new_v4().simple().to_string();
    let tag = &tag[..8];
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, tag, ext),
        _ => format!("{}-{}", name, tag),
    }
}

/// Write `bytes` into `dir` under a sanitized, unused name derived from
/// `original_name`. Returns the full path written.
pub async fn store_upload(
    dir: &Path,
    original_name: &str,
    bytes: &[u8],
) -> Result<PathBuf, UploadError> {
    let name = secure_filename(original_name)
        .ok_or_else(|| UploadError::UnusableName(original_name.to_string()))?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| UploadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

    let mut candidate = dir.join(&name);
    loop {
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await;
        match opened {
            Ok(mut file) => {
                file.write_all(bytes)
                    .await
                    .map_err(|source| UploadError::Io {
                        path: candidate.clone(),
                        source,
                    })?;
                file.flush().await.map_err(|source| UploadError::Io {
                    path: candidate.clone(),
                    source,
                })?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                candidate = dir.join(with_suffix(&name));
            }
            Err(source) => {
                return Err(UploadError::Io {
                    path: candidate,
                    source,
                })
            }
        }
    }
}

/// Copy a local file into the upload dir (used by `stepboard ingest`).
pub async fn import_file(dir: &Path, source: &Path) -> Result<PathBuf, UploadError> {
    let bytes = tokio::fs::read(source)
        .await
        .map_err(|e| UploadError::Io {
            path: source.to_path_buf(),
            source: e,
        })?;
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or(UploadError::MissingFile)?;
    store_upload(dir, &name, &bytes).await
}
