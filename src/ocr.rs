//! OCR engine boundary.
//!
//! The engine is a black box: give it an image, get back the recognized text
//! fragments in reading order. [`TextRecognizer`] is that capability; the
//! pipeline receives one at construction and never builds its own.
//!
//! [`TesseractRecognizer`] runs the `tesseract` CLI (or any command with the
//! same calling convention) as a child process:
//!
//! ```text
//! <command> [args...] <image> stdout [-l eng+ind+tha]
//! ```
//!
//! Every non-blank output line becomes one fragment.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::OcrConfig;

/// OCR failures. These are not recoverable by the extraction stage; the
/// upload fails and no reading is produced.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("image not found: {}", .0.display())]
    MissingImage(PathBuf),

    #[error("failed to start OCR command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OCR command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("OCR output is not valid UTF-8")]
    InvalidOutput,
}

/// Capability: `recognize(image) -> fragments`.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Engine identifier used in logs.
    fn name(&self) -> &str;

    /// Recognize all text in an image, in reading order.
    async fn recognize(&self, image: &Path) -> Result<Vec<String>, OcrError>;
}

/// Runs an external Tesseract-compatible command.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    command: String,
    args: Vec<String>,
    languages: Vec<String>,
}

impl TesseractRecognizer {
    pub fn new(command: impl Into<String>, args: Vec<String>, languages: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            languages,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            config.languages.clone(),
        )
    }

    fn build_command(&self, image: &Path) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args).arg(image).arg("stdout");
        if !self.languages.is_empty() {
            cmd.arg("-l").arg(self.languages.join("+"));
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        &self.command
    }

    async fn recognize(&self, image: &Path) -> Result<Vec<String>, OcrError> {
        if !image.exists() {
            return Err(OcrError::MissingImage(image.to_path_buf()));
        }

        debug!(command = %self.command, image = %image.display(), "running OCR");
        let output = self
            .build_command(image)
            .output()
            .await
            .map_err(|source| OcrError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(OcrError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8(output.stdout).map_err(|_| OcrError::InvalidOutput)?;
        Ok(split_fragments(&stdout))
    }
}

/// One fragment per non-blank line, surrounding whitespace trimmed.
pub fn split_fragments(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
