use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::reconcile::ReconcilePolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backup: Option<BackupConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_uploads_dir")]
    pub dir: PathBuf,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_command")]
    pub command: String,
    /// Extra arguments placed before the image path.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    /// Threshold health-app screenshots before OCR.
    #[serde(default = "default_true")]
    pub preprocess: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: default_ocr_command(),
            args: Vec::new(),
            languages: default_languages(),
            preprocess: true,
        }
    }
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    #[serde(default = "default_true")]
    pub persist_zero: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { persist_zero: true }
    }
}

impl ReconcileConfig {
    pub fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            persist_zero: self.persist_zero,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    pub path: PathBuf,
}

impl Config {
    /// Defaults for commands that can run without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/steps.sqlite"),
            },
            uploads: UploadsConfig::default(),
            ocr: OcrConfig::default(),
            reconcile: ReconcileConfig::default(),
            server: ServerConfig::default(),
            backup: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.path.as_os_str().is_empty() {
        bail!("db.path must not be empty");
    }

    if config.ocr.command.trim().is_empty() {
        bail!("ocr.command must not be empty");
    }

    for lang in &config.ocr.languages {
        if lang.trim().is_empty() || lang.contains('+') {
            bail!(
                "ocr.languages entries must be single language codes, got '{}'",
                lang
            );
        }
    }

    if config.server.bind.trim().is_empty() {
        bail!("server.bind must not be empty");
    }

    if let Some(backup) = &config.backup {
        if backup.path == config.db.path {
            bail!("backup.path must differ from db.path");
        }
    }

    Ok(())
}
