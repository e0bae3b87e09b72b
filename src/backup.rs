//! Database backup and restore.
//!
//! Deployments on ephemeral disks keep a copy of the database on a
//! persistent volume. `serve` restores from that copy when the live database
//! is missing and writes a fresh copy on graceful shutdown.

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;

/// Copy the database file to `backup.path`. Returns `false` when no backup
/// is configured or there is no database yet.
///
/// `pool` must be closed or idle: the WAL is checkpointed first so the
/// copied file is self-contained.
pub async fn backup_database(config: &Config, pool: Option<&SqlitePool>) -> Result<bool> {
    let Some(backup) = &config.backup else {
        return Ok(false);
    };
    if !config.db.path.exists() {
        return Ok(false);
    }

    if let Some(pool) = pool {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(pool)
            .await
            .context("failed to checkpoint WAL before backup")?;
    }

    copy_file(&config.db.path, &backup.path)?;
    info!(
        from = %config.db.path.display(),
        to = %backup.path.display(),
        "database backed up"
    );
    Ok(true)
}

/// Restore the database from `backup.path` when the database file does not
/// exist. Returns whether a restore happened.
pub fn restore_if_missing(config: &Config) -> Result<bool> {
    let Some(backup) = &config.backup else {
        return Ok(false);
    };
    if config.db.path.exists() || !backup.path.exists() {
        return Ok(false);
    }

    copy_file(&backup.path, &config.db.path)?;
    info!(
        from = %backup.path.display(),
        to = %config.db.path.display(),
        "database restored from backup"
    );
    Ok(true)
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    std::fs::copy(from, to)
        .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// CLI entry point for `stepboard backup`.
pub async fn run_backup(config: &Config) -> Result<()> {
    if config.backup.is_none() {
        println!("no [backup] section configured");
        return Ok(());
    }
    let pool = if config.db.path.exists() {
        Some(crate::db::connect(config).await?)
    } else {
        None
    };
    let done = backup_database(config, pool.as_ref()).await?;
    if let Some(pool) = pool {
        pool.close().await;
    }
    if done {
        println!("backup written");
    } else {
        println!("nothing to back up");
    }
    Ok(())
}
