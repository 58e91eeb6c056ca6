//! Database backup command.
//!
//! Runs `pg_dump` in custom format into
//! `<dir>/inventory-backup-YYYY-MM-DD.sql`, then deletes `.sql` files in
//! `<dir>` older than the retention window. Scheduling is left to the host
//! (cron or a systemd timer).
//!
//! # Environment Variables
//!
//! - `ESTOQUE_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use secrecy::ExposeSecret;
use thiserror::Error;
use tokio::process::Command;

use estoque_server::config::{ConfigError, database_url_from_env};

/// Dumps older than this are pruned unless overridden.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Errors that can occur during a backup.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pg_dump failed ({status}): {output}")]
    Dump { status: String, output: String },
}

/// File name of the dump taken on `date`.
fn backup_file_name(date: chrono::NaiveDate) -> String {
    format!("inventory-backup-{}.sql", date.format("%Y-%m-%d"))
}

/// Dump the database and prune old dumps.
///
/// Returns the path of the new dump. A failed prune is logged and does not
/// fail the backup.
///
/// # Errors
///
/// Returns `BackupError` if the database URL is missing, the directory
/// cannot be created, or `pg_dump` fails.
pub async fn run(dir: &Path, retention_days: u32) -> Result<PathBuf, BackupError> {
    let database_url = database_url_from_env()?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(backup_file_name(chrono::Local::now().date_naive()));

    tracing::info!(path = %path.display(), "Starting backup");
    let output = Command::new("pg_dump")
        .arg("--format=c")
        .arg("--blobs")
        .arg("--file")
        .arg(&path)
        .arg("--dbname")
        .arg(database_url.expose_secret())
        .output()
        .await?;

    if !output.status.success() {
        return Err(BackupError::Dump {
            status: output.status.to_string(),
            output: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    tracing::info!(path = %path.display(), "Backup created successfully");

    let max_age = Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY);
    match prune_old_backups(dir, max_age, SystemTime::now()) {
        Ok(removed) => tracing::info!(removed = removed.len(), "Old backups pruned"),
        Err(e) => tracing::warn!(error = %e, "Failed to prune old backups"),
    }

    Ok(path)
}

/// Delete `.sql` files in `dir` last modified more than `max_age` before
/// `now`. Returns the removed paths.
///
/// Files that cannot be inspected or removed are logged and skipped.
///
/// # Errors
///
/// Returns an error if `dir` cannot be read.
pub fn prune_old_backups(
    dir: &Path,
    max_age: Duration,
    now: SystemTime,
) -> std::io::Result<Vec<PathBuf>> {
    let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "sql") {
            continue;
        }

        let modified = match entry.metadata().and_then(|meta| {
            if meta.is_file() {
                meta.modified()
            } else {
                Err(std::io::Error::other("not a file"))
            }
        }) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping backup file");
                continue;
            }
        };

        if modified < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "Removed old backup");
                    removed.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove old backup");
                }
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs::File;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("estoque-backup-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn touch(path: &Path, modified: SystemTime) {
        let file = File::create(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn test_backup_file_name() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(backup_file_name(date), "inventory-backup-2024-03-07.sql");
    }

    #[test]
    fn test_prune_removes_only_old_sql_files() {
        let dir = scratch_dir();
        let now = SystemTime::now();
        let day = Duration::from_secs(SECONDS_PER_DAY);

        let old = dir.join("inventory-backup-old.sql");
        let fresh = dir.join("inventory-backup-fresh.sql");
        let old_other = dir.join("notes.txt");
        touch(&old, now - day * 31);
        touch(&fresh, now - day * 2);
        touch(&old_other, now - day * 90);

        let removed = prune_old_backups(&dir, day * 30, now).unwrap();

        assert_eq!(removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(old_other.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_prune_missing_dir_is_error() {
        let dir = std::env::temp_dir().join(format!("estoque-missing-{}", uuid::Uuid::new_v4()));
        assert!(prune_old_backups(&dir, Duration::from_secs(1), SystemTime::now()).is_err());
    }
}
