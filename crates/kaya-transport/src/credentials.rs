//! Credential integrity: validate, backup, restore, and serialized persistence.
//!
//! The live credential file is only trusted when it round-trips through a
//! structural JSON parse; otherwise it is replaced from the last known-good
//! backup before the transport attempts its first handshake.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::Mutex;

use kaya_core::write_text_atomic;

const CREDS_FILE: &str = "creds.json";
const BACKUP_FILE: &str = "creds.backup.json";

/// Owns the persisted identity material of the transport session.
///
/// All writes go through [`CredentialStore::persist`], which serializes them
/// behind one async mutex so a fast sequence of credential-update events never
/// interleaves partial writes. No other component writes these files.
pub struct CredentialStore {
    auth_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            auth_dir: auth_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn auth_dir(&self) -> &Path {
        &self.auth_dir
    }

    fn creds_path(&self) -> PathBuf {
        self.auth_dir.join(CREDS_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.auth_dir.join(BACKUP_FILE)
    }

    /// Loads the live credentials, or `None` when absent or unparseable.
    pub async fn load(&self) -> Option<Value> {
        read_json(&self.creds_path()).await
    }

    /// Structural parse check on the live credential file.
    pub async fn validate(&self) -> bool {
        read_json(&self.creds_path()).await.is_some()
    }

    /// Copies live → backup, only when the live copy parses. A failed backup
    /// is logged and skipped; the live credential is still usable.
    pub async fn backup(&self) {
        if read_json(&self.creds_path()).await.is_none() {
            return;
        }
        if let Err(error) = tokio::fs::copy(self.creds_path(), self.backup_path()).await {
            eprintln!("credential backup failed: {error}");
        }
    }

    /// Copies backup → live when the live copy is invalid. Returns true when
    /// a restore happened. A missing backup surfaces as an error and leaves
    /// the next handshake to fail through the normal reconnect policy.
    pub async fn restore_if_corrupted(&self) -> Result<bool> {
        if self.validate().await {
            return Ok(false);
        }
        tokio::fs::copy(self.backup_path(), self.creds_path())
            .await
            .with_context(|| {
                format!(
                    "failed to restore credentials from {}",
                    self.backup_path().display()
                )
            })?;
        println!("credentials restored from backup");
        Ok(true)
    }

    /// Serialized, atomic write of a credential update.
    pub async fn persist(&self, update: &Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let rendered = serde_json::to_string(update).context("failed to encode credentials")?;
        write_text_atomic(&self.creds_path(), &rendered)
    }

    /// Removes the auth directory. Only the terminal logged-out close path
    /// calls this.
    pub async fn purge(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.auth_dir).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).with_context(|| {
                format!("failed to purge auth dir {}", self.auth_dir.display())
            }),
        }
    }
}

async fn read_json(path: &Path) -> Option<Value> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&raw).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::CredentialStore;

    #[tokio::test]
    async fn persist_then_validate_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path());
        store
            .persist(&json!({"noise_key": "abc", "registered": true}))
            .await
            .expect("persist");
        assert!(store.validate().await);
        assert_eq!(store.load().await.expect("load")["noise_key"], "abc");
    }

    #[tokio::test]
    async fn corrupt_live_copy_is_restored_from_backup() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path());
        let creds = json!({"noise_key": "good"});
        store.persist(&creds).await.expect("persist");
        store.backup().await;

        tokio::fs::write(dir.path().join("creds.json"), "{not json")
            .await
            .expect("corrupt");
        assert!(!store.validate().await);

        let restored = store.restore_if_corrupted().await.expect("restore");
        assert!(restored);
        assert!(store.validate().await);
        assert_eq!(store.load().await, Some(creds));
    }

    #[tokio::test]
    async fn restore_is_noop_when_live_copy_is_valid() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path());
        store.persist(&json!({"k": 1})).await.expect("persist");
        let restored = store.restore_if_corrupted().await.expect("restore");
        assert!(!restored);
    }

    #[tokio::test]
    async fn backup_skips_invalid_live_copy() {
        let dir = tempdir().expect("tempdir");
        let store = CredentialStore::new(dir.path());
        store.persist(&json!({"k": "old"})).await.expect("persist");
        store.backup().await;

        tokio::fs::write(dir.path().join("creds.json"), "garbage")
            .await
            .expect("corrupt");
        store.backup().await;

        // The backup must still hold the last good state.
        let backup = tokio::fs::read_to_string(dir.path().join("creds.backup.json"))
            .await
            .expect("backup file");
        let value: serde_json::Value = serde_json::from_str(&backup).expect("parse backup");
        assert_eq!(value["k"], "old");
    }

    #[tokio::test]
    async fn purge_removes_auth_dir_and_tolerates_absence() {
        let dir = tempdir().expect("tempdir");
        let auth_dir = dir.path().join("auth");
        let store = CredentialStore::new(&auth_dir);
        store.persist(&json!({"k": 1})).await.expect("persist");
        store.purge().await.expect("purge");
        assert!(!auth_dir.exists());
        store.purge().await.expect("second purge is fine");
    }
}
