// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

/// Content-addressed workspace snapshots keyed by message id.
///
/// Taken after a completed assistant turn; restored when the user edits a
/// prior message so the workspace matches the state before that turn.  The
/// storage layout is opaque to the kernel.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn take(&self, task_id: &str, message_id: &str, workspace: &Path)
        -> anyhow::Result<()>;

    /// Returns `false` when no checkpoint exists for the message.
    async fn restore(
        &self,
        task_id: &str,
        message_id: &str,
        workspace: &Path,
    ) -> anyhow::Result<bool>;
}

/// Disabled checkpointing (remote mode delegates snapshots to the pod).
pub struct NullCheckpointStore;

#[async_trait]
impl CheckpointStore for NullCheckpointStore {
    async fn take(&self, _task: &str, _message: &str, _ws: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    async fn restore(&self, _task: &str, _message: &str, _ws: &Path) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Filesystem checkpoint store.
///
/// Trees are stored once per content hash under `objects/`; a ref file per
/// `(task, message)` points at the hash, so identical workspace states
/// across turns share storage.
pub struct FsCheckpointStore {
    base: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn object_dir(&self, hash: &str) -> PathBuf {
        self.base.join("objects").join(hash)
    }

    fn ref_path(&self, task_id: &str, message_id: &str) -> PathBuf {
        self.base.join("refs").join(task_id).join(message_id)
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn take(&self, task_id: &str, message_id: &str, workspace: &Path) -> anyhow::Result<()> {
        let hash = tree_hash(workspace)?;
        let object = self.object_dir(&hash);
        if !object.exists() {
            copy_tree(workspace, &object)?;
        }
        let ref_path = self.ref_path(task_id, message_id);
        if let Some(parent) = ref_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&ref_path, &hash)?;
        debug!(task = %task_id, message = %message_id, hash = %hash, "checkpoint taken");
        Ok(())
    }

    async fn restore(
        &self,
        task_id: &str,
        message_id: &str,
        workspace: &Path,
    ) -> anyhow::Result<bool> {
        let ref_path = self.ref_path(task_id, message_id);
        let Ok(hash) = std::fs::read_to_string(&ref_path) else {
            return Ok(false);
        };
        let object = self.object_dir(hash.trim());
        if !object.exists() {
            return Ok(false);
        }
        clear_tree(workspace)?;
        copy_tree(&object, workspace)?;
        debug!(task = %task_id, message = %message_id, "checkpoint restored");
        Ok(true)
    }
}

/// SHA-256 over every file's relative path and contents, in sorted order.
/// `.git` is excluded: the repository's own state is tracked by git itself.
fn tree_hash(root: &Path) -> anyhow::Result<String> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    let mut hasher = Sha256::new();
    for file in files {
        let rel = file.strip_prefix(root).unwrap_or(&file);
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(std::fs::read(&file)?);
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn copy_tree(from: &Path, to: &Path) -> anyhow::Result<()> {
    for entry in WalkDir::new(from)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
    {
        let rel = entry.path().strip_prefix(from)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Remove everything except `.git` so a restore lands on a clean tree.
fn clear_tree(root: &Path) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_then_restore_round_trips_the_tree() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(ws.path().join("src")).unwrap();
        std::fs::write(ws.path().join("src/main.rs"), "fn main() {}\n").unwrap();

        let store = FsCheckpointStore::new(base.path());
        store.take("t1", "m1", ws.path()).await.unwrap();

        // Mutate the workspace after the checkpoint.
        std::fs::write(ws.path().join("src/main.rs"), "broken").unwrap();
        std::fs::write(ws.path().join("junk.txt"), "junk").unwrap();

        assert!(store.restore("t1", "m1", ws.path()).await.unwrap());
        assert_eq!(
            std::fs::read_to_string(ws.path().join("src/main.rs")).unwrap(),
            "fn main() {}\n"
        );
        assert!(!ws.path().join("junk.txt").exists());
    }

    #[tokio::test]
    async fn restore_without_checkpoint_is_false() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(base.path());
        assert!(!store.restore("t1", "never", ws.path()).await.unwrap());
    }

    #[tokio::test]
    async fn identical_trees_share_one_object() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        std::fs::write(ws.path().join("a.txt"), "same").unwrap();

        let store = FsCheckpointStore::new(base.path());
        store.take("t1", "m1", ws.path()).await.unwrap();
        store.take("t1", "m2", ws.path()).await.unwrap();

        let objects: Vec<_> = std::fs::read_dir(base.path().join("objects"))
            .unwrap()
            .collect();
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn git_dir_survives_restore() {
        let base = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(ws.path().join(".git")).unwrap();
        std::fs::write(ws.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        std::fs::write(ws.path().join("f.txt"), "v1").unwrap();

        let store = FsCheckpointStore::new(base.path());
        store.take("t1", "m1", ws.path()).await.unwrap();
        std::fs::write(ws.path().join("f.txt"), "v2").unwrap();
        store.restore("t1", "m1", ws.path()).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(ws.path().join(".git/HEAD")).unwrap(),
            "ref: refs/heads/main"
        );
        assert_eq!(std::fs::read_to_string(ws.path().join("f.txt")).unwrap(), "v1");
    }

    #[test]
    fn tree_hash_is_content_sensitive() {
        let a = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("x.txt"), "one").unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(b.path().join("x.txt"), "one").unwrap();
        assert_eq!(tree_hash(a.path()).unwrap(), tree_hash(b.path()).unwrap());

        std::fs::write(b.path().join("x.txt"), "two").unwrap();
        assert_ne!(tree_hash(a.path()).unwrap(), tree_hash(b.path()).unwrap());
    }
}
