// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Crash-recovery primitives: an atomic JSON snapshot writer
//! ([`Autosave`]) and an exclusive-create, PID-tagged lockfile
//! ([`SessionLock`]). Both live under the directory returned by
//! [`crate::state_dir`].
//!
//! [`HeartbeatLock`] generalizes the lockfile pattern for long-running
//! processes (the Anton runner) that need staleness detection rather than
//! "does the lockfile exist" alone: a lock is considered abandoned once its
//! heartbeat hasn't been refreshed within `stale_after`, letting a crashed
//! run's lock be reclaimed without manual cleanup.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use fs4::FileExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomically-written JSON snapshot of in-progress session state, so a
/// crash mid-turn can be resumed instead of losing the conversation.
pub struct Autosave {
    path: PathBuf,
}

impl Autosave {
    pub fn new(state_dir: &Path, session_id: &str) -> Self {
        Self { path: state_dir.join(session_id).join("autosave.json") }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data` to disk via tmp-file-then-rename so a reader never
    /// observes a partial write.
    pub fn save<T: Serialize>(&self, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        atomic_write(&self.path, &json).context("writing autosave snapshot")
    }

    /// Load a previously-saved snapshot, if one exists.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: u64,
}

/// Simple exclusive-create lockfile tagged with the owning process id.
/// Held for the lifetime of a session; released on drop.
pub struct SessionLock {
    path: PathBuf,
    file: File,
}

impl SessionLock {
    /// Acquire the lock at `path`. Fails if another live process already
    /// holds it (detected via an OS-level exclusive lock on the file, not
    /// just the file's existence, so a killed process's lock is released
    /// by the kernel even if the file itself was left behind).
    pub fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| anyhow!("session lock held by another process: {}", path.display()))?;

        let info = LockInfo { pid: std::process::id(), started_at: now_secs() };
        atomic_write(&path, &serde_json::to_string_pretty(&info)?)?;

        Ok(Self { path, file })
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

// ─── Heartbeat lock (Anton) ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatInfo {
    pub pid: u32,
    pub started_at: u64,
    pub heartbeat_at: u64,
    pub cwd: String,
    pub extra: serde_json::Value,
}

/// A lockfile that proves liveness via a periodically-refreshed heartbeat
/// timestamp rather than relying solely on the lockfile's presence. A lock
/// whose heartbeat is older than `stale_after` is considered abandoned and
/// may be reclaimed by a new run.
pub struct HeartbeatLock {
    path: PathBuf,
    extra: serde_json::Value,
}

impl HeartbeatLock {
    /// Acquire the lock, reclaiming a stale one if present.
    pub fn acquire(path: PathBuf, extra: serde_json::Value, stale_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if path.exists() {
            if let Ok(raw) = fs::read_to_string(&path) {
                if let Ok(info) = serde_json::from_str::<HeartbeatInfo>(&raw) {
                    let age = now_secs().saturating_sub(info.heartbeat_at);
                    if age <= stale_after.as_secs() {
                        return Err(anyhow!(
                            "lock {} held by pid {} (heartbeat {}s ago)",
                            path.display(),
                            info.pid,
                            age
                        ));
                    }
                    tracing::warn!(path = %path.display(), pid = info.pid, age_secs = age, "reclaiming stale heartbeat lock");
                }
            }
        }

        let lock = Self { path, extra };
        lock.write_heartbeat()?;
        Ok(lock)
    }

    fn write_heartbeat(&self) -> Result<()> {
        let info = HeartbeatInfo {
            pid: std::process::id(),
            started_at: now_secs(),
            heartbeat_at: now_secs(),
            cwd: std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default(),
            extra: self.extra.clone(),
        };
        atomic_write(&self.path, &serde_json::to_string_pretty(&info)?)
    }

    /// Refresh the heartbeat timestamp; call this periodically from the
    /// long-running loop that owns the lock.
    pub fn heartbeat(&self) -> Result<()> {
        self.write_heartbeat()
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for HeartbeatLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
