// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Resolves the directory persisted state (autosave snapshots, session and
//! Anton lockfiles, edit backups) lives under: an explicit env var first,
//! then the platform's XDG state/data directory, then a dotfile under the
//! user's home directory.

use std::path::PathBuf;

const ENV_VAR: &str = "IDLEHANDS_STATE_DIR";

/// Resolve the state directory, creating nothing — callers create it lazily
/// on first write.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_VAR) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(dir) = dirs::state_dir() {
        return dir.join("idlehands");
    }
    if let Some(dir) = dirs::data_dir() {
        return dir.join("idlehands");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".idlehands");
    }
    PathBuf::from(".idlehands")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // std::env::set_var affects the whole process; serialize tests that
    // touch it so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn env_override_wins() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(ENV_VAR, "/tmp/custom-state-dir");
        assert_eq!(state_dir(), PathBuf::from("/tmp/custom-state-dir"));
        std::env::remove_var(ENV_VAR);
    }

    #[test]
    fn empty_env_var_falls_through() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(ENV_VAR, "");
        let dir = state_dir();
        assert_ne!(dir, PathBuf::from(""));
        std::env::remove_var(ENV_VAR);
    }

    #[test]
    fn resolves_to_some_nonempty_path_without_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(ENV_VAR);
        let dir = state_dir();
        assert!(!dir.as_os_str().is_empty());
    }
}
