//! Cross-process vault lock.
//!
//! A vault may sit on shared or synchronized storage, so exclusive write
//! access is enforced with a heartbeat-based lock file rather than an OS
//! file lock. One process holds the lock, refreshes its heartbeat on a
//! background thread, and a holder whose heartbeat stops refreshing is
//! considered stale and can be taken over.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::atomic_write_file;

/// Contents of `.notevault/vault.lock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultLockInfo {
    pub hostname: String,
    pub pid: u32,
    pub locked_at: DateTime<Utc>,
    /// Refreshed on the heartbeat interval while the holder runs.
    pub heartbeat: DateTime<Utc>,
}

/// Result of attempting to acquire a vault lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum LockAcquireResult {
    Success,
    /// This process already holds the lock.
    AlreadyHeld,
    Denied {
        holder: VaultLockInfo,
        is_stale: bool,
    },
    Error { message: String },
}

/// A heartbeat older than this is stale. Generous, to ride out sync delays
/// on networked storage.
const STALE_THRESHOLD_SECS: i64 = 120;

const HEARTBEAT_INTERVAL_SECS: u64 = 15;

fn lock_file_path(vault_root: &Path) -> PathBuf {
    vault_root.join(".notevault").join("vault.lock")
}

fn read_lock_file(lock_path: &Path) -> Result<VaultLockInfo, String> {
    let content =
        fs::read_to_string(lock_path).map_err(|e| format!("Failed to read lock file: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse lock file: {}", e))
}

fn write_lock_file(lock_path: &Path, info: &VaultLockInfo) -> Result<(), String> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create lock directory: {}", e))?;
    }
    let content = serde_json::to_string_pretty(info)
        .map_err(|e| format!("Failed to serialize lock: {}", e))?;
    atomic_write_file(lock_path, content.as_bytes())
}

fn local_identity() -> (String, u32) {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    (hostname, std::process::id())
}

fn is_ours(info: &VaultLockInfo) -> bool {
    let (hostname, pid) = local_identity();
    info.hostname == hostname && info.pid == pid
}

fn is_stale(info: &VaultLockInfo) -> bool {
    (Utc::now() - info.heartbeat).num_seconds() > STALE_THRESHOLD_SECS
}

struct ActiveLock {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

/// Locks held by this process, keyed by vault root.
static ACTIVE_LOCKS: Lazy<Mutex<HashMap<PathBuf, ActiveLock>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn start_heartbeat(vault_root: PathBuf) {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let lock_path = lock_file_path(&vault_root);

    let handle = std::thread::spawn(move || {
        loop {
            // Sleep in short steps so release does not block a full interval.
            for _ in 0..HEARTBEAT_INTERVAL_SECS {
                if stop_flag.load(Ordering::Relaxed) {
                    return;
                }
                std::thread::sleep(Duration::from_secs(1));
            }
            if stop_flag.load(Ordering::Relaxed) {
                return;
            }

            match read_lock_file(&lock_path) {
                Ok(mut info) if is_ours(&info) => {
                    info.heartbeat = Utc::now();
                    if let Err(e) = write_lock_file(&lock_path, &info) {
                        log::warn!("[vault_lock] Heartbeat write failed: {}", e);
                    }
                }
                Ok(_) => {
                    log::warn!("[vault_lock] Lock no longer ours, stopping heartbeat");
                    return;
                }
                Err(e) => {
                    log::warn!("[vault_lock] Heartbeat read failed: {}", e);
                }
            }
        }
    });

    ACTIVE_LOCKS.lock().unwrap().insert(
        vault_root,
        ActiveLock {
            stop,
            handle: Some(handle),
        },
    );
}

fn stop_heartbeat(vault_root: &Path) {
    if let Some(mut active) = ACTIVE_LOCKS.lock().unwrap().remove(vault_root) {
        active.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = active.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Try to take the vault lock. `force` takes over a held lock, leaving the
/// previous holder's info behind as a conflict backup.
pub fn acquire_vault_lock(vault_root: &Path, force: bool) -> LockAcquireResult {
    let lock_path = lock_file_path(vault_root);

    if lock_path.exists() {
        match read_lock_file(&lock_path) {
            Ok(existing) => {
                if is_ours(&existing) {
                    return LockAcquireResult::AlreadyHeld;
                }
                let stale = is_stale(&existing);
                if !force && !stale {
                    return LockAcquireResult::Denied {
                        holder: existing,
                        is_stale: false,
                    };
                }
                if force && !stale {
                    // Keep a record of who we displaced.
                    let backup = lock_path.with_extension("lock.conflict");
                    if let Ok(content) = fs::read_to_string(&lock_path) {
                        let _ = fs::write(&backup, content);
                    }
                    log::warn!(
                        "[vault_lock] Forcing takeover from {} (pid {})",
                        existing.hostname,
                        existing.pid
                    );
                }
            }
            Err(e) => {
                // Unreadable lock file: treat as stale and replace it.
                log::warn!("[vault_lock] Replacing unreadable lock file: {}", e);
            }
        }
    }

    let (hostname, pid) = local_identity();
    let now = Utc::now();
    let info = VaultLockInfo {
        hostname,
        pid,
        locked_at: now,
        heartbeat: now,
    };

    match write_lock_file(&lock_path, &info) {
        Ok(()) => {
            start_heartbeat(vault_root.to_path_buf());
            log::info!("[vault_lock] Acquired lock on {}", vault_root.display());
            LockAcquireResult::Success
        }
        Err(message) => LockAcquireResult::Error { message },
    }
}

/// Release the lock if this process holds it. Releasing a lock we do not
/// hold is a no-op.
pub fn release_vault_lock(vault_root: &Path) -> Result<(), String> {
    stop_heartbeat(vault_root);

    let lock_path = lock_file_path(vault_root);
    if !lock_path.exists() {
        return Ok(());
    }
    match read_lock_file(&lock_path) {
        Ok(info) if !is_ours(&info) => {
            log::warn!("[vault_lock] Not releasing lock held by {}", info.hostname);
            Ok(())
        }
        _ => fs::remove_file(&lock_path)
            .map_err(|e| format!("Failed to remove lock file: {}", e)),
    }
}

/// Current lock holder and whether they are stale, if a lock exists.
pub fn check_vault_lock_status(vault_root: &Path) -> Option<(VaultLockInfo, bool)> {
    let lock_path = lock_file_path(vault_root);
    if !lock_path.exists() {
        return None;
    }
    read_lock_file(&lock_path).ok().map(|info| {
        let stale = is_stale(&info);
        (info, stale)
    })
}

/// Release every lock this process holds. Called on shutdown.
pub fn release_all_locks() {
    let roots: Vec<PathBuf> = ACTIVE_LOCKS.lock().unwrap().keys().cloned().collect();
    for root in roots {
        if let Err(e) = release_vault_lock(&root) {
            log::warn!("[vault_lock] Failed to release {}: {}", root.display(), e);
        }
    }
}
