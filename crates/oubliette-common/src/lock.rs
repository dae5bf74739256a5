// lock.rs — advisory file locking and write-then-replace
//
// The locks guard against a *second process* (another launch by the same
// user, a remote save viewer) touching the save files; there is no
// intra-process concurrency to protect. Locking is done with a sidecar
// "<path>.lock" file created exclusively. Shared locks use the same sidecar
// as exclusive ones; two readers racing on a save file is rare enough that
// the conservative lock costs nothing in practice.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SaveError, SaveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// Retry behavior under contention.
#[derive(Debug, Clone)]
pub struct LockPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    /// Keep retrying forever instead of giving up after `attempts`.
    pub block: bool,
}

impl Default for LockPolicy {
    fn default() -> LockPolicy {
        LockPolicy {
            attempts: 30,
            backoff: Duration::from_millis(100),
            block: false,
        }
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

/// Held advisory lock. Released (sidecar removed) on drop, on every exit
/// path of the owning scope.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// Take the advisory lock for `path`, retrying with backoff under
/// contention per `policy`.
pub fn acquire(path: &Path, _kind: LockKind, policy: &LockPolicy) -> io::Result<LockGuard> {
    let lock_path = lock_path_for(path);
    let mut attempt = 0u32;
    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut f) => {
                let _ = write!(f, "{}", std::process::id());
                return Ok(LockGuard { lock_path });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                attempt += 1;
                if !policy.block && attempt >= policy.attempts {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        format!("could not lock \"{}\"", path.display()),
                    ));
                }
                tracing::debug!(path = %path.display(), attempt, "lock contended, retrying");
                std::thread::sleep(policy.backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Scoped lock on a named file. Acquires in the constructor; `mandatory`
/// escalates acquisition failure to an error the caller treats as fatal,
/// otherwise the lock is simply not held.
pub struct FileLock {
    guard: Option<LockGuard>,
}

impl FileLock {
    pub fn new(path: &Path, kind: LockKind, mandatory: bool, policy: &LockPolicy) -> SaveResult<FileLock> {
        match acquire(path, kind, policy) {
            Ok(guard) => Ok(FileLock { guard: Some(guard) }),
            Err(e) if mandatory => Err(SaveError::IoUnavailable {
                path: path.to_path_buf(),
                source: e,
            }),
            Err(_) => Ok(FileLock { guard: None }),
        }
    }

    pub fn locked(&self) -> bool {
        self.guard.is_some()
    }
}

/// Write `data` to `path` via a temporary file and rename, so a crash
/// mid-write never leaves a half-written save behind.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_os = path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp_path = PathBuf::from(tmp_os);

    let mut file = File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&tmp_path, path)
}

/// Atomic write under the exclusive advisory lock.
pub fn replace_locked(path: &Path, data: &[u8], policy: &LockPolicy) -> io::Result<()> {
    let _guard = acquire(path, LockKind::Exclusive, policy)?;
    atomic_write(path, data)
}

/// Read a whole file under the shared advisory lock.
pub fn read_locked(path: &Path, policy: &LockPolicy) -> io::Result<Vec<u8>> {
    let _guard = acquire(path, LockKind::Shared, policy)?;
    fs::read(path)
}
