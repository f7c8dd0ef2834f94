//! Advisory lock for a data directory.
//!
//! The lock is a `.lock` file holding the decimal PID of its holder. It is
//! created atomically with its content in place, so a competing reader never
//! sees an empty lock. A lock whose content does not parse, or whose PID is
//! not a running process, is stale and gets removed by the next acquirer.

use crate::{Error, Result};
use rand::Rng;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Name of the lock file inside a data directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Timing knobs for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up with `LockTimeout` after this long
    pub timeout: Duration,
    /// First wait between attempts; doubles each retry
    pub initial_backoff: Duration,
    /// Upper bound on a single wait
    pub max_backoff: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(250),
        }
    }
}

impl LockOptions {
    /// Default backoff with the given timeout.
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            ..Self::default()
        }
    }
}

/// What currently sits in the lock file.
#[derive(Debug, PartialEq, Eq)]
enum Holder {
    Live(u32),
    Stale(String),
    /// Released between our create attempt and our read
    Gone,
}

/// Acquires and releases the lock for one data directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    path: PathBuf,
    options: LockOptions,
}

impl LockManager {
    /// Create a lock manager for the given data directory.
    pub fn new(dir: &Path, options: LockOptions) -> Self {
        Self {
            dir: dir.to_path_buf(),
            path: dir.join(LOCK_FILE_NAME),
            options,
        }
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock using the configured timeout.
    pub fn acquire(&self) -> Result<LockGuard> {
        self.acquire_with_timeout(self.options.timeout)
    }

    /// Block until the lock is held or `timeout` elapses.
    ///
    /// Stale locks are removed and retried immediately without counting as
    /// contention. A live holder makes us wait with jittered exponential
    /// backoff capped at `max_backoff`.
    pub fn acquire_with_timeout(&self, timeout: Duration) -> Result<LockGuard> {
        let start = Instant::now();
        let mut delay = self.options.initial_backoff;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.try_create() {
                Ok(()) => {
                    debug!(path = %self.path.display(), attempts, "lock acquired");
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::Io(e)),
            }

            match self.inspect_holder()? {
                Holder::Gone => continue,
                Holder::Stale(reason) => {
                    warn!(path = %self.path.display(), %reason, "removing stale lock");
                    match fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(Error::Io(e)),
                    }
                    continue;
                }
                Holder::Live(pid) => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Err(Error::LockTimeout {
                            path: self.path.display().to_string(),
                            waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    let wait = jittered(delay).min(timeout - elapsed);
                    debug!(
                        path = %self.path.display(),
                        holder = pid,
                        attempts,
                        wait_ms = wait.as_millis() as u64,
                        "lock busy, backing off"
                    );
                    thread::sleep(wait);
                    delay = delay.saturating_mul(2).min(self.options.max_backoff);
                }
            }
        }
    }

    /// Atomically create the lock file with our PID already written.
    fn try_create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        writeln!(tmp, "{}", std::process::id())?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn inspect_holder(&self) -> Result<Holder> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Holder::Gone),
            Err(e) => return Err(Error::Io(e)),
        };
        Ok(classify_holder(&contents))
    }
}

fn classify_holder(contents: &str) -> Holder {
    match contents.trim().parse::<u32>() {
        Ok(pid) if is_process_alive(pid) => Holder::Live(pid),
        Ok(pid) => Holder::Stale(format!("holder pid {} is not running", pid)),
        Err(_) => Holder::Stale(format!("unparsable lock content {:?}", contents.trim())),
    }
}

/// Add up to 25% random jitter so waiting processes spread their retries.
fn jittered(delay: Duration) -> Duration {
    let base = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let jitter = rand::thread_rng().gen_range(0..=base / 4 + 1);
    Duration::from_millis(base.saturating_add(jitter))
}

/// Check whether a process with the given PID is running.
///
/// A permission error still proves the process exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return false,
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    // No liveness check available; never reclaim a lock by PID alone
    true
}

/// Proof that the lock is held. Releasing (or dropping) deletes the lock file.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Path of the lock file this guard holds.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the lock file. A lock file that is already gone is not an error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}
