//! Single-instance enforcement through a pid lock file.
//!
//! Ownership is an exclusive `flock` on the lock file; the pid written into
//! it is informational. The kernel drops the flock when its holder exits, so
//! a file left behind by a crashed or SIGKILLed run is simply taken over by
//! the next one. The file is unlinked while the flock is still held, and an
//! acquirer re-checks after locking that the path still names the inode it
//! locked.

use crate::utils::LockError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Open/lock rounds before giving up when the file keeps being replaced.
const MAX_ATTEMPTS: usize = 5;

/// Held process lock. Removing the file and dropping the flock releases it.
pub struct ProcessLock {
    path: PathBuf,
    pid: u32,
    file: Option<Flock<File>>,
}

impl fmt::Debug for ProcessLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLock")
            .field("path", &self.path)
            .field("pid", &self.pid)
            .field("released", &self.file.is_none())
            .finish()
    }
}

impl ProcessLock {
    /// Take the flock on `path` (creating it if needed) and record our pid.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let pid = std::process::id();

        for _ in 0..MAX_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;

            let mut locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(locked) => locked,
                Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                    return Err(LockError::Held {
                        path: path.to_path_buf(),
                        pid: read_pid(path),
                    });
                }
                Err((_, errno)) => return Err(std::io::Error::from(errno).into()),
            };

            if !names_same_file(&locked, path)? {
                debug!("Lock file {} was replaced while locking, retrying", path.display());
                continue;
            }

            let previous = read_content(&mut locked)?;
            let previous = previous.trim();
            if !previous.is_empty() {
                match previous.parse::<i32>() {
                    Ok(owner) if process_alive(owner) => warn!(
                        "Taking over lock file {} from pid {} which no longer holds it",
                        path.display(),
                        owner
                    ),
                    _ => warn!("Replacing stale lock file {} ({:?})", path.display(), previous),
                }
            }

            claim(&mut locked, path, pid)?;
            info!("Created lock file {} (pid {})", path.display(), pid);
            return Ok(Self {
                path: path.to_path_buf(),
                pid,
                file: Some(locked),
            });
        }

        Err(LockError::Held {
            path: path.to_path_buf(),
            pid: read_pid(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_released(&self) -> bool {
        self.file.is_none()
    }

    /// Remove the lock file, then drop the flock. Calling it again is a no-op.
    pub fn release(&mut self) -> std::io::Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        release(&self.path)?;
        self.file = None;
        Ok(())
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Remove a lock file unconditionally; a missing file is not an error.
pub fn release(path: &Path) -> std::io::Result<()> {
    if remove_if_present(path)? {
        info!("Removed lock file {}", path.display());
    }
    Ok(())
}

/// Overwrite the file with `pid`. On failure the half-written file is
/// removed so the next run does not read garbage.
fn claim(file: &mut File, path: &Path, pid: u32) -> Result<(), LockError> {
    if let Err(e) = write_pid(file, pid) {
        if let Err(err) = remove_if_present(path) {
            warn!("Failed to remove lock file {}: {}", path.display(), err);
        }
        return Err(e.into());
    }
    Ok(())
}

fn write_pid(file: &mut File, pid: u32) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", pid)?;
    file.sync_all()
}

fn names_same_file(file: &File, path: &Path) -> std::io::Result<bool> {
    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_content(file: &mut File) -> std::io::Result<String> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut content)?;
    Ok(content)
}

/// Pid recorded by the current holder, 0 when unknown.
fn read_pid(path: &Path) -> i32 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|c| c.lines().next().and_then(|l| l.trim().parse().ok()))
        .unwrap_or(0)
}

/// `kill(pid, 0)`: EPERM still means the process exists.
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(e) => {
            debug!("Lock owner {} not alive: {}", pid, e);
            false
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
