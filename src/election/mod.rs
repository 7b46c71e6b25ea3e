//! Lock-file based owner election.
//!
//! At most one OS process per project holds the owner (read/write) role; all
//! others are readers. The protocol is a single text file holding the owner's
//! pid: exclusive-create wins ownership, and liveness is derived directly
//! from OS process existence. No heartbeats: a crashed owner is taken over,
//! an unresponsive-but-alive owner is not.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Total acquisition attempts before settling for a best-effort reader
/// outcome.
const MAX_ACQUIRE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The process exists but signalling it is not permitted. Ambiguous, so
    /// it must be treated as alive: a wrong takeover would mean two owners.
    Ambiguous,
}

/// OS-specific process existence check, abstracted so platforms without
/// POSIX signals can supply their own implementation.
pub trait ProcessProbe {
    fn is_alive(&self, pid: u32) -> Liveness;
}

/// Default probe: signal 0 via `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProbe;

#[cfg(unix)]
impl ProcessProbe for SignalProbe {
    fn is_alive(&self, pid: u32) -> Liveness {
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if rc == 0 {
            return Liveness::Alive;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => Liveness::Dead,
            Some(libc::EPERM) => Liveness::Ambiguous,
            _ => Liveness::Ambiguous,
        }
    }
}

#[cfg(not(unix))]
impl ProcessProbe for SignalProbe {
    fn is_alive(&self, _pid: u32) -> Liveness {
        // Without a cheap existence check, never steal a lock.
        Liveness::Ambiguous
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Reader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionOutcome {
    pub role: Role,
    /// Pid recorded in the lock file. None only for the best-effort reader
    /// fallback when the lock could not be read.
    pub owner_pid: Option<u32>,
}

pub struct Election {
    lock_path: PathBuf,
    pid: u32,
}

impl Election {
    pub fn new(lock_path: impl AsRef<Path>, pid: u32) -> Self {
        Self {
            lock_path: lock_path.as_ref().to_path_buf(),
            pid,
        }
    }

    /// Election for the current process.
    pub fn for_current_process(lock_path: impl AsRef<Path>) -> Self {
        Self::new(lock_path, std::process::id())
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Attempts to become the owner. EEXIST on the lock file is the expected
    /// reader-path signal, not an error; a stale lock (dead or unparseable
    /// pid) is deleted and the attempt retried, bounded at
    /// [`MAX_ACQUIRE_ATTEMPTS`].
    pub fn acquire(&self, probe: &dyn ProcessProbe) -> Result<ElectionOutcome> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    writeln!(file, "{}", self.pid)?;
                    tracing::debug!(pid = self.pid, "acquired index ownership");
                    return Ok(ElectionOutcome {
                        role: Role::Owner,
                        owner_pid: Some(self.pid),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    match self.recorded_pid() {
                        // Lock vanished between create and read; retry.
                        None => continue,
                        Some(Err(())) => {
                            tracing::warn!("lock file unreadable; treating as stale");
                            self.remove_lock_best_effort();
                            continue;
                        }
                        Some(Ok(owner_pid)) => match probe.is_alive(owner_pid) {
                            Liveness::Dead => {
                                tracing::info!(
                                    owner_pid,
                                    "stale lock from dead process; taking over"
                                );
                                self.remove_lock_best_effort();
                                continue;
                            }
                            Liveness::Alive | Liveness::Ambiguous => {
                                return Ok(ElectionOutcome {
                                    role: Role::Reader,
                                    owner_pid: Some(owner_pid),
                                });
                            }
                        },
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Contended beyond the retry budget: report whatever the lock says
        // right now, as a reader.
        let owner_pid = self.recorded_pid().and_then(|r| r.ok());
        Ok(ElectionOutcome {
            role: Role::Reader,
            owner_pid,
        })
    }

    /// Deletes the lock only if it still records this process's pid. A
    /// reader, or an owner superseded after a stale takeover, never deletes
    /// another process's lock.
    pub fn release(&self) -> Result<()> {
        match self.recorded_pid() {
            Some(Ok(pid)) if pid == self.pid => {
                fs::remove_file(&self.lock_path)?;
                tracing::debug!(pid = self.pid, "released index ownership");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// None: lock file absent. Some(Err): present but not a pid.
    fn recorded_pid(&self) -> Option<std::result::Result<u32, ()>> {
        match fs::read_to_string(&self.lock_path) {
            Ok(text) => Some(text.trim().parse::<u32>().map_err(|_| ())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(_) => Some(Err(())),
        }
    }

    fn remove_lock_best_effort(&self) {
        // A concurrent remover already did the work; ignore the race.
        let _ = fs::remove_file(&self.lock_path);
    }
}
