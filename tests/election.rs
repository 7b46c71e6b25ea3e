//! Integration tests for owner election against the real filesystem and,
//! where safe, the real process table.

use tempfile::TempDir;

use code_graph::{Election, IndexConfig, Liveness, ProcessProbe, Role, SignalProbe};

/// Probe with a fixed answer, for scenarios the real process table cannot
/// reproduce deterministically.
struct FixedProbe(Liveness);

impl ProcessProbe for FixedProbe {
    fn is_alive(&self, _pid: u32) -> Liveness {
        self.0
    }
}

#[test]
fn election_creates_the_cache_directory() {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::new(dir.path());
    assert!(!config.cache_dir().exists());

    let election = Election::for_current_process(config.lock_path());
    let outcome = election.acquire(&SignalProbe).unwrap();
    assert_eq!(outcome.role, Role::Owner);
    assert!(config.lock_path().exists());

    election.release().unwrap();
    assert!(!config.lock_path().exists());
}

#[test]
fn live_owner_excludes_other_processes() {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::new(dir.path());

    // The current process is genuinely alive, so the real probe must refuse
    // the takeover.
    let owner = Election::for_current_process(config.lock_path());
    owner.acquire(&SignalProbe).unwrap();

    let contender = Election::new(config.lock_path(), std::process::id() + 1);
    let outcome = contender.acquire(&SignalProbe).unwrap();
    assert_eq!(outcome.role, Role::Reader);
    assert_eq!(outcome.owner_pid, Some(std::process::id()));
}

#[test]
fn crashed_owner_is_superseded() {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::new(dir.path());

    let crashed = Election::new(config.lock_path(), 12345);
    crashed.acquire(&FixedProbe(Liveness::Alive)).unwrap();
    // No release: the owner "crashed" with its lock in place.

    let successor = Election::new(config.lock_path(), 67890);
    let outcome = successor.acquire(&FixedProbe(Liveness::Dead)).unwrap();
    assert_eq!(outcome.role, Role::Owner);
    assert_eq!(outcome.owner_pid, Some(67890));

    // The crashed process coming back must not remove the successor's lock.
    crashed.release().unwrap();
    assert!(config.lock_path().exists());
}

#[test]
fn ownership_cycles_through_sequential_processes() {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::new(dir.path());

    for pid in [100, 200, 300] {
        let election = Election::new(config.lock_path(), pid);
        let outcome = election.acquire(&FixedProbe(Liveness::Alive)).unwrap();
        assert_eq!(outcome.role, Role::Owner);
        assert_eq!(outcome.owner_pid, Some(pid));
        election.release().unwrap();
    }
}
