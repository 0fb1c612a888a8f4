// Integration tests for the filesystem-backed lock registry

use matrix::runtime::{AliasRecord, FsStateStore, Registry, StateStore};
use matrix::MatrixError;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn fs_registry(dir: &TempDir) -> Registry {
    Registry::new(Arc::new(FsStateStore::new(dir.path().join("locks")).unwrap()))
}

#[test]
fn test_concurrent_acquire_single_winner() {
    let dir = TempDir::new().unwrap();
    let threads = 12;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            // Separate Registry per thread, same directory
            let registry = fs_registry(&dir);
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.acquire(AliasRecord::process(
                    "hello",
                    std::process::id(),
                    Some(8000),
                    PathBuf::from("/tmp/hello"),
                ))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, MatrixError::AlreadyRunning { .. })));
}

const STALE_LOCK: &str = r#"{"alias":"hello","kind":"process","pid":999999999,"port":52305,"url":null,
    "targetPath":"/tmp/hello","startedAt":"2024-01-01T00:00:00Z"}"#;

#[test]
fn test_concurrent_repair_of_stale_lock_single_winner() {
    let threads = 8;
    for _ in 0..50 {
        let dir = TempDir::new().unwrap();
        let locks = dir.path().join("locks");
        std::fs::create_dir_all(&locks).unwrap();
        std::fs::write(locks.join("hello.json"), STALE_LOCK).unwrap();

        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = fs_registry(&dir);
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.acquire(AliasRecord::process(
                        "hello",
                        std::process::id(),
                        Some(6000),
                        PathBuf::from("/tmp/hello"),
                    ))
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(winners, 1);
        assert_eq!(fs_registry(&dir).get("hello").unwrap().pid, std::process::id());
    }
}

#[test]
fn test_dead_pid_lock_repaired_on_disk() {
    let dir = TempDir::new().unwrap();
    let locks = dir.path().join("locks");
    std::fs::create_dir_all(&locks).unwrap();

    // Lock left behind by a process that no longer exists
    std::fs::write(
        locks.join("hello.json"),
        r#"{"alias":"hello","kind":"process","pid":999999999,"port":52305,"url":null,
            "targetPath":"/tmp/hello","startedAt":"2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let registry = fs_registry(&dir);
    let handle = registry
        .acquire(AliasRecord::process(
            "hello",
            std::process::id(),
            Some(6000),
            PathBuf::from("/tmp/hello"),
        ))
        .unwrap();
    assert!(handle.repaired_stale);
    assert_eq!(registry.get("hello").unwrap().port, Some(6000));

    // No scratch or tombstone files left behind
    let store = FsStateStore::new(&locks).unwrap();
    assert_eq!(store.keys().unwrap(), vec!["hello".to_string()]);
}

#[test]
fn test_ps_prunes_dead_locks_from_disk() {
    let dir = TempDir::new().unwrap();
    let registry = fs_registry(&dir);
    registry
        .acquire(AliasRecord::process(
            "gone",
            999_999_999,
            Some(1),
            PathBuf::from("/tmp/gone"),
        ))
        .unwrap();

    assert!(registry.list().unwrap().is_empty());
    assert!(!dir.path().join("locks").join("gone.json").exists());
}
