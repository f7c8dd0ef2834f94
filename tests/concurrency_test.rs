//! Cross-thread and cross-process contention on one data directory.

mod common;

use common::{TempDir, TestEnv};
use deferral::models::{DependencyType, NewItem};
use deferral::storage::{LockOptions, Storage, StoragePort};
use predicates::prelude::*;
use serial_test::serial;
use std::collections::BTreeSet;
use std::fs;
use std::process::Command as StdCommand;
use std::thread;

fn new_item(decision: String) -> NewItem {
    NewItem {
        decision,
        ..Default::default()
    }
}

#[test]
fn test_twenty_threads_get_ids_one_to_twenty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();

    let handles: Vec<_> = (0..20)
        .map(|n| {
            let path = path.clone();
            thread::spawn(move || {
                let storage =
                    Storage::open_with_options(&path, LockOptions::with_timeout_ms(30_000))
                        .unwrap();
                storage.create_item(new_item(format!("thread {}", n))).unwrap().id
            })
        })
        .collect();

    let returned: BTreeSet<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let expected: BTreeSet<u64> = (1..=20).collect();
    assert_eq!(returned, expected);

    let storage = Storage::open(&path).unwrap();
    let (items, _) = storage.snapshot().unwrap();
    assert_eq!(items.len(), 20);
    let stored: BTreeSet<u64> = items.iter().map(|i| i.id).collect();
    assert_eq!(stored, expected);
    assert!(!path.join(".lock").exists());
}

#[test]
fn test_concurrent_opposite_edges_cannot_both_land() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().to_path_buf();
    {
        let storage = Storage::open(&path).unwrap();
        storage.create_item(new_item("a".into())).unwrap();
        storage.create_item(new_item("b".into())).unwrap();
    }

    let edges = [(1u64, 2u64), (2, 1)];
    let handles: Vec<_> = edges
        .into_iter()
        .map(|(from, to)| {
            let path = path.clone();
            thread::spawn(move || {
                let storage =
                    Storage::open_with_options(&path, LockOptions::with_timeout_ms(30_000))
                        .unwrap();
                storage.create_dependency(from, to, DependencyType::Blocks).is_ok()
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(successes, 1);
}

#[test]
#[serial]
fn test_parallel_processes_allocate_unique_ids() {
    let env = TestEnv::new();

    let children: Vec<_> = (0..8)
        .map(|n| {
            StdCommand::new(env!("CARGO_BIN_EXE_dfr"))
                .args(["--lock-timeout-ms", "30000", "capture"])
                .arg(format!("process {}", n))
                .env("DFR_DATA_DIR", env.data_path())
                .env_remove("DFR_LOG")
                .spawn()
                .unwrap()
        })
        .collect();

    for mut child in children {
        assert!(child.wait().unwrap().success());
    }

    let list = env.json(&["list"]);
    let ids: BTreeSet<u64> = list["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, (1..=8).collect());
}

#[cfg(unix)]
#[test]
#[serial]
fn test_dead_holder_lock_is_reclaimed() {
    let env = TestEnv::new();

    let mut child = StdCommand::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    fs::write(env.data_path().join(".lock"), format!("{}\n", pid)).unwrap();

    env.dfr()
        .args(["--lock-timeout-ms", "100", "capture", "After crash"])
        .env("DFR_LOG", "warn")
        .assert()
        .success()
        .stderr(predicate::str::contains("removing stale lock"));

    assert!(!env.data_path().join(".lock").exists());
}

#[test]
fn test_live_holder_times_out_with_hint() {
    let env = TestEnv::new();
    // This test process is alive for the whole run
    fs::write(
        env.data_path().join(".lock"),
        format!("{}\n", std::process::id()),
    )
    .unwrap();

    env.dfr()
        .args(["--lock-timeout-ms", "100", "capture", "Blocked writer"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("high contention"));

    // The holder's lock is left alone and nothing was written
    assert!(env.data_path().join(".lock").exists());
    assert!(!env.data_path().join("items.jsonl").exists());
}

#[test]
fn test_reads_do_not_need_the_lock() {
    let env = TestEnv::new();
    env.capture("Readable");
    fs::write(
        env.data_path().join(".lock"),
        format!("{}\n", std::process::id()),
    )
    .unwrap();

    let list = env.json(&["--lock-timeout-ms", "50", "list"]);
    assert_eq!(list["total"], 1);
}
