//! Integration tests for item commands via CLI.
//!
//! These tests verify that item commands work correctly through the CLI:
//! - `dfr capture/show/list/update/delete` all work
//! - JSON and human-readable output formats are correct
//! - Filtering, sorting and pagination work
//! - Errors come back as JSON on stderr with a failing exit code

mod common;

use common::TestEnv;
use predicates::prelude::*;
use std::fs;

// === Capture ===

#[test]
fn test_capture_json() {
    let env = TestEnv::new();

    env.dfr()
        .args(["capture", "Pick an ORM", "-c", "Waiting on benchmarks", "-p", "high"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\":1"))
        .stdout(predicate::str::contains("\"type\":\"item\""))
        .stdout(predicate::str::contains("\"status\":\"pending\""))
        .stdout(predicate::str::contains("\"priority\":\"high\""))
        .stdout(predicate::str::contains("\"context\":\"Waiting on benchmarks\""));
}

#[test]
fn test_capture_human() {
    let env = TestEnv::new();

    env.dfr()
        .args(["capture", "Pick an ORM", "-t", "Backend", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#1 [pending/medium] Pick an ORM (backend)"));
}

#[test]
fn test_capture_assigns_sequential_ids() {
    let env = TestEnv::new();
    assert_eq!(env.capture("First"), 1);
    assert_eq!(env.capture("Second"), 2);
    assert_eq!(env.capture("Third"), 3);
}

#[test]
fn test_capture_writes_one_line_per_item() {
    let env = TestEnv::new();
    env.capture("First");
    env.capture("Second");

    let contents = fs::read_to_string(env.data_path().join("items.jsonl")).unwrap();
    assert_eq!(contents.lines().count(), 2);
    for line in contents.lines() {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["type"], "item");
    }
}

#[test]
fn test_capture_empty_decision_fails() {
    let env = TestEnv::new();

    env.dfr()
        .args(["capture", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error\""))
        .stderr(predicate::str::contains("decision must not be empty"));
}

#[test]
fn test_capture_invalid_priority_fails() {
    let env = TestEnv::new();

    env.dfr()
        .args(["capture", "Something", "-p", "urgent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid input"));
}

#[test]
fn test_capture_normalizes_tags() {
    let env = TestEnv::new();
    let item = env.json(&["capture", "Tagged", "-t", " API ", "-t", "api", "-t", "Infra"]);
    assert_eq!(item["tags"], serde_json::json!(["api", "infra"]));
}

// === Show ===

#[test]
fn test_show_item() {
    let env = TestEnv::new();
    env.capture("Choose a queue");

    let item = env.json(&["show", "1"]);
    assert_eq!(item["decision"], "Choose a queue");

    env.dfr()
        .args(["show", "1", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created:"));
}

#[test]
fn test_show_missing_item() {
    let env = TestEnv::new();

    env.dfr()
        .args(["show", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found: item 42"));
}

#[test]
fn test_show_zero_id_is_invalid() {
    let env = TestEnv::new();

    env.dfr()
        .args(["show", "0", "-H"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error: Invalid input"));
}

// === List ===

#[test]
fn test_list_empty() {
    let env = TestEnv::new();

    let list = env.json(&["list"]);
    assert_eq!(list["count"], 0);
    assert_eq!(list["total"], 0);

    env.dfr()
        .args(["list", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No items found."));
}

#[test]
fn test_list_filters() {
    let env = TestEnv::new();
    env.json(&["capture", "Database choice", "-p", "high", "-t", "backend"]);
    env.json(&["capture", "Color scheme", "-p", "low", "-t", "frontend"]);
    env.json(&["capture", "Cache layer", "-c", "maybe a database cache", "-t", "backend"]);

    let high = env.json(&["list", "--priority", "high"]);
    assert_eq!(high["total"], 1);
    assert_eq!(high["items"][0]["decision"], "Database choice");

    let backend = env.json(&["list", "--tag", "backend"]);
    assert_eq!(backend["total"], 2);

    let search = env.json(&["list", "-s", "DATABASE"]);
    assert_eq!(search["total"], 2);
}

#[test]
fn test_list_hides_archived_unless_requested() {
    let env = TestEnv::new();
    env.capture("Keep");
    env.capture("Shelve");
    env.dfr().args(["delete", "2"]).assert().success();

    assert_eq!(env.json(&["list"])["total"], 1);
    assert_eq!(env.json(&["list", "--all"])["total"], 2);
    assert_eq!(env.json(&["list", "--status", "archived"])["total"], 1);
}

#[test]
fn test_list_sort_and_paginate() {
    let env = TestEnv::new();
    env.json(&["capture", "a", "-p", "low"]);
    env.json(&["capture", "b", "-p", "high"]);
    env.json(&["capture", "c", "-p", "medium"]);
    env.json(&["capture", "d", "-p", "high"]);

    let sorted = env.json(&["list", "--sort", "priority", "--desc"]);
    let ids: Vec<u64> = sorted["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 4, 3, 1]);

    let page = env.json(&["list", "--offset", "1", "--limit", "2"]);
    assert_eq!(page["total"], 4);
    assert_eq!(page["count"], 2);
    assert_eq!(page["items"][0]["id"], 2);
    assert_eq!(page["items"][1]["id"], 3);
}

#[test]
fn test_list_invalid_sort_field() {
    let env = TestEnv::new();

    env.dfr()
        .args(["list", "--sort", "color"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid sort field"));
}

// === Update ===

#[test]
fn test_update_fields() {
    let env = TestEnv::new();
    env.json(&["capture", "Original", "-c", "old context", "-t", "x"]);

    let item = env.json(&[
        "update",
        "1",
        "--decision",
        "Revised",
        "--status",
        "in-progress",
        "-p",
        "high",
        "--clear-context",
        "-t",
        "y",
    ]);
    assert_eq!(item["decision"], "Revised");
    assert_eq!(item["status"], "in-progress");
    assert_eq!(item["priority"], "high");
    assert!(item.get("context").is_none());
    assert_eq!(item["tags"], serde_json::json!(["y"]));

    let cleared = env.json(&["update", "1", "--clear-tags"]);
    assert_eq!(cleared["tags"], serde_json::json!([]));
}

#[test]
fn test_update_accepts_underscore_status() {
    let env = TestEnv::new();
    env.capture("Thing");
    let item = env.json(&["update", "1", "--status", "in_progress"]);
    assert_eq!(item["status"], "in-progress");
}

#[test]
fn test_update_without_fields_fails() {
    let env = TestEnv::new();
    env.capture("Thing");

    env.dfr()
        .args(["update", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no fields to update"));
}

#[test]
fn test_update_missing_item_leaves_file_untouched() {
    let env = TestEnv::new();
    env.capture("Thing");
    let path = env.data_path().join("items.jsonl");
    let before = fs::read_to_string(&path).unwrap();

    env.dfr()
        .args(["update", "7", "--decision", "Nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));

    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

// === Delete ===

#[test]
fn test_soft_delete_archives() {
    let env = TestEnv::new();
    env.capture("Shelve me");

    let out = env.json(&["delete", "1"]);
    assert_eq!(out["hard"], false);
    assert_eq!(out["item"]["status"], "archived");
    assert_eq!(env.json(&["show", "1"])["status"], "archived");
}

#[test]
fn test_hard_delete_removes_item_and_dependencies() {
    let env = TestEnv::new();
    env.capture("A");
    env.capture("B");
    env.capture("C");
    env.block(1, 2);
    env.block(3, 2);

    env.dfr()
        .args(["delete", "2", "--hard", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted #2: B"));

    env.dfr().args(["show", "2"]).assert().failure();
    let deps = env.json(&["dep", "list", "1"]);
    assert_eq!(deps["dependencies"], serde_json::json!([]));
    let contents = fs::read_to_string(env.data_path().join("dependencies.jsonl")).unwrap();
    assert!(contents.trim().is_empty());
}

#[test]
fn test_corrupt_log_is_reported_with_line() {
    let env = TestEnv::new();
    env.capture("Fine");
    let path = env.data_path().join("items.jsonl");
    let mut contents = fs::read_to_string(&path).unwrap();
    contents.push_str("{not json}\n");
    fs::write(&path, contents).unwrap();

    env.dfr()
        .args(["list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Corrupt data"))
        .stderr(predicate::str::contains("line 2"));
}
