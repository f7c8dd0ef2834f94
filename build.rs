//! Stamps `dfr --version` with where and when the binary came from.
//!
//! - `DFR_BUILD_TIMESTAMP`: UTC build time, or `SOURCE_DATE_EPOCH` when set so
//!   packaged builds are reproducible
//! - `DFR_GIT_COMMIT`: short hash with a `-dirty` suffix for uncommitted
//!   changes. A `DFR_GIT_COMMIT` already in the environment wins (release
//!   tarballs have no `.git`)

use chrono::{DateTime, Utc};
use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-env-changed=DFR_GIT_COMMIT");

    println!("cargo:rustc-env=DFR_BUILD_TIMESTAMP={}", build_time().format("%Y-%m-%dT%H:%M:%SZ"));
    println!("cargo:rustc-env=DFR_GIT_COMMIT={}", commit());
}

fn build_time() -> DateTime<Utc> {
    let Ok(epoch) = env::var("SOURCE_DATE_EPOCH") else {
        return Utc::now();
    };
    match epoch.trim().parse::<i64>().ok().and_then(|secs| DateTime::from_timestamp(secs, 0)) {
        Some(time) => time,
        None => {
            println!("cargo:warning=ignoring unparsable SOURCE_DATE_EPOCH {:?}", epoch);
            Utc::now()
        }
    }
}

fn commit() -> String {
    if let Ok(pinned) = env::var("DFR_GIT_COMMIT") {
        if !pinned.trim().is_empty() {
            return pinned.trim().to_string();
        }
    }

    let Some(hash) = git(&["rev-parse", "--short", "HEAD"]) else {
        return "unknown".to_string();
    };
    match git(&["status", "--porcelain", "--untracked-files=no"]) {
        Some(changes) if !changes.is_empty() => format!("{}-dirty", hash),
        _ => hash,
    }
}

/// Trimmed stdout of a successful git command.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8(output.stdout).ok()?.trim().to_string())
}
