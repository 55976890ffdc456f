use std::env;
use std::process::Command;

use chrono::{TimeZone, Utc};

fn main() {
    println!("cargo:rustc-env=BUILD_DATE={}", build_date());
    println!("cargo:rustc-env=GIT_HASH={}", git_hash());

    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-env-changed=FLOWPILOT_GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}

/// Honours `SOURCE_DATE_EPOCH` for reproducible builds.
fn build_date() -> String {
    let timestamp = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Short commit id, suffixed with `-dirty` for uncommitted changes. Packaged sources without a
/// checkout can pass `FLOWPILOT_GIT_HASH`.
fn git_hash() -> String {
    if let Ok(hash) = env::var("FLOWPILOT_GIT_HASH") {
        if !hash.trim().is_empty() {
            return hash.trim().to_string();
        }
    }
    git(&["describe", "--always", "--dirty", "--abbrev=8"]).unwrap_or_else(|| "unknown".into())
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
