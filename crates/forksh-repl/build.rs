//! Build metadata for `forksh --version`.

use std::path::Path;
use std::process::Command;

fn main() {
    // Tarball builds have no .git to watch.
    if Path::new("../../.git").exists() {
        println!("cargo::rerun-if-changed=../../.git/HEAD");
        println!("cargo::rerun-if-changed=../../.git/refs/heads/");
    }

    println!("cargo:rustc-env=FORKSH_GIT_HASH={}", git_hash());
    println!("cargo:rustc-env=FORKSH_BUILD_DATE={}", chrono::Utc::now().format("%Y-%m-%d"));
}

fn git_hash() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
