use std::env;
use std::process::Command;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    let commit_full = env::var("GITHUB_SHA").ok().filter(|v| !v.is_empty());
    let commit_full = commit_full.or_else(|| run_git(&["rev-parse", "HEAD"]));
    let commit_full = commit_full.unwrap_or_else(|| "unknown".to_string());

    let commit_short = if commit_full != "unknown" {
        shorten_commit(&commit_full)
    } else {
        "unknown".to_string()
    };

    let build_date = run_git(&["log", "-1", "--format=%cI"])
        .or_else(build_time)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=FLOWTAP_BUILD_COMMIT={}", commit_short);
    println!("cargo:rustc-env=FLOWTAP_BUILD_COMMIT_FULL={}", commit_full);
    println!("cargo:rustc-env=FLOWTAP_BUILD_DATE={}", build_date);
}

fn run_git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() { None } else { Some(value) }
}

/// `SOURCE_DATE_EPOCH` when set (reproducible builds), otherwise now.
fn build_time() -> Option<String> {
    let now = match env::var("SOURCE_DATE_EPOCH") {
        Ok(raw) => {
            let secs = raw.trim().parse::<i64>().ok()?;
            OffsetDateTime::from_unix_timestamp(secs).ok()?
        }
        Err(_) => OffsetDateTime::now_utc(),
    };
    now.format(&Rfc3339).ok()
}

fn shorten_commit(full: &str) -> String {
    let len = full.len().min(7);
    full.chars().take(len).collect()
}
