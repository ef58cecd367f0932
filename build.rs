use std::process::Command;

fn main() {
    // Capture git commit hash at compile time
    let git_hash = run(&["git", "rev-parse", "--short", "HEAD"]);
    println!("cargo:rustc-env=POLLCAST_GIT_HASH={}", git_hash);

    let build_date = run(&["date", "+%Y-%m-%d"]);
    println!("cargo:rustc-env=POLLCAST_BUILD_DATE={}", build_date);

    // Re-run if git HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
}

/// Trimmed stdout of `argv`, or "unknown" if it cannot be run.
fn run(argv: &[&str]) -> String {
    Command::new(argv[0])
        .args(&argv[1..])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
