use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    // runs git describe --always --dirty
    let git_hash = Command::new("git")
        .args(["describe", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    println!("cargo:rustc-env=GIT_HASH={git_hash}");
}
