use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Get the path to a compiled binary in the target directory
fn cargo_bin(name: &str) -> PathBuf {
    // Look for the binary in target/debug (standard cargo test location)
    let mut path = std::env::current_exe()
        .expect("Failed to get current exe")
        .parent()
        .expect("No parent")
        .parent()
        .expect("No grandparent")
        .to_path_buf();
    path.push(name);
    if path.exists() {
        return path;
    }

    // Fallback: try target/debug directly
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // integration-tests -> workspace root
    path.push("target");
    path.push("debug");
    path.push(name);
    if path.exists() {
        return path;
    }

    panic!("Binary '{}' not found. Run `cargo build --workspace` first.", name);
}

/// Run `corral` with the given arguments and an isolated (empty) config
/// file, so a developer's real config cannot leak into assertions.
pub fn run_corral(args: &[&str]) -> Output {
    let config_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = config_dir.path().join("config.json");

    Command::new(cargo_bin("corral"))
        .arg("--config")
        .arg(&config_path)
        .args(args)
        .output()
        .expect("Failed to run corral")
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}
