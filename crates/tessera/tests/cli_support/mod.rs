use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub fn tessera_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tessera"))
}

/// Environment for an isolated home directory.
pub fn home_env(home: &Path) -> Vec<(String, String)> {
    vec![
        ("TESSERA_HOME".to_string(), home.to_string_lossy().to_string()),
        ("TESSERA_ACTOR".to_string(), "cli-test".to_string()),
        ("RUST_LOG".to_string(), "error".to_string()),
    ]
}

pub fn run_cli(args: &[&str], envs: &[(String, String)]) -> Output {
    let mut cmd = Command::new(tessera_bin());
    cmd.args(args);
    cmd.env_remove("TESSERA_DATABASE");
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().expect("failed to execute tessera CLI")
}

pub fn assert_cli_success(output: &Output, args: &[&str]) {
    assert!(
        output.status.success(),
        "tessera {:?} failed\nstdout:\n{}\nstderr:\n{}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn run_cli_json<T: DeserializeOwned>(args: &[&str], envs: &[(String, String)]) -> T {
    let output = run_cli(args, envs);
    assert_cli_success(&output, args);
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "invalid JSON from tessera {:?}: {}\n{}",
            args,
            e,
            String::from_utf8_lossy(&output.stdout)
        )
    })
}
