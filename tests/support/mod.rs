#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

pub struct TestStore {
    dir: TempDir,
}

impl TestStore {
    /// Empty directory, not yet initialized.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    /// Directory with `tw init` already run.
    pub fn init() -> Self {
        let store = Self::new();
        store.cmd().arg("init").assert().success();
        store
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.dir.path().join(".tw").join("tasks.json")
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(".tw.toml");
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// `tw` rooted at this store.
    pub fn cmd(&self) -> Command {
        let mut cmd = tw_cmd();
        cmd.current_dir(self.path());
        cmd
    }

    /// Run with `--json` and return the `data` field of the envelope.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .arg("--json")
            .args(args)
            .output()
            .expect("run tw");
        assert!(
            output.status.success(),
            "tw {args:?} failed: {}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let envelope: Value = serde_json::from_slice(&output.stdout).expect("json envelope");
        envelope["data"].clone()
    }

    /// Create a task and return its id.
    pub fn new_task(&self, title: &str, extra: &[&str]) -> String {
        let mut args = vec!["task", "new", title];
        args.extend_from_slice(extra);
        let data = self.json(&args);
        data["id"].as_str().expect("task id").to_string()
    }

    pub fn task(&self, id: &str) -> Value {
        self.json(&["task", "show", id])["task"].clone()
    }
}

pub fn tw_cmd() -> Command {
    let mut cmd = Command::cargo_bin("tw").expect("binary");
    cmd.env_remove("TW_DIR");
    cmd.env_remove("RUST_LOG");
    cmd
}
