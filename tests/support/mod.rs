#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// A temporary project root with an initialized tasklink store.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn init() -> Self {
        let project = Self::empty();
        project.cmd().arg("init").assert().success();
        project
    }

    pub fn empty() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.dir.path().join(".tasklink")
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.store_dir().join("tasks").join(format!("{id}.json"))
    }

    pub fn write_config(&self, contents: &str) {
        fs::write(self.dir.path().join(".tasklink.toml"), contents).expect("write config");
    }

    /// Write a raw task document, bypassing every invariant.
    pub fn write_record(&self, id: &str, document: &Value) {
        let path = self.record_path(id);
        fs::create_dir_all(path.parent().expect("tasks dir")).expect("create tasks dir");
        fs::write(&path, serde_json::to_vec_pretty(document).expect("encode"))
            .expect("write record");
    }

    pub fn read_record(&self, id: &str) -> Value {
        let raw = fs::read(self.record_path(id)).expect("read record");
        serde_json::from_slice(&raw).expect("decode record")
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("tasklink").expect("tasklink binary");
        cmd.env_remove("RUST_LOG");
        cmd.env_remove("TASKLINK_ROOT");
        cmd.arg("--root").arg(self.dir.path());
        cmd
    }

    /// Run a command with `--json` and return the parsed envelope.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .args(args)
            .arg("--json")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("json envelope")
    }

    /// Run a failing command with `--json`; returns (exit code, envelope).
    pub fn json_err(&self, args: &[&str]) -> (i32, Value) {
        let output = self.cmd().args(args).arg("--json").assert().failure();
        let output = output.get_output();
        let code = output.status.code().expect("exit code");
        let value = serde_json::from_slice(&output.stdout).expect("json error envelope");
        (code, value)
    }

    pub fn new_task(&self, id: &str) -> String {
        let value = self.json(&["task", "new", &format!("task {id}"), "--id", id]);
        value["data"]["id"].as_str().expect("task id").to_string()
    }

    pub fn link(&self, relation: &str, a: &str, b: &str) {
        self.cmd()
            .args(["link", "add", relation, a, b])
            .assert()
            .success();
    }

    /// `(type, task)` pairs stored on a record.
    pub fn relationships(&self, id: &str) -> Vec<(String, String)> {
        let record = self.read_record(id);
        record["relationships"]
            .as_array()
            .map(|rels| {
                rels.iter()
                    .map(|rel| {
                        (
                            rel["type"].as_str().unwrap_or_default().to_string(),
                            rel["task"].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn pair(relation: &str, task: &str) -> (String, String) {
    (relation.to_string(), task.to_string())
}
