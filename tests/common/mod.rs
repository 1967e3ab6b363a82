//! Helpers for driving the fault binaries as real processes.
#![allow(dead_code)]

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const MARKER_ENV: &str = "FAULTKIT_TEST_MARKER";
pub const PAGE_ALLOC_FILES: [&str; 4] = ["probability", "interval", "times", "min-order"];

pub fn binary(name: &str) -> &'static str {
    match name {
        "leak" => env!("CARGO_BIN_EXE_leak"),
        "memeater" => env!("CARGO_BIN_EXE_memeater"),
        "pagefail" => env!("CARGO_BIN_EXE_pagefail"),
        other => panic!("unknown binary {other}"),
    }
}

/// A launched fault program tagged with a unique environment marker, so its
/// workers can be found in /proc even after they are reparented.
pub struct Run {
    pub child: Child,
    pub marker: String,
    pub started: Instant,
}

pub fn command(name: &str, args: &[&str]) -> (Command, String) {
    let marker = uuid::Uuid::new_v4().to_string();
    let mut cmd = Command::new(binary(name));
    cmd.args(args)
        .env(MARKER_ENV, &marker)
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    for var in [
        "FAULTKIT_SLEEP_MS",
        "FAULTKIT_ITERATIONS",
        "FAULTKIT_RESTART",
        "FAULTKIT_RESTART_DELAY_MS",
        "FAULTKIT_REPORT",
        "FAULTKIT_DEBUGFS",
    ] {
        cmd.env_remove(var);
    }
    (cmd, marker)
}

pub fn spawn(mut cmd: Command, marker: String) -> Run {
    let started = Instant::now();
    let child = cmd.spawn().expect("spawn fault binary");
    Run {
        child,
        marker,
        started,
    }
}

pub fn launch(name: &str, args: &[&str]) -> Run {
    let (cmd, marker) = command(name, args);
    spawn(cmd, marker)
}

impl Run {
    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    pub fn signal(&self, sig: Signal) {
        kill(self.pid(), sig).expect("signal fault binary");
    }

    /// Wait for exit, killing the whole marker set if `limit` passes.
    pub fn wait_within(&mut self, limit: Duration) -> (ExitStatus, Duration) {
        loop {
            if let Some(status) = self.child.try_wait().expect("try_wait") {
                return (status, self.started.elapsed());
            }
            if self.started.elapsed() > limit {
                let _ = self.child.kill();
                let _ = self.child.wait();
                kill_marked(&self.marker);
                panic!("fault binary still running after {limit:?}");
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn live_processes(&self) -> Vec<i32> {
        marked_processes(&self.marker)
    }
}

/// Pids of live (non-zombie) processes carrying `marker` in their environment
pub fn marked_processes(marker: &str) -> Vec<i32> {
    let needle = format!("{MARKER_ENV}={marker}");
    let mut found = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return found;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        let Ok(environ) = fs::read(entry.path().join("environ")) else {
            continue;
        };
        let tagged = environ
            .split(|b| *b == 0)
            .any(|var| var == needle.as_bytes());
        if tagged && !is_zombie(pid) {
            found.push(pid);
        }
    }
    found
}

fn is_zombie(pid: i32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(true)
}

fn kill_marked(marker: &str) {
    for pid in marked_processes(marker) {
        let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

/// Scratch `fail_page_alloc` tree with every knob at 0
pub fn control_tree() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("fail_page_alloc");
    fs::create_dir(&dir).unwrap();
    for name in PAGE_ALLOC_FILES {
        fs::write(dir.join(name), "0").unwrap();
    }
    root
}

pub fn control_value(root: &Path, name: &str) -> String {
    fs::read_to_string(root.join("fail_page_alloc").join(name)).unwrap()
}

pub fn report_path(dir: &TempDir) -> PathBuf {
    dir.path().join("report.json")
}

pub fn read_report(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(path).expect("report written")).expect("report is json")
}
