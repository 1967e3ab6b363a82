//! pagefail against a scratch `fail_page_alloc` tree: the knobs must be set
//! for the run and back at 0 afterwards, whatever ended it.

mod common;

use common::{control_tree, control_value, launch, read_report, report_path, PAGE_ALLOC_FILES};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::Signal;
use nix::unistd::geteuid;
use rand::Rng;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

fn assert_released(root: &Path) {
    for name in PAGE_ALLOC_FILES {
        assert_eq!(control_value(root, name), "0", "{name} not reset");
    }
}

#[test]
fn knobs_are_set_during_run_and_reset_after() {
    let tree = control_tree();
    let dir = tempfile::tempdir().unwrap();
    let report = report_path(&dir);
    let mut run = launch(
        "pagefail",
        &[
            "2",
            "--debugfs",
            tree.path().to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ],
    );

    sleep(Duration::from_millis(700));
    assert_eq!(control_value(tree.path(), "probability"), "50");
    assert_eq!(control_value(tree.path(), "interval"), "5");
    assert_eq!(control_value(tree.path(), "times"), "-1");
    assert_eq!(control_value(tree.path(), "min-order"), "0");

    let (status, elapsed) = run.wait_within(Duration::from_secs(6));
    assert!(status.success(), "{status:?}");
    assert!(elapsed < Duration::from_secs(4), "{elapsed:?}");
    assert_released(tree.path());
    assert!(run.live_processes().is_empty());

    let report = read_report(&report);
    assert_eq!(report["fault_state"], "fail_page_alloc");
    assert_eq!(report["shutdown"], "timer");
    assert!(report["workers_started"].as_u64().unwrap() > 1, "{report}");
}

#[test]
fn low_intensity_halves_probability() {
    let tree = control_tree();
    let mut run = launch(
        "pagefail",
        &["2", "l", "--debugfs", tree.path().to_str().unwrap()],
    );

    sleep(Duration::from_millis(700));
    assert_eq!(control_value(tree.path(), "probability"), "25");

    let (status, _) = run.wait_within(Duration::from_secs(6));
    assert!(status.success(), "{status:?}");
    assert_released(tree.path());
}

#[test]
fn tight_restart_loop_stays_bounded() {
    let tree = control_tree();
    let dir = tempfile::tempdir().unwrap();
    let report = report_path(&dir);
    let mut run = launch(
        "pagefail",
        &[
            "2",
            "--sleep-ms",
            "0",
            "--debugfs",
            tree.path().to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ],
    );

    let (status, elapsed) = run.wait_within(Duration::from_secs(6));
    assert!(status.success(), "{status:?}");
    assert!(elapsed < Duration::from_secs(4), "{elapsed:?}");
    assert_released(tree.path());
    assert!(run.live_processes().is_empty());

    let report = read_report(&report);
    assert!(report["workers_started"].as_u64().unwrap() > 10, "{report}");
}

#[test]
fn restart_count_follows_worker_lifetime() {
    let tree = control_tree();
    let dir = tempfile::tempdir().unwrap();
    let report = report_path(&dir);
    let mut run = launch(
        "pagefail",
        &[
            "2",
            "--sleep-ms",
            "200",
            "--debugfs",
            tree.path().to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ],
    );

    let (status, _) = run.wait_within(Duration::from_secs(6));
    assert!(status.success(), "{status:?}");

    let started = read_report(&report)["workers_started"].as_u64().unwrap();
    assert!((7..=11).contains(&started), "{started} workers in 2s");
}

#[test]
fn sigterm_resets_knobs() {
    let tree = control_tree();
    let dir = tempfile::tempdir().unwrap();
    let report = report_path(&dir);
    let mut run = launch(
        "pagefail",
        &[
            "30",
            "--debugfs",
            tree.path().to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ],
    );

    sleep(Duration::from_millis(500));
    run.signal(Signal::SIGTERM);
    let (status, elapsed) = run.wait_within(Duration::from_secs(5));

    assert!(status.success(), "{status:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert_released(tree.path());
    assert!(run.live_processes().is_empty());
    assert_eq!(read_report(&report)["shutdown"], "terminate");
}

#[test]
fn shutdown_at_random_points_leaves_nothing_behind() {
    let mut rng = rand::thread_rng();
    for round in 0..8 {
        let tree = control_tree();
        let mut run = launch(
            "pagefail",
            &["30", "--sleep-ms", "0", "--debugfs", tree.path().to_str().unwrap()],
        );

        sleep(Duration::from_millis(rng.gen_range(100..400)));
        let sig = if round % 2 == 0 {
            Signal::SIGINT
        } else {
            Signal::SIGTERM
        };
        run.signal(sig);
        let (status, _) = run.wait_within(Duration::from_secs(5));

        assert!(status.success(), "round {round}: {status:?}");
        assert_released(tree.path());
        assert!(run.live_processes().is_empty(), "round {round}");
    }
}

#[test]
fn fork_failure_releases_knobs_and_exits_71() {
    if geteuid().is_root() {
        eprintln!("skipping: RLIMIT_NPROC does not bind root");
        return;
    }

    let tree = control_tree();
    let dir = tempfile::tempdir().unwrap();
    let report = report_path(&dir);
    let (mut cmd, marker) = common::command(
        "pagefail",
        &[
            "5",
            "--debugfs",
            tree.path().to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ],
    );
    // SAFETY: setrlimit is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| setrlimit(Resource::RLIMIT_NPROC, 0, 0).map_err(std::io::Error::from));
    }
    let mut run = common::spawn(cmd, marker);

    let (status, elapsed) = run.wait_within(Duration::from_secs(5));
    assert_eq!(status.code(), Some(71));
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert_released(tree.path());
    assert!(run.live_processes().is_empty());

    let report = read_report(&report);
    assert_eq!(report["shutdown"], "fork-failure");
    assert_eq!(report["workers_started"], 0);
    assert!(report["error"].as_str().unwrap().contains("fork"), "{report}");
}

#[test]
fn missing_control_tree_fails_before_forking() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-debugfs");
    let report = report_path(&dir);
    let mut run = launch(
        "pagefail",
        &[
            "5",
            "--debugfs",
            missing.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ],
    );

    let (status, elapsed) = run.wait_within(Duration::from_secs(5));
    assert_eq!(status.code(), Some(74));
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert!(!missing.exists(), "control files must never be created");

    let mut stderr = String::new();
    run.child
        .stderr
        .take()
        .unwrap()
        .read_to_string(&mut stderr)
        .unwrap();
    assert!(stderr.contains("fail_page_alloc"), "{stderr}");

    let report = read_report(&report);
    assert_eq!(report["workers_started"], 0);
    assert!(report["shutdown"].is_null());
    assert!(report["error"].as_str().unwrap().contains("Control file"));
}
