// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use igt_runner::{
    list::JobList,
    results::{self, TestResult, TestrunResult},
    runner::{RunStats, TestRunnerBuilder},
    settings::Settings,
    signal::SignalHandlerKind,
    test_filter::TestFilter,
};
use std::{fs, os::unix::fs::symlink, process::Command};

/// Fake binaries that exit on their own.
pub const WELL_BEHAVED: [&str; 4] = ["successtest", "no-subtests", "skippers", "dynamic"];

fn binary_path(name: &str) -> &'static str {
    match name {
        "successtest" => env!("CARGO_BIN_EXE_successtest"),
        "no-subtests" => env!("CARGO_BIN_EXE_no-subtests"),
        "skippers" => env!("CARGO_BIN_EXE_skippers"),
        "dynamic" => env!("CARGO_BIN_EXE_dynamic"),
        "hangs" => env!("CARGO_BIN_EXE_hangs"),
        "stubborn" => env!("CARGO_BIN_EXE_stubborn"),
        other => panic!("unknown fake binary {other}"),
    }
}

/// A temporary test root: links to fake binaries plus a `test-list.txt` catalogue.
pub struct TestRoot {
    dir: Utf8TempDir,
}

impl TestRoot {
    pub fn new(binaries: &[&str]) -> Self {
        let dir = Utf8TempDir::with_prefix("igt-test-root-").expect("created test root");
        for name in binaries {
            symlink(binary_path(name), dir.path().join(name)).expect("linked fake binary");
        }
        fs::write(
            dir.path().join("test-list.txt"),
            format!("TESTLIST\n{}\nEND TESTLIST\n", binaries.join(" ")),
        )
        .expect("wrote catalogue");
        Self { dir }
    }

    pub fn path(&self) -> &Utf8Path {
        self.dir.path()
    }
}

/// A fresh results directory and settings pointing at it.
pub struct ResultsDir {
    dir: Utf8TempDir,
}

impl ResultsDir {
    pub fn new() -> Self {
        Self {
            dir: Utf8TempDir::with_prefix("igt-results-").expect("created results dir"),
        }
    }

    /// A path inside the temporary directory that does not exist yet.
    pub fn path(&self) -> Utf8PathBuf {
        self.dir.path().join("run")
    }

    pub fn settings(&self, root: &TestRoot) -> Settings {
        Settings::new(root.path(), self.path())
    }

    pub fn job_dir(&self, index: usize) -> Utf8PathBuf {
        self.path().join(index.to_string())
    }

    pub fn results(&self) -> TestrunResult {
        results::generate_results(&self.path()).expect("generated results")
    }
}

fn builder() -> TestRunnerBuilder {
    let mut builder = TestRunnerBuilder::default();
    builder
        .set_signal_handler(SignalHandlerKind::Noop)
        .set_kmsg_path(None);
    builder
}

/// Builds the job list for `settings` and runs it to completion.
pub fn run(settings: Settings, filter: &TestFilter) -> RunStats {
    let job_list = JobList::build(&settings, filter).expect("built job list");
    builder()
        .initialize(settings, job_list)
        .expect("initialized run")
        .execute()
        .expect("executed run")
}

/// Resumes the run in `results_path` and runs it to completion.
pub fn resume(results_path: &Utf8Path) -> RunStats {
    builder()
        .resume(results_path)
        .expect("resumed run")
        .execute()
        .expect("executed run")
}

pub fn result_of(report: &TestrunResult, name: &str) -> Option<TestResult> {
    report.tests.get(name).and_then(|record| record.result)
}

/// Runs `igt-runner-dup` with a clean environment.
pub fn igt_runner_cli() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_igt-runner-dup"));
    cmd.env_remove("IGT_TEST_ROOT")
        .env_remove("IGT_RUNNER_LOG")
        .env("IGT_RUNNER_COLOR", "never");
    cmd
}
