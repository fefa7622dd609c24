// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests that run the fake IGT binaries in `test-helpers/` for real.
//!
//! Kernel log capture is disabled for library-driven runs, so results only depend on what the
//! fake binaries print. CLI-driven runs use the default kernel log and only check for what does
//! not depend on it.

use igt_runner::{
    list::{JobEntry, JobList},
    output_store::LogKind,
    results::TestResult,
    test_filter::TestFilter,
};
use igt_runner_cli::IgtRunnerExitCode;
use pretty_assertions::assert_eq;
use std::fs;
use test_case::test_case;

mod fixtures;

use fixtures::*;

#[test_case(false, 6; "one job per subtest")]
#[test_case(true, 4; "one job per binary")]
fn job_list_from_catalogue(multiple_mode: bool, expected_len: usize) {
    let root = TestRoot::new(&WELL_BEHAVED);
    let results = ResultsDir::new();
    let mut settings = results.settings(&root);
    settings.multiple_mode = multiple_mode;

    let job_list = JobList::build(&settings, &TestFilter::any()).expect("built job list");
    assert_eq!(job_list.len(), expected_len);
    assert_eq!(job_list.entries[0].binary, "successtest");
    if multiple_mode {
        assert!(job_list.entries[0].subtests.is_empty());
    } else {
        assert_eq!(job_list.entries[0].subtests, ["first-subtest"]);
    }
}

#[test]
fn filtered_job_list() {
    let root = TestRoot::new(&WELL_BEHAVED);
    let results = ResultsDir::new();
    let filter =
        TestFilter::new(["successtest|skippers"], ["second|skip-two"]).expect("valid filter");

    let job_list = JobList::build(&results.settings(&root), &filter).expect("built job list");
    assert_eq!(
        job_list.entries,
        [
            JobEntry::new("successtest", vec!["first-subtest".to_owned()]),
            JobEntry::new("skippers", vec!["skip-one".to_owned()]),
        ]
    );
}

#[test]
fn full_run_produces_results() {
    let root = TestRoot::new(&WELL_BEHAVED);
    let results = ResultsDir::new();

    let stats = run(results.settings(&root), &TestFilter::any());
    assert_eq!(stats.job_count, 6);
    assert_eq!(stats.executions, 6);
    assert_eq!(stats.timeouts, 0);

    let journal = fs::read_to_string(results.job_dir(0).join(LogKind::Journal.file_name()))
        .expect("read journal");
    assert!(journal.starts_with("first-subtest\nexit:0 ("), "{journal}");

    let report = results.results();
    for (name, expected) in [
        ("igt@successtest@first-subtest", TestResult::Pass),
        ("igt@successtest@second-subtest", TestResult::Pass),
        ("igt@no-subtests", TestResult::Pass),
        ("igt@skippers@skip-one", TestResult::Skip),
        ("igt@skippers@skip-two", TestResult::Skip),
        ("igt@dynamic@engines", TestResult::Fail),
        ("igt@dynamic@engines@rcs0", TestResult::Pass),
        ("igt@dynamic@engines@bcs0", TestResult::Fail),
    ] {
        assert_eq!(result_of(&report, name), Some(expected), "result for {name}");
    }

    let no_subtests = &report.tests["igt@no-subtests"];
    assert!(no_subtests.out.contains("this binary has no subtests"));
    assert!(no_subtests.igt_version.is_some());

    let root_totals = report.totals.root().expect("root totals");
    assert_eq!(root_totals.get(TestResult::Pass), 4);
    assert_eq!(root_totals.get(TestResult::Skip), 2);
    assert_eq!(root_totals.get(TestResult::Fail), 2);
    assert_eq!(root_totals.total(), 8);
    assert!(report.runtimes.contains_key("igt@successtest"));
    assert!(report.uname.is_some());
}

#[test]
fn resuming_a_finished_run_runs_nothing() {
    let root = TestRoot::new(&WELL_BEHAVED);
    let results = ResultsDir::new();
    let mut settings = results.settings(&root);
    settings.multiple_mode = true;
    run(settings, &TestFilter::any());
    let before = results.results();

    let stats = resume(&results.path());
    assert_eq!(stats.started_at, 4);
    assert_eq!(stats.executions, 0);

    let after = results.results();
    assert_eq!(after.tests, before.tests);
    assert_eq!(after.totals, before.totals);
}

#[test]
fn crashed_subtest_is_not_run_again() {
    let root = TestRoot::new(&["successtest"]);
    let results = ResultsDir::new();
    let mut settings = results.settings(&root);
    settings.multiple_mode = true;
    fs::create_dir(results.path()).expect("created results dir");
    settings.write_to_dir(&results.path()).expect("wrote settings");
    JobList::new(vec![JobEntry::new("successtest", Vec::new())])
        .write_to_dir(&results.path())
        .expect("wrote job list");

    // The machine went down in the middle of the first subtest.
    let job_dir = results.job_dir(0);
    fs::create_dir(&job_dir).expect("created job dir");
    fs::write(job_dir.join(LogKind::Journal.file_name()), "first-subtest\n")
        .expect("wrote journal");
    fs::write(
        job_dir.join(LogKind::Out.file_name()),
        "Starting subtest: first-subtest\n",
    )
    .expect("wrote out");

    let stats = resume(&results.path());
    assert_eq!(stats.executions, 1);

    let journal =
        fs::read_to_string(job_dir.join(LogKind::Journal.file_name())).expect("read journal");
    assert!(journal.starts_with("first-subtest\nsecond-subtest\nexit:0 ("), "{journal}");

    let report = results.results();
    assert_eq!(
        result_of(&report, "igt@successtest@first-subtest"),
        Some(TestResult::Incomplete)
    );
    assert_eq!(
        result_of(&report, "igt@successtest@second-subtest"),
        Some(TestResult::Pass)
    );
}

#[test]
fn hung_subtest_times_out() {
    let root = TestRoot::new(&["hangs"]);
    let results = ResultsDir::new();
    let mut settings = results.settings(&root);
    settings.inactivity_timeout = 1;

    let stats = run(settings, &TestFilter::any());
    assert_eq!(stats.job_count, 2);
    assert_eq!(stats.timeouts, 1);
    // The timed-out job is retried without the subtest that hung.
    assert_eq!(stats.executions, 3);

    let journal = fs::read_to_string(results.job_dir(1).join(LogKind::Journal.file_name()))
        .expect("read journal");
    let lines: Vec<_> = journal.lines().collect();
    assert_eq!(lines[0], "slow");
    assert!(lines[1].starts_with("timeout:"), "{journal}");
    assert!(lines[2].starts_with("exit:"), "{journal}");

    let err = fs::read_to_string(results.job_dir(1).join(LogKind::Err.file_name()))
        .expect("read err");
    assert!(err.contains("caught SIGTERM"), "{err}");

    let report = results.results();
    assert_eq!(result_of(&report, "igt@hangs@quick"), Some(TestResult::Pass));
    assert_eq!(result_of(&report, "igt@hangs@slow"), Some(TestResult::Timeout));
}

#[test]
fn subtest_ignoring_sigterm_is_killed() {
    let root = TestRoot::new(&["stubborn"]);
    let results = ResultsDir::new();
    let mut settings = results.settings(&root);
    settings.inactivity_timeout = 1;

    let stats = run(settings, &TestFilter::any());
    assert_eq!(stats.job_count, 2);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.executions, 3);

    let journal = fs::read_to_string(results.job_dir(0).join(LogKind::Journal.file_name()))
        .expect("read journal");
    let lines: Vec<_> = journal.lines().collect();
    assert_eq!(lines.len(), 3, "{journal}");
    assert_eq!(lines[0], "stuck");
    assert!(lines[1].starts_with("timeout:-9 ("), "{journal}");
    assert!(lines[2].starts_with("exit:"), "{journal}");

    let report = results.results();
    assert_eq!(result_of(&report, "igt@stubborn@stuck"), Some(TestResult::Timeout));
    assert_eq!(result_of(&report, "igt@stubborn@after"), Some(TestResult::Pass));
}

#[test]
fn overall_timeout_leaves_jobs_notrun() {
    let root = TestRoot::new(&["hangs", "successtest"]);
    let results = ResultsDir::new();
    let mut settings = results.settings(&root);
    settings.inactivity_timeout = 1;
    settings.overall_timeout = 1;

    let stats = run(settings, &TestFilter::any());
    assert!(stats.overall_timeout_hit);

    let report = results.results();
    assert_eq!(
        result_of(&report, "igt@successtest@second-subtest"),
        Some(TestResult::Notrun)
    );
}

#[test]
fn cli_dry_run_lists_tests() {
    let root = TestRoot::new(&WELL_BEHAVED);
    let results = ResultsDir::new();

    let output = igt_runner_cli()
        .args(["run", "--dry-run", "-t", "successtest"])
        .args([root.path().as_str(), results.path().as_str()])
        .output()
        .expect("ran igt-runner");
    assert_eq!(output.status.code(), Some(IgtRunnerExitCode::OK), "{output:?}");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "igt@successtest@first-subtest\nigt@successtest@second-subtest\n"
    );
    assert!(results.path().join("joblist.txt").is_file());
    assert!(!results.job_dir(0).exists());
}

#[test]
fn cli_setup_errors() {
    let root = TestRoot::new(&WELL_BEHAVED);
    let results = ResultsDir::new();

    let output = igt_runner_cli()
        .args(["run", results.path().as_str()])
        .output()
        .expect("ran igt-runner");
    assert_eq!(output.status.code(), Some(IgtRunnerExitCode::SETUP_ERROR));
    assert!(String::from_utf8_lossy(&output.stderr).contains("test root not set"));

    // The environment supplies the test root.
    let output = igt_runner_cli()
        .env("IGT_TEST_ROOT", root.path())
        .args(["run", "--dry-run", results.path().as_str()])
        .output()
        .expect("ran igt-runner");
    assert_eq!(output.status.code(), Some(IgtRunnerExitCode::OK), "{output:?}");

    // Existing results are only replaced with --overwrite.
    let output = igt_runner_cli()
        .args(["run", "--dry-run", root.path().as_str(), results.path().as_str()])
        .output()
        .expect("ran igt-runner");
    assert_eq!(output.status.code(), Some(IgtRunnerExitCode::SETUP_ERROR));

    let output = igt_runner_cli()
        .args(["run", "--dry-run", "--overwrite"])
        .args([root.path().as_str(), results.path().as_str()])
        .output()
        .expect("ran igt-runner");
    assert_eq!(output.status.code(), Some(IgtRunnerExitCode::OK), "{output:?}");
}

#[test]
fn cli_run_resume_and_results() {
    let root = TestRoot::new(&["successtest", "no-subtests"]);
    let results = ResultsDir::new();

    let output = igt_runner_cli()
        .args(["run", "--multiple-mode", "--log-level", "quiet"])
        .args([root.path().as_str(), results.path().as_str()])
        .output()
        .expect("ran igt-runner");
    assert_eq!(output.status.code(), Some(IgtRunnerExitCode::OK), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("Summary 3 tests\n"));

    let results_json = results.path().join("results.json");
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&results_json).expect("read results.json"))
            .expect("results.json is JSON");
    assert_eq!(report["__type__"], "TestrunResult");
    assert_eq!(report["name"], "run");
    assert!(report["tests"]["igt@successtest@first-subtest"].is_object());
    assert!(report["tests"]["igt@no-subtests"].is_object());

    let output = igt_runner_cli()
        .args(["resume", results.path().as_str()])
        .output()
        .expect("ran igt-runner");
    assert_eq!(output.status.code(), Some(IgtRunnerExitCode::OK), "{output:?}");

    fs::remove_file(&results_json).expect("removed results.json");
    let output = igt_runner_cli()
        .args(["results", results.path().as_str()])
        .output()
        .expect("ran igt-runner");
    assert_eq!(output.status.code(), Some(IgtRunnerExitCode::OK), "{output:?}");
    assert!(results_json.is_file());
}

#[test]
fn cli_list() {
    let root = TestRoot::new(&WELL_BEHAVED);

    let output = igt_runner_cli()
        .args(["list", "-x", "successtest|skippers", root.path().as_str()])
        .output()
        .expect("ran igt-runner");
    assert_eq!(output.status.code(), Some(IgtRunnerExitCode::OK), "{output:?}");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "igt@no-subtests\nigt@dynamic@engines\n"
    );
}
