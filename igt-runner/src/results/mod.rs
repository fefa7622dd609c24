// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning a results directory into a report.
//!
//! Every job directory is processed in passes: the journal decides which subtests were entered
//! and which ones timed out, the output files are sliced at the subtest markers and provide
//! results for everything else, and the kernel log is split at the markers the test library
//! writes to it. A final pass adjusts results for stderr noise and kernel warnings, and counts
//! them. Job directories that were never created yield `notrun` records.
//!
//! Generation is read-only and may be repeated at any time, including while a run is still in
//! progress.

mod dmesg;
mod journal;
mod output;
mod report;

pub use dmesg::{
    DEFAULT_IGNORE_PATTERNS, DEFAULT_PIGLIT_STYLE_PATTERNS, DmesgFilter, DmesgFilterConfig,
    KmsgRecord,
};
pub use report::*;

use crate::{
    errors::ResultsError,
    helpers::{count_lines, decode_output, piglit_name},
    list::{JobEntry, JobList},
    output_store::{
        ABORTED_FILE_NAME, END_TIME_FILE_NAME, LogKind, OutputStore, RESULTS_FILE_NAME,
        START_TIME_FILE_NAME, UNAME_FILE_NAME,
    },
    settings::Settings,
};
use bstr::ByteSlice;
use camino::{Utf8Path, Utf8PathBuf};
use output::Stream;
use std::{
    fs,
    io::{self, BufWriter, Write},
};
use tracing::{debug, warn};

/// The piglit name the abort reason is recorded under.
pub const ABORTED_TEST_NAME: &str = "igt@runner@aborted";

/// The text given to tests that produced no output whatsoever.
pub const NO_OUTPUT_TEXT: &str =
    "This test didn't produce any output. The machine probably rebooted ungracefully.\n";

/// A subtest seen in a job, with the dynamic subtests found inside it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct Subtest {
    name: String,
    dynamic: Vec<String>,
}

impl Subtest {
    fn add_dynamic(&mut self, name: &str) {
        if !self.dynamic.iter().any(|existing| existing == name) {
            self.dynamic.push(name.to_owned());
        }
    }
}

/// The subtests of one job, in the order they were first seen.
#[derive(Clone, Debug, Default)]
struct Subtests(Vec<Subtest>);

impl Subtests {
    fn add(&mut self, name: &str) {
        if !self.0.iter().any(|subtest| subtest.name == name) {
            self.0.push(Subtest {
                name: name.to_owned(),
                dynamic: Vec::new(),
            });
        }
    }

    #[cfg(test)]
    fn add_dynamic_to(&mut self, parent: &str, name: &str) {
        self.add(parent);
        if let Some(subtest) = self.0.iter_mut().find(|subtest| subtest.name == parent) {
            subtest.add_dynamic(name);
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }

    fn last(&self) -> Option<&Subtest> {
        self.0.last()
    }

    fn iter(&self) -> std::slice::Iter<'_, Subtest> {
        self.0.iter()
    }

    fn iter_mut(&mut self) -> std::slice::IterMut<'_, Subtest> {
        self.0.iter_mut()
    }

    /// Piglit names of every subtest and dynamic subtest, parents first.
    fn piglit_names(&self, binary: &str) -> Vec<String> {
        let mut names = Vec::new();
        for subtest in self.iter() {
            let parent = piglit_name(binary, Some(&subtest.name));
            names.push(parent.clone());
            names.extend(
                subtest
                    .dynamic
                    .iter()
                    .map(|name| format!("{parent}@{}", name.to_ascii_lowercase())),
            );
        }
        names
    }
}

/// The raw logs of one job directory. Missing files read as empty.
#[derive(Debug, Default)]
struct JobLogs {
    journal: String,
    out: String,
    err: String,
    dmesg: String,
}

impl JobLogs {
    fn read(dir: &Utf8Path) -> Result<Self, ResultsError> {
        let read = |kind: LogKind| -> Result<Vec<u8>, ResultsError> {
            let path = dir.join(kind.file_name());
            match fs::read(&path) {
                Ok(bytes) => Ok(bytes),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    debug!("{path} is missing, treating it as empty");
                    Ok(Vec::new())
                }
                Err(error) => Err(ResultsError::ReadLog { path, error }),
            }
        };
        Ok(Self {
            journal: read(LogKind::Journal)?.to_str_lossy().into_owned(),
            out: decode_output(&read(LogKind::Out)?),
            err: decode_output(&read(LogKind::Err)?),
            dmesg: read(LogKind::Dmesg)?.to_str_lossy().into_owned(),
        })
    }
}

/// Generates the report for the results directory at `results_path`.
///
/// Never fails because of malformed log content; only unreadable metadata or logs are errors.
pub fn generate_results(results_path: &Utf8Path) -> Result<TestrunResult, ResultsError> {
    let settings = Settings::read_from_dir(results_path)?;
    let job_list = JobList::read_from_dir(results_path)?;
    let filter = DmesgFilter::from_settings(&settings)?;
    let store = OutputStore::new(results_path);

    let mut report = TestrunResult::new(settings.name.clone());
    report.uname = read_optional(&store.root().join(UNAME_FILE_NAME))?
        .map(|uname| uname.trim_end_matches('\n').to_owned());
    report.time_elapsed.start = read_time(&store.root().join(START_TIME_FILE_NAME))?;
    report.time_elapsed.end = read_time(&store.root().join(END_TIME_FILE_NAME))?;

    for (index, entry) in job_list.entries.iter().enumerate() {
        let dir = store.job_dir(index);
        if !dir.is_dir() {
            add_notrun_results(&mut report, entry, &settings);
            continue;
        }
        let logs = JobLogs::read(&dir)?;
        add_job_results(&mut report, entry, &logs, &filter);
    }

    if let Some(reason) = read_optional(&store.root().join(ABORTED_FILE_NAME))? {
        let record = report.test_mut(ABORTED_TEST_NAME);
        record.out = reason;
        record.result = Some(TestResult::Fail);
        report.totals.add("igt@runner", TestResult::Fail);
    }

    Ok(report)
}

/// Generates the report for `results_path` and writes it to `results.json` inside it.
///
/// Returns the path to the written file.
pub fn write_results(
    results_path: &Utf8Path,
) -> Result<(TestrunResult, Utf8PathBuf), ResultsError> {
    let report = generate_results(results_path)?;
    let path = results_path.join(RESULTS_FILE_NAME);

    atomicwrites::AtomicFile::new(&path, atomicwrites::AllowOverwrite)
        .write(|file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &report)?;
            writer.write_all(b"\n")?;
            writer.flush()
        })
        .map_err(|error| ResultsError::Write {
            path: path.clone(),
            error: match error {
                atomicwrites::Error::Internal(error) => error,
                atomicwrites::Error::User(error) => error,
            },
        })?;

    Ok((report, path))
}

fn add_job_results(
    report: &mut TestrunResult,
    entry: &JobEntry,
    logs: &JobLogs,
    filter: &DmesgFilter,
) {
    let mut subtests = journal::fill_from_journal(report, entry, &logs.journal);
    output::fill_from_output(report, &entry.binary, &logs.out, Stream::Out, &mut subtests);
    output::fill_from_output(report, &entry.binary, &logs.err, Stream::Err, &mut subtests);
    dmesg::fill_from_dmesg(report, &entry.binary, &logs.dmesg, filter, &subtests);

    let names = if subtests.is_empty() {
        vec![piglit_name(&entry.binary, None)]
    } else {
        subtests.piglit_names(&entry.binary)
    };
    for name in &names {
        override_result(report.test_mut(name));
    }
    add_to_totals(report, &entry.binary, &names);
}

/// Adjusts a result for what the test printed on stderr and what the kernel logged.
fn override_result(record: &mut ResultRecord) {
    if record.result == Some(TestResult::Pass) && stderr_has_warnings(&record.err) {
        record.result = Some(TestResult::Warn);
    }

    if record.dmesg_warnings.is_some() {
        record.result = match record.result {
            Some(TestResult::Pass | TestResult::Warn) => Some(TestResult::DmesgWarn),
            Some(TestResult::Fail) => Some(TestResult::DmesgFail),
            other => other,
        };
    }

    if record.is_completely_empty() {
        record.out = NO_OUTPUT_TEXT.to_owned();
        record.result = Some(TestResult::Incomplete);
    }
}

/// A clean subtest prints exactly its start and result markers on stderr. Stderr counts as
/// noisy when it has more than two lines and at least one of them is not a marker.
fn stderr_has_warnings(err: &str) -> bool {
    count_lines(err) > 2 && err.lines().any(|line| !output::is_marker_line(line))
}

fn add_to_totals(report: &mut TestrunResult, binary: &str, names: &[String]) {
    let scope = piglit_name(binary, None);
    report.totals.ensure_scope(&scope);
    for name in names {
        let Some(record) = report.tests.get(name) else {
            continue;
        };
        match record.result {
            Some(result) => report.totals.add(&scope, result),
            None => warn!("no result set for {name}"),
        }
    }
}

/// Records every requested subtest of a job that never started as `notrun`.
fn add_notrun_results(report: &mut TestrunResult, entry: &JobEntry, settings: &Settings) {
    let names: Vec<String> = if entry.subtests.is_empty() {
        // A binary without a subtest selection cannot be told apart from one running all of its
        // subtests in multiple mode.
        if settings.multiple_mode {
            return;
        }
        vec![piglit_name(&entry.binary, None)]
    } else {
        entry
            .subtests
            .iter()
            .map(|subtest| piglit_name(&entry.binary, Some(subtest)))
            .collect()
    };

    for name in &names {
        let record = report.test_mut(name);
        record.out.clear();
        record.err.clear();
        record.dmesg.clear();
        record.result = Some(TestResult::Notrun);
    }
    add_to_totals(report, &entry.binary, &names);
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, ResultsError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes.to_str_lossy().into_owned())),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(ResultsError::ReadLog {
            path: path.to_owned(),
            error,
        }),
    }
}

fn read_time(path: &Utf8Path) -> Result<Option<f64>, ResultsError> {
    let Some(contents) = read_optional(path)? else {
        return Ok(None);
    };
    match contents.trim().parse() {
        Ok(secs) => Ok(Some(secs)),
        Err(_) => {
            warn!("ignoring malformed timestamp in {path}: {contents:?}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;
    use test_strategy::proptest;

    struct Fixture {
        dir: Utf8TempDir,
        store: OutputStore,
    }

    impl Fixture {
        fn new(entries: Vec<JobEntry>) -> Self {
            Self::with_settings(entries, |_| {})
        }

        fn with_settings(entries: Vec<JobEntry>, f: impl FnOnce(&mut Settings)) -> Self {
            let dir = Utf8TempDir::new().expect("created temp dir");
            let mut settings = Settings::new("/tests", dir.path());
            settings.name = "fixture-run".to_owned();
            f(&mut settings);
            settings.write_to_dir(dir.path()).expect("wrote settings");
            JobList::new(entries)
                .write_to_dir(dir.path())
                .expect("wrote job list");
            let store = OutputStore::new(dir.path());
            Self { dir, store }
        }

        fn write_job(&self, index: usize, logs: &[(LogKind, &str)]) {
            let job_dir = self.store.job_dir(index);
            fs::create_dir_all(&job_dir).expect("created job dir");
            for (kind, contents) in logs {
                fs::write(job_dir.join(kind.file_name()), contents).expect("wrote log");
            }
        }

        fn generate(&self) -> TestrunResult {
            generate_results(self.dir.path()).expect("generated results")
        }
    }

    const SUCCESSTEST_OUT: &str = indoc! {"
        IGT-Version: 1.28-test (x86_64) (Linux: 6.1.0 x86_64)
        Starting subtest: first-subtest
        Subtest first-subtest: SUCCESS (0.001s)
        Starting subtest: second-subtest
        Subtest second-subtest: SUCCESS (0.002s)
    "};

    const SUCCESSTEST_ERR: &str = indoc! {"
        Starting subtest: first-subtest
        Subtest first-subtest: SUCCESS (0.001s)
        Starting subtest: second-subtest
        Subtest second-subtest: SUCCESS (0.002s)
    "};

    #[test]
    fn two_passing_subtests() {
        let fixture = Fixture::new(vec![JobEntry::new("successtest", Vec::new())]);
        fixture.write_job(
            0,
            &[
                (
                    LogKind::Journal,
                    "first-subtest\nsecond-subtest\nexit:0 (0.010s)\n",
                ),
                (LogKind::Out, SUCCESSTEST_OUT),
                (LogKind::Err, SUCCESSTEST_ERR),
                (LogKind::Dmesg, ""),
            ],
        );

        let report = fixture.generate();
        let names: Vec<_> = report.tests.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            ["igt@successtest@first-subtest", "igt@successtest@second-subtest"]
        );
        for record in report.tests.values() {
            assert_eq!(record.result, Some(TestResult::Pass));
            assert_eq!(record.dmesg, "");
            assert_eq!(record.dmesg_warnings, None);
        }
        let totals = report.totals.root().expect("root totals");
        assert_eq!(totals.get(TestResult::Pass), 2);
        assert_eq!(totals.total(), 2);
        assert_eq!(
            report.totals.get("igt@successtest").map(|c| c.get(TestResult::Pass)),
            Some(2)
        );
        assert_eq!(report.name, "fixture-run");
    }

    #[test]
    fn skipped_subtest() {
        let fixture = Fixture::new(vec![JobEntry::new("skippers", Vec::new())]);
        fixture.write_job(
            0,
            &[
                (LogKind::Journal, "skip-one\nexit:77 (0.001s)\n"),
                (LogKind::Out, "Subtest skip-one: SKIP (0.000s)\n"),
                (LogKind::Err, "Subtest skip-one: SKIP (0.000s)\n"),
            ],
        );

        let report = fixture.generate();
        assert_eq!(report.tests.len(), 1);
        assert_eq!(
            report.tests["igt@skippers@skip-one"].result,
            Some(TestResult::Skip)
        );
        assert_eq!(
            report.totals.root().map(|c| c.get(TestResult::Skip)),
            Some(1)
        );
    }

    #[test]
    fn subtests_without_any_output() {
        let fixture = Fixture::new(vec![JobEntry::new(
            "skippers",
            vec!["skip-one".to_owned(), "skip-two".to_owned()],
        )]);
        fixture.write_job(
            0,
            &[
                (LogKind::Journal, "skip-one\nskip-two\nexit:77 (0.001s)\n"),
                (LogKind::Out, ""),
                (LogKind::Err, ""),
                (LogKind::Dmesg, ""),
            ],
        );

        let report = fixture.generate();
        for name in ["igt@skippers@skip-one", "igt@skippers@skip-two"] {
            let record = &report.tests[name];
            assert_eq!(record.result, Some(TestResult::Incomplete), "{name}");
            assert_eq!(record.out, NO_OUTPUT_TEXT);
        }
        let totals = report.totals.root().expect("root totals");
        assert_eq!(totals.get(TestResult::Incomplete), 2);
    }

    #[test]
    fn missing_directories_are_notrun() {
        let fixture = Fixture::new(vec![
            JobEntry::new("no-subtests", Vec::new()),
            JobEntry::new("skippers", vec!["skip-one".to_owned()]),
        ]);

        let report = fixture.generate();
        assert_eq!(report.tests["igt@no-subtests"].result, Some(TestResult::Notrun));
        assert_eq!(report.tests["igt@skippers@skip-one"].result, Some(TestResult::Notrun));
        assert_eq!(
            report.totals.root().map(|c| c.get(TestResult::Notrun)),
            Some(2)
        );
        assert_eq!(report.time_elapsed, ElapsedTime::default());
    }

    #[test]
    fn multiple_mode_skips_unselected_binaries() {
        let fixture = Fixture::with_settings(vec![JobEntry::new("no-subtests", Vec::new())], |s| {
            s.multiple_mode = true;
        });
        let report = fixture.generate();
        assert!(report.tests.is_empty());
    }

    #[test]
    fn aborted_run() {
        let fixture = Fixture::new(vec![JobEntry::new("hangs", Vec::new())]);
        fs::write(
            fixture.dir.path().join(ABORTED_FILE_NAME),
            "child refuses to die\nWhile running: hangs\n",
        )
        .expect("wrote aborted.txt");
        fs::write(fixture.dir.path().join(UNAME_FILE_NAME), "Linux host 6.1 #1 x86_64\n")
            .expect("wrote uname");
        fs::write(fixture.dir.path().join(START_TIME_FILE_NAME), "1700000000.250000")
            .expect("wrote starttime");

        let report = fixture.generate();
        let aborted = &report.tests[ABORTED_TEST_NAME];
        assert_eq!(aborted.out, "child refuses to die\nWhile running: hangs\n");
        assert_eq!(aborted.result, Some(TestResult::Fail));
        assert_eq!(
            report.totals.get("igt@runner").map(|c| c.get(TestResult::Fail)),
            Some(1)
        );
        assert_eq!(report.uname.as_deref(), Some("Linux host 6.1 #1 x86_64"));
        assert_eq!(report.time_elapsed.start, Some(1_700_000_000.25));
        assert_eq!(report.time_elapsed.end, None);
    }

    #[test]
    fn writes_results_json() {
        let fixture = Fixture::new(vec![JobEntry::new("no-subtests", Vec::new())]);
        fixture.write_job(
            0,
            &[
                (LogKind::Journal, "exit:0 (0.500s)\n"),
                (LogKind::Out, "hello\n"),
            ],
        );

        let (report, path) = write_results(fixture.dir.path()).expect("wrote results");
        let written: TestrunResult =
            serde_json::from_str(&fs::read_to_string(&path).expect("read results"))
                .expect("parsed results");
        assert_eq!(written, report);
        let record = &report.tests["igt@no-subtests"];
        assert_eq!(record.result, Some(TestResult::Pass));
        assert_eq!(record.time, Some(TimeAttribute::from_duration(0.5)));
        assert_eq!(
            report.runtimes["igt@no-subtests"].time,
            TimeAttribute::from_duration(0.5)
        );
    }

    #[test_case(Some(TestResult::Pass), "Starting subtest: a\nSubtest a: SUCCESS\n", None, TestResult::Pass; "clean")]
    #[test_case(Some(TestResult::Pass), "Starting subtest: a\nnoise\nSubtest a: SUCCESS\n", None, TestResult::Warn; "noisy stderr")]
    #[test_case(Some(TestResult::Pass), "one\ntwo\n", None, TestResult::Pass; "two plain lines")]
    #[test_case(Some(TestResult::Pass), "Starting subtest: a\nStarting dynamic subtest: b\nDynamic subtest b: SUCCESS\n", None, TestResult::Pass; "dynamic markers")]
    #[test_case(Some(TestResult::Pass), "", Some("<4> [1.000000] oops\n"), TestResult::DmesgWarn; "dmesg warn")]
    #[test_case(Some(TestResult::Pass), "Starting subtest: a\nnoise\nSubtest a: SUCCESS\n", Some("<4> [1.000000] oops\n"), TestResult::DmesgWarn; "warn then dmesg warn")]
    #[test_case(Some(TestResult::Fail), "", Some("<4> [1.000000] oops\n"), TestResult::DmesgFail; "dmesg fail")]
    #[test_case(Some(TestResult::Skip), "", Some("<4> [1.000000] oops\n"), TestResult::Skip; "skip unaffected")]
    fn overrides(
        result: Option<TestResult>,
        err: &str,
        warnings: Option<&str>,
        expected: TestResult,
    ) {
        let mut record = ResultRecord {
            out: "something\n".to_owned(),
            err: err.to_owned(),
            dmesg_warnings: warnings.map(str::to_owned),
            result,
            ..ResultRecord::default()
        };
        override_result(&mut record);
        assert_eq!(record.result, Some(expected));
    }

    #[test]
    fn dmesg_only_output_is_not_empty() {
        let mut record = ResultRecord {
            dmesg: "<6> [1.000000] hello\n".to_owned(),
            result: Some(TestResult::Pass),
            ..ResultRecord::default()
        };
        override_result(&mut record);
        assert_eq!(record.result, Some(TestResult::Pass));
        assert_eq!(record.out, "");
    }

    #[test]
    fn piglit_names_list_parents_first() {
        let mut subtests = Subtests::default();
        subtests.add_dynamic_to("engines", "RCS0");
        subtests.add_dynamic_to("engines", "vcs0");
        subtests.add("basic");
        assert_eq!(
            subtests.piglit_names("gem_exec"),
            [
                "igt@gem_exec@engines",
                "igt@gem_exec@engines@rcs0",
                "igt@gem_exec@engines@vcs0",
                "igt@gem_exec@basic",
            ]
        );
    }

    /// Every scope's total equals the number of records counted against it, and the run-wide
    /// scopes agree.
    #[proptest(cases = 64)]
    fn totals_are_consistent(
        #[strategy(proptest::collection::vec((0usize..3, 0usize..TestResult::ALL.len()), 0..40))]
        records: Vec<(usize, usize)>,
    ) {
        let mut totals = Totals::default();
        let mut per_binary = [0u64; 3];
        for (binary, result) in &records {
            totals.add(&format!("igt@bin{binary}"), TestResult::ALL[*result]);
            per_binary[*binary] += 1;
        }

        let root = totals.root().map_or(0, ResultCounts::total);
        prop_assert_eq!(root, records.len() as u64);
        prop_assert_eq!(totals.get(""), totals.root());
        for (binary, count) in per_binary.iter().enumerate() {
            let scope = totals.get(&format!("igt@bin{binary}")).map_or(0, ResultCounts::total);
            prop_assert_eq!(scope, *count);
        }
        for (_, counts) in totals.iter() {
            prop_assert_eq!(
                TestResult::ALL.iter().map(|&r| counts.get(r)).sum::<u64>(),
                counts.total()
            );
        }
    }
}
