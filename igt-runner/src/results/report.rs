// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::protocol::IgtExitCode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The version of the report format written to `results.json`.
pub const RESULTS_VERSION: u32 = 10;

/// The outcome of a single test.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestResult {
    /// The test crashed.
    Crash,
    /// The test passed.
    Pass,
    /// The test failed and the kernel logged warnings.
    DmesgFail,
    /// The test passed but the kernel logged warnings.
    DmesgWarn,
    /// The test was skipped.
    Skip,
    /// The test did not finish.
    Incomplete,
    /// The test hit the inactivity timeout.
    Timeout,
    /// The test was not run.
    Notrun,
    /// The test failed.
    Fail,
    /// The test passed with warnings on stderr.
    Warn,
}

impl TestResult {
    /// Every result, in the order totals are listed.
    pub const ALL: [Self; 10] = [
        Self::Crash,
        Self::Pass,
        Self::DmesgFail,
        Self::DmesgWarn,
        Self::Skip,
        Self::Incomplete,
        Self::Timeout,
        Self::Notrun,
        Self::Fail,
        Self::Warn,
    ];

    /// The name of this result as it appears in the report.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crash => "crash",
            Self::Pass => "pass",
            Self::DmesgFail => "dmesg-fail",
            Self::DmesgWarn => "dmesg-warn",
            Self::Skip => "skip",
            Self::Incomplete => "incomplete",
            Self::Timeout => "timeout",
            Self::Notrun => "notrun",
            Self::Fail => "fail",
            Self::Warn => "warn",
        }
    }

    /// Maps the word printed after `Subtest NAME: ` to a result.
    pub fn from_result_word(word: &str) -> Self {
        match word {
            "SUCCESS" => Self::Pass,
            "SKIP" => Self::Skip,
            "FAIL" => Self::Fail,
            "CRASH" => Self::Crash,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Incomplete,
        }
    }

    /// Maps the exit code of a whole binary to a result. `None` means the binary never exited.
    pub fn from_exit_code(exit_code: Option<i32>) -> Self {
        match exit_code {
            None => Self::Incomplete,
            Some(IgtExitCode::SUCCESS) => Self::Pass,
            Some(IgtExitCode::SKIP | IgtExitCode::INVALID) => Self::Skip,
            Some(IgtExitCode::TIMEOUT) => Self::Timeout,
            Some(IgtExitCode::HANGUP) => Self::Notrun,
            Some(_) => Self::Fail,
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `__type__` tag of a [`TimeAttribute`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum TimeAttributeTag {
    /// The only value.
    #[default]
    TimeAttribute,
}

/// A time interval in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeAttribute {
    /// Always `TimeAttribute`.
    #[serde(rename = "__type__")]
    pub kind: TimeAttributeTag,

    /// The start of the interval.
    pub start: f64,

    /// The end of the interval.
    pub end: f64,
}

impl TimeAttribute {
    /// An interval starting at 0 and lasting `duration` seconds.
    pub fn from_duration(duration: f64) -> Self {
        Self {
            kind: TimeAttributeTag::TimeAttribute,
            start: 0.0,
            end: duration,
        }
    }
}

/// The wall-clock span of the whole run. Either end may be unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElapsedTime {
    /// Always `TimeAttribute`.
    #[serde(rename = "__type__")]
    pub kind: TimeAttributeTag,

    /// Seconds since the epoch when the run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,

    /// Seconds since the epoch when the run ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

/// The record for one test.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// The standard output attributed to this test.
    #[serde(default)]
    pub out: String,

    /// The standard error attributed to this test.
    #[serde(default)]
    pub err: String,

    /// Formatted kernel log lines attributed to this test.
    #[serde(default)]
    pub dmesg: String,

    /// The subset of `dmesg` that counts as warnings.
    #[serde(
        rename = "dmesg-warnings",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dmesg_warnings: Option<String>,

    /// The result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TestResult>,

    /// How long the test ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeAttribute>,

    /// The `IGT-Version:` line the binary printed.
    #[serde(
        rename = "igt-version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub igt_version: Option<String>,
}

impl ResultRecord {
    /// Sets the result unless one was already assigned.
    pub fn set_result_if_missing(&mut self, result: TestResult) {
        self.result.get_or_insert(result);
    }

    /// Replaces the runtime.
    pub fn set_runtime(&mut self, duration: f64) {
        self.time = Some(TimeAttribute::from_duration(duration));
    }

    /// Adds `duration` to the runtime.
    pub fn add_runtime(&mut self, duration: f64) {
        let previous = self.time.map_or(0.0, |time| time.end);
        self.set_runtime(previous + duration);
    }

    pub(super) fn is_completely_empty(&self) -> bool {
        self.out.is_empty() && self.err.is_empty() && self.dmesg.is_empty()
    }
}

/// The accumulated runtime of one binary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRecord {
    /// The sum of every execution of the binary.
    pub time: TimeAttribute,
}

/// Counts per result kind. Every kind is present, starting at 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCounts(IndexMap<TestResult, u64>);

impl Default for ResultCounts {
    fn default() -> Self {
        Self(TestResult::ALL.into_iter().map(|result| (result, 0)).collect())
    }
}

impl ResultCounts {
    /// The count for `result`.
    pub fn get(&self, result: TestResult) -> u64 {
        self.0.get(&result).copied().unwrap_or_default()
    }

    /// The sum of all counts.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    fn increment(&mut self, result: TestResult) {
        *self.0.entry(result).or_default() += 1;
    }
}

/// Result counts, keyed by scope: `""` and `"root"` for the whole run, and one key per binary.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Totals(IndexMap<String, ResultCounts>);

impl Totals {
    /// The counts for the whole run.
    pub fn root(&self) -> Option<&ResultCounts> {
        self.0.get("root")
    }

    /// The counts for a scope.
    pub fn get(&self, scope: &str) -> Option<&ResultCounts> {
        self.0.get(scope)
    }

    /// Iterates over scopes and their counts.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResultCounts)> {
        self.0.iter().map(|(scope, counts)| (scope.as_str(), counts))
    }

    /// Creates the run-wide scopes and `scope`, all zeroed, if they do not exist yet.
    pub(super) fn ensure_scope(&mut self, scope: &str) {
        for key in ["", "root", scope] {
            self.0.entry(key.to_owned()).or_default();
        }
    }

    /// Counts `result` against the run-wide scopes and `scope`.
    pub(super) fn add(&mut self, scope: &str, result: TestResult) {
        self.ensure_scope(scope);
        for key in ["", "root", scope] {
            if let Some(counts) = self.0.get_mut(key) {
                counts.increment(result);
            }
        }
    }
}

/// The `__type__` tag of a [`TestrunResult`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum TestrunResultTag {
    /// The only value.
    #[default]
    TestrunResult,
}

/// The report document written to `results.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestrunResult {
    /// Always `TestrunResult`.
    #[serde(rename = "__type__")]
    pub kind: TestrunResultTag,

    /// Always [`RESULTS_VERSION`].
    pub results_version: u32,

    /// The name of the run.
    pub name: String,

    /// The `uname` of the machine that ran the tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uname: Option<String>,

    /// When the run started and ended.
    pub time_elapsed: ElapsedTime,

    /// One record per test, keyed by piglit name, in job order.
    pub tests: IndexMap<String, ResultRecord>,

    /// Result counts.
    pub totals: Totals,

    /// Accumulated runtimes per binary.
    pub runtimes: IndexMap<String, RuntimeRecord>,
}

impl TestrunResult {
    /// Creates an empty report.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            kind: TestrunResultTag::TestrunResult,
            results_version: RESULTS_VERSION,
            name: name.into(),
            uname: None,
            time_elapsed: ElapsedTime::default(),
            tests: IndexMap::new(),
            totals: Totals::default(),
            runtimes: IndexMap::new(),
        }
    }

    /// The record for `name`, created empty if missing.
    pub(super) fn test_mut(&mut self, name: &str) -> &mut ResultRecord {
        self.tests.entry(name.to_owned()).or_default()
    }

    /// Adds `duration` to the runtime of the binary whose piglit name is `name`.
    pub(super) fn add_binary_runtime(&mut self, name: &str, duration: f64) {
        let record = self.runtimes.entry(name.to_owned()).or_default();
        record.time = TimeAttribute::from_duration(record.time.end + duration);
    }
}
