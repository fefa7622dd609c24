// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the harness.

use crate::{runner::AbortReason, settings::LogLevel};
use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// Error returned while parsing a [`LogLevel`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for log level: {input}\n(known values: {})",
    LogLevel::variants().join(", "),
)]
pub struct LogLevelParseError {
    input: String,
}

impl LogLevelParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurred while parsing the contents of a settings file.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum SettingsParseError {
    /// A line did not have the form `key : value`.
    #[error("line {line_no}: expected `key : value`, found `{line}`")]
    MalformedLine {
        /// The 1-based line number.
        line_no: usize,

        /// The offending line.
        line: String,
    },

    /// A required key was missing.
    #[error("required key `{key}` is missing")]
    MissingKey {
        /// The key that was expected.
        key: &'static str,
    },

    /// A value could not be parsed for its key.
    #[error("invalid value `{value}` for key `{key}`")]
    InvalidValue {
        /// The key.
        key: String,

        /// The value that failed to parse.
        value: String,
    },
}

/// An error that occurred while reading, writing or validating settings.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("error reading settings from `{path}`")]
    Read {
        /// The path to the settings file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The settings file could not be parsed.
    #[error("error parsing settings from `{path}`")]
    Parse {
        /// The path to the settings file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: SettingsParseError,
    },

    /// The settings file could not be written.
    #[error("error writing settings to `{path}`")]
    Write {
        /// The path to the settings file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A settings file already exists and overwriting was not requested.
    #[error("settings already exist at `{path}` (use --overwrite to replace existing results)")]
    AlreadyExists {
        /// The path to the existing settings file.
        path: Utf8PathBuf,
    },

    /// The test root is not a directory.
    #[error("test root `{path}` is not a directory")]
    TestRootNotFound {
        /// The configured test root.
        path: Utf8PathBuf,
    },

    /// The configured test list file cannot be read.
    #[error("test list `{path}` cannot be read")]
    TestListUnreadable {
        /// The configured test list path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// No test catalogue exists in the test root.
    #[error("test catalogue `{path}` not found")]
    CatalogueNotFound {
        /// The expected catalogue path.
        path: Utf8PathBuf,
    },
}

/// An error that occurs while building a [`TestFilter`](crate::test_filter::TestFilter).
#[derive(Debug, Error)]
#[error("invalid test selector `{pattern}`")]
pub struct TestFilterBuildError {
    pattern: String,
    #[source]
    error: regex::Error,
}

impl TestFilterBuildError {
    pub(crate) fn new(pattern: impl Into<String>, error: regex::Error) -> Self {
        Self {
            pattern: pattern.into(),
            error,
        }
    }
}

/// An error that occurs while parsing a serialized job list.
#[derive(Clone, Debug, Error)]
#[error("line {line_no}: {reason}: `{line}`")]
pub struct JobListParseError {
    line_no: usize,
    line: String,
    reason: &'static str,
}

impl JobListParseError {
    pub(crate) fn new(line_no: usize, line: impl Into<String>, reason: &'static str) -> Self {
        Self {
            line_no,
            line: line.into(),
            reason,
        }
    }
}

/// An error that occurs while building, reading or writing a job list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobListError {
    /// The test catalogue could not be located.
    #[error("test catalogue `{path}` not found")]
    CatalogueNotFound {
        /// The expected path.
        path: Utf8PathBuf,
    },

    /// A test list or catalogue file could not be read.
    #[error("error reading `{path}`")]
    Read {
        /// The path that failed to be read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A line in a user-supplied test list is not a piglit name.
    #[error("`{path}` line {line_no}: `{line}` is not of the form igt@binary[@subtest]")]
    InvalidTestListLine {
        /// The test list path.
        path: Utf8PathBuf,

        /// The 1-based line number.
        line_no: usize,

        /// The offending line.
        line: String,
    },

    /// A test binary could not be executed to list its subtests.
    #[error("error listing subtests of `{binary}`")]
    ListSubtests {
        /// The binary path.
        binary: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The serialized job list could not be parsed.
    #[error("error parsing job list at `{path}`")]
    Parse {
        /// The path to the job list.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: JobListParseError,
    },

    /// The serialized job list could not be written.
    #[error("error writing job list to `{path}`")]
    Write {
        /// The path to the job list.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurs while manipulating the per-job output directories.
#[derive(Debug, Error)]
#[error("error {operation} `{path}`")]
pub struct OutputStoreError {
    operation: &'static str,
    path: Utf8PathBuf,
    #[source]
    error: io::Error,
}

impl OutputStoreError {
    pub(crate) fn new(operation: &'static str, path: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            operation,
            path: path.into(),
            error,
        }
    }
}

/// An error that occurs while setting up signal handling.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// An error that occurs while computing the resume point of a previous run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecoveryError {
    /// The persisted settings could not be read.
    #[error("cannot resume without the original settings")]
    Settings(#[source] SettingsError),

    /// The persisted job list could not be read.
    #[error("cannot resume without the original job list")]
    JobList(#[source] JobListError),

    /// The journal of the resume candidate could not be read.
    #[error("error reading journal `{path}`")]
    ReadJournal {
        /// The journal path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurs while preparing a fresh run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InitializeError {
    /// The results directory could not be prepared.
    #[error(transparent)]
    OutputStore(#[from] OutputStoreError),

    /// Settings could not be persisted.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The job list could not be persisted.
    #[error(transparent)]
    JobList(#[from] JobListError),
}

/// An error that stops a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The async runtime could not be created.
    #[error("error creating the async runtime")]
    RuntimeBuild(#[source] io::Error),

    /// Signal handling could not be set up.
    #[error(transparent)]
    SignalHandlerSetup(#[from] SignalHandlerSetupError),

    /// An output file or directory could not be created or written.
    #[error(transparent)]
    OutputStore(#[from] OutputStoreError),

    /// The test binary could not be spawned.
    #[error("error spawning `{binary}`")]
    Spawn {
        /// The binary path.
        binary: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Waiting for the child failed.
    #[error("error waiting for `{binary}`")]
    Wait {
        /// The binary path.
        binary: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A signal could not be delivered to the child.
    #[error("error sending {signal} to child process {pid}")]
    Kill {
        /// The signal that was being sent.
        signal: nix::sys::signal::Signal,

        /// The child's process ID.
        pid: i32,

        /// The underlying error.
        #[source]
        error: nix::Error,
    },

    /// Resuming after a timeout failed.
    #[error("error resuming after a timeout")]
    Recovery(#[from] RecoveryError),

    /// The run was aborted.
    #[error("run aborted: {0}")]
    Aborted(AbortReason),
}

/// An error that occurs while loading dmesg filter configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DmesgFilterError {
    /// The configuration file could not be read.
    #[error("error reading dmesg filters from `{path}`")]
    Read {
        /// The configuration path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("error parsing dmesg filters from `{path}`")]
    Parse {
        /// The configuration path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: toml::de::Error,
    },

    /// A pattern is not a valid regular expression.
    #[error("invalid dmesg filter pattern")]
    Regex(#[source] regex::Error),
}

/// An error that occurs while generating the results report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResultsError {
    /// Settings could not be read.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The job list could not be read.
    #[error(transparent)]
    JobList(#[from] JobListError),

    /// The dmesg filters could not be loaded.
    #[error(transparent)]
    DmesgFilter(#[from] DmesgFilterError),

    /// A log file exists but could not be read.
    #[error("error reading `{path}`")]
    ReadLog {
        /// The log path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The report could not be written.
    #[error("error writing results to `{path}`")]
    Write {
        /// The report path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}
