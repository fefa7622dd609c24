// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{ConsoleStyles, NO_HEADING_TARGET};
use camino::Utf8PathBuf;
use igt_runner::{errors::*, runner::AbortReason};
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Exit codes used by `igt-runner`.
#[doc(hidden)]
pub enum IgtRunnerExitCode {}

impl IgtRunnerExitCode {
    /// The run completed and results were written.
    pub const OK: i32 = 0;

    /// The run stopped before every job was executed: it was interrupted by a signal or hit the
    /// overall timeout. An interrupted run can be continued with `igt-runner resume`.
    pub const INCOMPLETE_RUN: i32 = 106;

    /// A test process could not be killed, or a job could not be spawned or recorded.
    pub const RUN_ABORTED: i32 = 100;

    /// The run could not be set up or resumed.
    pub const SETUP_ERROR: i32 = 96;

    /// The results report could not be generated or written.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}

// The #[error()] strings are placeholders: errors are printed through display_to_stderr.

/// An error that stops the harness, reported without a backtrace.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("test root not set")]
    TestRootNotSet,
    #[error("results path not set")]
    ResultsPathNotSet,
    #[error("path is not valid UTF-8")]
    NonUtf8Path { path: std::path::PathBuf },
    #[error("current directory is inaccessible")]
    CurrentDir {
        #[source]
        err: std::io::Error,
    },
    #[error("invalid test selector")]
    TestFilterBuild {
        #[from]
        err: TestFilterBuildError,
    },
    #[error("invalid settings")]
    Settings {
        #[from]
        err: SettingsError,
    },
    #[error("error building job list")]
    JobList {
        #[from]
        err: JobListError,
    },
    #[error("error initializing run")]
    Initialize {
        #[from]
        err: InitializeError,
    },
    #[error("error resuming run")]
    Recovery {
        #[from]
        err: RecoveryError,
    },
    #[error("error executing run")]
    Execute { err: ExecuteError },
    #[error("run aborted")]
    Aborted { reason: AbortReason },
    #[error("error generating results")]
    Results {
        #[from]
        err: ResultsError,
    },
    #[error("error writing to stdout")]
    WriteStdout {
        #[source]
        err: std::io::Error,
    },
}

impl From<ExecuteError> for ExpectedError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Aborted(reason) => Self::Aborted { reason },
            err => Self::Execute { err },
        }
    }
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::TestRootNotSet
            | Self::ResultsPathNotSet
            | Self::NonUtf8Path { .. }
            | Self::CurrentDir { .. }
            | Self::TestFilterBuild { .. }
            | Self::Settings { .. }
            | Self::JobList { .. }
            | Self::Initialize { .. }
            | Self::Recovery { .. } => IgtRunnerExitCode::SETUP_ERROR,
            Self::Execute { .. } => IgtRunnerExitCode::RUN_ABORTED,
            Self::Aborted { reason } => {
                if reason.is_recorded() {
                    IgtRunnerExitCode::RUN_ABORTED
                } else {
                    IgtRunnerExitCode::INCOMPLETE_RUN
                }
            }
            Self::Results { .. } | Self::WriteStdout { .. } => {
                IgtRunnerExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr, followed by its chain of causes.
    pub fn display_to_stderr(&self, styles: &ConsoleStyles) {
        let mut next_error = match self {
            Self::TestRootNotSet => {
                error!(
                    "test root not set: pass it before the results path or set `{}`",
                    crate::dispatch::TEST_ROOT_ENV.style(styles.bold)
                );
                None
            }
            Self::ResultsPathNotSet => {
                error!("results path not set");
                None
            }
            Self::NonUtf8Path { path } => {
                error!(
                    "path `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::CurrentDir { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::TestFilterBuild { err } => {
                error!("failed to build test filter");
                Some(err as &dyn Error)
            }
            Self::Settings { err } => {
                error!("{err}");
                err.source()
            }
            Self::JobList { err } => {
                error!("failed to build the job list");
                Some(err as &dyn Error)
            }
            Self::Initialize { err } => {
                error!("failed to initialize the results directory");
                Some(err as &dyn Error)
            }
            Self::Recovery { err } => {
                error!("{err}");
                err.source()
            }
            Self::Execute { err } => {
                error!("{err}");
                err.source()
            }
            Self::Aborted { reason } => {
                if reason.is_recorded() {
                    error!("run aborted: {reason}");
                } else {
                    error!(
                        "run {} ({reason}); continue it with `{}`",
                        "interrupted".style(styles.bold),
                        "igt-runner resume".style(styles.bold),
                    );
                }
                None
            }
            Self::Results { err } => {
                error!("failed to generate results");
                Some(err as &dyn Error)
            }
            Self::WriteStdout { err } => {
                error!("failed to write to stdout");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

/// Converts an OS path into a UTF-8 path.
pub(crate) fn utf8_path(path: std::path::PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path).map_err(|path| ExpectedError::NonUtf8Path { path })
}
