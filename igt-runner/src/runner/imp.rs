// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    ExecuteState, ExecutionOutcome,
    executor::{self, JobContext},
    unix,
};
use crate::{
    errors::{ExecuteError, InitializeError, RecoveryError},
    kmsg::KMSG_PATH,
    list::JobList,
    output_store::OutputStore,
    recovery::{self, ResumeState},
    settings::Settings,
    signal::SignalHandlerKind,
    time::{epoch_secs, stopwatch},
    watchdog::WatchdogSet,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Test runner options.
#[derive(Debug)]
pub struct TestRunnerBuilder {
    signal_handler: SignalHandlerKind,
    kmsg_path: Option<Utf8PathBuf>,
}

impl Default for TestRunnerBuilder {
    fn default() -> Self {
        Self {
            signal_handler: SignalHandlerKind::Standard,
            kmsg_path: Some(KMSG_PATH.into()),
        }
    }
}

impl TestRunnerBuilder {
    /// Sets the signal handler used while executing.
    pub fn set_signal_handler(&mut self, kind: SignalHandlerKind) -> &mut Self {
        self.signal_handler = kind;
        self
    }

    /// Sets the kernel log to capture, or `None` to not capture one.
    pub fn set_kmsg_path(&mut self, path: Option<Utf8PathBuf>) -> &mut Self {
        self.kmsg_path = path;
        self
    }

    /// Prepares a fresh run: persists the settings and job list into the results directory.
    ///
    /// Existing results are only replaced if `settings.overwrite` is set.
    pub fn initialize(
        self,
        settings: Settings,
        job_list: JobList,
    ) -> Result<TestRunner, InitializeError> {
        settings.validate()?;

        let store = OutputStore::new(&settings.results_path);
        store.create_root()?;
        if settings.overwrite {
            store.clear_old_results()?;
        }
        settings.write_to_dir(store.root())?;
        job_list.write_to_dir(store.root())?;

        Ok(self.build(
            store,
            ResumeState {
                settings,
                job_list,
                state: ExecuteState::default(),
            },
        ))
    }

    /// Prepares to continue the run recorded in `results_path`.
    pub fn resume(self, results_path: &Utf8Path) -> Result<TestRunner, RecoveryError> {
        let resumed = recovery::resume(results_path)?;
        if resumed.settings.results_path != results_path {
            debug!(
                "results moved from {} to {results_path}",
                resumed.settings.results_path
            );
        }
        Ok(self.build(OutputStore::new(results_path), resumed))
    }

    fn build(self, store: OutputStore, resumed: ResumeState) -> TestRunner {
        TestRunner {
            settings: resumed.settings,
            job_list: resumed.job_list,
            state: resumed.state,
            store,
            signal_handler: self.signal_handler,
            kmsg_path: self.kmsg_path,
        }
    }
}

/// Context for running jobs.
///
/// Created using [`TestRunnerBuilder::initialize`] or [`TestRunnerBuilder::resume`].
#[derive(Debug)]
pub struct TestRunner {
    settings: Settings,
    job_list: JobList,
    state: ExecuteState,
    store: OutputStore,
    signal_handler: SignalHandlerKind,
    kmsg_path: Option<Utf8PathBuf>,
}

/// Statistics for a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// The number of jobs in the job list.
    pub job_count: usize,

    /// The job the run started at. Non-zero for resumed runs.
    pub started_at: usize,

    /// The number of job executions, counting every attempt.
    pub executions: usize,

    /// The number of executions that hit the inactivity timeout.
    pub timeouts: usize,

    /// True if the overall timeout stopped the run before the job list was exhausted.
    pub overall_timeout_hit: bool,
}

impl TestRunner {
    /// The settings for this run.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The job list for this run.
    pub fn job_list(&self) -> &JobList {
        &self.job_list
    }

    /// Where execution will start.
    pub fn state(&self) -> ExecuteState {
        self.state
    }

    /// Executes the job list, one job at a time.
    ///
    /// Jobs that time out are resumed from their journal. Returns an error if a job could not be
    /// spawned, an output file could not be written, or the run was aborted.
    pub fn execute(mut self) -> Result<RunStats, ExecuteError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ExecuteError::RuntimeBuild)?;
        runtime.block_on(self.execute_inner())
    }

    async fn execute_inner(&mut self) -> Result<RunStats, ExecuteError> {
        let mut stats = RunStats {
            job_count: self.job_list.len(),
            started_at: self.state.next,
            ..RunStats::default()
        };

        if self.settings.dry_run {
            info!("dry run, not executing {} jobs", self.job_list.len());
            return Ok(stats);
        }

        // signal_handler.build() must be called from within the runtime.
        let mut signals = self.signal_handler.build()?;

        let run_start = stopwatch();
        self.store
            .write_start_time_if_missing(epoch_secs(run_start.snapshot().start_time))?;
        self.store.write_uname(&unix::uname_line())?;

        let mut watchdogs = self.open_watchdogs();
        let overall_timeout = Duration::from_secs(self.settings.overall_timeout.into());

        while self.state.next < self.job_list.len() {
            if !overall_timeout.is_zero() && run_start.snapshot().duration >= overall_timeout {
                info!(
                    "overall timeout of {}s reached, not starting more jobs",
                    self.settings.overall_timeout
                );
                stats.overall_timeout_hit = true;
                break;
            }
            if let Some(event) = signals.try_recv().await {
                info!("abort requested ({event}) between jobs");
                return Err(ExecuteError::Aborted(super::AbortReason::Interrupted(event)));
            }

            let index = self.state.next;
            let entry = &self.job_list.entries[index];
            if entry.is_done() {
                self.state.next += 1;
                continue;
            }

            let mut cx = JobContext {
                settings: &self.settings,
                store: &self.store,
                watchdogs: &mut watchdogs,
                signals: &mut signals,
                kmsg_path: self.kmsg_path.as_deref(),
            };
            let outcome = executor::execute_entry(&mut cx, index, self.job_list.len(), entry).await?;
            stats.executions += 1;

            match outcome {
                ExecutionOutcome::Success { exit_code } => {
                    debug!("job {index} exited with {exit_code}");
                    self.state.next += 1;
                }
                ExecutionOutcome::Timeout { signal, exit_code } => {
                    stats.timeouts += 1;
                    info!("job {index} timed out ({signal}, exit code {exit_code}), resuming from its journal");
                    let resumed = recovery::resume(self.store.root())?;
                    self.job_list = resumed.job_list;
                    self.state = resumed.state;
                }
                ExecutionOutcome::Fatal(reason) => {
                    watchdogs.disarm();
                    if reason.is_recorded() {
                        let entry = &self.job_list.entries[index];
                        self.store
                            .write_aborted(&format!("{reason}\nWhile running: {entry}\n"))?;
                        self.store
                            .write_end_time(epoch_secs(run_start.snapshot().end_time()))?;
                    }
                    return Err(ExecuteError::Aborted(reason));
                }
            }
        }

        watchdogs.disarm();
        self.store
            .write_end_time(epoch_secs(run_start.snapshot().end_time()))?;
        Ok(stats)
    }

    fn open_watchdogs(&self) -> WatchdogSet {
        if !self.settings.use_watchdog || self.settings.inactivity_timeout == 0 {
            return WatchdogSet::empty();
        }
        let watchdogs = WatchdogSet::open_system();
        if watchdogs.is_empty() {
            warn!("watchdogs requested, but none could be opened");
        } else {
            info!("using {} watchdog(s)", watchdogs.len());
        }
        watchdogs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::JobEntry;
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn test_root() -> Utf8TempDir {
        let dir = Utf8TempDir::new().expect("created test root");
        fs::write(dir.path().join("test-list.txt"), "TESTLIST\nsuccesstest\nEND TESTLIST\n")
            .expect("wrote catalogue");
        dir
    }

    #[test]
    fn initialize_refuses_existing_results() {
        let root = test_root();
        let results = Utf8TempDir::new().expect("created results dir");
        let settings = Settings::new(root.path(), results.path());
        let job_list = JobList::new(vec![JobEntry::new("successtest", Vec::new())]);

        TestRunnerBuilder::default()
            .initialize(settings.clone(), job_list.clone())
            .expect("first initialize succeeds");
        let error = TestRunnerBuilder::default()
            .initialize(settings.clone(), job_list.clone())
            .expect_err("second initialize fails");
        assert!(matches!(error, InitializeError::Settings(_)), "{error:?}");

        let mut settings = settings;
        settings.overwrite = true;
        fs::create_dir(results.path().join("0")).expect("created stale job dir");
        let runner = TestRunnerBuilder::default()
            .initialize(settings, job_list.clone())
            .expect("overwrite succeeds");
        assert!(!results.path().join("0").exists());
        assert_eq!(runner.job_list(), &job_list);
        assert_eq!(runner.state(), ExecuteState { next: 0 });
    }

    #[test]
    fn dry_run_executes_nothing() {
        let root = test_root();
        let results = Utf8TempDir::new().expect("created results dir");
        let mut settings = Settings::new(root.path(), results.path());
        settings.dry_run = true;
        let job_list = JobList::new(vec![JobEntry::new("successtest", Vec::new())]);

        let mut builder = TestRunnerBuilder::default();
        builder.set_signal_handler(SignalHandlerKind::Noop).set_kmsg_path(None);
        let stats = builder
            .initialize(settings, job_list)
            .expect("initialized")
            .execute()
            .expect("executed");
        assert_eq!(stats.executions, 0);
        assert_eq!(stats.job_count, 1);
        assert!(!results.path().join("0").exists());
        assert!(results.path().join("joblist.txt").exists());
    }
}
