// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, IgtRunnerExitCode, Result, utf8_path},
    output::{ConsoleStyles, OutputContext, OutputOpts},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use igt_runner::{
    errors::ExecuteError,
    list::JobList,
    piglit_name,
    results::{self, ResultCounts, TestResult},
    runner::{RunStats, TestRunner, TestRunnerBuilder},
    settings::{DEFAULT_DMESG_WARN_LEVEL, LogLevel, Settings},
    test_filter::TestFilter,
};
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};
use tracing::{info, warn};

/// Environment variable that, when set, overrides the test root given on the command line.
pub const TEST_ROOT_ENV: &str = "IGT_TEST_ROOT";

/// Runs IGT-style test binaries one at a time, surviving hangs, crashes and reboots.
#[derive(Debug, Parser)]
#[command(
    name = "igt-runner",
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100
)]
pub struct IgtRunnerApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl IgtRunnerApp {
    /// Initializes the output context, at the log level the command asks for.
    pub fn init_output(&self) -> OutputContext {
        self.output.init(self.command.log_level())
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output),
            Command::Resume(opts) => opts.exec(output),
            Command::Results(opts) => opts.exec(output),
            Command::List(opts) => opts.exec(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tests, recording their output into a results directory
    ///
    /// Takes an optional test root followed by the results path. If the test root is not given,
    /// it is taken from the IGT_TEST_ROOT environment variable, which also overrides a test root
    /// given on the command line.
    Run(RunOpts),

    /// Continue a run that was interrupted, crashed, or hung the machine
    Resume(ResumeOpts),

    /// Generate results.json for a results directory
    Results(ResultsOpts),

    /// List the tests a run would execute, one job per line
    List(ListOpts),
}

impl Command {
    fn log_level(&self) -> LogLevel {
        match self {
            Self::Run(opts) => opts.log_level,
            // Resumed runs log like the run they continue.
            Self::Resume(opts) => Settings::read_from_dir(&opts.results_path)
                .map(|settings| settings.log_level)
                .unwrap_or_default(),
            Self::Results(_) | Self::List(_) => LogLevel::Normal,
        }
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Test selection")]
struct SelectionOpts {
    /// Run only tests whose piglit name matches REGEX (may be repeated)
    #[arg(short = 't', long = "include-tests", value_name = "REGEX")]
    include: Vec<String>,

    /// Skip tests whose piglit name matches REGEX, even if included (may be repeated)
    #[arg(short = 'x', long = "exclude-tests", value_name = "REGEX")]
    exclude: Vec<String>,

    /// Run the tests listed in FILE (`igt@binary[@subtest]` per line) instead of the catalogue
    #[arg(long, value_name = "FILE")]
    test_list: Option<Utf8PathBuf>,

    /// Run all subtests of a binary in a single execution
    #[arg(short = 'm', long)]
    multiple_mode: bool,
}

impl SelectionOpts {
    fn filter(&self) -> Result<TestFilter> {
        Ok(TestFilter::new(&self.include, &self.exclude)?)
    }

    fn apply(&self, settings: &mut Settings) -> Result<()> {
        settings.test_list = self.test_list.as_deref().map(absolute).transpose()?;
        settings.multiple_mode = self.multiple_mode;
        Ok(())
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[command(flatten)]
    selection: SelectionOpts,

    /// Name of the run in the report [default: the results directory's name]
    #[arg(short, long)]
    name: Option<String>,

    /// Build and record the job list, but do not execute anything
    #[arg(short, long)]
    dry_run: bool,

    /// Sync results to disk after every write
    #[arg(short, long)]
    sync: bool,

    /// Console verbosity: quiet, normal or verbose
    #[arg(short, long, default_value_t, value_name = "LEVEL")]
    log_level: LogLevel,

    /// Replace existing results in the results directory
    #[arg(short, long)]
    overwrite: bool,

    /// Kill a test after SECS seconds without output (0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    inactivity_timeout: u32,

    /// Stop starting new tests after SECS seconds (0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    overall_timeout: u32,

    /// Arm hardware watchdogs to reboot the machine if the harness itself hangs
    #[arg(long)]
    use_watchdog: bool,

    /// Treat only kernel messages matching the filters as warnings
    #[arg(long)]
    piglit_style_dmesg: bool,

    /// Highest kernel log level that counts as a dmesg warning
    #[arg(long, value_name = "LEVEL", default_value_t = DEFAULT_DMESG_WARN_LEVEL)]
    dmesg_warn_level: u8,

    /// TOML file replacing the built-in dmesg filter patterns
    #[arg(long, value_name = "FILE")]
    dmesg_filters: Option<Utf8PathBuf>,

    /// [TEST_ROOT] RESULTS_PATH
    #[arg(value_name = "PATHS", num_args = 1..=2, required = true)]
    paths: Vec<Utf8PathBuf>,
}

impl RunOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let settings = self.to_settings(env_test_root()?)?;
        settings.validate()?;

        let filter = self.selection.filter()?;
        let job_list = JobList::build(&settings, &filter)?;
        if job_list.is_empty() {
            warn!("no tests selected");
        }

        let results_path = settings.results_path.clone();
        let runner = TestRunnerBuilder::default().initialize(settings, job_list)?;
        if runner.settings().dry_run {
            write_job_list(runner.job_list(), &mut io::stdout().lock())
                .map_err(|err| ExpectedError::WriteStdout { err })?;
        }
        run_to_completion(runner, &results_path, output)
    }

    fn to_settings(&self, env_test_root: Option<Utf8PathBuf>) -> Result<Settings> {
        let Some((results_path, rest)) = self.paths.split_last() else {
            return Err(ExpectedError::ResultsPathNotSet);
        };
        let test_root = env_test_root
            .or_else(|| rest.first().cloned())
            .ok_or(ExpectedError::TestRootNotSet)?;

        let mut settings = Settings::new(absolute(&test_root)?, absolute(results_path)?);
        if let Some(name) = &self.name {
            settings.name = name.clone();
        }
        self.selection.apply(&mut settings)?;
        settings.dmesg_filters = self.dmesg_filters.as_deref().map(absolute).transpose()?;
        settings.dry_run = self.dry_run;
        settings.sync = self.sync;
        settings.log_level = self.log_level;
        settings.overwrite = self.overwrite;
        settings.inactivity_timeout = self.inactivity_timeout;
        settings.overall_timeout = self.overall_timeout;
        settings.use_watchdog = self.use_watchdog;
        settings.piglit_style_dmesg = self.piglit_style_dmesg;
        settings.dmesg_warn_level = self.dmesg_warn_level;
        Ok(settings)
    }
}

#[derive(Debug, Args)]
struct ResumeOpts {
    /// The results directory of the run to continue
    results_path: Utf8PathBuf,
}

impl ResumeOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let results_path = absolute(&self.results_path)?;
        let runner = TestRunnerBuilder::default().resume(&results_path)?;
        info!(
            "resuming {} at job {}/{}",
            runner.settings().name,
            runner.state().next + 1,
            runner.job_list().len()
        );
        run_to_completion(runner, &results_path, output)
    }
}

#[derive(Debug, Args)]
struct ResultsOpts {
    /// The results directory to generate results.json for
    results_path: Utf8PathBuf,
}

impl ResultsOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        write_summary(&self.results_path, output)?;
        Ok(IgtRunnerExitCode::OK)
    }
}

#[derive(Debug, Args)]
struct ListOpts {
    #[command(flatten)]
    selection: SelectionOpts,

    /// Directory containing the test binaries and test-list.txt
    test_root: Option<Utf8PathBuf>,
}

impl ListOpts {
    fn exec(self) -> Result<i32> {
        let test_root = env_test_root()?
            .or(self.test_root)
            .ok_or(ExpectedError::TestRootNotSet)?;
        let mut settings = Settings::new(absolute(&test_root)?, Utf8PathBuf::new());
        self.selection.apply(&mut settings)?;
        settings.validate()?;

        let job_list = JobList::build(&settings, &self.selection.filter()?)?;
        write_job_list(&job_list, &mut io::stdout().lock())
            .map_err(|err| ExpectedError::WriteStdout { err })?;
        Ok(IgtRunnerExitCode::OK)
    }
}

/// Executes `runner` and, unless the run was interrupted, writes the report.
fn run_to_completion(
    runner: TestRunner,
    results_path: &Utf8Path,
    output: OutputContext,
) -> Result<i32> {
    let dry_run = runner.settings().dry_run;
    let stats = match runner.execute() {
        Ok(stats) => stats,
        Err(ExecuteError::Aborted(reason)) if reason.is_recorded() => {
            // The abort is part of the report.
            write_summary(results_path, output)?;
            return Err(ExpectedError::Aborted { reason });
        }
        Err(err) => return Err(err.into()),
    };
    if dry_run {
        return Ok(IgtRunnerExitCode::OK);
    }

    log_stats(&stats);
    write_summary(results_path, output)?;

    if stats.overall_timeout_hit {
        warn!("overall timeout reached, remaining jobs were not run");
        Ok(IgtRunnerExitCode::INCOMPLETE_RUN)
    } else {
        Ok(IgtRunnerExitCode::OK)
    }
}

fn log_stats(stats: &RunStats) {
    let resumed = if stats.started_at > 0 {
        format!(" (resumed at job {})", stats.started_at + 1)
    } else {
        String::new()
    };
    info!(
        "{} jobs, {} executions{resumed}, {} timeouts",
        stats.job_count, stats.executions, stats.timeouts
    );
}

fn write_summary(results_path: &Utf8Path, output: OutputContext) -> Result<()> {
    let (report, path) = results::write_results(results_path)?;
    info!("results written to {path}");

    if let Some(counts) = report.totals.root() {
        write_counts(counts, &output.stdout_styles(), &mut io::stdout().lock())
            .map_err(|err| ExpectedError::WriteStdout { err })?;
    }
    Ok(())
}

fn write_counts(
    counts: &ResultCounts,
    styles: &ConsoleStyles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    writeln!(writer, "{} {} tests", "Summary".style(styles.bold), counts.total())?;
    for result in TestResult::ALL {
        let count = counts.get(result);
        if count > 0 {
            writeln!(
                writer,
                "{:>12}: {count}",
                result.as_str().style(result_style(result, styles))
            )?;
        }
    }
    Ok(())
}

fn result_style(result: TestResult, styles: &ConsoleStyles) -> Style {
    match result {
        TestResult::Pass => styles.pass,
        TestResult::Fail | TestResult::Crash | TestResult::DmesgFail | TestResult::Timeout => {
            styles.fail
        }
        TestResult::Skip
        | TestResult::Notrun
        | TestResult::Warn
        | TestResult::DmesgWarn
        | TestResult::Incomplete => styles.skip,
    }
}

/// Prints one line per test a job list covers.
fn write_job_list(job_list: &JobList, writer: &mut dyn Write) -> io::Result<()> {
    for entry in &job_list.entries {
        if entry.subtests.is_empty() {
            writeln!(writer, "{}", piglit_name(&entry.binary, None))?;
        }
        for subtest in &entry.subtests {
            writeln!(writer, "{}", piglit_name(&entry.binary, Some(subtest)))?;
        }
    }
    Ok(())
}

fn env_test_root() -> Result<Option<Utf8PathBuf>> {
    std::env::var_os(TEST_ROOT_ENV)
        .filter(|value| !value.is_empty())
        .map(|value| utf8_path(value.into()))
        .transpose()
}

fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf> {
    let path = std::path::absolute(path).map_err(|err| ExpectedError::CurrentDir { err })?;
    utf8_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use igt_runner::list::JobEntry;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_app() {
        IgtRunnerApp::command().debug_assert();
    }

    fn parse_run(args: &[&str]) -> RunOpts {
        let args = std::iter::once("igt-runner").chain(args.iter().copied());
        let app = IgtRunnerApp::try_parse_from(args).expect("arguments are valid");
        match app.command {
            Command::Run(opts) => opts,
            other => panic!("expected run, found {other:?}"),
        }
    }

    #[test]
    fn run_options() {
        let opts = parse_run(&[
            "run",
            "-t",
            "basic",
            "-x",
            "basic-slow",
            "-m",
            "--inactivity-timeout",
            "30",
            "--log-level",
            "verbose",
            "--piglit-style-dmesg",
            "--name",
            "nightly",
            "/tests",
            "/results/nightly",
        ]);
        let settings = opts.to_settings(None).expect("settings are valid");

        assert_eq!(settings.test_root, "/tests");
        assert_eq!(settings.results_path, "/results/nightly");
        assert_eq!(settings.name, "nightly");
        assert_eq!(settings.inactivity_timeout, 30);
        assert_eq!(settings.log_level, LogLevel::Verbose);
        assert!(settings.multiple_mode);
        assert!(settings.piglit_style_dmesg);
        assert_eq!(settings.dmesg_warn_level, DEFAULT_DMESG_WARN_LEVEL);
        assert_eq!(opts.selection.include, ["basic"]);
        assert_eq!(opts.selection.exclude, ["basic-slow"]);
    }

    #[test]
    fn test_root_from_environment() {
        let opts = parse_run(&["run", "/results/run-1"]);
        assert!(matches!(
            opts.to_settings(None),
            Err(ExpectedError::TestRootNotSet)
        ));

        let settings = opts
            .to_settings(Some("/env-root".into()))
            .expect("settings are valid");
        assert_eq!(settings.test_root, "/env-root");
        assert_eq!(settings.name, "run-1");

        // The environment wins over the command line.
        let opts = parse_run(&["run", "/cli-root", "/results/run-1"]);
        let settings = opts
            .to_settings(Some("/env-root".into()))
            .expect("settings are valid");
        assert_eq!(settings.test_root, "/env-root");
    }

    #[test]
    fn too_many_paths() {
        let result = IgtRunnerApp::try_parse_from(["igt-runner", "run", "a", "b", "c"]);
        assert!(result.is_err());
    }

    #[test]
    fn job_list_output() {
        let job_list = JobList::new(vec![
            JobEntry::new("no-subtests", Vec::new()),
            JobEntry::new(
                "successtest",
                vec!["first-subtest".to_owned(), "Second-Subtest".to_owned()],
            ),
        ]);
        let mut out = Vec::new();
        write_job_list(&job_list, &mut out).expect("writing to a Vec succeeds");
        assert_eq!(
            String::from_utf8(out).expect("output is UTF-8"),
            "igt@no-subtests\nigt@successtest@first-subtest\nigt@successtest@second-subtest\n"
        );
    }

    #[test]
    fn summary_lists_nonzero_counts() {
        let counts: ResultCounts =
            serde_json::from_str(r#"{"pass": 2, "fail": 1}"#).expect("counts parse");

        let mut out = Vec::new();
        write_counts(&counts, &ConsoleStyles::default(), &mut out).expect("writing succeeds");
        assert_eq!(
            String::from_utf8(out).expect("output is UTF-8"),
            "Summary 3 tests\n        pass: 2\n        fail: 1\n"
        );
    }
}
