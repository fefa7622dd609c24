// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The executor for a single job.
//!
//! The executor spawns the job's test binary and monitors it until it exits, writing its output
//! and the kernel log into the job's directory as the data arrives. Subtest markers found on
//! stdout go into the journal right away, so that a crash at any point leaves behind an accurate
//! record of which subtests were entered.

use super::{
    AbortReason, ESCALATION_WATCHDOG_TIMEOUT, Escalation, EscalationStep, ExecutionOutcome,
    KILL_GRACE_PERIOD, SubtestTracker, TimeoutPlan, unix,
};
use crate::{
    errors::ExecuteError,
    kmsg::{self, KmsgReader},
    line_buffer::LineBuffer,
    list::JobEntry,
    output_store::{JobOutputs, OutputStore},
    protocol::{RUN_SUBTEST_ARG, SENTINEL_ON_STDERR_ENV, Trailer, TrailerKind},
    settings::Settings,
    signal::{ShutdownEvent, SignalHandler},
    watchdog::WatchdogSet,
};
use bstr::ByteSlice;
use bytes::BytesMut;
use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::signal::Signal;
use std::{
    io,
    pin::Pin,
    process::{ExitStatus, Stdio},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, ChildStderr, ChildStdout},
    time::{Instant, Sleep},
};
use tracing::{debug, error, info, warn};

/// The size of each buffered reader's buffer.
///
/// This size is not totally arbitrary, but rather the (normal) page size on most systems.
const CHUNK_SIZE: usize = 4 * 1024;

/// Everything a job needs from the run it belongs to.
pub(super) struct JobContext<'a> {
    pub(super) settings: &'a Settings,
    pub(super) store: &'a OutputStore,
    pub(super) watchdogs: &'a mut WatchdogSet,
    pub(super) signals: &'a mut SignalHandler,
    pub(super) kmsg_path: Option<&'a Utf8Path>,
}

/// Runs the job at `index` to completion, timeout or abort.
pub(super) async fn execute_entry(
    cx: &mut JobContext<'_>,
    index: usize,
    total: usize,
    entry: &JobEntry,
) -> Result<ExecutionOutcome, ExecuteError> {
    let mut outputs = cx.store.open_job(index, cx.settings.sync)?;

    let kmsg = cx.kmsg_path.and_then(|path| match KmsgReader::open(path) {
        Ok(reader) => Some(reader),
        Err(error) => {
            warn!("cannot open {path}: {error}");
            None
        }
    });

    let width = digits(total);
    info!("[{:0width$}/{total:0width$}] {entry}", index + 1);

    let binary = cx.settings.test_root.join(&entry.binary);
    let spawned = spawn(build_command(&binary, entry))
        .map_err(|error| ExecuteError::Spawn {
            binary: binary.clone(),
            error,
        })?;

    let mut monitor = Monitor::new(
        binary,
        spawned.pid,
        &mut outputs,
        &mut *cx.watchdogs,
        cx.settings.inactivity_timeout,
    );
    monitor.run(spawned, kmsg, &mut *cx.signals).await
}

fn build_command(binary: &Utf8Path, entry: &JobEntry) -> std::process::Command {
    let mut cmd = std::process::Command::new(binary);
    let selectors = entry.selectors();
    if !selectors.is_empty() {
        cmd.arg(RUN_SUBTEST_ARG).arg(selectors.join(","));
    }
    cmd.env(SENTINEL_ON_STDERR_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    unix::set_process_group(&mut cmd);
    cmd
}

/// A spawned child process along with its output pipes.
struct SpawnedChild {
    child: Child,
    pid: u32,
    stdout: FusedBufReader<ChildStdout>,
    stderr: FusedBufReader<ChildStderr>,
}

fn spawn(cmd: std::process::Command) -> io::Result<SpawnedChild> {
    let mut cmd: tokio::process::Command = cmd.into();
    let mut child = cmd.spawn()?;
    let missing = |what: &str| io::Error::other(format!("child {what} was not captured"));

    // The child has never been polled, so it must still have a PID.
    let pid = child.id().ok_or_else(|| missing("pid"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
    Ok(SpawnedChild {
        child,
        pid,
        stdout: FusedBufReader::new(stdout),
        stderr: FusedBufReader::new(stderr),
    })
}

struct Monitor<'a> {
    binary: Utf8PathBuf,
    pid: u32,
    outputs: &'a mut JobOutputs,
    watchdogs: &'a mut WatchdogSet,
    inactivity_timeout: u32,
    tracker: SubtestTracker,
    stdout_lines: LineBuffer,
    escalation: Escalation,
    interrupted: Option<ShutdownEvent>,
    status: Option<ExitStatus>,
    /// Written once the child's stdout has been drained, so that it follows every marker.
    trailer: Option<Trailer>,
}

impl<'a> Monitor<'a> {
    fn new(
        binary: Utf8PathBuf,
        pid: u32,
        outputs: &'a mut JobOutputs,
        watchdogs: &'a mut WatchdogSet,
        inactivity_timeout: u32,
    ) -> Self {
        Self {
            binary,
            pid,
            outputs,
            watchdogs,
            inactivity_timeout,
            tracker: SubtestTracker::new(),
            stdout_lines: LineBuffer::new(),
            escalation: Escalation::default(),
            interrupted: None,
            status: None,
            trailer: None,
        }
    }

    async fn run(
        &mut self,
        spawned: SpawnedChild,
        mut kmsg: Option<KmsgReader>,
        signals: &mut SignalHandler,
    ) -> Result<ExecutionOutcome, ExecuteError> {
        let SpawnedChild {
            mut child,
            stdout: mut stdout_reader,
            stderr: mut stderr_reader,
            ..
        } = spawned;
        let stopwatch = crate::time::stopwatch();

        let mut plan = TimeoutPlan::arm(self.inactivity_timeout, self.watchdogs);
        let mut deadline = Deadline::new(plan);
        let mut sleep = std::pin::pin!(tokio::time::sleep(deadline.period()));

        let mut stdout_acc = BytesMut::with_capacity(CHUNK_SIZE);
        let mut stderr_acc = BytesMut::with_capacity(CHUNK_SIZE);
        let mut kmsg_buf = vec![0u8; kmsg::RECORD_BUF_SIZE];
        let mut signals_done = false;
        let mut fatal = None;

        loop {
            if self.status.is_some() && stdout_reader.is_done() && stderr_reader.is_done() {
                break;
            }

            tokio::select! {
                res = stdout_reader.fill_buf(&mut stdout_acc), if !stdout_reader.is_done() => {
                    if let Err(error) = res {
                        warn!("error reading test's stdout: {error}");
                    }
                    if !stdout_acc.is_empty() {
                        self.activity(&mut deadline, sleep.as_mut());
                        self.handle_stdout(&stdout_acc)?;
                        stdout_acc.clear();
                    }
                }
                res = stderr_reader.fill_buf(&mut stderr_acc), if !stderr_reader.is_done() => {
                    if let Err(error) = res {
                        warn!("error reading test's stderr: {error}");
                    }
                    if !stderr_acc.is_empty() {
                        self.activity(&mut deadline, sleep.as_mut());
                        self.outputs.err.append(&stderr_acc)?;
                        stderr_acc.clear();
                    }
                }
                res = read_kmsg(kmsg.as_mut(), &mut kmsg_buf), if kmsg.is_some() => {
                    match res {
                        Ok(n) => {
                            self.activity(&mut deadline, sleep.as_mut());
                            self.outputs.dmesg.append(&kmsg_buf[..n])?;
                        }
                        Err(error) if kmsg::is_record_too_large(&error) => {
                            warn!("buffer too small for kernel log record, record lost");
                        }
                        Err(error) => {
                            warn!("error reading from kmsg, stopping monitoring: {error}");
                            kmsg = None;
                        }
                    }
                }
                res = child.wait(), if self.status.is_none() => {
                    let status = res.map_err(|error| ExecuteError::Wait {
                        binary: self.binary.clone(),
                        error,
                    })?;
                    self.child_exited(status, stopwatch.snapshot().duration);

                    // Give whatever still holds the pipes open a bounded amount of time.
                    plan = TimeoutPlan::single(KILL_GRACE_PERIOD);
                    deadline = Deadline::new(plan);
                    deadline.reset(sleep.as_mut());
                }
                event = signals.recv(), if !signals_done && self.interrupted.is_none() => {
                    match event {
                        Some(event) => {
                            self.interrupt(event)?;
                            if self.status.is_none() {
                                plan = TimeoutPlan::single(KILL_GRACE_PERIOD);
                                deadline = Deadline::new(plan);
                                deadline.reset(sleep.as_mut());
                            }
                        }
                        None => signals_done = true,
                    }
                }
                () = &mut sleep, if plan.period.is_some() => {
                    self.watchdogs.ping();
                    if !deadline.expire() {
                        deadline.reset(sleep.as_mut());
                        continue;
                    }

                    if self.status.is_some() {
                        warn!(
                            "{} exited but its output pipes are still open, not waiting any longer",
                            self.binary,
                        );
                        break;
                    }

                    match self.escalate()? {
                        Some(reason) => {
                            fatal = Some(reason);
                            break;
                        }
                        None => {
                            plan = TimeoutPlan::single(KILL_GRACE_PERIOD);
                            deadline = Deadline::new(plan);
                            deadline.reset(sleep.as_mut());
                        }
                    }
                }
            }
        }

        if let Some(trailer) = self.trailer.take() {
            debug!("{}: {trailer}", self.binary);
            self.outputs.journal.append(format!("{trailer}\n").as_bytes())?;
        }
        if let Some(mut kmsg) = kmsg {
            let dmesg = &mut self.outputs.dmesg;
            kmsg.drain(|record| dmesg.append(record))?;
        }
        let pending = self.stdout_lines.pending();
        if !pending.is_empty() {
            debug!("test's stdout ended without a newline ({} bytes)", pending.len());
        }

        Ok(self.outcome(fatal))
    }

    /// Output was produced. Before any kill signal is sent, this restarts the timeout.
    fn activity(&mut self, deadline: &mut Deadline, sleep: Pin<&mut Sleep>) {
        self.watchdogs.ping();
        if self.escalation == Escalation::Running {
            deadline.restart();
            deadline.reset(sleep);
        }
    }

    fn handle_stdout(&mut self, data: &[u8]) -> Result<(), ExecuteError> {
        self.outputs.out.append(data)?;
        self.stdout_lines.extend(data);
        while let Some(line) = self.stdout_lines.next_line() {
            if let Some(subtest) = self.tracker.observe(&line) {
                debug!("{}", line.trim_end_with(char::is_whitespace).to_str_lossy());
                self.outputs.journal.append(format!("{subtest}\n").as_bytes())?;
            }
        }
        Ok(())
    }

    fn child_exited(&mut self, status: ExitStatus, elapsed: Duration) {
        self.status = Some(status);
        if self.interrupted.is_some() {
            // The job is left for a resumed run to finish.
            return;
        }

        let kind = if self.escalation == Escalation::Running {
            TrailerKind::Exit
        } else {
            TrailerKind::Timeout
        };
        self.trailer = Some(Trailer {
            kind,
            code: unix::journal_exit_code(status),
            elapsed: Some(elapsed.as_secs_f64()),
        });
    }

    fn interrupt(&mut self, event: ShutdownEvent) -> Result<(), ExecuteError> {
        self.interrupted = Some(event);
        if self.status.is_some() {
            return Ok(());
        }

        info!("abort requested ({event}), terminating children");
        if self.escalation == Escalation::Running {
            self.escalation.advance();
            unix::kill_child(self.pid, Signal::SIGTERM)?;
        }
        Ok(())
    }

    /// The timeout expired while the child is still running. Returns a reason to abort, if it has
    /// come to that.
    fn escalate(&mut self) -> Result<Option<AbortReason>, ExecuteError> {
        match self.escalation.advance() {
            EscalationStep::Signal(signal) => {
                info!("timeout, killing the current test with {signal}");
                if signal == Signal::SIGTERM {
                    self.watchdogs.arm(ESCALATION_WATCHDOG_TIMEOUT);
                }
                unix::kill_child(self.pid, signal)?;
                Ok(None)
            }
            EscalationStep::Abort => {
                error!("child refuses to die, aborting");
                Ok(Some(AbortReason::ChildRefusesToDie))
            }
        }
    }

    fn outcome(&self, fatal: Option<AbortReason>) -> ExecutionOutcome {
        if let Some(reason) = fatal {
            return ExecutionOutcome::Fatal(reason);
        }
        if let Some(event) = self.interrupted {
            return ExecutionOutcome::Fatal(AbortReason::Interrupted(event));
        }

        let exit_code = self
            .status
            .map_or(crate::protocol::IgtExitCode::UNKNOWN_STATUS, unix::journal_exit_code);
        match self.escalation.last_signal() {
            None => ExecutionOutcome::Success { exit_code },
            Some(signal) => ExecutionOutcome::Timeout { signal, exit_code },
        }
    }
}

/// Tracks how many silent intervals remain before the timeout counts as expired.
#[derive(Debug)]
struct Deadline {
    plan: TimeoutPlan,
    intervals_left: u32,
}

/// Stand-in sleep length when there is no timeout; the branch is disabled in that case.
const NO_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

impl Deadline {
    fn new(plan: TimeoutPlan) -> Self {
        Self {
            plan,
            intervals_left: plan.intervals,
        }
    }

    fn period(&self) -> Duration {
        self.plan.period.unwrap_or(NO_TIMEOUT)
    }

    fn restart(&mut self) {
        self.intervals_left = self.plan.intervals;
    }

    fn reset(&self, sleep: Pin<&mut Sleep>) {
        sleep.reset(Instant::now() + self.period());
    }

    /// Records one expired interval. Returns true once all of them have expired.
    fn expire(&mut self) -> bool {
        self.intervals_left = self.intervals_left.saturating_sub(1);
        self.intervals_left == 0
    }
}

async fn read_kmsg(kmsg: Option<&mut KmsgReader>, buf: &mut [u8]) -> io::Result<usize> {
    match kmsg {
        Some(kmsg) => kmsg.read_record(buf).await,
        None => std::future::pending().await,
    }
}

fn digits(mut num: usize) -> usize {
    let mut ret = 1;
    while num >= 10 {
        num /= 10;
        ret += 1;
    }
    ret
}

/// A `BufReader` over an `AsyncRead` that tracks the state of the reader and
/// whether it is done.
struct FusedBufReader<R> {
    reader: BufReader<R>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FusedBufReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, reader),
            done: false,
        }
    }

    async fn fill_buf(&mut self, acc: &mut BytesMut) -> Result<(), io::Error> {
        if self.done {
            return Ok(());
        }

        let res = self.reader.fill_buf().await;
        match res {
            Ok(buf) => {
                acc.extend_from_slice(buf);
                if buf.is_empty() {
                    self.done = true;
                }
                let len = buf.len();
                self.reader.consume(len);
                Ok(())
            }
            Err(error) => {
                self.done = true;
                Err(error)
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
