// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Executing job lists.
//!
//! The main structure in this module is [`TestRunner`]. Each job is run by the executor as a
//! single child process in its own process group; the pieces of per-job state that do not depend
//! on a live child ([`TimeoutPlan`], [`Escalation`] and [`SubtestTracker`]) live here so they can
//! be reasoned about on their own.

mod executor;
mod imp;
mod unix;

pub use imp::*;

use crate::{
    protocol::{STARTING_SUBTEST, SUBTEST_RESULT},
    signal::ShutdownEvent,
    watchdog::WatchdogSet,
};
use bstr::ByteSlice;
use nix::sys::signal::Signal;
use std::{fmt, time::Duration};

/// Extra seconds requested from watchdogs on top of the inactivity timeout, so that the harness
/// gets to kill a hung test before the machine is power-cycled.
pub const WATCHDOG_EXTRA: u32 = 10;

/// How long a child gets to exit after each escalation signal.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// The watchdog timeout used while a child is being killed.
pub const ESCALATION_WATCHDOG_TIMEOUT: u32 = 20;

/// The index of the next job to run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecuteState {
    /// Index into the job list.
    pub next: usize,
}

/// How a single job ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionOutcome {
    /// The child exited on its own.
    Success {
        /// The exit code, as written to the journal trailer.
        exit_code: i32,
    },

    /// The child was killed after the inactivity timeout expired.
    Timeout {
        /// The last signal sent to the child.
        signal: Signal,

        /// The exit code, as written to the journal trailer.
        exit_code: i32,
    },

    /// The run cannot continue.
    Fatal(AbortReason),
}

/// Why a run was stopped before the job list was exhausted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbortReason {
    /// The child survived SIGKILL.
    ChildRefusesToDie,

    /// The harness received a termination signal.
    Interrupted(ShutdownEvent),
}

impl AbortReason {
    /// Returns true if this abort must be recorded in the results directory.
    ///
    /// An interrupted run is left resumable instead.
    pub fn is_recorded(self) -> bool {
        matches!(self, Self::ChildRefusesToDie)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChildRefusesToDie => write!(f, "child refuses to die"),
            Self::Interrupted(event) => write!(f, "interrupted by {event}"),
        }
    }
}

/// How the inactivity timeout is split up to keep watchdogs fed.
///
/// A watchdog that cannot be armed for the full timeout (plus [`WATCHDOG_EXTRA`]) must be pinged
/// more often than the timeout expires, so the timeout is divided into `intervals` periods. Every
/// expiry pings the watchdogs; only the last one in a row counts as the timeout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeoutPlan {
    /// The length of one interval, or `None` for no timeout at all.
    pub period: Option<Duration>,

    /// The number of consecutive silent intervals that make up the timeout.
    pub intervals: u32,
}

impl TimeoutPlan {
    /// No timeout.
    pub const NONE: Self = Self {
        period: None,
        intervals: 1,
    };

    /// Arms `watchdogs` for `timeout` seconds of inactivity and returns the resulting plan.
    pub fn arm(timeout: u32, watchdogs: &mut WatchdogSet) -> Self {
        if timeout == 0 {
            return Self::NONE;
        }
        let accepted = watchdogs.arm(timeout.saturating_add(WATCHDOG_EXTRA));
        let plan = Self::new(timeout, accepted);
        if plan.intervals > 1 {
            tracing::debug!(
                "watchdog only accepted a {accepted}s timeout, using {} intervals of {:?}",
                plan.intervals,
                plan.period.unwrap_or_default(),
            );
        }
        plan
    }

    /// Computes the plan for a `timeout` given the watchdog timeout that was `accepted`.
    pub fn new(timeout: u32, accepted: u32) -> Self {
        if timeout == 0 {
            return Self::NONE;
        }
        let full = Duration::from_secs(timeout.into());
        if accepted >= timeout.saturating_add(WATCHDOG_EXTRA) {
            return Self {
                period: Some(full),
                intervals: 1,
            };
        }

        let extra = if accepted < WATCHDOG_EXTRA {
            accepted / 2
        } else {
            WATCHDOG_EXTRA
        };
        let window = accepted.saturating_sub(extra).max(1);
        let intervals = timeout.div_ceil(window).max(1);
        Self {
            period: Some(full / intervals),
            intervals,
        }
    }

    /// A single interval of the given length, used while escalating.
    pub fn single(period: Duration) -> Self {
        Self {
            period: Some(period),
            intervals: 1,
        }
    }
}

/// What to do when the timeout fires.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EscalationStep {
    /// Send this signal to the child's process group and leader.
    Signal(Signal),

    /// Give up on the child and abort the run.
    Abort,
}

/// The termination state of a child: SIGTERM first, then SIGKILL, then give up.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Escalation {
    /// No signal sent yet.
    #[default]
    Running,

    /// SIGTERM was sent.
    Terminated,

    /// SIGKILL was sent.
    Killed,
}

impl Escalation {
    /// Advances to the next state and returns the action to take.
    pub fn advance(&mut self) -> EscalationStep {
        let (next, step) = match self {
            Self::Running => (Self::Terminated, EscalationStep::Signal(Signal::SIGTERM)),
            Self::Terminated => (Self::Killed, EscalationStep::Signal(Signal::SIGKILL)),
            Self::Killed => (Self::Killed, EscalationStep::Abort),
        };
        *self = next;
        step
    }

    /// The last signal sent, if any.
    pub fn last_signal(self) -> Option<Signal> {
        match self {
            Self::Running => None,
            Self::Terminated => Some(Signal::SIGTERM),
            Self::Killed => Some(Signal::SIGKILL),
        }
    }
}

/// Follows subtest markers on the child's stdout and decides what goes into the journal.
#[derive(Debug, Default)]
pub struct SubtestTracker {
    current: Option<String>,
}

impl SubtestTracker {
    /// Creates a tracker with no current subtest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one complete stdout line (with or without its newline). Returns the subtest name to
    /// append to the journal, if any.
    ///
    /// A start marker always journals its subtest. A result marker journals its subtest only if
    /// it was not the one last started, which happens for subtests that fail before starting.
    pub fn observe(&mut self, line: &[u8]) -> Option<String> {
        let line = line.trim_end_with(|c| c == '\n' || c == '\r');

        if let Some(name) = line.strip_prefix(STARTING_SUBTEST.as_bytes())
            && !name.is_empty()
        {
            let name = name.to_str_lossy().into_owned();
            self.current = Some(name.clone());
            return Some(name);
        }

        if let Some(rest) = line.strip_prefix(SUBTEST_RESULT.as_bytes())
            && let Some(colon) = rest.find_byte(b':')
        {
            let name = rest[..colon].to_str_lossy();
            if self.current.as_deref() == Some(&*name) {
                return None;
            }
            self.current = None;
            return Some(name.into_owned());
        }

        None
    }

    /// The subtest most recently started, if it has not reported a result for another subtest
    /// since.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::test_helpers::FakeWatchdog;
    use test_case::test_case;

    #[test_case(0, 0 => TimeoutPlan::NONE; "no timeout")]
    #[test_case(30, 40 => TimeoutPlan::single(Duration::from_secs(30)); "watchdog accepts everything")]
    #[test_case(30, 15 => TimeoutPlan { period: Some(Duration::from_secs(5)), intervals: 6 }; "clamped to 15s")]
    #[test_case(30, 8 => TimeoutPlan { period: Some(Duration::from_secs(30) / 8), intervals: 8 }; "watchdog below extra")]
    #[test_case(3, 1 => TimeoutPlan { period: Some(Duration::from_secs(1)), intervals: 3 }; "tiny watchdog")]
    #[test_case(5, 12 => TimeoutPlan { period: Some(Duration::from_secs(5) / 3), intervals: 3 }; "uneven split")]
    #[test_case(35, 30 => TimeoutPlan { period: Some(Duration::from_millis(17500)), intervals: 2 }; "timeout just above window")]
    #[test_case(25, 30 => TimeoutPlan { period: Some(Duration::from_millis(12500)), intervals: 2 }; "timeout between window and accepted")]
    fn timeout_plan(timeout: u32, accepted: u32) -> TimeoutPlan {
        TimeoutPlan::new(timeout, accepted)
    }

    #[test]
    fn intervals_fit_inside_watchdog_window() {
        for accepted in 1..=90 {
            for timeout in 1..=90 {
                let plan = TimeoutPlan::new(timeout, accepted);
                let period = plan.period.expect("timeout is set");
                let full = Duration::from_secs(timeout.into());
                assert!(full - period * plan.intervals < Duration::from_nanos(plan.intervals.into()));
                if accepted < timeout + WATCHDOG_EXTRA {
                    assert!(
                        period <= Duration::from_secs(accepted.into()),
                        "{timeout}s with a {accepted}s watchdog: {plan:?}",
                    );
                }
            }
        }
    }

    #[test]
    fn arm_negotiates_with_watchdogs() {
        let (device, log) = FakeWatchdog::new(15);
        let mut watchdogs = WatchdogSet::from_devices(vec![Box::new(device)]);
        let plan = TimeoutPlan::arm(30, &mut watchdogs);
        assert_eq!(plan.intervals, 6);
        assert_eq!(plan.period, Some(Duration::from_secs(5)));
        assert_eq!(log.lock().unwrap().timeouts.last(), Some(&15));
    }

    #[test]
    fn escalation_order() {
        let mut escalation = Escalation::default();
        assert_eq!(escalation.last_signal(), None);
        assert_eq!(escalation.advance(), EscalationStep::Signal(Signal::SIGTERM));
        assert_eq!(escalation.last_signal(), Some(Signal::SIGTERM));
        assert_eq!(escalation.advance(), EscalationStep::Signal(Signal::SIGKILL));
        assert_eq!(escalation.advance(), EscalationStep::Abort);
        assert_eq!(escalation.advance(), EscalationStep::Abort);
        assert_eq!(escalation.last_signal(), Some(Signal::SIGKILL));
    }

    #[test]
    fn tracker_journals_started_subtests() {
        let mut tracker = SubtestTracker::new();
        assert_eq!(tracker.observe(b"IGT-Version: 1.28\n"), None);
        assert_eq!(
            tracker.observe(b"Starting subtest: first-subtest\n"),
            Some("first-subtest".to_owned())
        );
        assert_eq!(tracker.current(), Some("first-subtest"));
        assert_eq!(tracker.observe(b"Subtest first-subtest: SUCCESS (0.001s)\n"), None);
        assert_eq!(
            tracker.observe(b"Subtest never-started: FAIL (0.000s)\n"),
            Some("never-started".to_owned())
        );
        assert_eq!(tracker.current(), None);
        assert_eq!(
            tracker.observe(b"Subtest first-subtest: SUCCESS (0.001s)\n"),
            Some("first-subtest".to_owned())
        );
    }

    #[test]
    fn tracker_ignores_partial_markers() {
        let mut tracker = SubtestTracker::new();
        assert_eq!(tracker.observe(b"Starting subtest: \n"), None);
        assert_eq!(tracker.observe(b"Subtest without colon\n"), None);
        assert_eq!(tracker.observe(b"  Starting subtest: indented\n"), None);
        assert_eq!(tracker.observe(b"Dynamic subtest dyn: SUCCESS (0.1s)\n"), None);
    }
}
