// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixed textual protocol spoken between the harness, the test binaries and the kernel log.
//!
//! Test binaries announce progress on stdout with a small set of line prefixes. The harness mirrors
//! the start and result markers into the journal, and appends exactly one trailer line per attempt
//! once the child exits.

use std::fmt;

/// Printed by a test binary when a subtest starts: `Starting subtest: <name>`.
pub const STARTING_SUBTEST: &str = "Starting subtest: ";

/// Printed by a test binary when a subtest finishes: `Subtest <name>: <RESULT> (<secs>s)`.
pub const SUBTEST_RESULT: &str = "Subtest ";

/// Printed when a dynamic subtest starts.
pub const STARTING_DYNAMIC_SUBTEST: &str = "Starting dynamic subtest: ";

/// Printed when a dynamic subtest finishes.
pub const DYNAMIC_SUBTEST_RESULT: &str = "Dynamic subtest ";

/// The version banner printed at the top of every test binary's stdout.
pub const IGT_VERSION: &str = "IGT-Version: ";

/// The marker test binaries write into the kernel log when a subtest starts.
pub const STARTING_SUBTEST_DMESG: &str = ": starting subtest ";

/// The marker test binaries write into the kernel log when a dynamic subtest starts.
pub const STARTING_DYNAMIC_SUBTEST_DMESG: &str = ": starting dynamic subtest ";

/// Argument asking a test binary to list its subtests, one per line.
pub const LIST_SUBTESTS_ARG: &str = "--list-subtests";

/// Argument carrying the comma-separated subtest selectors.
pub const RUN_SUBTEST_ARG: &str = "--run-subtest";

/// Environment variable asking test binaries to also print start/result markers on stderr.
pub const SENTINEL_ON_STDERR_ENV: &str = "IGT_SENTINEL_ON_STDERR";

/// Exit codes with a special meaning in the test protocol.
pub struct IgtExitCode;

impl IgtExitCode {
    /// All subtests passed.
    pub const SUCCESS: i32 = 0;

    /// All subtests were skipped.
    pub const SKIP: i32 = 77;

    /// The test timed out on its own.
    pub const TIMEOUT: i32 = 78;

    /// The selectors matched nothing, or the binary could not be executed.
    pub const INVALID: i32 = 79;

    /// The child terminated with SIGHUP (`-SIGHUP` after mapping).
    pub const HANGUP: i32 = -libc::SIGHUP;

    /// The wait status was neither an exit nor a signal.
    pub const UNKNOWN_STATUS: i32 = 9999;
}

/// Which trailer form a journal line carries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrailerKind {
    /// `exit:`: the child exited on its own.
    Exit,

    /// `timeout:`: the harness had to signal the child.
    Timeout,
}

impl TrailerKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Exit => "exit:",
            Self::Timeout => "timeout:",
        }
    }
}

/// A harness-written trailer line: `exit:<code> (<secs>s)` or `timeout:<code> (<secs>s)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trailer {
    /// The trailer form.
    pub kind: TrailerKind,

    /// The mapped exit code.
    pub code: i32,

    /// Elapsed wall time in seconds, if it could be parsed.
    pub elapsed: Option<f64>,
}

impl Trailer {
    /// Parses a trailer line. Returns `None` if the line is not a trailer.
    ///
    /// Parsing is lenient: a truncated line such as `exit:77 (` still yields the code.
    pub fn parse(line: &str) -> Option<Self> {
        let (kind, rest) = if let Some(rest) = line.strip_prefix(TrailerKind::Exit.prefix()) {
            (TrailerKind::Exit, rest)
        } else if let Some(rest) = line.strip_prefix(TrailerKind::Timeout.prefix()) {
            (TrailerKind::Timeout, rest)
        } else {
            return None;
        };

        let code = parse_leading_int(rest);
        let elapsed = rest
            .split_once('(')
            .and_then(|(_, time)| parse_seconds(time));

        Some(Self {
            kind,
            code,
            elapsed,
        })
    }
}

impl fmt::Display for Trailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} ({:.3}s)",
            self.kind.prefix(),
            self.code,
            self.elapsed.unwrap_or_default()
        )
    }
}

/// A single line of the journal.
#[derive(Clone, Debug, PartialEq)]
pub enum JournalLine<'a> {
    /// A subtest name mirrored from a start or result marker.
    Subtest(&'a str),

    /// A harness trailer.
    Trailer(Trailer),
}

/// Iterates over the non-empty lines of a journal.
pub fn journal_lines(journal: &str) -> impl Iterator<Item = JournalLine<'_>> {
    journal
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match Trailer::parse(line) {
            Some(trailer) => JournalLine::Trailer(trailer),
            None => JournalLine::Subtest(line),
        })
}

/// Parses `<secs>s)` (or just `<secs>`) into seconds.
pub(crate) fn parse_seconds(s: &str) -> Option<f64> {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// `atoi`-style parsing: an optional sign followed by digits; anything else yields 0.
fn parse_leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let value: i32 = digits[..end].parse().unwrap_or(0);
    if negative { -value } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("exit:0 (0.010s)", TrailerKind::Exit, 0, Some(0.010); "exit")]
    #[test_case("timeout:-9 (12.500s)", TrailerKind::Timeout, -9, Some(12.5); "timeout")]
    #[test_case("exit:77 (", TrailerKind::Exit, 77, None; "truncated")]
    #[test_case("exit:", TrailerKind::Exit, 0, None; "no code")]
    fn trailer_parse(line: &str, kind: TrailerKind, code: i32, elapsed: Option<f64>) {
        assert_eq!(
            Trailer::parse(line),
            Some(Trailer {
                kind,
                code,
                elapsed
            })
        );
    }

    #[test]
    fn trailer_display() {
        let trailer = Trailer {
            kind: TrailerKind::Timeout,
            code: -15,
            elapsed: Some(2.0004),
        };
        assert_eq!(trailer.to_string(), "timeout:-15 (2.000s)");
    }

    #[test]
    fn journal_lines_classify() {
        let lines: Vec<_> = journal_lines("first\n\nsecond\nexit:0 (0.010s)\n").collect();
        assert_eq!(
            lines,
            vec![
                JournalLine::Subtest("first"),
                JournalLine::Subtest("second"),
                JournalLine::Trailer(Trailer {
                    kind: TrailerKind::Exit,
                    code: 0,
                    elapsed: Some(0.010),
                }),
            ]
        );
    }
}
