// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attributing stdout and stderr to subtests.
//!
//! Every line starting with a marker is a match. A subtest's output runs from the line after the
//! match preceding its begin line up to the match following its result line. Output printed
//! between two subtests (by fixtures, for example) is attributed to both of them.

use super::{ResultRecord, Subtests, TestResult, TestrunResult};
use crate::{
    helpers::piglit_name,
    protocol::{
        DYNAMIC_SUBTEST_RESULT, IGT_VERSION, STARTING_DYNAMIC_SUBTEST, STARTING_SUBTEST,
        SUBTEST_RESULT, parse_seconds,
    },
};

/// Which output file is being processed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Stream {
    Out,
    Err,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MarkerKind {
    Starting,
    Result,
    DynamicStarting,
    DynamicResult,
}

impl MarkerKind {
    const ALL: [Self; 4] = [
        Self::Starting,
        Self::Result,
        Self::DynamicStarting,
        Self::DynamicResult,
    ];

    fn prefix(self) -> &'static str {
        match self {
            Self::Starting => STARTING_SUBTEST,
            Self::Result => SUBTEST_RESULT,
            Self::DynamicStarting => STARTING_DYNAMIC_SUBTEST,
            Self::DynamicResult => DYNAMIC_SUBTEST_RESULT,
        }
    }

    fn matches(self, line: &str) -> bool {
        let Some(rest) = line.strip_prefix(self.prefix()) else {
            return false;
        };
        match self {
            Self::Starting | Self::DynamicStarting => true,
            Self::Result | Self::DynamicResult => is_result_line(rest),
        }
    }

    fn ends_parent(self) -> bool {
        matches!(self, Self::Starting | Self::Result)
    }
}

/// Returns true if `line` is a subtest or dynamic subtest begin or result marker.
pub(super) fn is_marker_line(line: &str) -> bool {
    MarkerKind::ALL.into_iter().any(|kind| kind.matches(line))
}

/// A name made of `[-_a-zA-Z0-9]` followed by `": "`.
fn is_result_line(rest: &str) -> bool {
    let name_len = rest
        .find(|c: char| !(c == '-' || c == '_' || c.is_ascii_alphanumeric()))
        .unwrap_or(rest.len());
    name_len > 0 && rest[name_len..].starts_with(": ")
}

#[derive(Clone, Copy, Debug)]
struct Match {
    pos: usize,
    kind: MarkerKind,
}

/// Marker lines found in one output buffer.
struct Matches<'a> {
    buf: &'a str,
    items: Vec<Match>,
}

impl<'a> Matches<'a> {
    fn find(buf: &'a str) -> Self {
        let mut items = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let line = &buf[pos..];
            if let Some(kind) = MarkerKind::ALL.into_iter().find(|kind| kind.matches(line)) {
                items.push(Match { pos, kind });
            }
            pos = next_line(buf, pos);
        }
        Self { buf, items }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    /// The first match of `kind` in `first..last` whose line is the begin or result line for
    /// `name`.
    fn find_subtest(
        &self,
        kind: MarkerKind,
        name: &str,
        first: usize,
        last: usize,
    ) -> Option<usize> {
        let full_line = match kind {
            MarkerKind::Starting | MarkerKind::DynamicStarting => {
                format!("{}{name}\n", kind.prefix())
            }
            MarkerKind::Result | MarkerKind::DynamicResult => format!("{}{name}: ", kind.prefix()),
        };
        (first..last.min(self.len())).find(|&k| {
            let item = self.items[k];
            let rest = &self.buf.as_bytes()[item.pos..];
            let n = full_line.len().min(rest.len());
            item.kind == kind && rest[..n] == full_line.as_bytes()[..n]
        })
    }

    /// Where the output of a subtest begins, only looking at matches from `first` onwards.
    fn begin_limit(
        &self,
        begin: Option<usize>,
        result: Option<usize>,
        start: usize,
        first: usize,
    ) -> usize {
        let begin = begin.filter(|&idx| idx >= first);
        let result = result.filter(|&idx| idx >= first);
        match (begin, result) {
            (None, None) => start,
            // The subtest never started but has a result, probably from a failing fixture.
            (None, Some(result)) if result > first => {
                next_line(self.buf, self.items[result - 1].pos)
            }
            (None, Some(_)) => start,
            (Some(begin), _) if begin <= first => start,
            (Some(begin), _) => next_line(self.buf, self.items[begin - 1].pos),
        }
    }

    /// Where the output of a subtest ends, only looking at matches in `first..last`.
    fn end_limit(
        &self,
        begin: Option<usize>,
        result: Option<usize>,
        end: usize,
        first: usize,
        last: usize,
    ) -> usize {
        let begin = begin.filter(|&idx| idx >= first);
        let result = result.filter(|&idx| idx >= first);
        match (begin, result) {
            (None, None) => end,
            // Incomplete: everything up to the next subtest boundary.
            (Some(begin), None) => (begin + 1..last.min(self.len()))
                .find(|&k| self.items[k].kind.ends_parent())
                .map_or(end, |k| self.items[k].pos),
            (_, Some(result)) if result + 1 < last => self.items[result + 1].pos,
            (_, Some(_)) => end,
        }
    }

    fn line(&self, idx: usize, end: usize) -> &'a str {
        let pos = self.items[idx].pos;
        let line_end = self.buf[pos..end.max(pos)]
            .find('\n')
            .map_or(end.max(pos), |n| pos + n);
        &self.buf[pos..line_end]
    }
}

/// The offset just past the newline at or after `pos`, or the end of the buffer.
fn next_line(buf: &str, pos: usize) -> usize {
    buf[pos..].find('\n').map_or(buf.len(), |n| pos + n + 1)
}

/// The result and runtime from a result line such as `Subtest foo: SUCCESS (0.003s)`.
///
/// A missing line means the subtest is incomplete.
fn parse_result_line(prefix: &str, name: &str, line: Option<&str>) -> (TestResult, f64) {
    let Some(rest) = line
        .and_then(|line| line.strip_prefix(prefix))
        .and_then(|rest| rest.strip_prefix(name))
        .and_then(|rest| rest.strip_prefix(": "))
    else {
        return (TestResult::Incomplete, 0.0);
    };

    let word_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let result = TestResult::from_result_word(&rest[..word_len]);
    let time = rest
        .get(word_len + 1..)
        .and_then(|after| after.strip_prefix('('))
        .and_then(parse_seconds)
        .unwrap_or(0.0);
    (result, time)
}

/// The first `IGT-Version:` line, without its newline.
fn find_igt_version(buf: &str) -> Option<&str> {
    buf.lines().find(|line| line.starts_with(IGT_VERSION))
}

/// Distributes one output buffer over the records of the job's subtests.
pub(super) fn fill_from_output(
    report: &mut TestrunResult,
    binary: &str,
    buf: &str,
    stream: Stream,
    subtests: &mut Subtests,
) {
    let igt_version = find_igt_version(buf);
    let set_text = |record: &mut ResultRecord, text: &str| {
        match stream {
            Stream::Out => record.out = text.to_owned(),
            Stream::Err => record.err = text.to_owned(),
        }
        if let Some(version) = igt_version {
            record.igt_version = Some(version.to_owned());
        }
    };

    if subtests.is_empty() {
        set_text(report.test_mut(&piglit_name(binary, None)), buf);
        return;
    }

    let matches = Matches::find(buf);
    for subtest in subtests.iter_mut() {
        let parent_name = piglit_name(binary, Some(&subtest.name));
        let begin = matches.find_subtest(MarkerKind::Starting, &subtest.name, 0, matches.len());
        let result = matches.find_subtest(MarkerKind::Result, &subtest.name, 0, matches.len());
        let beg = matches.begin_limit(begin, result, 0, 0);
        let end = matches.end_limit(begin, result, buf.len(), 0, matches.len());

        let record = report.test_mut(&parent_name);
        // A result line printed before the begin line leaves the limits crossed.
        set_text(record, &buf[beg..end.max(beg)]);
        if record.result.is_none() {
            let line = result.map(|idx| matches.line(idx, end));
            let (parsed, time) = parse_result_line(SUBTEST_RESULT, &subtest.name, line);
            record.result = Some(parsed);
            record.set_runtime(time);
        }

        // Dynamic subtests live between the parent's begin line and its result line, or the next
        // subtest boundary if the parent never finished.
        let first = begin.map_or(0, |idx| idx + 1);
        let last = result.unwrap_or_else(|| {
            (first..matches.len())
                .find(|&k| matches.items[k].kind.ends_parent())
                .unwrap_or(matches.len())
        });
        let parent_result = report.tests.get(&parent_name).and_then(|r| r.result);

        for k in first..last {
            let item = matches.items[k];
            if item.kind != MarkerKind::DynamicStarting {
                continue;
            }
            let Some(dynamic_name) = buf[item.pos + STARTING_DYNAMIC_SUBTEST.len()..]
                .split_whitespace()
                .next()
            else {
                continue;
            };

            let dyn_result = matches.find_subtest(MarkerKind::DynamicResult, dynamic_name, k, last);
            let dyn_beg = matches.begin_limit(Some(k), dyn_result, beg, first);
            let dyn_end = matches.end_limit(Some(k), dyn_result, end, first, last);

            subtest.add_dynamic(dynamic_name);
            let record = report.test_mut(&format!(
                "{parent_name}@{}",
                dynamic_name.to_ascii_lowercase()
            ));
            set_text(record, &buf[dyn_beg..dyn_end.max(dyn_beg)]);
            if record.result.is_none() {
                let line = dyn_result.map(|idx| matches.line(idx, dyn_end));
                let (mut parsed, time) =
                    parse_result_line(DYNAMIC_SUBTEST_RESULT, dynamic_name, line);
                // A dynamic subtest cut short by a graceful stop inherits that status.
                if parsed == TestResult::Incomplete && parent_result == Some(TestResult::Notrun) {
                    parsed = TestResult::Notrun;
                }
                record.result = Some(parsed);
                record.set_runtime(time);
            }
        }
    }
}
