// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    Subtests,
    report::{TestResult, TestrunResult},
};
use crate::{
    helpers::piglit_name,
    list::JobEntry,
    protocol::{IgtExitCode, JournalLine, TrailerKind, journal_lines},
};

/// Replays a job's journal: collects the subtests that were entered, assigns timeouts to the
/// subtest that was running when they hit, and accumulates runtimes.
///
/// A job that never entered a subtest gets a single result derived from its exit code, filed
/// under the first requested subtest if there was one.
pub(super) fn fill_from_journal(
    report: &mut TestrunResult,
    entry: &JobEntry,
    journal: &str,
) -> Subtests {
    let binary_name = piglit_name(&entry.binary, None);
    let mut subtests = Subtests::default();
    let mut exit_code = None;
    let mut timed_out = false;

    for line in journal_lines(journal) {
        let trailer = match line {
            JournalLine::Subtest(name) => {
                subtests.add(name);
                continue;
            }
            JournalLine::Trailer(trailer) => trailer,
        };
        let elapsed = trailer.elapsed.unwrap_or_default();

        match trailer.kind {
            TrailerKind::Exit => {
                exit_code = Some(trailer.code);
                report.add_binary_runtime(&binary_name, elapsed);
                if subtests.is_empty() && entry.subtests.is_empty() {
                    report.test_mut(&binary_name).add_runtime(elapsed);
                }
            }
            TrailerKind::Timeout => {
                timed_out = true;
                if let Some(last) = subtests.last() {
                    let record = report.test_mut(&piglit_name(&entry.binary, Some(&last.name)));
                    record.result = Some(TestResult::Timeout);
                    record.add_runtime(elapsed);
                    report.add_binary_runtime(&binary_name, elapsed);
                }
            }
        }
    }

    if let Some(last) = subtests.last()
        && exit_code == Some(IgtExitCode::HANGUP)
    {
        report
            .test_mut(&piglit_name(&entry.binary, Some(&last.name)))
            .result = Some(TestResult::Notrun);
    }

    if subtests.is_empty() {
        let result = if timed_out {
            TestResult::Timeout
        } else {
            TestResult::from_exit_code(exit_code)
        };
        let name = match entry.subtests.first() {
            // The binary may have been killed before it announced the subtest.
            Some(subtest) => {
                subtests.add(subtest);
                piglit_name(&entry.binary, Some(subtest))
            }
            None => binary_name,
        };
        report.test_mut(&name).result = Some(result);
    }

    subtests
}
