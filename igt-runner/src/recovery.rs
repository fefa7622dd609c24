// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Computing where an interrupted run should pick up.
//!
//! The results directory is the only state that survives a crash, hang or power cycle. The
//! highest-numbered job directory tells which job was running last, and its journal tells how far
//! that job got: an `exit:` trailer means it finished, and every subtest name means that subtest
//! was entered and must not be entered again.

use crate::{
    errors::RecoveryError,
    list::{JobEntry, JobList},
    output_store::{LogKind, OutputStore},
    protocol::{JournalLine, TrailerKind, journal_lines},
    runner::ExecuteState,
    settings::Settings,
};
use camino::Utf8Path;
use std::{fs, io};
use tracing::{debug, info};

/// Everything needed to continue a run.
#[derive(Clone, Debug)]
pub struct ResumeState {
    /// The settings the run was started with.
    pub settings: Settings,

    /// The job list, with exclusions applied to the job that was interrupted.
    pub job_list: JobList,

    /// Where to continue.
    pub state: ExecuteState,
}

/// Reads back a results directory and computes the resume point.
pub fn resume(results_path: &Utf8Path) -> Result<ResumeState, RecoveryError> {
    let settings = Settings::read_from_dir(results_path).map_err(RecoveryError::Settings)?;
    let mut job_list = JobList::read_from_dir(results_path).map_err(RecoveryError::JobList)?;
    let store = OutputStore::new(results_path);

    let next = resume_point(&store, &mut job_list)?;
    debug!("resuming at job {next} of {}", job_list.len());

    Ok(ResumeState {
        settings,
        job_list,
        state: ExecuteState { next },
    })
}

fn resume_point(store: &OutputStore, job_list: &mut JobList) -> Result<usize, RecoveryError> {
    let len = job_list.len();
    let Some(index) = (0..=len).rev().find(|&idx| store.job_dir(idx).is_dir()) else {
        // Nothing has been executed yet.
        return Ok(0);
    };
    if index == len {
        return Ok(len);
    }

    let path = store.job_dir(index).join(LogKind::Journal.file_name());
    let journal = match fs::read_to_string(&path) {
        Ok(journal) => journal,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(index),
        Err(error) => return Err(RecoveryError::ReadJournal { path, error }),
    };

    let entry = &mut job_list.entries[index];
    let next = match apply_journal(entry, &journal) {
        JournalVerdict::Finished => index + 1,
        JournalVerdict::NoProgress => {
            info!("{entry} made no progress before it was interrupted, not running it again");
            index + 1
        }
        JournalVerdict::Continue => index,
    };
    Ok(next)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum JournalVerdict {
    /// The binary exited on its own.
    Finished,

    /// No subtest was ever entered.
    NoProgress,

    /// Some subtests were entered; the rest should be run.
    Continue,
}

fn apply_journal(entry: &mut JobEntry, journal: &str) -> JournalVerdict {
    let mut started = Vec::new();
    let mut finished = false;

    for line in journal_lines(journal) {
        match line {
            JournalLine::Subtest(name) => started.push(name),
            // A timeout leaves the binary runnable; only the entered subtests are excluded.
            JournalLine::Trailer(trailer) => finished |= trailer.kind == TrailerKind::Exit,
        }
    }

    if finished {
        entry.mark_done();
        return JournalVerdict::Finished;
    }
    if started.is_empty() {
        return JournalVerdict::NoProgress;
    }
    entry.exclude_started(started);
    JournalVerdict::Continue
}
