// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::catalogue::{Catalogue, TestListFile};
use crate::{
    errors::{JobListError, JobListParseError},
    helpers::piglit_name,
    settings::Settings,
    test_filter::TestFilter,
};
use camino::Utf8Path;
use indexmap::IndexSet;
use itertools::Itertools;
use std::{fmt, fs};
use tracing::debug;

/// The file the job list is persisted to, relative to the results directory.
pub const JOB_LIST_FILE_NAME: &str = "joblist.txt";

/// Progress made on a job entry by previous attempts, as reconstructed from its journal.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum EntryState {
    /// Not attempted, or attempted without any recorded progress.
    #[default]
    Pending,

    /// Interrupted after entering these subtests. They must not be entered again.
    Partial {
        /// Subtests that were started, in journal order.
        excluded: IndexSet<String>,
    },

    /// The binary exited on its own; nothing is left to run.
    Done,
}

/// A single invocation of a test binary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobEntry {
    /// The binary name, relative to the test root.
    pub binary: String,

    /// Subtest selectors passed to the binary. Empty means the whole binary.
    pub subtests: Vec<String>,

    /// Runtime progress. Not persisted.
    pub state: EntryState,
}

impl JobEntry {
    /// Creates a pending entry.
    pub fn new(binary: impl Into<String>, subtests: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            subtests,
            state: EntryState::Pending,
        }
    }

    /// Returns true if this entry must not be run again.
    pub fn is_done(&self) -> bool {
        self.state == EntryState::Done
    }

    /// The selectors to pass to the binary, taking exclusions from previous attempts into account.
    ///
    /// An entry without selectors that has exclusions runs `*` minus the excluded subtests.
    pub fn selectors(&self) -> Vec<String> {
        match &self.state {
            EntryState::Pending | EntryState::Done => self.subtests.clone(),
            EntryState::Partial { excluded } => {
                let base = if self.subtests.is_empty() {
                    vec!["*".to_owned()]
                } else {
                    self.subtests.clone()
                };
                base.into_iter()
                    .chain(excluded.iter().map(|name| format!("!{name}")))
                    .collect()
            }
        }
    }

    /// Records subtests that a previous attempt entered, so that they are skipped from now on.
    pub fn exclude_started<'a>(&mut self, started: impl IntoIterator<Item = &'a str>) {
        if !matches!(self.state, EntryState::Partial { .. }) {
            self.state = EntryState::Partial {
                excluded: IndexSet::new(),
            };
        }
        if let EntryState::Partial { excluded } = &mut self.state {
            excluded.extend(started.into_iter().map(str::to_owned));
        }
    }

    /// Marks the entry as fully completed.
    pub fn mark_done(&mut self) {
        self.state = EntryState::Done;
    }
}

impl fmt::Display for JobEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selectors = self.selectors();
        if selectors.is_empty() {
            write!(f, "{}", self.binary)
        } else {
            write!(f, "{} ({})", self.binary, selectors.iter().join(", "))
        }
    }
}

/// The ordered list of jobs for a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JobList {
    /// The entries, in execution order.
    pub entries: Vec<JobEntry>,
}

impl JobList {
    /// Creates a job list from entries.
    pub fn new(entries: Vec<JobEntry>) -> Self {
        Self { entries }
    }

    /// Builds the job list for a fresh run.
    ///
    /// If `settings.test_list` is set, the tests come from that file. Otherwise the catalogue in the
    /// test root is read and each binary is asked for its subtests.
    pub fn build(settings: &Settings, filter: &TestFilter) -> Result<Self, JobListError> {
        let list = match &settings.test_list {
            Some(path) => {
                let file = TestListFile::read(path)?;
                Self::from_test_list(&file, settings.multiple_mode, filter)
            }
            None => {
                let catalogue = Catalogue::discover(&settings.test_root)?;
                Self::from_catalogue(&catalogue, settings.multiple_mode, filter)
            }
        };
        debug!("built job list with {} entries", list.len());
        Ok(list)
    }

    /// Builds a job list from a discovered catalogue.
    ///
    /// In multiple mode, one entry per binary is created. If every subtest of that binary was
    /// selected, the entry carries no selectors at all.
    pub fn from_catalogue(catalogue: &Catalogue, multiple_mode: bool, filter: &TestFilter) -> Self {
        let mut entries = Vec::new();
        for binary in &catalogue.binaries {
            if binary.subtests.is_empty() {
                if filter.matches(&piglit_name(&binary.name, None)) {
                    entries.push(JobEntry::new(&binary.name, Vec::new()));
                }
                continue;
            }

            let selected: Vec<String> = binary
                .subtests
                .iter()
                .filter(|subtest| filter.matches(&piglit_name(&binary.name, Some(subtest))))
                .cloned()
                .collect();
            if selected.is_empty() {
                continue;
            }

            if multiple_mode {
                let subtests = if selected.len() == binary.subtests.len() {
                    Vec::new()
                } else {
                    selected
                };
                entries.push(JobEntry::new(&binary.name, subtests));
            } else {
                entries.extend(
                    selected
                        .into_iter()
                        .map(|subtest| JobEntry::new(&binary.name, vec![subtest])),
                );
            }
        }
        Self { entries }
    }

    /// Builds a job list from an explicit test list.
    ///
    /// In multiple mode, consecutive subtests of the same binary are merged into one entry.
    pub fn from_test_list(file: &TestListFile, multiple_mode: bool, filter: &TestFilter) -> Self {
        let mut entries: Vec<JobEntry> = Vec::new();
        for test in &file.tests {
            if !filter.matches(&piglit_name(&test.binary, test.subtest.as_deref())) {
                continue;
            }

            let Some(subtest) = &test.subtest else {
                entries.push(JobEntry::new(&test.binary, Vec::new()));
                continue;
            };

            if multiple_mode
                && let Some(last) = entries.last_mut()
                && last.binary == test.binary
                && !last.subtests.is_empty()
            {
                last.subtests.push(subtest.clone());
                continue;
            }
            entries.push(JobEntry::new(&test.binary, vec![subtest.clone()]));
        }
        Self { entries }
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the list: one line per entry, `binary` optionally followed by a space and
    /// comma-separated selectors.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.binary);
            if !entry.subtests.is_empty() {
                out.push(' ');
                out.push_str(&entry.subtests.join(","));
            }
            out.push('\n');
        }
        out
    }

    /// Parses a serialized job list. All entries are [`EntryState::Pending`].
    pub fn deserialize(text: &str) -> Result<Self, JobListParseError> {
        let mut entries = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            if line.is_empty() {
                return Err(JobListParseError::new(line_no, line, "empty line"));
            }
            let entry = match line.split_once(' ') {
                None => JobEntry::new(line, Vec::new()),
                Some((binary, subtests)) => {
                    let subtests: Vec<String> = subtests.split(',').map(str::to_owned).collect();
                    if binary.is_empty() || subtests.iter().any(|s| s.is_empty() || s.contains(' '))
                    {
                        return Err(JobListParseError::new(line_no, line, "malformed entry"));
                    }
                    JobEntry::new(binary, subtests)
                }
            };
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    /// Writes `joblist.txt` into `dir`, replacing any previous one.
    pub fn write_to_dir(&self, dir: &Utf8Path) -> Result<(), JobListError> {
        let path = dir.join(JOB_LIST_FILE_NAME);
        fs::write(&path, self.serialize()).map_err(|error| JobListError::Write { path, error })
    }

    /// Reads `joblist.txt` from `dir`.
    pub fn read_from_dir(dir: &Utf8Path) -> Result<Self, JobListError> {
        let path = dir.join(JOB_LIST_FILE_NAME);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) => return Err(JobListError::Read { path, error }),
        };
        Self::deserialize(&text).map_err(|error| JobListError::Parse { path, error })
    }
}
