// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The on-disk layout of a results directory.
//!
//! Every job gets a directory named after its index, holding four append-only files. Files are
//! always opened at their end, after making sure they end with a newline, so that output from a
//! previous attempt is never mixed into the middle of a line.

use crate::{
    errors::OutputStoreError,
    list::JOB_LIST_FILE_NAME,
    settings::SETTINGS_FILE_NAME,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
};
use tracing::warn;

/// Uname of the machine, written when execution starts.
pub const UNAME_FILE_NAME: &str = "uname.txt";

/// Seconds since the epoch at which the run started.
pub const START_TIME_FILE_NAME: &str = "starttime.txt";

/// Seconds since the epoch at which the run ended.
pub const END_TIME_FILE_NAME: &str = "endtime.txt";

/// The reason the run was aborted, if it was.
pub const ABORTED_FILE_NAME: &str = "aborted.txt";

/// The generated report.
pub const RESULTS_FILE_NAME: &str = "results.json";

/// The log files kept for every job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LogKind {
    /// Subtest progress and the exit trailer.
    Journal,

    /// The child's stdout.
    Out,

    /// The child's stderr.
    Err,

    /// Kernel log records captured while the child ran.
    Dmesg,
}

impl LogKind {
    /// All log kinds.
    pub const ALL: [LogKind; 4] = [Self::Journal, Self::Out, Self::Err, Self::Dmesg];

    /// The file name within the job directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Journal => "journal.txt",
            Self::Out => "out.txt",
            Self::Err => "err.txt",
            Self::Dmesg => "dmesg.txt",
        }
    }
}

/// A results directory.
#[derive(Clone, Debug)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

impl OutputStore {
    /// Creates a store rooted at the results directory.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The results directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// The directory of the job at `index`.
    pub fn job_dir(&self, index: usize) -> Utf8PathBuf {
        self.root.join(index.to_string())
    }

    /// Creates the results directory if it doesn't exist.
    pub fn create_root(&self) -> Result<(), OutputStoreError> {
        fs::create_dir_all(&self.root)
            .map_err(|error| OutputStoreError::new("creating", &self.root, error))
    }

    /// Creates (or reuses) the directory of the job at `index` and opens its four log files.
    pub fn open_job(&self, index: usize, sync: bool) -> Result<JobOutputs, OutputStoreError> {
        let dir = self.job_dir(index);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {}
            Err(error) => return Err(OutputStoreError::new("creating", dir, error)),
        }
        if sync {
            sync_dir(&self.root)?;
        }

        let open = |kind: LogKind| LogFile::open_at_end(dir.join(kind.file_name()), sync);
        let outputs = JobOutputs {
            journal: open(LogKind::Journal)?,
            out: open(LogKind::Out)?,
            err: open(LogKind::Err)?,
            dmesg: open(LogKind::Dmesg)?,
        };
        if sync {
            sync_dir(&dir)?;
        }
        Ok(outputs)
    }

    /// Removes the results of a previous run from the directory.
    ///
    /// Job directories that contain unexpected files are left in place with a warning.
    pub fn clear_old_results(&self) -> Result<(), OutputStoreError> {
        for name in [
            UNAME_FILE_NAME,
            START_TIME_FILE_NAME,
            END_TIME_FILE_NAME,
            ABORTED_FILE_NAME,
            RESULTS_FILE_NAME,
            SETTINGS_FILE_NAME,
            JOB_LIST_FILE_NAME,
        ] {
            remove_if_exists(&self.root.join(name))?;
        }

        let entries = match self.root.read_dir_utf8() {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(OutputStoreError::new("reading", &self.root, error)),
        };
        for entry in entries {
            let entry = entry.map_err(|error| OutputStoreError::new("reading", &self.root, error))?;
            if entry.file_name().parse::<usize>().is_err() || !entry.path().is_dir() {
                continue;
            }

            let dir = entry.path();
            for kind in LogKind::ALL {
                remove_if_exists(&dir.join(kind.file_name()))?;
            }
            if let Err(error) = fs::remove_dir(dir) {
                warn!("could not remove `{dir}` (extra files inside?): {error}");
            }
        }
        Ok(())
    }

    /// Writes `uname.txt`.
    pub fn write_uname(&self, uname: &str) -> Result<(), OutputStoreError> {
        self.write_file(UNAME_FILE_NAME, uname)
    }

    /// Writes `starttime.txt`, unless a previous attempt already did.
    pub fn write_start_time_if_missing(&self, secs: f64) -> Result<(), OutputStoreError> {
        if self.root.join(START_TIME_FILE_NAME).exists() {
            return Ok(());
        }
        self.write_file(START_TIME_FILE_NAME, &format!("{secs:.6}"))
    }

    /// Writes `endtime.txt`.
    pub fn write_end_time(&self, secs: f64) -> Result<(), OutputStoreError> {
        self.write_file(END_TIME_FILE_NAME, &format!("{secs:.6}"))
    }

    /// Writes `aborted.txt` with the reason for the abort.
    pub fn write_aborted(&self, reason: &str) -> Result<(), OutputStoreError> {
        self.write_file(ABORTED_FILE_NAME, reason)
    }

    fn write_file(&self, name: &str, contents: &str) -> Result<(), OutputStoreError> {
        let path = self.root.join(name);
        fs::write(&path, contents).map_err(|error| OutputStoreError::new("writing", path, error))
    }
}

/// The four open log files of one job.
#[derive(Debug)]
pub struct JobOutputs {
    /// `journal.txt`
    pub journal: LogFile,
    /// `out.txt`
    pub out: LogFile,
    /// `err.txt`
    pub err: LogFile,
    /// `dmesg.txt`
    pub dmesg: LogFile,
}

/// An append-only log file.
#[derive(Debug)]
pub struct LogFile {
    file: File,
    path: Utf8PathBuf,
    sync: bool,
}

impl LogFile {
    /// Opens (creating if needed) the file for appending, inserting a newline first if the
    /// existing contents don't end with one.
    pub fn open_at_end(path: Utf8PathBuf, sync: bool) -> Result<Self, OutputStoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|error| OutputStoreError::new("opening", &path, error))?;

        ensure_trailing_newline(&mut file)
            .map_err(|error| OutputStoreError::new("opening", &path, error))?;

        Ok(Self { file, path, sync })
    }

    /// The path of the file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Appends `data`, syncing it to disk if requested.
    pub fn append(&mut self, data: &[u8]) -> Result<(), OutputStoreError> {
        self.file
            .write_all(data)
            .and_then(|()| if self.sync { self.file.sync_data() } else { Ok(()) })
            .map_err(|error| OutputStoreError::new("writing", &self.path, error))
    }
}

fn ensure_trailing_newline(file: &mut File) -> io::Result<()> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn remove_if_exists(path: &Utf8Path) -> Result<(), OutputStoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(OutputStoreError::new("removing", path, error)),
    }
}

fn sync_dir(dir: &Utf8Path) -> Result<(), OutputStoreError> {
    File::open(dir)
        .and_then(|file| file.sync_all())
        .map_err(|error| OutputStoreError::new("syncing", dir, error))
}
