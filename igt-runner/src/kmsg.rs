// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading kernel log records from `/dev/kmsg`.
//!
//! Every `read` on `/dev/kmsg` returns exactly one record of the form
//! `<flags>,<seq>,<usec>,<cont>;<message>\n`, possibly followed by continuation lines starting
//! with a space. Records are stored verbatim; formatting happens when results are generated.

use camino::Utf8Path;
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom},
    os::unix::fs::OpenOptionsExt,
};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

/// The kernel log device.
pub const KMSG_PATH: &str = "/dev/kmsg";

/// Large enough for any single kmsg record (the kernel limit is 8 KiB minus headers).
pub const RECORD_BUF_SIZE: usize = 8192;

/// Upper bound on records drained after a child exits, so a kernel spamming its log cannot keep
/// the harness from moving on.
const MAX_DRAIN_RECORDS: usize = 16 * 1024;

/// A non-blocking reader positioned at the end of the kernel log.
#[derive(Debug)]
pub struct KmsgReader {
    fd: AsyncFd<File>,
}

impl KmsgReader {
    /// Opens the kernel log and seeks past every record currently in the ring buffer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Utf8Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            fd: AsyncFd::new(file)?,
        })
    }

    /// Waits for the next record and reads it into `buf`.
    ///
    /// Records overwritten before they could be read are skipped silently. Cancel-safe.
    pub async fn read_record(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| read_once(inner.get_ref(), buf)) {
                Ok(Ok(Some(n))) => return Ok(n),
                Ok(Ok(None)) => continue,
                Ok(Err(error)) => return Err(error),
                Err(_would_block) => continue,
            }
        }
    }

    /// Reads every record that is available right now, without waiting, and hands each one to
    /// `sink`.
    ///
    /// Read errors end the drain with a warning; errors from `sink` are returned.
    pub fn drain<E>(&mut self, mut sink: impl FnMut(&[u8]) -> Result<(), E>) -> Result<usize, E> {
        let mut buf = vec![0u8; RECORD_BUF_SIZE];
        let mut count = 0;
        while count < MAX_DRAIN_RECORDS {
            match read_once(self.fd.get_ref(), &mut buf) {
                Ok(Some(0)) => break,
                Ok(Some(n)) => {
                    sink(&buf[..n])?;
                    count += 1;
                }
                Ok(None) => continue,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if is_record_too_large(&error) => {
                    warn!("buffer too small for kernel log record, record lost");
                    count += 1;
                }
                Err(error) => {
                    warn!("error draining kernel log: {error}");
                    break;
                }
            }
        }
        debug!("drained {count} kernel log records");
        Ok(count)
    }
}

/// Reads a single record. `Ok(None)` means records were lost and reading should be retried.
fn read_once(mut file: &File, buf: &mut [u8]) -> io::Result<Option<usize>> {
    match file.read(buf) {
        Ok(n) => Ok(Some(n)),
        Err(error) if error.raw_os_error() == Some(libc::EPIPE) => Ok(None),
        Err(error) => Err(error),
    }
}

/// Returns true if a read error only means a single record was too big for the buffer.
pub fn is_record_too_large(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::EINVAL)
}
