// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::ExecuteError, protocol::IgtExitCode};
use nix::{
    sys::{
        signal::{Signal, kill, killpg},
        utsname::uname,
    },
    unistd::Pid,
};
use std::{
    os::unix::process::{CommandExt, ExitStatusExt},
    process::ExitStatus,
};

/// Pre-execution configuration on Unix.
///
/// This sets up just the process group ID.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

/// Sends `signal` to the child's process group, then to the child itself.
///
/// Failing to signal the group is fine (the child may have left it). Failing to signal the child
/// is not: it has not been reaped yet, so it must still exist.
pub(super) fn kill_child(pid: u32, signal: Signal) -> Result<(), ExecuteError> {
    let pid = Pid::from_raw(pid as i32);
    let _ = killpg(pid, signal);
    kill(pid, signal).map_err(|error| ExecuteError::Kill {
        signal,
        pid: pid.as_raw(),
        error,
    })
}

/// Maps an exit status to the code written to the journal.
///
/// Exit codes of 128 and above come from shells reporting a signal, and are folded back to the
/// negative signal number. Children killed by a signal report `-signal`.
pub(super) fn journal_exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        if code >= 128 { 128 - code } else { code }
    } else if let Some(signal) = status.signal() {
        -signal
    } else {
        IgtExitCode::UNKNOWN_STATUS
    }
}

/// The `sysname nodename release version machine` line for `uname.txt`.
pub(super) fn uname_line() -> String {
    match uname() {
        Ok(uts) => format!(
            "{} {} {} {} {}\n",
            uts.sysname().to_string_lossy(),
            uts.nodename().to_string_lossy(),
            uts.release().to_string_lossy(),
            uts.version().to_string_lossy(),
            uts.machine().to_string_lossy(),
        ),
        Err(error) => {
            tracing::warn!("uname() failed: {error}");
            "uname() failed\n".to_owned()
        }
    }
}
