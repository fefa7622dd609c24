// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A quick subtest, and a slow one that never finishes until it is sent SIGTERM.

use integration_tests::{EXIT_FAILURE, Outcome, Subtest, igt_main};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::{thread, time::Duration};

extern "C" fn on_sigterm(_: libc::c_int) {
    const MESSAGE: &[u8] = b"caught SIGTERM\n";
    // SAFETY: write and _exit are async-signal-safe.
    unsafe {
        libc::write(libc::STDERR_FILENO, MESSAGE.as_ptr().cast(), MESSAGE.len());
        libc::_exit(EXIT_FAILURE);
    }
}

fn main() {
    let action = SigAction::new(
        SigHandler::Handler(on_sigterm),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only calls async-signal-safe functions.
    unsafe { sigaction(Signal::SIGTERM, &action) }.expect("installed SIGTERM handler");

    igt_main(&[
        Subtest {
            name: "quick",
            body: |_| Outcome::Pass,
        },
        Subtest {
            name: "slow",
            body: |_| {
                println!("waiting for an event that never comes");
                loop {
                    thread::sleep(Duration::from_secs(60));
                }
            },
        },
    ])
}
