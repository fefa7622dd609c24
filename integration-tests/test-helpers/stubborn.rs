// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A subtest that hangs with SIGTERM ignored, so it only goes away with SIGKILL.

use integration_tests::{Outcome, Subtest, igt_main};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::{thread, time::Duration};

fn main() {
    let action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: ignoring a signal installs no handler code.
    unsafe { sigaction(Signal::SIGTERM, &action) }.expect("ignored SIGTERM");

    igt_main(&[
        Subtest {
            name: "stuck",
            body: |_| loop {
                thread::sleep(Duration::from_secs(60));
            },
        },
        Subtest {
            name: "after",
            body: |_| Outcome::Pass,
        },
    ])
}
