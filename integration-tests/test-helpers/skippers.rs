// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two subtests that skip, so the binary exits with the skip code.

use integration_tests::{Outcome, Subtest, igt_main};

fn main() {
    igt_main(&[
        Subtest {
            name: "skip-one",
            body: |_| {
                println!("Test requirement not met: hardware missing");
                Outcome::Skip
            },
        },
        Subtest {
            name: "skip-two",
            body: |_| Outcome::Skip,
        },
    ])
}
