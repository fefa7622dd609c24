// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two subtests that pass.

use integration_tests::{Outcome, Subtest, igt_main};

fn main() {
    igt_main(&[
        Subtest {
            name: "first-subtest",
            body: |_| Outcome::Pass,
        },
        Subtest {
            name: "second-subtest",
            body: |_| Outcome::Pass,
        },
    ])
}
