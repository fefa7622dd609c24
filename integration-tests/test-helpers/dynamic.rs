// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One subtest with a dynamic subtest per engine. The bcs0 engine fails.

use integration_tests::{Outcome, Subtest, igt_main};

fn main() {
    igt_main(&[Subtest {
        name: "engines",
        body: |cx| {
            cx.dynamic("rcs0", || Outcome::Pass);
            cx.dynamic("bcs0", || {
                println!("bcs0: unexpected fence state");
                Outcome::Fail
            });
            Outcome::Pass
        },
    }])
}
