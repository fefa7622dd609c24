// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A binary without subtests that passes.

use integration_tests::{Outcome, igt_simple_main};

fn main() {
    igt_simple_main(|| {
        println!("this binary has no subtests");
        Outcome::Pass
    })
}
