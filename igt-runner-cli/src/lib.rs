// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line front end for the IGT test harness.
//!
//! The `igt-runner` binary runs an IGT-style test suite into a results directory, resumes runs
//! that were cut short, and turns a results directory into a `results.json` report. The engine
//! itself lives in the `igt-runner` library crate.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{Color, ConsoleStyles, OutputContext};

/// Parses the command line, runs the requested command and exits the process.
#[doc(hidden)]
pub fn main_impl() -> color_eyre::Result<()> {
    use clap::Parser;

    let opts = IgtRunnerApp::parse();
    let output = opts.init_output();

    match opts.exec(output) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr(&output.stderr_styles());
            std::process::exit(error.process_exit_code())
        }
    }
}
