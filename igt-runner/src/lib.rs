// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for the IGT test harness.
//!
//! The harness runs an ordered list of test binaries one at a time, each in its own process group,
//! and records everything they print into a per-job directory. The journal written alongside that
//! output is the single source of truth for crash recovery: re-invoking the harness against the
//! same results directory resumes exactly where the previous attempt stopped, even if the machine
//! was power-cycled by a hardware watchdog in between.
//!
//! The main entry points are:
//!
//! * [`list::JobList::build`] to discover and filter the tests to run,
//! * [`runner::TestRunner`] to execute (or resume) a run,
//! * [`results::generate_results`] to turn a results directory into a report.

pub mod errors;
mod helpers;
pub mod kmsg;
pub mod line_buffer;
pub mod list;
pub mod output_store;
pub mod protocol;
pub mod recovery;
pub mod results;
pub mod runner;
pub mod settings;
pub mod signal;
pub mod test_filter;
mod time;
pub mod watchdog;

pub use helpers::piglit_name;
