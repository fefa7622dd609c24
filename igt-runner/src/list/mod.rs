// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for building, persisting and reading back the list of jobs to run.
//!
//! The main data structures in this module are:
//! * [`JobList`] for the ordered jobs of a run
//! * [`Catalogue`] for the tests available in a test root
//! * [`TestListFile`] for an explicit, user-supplied list of tests

mod catalogue;
mod job_list;

pub use catalogue::*;
pub use job_list::*;
