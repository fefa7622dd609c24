// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A duplicate of igt-runner's main.rs. Binaries are only visible to tests of their own package.

use color_eyre::Result;

fn main() -> Result<()> {
    color_eyre::install()?;
    igt_runner_cli::main_impl()
}
