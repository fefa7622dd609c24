// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A miniature IGT test framework for the fake test binaries in `test-helpers/`.
//!
//! Binaries built on it speak the same protocol as real IGT tests: `--list-subtests` prints the
//! subtest names, `--run-subtest` takes a comma-separated selector list (`*` globs, `!` excludes),
//! and every subtest is bracketed by `Starting subtest:` and `Subtest <name>: <RESULT>` lines. The
//! markers are repeated on stderr when `IGT_SENTINEL_ON_STDERR` is set.

use clap::Parser;
use std::{
    io::{self, Write},
    process,
    time::Instant,
};

/// Exit code when every selected subtest passed or was skipped, with at least one pass.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code when any selected subtest failed.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code when every selected subtest was skipped.
pub const EXIT_SKIP: i32 = 77;

/// Exit code when the selectors matched nothing, or a binary without subtests was asked for some.
pub const EXIT_INVALID: i32 = 79;

const SENTINEL_ON_STDERR_ENV: &str = "IGT_SENTINEL_ON_STDERR";

/// The outcome of a test body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The test passed.
    Pass,
    /// The test did not apply to this machine.
    Skip,
    /// The test failed.
    Fail,
}

impl Outcome {
    fn word(self) -> &'static str {
        match self {
            Self::Pass => "SUCCESS",
            Self::Skip => "SKIP",
            Self::Fail => "FAIL",
        }
    }

    fn exit_code(outcomes: &[Self]) -> i32 {
        if outcomes.contains(&Self::Fail) {
            EXIT_FAILURE
        } else if !outcomes.is_empty() && outcomes.iter().all(|&o| o == Self::Skip) {
            EXIT_SKIP
        } else {
            EXIT_SUCCESS
        }
    }
}

/// A subtest: a name and the body that runs it.
pub struct Subtest {
    /// The subtest's name.
    pub name: &'static str,
    /// The test body. It may print freely and may start dynamic subtests through the context.
    pub body: fn(&mut Context) -> Outcome,
}

#[derive(Debug, Parser)]
struct Args {
    /// Print the subtest names and exit
    #[arg(long)]
    list_subtests: bool,

    /// Comma-separated subtest selectors
    #[arg(long, value_name = "SELECTORS")]
    run_subtest: Option<String>,
}

/// Passed to subtest bodies.
pub struct Context {
    sentinel_on_stderr: bool,
    dynamic_outcomes: Vec<Outcome>,
}

impl Context {
    /// Runs a dynamic subtest inside the current subtest.
    pub fn dynamic(&mut self, name: &str, body: impl FnOnce() -> Outcome) {
        self.marker(&format!("Starting dynamic subtest: {name}"));
        let start = Instant::now();
        let outcome = body();
        self.marker(&format!(
            "Dynamic subtest {name}: {} ({:.3}s)",
            outcome.word(),
            start.elapsed().as_secs_f64()
        ));
        self.dynamic_outcomes.push(outcome);
    }

    fn marker(&self, line: &str) {
        println!("{line}");
        if self.sentinel_on_stderr {
            eprintln!("{line}");
        }
    }

    /// A parent subtest fails if any of its dynamic subtests failed.
    fn combine(&mut self, outcome: Outcome) -> Outcome {
        let dynamic = std::mem::take(&mut self.dynamic_outcomes);
        if outcome == Outcome::Pass && dynamic.contains(&Outcome::Fail) {
            Outcome::Fail
        } else {
            outcome
        }
    }
}

/// Runs a test binary made of `subtests`, then exits the process.
pub fn igt_main(subtests: &[Subtest]) -> ! {
    let args = Args::parse();

    if args.list_subtests {
        if subtests.is_empty() {
            process::exit(EXIT_INVALID);
        }
        for subtest in subtests {
            println!("{}", subtest.name);
        }
        process::exit(EXIT_SUCCESS);
    }

    println!("IGT-Version: 1.30-fake (x86_64) (Linux: 6.8.0 x86_64)");

    let selected: Vec<&Subtest> = match &args.run_subtest {
        Some(selectors) => subtests
            .iter()
            .filter(|subtest| is_selected(subtest.name, selectors))
            .collect(),
        None => subtests.iter().collect(),
    };
    if selected.is_empty() {
        eprintln!("no subtests selected");
        process::exit(EXIT_INVALID);
    }

    let mut cx = Context {
        sentinel_on_stderr: std::env::var_os(SENTINEL_ON_STDERR_ENV).is_some(),
        dynamic_outcomes: Vec::new(),
    };
    let mut outcomes = Vec::new();
    for subtest in selected {
        cx.marker(&format!("Starting subtest: {}", subtest.name));
        let start = Instant::now();
        let outcome = (subtest.body)(&mut cx);
        let outcome = cx.combine(outcome);
        cx.marker(&format!(
            "Subtest {}: {} ({:.3}s)",
            subtest.name,
            outcome.word(),
            start.elapsed().as_secs_f64()
        ));
        outcomes.push(outcome);
    }

    let _ = io::stdout().flush();
    process::exit(Outcome::exit_code(&outcomes));
}

/// Runs a binary without subtests, then exits the process.
pub fn igt_simple_main(body: fn() -> Outcome) -> ! {
    let args = Args::parse();
    if args.list_subtests || args.run_subtest.is_some() {
        process::exit(EXIT_INVALID);
    }

    println!("IGT-Version: 1.30-fake (x86_64) (Linux: 6.8.0 x86_64)");
    let outcome = body();
    let _ = io::stdout().flush();
    process::exit(Outcome::exit_code(&[outcome]));
}

/// Returns true if `name` is selected by a comma-separated selector list.
///
/// The list is read left to right; `!pattern` removes previously selected matches.
pub fn is_selected(name: &str, selectors: &str) -> bool {
    selectors.split(',').fold(false, |selected, selector| {
        match selector.strip_prefix('!') {
            Some(pattern) => selected && !glob_match(pattern, name),
            None => selected || glob_match(selector, name),
        }
    })
}

fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, rest)) => {
            let Some(remaining) = name.strip_prefix(prefix) else {
                return false;
            };
            (0..=remaining.len())
                .filter(|&idx| remaining.is_char_boundary(idx))
                .any(|idx| glob_match(rest, &remaining[idx..]))
        }
    }
}
