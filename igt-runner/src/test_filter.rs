// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering tests based on user-specified selectors.
//!
//! Selectors are regular expressions matched anywhere within a test's piglit name. They form an
//! ordered list in which the last matching selector decides whether a test is included. A test
//! matched by no selector at all is included only when there are no include selectors.

use crate::errors::TestFilterBuildError;
use regex::Regex;

/// Whether a selector includes or excludes the tests it matches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SelectorKind {
    /// Matching tests are included (`-t`).
    Include,

    /// Matching tests are excluded (`-x`).
    Exclude,
}

#[derive(Clone, Debug)]
struct Selector {
    kind: SelectorKind,
    regex: Regex,
}

/// An ordered list of include and exclude selectors.
#[derive(Clone, Debug, Default)]
pub struct TestFilter {
    selectors: Vec<Selector>,
}

impl TestFilter {
    /// A filter that matches every test.
    pub fn any() -> Self {
        Self::default()
    }

    /// Creates a filter from include and exclude patterns.
    ///
    /// Excludes are ordered after includes, so an exclude always wins over an include matching
    /// the same test.
    pub fn new(
        includes: impl IntoIterator<Item = impl AsRef<str>>,
        excludes: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, TestFilterBuildError> {
        let mut filter = Self::default();
        for pattern in includes {
            filter.push(SelectorKind::Include, pattern.as_ref())?;
        }
        for pattern in excludes {
            filter.push(SelectorKind::Exclude, pattern.as_ref())?;
        }
        Ok(filter)
    }

    /// Appends a selector to the end of the list.
    pub fn push(&mut self, kind: SelectorKind, pattern: &str) -> Result<(), TestFilterBuildError> {
        let regex = Regex::new(pattern).map_err(|error| TestFilterBuildError::new(pattern, error))?;
        self.selectors.push(Selector { kind, regex });
        Ok(())
    }

    /// Returns true if the test with this piglit name should run.
    pub fn matches(&self, piglit_name: &str) -> bool {
        match self
            .selectors
            .iter()
            .rev()
            .find(|selector| selector.regex.is_match(piglit_name))
        {
            Some(selector) => selector.kind == SelectorKind::Include,
            None => !self
                .selectors
                .iter()
                .any(|selector| selector.kind == SelectorKind::Include),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&[], &[], "igt@successtest@first-subtest", true; "empty filter")]
    #[test_case(&["successtest"], &[], "igt@no-subtests", false; "unmatched with include")]
    #[test_case(&[], &["successtest"], "igt@no-subtests", true; "unmatched without include")]
    #[test_case(&["successtest"], &["first"], "igt@successtest@first-subtest", false; "exclude wins")]
    #[test_case(&["successtest"], &["first"], "igt@successtest@second-subtest", true; "include only")]
    #[test_case(&["igt@successtest@first"], &[], "igt@successtest@first-subtest", true; "piglit prefix")]
    fn filter_matches(includes: &[&str], excludes: &[&str], name: &str, expected: bool) {
        let filter = TestFilter::new(includes, excludes).expect("valid patterns");
        assert_eq!(filter.matches(name), expected);
    }

    #[test]
    fn last_matching_selector_wins() {
        let mut filter = TestFilter::any();
        filter.push(SelectorKind::Exclude, "kms").expect("valid");
        filter.push(SelectorKind::Include, "kms_flip").expect("valid");

        assert!(filter.matches("igt@kms_flip@basic"));
        assert!(!filter.matches("igt@kms_cursor@basic"));
        assert!(!filter.matches("igt@gem_exec@basic"));
    }

    #[test]
    fn invalid_pattern() {
        TestFilter::new(["("], [] as [&str; 0]).unwrap_err();
    }
}
