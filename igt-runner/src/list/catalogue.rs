// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::JobListError,
    protocol::LIST_SUBTESTS_ARG,
    settings::CATALOGUE_FILE_NAME,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fs, io,
    process::{Command, Stdio},
};
use tracing::debug;

/// A test binary and the subtests it reported.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CatalogueBinary {
    /// The binary name, relative to the test root.
    pub name: String,

    /// Subtests in the order the binary listed them. Empty for binaries without subtests.
    pub subtests: Vec<String>,
}

impl CatalogueBinary {
    /// Creates a new catalogue entry.
    pub fn new(
        name: impl Into<String>,
        subtests: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            subtests: subtests.into_iter().map(Into::into).collect(),
        }
    }
}

/// The set of tests available in a test root.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Catalogue {
    /// Binaries in catalogue order.
    pub binaries: Vec<CatalogueBinary>,
}

impl Catalogue {
    /// Reads `test-list.txt` from the test root and asks every binary it names for its subtests.
    pub fn discover(test_root: &Utf8Path) -> Result<Self, JobListError> {
        let path = test_root.join(CATALOGUE_FILE_NAME);
        let text = fs::read_to_string(&path).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                JobListError::CatalogueNotFound { path: path.clone() }
            } else {
                JobListError::Read {
                    path: path.clone(),
                    error,
                }
            }
        })?;

        let binaries = parse_binary_names(&text)
            .map(|name| {
                let subtests = list_subtests(&test_root.join(name))?;
                Ok(CatalogueBinary::new(name, subtests))
            })
            .collect::<Result<_, JobListError>>()?;
        Ok(Self { binaries })
    }
}

/// Returns the binary names in a catalogue file.
///
/// The file is a whitespace-separated list of names, optionally wrapped in `TESTLIST` and
/// `END TESTLIST` markers.
fn parse_binary_names(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && *line != "TESTLIST" && *line != "END TESTLIST")
        .flat_map(str::split_whitespace)
}

fn list_subtests(binary: &Utf8Path) -> Result<Vec<String>, JobListError> {
    let output = Command::new(binary)
        .arg(LIST_SUBTESTS_ARG)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|error| JobListError::ListSubtests {
            binary: binary.to_owned(),
            error,
        })?;

    // Binaries without subtests exit with a non-zero code and print nothing.
    let subtests: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();
    debug!(
        "{binary}: {} subtests (exit status {})",
        subtests.len(),
        output.status
    );
    Ok(subtests)
}

/// A single line of an explicit test list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestListEntry {
    /// The binary name.
    pub binary: String,

    /// The subtest, if the line named one.
    pub subtest: Option<String>,
}

/// An explicit list of tests, one piglit name (`igt@binary[@subtest]`) per line.
///
/// Blank lines and lines starting with `#` are ignored.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestListFile {
    /// The tests, in file order.
    pub tests: Vec<TestListEntry>,
}

impl TestListFile {
    /// Reads and parses a test list.
    pub fn read(path: &Utf8Path) -> Result<Self, JobListError> {
        let text = fs::read_to_string(path).map_err(|error| JobListError::Read {
            path: path.to_owned(),
            error,
        })?;
        Self::parse(path.to_owned(), &text)
    }

    /// Parses a test list. `path` is only used for error messages.
    pub fn parse(path: Utf8PathBuf, text: &str) -> Result<Self, JobListError> {
        let mut tests = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let invalid = || JobListError::InvalidTestListLine {
                path: path.clone(),
                line_no: idx + 1,
                line: line.to_owned(),
            };
            let rest = line.strip_prefix("igt@").ok_or_else(invalid)?;
            let (binary, subtest) = match rest.split_once('@') {
                Some((binary, subtest)) => (binary, Some(subtest.to_owned())),
                None => (rest, None),
            };
            if binary.is_empty() || subtest.as_deref() == Some("") {
                return Err(invalid());
            }
            tests.push(TestListEntry {
                binary: binary.to_owned(),
                subtest,
            });
        }
        Ok(Self { tests })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn catalogue_names() {
        let names: Vec<_> = parse_binary_names(indoc! {"
            TESTLIST
            core_auth core_getclient
            kms_flip
            END TESTLIST
        "})
        .collect();
        assert_eq!(names, ["core_auth", "core_getclient", "kms_flip"]);
    }

    #[test]
    fn missing_catalogue() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let err = Catalogue::discover(dir.path()).unwrap_err();
        assert!(
            matches!(err, JobListError::CatalogueNotFound { .. }),
            "{err:?}"
        );
    }

    #[test]
    fn test_list_parse() {
        let file = TestListFile::parse(
            "list".into(),
            "igt@kms_flip@basic@A-HDMI\n# skipped\nigt@core_auth\n",
        )
        .expect("parsed");
        assert_eq!(
            file.tests,
            vec![
                TestListEntry {
                    binary: "kms_flip".to_owned(),
                    subtest: Some("basic@A-HDMI".to_owned()),
                },
                TestListEntry {
                    binary: "core_auth".to_owned(),
                    subtest: None,
                },
            ]
        );

        let err = TestListFile::parse("list".into(), "kms_flip\n").unwrap_err();
        assert!(
            matches!(err, JobListError::InvalidTestListLine { line_no: 1, .. }),
            "{err:?}"
        );
    }
}
