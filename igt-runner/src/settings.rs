// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Settings for a run, and their persisted `key : value` form.
//!
//! Settings are written to `metadata.txt` in the results directory when a run is initialized and
//! read back when it is resumed or when results are generated. Include and exclude selectors are
//! not part of the settings: they are applied once while building the job list, which is
//! persisted separately.

use crate::errors::{LogLevelParseError, SettingsError, SettingsParseError};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{fmt, fs, str::FromStr};
use swrite::{SWrite, swriteln};
use tracing::warn;

/// The file settings are persisted to, relative to the results directory.
pub const SETTINGS_FILE_NAME: &str = "metadata.txt";

/// The catalogue every test root is expected to carry.
pub const CATALOGUE_FILE_NAME: &str = "test-list.txt";

/// The default maximum syslog severity that counts as a dmesg warning (`KERN_WARNING`).
pub const DEFAULT_DMESG_WARN_LEVEL: u8 = 4;

/// How chatty the harness is on the console.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum LogLevel {
    /// Only warnings and errors.
    Quiet,

    /// Progress for every job.
    #[default]
    Normal,

    /// Everything, including the subtest markers seen on stdout.
    Verbose,
}

impl LogLevel {
    /// Returns the string representations of all log levels.
    pub fn variants() -> [&'static str; 3] {
        ["quiet", "normal", "verbose"]
    }

    /// Returns the string representation of this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Normal => "normal",
            Self::Verbose => "verbose",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LogLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quiet" => Ok(Self::Quiet),
            "normal" => Ok(Self::Normal),
            "verbose" => Ok(Self::Verbose),
            other => Err(LogLevelParseError::new(other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    /// The name of the run, used in the report. Defaults to the results directory's name.
    pub name: String,

    /// The directory containing the test binaries.
    pub test_root: Utf8PathBuf,

    /// The directory results are written to.
    pub results_path: Utf8PathBuf,

    /// An explicit list of tests to run, instead of the catalogue in the test root.
    pub test_list: Option<Utf8PathBuf>,

    /// A TOML file overriding the dmesg warning patterns.
    pub dmesg_filters: Option<Utf8PathBuf>,

    /// Build and persist the job list, but do not execute anything.
    pub dry_run: bool,

    /// `fdatasync` every log write.
    pub sync: bool,

    /// Console verbosity.
    pub log_level: LogLevel,

    /// Replace existing results instead of refusing to start.
    pub overwrite: bool,

    /// Run all selected subtests of a binary in a single invocation.
    pub multiple_mode: bool,

    /// Seconds without any output before a test is killed. 0 disables the timeout.
    pub inactivity_timeout: u32,

    /// Seconds after which no new jobs are started. 0 disables the limit.
    pub overall_timeout: u32,

    /// Arm hardware watchdogs while tests run.
    pub use_watchdog: bool,

    /// Only count kernel messages from the graphics stack as warnings.
    pub piglit_style_dmesg: bool,

    /// Kernel messages at or below this severity are warning candidates.
    pub dmesg_warn_level: u8,
}

impl Settings {
    /// Creates settings with default options for the given directories.
    pub fn new(test_root: impl Into<Utf8PathBuf>, results_path: impl Into<Utf8PathBuf>) -> Self {
        let results_path = results_path.into();
        let name = results_path.file_name().unwrap_or_default().to_owned();
        Self {
            name,
            test_root: test_root.into(),
            results_path,
            test_list: None,
            dmesg_filters: None,
            dry_run: false,
            sync: false,
            log_level: LogLevel::default(),
            overwrite: false,
            multiple_mode: false,
            inactivity_timeout: 0,
            overall_timeout: 0,
            use_watchdog: false,
            piglit_style_dmesg: false,
            dmesg_warn_level: DEFAULT_DMESG_WARN_LEVEL,
        }
    }

    /// Checks that the test root and test source exist.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.test_root.is_dir() {
            return Err(SettingsError::TestRootNotFound {
                path: self.test_root.clone(),
            });
        }

        match &self.test_list {
            Some(test_list) => {
                fs::File::open(test_list).map_err(|error| SettingsError::TestListUnreadable {
                    path: test_list.clone(),
                    error,
                })?;
            }
            None => {
                let catalogue = self.test_root.join(CATALOGUE_FILE_NAME);
                if !catalogue.is_file() {
                    return Err(SettingsError::CatalogueNotFound { path: catalogue });
                }
            }
        }

        Ok(())
    }

    /// Serializes these settings into their `key : value` form.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        swriteln!(out, "name : {}", self.name);
        swriteln!(out, "test_root : {}", self.test_root);
        swriteln!(out, "results_path : {}", self.results_path);
        if let Some(test_list) = &self.test_list {
            swriteln!(out, "test_list : {test_list}");
        }
        if let Some(dmesg_filters) = &self.dmesg_filters {
            swriteln!(out, "dmesg_filters : {dmesg_filters}");
        }
        swriteln!(out, "dry_run : {}", u8::from(self.dry_run));
        swriteln!(out, "sync : {}", u8::from(self.sync));
        swriteln!(out, "log_level : {}", self.log_level);
        swriteln!(out, "overwrite : {}", u8::from(self.overwrite));
        swriteln!(out, "multiple_mode : {}", u8::from(self.multiple_mode));
        swriteln!(out, "inactivity_timeout : {}", self.inactivity_timeout);
        swriteln!(out, "overall_timeout : {}", self.overall_timeout);
        swriteln!(out, "use_watchdog : {}", u8::from(self.use_watchdog));
        swriteln!(out, "piglit_style_dmesg : {}", u8::from(self.piglit_style_dmesg));
        swriteln!(out, "dmesg_warn_level : {}", self.dmesg_warn_level);
        out
    }

    /// Parses settings from their `key : value` form.
    ///
    /// Unknown keys produce a warning and are otherwise ignored.
    pub fn parse(text: &str) -> Result<Self, SettingsParseError> {
        let mut fields = IndexMap::new();
        for (idx, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let (key, value) =
                line.split_once(" : ")
                    .ok_or_else(|| SettingsParseError::MalformedLine {
                        line_no: idx + 1,
                        line: line.to_owned(),
                    })?;
            fields.insert(key, value);
        }

        let mut fields = Fields(fields);
        let test_root = fields.required("test_root")?;
        let results_path = fields.required("results_path")?;
        let mut settings = Settings::new(test_root, results_path);

        if let Some(name) = fields.take("name") {
            settings.name = name.to_owned();
        }
        settings.test_list = fields.take("test_list").map(Utf8PathBuf::from);
        settings.dmesg_filters = fields.take("dmesg_filters").map(Utf8PathBuf::from);
        fields.parse_bool("dry_run", &mut settings.dry_run)?;
        fields.parse_bool("sync", &mut settings.sync)?;
        fields.parse_value("log_level", &mut settings.log_level)?;
        fields.parse_bool("overwrite", &mut settings.overwrite)?;
        fields.parse_bool("multiple_mode", &mut settings.multiple_mode)?;
        fields.parse_value("inactivity_timeout", &mut settings.inactivity_timeout)?;
        fields.parse_value("overall_timeout", &mut settings.overall_timeout)?;
        fields.parse_bool("use_watchdog", &mut settings.use_watchdog)?;
        fields.parse_bool("piglit_style_dmesg", &mut settings.piglit_style_dmesg)?;
        fields.parse_value("dmesg_warn_level", &mut settings.dmesg_warn_level)?;

        for key in fields.0.keys() {
            warn!("unknown field `{key}` in settings file, ignoring");
        }

        Ok(settings)
    }

    /// Writes `metadata.txt` into `dir`.
    ///
    /// Fails if the file already exists, unless `overwrite` is set.
    pub fn write_to_dir(&self, dir: &Utf8Path) -> Result<(), SettingsError> {
        let path = dir.join(SETTINGS_FILE_NAME);
        if !self.overwrite && path.exists() {
            return Err(SettingsError::AlreadyExists { path });
        }
        fs::write(&path, self.serialize()).map_err(|error| SettingsError::Write { path, error })
    }

    /// Reads `metadata.txt` from `dir`.
    pub fn read_from_dir(dir: &Utf8Path) -> Result<Self, SettingsError> {
        let path = dir.join(SETTINGS_FILE_NAME);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) => return Err(SettingsError::Read { path, error }),
        };
        Self::parse(&text).map_err(|error| SettingsError::Parse { path, error })
    }
}

struct Fields<'a>(IndexMap<&'a str, &'a str>);

impl<'a> Fields<'a> {
    fn take(&mut self, key: &str) -> Option<&'a str> {
        self.0.shift_remove(key)
    }

    fn required(&mut self, key: &'static str) -> Result<&'a str, SettingsParseError> {
        self.take(key)
            .ok_or(SettingsParseError::MissingKey { key })
    }

    fn parse_value<T: FromStr>(&mut self, key: &str, out: &mut T) -> Result<(), SettingsParseError> {
        if let Some(value) = self.take(key) {
            *out = value.parse().map_err(|_| invalid(key, value))?;
        }
        Ok(())
    }

    fn parse_bool(&mut self, key: &str, out: &mut bool) -> Result<(), SettingsParseError> {
        if let Some(value) = self.take(key) {
            *out = match value {
                "0" => false,
                "1" => true,
                _ => return Err(invalid(key, value)),
            };
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> SettingsParseError {
    SettingsParseError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_strategy::proptest;

    #[test]
    fn name_defaults_to_results_dir() {
        let settings = Settings::new("/opt/igt/tests", "/var/results/run-17");
        assert_eq!(settings.name, "run-17");
        assert_eq!(settings.dmesg_warn_level, DEFAULT_DMESG_WARN_LEVEL);
    }

    #[test]
    fn serialize_format() {
        let mut settings = Settings::new("/opt/igt/tests", "/var/results/run");
        settings.multiple_mode = true;
        settings.inactivity_timeout = 300;
        settings.test_list = Some("/tmp/list".into());

        assert_eq!(
            settings.serialize(),
            indoc! {"
                name : run
                test_root : /opt/igt/tests
                results_path : /var/results/run
                test_list : /tmp/list
                dry_run : 0
                sync : 0
                log_level : normal
                overwrite : 0
                multiple_mode : 1
                inactivity_timeout : 300
                overall_timeout : 0
                use_watchdog : 0
                piglit_style_dmesg : 0
                dmesg_warn_level : 4
            "}
        );
    }

    #[test]
    fn parse_tolerates_unknown_and_missing_keys() {
        let settings = Settings::parse(indoc! {"
            test_root : /opt/igt/tests
            results_path : /var/results/run
            abort_on_error : 1
            use_watchdog : 1
        "})
        .expect("settings parsed");

        let mut expected = Settings::new("/opt/igt/tests", "/var/results/run");
        expected.use_watchdog = true;
        assert_eq!(settings, expected);
    }

    #[test]
    fn parse_errors() {
        let err = Settings::parse("results_path : /r\n").unwrap_err();
        assert!(
            matches!(err, SettingsParseError::MissingKey { key: "test_root" }),
            "{err:?}"
        );

        let err = Settings::parse("test_root : /t\nresults_path : /r\nsync : yes\n").unwrap_err();
        assert!(
            matches!(err, SettingsParseError::InvalidValue { ref key, .. } if key == "sync"),
            "{err:?}"
        );

        let err = Settings::parse("test_root=/t\n").unwrap_err();
        assert!(
            matches!(err, SettingsParseError::MalformedLine { line_no: 1, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn write_refuses_to_overwrite() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let mut settings = Settings::new("/opt/igt/tests", dir.path());
        settings.write_to_dir(dir.path()).expect("first write succeeds");

        let err = settings.write_to_dir(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::AlreadyExists { .. }), "{err:?}");

        settings.overwrite = true;
        settings.write_to_dir(dir.path()).expect("overwrite succeeds");
        assert_eq!(
            Settings::read_from_dir(dir.path()).expect("read back"),
            settings
        );
    }

    #[test]
    fn validate_requires_catalogue() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let settings = Settings::new(dir.path(), dir.path().join("results"));
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::CatalogueNotFound { .. })
        ));

        fs::write(dir.path().join(CATALOGUE_FILE_NAME), "TESTLIST\nEND TESTLIST\n")
            .expect("wrote catalogue");
        settings.validate().expect("catalogue present");
    }

    #[proptest]
    fn settings_round_trip(
        #[strategy("[a-z0-9_.-]{1,16}")] name: String,
        #[strategy("/[a-z0-9/_-]{1,24}")] test_root: String,
        #[strategy("/[a-z0-9/_-]{1,24}")] results_path: String,
        #[strategy(proptest::option::of("/[a-z0-9/_.-]{1,24}"))] test_list: Option<String>,
        sync: bool,
        multiple_mode: bool,
        use_watchdog: bool,
        piglit_style_dmesg: bool,
        inactivity_timeout: u32,
        overall_timeout: u32,
        #[strategy(0u8..8)] dmesg_warn_level: u8,
        #[strategy(0usize..3)] log_level: usize,
    ) {
        let mut settings = Settings::new(test_root, results_path);
        settings.name = name;
        settings.test_list = test_list.map(Utf8PathBuf::from);
        settings.sync = sync;
        settings.multiple_mode = multiple_mode;
        settings.use_watchdog = use_watchdog;
        settings.piglit_style_dmesg = piglit_style_dmesg;
        settings.inactivity_timeout = inactivity_timeout;
        settings.overall_timeout = overall_timeout;
        settings.dmesg_warn_level = dmesg_warn_level;
        settings.log_level = [LogLevel::Quiet, LogLevel::Normal, LogLevel::Verbose][log_level];

        let parsed = Settings::parse(&settings.serialize()).expect("round trip parses");
        proptest::prop_assert_eq!(parsed, settings);
    }
}
