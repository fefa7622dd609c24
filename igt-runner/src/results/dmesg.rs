// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Formatting kernel log records and attributing them to subtests.

use super::{Subtests, TestrunResult};
use crate::{
    errors::DmesgFilterError,
    helpers::piglit_name,
    protocol::{STARTING_DYNAMIC_SUBTEST_DMESG, STARTING_SUBTEST_DMESG},
    settings::Settings,
};
use camino::Utf8Path;
use itertools::Itertools;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use tracing::debug;

/// Kernel messages that are never treated as warnings.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "ACPI: button: The lid device is not compliant to SW_LID",
    "ACPI: .*: Unable to dock!",
    "IRQ [0-9]+: no longer affine to CPU[0-9]+",
    "IRQ fixup: irq [0-9]+ move in progress, old vector [0-9]+",
    // Tests set module options on purpose.
    "Setting dangerous option [a-z_]+ - tainting kernel",
    // Raw printk at the default level.
    r"Suspending console\(s\) \(use no_console_suspend to debug\)",
    "atkbd serio[0-9]+: Failed to (deactivate|enable) keyboard on isa[0-9]+/serio[0-9]+",
    "cache: parent cpu[0-9]+ should not be sleeping",
    "hpet[0-9]+: lost [0-9]+ rtc interrupts",
    // Selftests finish with ENODEV from the module load.
    "i915: probe of [0-9a-fA-F:.]+ failed with error -25",
    "mock: DMA: Out of SW-IOMMU space for [0-9]+ bytes",
    "usb usb[0-9]+: root hub lost power or was reset",
];

/// With piglit-style filtering, only kernel messages matching these count as warnings.
pub const DEFAULT_PIGLIT_STYLE_PATTERNS: &[&str] =
    &[r"\[drm:", "drm_", "intel_", "i915_", r"\[drm\]"];

/// The on-disk format of a dmesg filter file.
///
/// ```toml
/// ignore = ["usb usb[0-9]+: root hub lost power"]
/// piglit-style = ["\\[drm:", "i915_"]
/// ```
///
/// Each list replaces the corresponding built-in list when present.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DmesgFilterConfig {
    /// Messages that never count as warnings.
    #[serde(default)]
    pub ignore: Option<Vec<String>>,

    /// Messages that count as warnings with piglit-style filtering.
    #[serde(default)]
    pub piglit_style: Option<Vec<String>>,
}

impl DmesgFilterConfig {
    /// Reads a filter file.
    pub fn read(path: &Utf8Path) -> Result<Self, DmesgFilterError> {
        let contents = fs::read_to_string(path).map_err(|error| DmesgFilterError::Read {
            path: path.to_owned(),
            error,
        })?;
        toml::from_str(&contents).map_err(|error| DmesgFilterError::Parse {
            path: path.to_owned(),
            error,
        })
    }
}

/// Decides which kernel log records are warnings.
#[derive(Clone, Debug)]
pub struct DmesgFilter {
    regex: Regex,
    piglit_style: bool,
    warn_level: u8,
}

impl DmesgFilter {
    /// Builds the filter for a run, reading the filter file named in the settings if any.
    pub fn from_settings(settings: &Settings) -> Result<Self, DmesgFilterError> {
        let config = match &settings.dmesg_filters {
            Some(path) => DmesgFilterConfig::read(path)?,
            None => DmesgFilterConfig::default(),
        };
        Self::new(&config, settings.piglit_style_dmesg, settings.dmesg_warn_level)
    }

    /// Builds a filter from a configuration.
    pub fn new(
        config: &DmesgFilterConfig,
        piglit_style: bool,
        warn_level: u8,
    ) -> Result<Self, DmesgFilterError> {
        let patterns: Vec<&str> = if piglit_style {
            config.piglit_style.as_ref().map_or_else(
                || DEFAULT_PIGLIT_STYLE_PATTERNS.to_vec(),
                |patterns| patterns.iter().map(String::as_str).collect(),
            )
        } else {
            config.ignore.as_ref().map_or_else(
                || DEFAULT_IGNORE_PATTERNS.to_vec(),
                |patterns| patterns.iter().map(String::as_str).collect(),
            )
        };
        // An empty list must match nothing, not everything.
        let regex = if patterns.is_empty() {
            r"[^\s\S]".to_owned()
        } else {
            patterns.iter().map(|p| format!("(?:{p})")).join("|")
        };

        Ok(Self {
            regex: Regex::new(&regex).map_err(DmesgFilterError::Regex)?,
            piglit_style,
            warn_level,
        })
    }

    /// Returns true if the record counts as a warning.
    pub fn is_warning(&self, record: &KmsgRecord<'_>) -> bool {
        if record.level() > self.warn_level || record.continuation == 'c' {
            return false;
        }
        self.regex.is_match(record.message) == self.piglit_style
    }
}

/// A parsed `dmesg.txt` line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KmsgRecord<'a> {
    /// Facility and level; the low three bits are the level.
    pub flags: u32,

    /// Microseconds since boot.
    pub ts_usec: u64,

    /// `c` for a continuation record.
    pub continuation: char,

    /// The message, still escaped.
    pub message: &'a str,
}

impl<'a> KmsgRecord<'a> {
    /// Parses `<flags>,<seq>,<usec>,<cont>[,...];<message>`. Returns `None` for anything else,
    /// including the indented key/value lines that follow some records.
    pub fn parse(line: &'a str) -> Option<Self> {
        let (header, message) = line.split_once(';')?;
        let mut fields = header.split(',');
        let flags = fields.next()?.parse().ok()?;
        let _seq: u64 = fields.next()?.parse().ok()?;
        let ts_usec = fields.next()?.parse().ok()?;
        let continuation = fields.next()?.chars().next()?;
        Some(Self {
            flags,
            ts_usec,
            continuation,
            message: message.trim_end_matches('\n'),
        })
    }

    /// The syslog level.
    pub fn level(&self) -> u8 {
        (self.flags & 0x07) as u8
    }

    /// The line as it appears in the report: `<level> [sec.usec] message`, with escapes decoded.
    pub fn format(&self) -> String {
        format!(
            "<{}> [{}.{:06}] {}\n",
            self.level(),
            self.ts_usec / 1_000_000,
            self.ts_usec % 1_000_000,
            unescape(self.message)
        )
    }
}

/// Decodes `\xNN` and `\NNN` escapes produced by the kernel, as long as the decoded character is
/// printable or whitespace. Other escapes are kept verbatim.
fn unescape(message: &str) -> String {
    let bytes = message.as_bytes();
    let mut out = String::with_capacity(message.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 4 < bytes.len()
            && let Some(c) = decode_escape(&bytes[i + 1..i + 4])
        {
            out.push(c);
            i += 4;
            continue;
        }
        // Copy the whole character.
        let len = message[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&message[i..i + len]);
        i += len;
    }
    out
}

fn decode_escape(escape: &[u8]) -> Option<char> {
    let value = match escape {
        [b'x', hi, lo] => {
            u8::from_str_radix(std::str::from_utf8(&[*hi, *lo]).ok()?, 16).ok()?
        }
        [_, _, _] if escape.iter().all(|d| (b'0'..=b'7').contains(d)) => {
            u8::from_str_radix(std::str::from_utf8(escape).ok()?, 8).ok()?
        }
        _ => return None,
    };
    (value.is_ascii_graphic() || value.is_ascii_whitespace())
        .then_some(char::from(value))
}

/// Lines and warnings collected for one record.
#[derive(Debug, Default)]
struct Bucket {
    name: Option<String>,
    dmesg: String,
    warnings: String,
}

impl Bucket {
    fn push(&mut self, formatted: &str, warning: bool) {
        self.dmesg.push_str(formatted);
        if warning {
            self.warnings.push_str(formatted);
        }
    }

    /// Files the collected lines under the bucket's record and starts over.
    fn flush(&mut self, report: &mut TestrunResult, known: &[String]) {
        let bucket = std::mem::take(self);
        let Some(name) = bucket.name else {
            return;
        };
        if !known.contains(&name) {
            debug!("dropping kernel log lines for unknown test {name}");
            return;
        }
        let record = report.test_mut(&name);
        record.dmesg = bucket.dmesg;
        record.dmesg_warnings = (!bucket.warnings.is_empty()).then_some(bucket.warnings);
    }
}

/// Splits a job's kernel log at the `starting subtest` lines the test library writes to it.
pub(super) fn fill_from_dmesg(
    report: &mut TestrunResult,
    binary: &str,
    dmesg: &str,
    filter: &DmesgFilter,
    subtests: &Subtests,
) {
    let known = subtests.piglit_names(binary);

    let mut current = Bucket::default();
    let mut dynamic = Bucket::default();

    for line in dmesg.lines() {
        let Some(record) = KmsgRecord::parse(line) else {
            if !line.starts_with(' ') && !line.is_empty() {
                debug!("cannot parse kmsg record: {line}");
            }
            continue;
        };
        let formatted = record.format();

        if let Some((_, subtest)) = record.message.split_once(STARTING_SUBTEST_DMESG) {
            if current.name.is_some() {
                current.flush(report, &known);
                dynamic.flush(report, &known);
            }
            current.name = Some(piglit_name(binary, Some(subtest.trim())));
        }
        if let Some(parent) = &current.name
            && let Some((_, name)) = record.message.split_once(STARTING_DYNAMIC_SUBTEST_DMESG)
        {
            if dynamic.name.is_some() {
                dynamic.flush(report, &known);
            }
            dynamic.name = Some(format!("{parent}@{}", name.trim().to_ascii_lowercase()));
        }

        let warning = filter.is_warning(&record);
        current.push(&formatted, warning);
        dynamic.push(&formatted, warning && current.name.is_some());
    }

    if current.name.is_some() {
        current.flush(report, &known);
        dynamic.flush(report, &known);
    } else if subtests.is_empty() {
        let record = report.test_mut(&piglit_name(binary, None));
        record.dmesg = current.dmesg;
        record.dmesg_warnings = (!current.warnings.is_empty()).then_some(current.warnings);
    } else {
        // No subtest markers at all: every subtest sees everything, without warnings.
        for subtest in subtests.iter() {
            report
                .test_mut(&piglit_name(binary, Some(&subtest.name)))
                .dmesg
                .clone_from(&current.dmesg);
        }
    }
}
