// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Returns the namespaced identifier used as a key in the report: `igt@binary[@subtest]`.
///
/// Piglit names are always lowercase.
pub fn piglit_name(binary: &str, subtest: Option<&str>) -> String {
    let mut name = format!("igt@{binary}");
    if let Some(subtest) = subtest {
        name.push('@');
        name.push_str(subtest);
    }
    name.make_ascii_lowercase();
    name
}

/// Converts raw child output into a string: everything up to the first NUL byte, with each byte
/// taken as a Latin-1 code point.
pub(crate) fn decode_output(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end].iter().map(|&b| char::from(b)).collect()
}

/// The number of newline characters in `text`.
pub(crate) fn count_lines(text: &str) -> usize {
    text.bytes().filter(|&b| b == b'\n').count()
}
