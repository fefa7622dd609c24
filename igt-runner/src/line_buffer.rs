// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A restartable cursor over newline-delimited lines in a byte stream.

use bstr::ByteSlice;
use bytes::{Bytes, BytesMut};

/// Accumulates bytes as they arrive and hands out complete lines.
///
/// Bytes after the last newline are retained until more data completes the line. Lines are
/// handed out with their trailing newline.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete line, if any.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let newline = self.buf.find_byte(b'\n')?;
        Some(self.buf.split_to(newline + 1).freeze())
    }

    /// Returns an iterator draining every complete line currently buffered.
    pub fn lines(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        std::iter::from_fn(move || self.next_line())
    }

    /// Bytes of the incomplete trailing line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_lines_are_retained() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"Starting sub");
        assert_eq!(buffer.next_line(), None);

        buffer.extend(b"test: a\nSubtest a: SUCCESS (0.1s)\nStar");
        let lines: Vec<_> = buffer.lines().collect();
        assert_eq!(
            lines,
            vec![
                Bytes::from_static(b"Starting subtest: a\n"),
                Bytes::from_static(b"Subtest a: SUCCESS (0.1s)\n"),
            ]
        );
        assert_eq!(buffer.pending(), b"Star");

        buffer.extend(b"ting subtest: b\n");
        assert_eq!(
            buffer.next_line(),
            Some(Bytes::from_static(b"Starting subtest: b\n"))
        );
        assert!(buffer.pending().is_empty());
    }
}
