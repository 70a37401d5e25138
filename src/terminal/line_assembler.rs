//! Reassembles raw output chunks into logical lines.
//!
//! Interactive tools often redraw a status line with a bare carriage return
//! instead of printing a new line, so a `\r` that is not part of `\r\n`
//! emits the current buffer as a [`LineEnding::Redraw`] line. Bytes are kept
//! undecoded until a line is emitted, which keeps multi-byte UTF-8 sequences
//! that straddle two reads intact.

use serde::Serialize;

/// How a logical line was terminated.
///
/// A line is emitted as soon as its terminator is seen, so a `\r\n` split
/// across two reads (common on a pty, which maps `\n` to `\r\n`) yields a
/// `Redraw` line: the `\r` ends the first read and the `\n` opening the next
/// read is absorbed without emitting anything. The text is the same either
/// way; only the flag differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// Terminated by `\n`, or by `\r\n` within one read
    Newline,
    /// Overwritten in place by a bare `\r`, ended by a `\r` that closed a
    /// read, or split because it grew too long
    Redraw,
    /// Unterminated remainder flushed at end of stream
    Flush,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub text: String,
    pub ending: LineEnding,
}

impl LogicalLine {
    pub fn new(text: impl Into<String>, ending: LineEnding) -> Self {
        Self {
            text: text.into(),
            ending,
        }
    }

    pub fn is_redraw(&self) -> bool {
        self.ending == LineEnding::Redraw
    }
}

#[derive(Debug)]
pub struct LineAssembler {
    buf: Vec<u8>,
    max_line_bytes: usize,
    /// Previous chunk ended in `\r`; a leading `\n` completes that terminator.
    skip_lf: bool,
}

impl LineAssembler {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes: max_line_bytes.max(4),
            skip_lf: false,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<LogicalLine> {
        let mut lines = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            let byte = bytes[i];

            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    i += 1;
                    continue;
                }
            }

            match byte {
                b'\n' => lines.push(self.take(LineEnding::Newline)),
                b'\r' => match bytes.get(i + 1) {
                    Some(b'\n') => {
                        lines.push(self.take(LineEnding::Newline));
                        i += 1;
                    }
                    Some(_) => self.redraw(&mut lines),
                    None => {
                        // Can't see the next byte yet; treat as a redraw now
                        self.redraw(&mut lines);
                        self.skip_lf = true;
                    }
                },
                _ => {
                    self.buf.push(byte);
                    if self.buf.len() >= self.max_line_bytes {
                        self.split_overlong(&mut lines);
                    }
                }
            }
            i += 1;
        }

        lines
    }

    /// Emit whatever is still buffered as the final line.
    pub fn finish(&mut self) -> Option<LogicalLine> {
        self.skip_lf = false;
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take(LineEnding::Flush))
        }
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, ending: LineEnding) -> LogicalLine {
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        LogicalLine { text, ending }
    }

    fn redraw(&mut self, lines: &mut Vec<LogicalLine>) {
        if !self.buf.is_empty() {
            lines.push(self.take(LineEnding::Redraw));
        }
    }

    fn split_overlong(&mut self, lines: &mut Vec<LogicalLine>) {
        // Cut before an incomplete trailing sequence so it can be completed
        let cut = match std::str::from_utf8(&self.buf) {
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            _ => self.buf.len(),
        };
        if cut == 0 {
            return;
        }
        let rest = self.buf.split_off(cut);
        lines.push(self.take(LineEnding::Redraw));
        self.buf = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[LogicalLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_newline_terminated_lines() {
        let mut asm = LineAssembler::new(1024);
        let lines = asm.feed(b"one\ntwo\r\nthree\n");
        assert_eq!(texts(&lines), vec!["one", "two", "three"]);
        assert!(lines.iter().all(|l| l.ending == LineEnding::Newline));
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut asm = LineAssembler::new(1024);
        assert!(asm.feed(b"please lo").is_empty());
        let lines = asm.feed(b"gin\nnext");
        assert_eq!(texts(&lines), vec!["please login"]);
        assert_eq!(asm.finish(), Some(LogicalLine::new("next", LineEnding::Flush)));
        assert_eq!(asm.finish(), None);
    }

    #[test]
    fn test_carriage_return_redraws() {
        let mut asm = LineAssembler::new(1024);
        let lines = asm.feed(b"Progress: 10%\rProgress: 20%\r");
        assert_eq!(
            lines,
            vec![
                LogicalLine::new("Progress: 10%", LineEnding::Redraw),
                LogicalLine::new("Progress: 20%", LineEnding::Redraw),
            ]
        );
    }

    #[test]
    fn test_crlf_split_across_chunks_is_one_line() {
        let mut asm = LineAssembler::new(1024);
        let first = asm.feed(b"ready\r");
        let second = asm.feed(b"\nnext\n");
        // Emitted before the `\n` arrives, so it keeps the redraw flag
        assert_eq!(first, vec![LogicalLine::new("ready", LineEnding::Redraw)]);
        assert_eq!(second, vec![LogicalLine::new("next", LineEnding::Newline)]);
    }

    #[test]
    fn test_empty_lines_kept_empty_redraws_dropped() {
        let mut asm = LineAssembler::new(1024);
        let lines = asm.feed(b"a\n\n\r\rb\n");
        assert_eq!(texts(&lines), vec!["a", "", "b"]);
    }

    #[test]
    fn test_multibyte_sequence_split_across_chunks() {
        let mut asm = LineAssembler::new(1024);
        let text = "こんにちは\n".as_bytes();
        // split inside the second character
        assert!(asm.feed(&text[..4]).is_empty());
        let lines = asm.feed(&text[4..]);
        assert_eq!(texts(&lines), vec!["こんにちは"]);
    }

    #[test]
    fn test_no_line_contains_a_terminator() {
        let mut asm = LineAssembler::new(8);
        let mut lines = asm.feed(b"x\r\ny\rzzzzzzzzzzzzzzzzzz\n\r\n\n");
        lines.extend(asm.finish());
        assert!(lines
            .iter()
            .all(|l| !l.text.contains('\n') && !l.text.contains('\r')));
    }

    #[test]
    fn test_every_newline_line_emitted_exactly_once() {
        let input = b"alpha\nbeta\r\ngamma\n\ndelta\n";
        // Feed byte by byte and all at once; both must agree
        let mut whole = LineAssembler::new(1024);
        let expected: Vec<String> = whole.feed(input).into_iter().map(|l| l.text).collect();

        let mut split = LineAssembler::new(1024);
        let mut got = Vec::new();
        for byte in input.iter() {
            got.extend(split.feed(&[*byte]));
        }
        assert_eq!(expected, vec!["alpha", "beta", "gamma", "", "delta"]);
        assert_eq!(got.iter().map(|l| l.text.clone()).collect::<Vec<_>>(), expected);

        let endings: Vec<LineEnding> = got.iter().map(|l| l.ending).collect();
        assert_eq!(
            endings,
            vec![
                LineEnding::Newline,
                LineEnding::Redraw,
                LineEnding::Newline,
                LineEnding::Newline,
                LineEnding::Newline,
            ]
        );
    }

    #[test]
    fn test_overlong_line_is_split_on_char_boundary() {
        let mut asm = LineAssembler::new(8);
        let lines = asm.feed("abcdefgé\n".as_bytes());
        // 'é' is two bytes; the cut lands before it
        assert_eq!(
            lines,
            vec![
                LogicalLine::new("abcdefg", LineEnding::Redraw),
                LogicalLine::new("é", LineEnding::Newline),
            ]
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_dropped() {
        let mut asm = LineAssembler::new(1024);
        let lines = asm.feed(b"bad \xff byte\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].text.starts_with("bad "));
        assert!(lines[0].text.ends_with(" byte"));
    }
}
