//! Manual line-break scanning over raw output bytes.
//!
//! Tool output arrives in arbitrary chunks, so the splitter keeps the unfinished
//! line and whether the previous chunk ended on a `\r` between calls.

/// Incremental splitter treating `\r\n`, `\r` and `\n` each as one line break
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
    skip_lf: bool,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `data` up to and including the next line break.
    ///
    /// Returns how many bytes of `data` were consumed and the completed line,
    /// if a break was found. Bytes without a break are kept as the pending
    /// partial line.
    pub fn next_line(&mut self, data: &[u8]) -> (usize, Option<String>) {
        if data.is_empty() {
            return (0, None);
        }

        let mut start = 0;
        if self.skip_lf {
            self.skip_lf = false;
            if data[0] == b'\n' {
                start = 1;
            }
        }

        let rest = &data[start..];
        let Some(pos) = rest.iter().position(|&b| b == b'\r' || b == b'\n') else {
            self.partial.extend_from_slice(rest);
            return (data.len(), None);
        };

        self.partial.extend_from_slice(&rest[..pos]);
        let brk = start + pos;
        let consumed = if data[brk] == b'\r' {
            match data.get(brk + 1) {
                Some(b'\n') => brk + 2,
                Some(_) => brk + 1,
                None => {
                    // the matching '\n' may open the next chunk
                    self.skip_lf = true;
                    brk + 1
                }
            }
        } else {
            brk + 1
        };

        (consumed, Some(self.take_partial()))
    }

    /// Split a whole chunk, appending every completed line to `lines`
    pub fn push(&mut self, mut data: &[u8], lines: &mut Vec<String>) {
        while !data.is_empty() {
            let (consumed, line) = self.next_line(data);
            data = &data[consumed..];
            if let Some(line) = line {
                lines.push(line);
            }
        }
    }

    /// End of stream: the unterminated trailing line, if any
    pub fn finish(&mut self) -> Option<String> {
        self.skip_lf = false;
        if self.partial.is_empty() {
            None
        } else {
            Some(self.take_partial())
        }
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Hand pending partial-line bytes to a raw reader, oldest first
    pub(crate) fn drain_partial(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.partial.len());
        buf[..n].copy_from_slice(&self.partial[..n]);
        self.partial.drain(..n);
        n
    }

    /// Drop the pending `\r\n` pairing, used when raw reads bypass the splitter
    pub(crate) fn reset_break_state(&mut self) {
        self.skip_lf = false;
    }

    fn take_partial(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }
}

/// Split a complete buffer in one go
pub fn split_lines(data: &[u8]) -> Vec<String> {
    let mut splitter = LineSplitter::new();
    let mut lines = Vec::new();
    splitter.push(data, &mut lines);
    lines.extend(splitter.finish());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_breaks() {
        assert_eq!(split_lines(b"A\r\nB\nC\rD"), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_empty_lines_are_kept() {
        assert_eq!(split_lines(b"a\n\nb\r\n\r\nc\n"), vec!["a", "", "b", "", "c"]);
        assert_eq!(split_lines(b"\r\r"), vec!["", ""]);
        assert!(split_lines(b"").is_empty());
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut splitter = LineSplitter::new();
        let mut lines = Vec::new();
        splitter.push(b"first\r", &mut lines);
        splitter.push(b"\nsecond\r", &mut lines);
        splitter.push(b"third", &mut lines);
        lines.extend(splitter.finish());
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_partial_line_across_chunks() {
        let mut splitter = LineSplitter::new();
        let mut lines = Vec::new();
        splitter.push(b"warn", &mut lines);
        assert!(lines.is_empty());
        assert!(splitter.has_partial());
        splitter.push(b"ing C4996\n", &mut lines);
        assert_eq!(lines, vec!["warning C4996"]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_next_line_reports_consumed_bytes() {
        let mut splitter = LineSplitter::new();
        let (consumed, line) = splitter.next_line(b"ab\r\ncd");
        assert_eq!(consumed, 4);
        assert_eq!(line.as_deref(), Some("ab"));

        let (consumed, line) = splitter.next_line(b"cd");
        assert_eq!(consumed, 2);
        assert_eq!(line, None);
        assert_eq!(splitter.finish().as_deref(), Some("cd"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        assert_eq!(split_lines(b"ok\xff\n"), vec!["ok\u{fffd}"]);
    }
}
