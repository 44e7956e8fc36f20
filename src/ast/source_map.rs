/// Maps byte offsets to line/column positions within source text.
pub struct SourceMap {
    line_starts: Vec<usize>,
}

/// A 1-based line/column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.bytes().enumerate().filter(|(_, b)| *b == b'\n').map(|(i, _)| i + 1))
            .collect();
        SourceMap { line_starts }
    }

    /// Returns (line, col), both 1-based.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let col = offset.saturating_sub(self.line_starts[line]);
        (line + 1, col + 1)
    }

    pub fn locate(&self, offset: usize) -> Location {
        let (line, col) = self.lookup(offset);
        Location { line, col }
    }

    /// Returns the full text of the given 1-based line number.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        if line == 0 || line > self.line_starts.len() {
            return "";
        }
        let start = self.line_starts[line - 1];
        let end = self.line_starts.get(line).copied().unwrap_or(source.len());
        source[start..end].trim_end_matches('\n').trim_end_matches('\r')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line() {
        let sm = SourceMap::new("const x = 1;");
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.lookup(6), (1, 7));
    }

    #[test]
    fn multi_line() {
        let src = "let a = 1;\nlet b = 2;\na + b;";
        let sm = SourceMap::new(src);
        assert_eq!(sm.lookup(10), (1, 11)); // the newline itself
        assert_eq!(sm.lookup(11), (2, 1));
        assert_eq!(sm.locate(26), Location { line: 3, col: 5 });
    }

    #[test]
    fn location_display() {
        assert_eq!(Location { line: 4, col: 12 }.to_string(), "4:12");
    }

    #[test]
    fn line_text_lines() {
        let src = "first;\r\nsecond;\nthird;";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 1), "first;");
        assert_eq!(sm.line_text(src, 2), "second;");
        assert_eq!(sm.line_text(src, 3), "third;");
        assert_eq!(sm.line_text(src, 0), "");
        assert_eq!(sm.line_text(src, 9), "");
    }

    #[test]
    fn empty_source() {
        let sm = SourceMap::new("");
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.line_text("", 1), "");
    }
}
