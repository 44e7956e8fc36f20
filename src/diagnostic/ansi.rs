//! Terminal rendering:
//!
//! ```text
//! error[SVML-C002]: assignment to constant 'x'
//!   --> 1:14
//!   |
//! 1 | const x = 1; x = 2;
//!   |              ^ here
//!   |
//!   = help: declare 'x' with let to reassign it
//!   = explain: svmlc --explain SVML-C002
//! ```

use std::fmt::Write;

use super::{Diagnostic, Snippet};

pub struct AnsiRenderer {
    pub use_color: bool,
}

const RED: &str = "1;31";
const BLUE: &str = "1;34";
const BOLD: &str = "1";

impl AnsiRenderer {
    fn paint(&self, style: &str, text: &str) -> String {
        if self.use_color { format!("\x1b[{style}m{text}\x1b[0m") } else { text.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();
        let heading = match d.code {
            Some(code) => format!("error[{code}]"),
            None => "error".to_string(),
        };
        let _ = writeln!(out, "{}: {}", self.paint(RED, &heading), self.paint(BOLD, &d.message));

        if let Some(snippet) = d.snippet() {
            self.excerpt(&mut out, &snippet);
        }
        if let Some(trap) = &d.trap {
            let _ = writeln!(out, "  {} value: {}", self.paint(BLUE, "="), trap.value);
        }
        for note in &d.notes {
            let _ = writeln!(out, "  {} note: {}", self.paint(BLUE, "="), note);
        }
        if let Some(suggestion) = &d.suggestion {
            let _ = writeln!(out, "  {} help: {}", self.paint(BLUE, "="), suggestion);
        }
        if let (Some(code), Some(_)) = (d.code, d.summary()) {
            let _ = writeln!(out, "  {} explain: svmlc --explain {code}", self.paint(BLUE, "="));
        }
        out
    }

    fn excerpt(&self, out: &mut String, snippet: &Snippet<'_>) {
        let line = snippet.location.line.to_string();
        let pad = " ".repeat(line.len());
        let bar = self.paint(BLUE, "|");
        let _ = writeln!(out, "{pad} {} {}", self.paint(BLUE, "-->"), snippet.location);
        let _ = writeln!(out, "{pad} {bar}");
        let _ = writeln!(out, "{} {bar} {}", self.paint(BLUE, &line), snippet.line_text);
        let indent = " ".repeat(snippet.location.col - 1);
        let carets = "^".repeat(snippet.width);
        let marker = if snippet.label.is_empty() { carets } else { format!("{carets} {}", snippet.label) };
        let _ = writeln!(out, "{pad} {bar} {indent}{}", self.paint(RED, &marker));
        let _ = writeln!(out, "{pad} {bar}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::diagnostic::{Stage, TrapReport};
    use crate::vm::TrapKind;

    fn plain(d: &Diagnostic) -> String {
        AnsiRenderer { use_color: false }.render(d)
    }

    #[test]
    fn compile_error_layout() {
        let d = Diagnostic::new(Stage::Compile, "assignment to constant 'x'")
            .with_code("SVML-C002")
            .with_span(Span { start: 13, end: 14 }, "here")
            .with_suggestion("declare 'x' with let to reassign it")
            .with_source("const x = 1; x = 2;");
        let expected = "\
error[SVML-C002]: assignment to constant 'x'
  --> 1:14
  |
1 | const x = 1; x = 2;
  |              ^ here
  |
  = help: declare 'x' with let to reassign it
  = explain: svmlc --explain SVML-C002
";
        assert_eq!(plain(&d), expected);
    }

    #[test]
    fn gutter_widens_with_line_number() {
        let source = "1;\n".repeat(11) + "x;";
        let d = Diagnostic::new(Stage::Compile, "unresolved name 'x'")
            .with_span(Span { start: 33, end: 34 }, "")
            .with_source(source);
        let out = plain(&d);
        assert!(out.contains("   --> 12:1\n"), "got:\n{out}");
        assert!(out.contains("12 | x;\n"), "got:\n{out}");
        assert!(out.contains("   | ^\n"), "got:\n{out}");
    }

    #[test]
    fn trap_shows_value_without_excerpt() {
        let mut d = Diagnostic::new(Stage::Run, "runtime error: type mismatch").with_code("SVML-R002");
        d.trap = Some(TrapReport { kind: TrapKind::TypeMismatch, value: "[1, \"a\"]".to_string() });
        let out = plain(&d);
        assert!(out.starts_with("error[SVML-R002]: runtime error: type mismatch\n"));
        assert!(out.contains("  = value: [1, \"a\"]\n"));
        assert!(!out.contains("-->"));
    }

    #[test]
    fn uncoded_error_has_no_explain_line() {
        let out = plain(&Diagnostic::new(Stage::Cli, "no input file"));
        assert_eq!(out, "error: no input file\n");
    }

    #[test]
    fn unregistered_code_has_no_explain_line() {
        let out = plain(&Diagnostic::new(Stage::Run, "odd").with_code("SVML-X000"));
        assert!(!out.contains("explain"));
    }

    #[test]
    fn color_only_when_asked() {
        let d = Diagnostic::new(Stage::Lex, "unexpected input '#'")
            .with_code("SVML-L001")
            .with_span(Span { start: 2, end: 3 }, "here")
            .with_source("1 # 2;");
        assert!(AnsiRenderer { use_color: true }.render(&d).contains("\x1b[1;31m"));
        assert!(!plain(&d).contains('\x1b'));
    }
}
