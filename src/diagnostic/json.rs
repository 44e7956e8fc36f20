//! One JSON object per diagnostic, for editors and test harnesses. Every
//! object carries `stage`, `code` and `message`; `span`, `trap` and
//! `suggestion` appear only when present.

use serde::Serialize;

use super::{Diagnostic, Stage, TrapReport};

#[derive(Serialize)]
struct Report<'a> {
    severity: &'static str,
    stage: Stage,
    code: Option<&'static str>,
    summary: Option<&'static str>,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    span: Option<SpanReport<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trap: Option<&'a TrapReport>,
    notes: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

/// Byte offsets always; line and column only when the source is known.
#[derive(Serialize)]
struct SpanReport<'a> {
    start: usize,
    end: usize,
    label: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    col: Option<usize>,
}

impl<'a> From<&'a Diagnostic> for Report<'a> {
    fn from(d: &'a Diagnostic) -> Self {
        let location = d.snippet().map(|s| s.location);
        let span = d.label.as_ref().map(|label| SpanReport {
            start: label.span.start,
            end: label.span.end,
            label: &label.message,
            line: location.map(|l| l.line),
            col: location.map(|l| l.col),
        });
        Report {
            severity: "error",
            stage: d.stage,
            code: d.code,
            summary: d.summary(),
            message: &d.message,
            span,
            trap: d.trap.as_ref(),
            notes: &d.notes,
            suggestion: d.suggestion.as_deref(),
        }
    }
}

pub fn render(d: &Diagnostic) -> String {
    serde_json::to_string(&Report::from(d))
        .unwrap_or_else(|e| format!(r#"{{"severity":"error","stage":"cli","message":"unserializable diagnostic: {e}"}}"#))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::vm::TrapKind;

    fn parse(d: &Diagnostic) -> serde_json::Value {
        serde_json::from_str(&render(d)).expect("valid JSON")
    }

    #[test]
    fn bare_error_keeps_null_code() {
        let v = parse(&Diagnostic::new(Stage::Cli, "no input file"));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["stage"], "cli");
        assert!(v["code"].is_null());
        assert!(v["summary"].is_null());
        assert_eq!(v["message"], "no input file");
        assert!(v.get("span").is_none());
        assert!(v.get("trap").is_none());
        assert!(v.get("suggestion").is_none());
        assert_eq!(v["notes"], serde_json::json!([]));
    }

    #[test]
    fn span_gains_line_and_col_with_source() {
        let d = Diagnostic::new(Stage::Compile, "unresolved name 'y'")
            .with_code("SVML-C001")
            .with_span(Span { start: 13, end: 14 }, "here");
        let v = parse(&d);
        assert_eq!(v["span"]["start"], 13);
        assert!(v["span"].get("line").is_none());

        let v = parse(&d.with_source("const x = 1;\ny;"));
        assert_eq!(v["stage"], "compile");
        assert_eq!(v["summary"], "unresolved name");
        assert_eq!(v["span"]["line"], 2);
        assert_eq!(v["span"]["col"], 1);
        assert_eq!(v["span"]["label"], "here");
    }

    #[test]
    fn trap_is_structured() {
        let mut d = Diagnostic::new(Stage::Run, "runtime error: error").with_code("SVML-R005");
        d.trap = Some(TrapReport { kind: TrapKind::UserError, value: "\"boom\"".to_string() });
        let v = parse(&d);
        assert_eq!(v["stage"], "run");
        assert_eq!(v["trap"]["kind"], "user_error");
        assert_eq!(v["trap"]["value"], "\"boom\"");
    }

    #[test]
    fn notes_and_suggestion_pass_through() {
        let d = Diagnostic::new(Stage::Compile, "not in chapter")
            .with_note("compiling for chapter 1")
            .with_suggestion("pass --chapter 3");
        let v = parse(&d);
        assert_eq!(v["notes"][0], "compiling for chapter 1");
        assert_eq!(v["suggestion"], "pass --chapter 3");
    }
}
