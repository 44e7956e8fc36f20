//! Failures from every stage of the pipeline as one report type. A report
//! is rendered for terminals by [`ansi`] or for tools by [`json`]; both draw
//! the source excerpt from [`Diagnostic::snippet`].

pub mod ansi;
pub mod json;
pub mod registry;

use serde::Serialize;

use crate::assembler::DecodeError;
use crate::ast::source_map::Location;
use crate::ast::{SourceMap, Span};
use crate::compiler::CompileError;
use crate::host::HostError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::vm::{TrapKind, VmError};

/// Where in the pipeline the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Lex,
    Parse,
    Compile,
    Decode,
    Run,
    /// Command-line usage and file I/O.
    Cli,
}

/// The trap that stopped a run, with the offending value as printed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrapReport {
    pub kind: TrapKind,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub stage: Stage,
    pub code: Option<&'static str>,
    pub message: String,
    pub label: Option<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub trap: Option<TrapReport>,
    pub source: Option<String>,
}

/// The labelled line of source a diagnostic points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet<'a> {
    pub location: Location,
    pub line_text: &'a str,
    /// Caret count; a span running past the end of its line is cut there.
    pub width: usize,
    pub label: &'a str,
}

impl Diagnostic {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Diagnostic {
            stage,
            code: None,
            message: message.into(),
            label: None,
            notes: Vec::new(),
            suggestion: None,
            trap: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.label = Some(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// One-line description of the code from the registry.
    pub fn summary(&self) -> Option<&'static str> {
        self.code.and_then(registry::lookup).map(|entry| entry.short)
    }

    /// `None` unless the diagnostic has both a span and the source text.
    pub fn snippet(&self) -> Option<Snippet<'_>> {
        let label = self.label.as_ref()?;
        let source = self.source.as_deref()?;
        let map = SourceMap::new(source);
        let location = map.locate(label.span.start);
        let line_text = map.line_text(source, location.line);
        let room = line_text.len().saturating_sub(location.col - 1).max(1);
        let width = label.span.end.saturating_sub(label.span.start).clamp(1, room);
        Some(Snippet { location, line_text, width, label: &label.message })
    }
}

// ---- From impls for every error layer ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span {
            start: e.position,
            end: e.position + e.snippet.len().max(1),
        };
        let mut d = Diagnostic::new(Stage::Lex, format!("unexpected input '{}'", e.snippet))
            .with_code("SVML-L001")
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic::new(Stage::Parse, &e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let d = Diagnostic::new(Stage::Compile, e.to_string()).with_code(e.code()).with_span(e.span(), "here");
        match e {
            CompileError::UnresolvedName { name, .. } => {
                d.with_suggestion(format!("declare it first: const {name} = ...;"))
            }
            CompileError::AssignToConstant { name, .. } => {
                d.with_suggestion(format!("declare '{name}' with let to reassign it"))
            }
            CompileError::NotInChapter { chapter, .. } => {
                d.with_note(format!("compiling for chapter {chapter}; pass a higher --chapter to allow it"))
            }
            _ => d,
        }
    }
}

impl From<&DecodeError> for Diagnostic {
    fn from(e: &DecodeError) -> Self {
        Diagnostic::new(Stage::Decode, e.to_string())
            .with_code("SVML-D001")
            .with_note("the input is not a well-formed svml binary")
    }
}

impl From<&HostError> for Diagnostic {
    fn from(e: &HostError) -> Self {
        Diagnostic::new(Stage::Run, e.to_string()).with_code("SVML-H001")
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        match e {
            VmError::Trap { kind, value } => {
                let code = match kind {
                    TrapKind::DivisionByZero => "SVML-R001",
                    TrapKind::TypeMismatch => "SVML-R002",
                    TrapKind::NotCallable => "SVML-R003",
                    TrapKind::ArityMismatch => "SVML-R004",
                    TrapKind::UserError => "SVML-R005",
                };
                let mut d = Diagnostic::new(Stage::Run, format!("runtime error: {kind}")).with_code(code);
                d.trap = Some(TrapReport { kind: *kind, value: value.to_string() });
                d
            }
            VmError::Host(host) => Diagnostic::from(host),
            other => Diagnostic::new(Stage::Run, other.to_string())
                .with_code("SVML-R006")
                .with_note("this indicates malformed bytecode, not an error in the program"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Value;

    #[test]
    fn new_diagnostic_is_bare() {
        let d = Diagnostic::new(Stage::Cli, "no input file");
        assert_eq!(d.stage, Stage::Cli);
        assert!(d.code.is_none() && d.label.is_none() && d.trap.is_none());
        assert!(d.summary().is_none());
        assert!(d.snippet().is_none());
    }

    #[test]
    fn snippet_needs_span_and_source() {
        let spanned = Diagnostic::new(Stage::Parse, "bad").with_span(Span { start: 6, end: 7 }, "here");
        assert!(spanned.snippet().is_none());
        let d = spanned.with_source("let a\nlet = 2;");
        let snippet = d.snippet().unwrap();
        assert_eq!(snippet.location, Location { line: 2, col: 1 });
        assert_eq!(snippet.line_text, "let = 2;");
        assert_eq!(snippet.width, 1);
        assert_eq!(snippet.label, "here");
    }

    #[test]
    fn snippet_width_stops_at_line_end() {
        let d = Diagnostic::new(Stage::Parse, "bad")
            .with_span(Span { start: 8, end: 30 }, "")
            .with_source("f(1, 2, (3\n+ 4);");
        assert_eq!(d.snippet().unwrap().width, 2);
    }

    #[test]
    fn summary_comes_from_registry() {
        let d = Diagnostic::new(Stage::Lex, "x").with_code("SVML-L001");
        assert_eq!(d.summary(), Some("unexpected character"));
    }

    #[test]
    fn from_lex_error() {
        let e = LexError {
            position: 3,
            snippet: "@@".to_string(),
            suggestion: "Unexpected character(s): '@@'".to_string(),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("SVML-L001"));
        assert!(d.message.contains("@@"));
        assert_eq!(d.stage, Stage::Lex);
        assert_eq!(d.label.unwrap().span, Span { start: 3, end: 5 });
        assert!(d.suggestion.is_some());
    }

    #[test]
    fn from_parse_error_keeps_code() {
        let e = ParseError {
            code: "SVML-P005",
            position: 2,
            span: Span { start: 10, end: 15 },
            message: "expected identifier".to_string(),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("SVML-P005"));
        assert_eq!(d.label.unwrap().span, Span { start: 10, end: 15 });
    }

    #[test]
    fn from_compile_error_suggests_declaration() {
        let e = CompileError::UnresolvedName { name: "x".to_string(), span: Span { start: 0, end: 1 } };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("SVML-C001"));
        assert!(d.suggestion.as_deref().is_some_and(|s| s.contains("const x")));
    }

    #[test]
    fn from_trap_maps_kind_to_code() {
        let e = VmError::Trap { kind: TrapKind::DivisionByZero, value: Value::Number(0.0) };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("SVML-R001"));
        assert!(d.message.contains("division by zero"));
        assert_eq!(d.stage, Stage::Run);
        assert!(d.label.is_none());
        assert_eq!(d.trap, Some(TrapReport { kind: TrapKind::DivisionByZero, value: "0".to_string() }));
    }

    #[test]
    fn internal_vm_fault_is_flagged() {
        let d = Diagnostic::from(&VmError::BadFunction { index: 9 });
        assert_eq!(d.code, Some("SVML-R006"));
    }

    #[test]
    fn host_error_inside_vm_error() {
        let e = VmError::Host(HostError::UnknownBinding { name: "beep".to_string() });
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("SVML-H001"));
        assert!(d.message.contains("beep"));
    }

    #[test]
    fn from_decode_error() {
        let d = Diagnostic::from(&DecodeError::BadMagic { found: 7 });
        assert_eq!(d.code, Some("SVML-D001"));
    }

    #[test]
    fn every_emitted_code_is_registered() {
        let codes = [
            "SVML-L001", "SVML-C001", "SVML-C007", "SVML-D001", "SVML-H001", "SVML-R001", "SVML-R006",
        ];
        for code in codes {
            assert!(registry::lookup(code).is_some(), "{code} missing from registry");
        }
    }
}
