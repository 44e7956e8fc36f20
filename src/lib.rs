//! Compiler, assembler and stack virtual machine for the Source teaching
//! language.
//!
//! Source text is lexed, parsed, checked against a language chapter,
//! desugared and lowered to a [`bytecode::Program`]. A program can be
//! serialized with [`assembler::assemble`], decoded again with
//! [`assembler::disassemble`], and executed by [`vm::Machine`].

pub mod assembler;
pub mod ast;
pub mod buffer;
pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod host;
pub mod lexer;
pub mod parser;
pub mod primitives;
pub mod vm;

use assembler::DecodeError;
use compiler::{CompileError, CompileOptions};
use diagnostic::Diagnostic;
use host::{HostRegistry, Value};
use lexer::LexError;
use parser::ParseError;
use vm::VmError;

/// Any failure along the source → result pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{}", parse_summary(.0))]
    Parse(Vec<ParseError>),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Runtime(#[from] VmError),
}

fn parse_summary(errors: &[ParseError]) -> String {
    match errors {
        [] => "parse failed".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}

impl Error {
    /// One diagnostic per underlying error, with `source` attached for
    /// snippets when given.
    pub fn diagnostics(&self, source: Option<&str>) -> Vec<Diagnostic> {
        let diags = match self {
            Error::Lex(e) => vec![Diagnostic::from(e)],
            Error::Parse(errors) => errors.iter().map(Diagnostic::from).collect(),
            Error::Compile(e) => vec![Diagnostic::from(e)],
            Error::Decode(e) => vec![Diagnostic::from(e)],
            Error::Runtime(e) => vec![Diagnostic::from(e)],
        };
        match source {
            Some(src) => diags.into_iter().map(|d| d.with_source(src)).collect(),
            None => diags,
        }
    }
}

/// Lex and parse `source`. Every parse error is kept; the parser recovers at
/// statement boundaries. The text is kept on the program so shadowed names can
/// be renamed by line and column.
pub fn parse_source(source: &str) -> Result<ast::Program, Error> {
    let tokens = lexer::lex(source)?;
    let (mut program, errors) = parser::parse(tokens);
    if !errors.is_empty() {
        return Err(Error::Parse(errors));
    }
    program.source = Some(source.to_string());
    Ok(program)
}

pub fn compile_source(source: &str, options: &CompileOptions) -> Result<bytecode::Program, Error> {
    let ast = parse_source(source)?;
    let program = compiler::compile_with(&ast, options)?;
    tracing::debug!(
        functions = program.functions.len(),
        chapter = options.chapter.number(),
        "compiled"
    );
    Ok(program)
}

/// Compile and execute `source` against `host`.
pub fn run_source(source: &str, options: &CompileOptions, host: &HostRegistry) -> Result<Value, Error> {
    let program = compile_source(source, options)?;
    Ok(vm::execute(&program, host)?)
}

/// Decode an assembled binary and execute it.
pub fn run_binary(bytes: &[u8], host: &HostRegistry) -> Result<Value, Error> {
    let program = assembler::disassemble(bytes)?;
    Ok(vm::execute(&program, host)?)
}
