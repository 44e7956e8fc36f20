//! `svmlc`: compile Source programs to svml bytecode, and optionally run them.

use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use svml::assembler;
use svml::bytecode::Program;
use svml::compiler::{Chapter, CompileOptions};
use svml::diagnostic::{self, Diagnostic, Stage, ansi::AnsiRenderer};
use svml::host::HostRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    /// Human-readable instruction listing
    Debug,
    /// The compiled program as JSON
    Json,
    /// Assembled binary (.svm)
    Binary,
    /// The parsed syntax tree as JSON
    Ast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ErrorFormat {
    Human,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "svmlc", version)]
#[command(about = "Compile Source programs to svml bytecode")]
struct Args {
    /// Source file, or an assembled .svm file with --run
    #[arg(required_unless_present = "explain")]
    input: Option<PathBuf>,

    /// Output format
    #[arg(short = 't', long = "compile-to", value_enum, default_value = "binary")]
    target: Target,

    /// Language chapter (1-4)
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=4))]
    chapter: u8,

    /// Output path; binary output defaults to the input with a .svm extension
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Execute the program and print its result
    #[arg(long)]
    run: bool,

    /// How errors are written to stderr
    #[arg(long, value_enum, default_value = "human")]
    error_format: ErrorFormat,

    /// Print the long explanation of an error code and exit
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Pipeline failure, rendered with the source it came from.
    #[error("{error}")]
    Svml { error: svml::Error, source_text: Option<String> },
}

impl CliError {
    fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            CliError::Svml { error, source_text } => error.diagnostics(source_text.as_deref()),
            other => vec![Diagnostic::new(Stage::Cli, other.to_string())],
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Some(code) = &args.explain {
        return explain(code);
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, args.error_format);
            ExitCode::FAILURE
        }
    }
}

fn explain(code: &str) -> ExitCode {
    match diagnostic::registry::lookup(code) {
        Some(entry) => {
            print!("{}", entry.long);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("unknown error code '{code}'");
            ExitCode::FAILURE
        }
    }
}

fn report(e: &CliError, format: ErrorFormat) {
    let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
    for d in e.diagnostics() {
        match format {
            ErrorFormat::Human => eprint!("{}", renderer.render(&d)),
            ErrorFormat::Json => eprintln!("{}", diagnostic::json::render(&d)),
        }
    }
}

fn run(args: &Args) -> Result<(), CliError> {
    let input = args
        .input
        .as_deref()
        .ok_or_else(|| CliError::Usage("no input file".to_string()))?;
    let options = CompileOptions {
        chapter: Chapter::new(args.chapter)
            .ok_or_else(|| CliError::Usage(format!("chapter must be {}-{}, got {}", Chapter::MIN, Chapter::MAX, args.chapter)))?,
    };

    let is_binary_input = input.extension().is_some_and(|ext| ext == "svm");
    let program = if is_binary_input {
        if args.target == Target::Ast {
            return Err(CliError::Usage("an assembled binary has no syntax tree".to_string()));
        }
        let bytes = fs::read(input).map_err(|source| CliError::Read { path: input.to_path_buf(), source })?;
        debug!(bytes = bytes.len(), "decoding {}", input.display());
        assembler::disassemble(&bytes).map_err(|e| CliError::Svml { error: e.into(), source_text: None })?
    } else {
        let source = fs::read_to_string(input).map_err(|source| CliError::Read { path: input.to_path_buf(), source })?;
        let fail = |error: svml::Error| CliError::Svml { error, source_text: Some(source.clone()) };
        if args.target == Target::Ast {
            let ast = svml::parse_source(&source).map_err(fail)?;
            emit(args.output.as_deref(), serde_json::to_string_pretty(&ast)?.as_bytes())?;
            return Ok(());
        }
        svml::compile_source(&source, &options).map_err(fail)?
    };

    // Re-assembling a binary onto itself is pointless, so that case only emits
    // when an explicit output path is given.
    if !(is_binary_input && args.target == Target::Binary && args.output.is_none()) {
        write_target(args, input, &program)?;
    }

    if args.run {
        let value = svml::vm::execute(&program, &HostRegistry::standard())
            .map_err(|e| CliError::Svml { error: e.into(), source_text: None })?;
        println!("{value}");
    }
    Ok(())
}

fn write_target(args: &Args, input: &Path, program: &Program) -> Result<(), CliError> {
    match args.target {
        Target::Debug => emit(args.output.as_deref(), program.to_string().as_bytes()),
        Target::Json => emit(args.output.as_deref(), serde_json::to_string_pretty(program)?.as_bytes()),
        Target::Binary => {
            let path = args.output.clone().unwrap_or_else(|| input.with_extension("svm"));
            let bytes = assembler::assemble(program);
            fs::write(&path, &bytes).map_err(|source| CliError::Write { path: path.clone(), source })?;
            info!("wrote {} bytes to {}", bytes.len(), path.display());
            Ok(())
        }
        Target::Ast => Err(CliError::Usage("an assembled binary has no syntax tree".to_string())),
    }
}

/// Write to `path`, or to stdout when none is given.
fn emit(path: Option<&Path>, bytes: &[u8]) -> Result<(), CliError> {
    match path {
        Some(path) => fs::write(path, bytes).map_err(|source| CliError::Write { path: path.to_path_buf(), source }),
        None => {
            let text = String::from_utf8_lossy(bytes);
            if text.ends_with('\n') {
                print!("{text}");
            } else {
                println!("{text}");
            }
            Ok(())
        }
    }
}
