//! Compile-time scope tables. Every frame corresponds to one runtime
//! environment, so a name resolves to `(slot, level)` without any lookup at
//! run time. Names not bound in any frame fall through to the prelude.

use std::collections::HashMap;

use super::CompileError;
use super::desugar::declared_name;
use crate::ast::{DeclKind, Span, Stmt, StmtKind};
use crate::primitives::{self, Constant, Internal, Primitive};

#[derive(Debug, Clone, Copy)]
struct Binding {
    slot: u8,
    mutable: bool,
}

#[derive(Debug, Default)]
struct Frame {
    bindings: HashMap<String, Binding>,
    size: u8,
}

impl Frame {
    fn declare(&mut self, name: &str, mutable: bool, span: Span) -> Result<(), CompileError> {
        if self.bindings.contains_key(name) {
            return Ok(());
        }
        if self.size == u8::MAX {
            return Err(CompileError::LimitExceeded { what: "names in one scope", limit: u8::MAX as usize, span });
        }
        self.bindings.insert(name.to_string(), Binding { slot: self.size, mutable });
        self.size += 1;
        Ok(())
    }

    /// Declarations directly in `stmts` and in nested non-loop blocks.
    fn collect(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            if let Some(name) = declared_name(stmt) {
                let mutable = matches!(stmt.node, StmtKind::Declaration { kind: DeclKind::Let, .. });
                self.declare(name, mutable, stmt.span)?;
            }
            match &stmt.node {
                StmtKind::Block(inner) => self.collect(inner)?,
                StmtKind::If { consequent, alternate, .. } => {
                    self.collect(consequent)?;
                    if let Some(alt) = alternate {
                        self.collect(alt)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Resolved {
    Local { slot: u8, level: u8, mutable: bool },
    Primitive(&'static Primitive),
    Internal(&'static Internal),
    Constant(Constant),
}

#[derive(Debug, Default)]
pub struct Scope {
    frames: Vec<Frame>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    /// Open a frame holding `params` followed by every name declared in
    /// `body`; returns the environment size it needs.
    pub fn push(&mut self, params: &[String], body: &[&[Stmt]], span: Span) -> Result<u8, CompileError> {
        let mut frame = Frame::default();
        for p in params {
            frame.declare(p, true, span)?;
        }
        for stmts in body {
            frame.collect(stmts)?;
        }
        let size = frame.size;
        self.frames.push(frame);
        Ok(size)
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn resolve(&self, name: &str, span: Span) -> Result<Option<Resolved>, CompileError> {
        for (level, frame) in self.frames.iter().rev().enumerate() {
            if let Some(b) = frame.bindings.get(name) {
                let level = u8::try_from(level).map_err(|_| CompileError::LimitExceeded {
                    what: "nested scopes",
                    limit: u8::MAX as usize,
                    span,
                })?;
                return Ok(Some(Resolved::Local { slot: b.slot, level, mutable: b.mutable }));
            }
        }
        Ok(primitives::lookup_primitive(name)
            .map(Resolved::Primitive)
            .or_else(|| primitives::lookup_internal(name).map(Resolved::Internal))
            .or_else(|| primitives::lookup_constant(name).map(Resolved::Constant)))
    }
}
