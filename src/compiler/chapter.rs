//! Language chapters. Chapter 1 has constants, functions and conditionals.
//! Chapter 2 adds `null` and the list primitives; chapter 3 adds `let`,
//! assignment, loops and arrays. [`check`] rejects syntax newer than the
//! chosen chapter.

use serde::Serialize;

use super::CompileError;
use crate::ast::*;

/// Language level. Each chapter is a superset of the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Chapter(u8);

impl Chapter {
    pub const MIN: Chapter = Chapter(1);
    pub const MAX: Chapter = Chapter(4);

    pub fn new(n: u8) -> Option<Chapter> {
        (Chapter::MIN.0..=Chapter::MAX.0).contains(&n).then_some(Chapter(n))
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

impl Default for Chapter {
    fn default() -> Self {
        Chapter::MAX
    }
}

impl std::fmt::Display for Chapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reject syntax introduced after `chapter`. Names of primitives are checked
/// during resolution, since only then is it known whether a name is local.
pub fn check(program: &Program, chapter: Chapter) -> Result<(), CompileError> {
    Checker { chapter }.stmts(&program.body)
}

struct Checker {
    chapter: Chapter,
}

impl Checker {
    fn require(&self, min: u8, construct: &str, span: Span) -> Result<(), CompileError> {
        if self.chapter.0 < min {
            return Err(CompileError::NotInChapter {
                construct: construct.to_string(),
                chapter: self.chapter.0,
                span,
            });
        }
        Ok(())
    }

    fn stmts(&self, stmts: &[Stmt]) -> Result<(), CompileError> {
        stmts.iter().try_for_each(|s| self.stmt(s))
    }

    fn stmt(&self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.node {
            StmtKind::Declaration { kind, value, .. } => {
                if *kind == DeclKind::Let {
                    self.require(3, stmt.describe(), stmt.span)?;
                }
                self.expr(value)
            }
            StmtKind::Function { body, .. } => self.stmts(body),
            StmtKind::Return(value) => value.iter().try_for_each(|e| self.expr(e)),
            StmtKind::If { test, consequent, alternate } => {
                self.expr(test)?;
                self.stmts(consequent)?;
                alternate.iter().try_for_each(|a| self.stmts(a))
            }
            StmtKind::While { test, body, latch, update } => {
                self.require(3, stmt.describe(), stmt.span)?;
                self.expr(test)?;
                self.stmts(body)?;
                self.stmts(latch)?;
                update.iter().try_for_each(|e| self.expr(e))
            }
            StmtKind::For { init, test, update, body } => {
                self.require(3, stmt.describe(), stmt.span)?;
                init.iter().try_for_each(|s| self.stmt(s))?;
                test.iter().chain(update.iter()).try_for_each(|e| self.expr(e))?;
                self.stmts(body)
            }
            StmtKind::ForOf { iterable, body, .. } => {
                self.expr(iterable)?;
                self.stmts(body)
            }
            StmtKind::Break | StmtKind::Continue => self.require(3, stmt.describe(), stmt.span),
            StmtKind::Block(body) => self.stmts(body),
            StmtKind::Expr(e) => self.expr(e),
        }
    }

    fn expr(&self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.node {
            ExprKind::Literal(Literal::Null) => self.require(2, expr.describe(), expr.span),
            ExprKind::Literal(_) | ExprKind::Ident(_) => Ok(()),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Conditional { test, consequent, alternate } => {
                self.expr(test)?;
                self.expr(consequent)?;
                self.expr(alternate)
            }
            ExprKind::Call { callee, args } => {
                self.expr(callee)?;
                args.iter().try_for_each(|a| self.expr(a))
            }
            ExprKind::Index { object, index } => {
                self.require(3, expr.describe(), expr.span)?;
                self.expr(object)?;
                self.expr(index)
            }
            ExprKind::Member { object, .. } => self.expr(object),
            ExprKind::Assign { target, value } => {
                self.require(3, expr.describe(), expr.span)?;
                self.expr(target)?;
                self.expr(value)
            }
            ExprKind::Array(items) => {
                self.require(3, expr.describe(), expr.span)?;
                items.iter().try_for_each(|e| self.expr(e))
            }
            ExprKind::Object(fields) => fields.iter().try_for_each(|(_, e)| self.expr(e)),
            ExprKind::Lambda { body, .. } => match body {
                LambdaBody::Expr(e) => self.expr(e),
                LambdaBody::Block(stmts) => self.stmts(stmts),
            },
        }
    }
}
