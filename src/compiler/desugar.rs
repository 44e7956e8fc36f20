//! AST rewrites run before code generation:
//!
//! * `for` loops become the single `While` primitive. A `let`-initialised
//!   control variable lives in a hidden outer binding (`%i`) and is copied into
//!   a fresh per-iteration binding, so closures created in the body capture
//!   that iteration's value.
//! * Declarations in nested blocks that would shadow a visible name are
//!   renamed to `name-line-col`, together with the references they bind.
//!   Blocks share their enclosing frame, so this is what keeps an inner
//!   declaration from clobbering the outer slot.

use std::collections::HashSet;

use crate::ast::*;

pub fn desugar(mut program: Program) -> Program {
    let map = program.source.as_deref().map(SourceMap::new);
    lower_stmts(&mut program.body);
    let mut renamer = Renamer { map: map.as_ref(), frames: Vec::new() };
    renamer.frame(&[], &mut program.body, &mut []);
    program
}

// ── Loop lowering ───────────────────────────────────────────────────

fn lower_stmts(stmts: &mut [Stmt]) {
    stmts.iter_mut().for_each(lower_stmt);
}

fn lower_stmt(stmt: &mut Stmt) {
    match &mut stmt.node {
        StmtKind::Declaration { value, .. } => lower_expr(value),
        StmtKind::Function { body, .. } => lower_stmts(body),
        StmtKind::Return(value) => value.iter_mut().for_each(lower_expr),
        StmtKind::If { test, consequent, alternate } => {
            lower_expr(test);
            lower_stmts(consequent);
            alternate.iter_mut().for_each(|a| lower_stmts(a));
        }
        StmtKind::While { test, body, latch, update } => {
            lower_expr(test);
            lower_stmts(body);
            lower_stmts(latch);
            update.iter_mut().for_each(lower_expr);
        }
        StmtKind::ForOf { iterable, body, .. } => {
            lower_expr(iterable);
            lower_stmts(body);
        }
        StmtKind::Block(body) => lower_stmts(body),
        StmtKind::Expr(e) => lower_expr(e),
        StmtKind::Break | StmtKind::Continue => {}
        StmtKind::For { .. } => {
            let StmtKind::For { init, test, update, mut body } =
                std::mem::replace(&mut stmt.node, StmtKind::Block(Vec::new()))
            else {
                return;
            };
            lower_stmts(&mut body);
            let mut init = init.map(|s| *s);
            let mut test = test;
            let mut update = update;
            if let Some(s) = init.as_mut() {
                lower_stmt(s);
            }
            test.iter_mut().chain(update.iter_mut()).for_each(lower_expr);
            stmt.node = lower_for(init, test, update, body, stmt.span);
        }
    }
}

fn lower_expr(expr: &mut Expr) {
    match &mut expr.node {
        ExprKind::Lambda { body: LambdaBody::Block(stmts), .. } => lower_stmts(stmts),
        ExprKind::Lambda { body: LambdaBody::Expr(inner), .. } => lower_expr(inner),
        other => children_mut(other).into_iter().for_each(lower_expr),
    }
}

fn ident(name: &str, span: Span) -> Expr {
    Expr::new(ExprKind::Ident(name.to_string()), span)
}

/// `for (let i = init; test; update) body` becomes
///
/// ```text
/// { let %i = init;
///   while (test[i := %i]) { let i = %i; { body } } latch { %i = i; } update[i := %i] }
/// ```
fn lower_for(init: Option<Stmt>, test: Option<Expr>, update: Option<Expr>, body: Vec<Stmt>, span: Span) -> StmtKind {
    let test = test.unwrap_or_else(|| Expr::new(ExprKind::Literal(Literal::Bool(true)), span));
    match init {
        Some(Stmt { node: StmtKind::Declaration { kind, name, value }, span: decl_span }) => {
            let hidden = format!("%{name}");
            let mut test = test;
            let mut update = update;
            subst_expr(&mut test, &name, &hidden);
            if let Some(u) = update.as_mut() {
                subst_expr(u, &name, &hidden);
            }
            let copy_in = Stmt::new(
                StmtKind::Declaration { kind, name: name.clone(), value: ident(&hidden, decl_span) },
                decl_span,
            );
            let copy_out = Stmt::new(
                StmtKind::Expr(Expr::new(
                    ExprKind::Assign {
                        target: Box::new(ident(&hidden, decl_span)),
                        value: Box::new(ident(&name, decl_span)),
                    },
                    decl_span,
                )),
                decl_span,
            );
            let lowered = StmtKind::While {
                test,
                body: vec![copy_in, Stmt::new(StmtKind::Block(body), span)],
                latch: vec![copy_out],
                update,
            };
            StmtKind::Block(vec![
                Stmt::new(StmtKind::Declaration { kind: DeclKind::Let, name: hidden, value }, decl_span),
                Stmt::new(lowered, span),
            ])
        }
        other => {
            let mut stmts: Vec<Stmt> = other.into_iter().collect();
            stmts.push(Stmt::new(StmtKind::While { test, body, latch: Vec::new(), update }, span));
            StmtKind::Block(stmts)
        }
    }
}

// ── Shadow renaming ─────────────────────────────────────────────────

/// Name bound by a statement that declares one directly.
pub fn declared_name(stmt: &Stmt) -> Option<&str> {
    match &stmt.node {
        StmtKind::Declaration { name, .. } | StmtKind::Function { name, .. } => Some(name),
        _ => None,
    }
}

fn set_declared_name(stmt: &mut Stmt, fresh: String) {
    if let StmtKind::Declaration { name, .. } | StmtKind::Function { name, .. } = &mut stmt.node {
        *name = fresh;
    }
}

fn declares_directly(stmts: &[Stmt], name: &str) -> bool {
    stmts.iter().any(|s| declared_name(s) == Some(name))
}

struct Renamer<'a> {
    map: Option<&'a SourceMap>,
    /// Names bound in each enclosing frame, innermost last.
    frames: Vec<HashSet<String>>,
}

impl Renamer<'_> {
    fn visible(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.contains(name))
    }

    fn bind(&mut self, name: String) {
        if let Some(top) = self.frames.last_mut() {
            top.insert(name);
        }
    }

    fn fresh_name(&self, name: &str, span: Span) -> String {
        let base = match self.map {
            Some(map) => {
                let loc = map.locate(span.start);
                format!("{name}-{}-{}", loc.line, loc.col)
            }
            None => format!("{name}-{}", span.start),
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while self.visible(&candidate) {
            n += 1;
            candidate = format!("{base}-{n}");
        }
        candidate
    }

    /// A new environment: a function body, lambda body or loop iteration.
    /// Its direct declarations are its own and are never renamed.
    fn frame(&mut self, params: &[String], body: &mut [Stmt], latch: &mut [Stmt]) {
        let mut bound: HashSet<String> = params.iter().cloned().collect();
        bound.extend(body.iter().chain(latch.iter()).filter_map(declared_name).map(str::to_string));
        self.frames.push(bound);
        body.iter_mut().chain(latch.iter_mut()).for_each(|s| self.stmt(s));
        self.frames.pop();
    }

    /// A nested block flattened into the current frame.
    fn block(&mut self, stmts: &mut [Stmt]) {
        for i in 0..stmts.len() {
            let Some(name) = declared_name(&stmts[i]).map(str::to_string) else {
                continue;
            };
            if self.visible(&name) {
                let fresh = self.fresh_name(&name, stmts[i].span);
                set_declared_name(&mut stmts[i], fresh.clone());
                subst_stmts(stmts, &name, &fresh);
                self.bind(fresh);
            } else {
                self.bind(name);
            }
        }
        stmts.iter_mut().for_each(|s| self.stmt(s));
    }

    fn stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.node {
            StmtKind::Declaration { value, .. } => self.expr(value),
            StmtKind::Function { params, body, .. } => self.frame(params, body, &mut []),
            StmtKind::Return(value) => value.iter_mut().for_each(|e| self.expr(e)),
            StmtKind::If { test, consequent, alternate } => {
                self.expr(test);
                self.block(consequent);
                if let Some(alt) = alternate {
                    self.block(alt);
                }
            }
            StmtKind::While { test, body, latch, update } => {
                self.expr(test);
                self.frame(&[], body, latch);
                update.iter_mut().for_each(|e| self.expr(e));
            }
            StmtKind::For { init, test, update, body } => {
                if let Some(init) = init {
                    self.stmt(init);
                }
                test.iter_mut().chain(update.iter_mut()).for_each(|e| self.expr(e));
                self.frame(&[], body, &mut []);
            }
            StmtKind::ForOf { iterable, body, .. } => {
                self.expr(iterable);
                self.frame(&[], body, &mut []);
            }
            StmtKind::Block(body) => self.block(body),
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Break | StmtKind::Continue => {}
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        match &mut expr.node {
            ExprKind::Lambda { params, body: LambdaBody::Block(stmts) } => self.frame(params, stmts, &mut []),
            ExprKind::Lambda { params, body: LambdaBody::Expr(inner) } => {
                self.frames.push(params.iter().cloned().collect());
                self.expr(inner);
                self.frames.pop();
            }
            other => children_mut(other).into_iter().for_each(|c| self.expr(c)),
        }
    }
}

// ── Substitution ────────────────────────────────────────────────────

fn subst_stmts(stmts: &mut [Stmt], old: &str, new: &str) {
    stmts.iter_mut().for_each(|s| subst_stmt(s, old, new));
}

/// Blocks and frames that declare `old` themselves bind their own references.
fn subst_scoped(stmts: &mut [Stmt], old: &str, new: &str) {
    if !declares_directly(stmts, old) {
        subst_stmts(stmts, old, new);
    }
}

fn subst_stmt(stmt: &mut Stmt, old: &str, new: &str) {
    match &mut stmt.node {
        StmtKind::Declaration { value, .. } => subst_expr(value, old, new),
        StmtKind::Function { params, body, .. } => {
            if !params.iter().any(|p| p == old) {
                subst_scoped(body, old, new);
            }
        }
        StmtKind::Return(value) => value.iter_mut().for_each(|e| subst_expr(e, old, new)),
        StmtKind::If { test, consequent, alternate } => {
            subst_expr(test, old, new);
            subst_scoped(consequent, old, new);
            if let Some(alt) = alternate {
                subst_scoped(alt, old, new);
            }
        }
        StmtKind::While { test, body, latch, update } => {
            subst_expr(test, old, new);
            if !declares_directly(body, old) && !declares_directly(latch, old) {
                subst_stmts(body, old, new);
                subst_stmts(latch, old, new);
            }
            update.iter_mut().for_each(|e| subst_expr(e, old, new));
        }
        StmtKind::For { init, test, update, body } => {
            if let Some(init) = init {
                subst_stmt(init, old, new);
            }
            test.iter_mut().chain(update.iter_mut()).for_each(|e| subst_expr(e, old, new));
            subst_scoped(body, old, new);
        }
        StmtKind::ForOf { iterable, body, .. } => {
            subst_expr(iterable, old, new);
            subst_scoped(body, old, new);
        }
        StmtKind::Block(body) => subst_scoped(body, old, new),
        StmtKind::Expr(e) => subst_expr(e, old, new),
        StmtKind::Break | StmtKind::Continue => {}
    }
}

fn subst_expr(expr: &mut Expr, old: &str, new: &str) {
    match &mut expr.node {
        ExprKind::Ident(name) => {
            if name == old {
                *name = new.to_string();
            }
        }
        ExprKind::Lambda { params, body } => {
            if params.iter().any(|p| p == old) {
                return;
            }
            match body {
                LambdaBody::Expr(inner) => subst_expr(inner, old, new),
                LambdaBody::Block(stmts) => subst_scoped(stmts, old, new),
            }
        }
        other => children_mut(other).into_iter().for_each(|c| subst_expr(c, old, new)),
    }
}

/// Direct sub-expressions. Lambda bodies are left to the caller.
fn children_mut(expr: &mut ExprKind) -> Vec<&mut Expr> {
    match expr {
        ExprKind::Literal(_) | ExprKind::Ident(_) | ExprKind::Lambda { .. } => Vec::new(),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => vec![&mut **left, &mut **right],
        ExprKind::Unary { operand, .. } => vec![&mut **operand],
        ExprKind::Conditional { test, consequent, alternate } => {
            vec![&mut **test, &mut **consequent, &mut **alternate]
        }
        ExprKind::Call { callee, args } => std::iter::once(&mut **callee).chain(args.iter_mut()).collect(),
        ExprKind::Index { object, index } => vec![&mut **object, &mut **index],
        ExprKind::Member { object, .. } => vec![&mut **object],
        ExprKind::Assign { target, value } => vec![&mut **target, &mut **value],
        ExprKind::Array(items) => items.iter_mut().collect(),
        ExprKind::Object(fields) => fields.iter_mut().map(|(_, e)| e).collect(),
    }
}
