//! AST to bytecode. Each function body becomes one `bytecode::Function`; names
//! are resolved statically to `(slot, level)` pairs so the VM never looks a
//! name up at run time.

pub mod chapter;
pub mod desugar;
pub mod scope;

use std::mem;

use crate::ast::*;
use crate::bytecode::{self, Function, Instruction};
use crate::primitives::Constant;
pub use chapter::Chapter;
use scope::{Resolved, Scope};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("cannot find name `{name}`")]
    UnresolvedName { name: String, span: Span },
    #[error("cannot assign to constant `{name}`")]
    AssignToConstant { name: String, span: Span },
    #[error("{construct} is not supported")]
    Unsupported { construct: &'static str, span: Span },
    #[error("`break` outside of a loop")]
    IllegalBreak { span: Span },
    #[error("`continue` outside of a loop")]
    IllegalContinue { span: Span },
    #[error("too many {what} (limit {limit})")]
    LimitExceeded { what: &'static str, limit: usize, span: Span },
    #[error("{construct} is not available in chapter {chapter}")]
    NotInChapter { construct: String, chapter: u8, span: Span },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::UnresolvedName { span, .. }
            | CompileError::AssignToConstant { span, .. }
            | CompileError::Unsupported { span, .. }
            | CompileError::IllegalBreak { span }
            | CompileError::IllegalContinue { span }
            | CompileError::LimitExceeded { span, .. }
            | CompileError::NotInChapter { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UnresolvedName { .. } => "SVML-C001",
            CompileError::AssignToConstant { .. } => "SVML-C002",
            CompileError::Unsupported { .. } => "SVML-C003",
            CompileError::IllegalBreak { .. } => "SVML-C004",
            CompileError::IllegalContinue { .. } => "SVML-C005",
            CompileError::LimitExceeded { .. } => "SVML-C006",
            CompileError::NotInChapter { .. } => "SVML-C007",
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    pub chapter: Chapter,
}

/// Compile at the default chapter.
pub fn compile(program: &Program) -> Result<bytecode::Program> {
    compile_with(program, &CompileOptions::default())
}

pub fn compile_with(program: &Program, options: &CompileOptions) -> Result<bytecode::Program> {
    chapter::check(program, options.chapter)?;
    let program = desugar::desugar(program.clone());
    let mut compiler = Compiler {
        chapter: options.chapter,
        functions: Vec::new(),
        current: FunctionBuilder::default(),
        scope: Scope::new(),
    };
    let entry = compiler.function(&[], Body::Entry(&program.body), Span::UNKNOWN)?;
    tracing::debug!(functions = compiler.functions.len(), chapter = %options.chapter, "compiled program");
    Ok(bytecode::Program { entry, functions: compiler.functions })
}

// ── Builders ────────────────────────────────────────────────────────

/// Index of a branch whose offset is filled in once the target is known.
#[derive(Debug, Clone, Copy)]
struct Patch(usize);

#[derive(Debug, Default)]
struct Loop {
    breaks: Vec<Patch>,
    continues: Vec<Patch>,
}

#[derive(Debug, Default)]
struct FunctionBuilder {
    code: Vec<Instruction>,
    loops: Vec<Loop>,
}

impl FunctionBuilder {
    fn emit(&mut self, ins: Instruction) {
        self.code.push(ins);
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn branch(&mut self, ins: Instruction) -> Patch {
        let at = self.here();
        self.code.push(ins);
        Patch(at)
    }

    fn patch_to(&mut self, patch: Patch, target: usize) {
        let offset = target as i32 - patch.0 as i32;
        self.code[patch.0] = self.code[patch.0].with_branch_offset(offset);
    }

    fn patch_here(&mut self, patch: Patch) {
        let target = self.here();
        self.patch_to(patch, target);
    }

    fn branch_back(&mut self, target: usize) {
        let offset = target as i32 - self.here() as i32;
        self.code.push(Instruction::Branch(offset));
    }
}

enum Body<'a> {
    /// Top-level statements; the last statement's value is the result.
    Entry(&'a [Stmt]),
    Block(&'a [Stmt]),
    Expr(&'a Expr),
}

/// One arm of a two-way branch.
enum Arm<'a> {
    Expr(&'a Expr),
    Bool(bool),
}

struct Compiler {
    chapter: Chapter,
    functions: Vec<Function>,
    current: FunctionBuilder,
    scope: Scope,
}

fn u8_limit(n: usize, what: &'static str, span: Span) -> Result<u8> {
    u8::try_from(n).map_err(|_| CompileError::LimitExceeded { what, limit: u8::MAX as usize, span })
}

fn ends_in_return(stmts: &[Stmt]) -> bool {
    matches!(stmts.last().map(|s| &s.node), Some(StmtKind::Return(_)))
}

fn number(n: f64) -> Instruction {
    let integral = n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64;
    if integral && !(n == 0.0 && n.is_sign_negative()) {
        Instruction::LoadInt(n as i32)
    } else if n.is_nan() || (n as f32) as f64 == n {
        Instruction::LoadF32(n as f32)
    } else {
        Instruction::LoadF64(n)
    }
}

impl Compiler {
    fn emit(&mut self, ins: Instruction) {
        self.current.emit(ins);
    }

    /// Compile a function into its own record and return its index. The
    /// record is reserved first so nested functions get later indices.
    fn function(&mut self, params: &[String], body: Body<'_>, span: Span) -> Result<u32> {
        let index = self.functions.len() as u32;
        self.functions.push(Function { stack_size: 0, env_size: 0, num_args: 0, code: Vec::new() });
        let num_args = u8_limit(params.len(), "parameters", span)?;
        let env_size = match &body {
            Body::Entry(stmts) | Body::Block(stmts) => self.scope.push(params, &[*stmts], span)?,
            Body::Expr(_) => self.scope.push(params, &[], span)?,
        };
        let outer = mem::take(&mut self.current);

        let depth = match body {
            Body::Entry(stmts) => self.stmts(stmts, true),
            Body::Block(stmts) => self.stmts(stmts, false).map(|d| {
                if !ends_in_return(stmts) {
                    self.emit(Instruction::Pop);
                    self.emit(Instruction::LoadUndefined);
                    self.emit(Instruction::Return);
                }
                d
            }),
            Body::Expr(e) => self.expr(e, true),
        };
        self.scope.pop();
        let builder = mem::replace(&mut self.current, outer);
        let stack_size = u8_limit(depth?.max(1), "operand stack slots", span)?;

        self.functions[index as usize] = Function { stack_size, env_size, num_args, code: builder.code };
        Ok(index)
    }

    // ── Statements ──────────────────────────────────────────────────

    /// Every statement leaves one value; all but the last are popped.
    /// Function declarations are hoisted to the start of their list.
    fn stmts(&mut self, stmts: &[Stmt], ir: bool) -> Result<usize> {
        let mut depth = 1;
        for stmt in stmts {
            if let StmtKind::Function { name, params, body } = &stmt.node {
                let index = self.function(params, Body::Block(body), stmt.span)?;
                self.emit(Instruction::NewClosure(index));
                self.store(name, stmt.span, true)?;
            }
        }
        if stmts.is_empty() {
            self.emit(Instruction::LoadUndefined);
            if ir {
                self.emit(Instruction::Return);
            }
            return Ok(depth);
        }
        let last = stmts.len() - 1;
        for (i, stmt) in stmts.iter().enumerate() {
            if i > 0 {
                self.emit(Instruction::Pop);
            }
            depth = depth.max(self.stmt(stmt, ir && i == last)?);
        }
        Ok(depth)
    }

    fn stmt(&mut self, stmt: &Stmt, ir: bool) -> Result<usize> {
        match &stmt.node {
            StmtKind::Declaration { name, value, .. } => {
                let depth = self.value(value)?;
                self.store(name, stmt.span, true)?;
                self.undefined(ir);
                Ok(depth.max(1))
            }
            StmtKind::Function { .. } => {
                self.undefined(ir);
                Ok(1)
            }
            StmtKind::Return(Some(value)) => self.expr(value, true),
            StmtKind::Return(None) => {
                self.undefined(true);
                Ok(1)
            }
            StmtKind::If { test, consequent, alternate } => {
                let mut depth = self.value(test)?;
                let to_alternate = self.current.branch(Instruction::BranchFalse(0));
                depth = depth.max(self.stmts(consequent, ir)?);
                let to_end = (!ir && !ends_in_return(consequent))
                    .then(|| self.current.branch(Instruction::Branch(0)));
                self.current.patch_here(to_alternate);
                depth = depth.max(self.stmts(alternate.as_deref().unwrap_or(&[]), ir)?);
                if let Some(p) = to_end {
                    self.current.patch_here(p);
                }
                Ok(depth)
            }
            StmtKind::While { test, body, latch, update } => self.while_loop(test, body, latch, update.as_ref(), ir, stmt.span),
            StmtKind::Break => {
                let patch = self.loop_branch(stmt.span, true)?;
                if let Some(l) = self.current.loops.last_mut() {
                    l.breaks.push(patch);
                }
                Ok(0)
            }
            StmtKind::Continue => {
                let patch = self.loop_branch(stmt.span, false)?;
                if let Some(l) = self.current.loops.last_mut() {
                    l.continues.push(patch);
                }
                Ok(0)
            }
            StmtKind::Block(body) => self.stmts(body, ir),
            StmtKind::Expr(e) => self.expr(e, ir),
            StmtKind::For { .. } | StmtKind::ForOf { .. } => {
                Err(CompileError::Unsupported { construct: stmt.describe(), span: stmt.span })
            }
        }
    }

    fn undefined(&mut self, ir: bool) {
        self.emit(Instruction::LoadUndefined);
        if ir {
            self.emit(Instruction::Return);
        }
    }

    /// `break` leaves the iteration environment before jumping; `continue`
    /// stays inside it to run the latch.
    fn loop_branch(&mut self, span: Span, is_break: bool) -> Result<Patch> {
        if self.current.loops.is_empty() {
            return Err(if is_break {
                CompileError::IllegalBreak { span }
            } else {
                CompileError::IllegalContinue { span }
            });
        }
        if is_break {
            self.emit(Instruction::PopEnv);
        }
        Ok(self.current.branch(Instruction::Branch(0)))
    }

    /// ```text
    /// head: <test> BRF exit
    ///       NEWENV n <body> POPG
    /// cont: <latch> POPENV [<update> POPG] BR head
    /// exit: LGCU [RETG]
    /// ```
    fn while_loop(
        &mut self,
        test: &Expr,
        body: &[Stmt],
        latch: &[Stmt],
        update: Option<&Expr>,
        ir: bool,
        span: Span,
    ) -> Result<usize> {
        let head = self.current.here();
        let mut depth = self.value(test)?;
        let exit = self.current.branch(Instruction::BranchFalse(0));

        let env_size = self.scope.push(&[], &[body, latch], span)?;
        self.emit(Instruction::NewEnv(env_size));
        self.current.loops.push(Loop::default());
        let result = self.stmts(body, false);
        let lp = self.current.loops.pop().unwrap_or_default();
        depth = depth.max(result?);
        self.emit(Instruction::Pop);

        let cont = self.current.here();
        for stmt in latch {
            depth = depth.max(self.stmt(stmt, false)?);
            self.emit(Instruction::Pop);
        }
        self.scope.pop();
        self.emit(Instruction::PopEnv);
        if let Some(update) = update {
            depth = depth.max(self.value(update)?);
            self.emit(Instruction::Pop);
        }
        self.current.branch_back(head);

        self.current.patch_here(exit);
        for p in lp.breaks {
            self.current.patch_here(p);
        }
        for p in lp.continues {
            self.current.patch_to(p, cont);
        }
        self.undefined(ir);
        Ok(depth.max(1))
    }

    // ── Expressions ─────────────────────────────────────────────────

    /// Compile `expr`; with `ir` set every path through it ends in `RETG`.
    fn expr(&mut self, expr: &Expr, ir: bool) -> Result<usize> {
        match &expr.node {
            ExprKind::Conditional { test, consequent, alternate } => {
                self.conditional(test, Arm::Expr(consequent), Arm::Expr(alternate), ir)
            }
            ExprKind::Logical { op: LogicalOp::And, left, right } => {
                self.conditional(left, Arm::Expr(right), Arm::Bool(false), ir)
            }
            ExprKind::Logical { op: LogicalOp::Or, left, right } => {
                self.conditional(left, Arm::Bool(true), Arm::Expr(right), ir)
            }
            _ => {
                let depth = self.value(expr)?;
                if ir {
                    self.emit(Instruction::Return);
                }
                Ok(depth)
            }
        }
    }

    fn conditional(&mut self, test: &Expr, consequent: Arm<'_>, alternate: Arm<'_>, ir: bool) -> Result<usize> {
        let mut depth = self.value(test)?;
        let to_alternate = self.current.branch(Instruction::BranchFalse(0));
        depth = depth.max(self.arm(consequent, ir)?);
        let to_end = (!ir).then(|| self.current.branch(Instruction::Branch(0)));
        self.current.patch_here(to_alternate);
        depth = depth.max(self.arm(alternate, ir)?);
        if let Some(p) = to_end {
            self.current.patch_here(p);
        }
        Ok(depth)
    }

    fn arm(&mut self, arm: Arm<'_>, ir: bool) -> Result<usize> {
        match arm {
            Arm::Expr(e) => self.expr(e, ir),
            Arm::Bool(b) => {
                self.emit(if b { Instruction::LoadTrue } else { Instruction::LoadFalse });
                if ir {
                    self.emit(Instruction::Return);
                }
                Ok(1)
            }
        }
    }

    /// Compile `expr` for its value; returns the operand-stack depth needed.
    fn value(&mut self, expr: &Expr) -> Result<usize> {
        match &expr.node {
            ExprKind::Literal(lit) => {
                self.emit(match lit {
                    Literal::Number(n) => number(*n),
                    Literal::Text(s) => Instruction::LoadString(s.clone()),
                    Literal::Bool(true) => Instruction::LoadTrue,
                    Literal::Bool(false) => Instruction::LoadFalse,
                    Literal::Null => Instruction::LoadNull,
                });
                Ok(1)
            }
            ExprKind::Ident(name) => self.load(name, expr.span),
            ExprKind::Binary { op, left, right } => {
                let dl = self.value(left)?;
                let dr = self.value(right)?;
                self.emit(match op {
                    BinOp::Add => Instruction::Add,
                    BinOp::Subtract => Instruction::Sub,
                    BinOp::Multiply => Instruction::Mul,
                    BinOp::Divide => Instruction::Div,
                    BinOp::Modulo => Instruction::Mod,
                    BinOp::Equals => Instruction::Eq,
                    BinOp::NotEquals => Instruction::Neq,
                    BinOp::GreaterThan => Instruction::Gt,
                    BinOp::LessThan => Instruction::Lt,
                    BinOp::GreaterOrEqual => Instruction::Ge,
                    BinOp::LessOrEqual => Instruction::Le,
                });
                Ok(dl.max(1 + dr))
            }
            ExprKind::Logical { .. } | ExprKind::Conditional { .. } => self.expr(expr, false),
            ExprKind::Unary { op, operand } => {
                let depth = self.value(operand)?;
                self.emit(match op {
                    UnaryOp::Not => Instruction::Not,
                    UnaryOp::Negate => Instruction::Neg,
                });
                Ok(depth)
            }
            ExprKind::Call { callee, args } => self.call(callee, args, expr.span),
            ExprKind::Index { object, index } => {
                let d0 = self.value(object)?;
                let d1 = self.value(index)?;
                self.emit(Instruction::LoadElement);
                Ok(d0.max(1 + d1))
            }
            ExprKind::Assign { target, value } => self.assign(target, value),
            ExprKind::Array(items) => {
                self.emit(Instruction::NewArray);
                let mut depth = 1;
                for (i, item) in items.iter().enumerate() {
                    self.emit(Instruction::Dup);
                    self.emit(Instruction::LoadInt(i as i32));
                    depth = depth.max(3 + self.value(item)?);
                    self.emit(Instruction::StoreElement);
                    self.emit(Instruction::Pop);
                }
                Ok(depth)
            }
            ExprKind::Lambda { params, body } => {
                let body = match body {
                    LambdaBody::Expr(e) => Body::Expr(e),
                    LambdaBody::Block(stmts) => Body::Block(stmts),
                };
                let index = self.function(params, body, expr.span)?;
                self.emit(Instruction::NewClosure(index));
                Ok(1)
            }
            ExprKind::Member { .. } | ExprKind::Object(_) => {
                Err(CompileError::Unsupported { construct: expr.describe(), span: expr.span })
            }
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Result<usize> {
        let argc = u8_limit(args.len(), "call arguments", span)?;
        let direct = match &callee.node {
            ExprKind::Ident(name) => match self.scope.resolve(name, callee.span)? {
                Some(Resolved::Primitive(p)) => {
                    self.require_chapter(p.chapter, name, callee.span)?;
                    Some(Instruction::CallPrimitive { id: p.id, argc })
                }
                Some(Resolved::Internal(i)) => Some(Instruction::CallInternal { id: i.id, argc }),
                _ => None,
            },
            _ => None,
        };
        let (mut depth, base) = match direct {
            Some(_) => (0, 0),
            None => (self.value(callee)?, 1),
        };
        for (i, arg) in args.iter().enumerate() {
            depth = depth.max(base + i + self.value(arg)?);
        }
        self.emit(direct.unwrap_or(Instruction::Call(argc)));
        Ok(depth.max(1))
    }

    fn assign(&mut self, target: &Expr, value: &Expr) -> Result<usize> {
        match &target.node {
            ExprKind::Ident(name) => {
                let depth = self.value(value)?;
                self.emit(Instruction::Dup);
                self.store(name, target.span, false)?;
                Ok(depth.max(2))
            }
            ExprKind::Index { object, index } => {
                let d0 = self.value(object)?;
                let d1 = self.value(index)?;
                let d2 = self.value(value)?;
                self.emit(Instruction::StoreElement);
                Ok(d0.max(1 + d1).max(2 + d2))
            }
            _ => Err(CompileError::Unsupported { construct: target.describe(), span: target.span }),
        }
    }

    fn require_chapter(&self, min: u8, name: &str, span: Span) -> Result<()> {
        if self.chapter.number() < min {
            return Err(CompileError::NotInChapter {
                construct: format!("`{name}`"),
                chapter: self.chapter.number(),
                span,
            });
        }
        Ok(())
    }

    fn load(&mut self, name: &str, span: Span) -> Result<usize> {
        let ins = match self.scope.resolve(name, span)? {
            Some(Resolved::Local { slot, level: 0, .. }) => Instruction::LoadLocal(slot),
            Some(Resolved::Local { slot, level, .. }) => Instruction::LoadParent { slot, level },
            Some(Resolved::Primitive(p)) => {
                self.require_chapter(p.chapter, name, span)?;
                Instruction::NewPrimitiveClosure(p.id)
            }
            Some(Resolved::Internal(i)) => Instruction::NewInternalClosure(i.id),
            Some(Resolved::Constant(Constant::Number(n))) => number(n),
            Some(Resolved::Constant(Constant::Undefined)) => Instruction::LoadUndefined,
            None => return Err(CompileError::UnresolvedName { name: name.to_string(), span }),
        };
        self.emit(ins);
        Ok(1)
    }

    /// Pop the top of stack into `name`. Declarations may initialise
    /// constants; plain assignments may not.
    fn store(&mut self, name: &str, span: Span, declaring: bool) -> Result<()> {
        let ins = match self.scope.resolve(name, span)? {
            Some(Resolved::Local { mutable, .. }) if !mutable && !declaring => {
                return Err(CompileError::AssignToConstant { name: name.to_string(), span });
            }
            Some(Resolved::Local { slot, level: 0, .. }) => Instruction::StoreLocal(slot),
            Some(Resolved::Local { slot, level, .. }) => Instruction::StoreParent { slot, level },
            Some(_) => return Err(CompileError::AssignToConstant { name: name.to_string(), span }),
            None => return Err(CompileError::UnresolvedName { name: name.to_string(), span }),
        };
        self.emit(ins);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};
    use Instruction as I;

    fn compile_src(source: &str) -> Result<bytecode::Program> {
        let (mut program, errors) = parser::parse(lexer::lex(source).unwrap());
        assert!(errors.is_empty(), "{errors:?}");
        program.source = Some(source.to_string());
        compile(&program)
    }

    fn entry_code(source: &str) -> Vec<Instruction> {
        let program = compile_src(source).unwrap();
        program.functions[program.entry as usize].code.clone()
    }

    #[test]
    fn literal_statement() {
        assert_eq!(entry_code("1 + 1;"), vec![I::LoadInt(1), I::LoadInt(1), I::Add, I::Return]);
    }

    #[test]
    fn empty_program_returns_undefined() {
        assert_eq!(entry_code(""), vec![I::LoadUndefined, I::Return]);
    }

    #[test]
    fn narrowest_number_encoding() {
        assert_eq!(number(42.0), I::LoadInt(42));
        assert_eq!(number(-0.0), I::LoadF32(-0.0));
        assert_eq!(number(0.5), I::LoadF32(0.5));
        assert_eq!(number(0.1), I::LoadF64(0.1));
        assert_eq!(number(1e10), I::LoadF32(1e10));
        assert_eq!(number(f64::INFINITY), I::LoadF32(f32::INFINITY));
        assert!(matches!(number(f64::NAN), I::LoadF32(n) if n.is_nan()));
    }

    #[test]
    fn statements_pop_between() {
        assert_eq!(
            entry_code("1; 2;"),
            vec![I::LoadInt(1), I::Pop, I::LoadInt(2), I::Return]
        );
    }

    #[test]
    fn declarations_store_and_yield_undefined() {
        let code = entry_code("const x = 3; x;");
        assert_eq!(
            code,
            vec![I::LoadInt(3), I::StoreLocal(0), I::LoadUndefined, I::Pop, I::LoadLocal(0), I::Return]
        );
    }

    #[test]
    fn conditional_in_tail_position_omits_branch() {
        let code = entry_code("true ? 1 : 2;");
        assert_eq!(
            code,
            vec![I::LoadTrue, I::BranchFalse(3), I::LoadInt(1), I::Return, I::LoadInt(2), I::Return]
        );
    }

    #[test]
    fn conditional_as_operand_branches_over_alternate() {
        let code = entry_code("(true ? 1 : 2) + 3;");
        assert_eq!(
            code,
            vec![
                I::LoadTrue,
                I::BranchFalse(3),
                I::LoadInt(1),
                I::Branch(2),
                I::LoadInt(2),
                I::LoadInt(3),
                I::Add,
                I::Return
            ]
        );
    }

    #[test]
    fn logical_operators_desugar_to_conditionals() {
        let code = entry_code("(false && x) || true;".replace('x', "1").as_str());
        assert_eq!(
            code,
            vec![
                I::LoadFalse,
                I::BranchFalse(3),
                I::LoadInt(1),
                I::Branch(2),
                I::LoadFalse,
                I::BranchFalse(3),
                I::LoadTrue,
                I::Return,
                I::LoadTrue,
                I::Return
            ]
        );
    }

    #[test]
    fn function_declaration_gets_own_record() {
        let program = compile_src("function f(x) { return x; } f(5);").unwrap();
        assert_eq!(program.entry, 0);
        assert_eq!(program.functions.len(), 2);
        let f = &program.functions[1];
        assert_eq!(f.num_args, 1);
        assert_eq!(f.env_size, 1);
        assert_eq!(f.code, vec![I::LoadLocal(0), I::Return]);
        assert_eq!(
            program.functions[0].code,
            vec![
                I::NewClosure(1),
                I::StoreLocal(0),
                I::LoadUndefined,
                I::Pop,
                I::LoadLocal(0),
                I::LoadInt(5),
                I::Call(1),
                I::Return
            ]
        );
    }

    #[test]
    fn function_without_return_yields_undefined() {
        let program = compile_src("function f() { 1; }").unwrap();
        assert_eq!(
            program.functions[1].code,
            vec![I::LoadInt(1), I::Pop, I::LoadUndefined, I::Return]
        );
    }

    #[test]
    fn declarations_are_hoisted() {
        assert!(compile_src("f(); function f() { return 1; }").is_ok());
    }

    #[test]
    fn outer_names_use_parent_loads() {
        let program = compile_src("const a = 1; const f = x => a + x;").unwrap();
        assert_eq!(
            program.functions[1].code,
            vec![I::LoadParent { slot: 0, level: 1 }, I::LoadLocal(0), I::Add, I::Return]
        );
    }

    #[test]
    fn primitives_and_internals() {
        let code = entry_code("display(math_abs(-1));");
        let abs = crate::primitives::lookup_primitive("math_abs").unwrap().id;
        assert_eq!(
            code,
            vec![
                I::LoadInt(1),
                I::Neg,
                I::CallPrimitive { id: abs, argc: 1 },
                I::CallInternal { id: 0, argc: 1 },
                I::Return
            ]
        );
        let code = entry_code("const d = display; math_PI;");
        assert_eq!(code[0], I::NewInternalClosure(0));
        assert_eq!(code[4], I::LoadF64(std::f64::consts::PI));
    }

    #[test]
    fn stack_size_follows_nesting() {
        let program = compile_src("1 + (2 + (3 + 4));").unwrap();
        assert_eq!(program.functions[0].stack_size, 4);
        let program = compile_src("((1 + 2) + 3) + 4;").unwrap();
        assert_eq!(program.functions[0].stack_size, 2);
        let program = compile_src("const f = (a, b, c) => a; f(1, 2, 3);").unwrap();
        assert_eq!(program.functions[0].stack_size, 4);
    }

    #[test]
    fn array_literal() {
        let code = entry_code("[7];");
        assert_eq!(
            code,
            vec![I::NewArray, I::Dup, I::LoadInt(0), I::LoadInt(7), I::StoreElement, I::Pop, I::Return]
        );
    }

    #[test]
    fn array_literal_counts_array_copy_and_index() {
        // array, its copy and the index sit under every element.
        assert_eq!(compile_src("[7];").unwrap().functions[0].stack_size, 4);
        assert_eq!(compile_src("[1, 2 + 3];").unwrap().functions[0].stack_size, 5);
        assert_eq!(compile_src("[[1]];").unwrap().functions[0].stack_size, 7);
    }

    #[test]
    fn while_loop_shape() {
        let code = entry_code("let i = 0; while (i < 3) { i = i + 1; }");
        assert_eq!(
            code,
            vec![
                I::LoadInt(0),
                I::StoreLocal(0),
                I::LoadUndefined,
                I::Pop,
                I::LoadLocal(0),
                I::LoadInt(3),
                I::Lt,
                I::BranchFalse(10),
                I::NewEnv(0),
                I::LoadParent { slot: 0, level: 1 },
                I::LoadInt(1),
                I::Add,
                I::Dup,
                I::StoreParent { slot: 0, level: 1 },
                I::Pop,
                I::PopEnv,
                I::Branch(-12),
                I::LoadUndefined,
                I::Return
            ]
        );
    }

    #[test]
    fn break_and_continue_targets() {
        let code = entry_code("while (true) { if (false) { break; } else { continue; } }");
        let brk = code.iter().position(|i| *i == I::PopEnv).unwrap();
        assert_eq!(code[brk + 1], I::Branch((code.len() - 2 - (brk + 1)) as i32));
        let exit = code.len() - 2;
        assert_eq!(code[exit], I::LoadUndefined);
    }

    #[test]
    fn break_outside_loop() {
        let err = compile_src("function f() { break; }").unwrap_err();
        assert!(matches!(err, CompileError::IllegalBreak { .. }));
        let err = compile_src("while (true) { const g = () => { continue; }; }").unwrap_err();
        assert!(matches!(err, CompileError::IllegalContinue { .. }));
    }

    #[test]
    fn unresolved_name_carries_span() {
        let err = compile_src("1 + nope;").unwrap_err();
        assert_eq!(err, CompileError::UnresolvedName { name: "nope".into(), span: Span::new(4, 8) });
        assert_eq!(err.code(), "SVML-C001");
    }

    #[test]
    fn constants_cannot_be_reassigned() {
        let err = compile_src("const x = 1; x = 2;").unwrap_err();
        assert!(matches!(err, CompileError::AssignToConstant { ref name, .. } if name == "x"));
        let err = compile_src("function f() {} f = 1;").unwrap_err();
        assert!(matches!(err, CompileError::AssignToConstant { .. }));
        let err = compile_src("math_PI = 3;").unwrap_err();
        assert!(matches!(err, CompileError::AssignToConstant { .. }));
        assert!(compile_src("let x = 1; x = 2;").is_ok());
    }

    #[test]
    fn unsupported_constructs() {
        let err = compile_src("const o = { a: 1 };").unwrap_err();
        assert!(matches!(err, CompileError::Unsupported { construct: "object literal", .. }));
        let err = compile_src("const a = [1]; a.length;").unwrap_err();
        assert!(matches!(err, CompileError::Unsupported { construct: "property access", .. }));
        let err = compile_src("for (const x of [1]) { x; }").unwrap_err();
        assert!(matches!(err, CompileError::Unsupported { construct: "for-of loop", .. }));
    }

    #[test]
    fn primitive_chapter_checked() {
        let (program, _) = parser::parse(lexer::lex("pair(1, 2);").unwrap());
        let options = CompileOptions { chapter: Chapter::new(1).unwrap() };
        let err = compile_with(&program, &options).unwrap_err();
        assert!(matches!(err, CompileError::NotInChapter { chapter: 1, .. }));
        let options = CompileOptions { chapter: Chapter::new(2).unwrap() };
        assert!(compile_with(&program, &options).is_ok());
    }

    #[test]
    fn nested_functions_get_later_indices() {
        let program = compile_src("const f = () => () => 1; const g = () => 2;").unwrap();
        assert_eq!(program.functions.len(), 4);
        assert_eq!(program.functions[1].code, vec![I::NewClosure(2), I::Return]);
        assert_eq!(program.functions[3].code, vec![I::LoadInt(2), I::Return]);
    }
}
