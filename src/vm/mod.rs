//! Stack machine over an append-only node heap. Each activation owns an
//! operand-stack node sized by the compiler; environments and return frames
//! are heap nodes too, so closures simply keep an environment address.

pub mod heap;

use std::fmt;

use serde::Serialize;

use crate::bytecode::{Function, Instruction, Program};
use crate::host::{HostError, HostFunction, HostRegistry, Value};
use crate::primitives::{INTERNALS, PRIMITIVES};
use heap::{Addr, Callee, Heap, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapKind {
    DivisionByZero,
    TypeMismatch,
    NotCallable,
    ArityMismatch,
    UserError,
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrapKind::DivisionByZero => "division by zero",
            TrapKind::TypeMismatch => "type mismatch",
            TrapKind::NotCallable => "not callable",
            TrapKind::ArityMismatch => "arity mismatch",
            TrapKind::UserError => "error",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("{kind}: {value}")]
    Trap { kind: TrapKind, value: Value },
    #[error("operand stack overflow in function #{func}")]
    OperandStackOverflow { func: u32 },
    #[error("operand stack underflow in function #{func}")]
    OperandStackUnderflow { func: u32 },
    #[error("no heap node at address {addr}")]
    BadAddress { addr: u32 },
    #[error("expected {expected} at address {addr}, found {found}")]
    BadNode { addr: u32, expected: &'static str, found: &'static str },
    #[error("no function with index {index}")]
    BadFunction { index: u32 },
    #[error("environment slot {slot} out of range")]
    BadSlot { slot: u8 },
    #[error("environment chain shorter than {level}")]
    BadLevel { level: u8 },
    #[error("unknown primitive {id}")]
    UnknownPrimitive { id: u8 },
    #[error("unknown internal function {id}")]
    UnknownInternal { id: u8 },
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("pc {pc} outside function #{func}")]
    PcOutOfRange { func: u32, pc: usize },
    #[error("array at address {addr} has length {length}, too long to convert to a host value")]
    ArrayTooLong { addr: u32, length: usize },
}

/// Failure inside an instruction. Traps still refer to heap nodes; they are
/// converted to host values when the run stops.
#[derive(Debug)]
pub enum Fault {
    Trap { kind: TrapKind, value: Addr },
    Internal(VmError),
}

impl From<VmError> for Fault {
    fn from(e: VmError) -> Self {
        Fault::Internal(e)
    }
}

type Step<T> = Result<T, Fault>;

fn bad_node(addr: Addr, expected: &'static str, found: &Node) -> VmError {
    VmError::BadNode { addr: addr.0, expected, found: found.tag() }
}

fn trap(kind: TrapKind, value: Addr) -> Fault {
    Fault::Trap { kind, value }
}

/// Registers of one run.
struct VmState {
    heap: Heap,
    pc: usize,
    func: u32,
    env: Addr,
    os: Addr,
    /// Addresses of `ReturnFrame` nodes, innermost last.
    rts: Vec<Addr>,
    trap: Option<TrapKind>,
}

pub struct Machine<'p> {
    program: &'p Program,
    host: &'p HostRegistry,
    state: VmState,
    internals: Vec<Option<HostFunction>>,
    peaks: Vec<usize>,
}

/// Compile-free entry point: run `program` to completion on a fresh machine.
pub fn execute(program: &Program, host: &HostRegistry) -> Result<Value, VmError> {
    Machine::new(program, host)?.run()
}

impl<'p> Machine<'p> {
    pub fn new(program: &'p Program, host: &'p HostRegistry) -> Result<Self, VmError> {
        let entry = program.entry_function().ok_or(VmError::BadFunction { index: program.entry })?;
        let mut heap = Heap::new();
        let env = heap.alloc(Node::Environment { parent: None, slots: vec![heap.undefined(); entry.env_size as usize] });
        let os = heap.alloc(Node::OperandStack { slots: Vec::new(), capacity: entry.stack_size as usize });
        Ok(Machine {
            program,
            host,
            state: VmState { heap, pc: 0, func: program.entry, env, os, rts: Vec::new(), trap: None },
            internals: vec![None; INTERNALS.len()],
            peaks: vec![0; program.functions.len()],
        })
    }

    /// Return-address stack depth; zero after a completed run.
    pub fn rts_depth(&self) -> usize {
        self.state.rts.len()
    }

    pub fn heap_size(&self) -> usize {
        self.state.heap.len()
    }

    /// Deepest operand stack observed per function index.
    pub fn peak_depths(&self) -> &[usize] {
        &self.peaks
    }

    /// The trap that stopped the last run, if any.
    pub fn trapped(&self) -> Option<TrapKind> {
        self.state.trap
    }

    pub fn run(&mut self) -> Result<Value, VmError> {
        tracing::debug!(functions = self.program.functions.len(), entry = self.program.entry, "vm start");
        let program = self.program;
        loop {
            let func = self.state.func;
            let function = self.function(func)?;
            let pc = self.state.pc;
            let ins = function.code.get(pc).ok_or(VmError::PcOutOfRange { func, pc })?;
            self.state.pc = pc + 1;
            match self.step(program, ins, pc) {
                Ok(None) => {}
                Ok(Some(result)) => {
                    tracing::debug!(heap = self.state.heap.len(), "vm finished");
                    return self.state.heap.to_value(result);
                }
                Err(Fault::Trap { kind, value }) => {
                    self.push(value)?;
                    self.state.trap = Some(kind);
                    let value = self.pop()?;
                    tracing::debug!(%kind, func, pc, "vm trapped");
                    return Err(VmError::Trap { kind, value: self.state.heap.to_value(value)? });
                }
                Err(Fault::Internal(e)) => return Err(e),
            }
        }
    }

    fn function(&self, index: u32) -> Result<&'p Function, VmError> {
        self.program.functions.get(index as usize).ok_or(VmError::BadFunction { index })
    }

    // ── Operand stack ───────────────────────────────────────────────

    fn push(&mut self, value: Addr) -> Result<(), VmError> {
        let (func, os) = (self.state.func, self.state.os);
        match self.state.heap.get_mut(os)? {
            Node::OperandStack { slots, capacity } => {
                if slots.len() >= *capacity {
                    return Err(VmError::OperandStackOverflow { func });
                }
                slots.push(value);
                if let Some(peak) = self.peaks.get_mut(func as usize) {
                    *peak = (*peak).max(slots.len());
                }
                Ok(())
            }
            other => Err(bad_node(os, "operand stack", other)),
        }
    }

    fn pop(&mut self) -> Result<Addr, VmError> {
        let (func, os) = (self.state.func, self.state.os);
        match self.state.heap.get_mut(os)? {
            Node::OperandStack { slots, .. } => slots.pop().ok_or(VmError::OperandStackUnderflow { func }),
            other => Err(bad_node(os, "operand stack", other)),
        }
    }

    fn peek(&self) -> Result<Addr, VmError> {
        let os = self.state.os;
        match self.state.heap.get(os)? {
            Node::OperandStack { slots, .. } => {
                slots.last().copied().ok_or(VmError::OperandStackUnderflow { func: self.state.func })
            }
            other => Err(bad_node(os, "operand stack", other)),
        }
    }

    /// Pop `argc` values, returned in push order.
    fn pop_args(&mut self, argc: u8) -> Result<Vec<Addr>, VmError> {
        let mut args = vec![Addr(0); argc as usize];
        for slot in args.iter_mut().rev() {
            *slot = self.pop()?;
        }
        Ok(args)
    }

    // ── Environments ────────────────────────────────────────────────

    fn env_at(&self, level: u8) -> Result<Addr, VmError> {
        let mut env = self.state.env;
        for _ in 0..level {
            env = match self.state.heap.get(env)? {
                Node::Environment { parent: Some(parent), .. } => *parent,
                Node::Environment { parent: None, .. } => return Err(VmError::BadLevel { level }),
                other => return Err(bad_node(env, "environment", other)),
            };
        }
        Ok(env)
    }

    fn load(&self, slot: u8, level: u8) -> Result<Addr, VmError> {
        let env = self.env_at(level)?;
        match self.state.heap.get(env)? {
            Node::Environment { slots, .. } => slots.get(slot as usize).copied().ok_or(VmError::BadSlot { slot }),
            other => Err(bad_node(env, "environment", other)),
        }
    }

    fn store(&mut self, slot: u8, level: u8, value: Addr) -> Result<(), VmError> {
        let env = self.env_at(level)?;
        match self.state.heap.get_mut(env)? {
            Node::Environment { slots, .. } => {
                *slots.get_mut(slot as usize).ok_or(VmError::BadSlot { slot })? = value;
                Ok(())
            }
            other => Err(bad_node(env, "environment", other)),
        }
    }

    fn new_env(&mut self, parent: Option<Addr>, size: usize) -> Addr {
        let undefined = self.state.heap.undefined();
        self.state.heap.alloc(Node::Environment { parent, slots: vec![undefined; size] })
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Execute one instruction fetched at `pc`; `state.pc` already points
    /// past it. Returns the result once the entry function returns.
    fn step(&mut self, program: &'p Program, ins: &Instruction, pc: usize) -> Step<Option<Addr>> {
        use Instruction as I;
        match ins {
            I::LoadInt(v) => self.push_number(*v as f64)?,
            I::LoadF32(v) => self.push_number(*v as f64)?,
            I::LoadF64(v) => self.push_number(*v)?,
            I::LoadFalse => self.push(self.state.heap.boolean(false))?,
            I::LoadTrue => self.push(self.state.heap.boolean(true))?,
            I::LoadUndefined => self.push(self.state.heap.undefined())?,
            I::LoadNull => self.push(self.state.heap.null())?,
            I::LoadString(s) => {
                let addr = self.state.heap.string(s.as_str());
                self.push(addr)?;
            }
            I::Pop => {
                self.pop()?;
            }
            I::Add => {
                let (a, b) = self.pop_pair()?;
                let heap = &self.state.heap;
                let result = match (heap.get(a)?, heap.get(b)?) {
                    (Node::Number(x), Node::Number(y)) => Node::Number(x + y),
                    (Node::String(x), Node::String(y)) => Node::String(format!("{x}{y}").into()),
                    (Node::Number(_) | Node::String(_), _) => return Err(trap(TrapKind::TypeMismatch, b)),
                    _ => return Err(trap(TrapKind::TypeMismatch, a)),
                };
                let addr = self.state.heap.alloc(result);
                self.push(addr)?;
            }
            I::Sub => self.arithmetic(|x, y| x - y, false)?,
            I::Mul => self.arithmetic(|x, y| x * y, false)?,
            I::Div => self.arithmetic(|x, y| x / y, true)?,
            I::Mod => self.arithmetic(|x, y| x % y, true)?,
            I::Neg => {
                let a = self.pop()?;
                let x = self.state.heap.number_of(a)?;
                self.push_number(-x)?;
            }
            I::Not => {
                let a = self.pop()?;
                let b = self.state.heap.bool_of(a)?;
                self.push(self.state.heap.boolean(!b))?;
            }
            I::Lt => self.compare(|o| o.is_lt())?,
            I::Gt => self.compare(|o| o.is_gt())?,
            I::Le => self.compare(|o| o.is_le())?,
            I::Ge => self.compare(|o| o.is_ge())?,
            I::Eq | I::Neq => {
                let (a, b) = self.pop_pair()?;
                let equal = self.state.heap.strict_equals(a, b)?;
                self.push(self.state.heap.boolean(equal == matches!(ins, I::Eq)))?;
            }
            I::NewClosure(index) => {
                self.function(*index)?;
                let env = Some(self.state.env);
                let addr = self.state.heap.alloc(Node::Closure { callee: Callee::Function(*index), env });
                self.push(addr)?;
            }
            I::NewArray => {
                let addr = self.state.heap.array(Vec::new());
                self.push(addr)?;
            }
            I::LoadLocal(slot) => self.push(self.load(*slot, 0)?)?,
            I::StoreLocal(slot) => {
                let value = self.pop()?;
                self.store(*slot, 0, value)?;
            }
            I::LoadParent { slot, level } => self.push(self.load(*slot, *level)?)?,
            I::StoreParent { slot, level } => {
                let value = self.pop()?;
                self.store(*slot, *level, value)?;
            }
            I::LoadElement => {
                let (array, index) = self.pop_pair()?;
                let index = self.state.heap.index_of(index)?;
                let value = self.state.heap.array_get(array, index)?;
                self.push(value)?;
            }
            I::StoreElement => {
                let value = self.pop()?;
                let (array, index) = self.pop_pair()?;
                let index = self.state.heap.index_of(index)?;
                self.state.heap.array_set(array, index, value)?;
                self.push(value)?;
            }
            I::BranchTrue(offset) | I::BranchFalse(offset) => {
                let cond = self.pop()?;
                if self.state.heap.bool_of(cond)? == matches!(ins, I::BranchTrue(_)) {
                    self.jump(pc, *offset);
                }
            }
            I::Branch(offset) => self.jump(pc, *offset),
            I::Call(argc) => {
                let args = self.pop_args(*argc)?;
                let callee = self.pop()?;
                self.call(program, callee, args)?;
            }
            I::CallPrimitive { id, argc } => {
                let args = self.pop_args(*argc)?;
                self.call_primitive(*id, &args)?;
            }
            I::CallInternal { id, argc } => {
                let args = self.pop_args(*argc)?;
                self.call_internal(*id, &args)?;
            }
            I::Return => {
                let value = self.pop()?;
                return match self.state.rts.pop() {
                    None => Ok(Some(value)),
                    Some(frame) => {
                        self.restore(frame)?;
                        self.push(value)?;
                        Ok(None)
                    }
                };
            }
            I::Dup => self.push(self.peek()?)?,
            I::NewEnv(size) => {
                self.state.env = self.new_env(Some(self.state.env), *size as usize);
            }
            I::PopEnv => self.state.env = self.env_at(1)?,
            I::NewPrimitiveClosure(id) => {
                PRIMITIVES.get(*id as usize).ok_or(VmError::UnknownPrimitive { id: *id })?;
                let addr = self.state.heap.alloc(Node::Closure { callee: Callee::Primitive(*id), env: None });
                self.push(addr)?;
            }
            I::NewInternalClosure(id) => {
                INTERNALS.get(*id as usize).ok_or(VmError::UnknownInternal { id: *id })?;
                let addr = self.state.heap.alloc(Node::Closure { callee: Callee::Internal(*id), env: None });
                self.push(addr)?;
            }
        }
        Ok(None)
    }

    fn jump(&mut self, pc: usize, offset: i32) {
        self.state.pc = (pc as i64 + offset as i64) as usize;
    }

    fn push_number(&mut self, n: f64) -> Result<(), VmError> {
        let addr = self.state.heap.number(n);
        self.push(addr)
    }

    /// Pop the right operand, then the left; returned as `(left, right)`.
    fn pop_pair(&mut self) -> Result<(Addr, Addr), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    fn arithmetic(&mut self, op: fn(f64, f64) -> f64, divides: bool) -> Step<()> {
        let (a, b) = self.pop_pair()?;
        let x = self.state.heap.number_of(a)?;
        let y = self.state.heap.number_of(b)?;
        if divides && y == 0.0 {
            return Err(trap(TrapKind::DivisionByZero, b));
        }
        self.push_number(op(x, y))?;
        Ok(())
    }

    /// Two numbers or two strings.
    fn compare(&mut self, test: fn(std::cmp::Ordering) -> bool) -> Step<()> {
        let (a, b) = self.pop_pair()?;
        let heap = &self.state.heap;
        let result = match (heap.get(a)?, heap.get(b)?) {
            (Node::Number(x), Node::Number(y)) => x.partial_cmp(y).is_some_and(test),
            (Node::String(x), Node::String(y)) => test(x.cmp(y)),
            (Node::Number(_) | Node::String(_), _) => return Err(trap(TrapKind::TypeMismatch, b)),
            _ => return Err(trap(TrapKind::TypeMismatch, a)),
        };
        self.push(self.state.heap.boolean(result))?;
        Ok(())
    }

    // ── Calls ───────────────────────────────────────────────────────

    fn call(&mut self, program: &'p Program, callee: Addr, args: Vec<Addr>) -> Step<()> {
        let (target, captured) = match self.state.heap.get(callee)? {
            Node::Closure { callee, env } => (*callee, *env),
            _ => return Err(trap(TrapKind::NotCallable, callee)),
        };
        let index = match target {
            Callee::Function(index) => index,
            Callee::Primitive(id) => return self.call_primitive(id, &args),
            Callee::Internal(id) => return self.call_internal(id, &args),
        };
        let function = program.functions.get(index as usize).ok_or(VmError::BadFunction { index })?;
        if function.num_args as usize != args.len() {
            return Err(trap(TrapKind::ArityMismatch, callee));
        }

        let env = self.new_env(captured, (function.env_size as usize).max(args.len()));
        if let Node::Environment { slots, .. } = self.state.heap.get_mut(env)? {
            slots[..args.len()].copy_from_slice(&args);
        }
        let os = self.state.heap.alloc(Node::OperandStack {
            slots: Vec::new(),
            capacity: function.stack_size as usize,
        });
        let frame = self.state.heap.alloc(Node::ReturnFrame {
            pc: self.state.pc,
            env: self.state.env,
            os: self.state.os,
            func: self.state.func,
        });
        self.state.rts.push(frame);
        tracing::trace!(func = index, depth = self.state.rts.len(), "call");

        self.state.func = index;
        self.state.pc = 0;
        self.state.env = env;
        self.state.os = os;
        Ok(())
    }

    fn restore(&mut self, frame: Addr) -> Result<(), VmError> {
        match self.state.heap.get(frame)? {
            Node::ReturnFrame { pc, env, os, func } => {
                tracing::trace!(from = self.state.func, to = *func, depth = self.state.rts.len(), "return");
                self.state.pc = *pc;
                self.state.env = *env;
                self.state.os = *os;
                self.state.func = *func;
                Ok(())
            }
            other => Err(bad_node(frame, "return frame", other)),
        }
    }

    fn call_primitive(&mut self, id: u8, args: &[Addr]) -> Step<()> {
        let primitive = PRIMITIVES.get(id as usize).ok_or(VmError::UnknownPrimitive { id })?;
        if !primitive.arity.accepts(args.len()) {
            let closure = self.state.heap.alloc(Node::Closure { callee: Callee::Primitive(id), env: None });
            return Err(trap(TrapKind::ArityMismatch, closure));
        }
        let result = (primitive.call)(&mut self.state.heap, args)?;
        self.push(result)?;
        Ok(())
    }

    /// Host functions are looked up by name on first use in a run.
    fn call_internal(&mut self, id: u8, args: &[Addr]) -> Step<()> {
        let internal = INTERNALS.get(id as usize).ok_or(VmError::UnknownInternal { id })?;
        let function = match &self.internals[id as usize] {
            Some(f) => f.clone(),
            None => {
                let f = self.host.function(internal.name).map_err(VmError::from)?;
                self.internals[id as usize] = Some(f.clone());
                f
            }
        };
        let values = args
            .iter()
            .map(|a| self.state.heap.to_value(*a))
            .collect::<Result<Vec<_>, _>>()?;
        match function(&values) {
            Ok(result) => {
                let addr = if internal.yields_argument {
                    args.first().copied().unwrap_or(self.state.heap.undefined())
                } else {
                    self.state.heap.from_value(&result)
                };
                self.push(addr)?;
                Ok(())
            }
            Err(raised) => {
                let value = self.state.heap.from_value(&raised);
                Err(trap(TrapKind::UserError, value))
            }
        }
    }
}
