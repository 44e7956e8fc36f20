//! Append-only arena of tagged nodes. Addresses are arena indices and stay
//! valid for the whole run; nothing is ever freed.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;

use super::{Fault, TrapKind, VmError};
use crate::host::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(pub u32);

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// What a closure invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    Function(u32),
    Primitive(u8),
    Internal(u8),
}

#[derive(Debug, Clone)]
pub enum Node {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Elements),
    Closure { callee: Callee, env: Option<Addr> },
    Environment { parent: Option<Addr>, slots: Vec<Addr> },
    /// The top of the stack is `slots.last()`.
    OperandStack { slots: Vec<Addr>, capacity: usize },
    ReturnFrame { pc: usize, env: Addr, os: Addr, func: u32 },
}

/// Writes this far past the dense prefix extend it; anything further out is
/// stored sparsely.
const DENSE_GAP: usize = 64;

/// Longest array that can be converted to a host [`Value`].
pub const MAX_HOST_ARRAY_LENGTH: usize = 1 << 24;

/// Array storage with a logical length. Indices near the front live in a
/// dense prefix; far writes such as `a[4294967295] = 1` cost one map entry.
#[derive(Debug, Clone, Default)]
pub struct Elements {
    dense: Vec<Option<Addr>>,
    sparse: BTreeMap<usize, Addr>,
    length: usize,
}

impl Elements {
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// `None` for holes and indices at or past the length.
    pub fn get(&self, index: usize) -> Option<Addr> {
        match self.dense.get(index) {
            Some(slot) => *slot,
            None => self.sparse.get(&index).copied(),
        }
    }

    /// The length becomes `max(length, index + 1)`.
    pub fn set(&mut self, index: usize, value: Addr) {
        let dense_len = self.dense.len();
        if index < dense_len {
            self.dense[index] = Some(value);
        } else if index - dense_len <= DENSE_GAP {
            self.dense.resize(index + 1, None);
            self.dense[index] = Some(value);
            let beyond = self.sparse.split_off(&self.dense.len());
            for (i, addr) in std::mem::replace(&mut self.sparse, beyond) {
                self.dense[i] = Some(addr);
            }
        } else {
            self.sparse.insert(index, value);
        }
        self.length = self.length.max(index + 1);
    }

    /// Number of indices actually holding a value.
    pub fn stored(&self) -> usize {
        self.dense.iter().flatten().count() + self.sparse.len()
    }
}

impl From<Vec<Option<Addr>>> for Elements {
    fn from(dense: Vec<Option<Addr>>) -> Self {
        Elements { length: dense.len(), dense, sparse: BTreeMap::new() }
    }
}

impl Node {
    pub fn tag(&self) -> &'static str {
        match self {
            Node::Undefined => "undefined",
            Node::Null => "null",
            Node::Bool(_) => "boolean",
            Node::Number(_) => "number",
            Node::String(_) => "string",
            Node::Array(_) => "array",
            Node::Closure { .. } => "function",
            Node::Environment { .. } => "environment",
            Node::OperandStack { .. } => "operand stack",
            Node::ReturnFrame { .. } => "return frame",
        }
    }
}

pub struct Heap {
    nodes: Vec<Node>,
}

const UNDEFINED: Addr = Addr(0);
const NULL: Addr = Addr(1);
const FALSE: Addr = Addr(2);
const TRUE: Addr = Addr(3);

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    /// A heap holding the shared `undefined`, `null`, `false` and `true` nodes.
    pub fn new() -> Self {
        Heap { nodes: vec![Node::Undefined, Node::Null, Node::Bool(false), Node::Bool(true)] }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn alloc(&mut self, node: Node) -> Addr {
        let addr = Addr(self.nodes.len() as u32);
        self.nodes.push(node);
        addr
    }

    pub fn get(&self, addr: Addr) -> Result<&Node, VmError> {
        self.nodes.get(addr.0 as usize).ok_or(VmError::BadAddress { addr: addr.0 })
    }

    pub fn get_mut(&mut self, addr: Addr) -> Result<&mut Node, VmError> {
        self.nodes.get_mut(addr.0 as usize).ok_or(VmError::BadAddress { addr: addr.0 })
    }

    pub fn undefined(&self) -> Addr {
        UNDEFINED
    }

    pub fn null(&self) -> Addr {
        NULL
    }

    pub fn boolean(&self, b: bool) -> Addr {
        if b { TRUE } else { FALSE }
    }

    pub fn number(&mut self, n: f64) -> Addr {
        self.alloc(Node::Number(n))
    }

    pub fn string(&mut self, s: impl Into<Rc<str>>) -> Addr {
        self.alloc(Node::String(s.into()))
    }

    pub fn array(&mut self, elements: Vec<Option<Addr>>) -> Addr {
        self.alloc(Node::Array(elements.into()))
    }

    // ── Typed access ────────────────────────────────────────────────

    fn mismatch(addr: Addr) -> Fault {
        Fault::Trap { kind: TrapKind::TypeMismatch, value: addr }
    }

    pub fn number_of(&self, addr: Addr) -> Result<f64, Fault> {
        match self.get(addr)? {
            Node::Number(n) => Ok(*n),
            _ => Err(Self::mismatch(addr)),
        }
    }

    pub fn bool_of(&self, addr: Addr) -> Result<bool, Fault> {
        match self.get(addr)? {
            Node::Bool(b) => Ok(*b),
            _ => Err(Self::mismatch(addr)),
        }
    }

    pub fn string_of(&self, addr: Addr) -> Result<Rc<str>, Fault> {
        match self.get(addr)? {
            Node::String(s) => Ok(Rc::clone(s)),
            _ => Err(Self::mismatch(addr)),
        }
    }

    pub fn elements_of(&self, addr: Addr) -> Result<&Elements, Fault> {
        match self.get(addr)? {
            Node::Array(elements) => Ok(elements),
            _ => Err(Self::mismatch(addr)),
        }
    }

    pub fn is_tag(&self, addr: Addr, tag: &str) -> Result<bool, VmError> {
        Ok(self.get(addr)?.tag() == tag)
    }

    /// A non-negative integral number usable as an array index.
    pub fn index_of(&self, addr: Addr) -> Result<usize, Fault> {
        let n = self.number_of(addr)?;
        if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 {
            Ok(n as usize)
        } else {
            Err(Self::mismatch(addr))
        }
    }

    // ── Arrays ──────────────────────────────────────────────────────

    /// Unset or out-of-range indices read as `undefined`.
    pub fn array_get(&self, array: Addr, index: usize) -> Result<Addr, Fault> {
        Ok(self.elements_of(array)?.get(index).unwrap_or(UNDEFINED))
    }

    /// Writing past the end grows the logical length to `index + 1`.
    pub fn array_set(&mut self, array: Addr, index: usize, value: Addr) -> Result<(), Fault> {
        match self.get_mut(array)? {
            Node::Array(elements) => {
                elements.set(index, value);
                Ok(())
            }
            _ => Err(Self::mismatch(array)),
        }
    }

    // ── Equality ────────────────────────────────────────────────────

    /// Same node, or equal primitive payloads under the same tag.
    pub fn strict_equals(&self, a: Addr, b: Addr) -> Result<bool, VmError> {
        if a == b {
            return Ok(true);
        }
        Ok(match (self.get(a)?, self.get(b)?) {
            (Node::Number(x), Node::Number(y)) => x == y,
            (Node::String(x), Node::String(y)) => x == y,
            (Node::Bool(x), Node::Bool(y)) => x == y,
            (Node::Undefined, Node::Undefined) | (Node::Null, Node::Null) => true,
            _ => false,
        })
    }

    // ── Host conversion ─────────────────────────────────────────────

    /// Arrays are walked with an explicit stack, so nesting depth is bounded
    /// by memory rather than by the native stack. An array reached again
    /// through its own elements becomes [`Value::Circular`].
    pub fn to_value(&self, addr: Addr) -> Result<Value, VmError> {
        let mut stack: Vec<Frame<'_>> = Vec::new();
        let mut open = HashSet::new();
        let mut done = self.enter(addr, &mut stack, &mut open)?;
        while let Some(frame) = stack.last_mut() {
            if let Some(value) = done.take() {
                frame.items.push(value);
            }
            let (elements, index) = (frame.elements, frame.next);
            frame.next += 1;
            done = if index < elements.len() {
                match elements.get(index) {
                    Some(child) => self.enter(child, &mut stack, &mut open)?,
                    None => Some(Value::Undefined),
                }
            } else {
                stack.pop().map(|finished| {
                    open.remove(&finished.addr);
                    Value::Array(finished.items)
                })
            };
        }
        done.ok_or(VmError::BadAddress { addr: addr.0 })
    }

    /// Converts a non-array node directly; an array opens a new frame and
    /// yields `None` until its elements are done.
    fn enter<'h>(
        &'h self,
        addr: Addr,
        stack: &mut Vec<Frame<'h>>,
        open: &mut HashSet<Addr>,
    ) -> Result<Option<Value>, VmError> {
        Ok(Some(match self.get(addr)? {
            Node::Undefined => Value::Undefined,
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(*n),
            Node::String(s) => Value::Text(s.to_string()),
            Node::Array(elements) => {
                if !open.insert(addr) {
                    return Ok(Some(Value::Circular));
                }
                if elements.len() > MAX_HOST_ARRAY_LENGTH {
                    return Err(VmError::ArrayTooLong { addr: addr.0, length: elements.len() });
                }
                stack.push(Frame { addr, elements, next: 0, items: Vec::with_capacity(elements.len()) });
                return Ok(None);
            }
            Node::Closure { callee, .. } => Value::Function(match callee {
                Callee::Function(idx) => format!("#{idx}"),
                Callee::Primitive(id) => crate::primitives::name_of(*id).to_string(),
                Callee::Internal(id) => crate::primitives::internal_name_of(*id).to_string(),
            }),
            other => {
                return Err(VmError::BadNode { addr: addr.0, expected: "value", found: other.tag() });
            }
        }))
    }

    /// Host functions cannot be turned back into closures; they become `undefined`.
    /// Arrays are allocated before their elements and filled in as each child
    /// is built.
    pub fn from_value(&mut self, value: &Value) -> Addr {
        let mut pending: Vec<(Addr, &[Value], usize)> = Vec::new();
        let root = self.shallow(value, &mut pending);
        while let Some(top) = pending.last_mut() {
            let (array, items, index) = *top;
            if index == items.len() {
                pending.pop();
                continue;
            }
            top.2 += 1;
            let child = self.shallow(&items[index], &mut pending);
            if let Some(Node::Array(elements)) = self.nodes.get_mut(array.0 as usize) {
                elements.set(index, child);
            }
        }
        root
    }

    fn shallow<'v>(&mut self, value: &'v Value, pending: &mut Vec<(Addr, &'v [Value], usize)>) -> Addr {
        match value {
            Value::Undefined | Value::Function(_) | Value::Circular => UNDEFINED,
            Value::Null => NULL,
            Value::Bool(b) => self.boolean(*b),
            Value::Number(n) => self.number(*n),
            Value::Text(s) => self.string(s.as_str()),
            Value::Array(items) => {
                let addr = self.array(vec![None; items.len()]);
                pending.push((addr, items, 0));
                addr
            }
        }
    }
}

/// An array being converted by [`Heap::to_value`].
struct Frame<'h> {
    addr: Addr,
    elements: &'h Elements,
    next: usize,
    items: Vec<Value>,
}
