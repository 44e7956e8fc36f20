//! Host-side values and the binding registry used for externally implemented
//! functions (`display`, `error`, `draw_data`) and state that outlives a run.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A value as seen from outside the VM.
///
/// Arrays can nest as deep as the program built them (a long list is one
/// nested pair per element), so printing, cloning, comparing and dropping all
/// walk arrays with an explicit stack.
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Array(Vec<Value>),
    /// Closures cannot leave the VM; only a description of the target survives.
    Function(String),
    /// An array that (transitively) contains itself.
    Circular,
}

fn fmt_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_nan() {
        write!(f, "NaN")
    } else if n.is_infinite() {
        write!(f, "{}", if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n == 0.0 {
        write!(f, "0")
    } else {
        write!(f, "{}", n)
    }
}

enum Piece<'a> {
    Item(&'a Value),
    Punct(&'static str),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending = vec![Piece::Item(self)];
        while let Some(piece) = pending.pop() {
            match piece {
                Piece::Punct(s) => f.write_str(s)?,
                Piece::Item(Value::Array(items)) => {
                    pending.push(Piece::Punct("]"));
                    for (i, item) in items.iter().enumerate().rev() {
                        pending.push(Piece::Item(item));
                        if i > 0 {
                            pending.push(Piece::Punct(", "));
                        }
                    }
                    pending.push(Piece::Punct("["));
                }
                Piece::Item(Value::Undefined) => f.write_str("undefined")?,
                Piece::Item(Value::Null) => f.write_str("null")?,
                Piece::Item(Value::Bool(b)) => write!(f, "{}", b)?,
                Piece::Item(Value::Number(n)) => fmt_number(*n, f)?,
                Piece::Item(Value::Text(s)) => write!(f, "{:?}", s)?,
                Piece::Item(Value::Function(name)) => write!(f, "<function {}>", name)?,
                Piece::Item(Value::Circular) => f.write_str("<circular>")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        let Value::Array(root) = self else {
            return self.clone_scalar();
        };
        // Each frame is the unvisited rest of an array and its copy so far.
        let mut stack: Vec<(&[Value], Vec<Value>)> = vec![(root.as_slice(), Vec::with_capacity(root.len()))];
        while let Some((rest, built)) = stack.last_mut() {
            let current: &[Value] = *rest;
            match current.split_first() {
                Some((Value::Array(children), tail)) => {
                    *rest = tail;
                    stack.push((children.as_slice(), Vec::with_capacity(children.len())));
                }
                Some((item, tail)) => {
                    *rest = tail;
                    built.push(item.clone_scalar());
                }
                None => {
                    let finished = Value::Array(std::mem::take(built));
                    stack.pop();
                    match stack.last_mut() {
                        Some((_, parent)) => parent.push(finished),
                        None => return finished,
                    }
                }
            }
        }
        Value::Array(Vec::new())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some(pair) = pending.pop() {
            match pair {
                (Value::Array(a), Value::Array(b)) => {
                    if a.len() != b.len() {
                        return false;
                    }
                    pending.extend(a.iter().zip(b));
                }
                (Value::Undefined, Value::Undefined)
                | (Value::Null, Value::Null)
                | (Value::Circular, Value::Circular) => {}
                (Value::Bool(a), Value::Bool(b)) if a == b => {}
                (Value::Number(a), Value::Number(b)) if a == b => {}
                (Value::Text(a), Value::Text(b)) if a == b => {}
                (Value::Function(a), Value::Function(b)) if a == b => {}
                _ => return false,
            }
        }
        true
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        let Value::Array(items) = self else { return };
        if !items.iter().any(|item| matches!(item, Value::Array(_))) {
            return;
        }
        let mut pending = std::mem::take(items);
        while let Some(mut item) = pending.pop() {
            if let Value::Array(children) = &mut item {
                pending.append(children);
            }
        }
    }
}

impl Value {
    /// Copy of a non-array value; arrays come back empty.
    fn clone_scalar(&self) -> Value {
        match self {
            Value::Undefined => Value::Undefined,
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            Value::Number(n) => Value::Number(*n),
            Value::Text(s) => Value::Text(s.clone()),
            Value::Function(name) => Value::Function(name.clone()),
            Value::Circular => Value::Circular,
            Value::Array(_) => Value::Array(Vec::new()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Array(_) => "array",
            Value::Function(_) => "function",
            Value::Circular => "array",
        }
    }

    /// Text as it appears in `display` output: strings print bare at the top level.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// `Ok` is the call's result; `Err` carries the value of a user-raised error.
pub type HostFunction = Rc<dyn Fn(&[Value]) -> Result<Value, Value>>;

#[derive(Clone)]
pub enum HostValue {
    Data(Value),
    Function(HostFunction),
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Data(v) => f.debug_tuple("Data").field(v).finish(),
            HostValue::Function(_) => f.write_str("Function(..)"),
        }
    }
}

type Getter = Box<dyn Fn() -> HostValue>;
type Setter = Box<dyn Fn(HostValue)>;

struct Accessor {
    get: Getter,
    set: Option<Setter>,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("unknown host binding '{name}'")]
    UnknownBinding { name: String },
    #[error("host binding '{name}' is read-only")]
    ReadOnly { name: String },
    #[error("host binding '{name}' is not a function")]
    NotAFunction { name: String },
}

/// Name-keyed table of `(get, optional set)` accessors.
#[derive(Default)]
pub struct HostRegistry {
    bindings: HashMap<String, Accessor>,
}

impl HostRegistry {
    pub fn new() -> Self {
        HostRegistry::default()
    }

    /// A mutable data binding whose value persists across runs.
    pub fn define_value(&mut self, name: &str, value: Value) {
        let cell = Rc::new(RefCell::new(HostValue::Data(value)));
        let reader = Rc::clone(&cell);
        self.define_accessor(
            name,
            Box::new(move || reader.borrow().clone()),
            Some(Box::new(move |v| *cell.borrow_mut() = v)),
        );
    }

    /// A read-only function binding.
    pub fn define_function<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, Value> + 'static,
    {
        let f: HostFunction = Rc::new(f);
        self.define_accessor(name, Box::new(move || HostValue::Function(Rc::clone(&f))), None);
    }

    pub fn define_accessor(&mut self, name: &str, get: Getter, set: Option<Setter>) {
        self.bindings.insert(name.to_string(), Accessor { get, set });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<HostValue, HostError> {
        self.bindings
            .get(name)
            .map(|acc| (acc.get)())
            .ok_or_else(|| HostError::UnknownBinding { name: name.to_string() })
    }

    pub fn set(&self, name: &str, value: HostValue) -> Result<(), HostError> {
        let acc = self
            .bindings
            .get(name)
            .ok_or_else(|| HostError::UnknownBinding { name: name.to_string() })?;
        match &acc.set {
            Some(set) => {
                set(value);
                Ok(())
            }
            None => Err(HostError::ReadOnly { name: name.to_string() }),
        }
    }

    pub fn function(&self, name: &str) -> Result<HostFunction, HostError> {
        match self.get(name)? {
            HostValue::Function(f) => Ok(f),
            HostValue::Data(_) => Err(HostError::NotAFunction { name: name.to_string() }),
        }
    }

    /// `display` prints to stdout, `error` raises its argument and `draw_data`
    /// logs the structure it is given.
    pub fn standard() -> Self {
        let mut host = HostRegistry::new();
        host.define_function("display", |args| {
            println!("{}", display_line(args));
            Ok(first(args))
        });
        host.define_function("error", |args| Err(error_value(args)));
        host.define_function("draw_data", |args| {
            for arg in args {
                tracing::info!(data = %arg, "draw_data");
            }
            Ok(first(args))
        });
        host
    }

    /// Like [`HostRegistry::standard`] but `display` lines are recorded instead
    /// of printed.
    pub fn capturing() -> (Self, Rc<RefCell<Vec<String>>>) {
        let mut host = HostRegistry::standard();
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&lines);
        host.define_function("display", move |args| {
            sink.borrow_mut().push(display_line(args));
            Ok(first(args))
        });
        (host, lines)
    }
}

fn first(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Undefined)
}

/// `display(value)` or `display(value, prefix)`.
fn display_line(args: &[Value]) -> String {
    let value = args.first().map_or_else(|| "undefined".to_string(), Value::to_display_string);
    match args.get(1) {
        Some(prefix) => format!("{} {}", prefix.to_display_string(), value),
        None => value,
    }
}

/// `error(value)` or `error(value, prefix)`; the prefix is folded into the message.
fn error_value(args: &[Value]) -> Value {
    match args.get(1) {
        Some(prefix) => Value::Text(format!("{} {}", prefix.to_display_string(), first(args))),
        None => first(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_display_drops_trailing_zero() {
        assert_eq!(Value::Number(2.0).to_string(), "2");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "Infinity");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
    }

    #[test]
    fn nested_display_quotes_strings() {
        let v = Value::Array(vec![Value::Number(1.0), Value::Text("a".into()), Value::Null]);
        assert_eq!(v.to_string(), "[1, \"a\", null]");
        assert_eq!(Value::Text("hi".into()).to_display_string(), "hi");
    }

    #[test]
    fn deep_nesting_prints_clones_and_drops() {
        let mut v = Value::Null;
        for i in 0..200_000 {
            v = Value::Array(vec![Value::Number(i as f64), v]);
        }
        let text = v.to_string();
        assert!(text.starts_with("[199999, [199998, "));
        assert!(text.ends_with("[0, null]]]"));
        let copy = v.clone();
        assert_eq!(copy, v);
        assert_ne!(copy, Value::Array(vec![]));
        drop(copy);
        drop(v);
    }

    #[test]
    fn equality_compares_structure() {
        let a = Value::Array(vec![Value::Number(1.0), Value::Array(vec![Value::Text("x".into())])]);
        let b = Value::Array(vec![Value::Number(1.0), Value::Array(vec![Value::Text("y".into())])]);
        assert_eq!(a.clone(), a);
        assert_ne!(a, b);
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_eq!(Value::Circular, Value::Circular);
    }

    #[test]
    fn value_binding_is_writable() {
        let mut host = HostRegistry::new();
        host.define_value("counter", Value::Number(1.0));
        host.set("counter", HostValue::Data(Value::Number(2.0))).unwrap();
        assert!(matches!(host.get("counter").unwrap(), HostValue::Data(Value::Number(n)) if n == 2.0));
    }

    #[test]
    fn function_binding_is_read_only() {
        let host = HostRegistry::standard();
        let err = host.set("display", HostValue::Data(Value::Null)).unwrap_err();
        assert!(matches!(err, HostError::ReadOnly { .. }));
    }

    #[test]
    fn unknown_binding_errors() {
        let host = HostRegistry::new();
        assert!(matches!(host.get("nope"), Err(HostError::UnknownBinding { .. })));
        assert!(!host.contains("nope"));
    }

    #[test]
    fn data_binding_is_not_callable() {
        let mut host = HostRegistry::new();
        host.define_value("x", Value::Null);
        assert!(matches!(host.function("x"), Err(HostError::NotAFunction { .. })));
    }

    #[test]
    fn custom_accessor_without_setter() {
        let mut host = HostRegistry::new();
        host.define_accessor("answer", Box::new(|| HostValue::Data(Value::Number(42.0))), None);
        assert!(matches!(host.get("answer").unwrap(), HostValue::Data(Value::Number(n)) if n == 42.0));
        assert!(host.set("answer", HostValue::Data(Value::Null)).is_err());
    }

    #[test]
    fn capturing_records_display() {
        let (host, lines) = HostRegistry::capturing();
        let display = host.function("display").unwrap();
        let out = display(&[Value::Text("hello".into())]).unwrap();
        assert_eq!(out, Value::Text("hello".into()));
        display(&[Value::Number(3.0), Value::Text("n:".into())]).unwrap();
        assert_eq!(*lines.borrow(), vec!["hello".to_string(), "n: 3".to_string()]);
    }

    #[test]
    fn error_raises_argument() {
        let host = HostRegistry::standard();
        let error = host.function("error").unwrap();
        assert_eq!(error(&[Value::Text("bad".into())]), Err(Value::Text("bad".into())));
    }
}
