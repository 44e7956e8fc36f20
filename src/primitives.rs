//! The prelude: natively implemented primitives, host-implemented internals
//! and numeric constants. The compiler resolves names against these tables
//! and the VM dispatches on the same ids.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::vm::heap::{Addr, Heap, Node};
use crate::vm::{Fault, TrapKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(u8),
    Variadic,
}

impl Arity {
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Fixed(n) => n as usize == argc,
            Arity::Variadic => true,
        }
    }
}

pub type NativeFn = fn(&mut Heap, &[Addr]) -> Result<Addr, Fault>;

#[derive(Debug)]
pub struct Primitive {
    pub id: u8,
    pub name: &'static str,
    pub arity: Arity,
    /// First language chapter in which the name is visible.
    pub chapter: u8,
    pub call: NativeFn,
}

/// A function implemented by the host registry under the same name.
#[derive(Debug)]
pub struct Internal {
    pub id: u8,
    pub name: &'static str,
    pub arity: Arity,
    /// The call evaluates to its first argument rather than the host's result.
    pub yields_argument: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Number(f64),
    Undefined,
}

fn arg(heap: &Heap, args: &[Addr], i: usize) -> Addr {
    args.get(i).copied().unwrap_or(heap.undefined())
}

fn num(heap: &Heap, args: &[Addr], i: usize) -> Result<f64, Fault> {
    heap.number_of(arg(heap, args, i))
}

fn mismatch(value: Addr) -> Fault {
    Fault::Trap { kind: TrapKind::TypeMismatch, value }
}

// ── Math ────────────────────────────────────────────────────────────

macro_rules! math_unary {
    ($($name:ident => $op:expr;)*) => {
        $(
            fn $name(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
                let op: fn(f64) -> f64 = $op;
                let x = num(heap, args, 0)?;
                Ok(heap.number(op(x)))
            }
        )*
    };
}

macro_rules! math_binary {
    ($($name:ident => $op:expr;)*) => {
        $(
            fn $name(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
                let op: fn(f64, f64) -> f64 = $op;
                let (x, y) = (num(heap, args, 0)?, num(heap, args, 1)?);
                Ok(heap.number(op(x, y)))
            }
        )*
    };
}

/// Rounds halves towards positive infinity.
fn round_half_up(x: f64) -> f64 {
    let floor = x.floor();
    if x - floor >= 0.5 { floor + 1.0 } else { floor }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        x
    }
}

/// Modular conversion to a 32-bit signed integer.
fn to_int32(x: f64) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    (x.trunc() % 4_294_967_296.0) as i64 as u32 as i32
}

math_unary! {
    math_abs => f64::abs;
    math_acos => f64::acos;
    math_acosh => f64::acosh;
    math_asin => f64::asin;
    math_asinh => f64::asinh;
    math_atan => f64::atan;
    math_atanh => f64::atanh;
    math_cbrt => f64::cbrt;
    math_ceil => f64::ceil;
    math_cos => f64::cos;
    math_cosh => f64::cosh;
    math_exp => f64::exp;
    math_expm1 => f64::exp_m1;
    math_floor => f64::floor;
    math_fround => |x| x as f32 as f64;
    math_log => f64::ln;
    math_log1p => f64::ln_1p;
    math_log2 => f64::log2;
    math_log10 => f64::log10;
    math_round => round_half_up;
    math_sign => sign;
    math_sin => f64::sin;
    math_sinh => f64::sinh;
    math_sqrt => f64::sqrt;
    math_tan => f64::tan;
    math_tanh => f64::tanh;
    math_trunc => f64::trunc;
}

math_binary! {
    math_atan2 => f64::atan2;
    math_pow => f64::powf;
    math_imul => |x, y| to_int32(x).wrapping_mul(to_int32(y)) as f64;
}

fn numbers(heap: &Heap, args: &[Addr]) -> Result<Vec<f64>, Fault> {
    args.iter().map(|a| heap.number_of(*a)).collect()
}

fn math_max(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let xs = numbers(heap, args)?;
    let result = if xs.iter().any(|x| x.is_nan()) {
        f64::NAN
    } else {
        xs.into_iter().fold(f64::NEG_INFINITY, f64::max)
    };
    Ok(heap.number(result))
}

fn math_min(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let xs = numbers(heap, args)?;
    let result = if xs.iter().any(|x| x.is_nan()) {
        f64::NAN
    } else {
        xs.into_iter().fold(f64::INFINITY, f64::min)
    };
    Ok(heap.number(result))
}

fn math_hypot(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let xs = numbers(heap, args)?;
    let sum: f64 = xs.iter().map(|x| x * x).sum();
    Ok(heap.number(sum.sqrt()))
}

fn math_random(heap: &mut Heap, _args: &[Addr]) -> Result<Addr, Fault> {
    Ok(heap.number(fastrand::f64()))
}

/// Milliseconds since the Unix epoch.
fn get_time(heap: &mut Heap, _args: &[Addr]) -> Result<Addr, Fault> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0);
    Ok(heap.number(ms.floor()))
}

// ── Pairs and lists ─────────────────────────────────────────────────

fn is_pair_addr(heap: &Heap, addr: Addr) -> Result<bool, Fault> {
    Ok(matches!(heap.get(addr)?, Node::Array(elements) if elements.len() == 2))
}

fn expect_pair(heap: &Heap, addr: Addr) -> Result<Addr, Fault> {
    if is_pair_addr(heap, addr)? { Ok(addr) } else { Err(mismatch(addr)) }
}

fn pair(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let (h, t) = (arg(heap, args, 0), arg(heap, args, 1));
    Ok(heap.array(vec![Some(h), Some(t)]))
}

fn head(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let p = expect_pair(heap, arg(heap, args, 0))?;
    heap.array_get(p, 0)
}

fn tail(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let p = expect_pair(heap, arg(heap, args, 0))?;
    heap.array_get(p, 1)
}

fn set_head(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let p = expect_pair(heap, arg(heap, args, 0))?;
    let value = arg(heap, args, 1);
    heap.array_set(p, 0, value)?;
    Ok(heap.undefined())
}

fn set_tail(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let p = expect_pair(heap, arg(heap, args, 0))?;
    let value = arg(heap, args, 1);
    heap.array_set(p, 1, value)?;
    Ok(heap.undefined())
}

fn is_pair(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let b = is_pair_addr(heap, arg(heap, args, 0))?;
    Ok(heap.boolean(b))
}

fn list(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let mut acc = heap.null();
    for item in args.iter().rev() {
        acc = heap.array(vec![Some(*item), Some(acc)]);
    }
    Ok(acc)
}

/// Walks tails until `null`; `None` if the chain ends in a non-pair.
fn list_length(heap: &Heap, mut xs: Addr) -> Result<Option<usize>, Fault> {
    let mut n = 0;
    // A proper list cannot be longer than the heap; anything longer is a cycle.
    while n <= heap.len() {
        match heap.get(xs)? {
            Node::Null => return Ok(Some(n)),
            Node::Array(elements) if elements.len() == 2 => {
                xs = elements.get(1).unwrap_or(heap.undefined());
                n += 1;
            }
            _ => return Ok(None),
        }
    }
    Ok(None)
}

fn length(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let xs = arg(heap, args, 0);
    match list_length(heap, xs)? {
        Some(n) => Ok(heap.number(n as f64)),
        None => Err(mismatch(xs)),
    }
}

fn is_list(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let b = list_length(heap, arg(heap, args, 0))?.is_some();
    Ok(heap.boolean(b))
}

// ── Arrays ──────────────────────────────────────────────────────────

fn array_length(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let len = heap.elements_of(arg(heap, args, 0))?.len();
    Ok(heap.number(len as f64))
}

// ── Type predicates ─────────────────────────────────────────────────

macro_rules! type_predicates {
    ($($name:ident => $tag:literal;)*) => {
        $(
            fn $name(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
                let b = heap.is_tag(arg(heap, args, 0), $tag)?;
                Ok(heap.boolean(b))
            }
        )*
    };
}

type_predicates! {
    is_number => "number";
    is_string => "string";
    is_boolean => "boolean";
    is_undefined => "undefined";
    is_null => "null";
    is_function => "function";
    is_array => "array";
}

// ── Strings ─────────────────────────────────────────────────────────

fn stringify(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let text = heap.to_value(arg(heap, args, 0))?.to_string();
    Ok(heap.string(text))
}

/// `parse_int(text, radix)`; text that does not parse yields `NaN`.
fn parse_int(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let text_addr = arg(heap, args, 0);
    let text = heap.string_of(text_addr)?;
    let radix_addr = arg(heap, args, 1);
    let radix = heap.number_of(radix_addr)?;
    if radix.fract() != 0.0 || !(2.0..=36.0).contains(&radix) {
        return Err(mismatch(radix_addr));
    }
    let n = i64::from_str_radix(text.trim(), radix as u32)
        .map(|n| n as f64)
        .unwrap_or(f64::NAN);
    Ok(heap.number(n))
}

fn char_at(heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
    let text = heap.string_of(arg(heap, args, 0))?;
    let index = heap.index_of(arg(heap, args, 1))?;
    match text.chars().nth(index) {
        Some(c) => Ok(heap.string(c.to_string())),
        None => Ok(heap.undefined()),
    }
}

// ── Tables ──────────────────────────────────────────────────────────

use Arity::{Fixed, Variadic};

macro_rules! primitive_table {
    ($($id:literal $name:literal => $f:ident, $arity:expr, $chapter:literal;)*) => {
        pub static PRIMITIVES: &[Primitive] = &[
            $(Primitive { id: $id, name: $name, arity: $arity, chapter: $chapter, call: $f },)*
        ];
    };
}

primitive_table! {
    0 "math_abs" => math_abs, Fixed(1), 1;
    1 "math_acos" => math_acos, Fixed(1), 1;
    2 "math_acosh" => math_acosh, Fixed(1), 1;
    3 "math_asin" => math_asin, Fixed(1), 1;
    4 "math_asinh" => math_asinh, Fixed(1), 1;
    5 "math_atan" => math_atan, Fixed(1), 1;
    6 "math_atanh" => math_atanh, Fixed(1), 1;
    7 "math_atan2" => math_atan2, Fixed(2), 1;
    8 "math_cbrt" => math_cbrt, Fixed(1), 1;
    9 "math_ceil" => math_ceil, Fixed(1), 1;
    10 "math_cos" => math_cos, Fixed(1), 1;
    11 "math_cosh" => math_cosh, Fixed(1), 1;
    12 "math_exp" => math_exp, Fixed(1), 1;
    13 "math_expm1" => math_expm1, Fixed(1), 1;
    14 "math_floor" => math_floor, Fixed(1), 1;
    15 "math_fround" => math_fround, Fixed(1), 1;
    16 "math_hypot" => math_hypot, Variadic, 1;
    17 "math_imul" => math_imul, Fixed(2), 1;
    18 "math_log" => math_log, Fixed(1), 1;
    19 "math_log1p" => math_log1p, Fixed(1), 1;
    20 "math_log2" => math_log2, Fixed(1), 1;
    21 "math_log10" => math_log10, Fixed(1), 1;
    22 "math_max" => math_max, Variadic, 1;
    23 "math_min" => math_min, Variadic, 1;
    24 "math_pow" => math_pow, Fixed(2), 1;
    25 "math_random" => math_random, Fixed(0), 1;
    26 "math_round" => math_round, Fixed(1), 1;
    27 "math_sign" => math_sign, Fixed(1), 1;
    28 "math_sin" => math_sin, Fixed(1), 1;
    29 "math_sinh" => math_sinh, Fixed(1), 1;
    30 "math_sqrt" => math_sqrt, Fixed(1), 1;
    31 "math_tan" => math_tan, Fixed(1), 1;
    32 "math_tanh" => math_tanh, Fixed(1), 1;
    33 "math_trunc" => math_trunc, Fixed(1), 1;
    34 "get_time" => get_time, Fixed(0), 1;
    35 "is_number" => is_number, Fixed(1), 1;
    36 "is_string" => is_string, Fixed(1), 1;
    37 "is_boolean" => is_boolean, Fixed(1), 1;
    38 "is_undefined" => is_undefined, Fixed(1), 1;
    39 "is_function" => is_function, Fixed(1), 1;
    40 "stringify" => stringify, Fixed(1), 1;
    41 "parse_int" => parse_int, Fixed(2), 1;
    42 "char_at" => char_at, Fixed(2), 1;
    43 "pair" => pair, Fixed(2), 2;
    44 "head" => head, Fixed(1), 2;
    45 "tail" => tail, Fixed(1), 2;
    46 "is_pair" => is_pair, Fixed(1), 2;
    47 "is_null" => is_null, Fixed(1), 2;
    48 "list" => list, Variadic, 2;
    49 "length" => length, Fixed(1), 2;
    50 "is_list" => is_list, Fixed(1), 2;
    51 "set_head" => set_head, Fixed(2), 3;
    52 "set_tail" => set_tail, Fixed(2), 3;
    53 "array_length" => array_length, Fixed(1), 3;
    54 "is_array" => is_array, Fixed(1), 3;
}

pub static INTERNALS: &[Internal] = &[
    Internal { id: 0, name: "display", arity: Variadic, yields_argument: true },
    Internal { id: 1, name: "error", arity: Variadic, yields_argument: false },
    Internal { id: 2, name: "draw_data", arity: Variadic, yields_argument: true },
];

pub static CONSTANTS: &[(&str, Constant)] = &[
    ("undefined", Constant::Undefined),
    ("Infinity", Constant::Number(f64::INFINITY)),
    ("NaN", Constant::Number(f64::NAN)),
    ("math_E", Constant::Number(std::f64::consts::E)),
    ("math_LN2", Constant::Number(std::f64::consts::LN_2)),
    ("math_LN10", Constant::Number(std::f64::consts::LN_10)),
    ("math_LOG2E", Constant::Number(std::f64::consts::LOG2_E)),
    ("math_LOG10E", Constant::Number(std::f64::consts::LOG10_E)),
    ("math_PI", Constant::Number(std::f64::consts::PI)),
    ("math_SQRT1_2", Constant::Number(std::f64::consts::FRAC_1_SQRT_2)),
    ("math_SQRT2", Constant::Number(std::f64::consts::SQRT_2)),
];

pub fn lookup_primitive(name: &str) -> Option<&'static Primitive> {
    PRIMITIVES.iter().find(|p| p.name == name)
}

pub fn lookup_internal(name: &str) -> Option<&'static Internal> {
    INTERNALS.iter().find(|i| i.name == name)
}

pub fn lookup_constant(name: &str) -> Option<Constant> {
    CONSTANTS.iter().find(|(n, _)| *n == name).map(|(_, c)| *c)
}

pub fn name_of(id: u8) -> &'static str {
    PRIMITIVES.get(id as usize).map(|p| p.name).unwrap_or("<unknown primitive>")
}

pub fn internal_name_of(id: u8) -> &'static str {
    INTERNALS.get(id as usize).map(|i| i.name).unwrap_or("<unknown internal>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Value;
    use std::collections::HashSet;

    fn call(name: &str, heap: &mut Heap, args: &[Addr]) -> Result<Addr, Fault> {
        (lookup_primitive(name).unwrap().call)(heap, args)
    }

    fn call_numbers(name: &str, xs: &[f64]) -> f64 {
        let mut heap = Heap::new();
        let args: Vec<Addr> = xs.iter().map(|x| heap.number(*x)).collect();
        let out = call(name, &mut heap, &args).unwrap();
        heap.number_of(out).unwrap()
    }

    #[test]
    fn primitive_ids_are_dense() {
        for (i, p) in PRIMITIVES.iter().enumerate() {
            assert_eq!(p.id as usize, i, "{} has id {}", p.name, p.id);
        }
        for (i, p) in INTERNALS.iter().enumerate() {
            assert_eq!(p.id as usize, i, "{} has id {}", p.name, p.id);
        }
        assert!(PRIMITIVES.len() <= 256);
    }

    #[test]
    fn prelude_names_are_unique() {
        let mut seen = HashSet::new();
        let names = PRIMITIVES
            .iter()
            .map(|p| p.name)
            .chain(INTERNALS.iter().map(|i| i.name))
            .chain(CONSTANTS.iter().map(|(n, _)| *n));
        for name in names {
            assert!(seen.insert(name), "duplicate prelude name {name}");
        }
    }

    #[test]
    fn arity_accepts() {
        assert!(Fixed(2).accepts(2));
        assert!(!Fixed(2).accepts(1));
        assert!(Variadic.accepts(0));
    }

    #[test]
    fn math_primitives() {
        assert_eq!(call_numbers("math_abs", &[-3.0]), 3.0);
        assert_eq!(call_numbers("math_pow", &[2.0, 10.0]), 1024.0);
        assert_eq!(call_numbers("math_max", &[1.0, 7.0, 3.0]), 7.0);
        assert_eq!(call_numbers("math_min", &[]), f64::INFINITY);
        assert!(call_numbers("math_max", &[1.0, f64::NAN]).is_nan());
        assert_eq!(call_numbers("math_hypot", &[3.0, 4.0]), 5.0);
        assert_eq!(call_numbers("math_imul", &[3.0, 4.0]), 12.0);
        assert_eq!(call_numbers("math_imul", &[4_294_967_295.0, 5.0]), -5.0);
    }

    #[test]
    fn round_halves_up() {
        assert_eq!(call_numbers("math_round", &[2.5]), 3.0);
        assert_eq!(call_numbers("math_round", &[-2.5]), -2.0);
        assert_eq!(call_numbers("math_round", &[-2.6]), -3.0);
    }

    #[test]
    fn random_in_unit_interval() {
        let r = call_numbers("math_random", &[]);
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn math_on_non_number_traps() {
        let mut heap = Heap::new();
        let s = heap.string("x");
        let err = call("math_sqrt", &mut heap, &[s]).unwrap_err();
        assert!(matches!(err, Fault::Trap { kind: TrapKind::TypeMismatch, value } if value == s));
    }

    #[test]
    fn list_and_length() {
        let mut heap = Heap::new();
        let items: Vec<Addr> = (1..=3).map(|i| heap.number(i as f64)).collect();
        let xs = call("list", &mut heap, &items).unwrap();
        let n = call("length", &mut heap, &[xs]).unwrap();
        assert_eq!(heap.number_of(n).unwrap(), 3.0);
        let h = call("head", &mut heap, &[xs]).unwrap();
        assert_eq!(heap.number_of(h).unwrap(), 1.0);
        let is = call("is_list", &mut heap, &[xs]).unwrap();
        assert!(heap.bool_of(is).unwrap());
        assert_eq!(
            heap.to_value(xs).unwrap().to_string(),
            "[1, [2, [3, null]]]"
        );
    }

    #[test]
    fn head_of_non_pair_traps() {
        let mut heap = Heap::new();
        let null = heap.null();
        assert!(call("head", &mut heap, &[null]).is_err());
    }

    #[test]
    fn set_tail_mutates() {
        let mut heap = Heap::new();
        let (a, b, c) = (heap.number(1.0), heap.number(2.0), heap.number(3.0));
        let p = call("pair", &mut heap, &[a, b]).unwrap();
        call("set_tail", &mut heap, &[p, c]).unwrap();
        assert_eq!(heap.to_value(p).unwrap(), Value::Array(vec![Value::Number(1.0), Value::Number(3.0)]));
    }

    #[test]
    fn circular_list_is_not_a_list() {
        let mut heap = Heap::new();
        let one = heap.number(1.0);
        let null = heap.null();
        let p = call("pair", &mut heap, &[one, null]).unwrap();
        call("set_tail", &mut heap, &[p, p]).unwrap();
        let is = call("is_list", &mut heap, &[p]).unwrap();
        assert!(!heap.bool_of(is).unwrap());
    }

    #[test]
    fn type_predicates_check_tags() {
        let mut heap = Heap::new();
        let s = heap.string("s");
        let out = call("is_string", &mut heap, &[s]).unwrap();
        assert!(heap.bool_of(out).unwrap());
        let out = call("is_number", &mut heap, &[s]).unwrap();
        assert!(!heap.bool_of(out).unwrap());
    }

    #[test]
    fn parse_int_radix() {
        let mut heap = Heap::new();
        let text = heap.string("ff");
        let radix = heap.number(16.0);
        let out = call("parse_int", &mut heap, &[text, radix]).unwrap();
        assert_eq!(heap.number_of(out).unwrap(), 255.0);
        let junk = heap.string("zz");
        let ten = heap.number(10.0);
        let out = call("parse_int", &mut heap, &[junk, ten]).unwrap();
        assert!(heap.number_of(out).unwrap().is_nan());
    }

    #[test]
    fn stringify_quotes_nested_strings() {
        let mut heap = Heap::new();
        let s = heap.string("a");
        let arr = heap.array(vec![Some(s)]);
        let out = call("stringify", &mut heap, &[arr]).unwrap();
        assert_eq!(&*heap.string_of(out).unwrap(), "[\"a\"]");
    }

    #[test]
    fn lookups() {
        assert_eq!(lookup_primitive("pair").map(|p| p.chapter), Some(2));
        assert!(lookup_internal("display").unwrap().yields_argument);
        assert_eq!(lookup_constant("math_PI"), Some(Constant::Number(std::f64::consts::PI)));
        assert_eq!(name_of(43), "pair");
        assert!(lookup_primitive("nope").is_none());
    }
}
