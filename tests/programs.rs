use proptest::prelude::*;

use svml::assembler::{assemble, disassemble};
use svml::compiler::{Chapter, CompileOptions};
use svml::host::{HostRegistry, Value};
use svml::vm::{Machine, TrapKind, VmError};
use svml::{Error, compile_source};

fn options() -> CompileOptions {
    CompileOptions::default()
}

fn eval(source: &str) -> Result<Value, Error> {
    let (host, _) = HostRegistry::capturing();
    svml::run_source(source, &options(), &host)
}

fn value(source: &str) -> Value {
    eval(source).unwrap_or_else(|e| panic!("{source}: {e}"))
}

fn trap(source: &str) -> TrapKind {
    match eval(source) {
        Err(Error::Runtime(VmError::Trap { kind, .. })) => kind,
        other => panic!("{source}: expected a trap, got {other:?}"),
    }
}

// --- Behaviour of complete programs ---

#[test]
fn basic_results() {
    assert_eq!(value("1 + 1;"), Value::Number(2.0));
    assert_eq!(value("\"a\" + \"b\";"), Value::Text("ab".into()));
    assert_eq!(trap("1 / 0;"), TrapKind::DivisionByZero);
    assert_eq!(trap("1 + true;"), TrapKind::TypeMismatch);
}

#[test]
fn call_returns_and_leaves_no_frames() {
    let program = compile_source("function f(x) { return x; } f(5);", &options()).unwrap();
    let host = HostRegistry::standard();
    let mut machine = Machine::new(&program, &host).unwrap();
    assert_eq!(machine.run().unwrap(), Value::Number(5.0));
    assert_eq!(machine.rts_depth(), 0);
}

#[test]
fn identity_of_pairs() {
    assert_eq!(value("pair(1, 2) === pair(1, 2);"), Value::Bool(false));
    assert_eq!(value("const p = pair(1, 2); p === p;"), Value::Bool(true));
    assert_eq!(value("1 === 1;"), Value::Bool(true));
}

#[test]
fn arrays_grow_on_write() {
    assert_eq!(value("const a = []; a[5] = 1; array_length(a);"), Value::Number(6.0));
    assert_eq!(value("const a = []; a[3];"), Value::Undefined);
}

#[test]
fn far_index_write_keeps_array_sparse() {
    let setup = "const a = []; a[4294967295] = 1;";
    assert_eq!(value(&format!("{setup} array_length(a);")), Value::Number(4294967296.0));
    assert_eq!(value(&format!("{setup} a[4294967295] === 1 && is_undefined(a[1000]);")), Value::Bool(true));
    match eval(&format!("{setup} a;")) {
        Err(Error::Runtime(VmError::ArrayTooLong { length, .. })) => assert_eq!(length, 4294967296),
        other => panic!("expected ArrayTooLong, got {other:?}"),
    }
}

const BUILD_LIST: &str = "
function build(n) {
    let xs = null;
    for (let i = 0; i < n; i = i + 1) {
        xs = pair(i, xs);
    }
    return xs;
}
";

/// Number of pairs along the tail chain, walked without recursion.
fn chain_length(value: &Value) -> usize {
    let mut n = 0;
    let mut cur = value;
    while let Value::Array(items) = cur {
        n += 1;
        match items.get(1) {
            Some(next) => cur = next,
            None => break,
        }
    }
    n
}

#[test]
fn long_list_crosses_to_host() {
    let list = value(&format!("{BUILD_LIST} build(100000);"));
    assert_eq!(chain_length(&list), 100_000);
    let copy = list.clone();
    assert_eq!(copy, list);
    assert!(list.to_string().starts_with("[99999, [99998, [99997, "));
}

#[test]
fn long_list_displays() {
    let (host, lines) = HostRegistry::capturing();
    svml::run_source(&format!("{BUILD_LIST} display(build(100000)); 0;"), &options(), &host).unwrap();
    let lines = lines.borrow();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("[99999, [99998, "));
    assert!(lines[0].ends_with("null]]]"));
}

#[test]
fn loop_closures_capture_each_iteration() {
    let source = "
        const fs = [];
        for (let i = 0; i < 3; i = i + 1) {
            fs[i] = () => i;
        }
        fs[0]() * 100 + fs[1]() * 10 + fs[2]();
    ";
    assert_eq!(value(source), Value::Number(12.0));
}

#[test]
fn shadowing_in_blocks() {
    let source = "
        const x = 1;
        {
            const x = 2;
            display(x);
        }
        x;
    ";
    let (host, lines) = HostRegistry::capturing();
    let result = svml::run_source(source, &options(), &host).unwrap();
    assert_eq!(result, Value::Number(1.0));
    assert_eq!(*lines.borrow(), vec!["2".to_string()]);
}

#[test]
fn recursion_over_lists() {
    let source = "
        function sum(xs) {
            return is_null(xs) ? 0 : head(xs) + sum(tail(xs));
        }
        sum(list(1, 2, 3, 4));
    ";
    assert_eq!(value(source), Value::Number(10.0));
}

#[test]
fn higher_order_functions() {
    let source = "
        function compose(f, g) { return x => f(g(x)); }
        const inc = x => x + 1;
        const dbl = x => x * 2;
        compose(inc, dbl)(20);
    ";
    assert_eq!(value(source), Value::Number(41.0));
}

#[test]
fn while_with_break_and_continue() {
    let source = "
        let i = 0;
        let total = 0;
        while (true) {
            i = i + 1;
            if (i > 10) { break; }
            if (i % 2 === 0) { continue; }
            total = total + i;
        }
        total;
    ";
    assert_eq!(value(source), Value::Number(25.0));
}

#[test]
fn user_error_is_a_trap() {
    assert_eq!(trap("error(\"boom\");"), TrapKind::UserError);
}

#[test]
fn chapter_one_rejects_let() {
    let opts = CompileOptions { chapter: Chapter::new(1).unwrap() };
    let err = compile_source("let x = 1;", &opts).unwrap_err();
    assert!(matches!(err, Error::Compile(_)), "{err:?}");
}

#[test]
fn operand_stacks_stay_within_computed_size() {
    let source = "
        function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }
        const xs = [1, 2, [3, 4 + 5 * (6 - 7)]];
        fib(10) + xs[2][1];
    ";
    let program = compile_source(source, &options()).unwrap();
    let host = HostRegistry::standard();
    let mut machine = Machine::new(&program, &host).unwrap();
    assert_eq!(machine.run().unwrap(), Value::Number(55.0 - 1.0));
    for (func, peak) in program.functions.iter().zip(machine.peak_depths()) {
        assert!(*peak <= func.stack_size as usize, "peak {peak} > {}", func.stack_size);
    }
}

#[test]
fn disassembled_binary_runs_the_same() {
    let source = "
        function count(n) { let c = 0; while (n > 0) { c = c + 1; n = n - 1; } return c; }
        display(\"counting\");
        count(7) + math_abs(-3);
    ";
    let program = compile_source(source, &options()).unwrap();
    let decoded = disassemble(&assemble(&program)).unwrap();
    assert_eq!(decoded, program);

    let (host, lines) = HostRegistry::capturing();
    let direct = svml::vm::execute(&program, &host).unwrap();
    let via_binary = svml::vm::execute(&decoded, &host).unwrap();
    assert_eq!(direct, via_binary);
    assert_eq!(direct, Value::Number(10.0));
    assert_eq!(lines.borrow().len(), 2);
}

// --- Properties ---

/// Arithmetic over small integers, fully parenthesised, paired with the value
/// it should evaluate to.
fn arith() -> impl Strategy<Value = (String, f64)> {
    let leaf = (-50i32..50).prop_map(|n| (format!("({n})"), n as f64));
    leaf.prop_recursive(4, 24, 2, |inner| {
        (inner.clone(), prop_oneof![Just('+'), Just('-'), Just('*')], inner).prop_map(|((l, lv), op, (r, rv))| {
            let v = match op {
                '+' => lv + rv,
                '-' => lv - rv,
                _ => lv * rv,
            };
            (format!("({l} {op} {r})"), v)
        })
    })
}

/// Number-valued expressions mixing every construct that puts values on the
/// operand stack: array literals and indexing, calls of declared functions and
/// lambdas, conditionals, logical operators and assignments.
fn mixed() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (0i32..20).prop_map(|n| n.to_string()),
        Just("a".to_string()),
        Just("b".to_string()),
        Just("xs[1]".to_string()),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            (inner.clone(), prop_oneof![Just('+'), Just('-'), Just('*')], inner.clone())
                .prop_map(|(l, op, r)| format!("({l} {op} {r})")),
            (inner.clone(), inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(p, q, l, r)| format!("(({p} < {q}) ? {l} : {r})")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(x, y, z)| format!("(((({x} < {y}) && ({y} <= {z})) || !({x} === {z})) ? {y} : {z})")),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| format!("f({l}, {r})")),
            inner.clone().prop_map(|e| format!("g({e})")),
            inner.clone().prop_map(|e| format!("h({e})")),
            (inner.clone(), inner.clone(), inner.clone()).prop_map(|(x, y, z)| format!("[{x}, [{y}], {z}][1][0]")),
            inner.clone().prop_map(|e| format!("(a = {e})")),
            inner.clone().prop_map(|e| format!("(xs[2] = {e})")),
            inner.prop_map(|e| format!("(() => {{ const t = {e}; return t; }})()")),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn mixed_programs_stay_within_stack_sizes(top in mixed(), local in mixed(), arg in mixed()) {
        let source = format!(
            "let a = 3;
            let b = 4;
            const xs = [1, 2, 3];
            function f(x, y) {{ return x + y; }}
            function g(x) {{ const t = [x, x + 1]; return t[1]; }}
            const h = x => x * 2;
            function k(p) {{ let q = {local}; return q + p; }}
            display({top});
            k({arg}) + {top};"
        );
        let program = compile_source(&source, &options()).unwrap();
        let (host, _) = HostRegistry::capturing();
        let mut machine = Machine::new(&program, &host).unwrap();
        let result = machine.run();
        prop_assert!(result.is_ok(), "{source}\n{result:?}");
        for (index, (func, peak)) in program.functions.iter().zip(machine.peak_depths()).enumerate() {
            prop_assert!(
                *peak <= func.stack_size as usize,
                "function #{index}: peak {peak} > stack size {}\n{source}",
                func.stack_size
            );
        }
    }

    #[test]
    fn assembly_is_deterministic((expr, _) in arith()) {
        let source = format!("const x = {expr}; function f(y) {{ return y + \"s\"; }} f(\"t\"); x;");
        let program = compile_source(&source, &options()).unwrap();
        prop_assert_eq!(assemble(&program), assemble(&program));
    }

    #[test]
    fn binary_round_trips((expr, _) in arith(), name in "[a-z]{1,8}") {
        let source = format!("const {name}_v = {expr}; function g() {{ return \"{name}\"; }} g() + \"!\";");
        let program = compile_source(&source, &options()).unwrap();
        prop_assert_eq!(disassemble(&assemble(&program)).unwrap(), program);
    }

    #[test]
    fn vm_agrees_with_host_arithmetic((expr, expected) in arith()) {
        prop_assert_eq!(value(&format!("{expr};")), Value::Number(expected));
    }

    #[test]
    fn division_agrees(a in -1000i32..1000, b in (-1000i32..1000).prop_filter("nonzero", |b| *b != 0)) {
        prop_assert_eq!(value(&format!("({a}) / ({b});")), Value::Number(a as f64 / b as f64));
    }
}
