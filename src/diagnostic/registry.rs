/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str, // one line, for listings
    pub long: &'static str,  // full explanation for --explain
}

/// All stable error codes reported by svmlc.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Lexer ────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SVML-L001",
        short: "unexpected character",
        long: r#"## SVML-L001: unexpected character

The source contains characters that do not start any token.

**Example:**

    const x = 1 # 2;

`#` is not an operator. Bitwise operators (`&`, `|`) are not supported
either; use `&&` or `||` for logic.
"#,
    },
    // ── Parser ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SVML-P001",
        short: "expected expression",
        long: r#"## SVML-P001: expected expression

An operator or keyword appeared where a value was needed.

**Example:**

    const x = * 2;
"#,
    },
    ErrorEntry {
        code: "SVML-P002",
        short: "unexpected end of input in statement",
        long: r#"## SVML-P002: unexpected end of input in statement

The file ended while a statement was still expected, usually after an
unclosed `{`.
"#,
    },
    ErrorEntry {
        code: "SVML-P003",
        short: "unexpected token",
        long: r#"## SVML-P003: unexpected token

A specific token was required here, such as `;`, `)` or `}`.

**Example:**

    const x = 1
    const y = 2;

Every statement ends with a semicolon.
"#,
    },
    ErrorEntry {
        code: "SVML-P004",
        short: "unexpected end of input",
        long: r#"## SVML-P004: unexpected end of input

The file ended while a closing token was still expected.
"#,
    },
    ErrorEntry {
        code: "SVML-P005",
        short: "expected identifier",
        long: r#"## SVML-P005: expected identifier

A name was required, for example after `const`, `let` or `function`.

**Example:**

    const 1 = 2;
"#,
    },
    ErrorEntry {
        code: "SVML-P006",
        short: "expected identifier, found end of input",
        long: r#"## SVML-P006: expected identifier, found end of input

The file ended where a name was required.
"#,
    },
    ErrorEntry {
        code: "SVML-P007",
        short: "invalid assignment target",
        long: r#"## SVML-P007: invalid assignment target

Only names, array elements and object members can be assigned to.

**Example:**

    1 = 2;
"#,
    },
    ErrorEntry {
        code: "SVML-P008",
        short: "loose equality",
        long: r#"## SVML-P008: loose equality

`==` and `!=` are not part of the language. Use `===` and `!==`.
"#,
    },
    ErrorEntry {
        code: "SVML-P009",
        short: "declaration without initializer",
        long: r#"## SVML-P009: declaration without initializer

Every `const` and `let` declaration needs a value.

**Example:**

    let x;

**Fix:**

    let x = undefined;
"#,
    },
    ErrorEntry {
        code: "SVML-P010",
        short: "expected property name",
        long: r#"## SVML-P010: expected property name

Object literals and member access need a name or string key.
"#,
    },
    // ── Compiler ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SVML-C001",
        short: "unresolved name",
        long: r#"## SVML-C001: unresolved name

The name is not declared in any enclosing scope and is not a builtin.

**Example:**

    display(y);

Declare it first with `const` or `let`, or check the spelling.
"#,
    },
    ErrorEntry {
        code: "SVML-C002",
        short: "assignment to constant",
        long: r#"## SVML-C002: assignment to constant

Names declared with `const`, function names and builtin constants such
as `math_PI` cannot be reassigned.

**Example:**

    const x = 1;
    x = 2;

Declare the name with `let` instead.
"#,
    },
    ErrorEntry {
        code: "SVML-C003",
        short: "unsupported construct",
        long: r#"## SVML-C003: unsupported construct

The construct parses but has no bytecode lowering, for example object
literals and member access.
"#,
    },
    ErrorEntry {
        code: "SVML-C004",
        short: "break outside loop",
        long: r#"## SVML-C004: break outside loop

`break` is only allowed inside a `while` or `for` body.
"#,
    },
    ErrorEntry {
        code: "SVML-C005",
        short: "continue outside loop",
        long: r#"## SVML-C005: continue outside loop

`continue` is only allowed inside a `while` or `for` body.
"#,
    },
    ErrorEntry {
        code: "SVML-C006",
        short: "limit exceeded",
        long: r#"## SVML-C006: limit exceeded

A function exceeds a limit of the binary format: at most 255 names per
scope, 255 parameters, 255 call arguments, and an operand stack depth of
255.
"#,
    },
    ErrorEntry {
        code: "SVML-C007",
        short: "not available in this chapter",
        long: r#"## SVML-C007: not available in this chapter

The construct belongs to a later chapter than the one selected.
Chapter 1 has no `let`, assignment, loops or arrays. Chapter 2 adds
pairs and lists, chapter 3 adds mutation, loops and arrays.

Pass `--chapter 3` or higher to allow it.
"#,
    },
    // ── Binary input ─────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SVML-D001",
        short: "malformed binary",
        long: r#"## SVML-D001: malformed binary

A `.svm` file could not be decoded: wrong magic number, unsupported
major version, truncated data, an unknown opcode or an offset that does
not point at a string or function.

Recompile the source with `svmlc`.
"#,
    },
    // ── Host ─────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SVML-H001",
        short: "host binding error",
        long: r#"## SVML-H001: host binding error

A builtin delegated to the host is missing from the host registry, is
read-only, or is not a function.
"#,
    },
    // ── Runtime ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SVML-R001",
        short: "division by zero",
        long: r#"## SVML-R001: division by zero

`/` or `%` was applied with a zero divisor.

**Example:**

    1 / 0;
"#,
    },
    ErrorEntry {
        code: "SVML-R002",
        short: "type mismatch",
        long: r#"## SVML-R002: type mismatch

An operator received operands of the wrong type. Arithmetic needs
numbers, `+` accepts two numbers or two strings, comparisons need two
numbers or two strings, and conditions must be booleans.

**Example:**

    1 + true;
"#,
    },
    ErrorEntry {
        code: "SVML-R003",
        short: "not callable",
        long: r#"## SVML-R003: not callable

A value that is not a function was called.

**Example:**

    const x = 1;
    x();
"#,
    },
    ErrorEntry {
        code: "SVML-R004",
        short: "arity mismatch",
        long: r#"## SVML-R004: arity mismatch

A function was called with a different number of arguments than it
declares.

**Example:**

    function f(x) { return x; }
    f(1, 2);
"#,
    },
    ErrorEntry {
        code: "SVML-R005",
        short: "error raised by program",
        long: r#"## SVML-R005: error raised by program

The program called `error(...)`. The offending value is the argument.
"#,
    },
    ErrorEntry {
        code: "SVML-R006",
        short: "internal VM error",
        long: r#"## SVML-R006: internal VM error

The virtual machine reached an inconsistent state, such as an operand
stack overflow, a bad heap address or a branch out of range. Programs
produced by the compiler never do this; the bytecode was malformed.
"#,
    },
];

/// Look up an error entry by code (e.g. `"SVML-C001"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code == code)
}
