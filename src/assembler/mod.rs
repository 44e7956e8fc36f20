//! Binary serialization of a compiled [`Program`].
//!
//! Layout, all little-endian:
//!
//! ```text
//! header     magic u32, major u16, minor u16, entry offset u32, string count u32
//! strings    kind u16 (1 = UTF-8), byte length u32, bytes, NUL      (4-aligned)
//! functions  stack u8, env u8, args u8, pad u8, opcode stream       (4-aligned)
//! ```
//!
//! `LGCS` and `NEWC` carry absolute offsets of their referent; branch operands
//! are byte offsets from the start of the branch instruction.

pub mod disassemble;

use std::collections::HashMap;

use crate::buffer::{Buffer, padding_for};
use crate::bytecode::{Function, Instruction, Program};

pub use disassemble::{DecodeError, disassemble};

pub const MAGIC: u32 = 0x5005_ACAD;
pub const VERSION_MAJOR: u16 = 0;
pub const VERSION_MINOR: u16 = 1;
pub const HEADER_SIZE: usize = 16;
pub const STRING_KIND_UTF8: u16 = 1;
pub const FUNCTION_HEADER_SIZE: usize = 4;
pub const ALIGNMENT: usize = 4;

/// What a forward reference points at.
#[derive(Debug, Clone, Copy)]
enum Referent {
    String(usize),
    Function(u32),
}

/// A `u32` operand at `at` (relative to the function record) that is filled in
/// once every offset is known.
#[derive(Debug)]
struct Hole {
    at: usize,
    referent: Referent,
}

struct EncodedFunction {
    record: Buffer,
    holes: Vec<Hole>,
}

/// String constants in order of first appearance.
#[derive(Default)]
struct StringTable<'a> {
    strings: Vec<&'a str>,
    index: HashMap<&'a str, usize>,
}

impl<'a> StringTable<'a> {
    fn intern(&mut self, s: &'a str) -> usize {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        self.strings.push(s);
        self.index.insert(s, self.strings.len() - 1);
        self.strings.len() - 1
    }
}

fn string_record_size(s: &str) -> usize {
    2 + 4 + s.len() + 1
}

fn aligned(size: usize) -> usize {
    size + padding_for(size, ALIGNMENT)
}

/// Byte offset of every instruction from the start of the code, plus the end.
fn instruction_offsets(code: &[Instruction]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(code.len() + 1);
    let mut at = 0;
    offsets.push(at);
    for ins in code {
        at += ins.size();
        offsets.push(at);
    }
    offsets
}

fn encode_function<'a>(function: &'a Function, strings: &mut StringTable<'a>) -> EncodedFunction {
    let mut record = Buffer::new();
    let mut holes = Vec::new();
    record.put_u8(function.stack_size);
    record.put_u8(function.env_size);
    record.put_u8(function.num_args);
    record.put_u8(0);

    let offsets = instruction_offsets(&function.code);
    for (i, ins) in function.code.iter().enumerate() {
        let start = record.position();
        record.put_u8(ins.opcode() as u8);
        use Instruction as I;
        match ins {
            I::LoadInt(v) => record.put_i32(*v),
            I::LoadF32(v) => record.put_f32(*v),
            I::LoadF64(v) => record.put_f64(*v),
            I::LoadString(s) => {
                holes.push(Hole { at: record.position(), referent: Referent::String(strings.intern(s)) });
                record.put_u32(0);
            }
            I::NewClosure(index) => {
                holes.push(Hole { at: record.position(), referent: Referent::Function(*index) });
                record.put_u32(0);
            }
            I::LoadLocal(slot) | I::StoreLocal(slot) => record.put_u8(*slot),
            I::LoadParent { slot, level } | I::StoreParent { slot, level } => {
                record.put_u8(*slot);
                record.put_u8(*level);
            }
            I::BranchTrue(delta) | I::BranchFalse(delta) | I::Branch(delta) => {
                let target = i as i64 + *delta as i64;
                assert!(
                    (0..offsets.len() as i64).contains(&target),
                    "branch at {i} targets instruction {target} outside the function"
                );
                let bytes = offsets[target as usize] as i64 - offsets[i] as i64;
                record.put_i32(bytes as i32);
            }
            I::Call(argc) => record.put_u8(*argc),
            I::CallPrimitive { id, argc } | I::CallInternal { id, argc } => {
                record.put_u8(*id);
                record.put_u8(*argc);
            }
            I::NewEnv(n) => record.put_u8(*n),
            I::NewPrimitiveClosure(id) | I::NewInternalClosure(id) => record.put_u8(*id),
            _ => {}
        }
        assert_eq!(record.position() - start, ins.size(), "encoded size of {ins}");
    }
    EncodedFunction { record, holes }
}

/// Serialize `program`. Output depends only on the program, so assembling the
/// same program twice gives identical bytes.
pub fn assemble(program: &Program) -> Vec<u8> {
    let mut strings = StringTable::default();
    let encoded: Vec<EncodedFunction> =
        program.functions.iter().map(|f| encode_function(f, &mut strings)).collect();

    let mut offset = HEADER_SIZE;
    let mut string_offsets = Vec::with_capacity(strings.strings.len());
    for s in &strings.strings {
        string_offsets.push(offset);
        offset += aligned(string_record_size(s));
    }
    let mut function_offsets = Vec::with_capacity(encoded.len());
    for f in &encoded {
        function_offsets.push(offset);
        offset += aligned(f.record.written());
    }
    let total = offset;

    let entry_offset = function_offsets
        .get(program.entry as usize)
        .copied()
        .unwrap_or_else(|| panic!("entry function #{} does not exist", program.entry));

    let mut out = Buffer::new();
    out.put_u32(MAGIC);
    out.put_u16(VERSION_MAJOR);
    out.put_u16(VERSION_MINOR);
    out.put_u32(entry_offset as u32);
    out.put_u32(strings.strings.len() as u32);

    for (s, at) in strings.strings.iter().zip(&string_offsets) {
        assert_eq!(out.position(), *at);
        out.put_u16(STRING_KIND_UTF8);
        out.put_u32(s.len() as u32);
        out.put_bytes(s.as_bytes());
        out.put_u8(0);
        out.align(ALIGNMENT);
    }

    for (f, at) in encoded.iter().zip(&function_offsets) {
        assert_eq!(out.position(), *at);
        out.put_bytes(f.record.as_bytes());
        out.align(ALIGNMENT);
    }
    let end = out.position();

    for (f, base) in encoded.iter().zip(&function_offsets) {
        for hole in &f.holes {
            let target = match hole.referent {
                Referent::String(i) => string_offsets[i],
                Referent::Function(index) => *function_offsets
                    .get(index as usize)
                    .unwrap_or_else(|| panic!("closure over missing function #{index}")),
            };
            out.seek(base + hole.at);
            out.put_u32(target as u32);
        }
    }

    assert_eq!(out.written(), total, "computed layout size differs from serialized size");
    assert_eq!(end, total);
    tracing::debug!(
        strings = strings.strings.len(),
        functions = encoded.len(),
        bytes = total,
        "assembled program"
    );
    out.into_bytes()
}
