//! Decoding of assembled bytes back into a [`Program`]. Input is untrusted, so
//! every malformed offset or opcode is reported rather than asserted.

use std::collections::{BTreeSet, HashMap};

use super::{ALIGNMENT, FUNCTION_HEADER_SIZE, HEADER_SIZE, MAGIC, STRING_KIND_UTF8, VERSION_MAJOR};
use crate::buffer::{Buffer, BufferError, padding_for};
use crate::bytecode::{Function, Instruction, Opcode, Program};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("not an svml binary (magic {found:#010x})")]
    BadMagic { found: u32 },
    #[error("unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error(transparent)]
    UnexpectedEof(#[from] BufferError),
    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("no string constant at offset {offset}")]
    BadStringOffset { offset: u32 },
    #[error("no function at offset {offset}")]
    BadFunctionOffset { offset: u32 },
    #[error("branch at offset {offset} does not land on an instruction")]
    MisalignedBranch { offset: usize },
    #[error("string constant at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },
}

/// A function as laid out, before offsets are mapped back to indices.
struct RawFunction {
    start: usize,
    header: [u8; 3],
    /// Instructions with their absolute offsets; branch and closure operands
    /// still hold byte offsets.
    code: Vec<(usize, Instruction)>,
    end: usize,
}

pub fn disassemble(bytes: &[u8]) -> Result<Program, DecodeError> {
    let mut buf = Buffer::from_bytes(bytes.to_vec());
    let magic = buf.get_u32()?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic { found: magic });
    }
    let major = buf.get_u16()?;
    let minor = buf.get_u16()?;
    if major != VERSION_MAJOR {
        return Err(DecodeError::UnsupportedVersion { major, minor });
    }
    let entry_offset = buf.get_u32()?;
    let string_count = buf.get_u32()?;
    debug_assert_eq!(buf.position(), HEADER_SIZE);

    let mut strings = HashMap::new();
    for _ in 0..string_count {
        let at = buf.position();
        let kind = buf.get_u16()?;
        let len = buf.get_u32()? as usize;
        let raw = buf.get_bytes(len)?;
        buf.get_u8()?;
        if kind != STRING_KIND_UTF8 {
            return Err(DecodeError::InvalidUtf8 { offset: at });
        }
        let s = String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8 { offset: at })?;
        strings.insert(at as u32, s);
        skip_padding(&mut buf)?;
    }

    let mut starts = BTreeSet::from([buf.position(), entry_offset as usize]);
    let mut raw = Vec::new();
    while buf.remaining() > 0 {
        let start = buf.position();
        if !starts.contains(&start) {
            return Err(DecodeError::BadFunctionOffset { offset: start as u32 });
        }
        let function = decode_function(&mut buf, &strings, &mut starts)?;
        raw.push(function);
    }

    let index_of: HashMap<usize, u32> = raw.iter().enumerate().map(|(i, f)| (f.start, i as u32)).collect();
    let entry = *index_of
        .get(&(entry_offset as usize))
        .ok_or(DecodeError::BadFunctionOffset { offset: entry_offset })?;
    let functions = raw
        .into_iter()
        .map(|f| resolve(f, &index_of))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(functions = functions.len(), strings = strings.len(), "disassembled program");
    Ok(Program { entry, functions })
}

fn skip_padding(buf: &mut Buffer) -> Result<(), DecodeError> {
    let padding = padding_for(buf.position(), ALIGNMENT).min(buf.remaining());
    buf.get_bytes(padding)?;
    Ok(())
}

/// Decode instructions until the next known function start or the end of
/// data, allowing trailing zero padding.
fn decode_function(
    buf: &mut Buffer,
    strings: &HashMap<u32, String>,
    starts: &mut BTreeSet<usize>,
) -> Result<RawFunction, DecodeError> {
    let start = buf.position();
    let header = [buf.get_u8()?, buf.get_u8()?, buf.get_u8()?];
    buf.get_u8()?;
    debug_assert_eq!(buf.position(), start + FUNCTION_HEADER_SIZE);

    let mut code = Vec::new();
    loop {
        let at = buf.position();
        let limit = starts.range(at..).next().copied().unwrap_or(at + buf.remaining());
        let left = limit.saturating_sub(at);
        if left == 0 {
            break;
        }
        let rest = &buf.as_bytes()[at..limit.min(buf.written())];
        if left < ALIGNMENT && rest.iter().all(|b| *b == 0) {
            buf.get_bytes(left)?;
            return Ok(RawFunction { start, header, code, end: at });
        }
        let ins = decode_instruction(buf, strings)?;
        if let Instruction::NewClosure(offset) = ins {
            starts.insert(offset as usize);
        }
        code.push((at, ins));
    }
    let end = buf.position();
    Ok(RawFunction { start, header, code, end })
}

fn decode_instruction(buf: &mut Buffer, strings: &HashMap<u32, String>) -> Result<Instruction, DecodeError> {
    use Instruction as I;
    let offset = buf.position();
    let byte = buf.get_u8()?;
    let op = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { byte, offset })?;
    Ok(match op {
        Opcode::Lgci => I::LoadInt(buf.get_i32()?),
        Opcode::Lgcf32 => I::LoadF32(buf.get_f32()?),
        Opcode::Lgcf64 => I::LoadF64(buf.get_f64()?),
        Opcode::Lgcb0 => I::LoadFalse,
        Opcode::Lgcb1 => I::LoadTrue,
        Opcode::Lgcu => I::LoadUndefined,
        Opcode::Lgcn => I::LoadNull,
        Opcode::Lgcs => {
            let at = buf.get_u32()?;
            let s = strings.get(&at).ok_or(DecodeError::BadStringOffset { offset: at })?;
            I::LoadString(s.clone())
        }
        Opcode::Popg => I::Pop,
        Opcode::Addg => I::Add,
        Opcode::Subg => I::Sub,
        Opcode::Mulg => I::Mul,
        Opcode::Divg => I::Div,
        Opcode::Modg => I::Mod,
        Opcode::Negg => I::Neg,
        Opcode::Notg => I::Not,
        Opcode::Ltg => I::Lt,
        Opcode::Gtg => I::Gt,
        Opcode::Leg => I::Le,
        Opcode::Geg => I::Ge,
        Opcode::Eqg => I::Eq,
        Opcode::Neqg => I::Neq,
        Opcode::Newc => I::NewClosure(buf.get_u32()?),
        Opcode::Newa => I::NewArray,
        Opcode::Ldlg => I::LoadLocal(buf.get_u8()?),
        Opcode::Stlg => I::StoreLocal(buf.get_u8()?),
        Opcode::Ldpg => I::LoadParent { slot: buf.get_u8()?, level: buf.get_u8()? },
        Opcode::Stpg => I::StoreParent { slot: buf.get_u8()?, level: buf.get_u8()? },
        Opcode::Ldag => I::LoadElement,
        Opcode::Stag => I::StoreElement,
        Opcode::Brt => I::BranchTrue(buf.get_i32()?),
        Opcode::Brf => I::BranchFalse(buf.get_i32()?),
        Opcode::Br => I::Branch(buf.get_i32()?),
        Opcode::Call => I::Call(buf.get_u8()?),
        Opcode::Callp => I::CallPrimitive { id: buf.get_u8()?, argc: buf.get_u8()? },
        Opcode::Callv => I::CallInternal { id: buf.get_u8()?, argc: buf.get_u8()? },
        Opcode::Retg => I::Return,
        Opcode::Dup => I::Dup,
        Opcode::Newenv => I::NewEnv(buf.get_u8()?),
        Opcode::Popenv => I::PopEnv,
        Opcode::Newcp => I::NewPrimitiveClosure(buf.get_u8()?),
        Opcode::Newcv => I::NewInternalClosure(buf.get_u8()?),
    })
}

/// Map closure offsets to function indices and byte branches to instruction
/// deltas.
fn resolve(raw: RawFunction, index_of: &HashMap<usize, u32>) -> Result<Function, DecodeError> {
    let mut position: HashMap<usize, i64> = raw.code.iter().enumerate().map(|(i, (at, _))| (*at, i as i64)).collect();
    position.insert(raw.end, raw.code.len() as i64);

    let mut code = Vec::with_capacity(raw.code.len());
    for (i, (at, ins)) in raw.code.iter().enumerate() {
        let ins = match ins {
            Instruction::NewClosure(offset) => Instruction::NewClosure(
                *index_of
                    .get(&(*offset as usize))
                    .ok_or(DecodeError::BadFunctionOffset { offset: *offset })?,
            ),
            other => match other.branch_offset() {
                Some(bytes) => {
                    let target = *at as i64 + bytes as i64;
                    let index = usize::try_from(target)
                        .ok()
                        .and_then(|t| position.get(&t))
                        .ok_or(DecodeError::MisalignedBranch { offset: *at })?;
                    other.with_branch_offset((index - i as i64) as i32)
                }
                None => other.clone(),
            },
        };
        code.push(ins);
    }
    let [stack_size, env_size, num_args] = raw.header;
    Ok(Function { stack_size, env_size, num_args, code })
}
