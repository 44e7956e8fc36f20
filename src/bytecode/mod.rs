//! In-memory compiled form shared by the compiler, assembler and VM.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Opcode table ────────────────────────────────────────────────────

macro_rules! opcodes {
    ($($variant:ident = $byte:literal, $mnemonic:literal, $size:literal;)*) => {
        /// One-byte operation codes. Byte 0 is never assigned, so zero padding
        /// between function records cannot be mistaken for an instruction.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($variant = $byte,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($byte => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }

            /// Encoded size in bytes, opcode included.
            pub fn size(self) -> usize {
                match self {
                    $(Opcode::$variant => $size,)*
                }
            }
        }
    };
}

opcodes! {
    Lgci = 1, "LGCI", 5;
    Lgcf32 = 2, "LGCF32", 5;
    Lgcf64 = 3, "LGCF64", 9;
    Lgcb0 = 4, "LGCB0", 1;
    Lgcb1 = 5, "LGCB1", 1;
    Lgcu = 6, "LGCU", 1;
    Lgcn = 7, "LGCN", 1;
    Lgcs = 8, "LGCS", 5;
    Popg = 9, "POPG", 1;
    Addg = 10, "ADDG", 1;
    Subg = 11, "SUBG", 1;
    Mulg = 12, "MULG", 1;
    Divg = 13, "DIVG", 1;
    Modg = 14, "MODG", 1;
    Negg = 15, "NEGG", 1;
    Notg = 16, "NOTG", 1;
    Ltg = 17, "LTG", 1;
    Gtg = 18, "GTG", 1;
    Leg = 19, "LEG", 1;
    Geg = 20, "GEG", 1;
    Eqg = 21, "EQG", 1;
    Neqg = 22, "NEQG", 1;
    Newc = 23, "NEWC", 5;
    Newa = 24, "NEWA", 1;
    Ldlg = 25, "LDLG", 2;
    Stlg = 26, "STLG", 2;
    Ldpg = 27, "LDPG", 3;
    Stpg = 28, "STPG", 3;
    Ldag = 29, "LDAG", 1;
    Stag = 30, "STAG", 1;
    Brt = 31, "BRT", 5;
    Brf = 32, "BRF", 5;
    Br = 33, "BR", 5;
    Call = 34, "CALL", 2;
    Callp = 35, "CALLP", 3;
    Callv = 36, "CALLV", 3;
    Retg = 37, "RETG", 1;
    Dup = 38, "DUP", 1;
    Newenv = 39, "NEWENV", 2;
    Popenv = 40, "POPENV", 1;
    Newcp = 41, "NEWCP", 2;
    Newcv = 42, "NEWCV", 2;
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// ── Instructions ────────────────────────────────────────────────────

/// A decoded instruction with typed operands. Branch offsets count
/// instructions relative to the branch itself; the assembler converts them to
/// byte offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    LoadInt(i32),
    LoadF32(f32),
    LoadF64(f64),
    LoadFalse,
    LoadTrue,
    LoadUndefined,
    LoadNull,
    LoadString(String),
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Neq,
    /// Closure over the function at this index of `Program::functions`.
    NewClosure(u32),
    NewArray,
    LoadLocal(u8),
    StoreLocal(u8),
    /// `level` counts parent hops from the current environment.
    LoadParent { slot: u8, level: u8 },
    StoreParent { slot: u8, level: u8 },
    LoadElement,
    StoreElement,
    BranchTrue(i32),
    BranchFalse(i32),
    Branch(i32),
    Call(u8),
    CallPrimitive { id: u8, argc: u8 },
    CallInternal { id: u8, argc: u8 },
    Return,
    Dup,
    NewEnv(u8),
    PopEnv,
    NewPrimitiveClosure(u8),
    NewInternalClosure(u8),
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        use Instruction as I;
        match self {
            I::LoadInt(_) => Opcode::Lgci,
            I::LoadF32(_) => Opcode::Lgcf32,
            I::LoadF64(_) => Opcode::Lgcf64,
            I::LoadFalse => Opcode::Lgcb0,
            I::LoadTrue => Opcode::Lgcb1,
            I::LoadUndefined => Opcode::Lgcu,
            I::LoadNull => Opcode::Lgcn,
            I::LoadString(_) => Opcode::Lgcs,
            I::Pop => Opcode::Popg,
            I::Add => Opcode::Addg,
            I::Sub => Opcode::Subg,
            I::Mul => Opcode::Mulg,
            I::Div => Opcode::Divg,
            I::Mod => Opcode::Modg,
            I::Neg => Opcode::Negg,
            I::Not => Opcode::Notg,
            I::Lt => Opcode::Ltg,
            I::Gt => Opcode::Gtg,
            I::Le => Opcode::Leg,
            I::Ge => Opcode::Geg,
            I::Eq => Opcode::Eqg,
            I::Neq => Opcode::Neqg,
            I::NewClosure(_) => Opcode::Newc,
            I::NewArray => Opcode::Newa,
            I::LoadLocal(_) => Opcode::Ldlg,
            I::StoreLocal(_) => Opcode::Stlg,
            I::LoadParent { .. } => Opcode::Ldpg,
            I::StoreParent { .. } => Opcode::Stpg,
            I::LoadElement => Opcode::Ldag,
            I::StoreElement => Opcode::Stag,
            I::BranchTrue(_) => Opcode::Brt,
            I::BranchFalse(_) => Opcode::Brf,
            I::Branch(_) => Opcode::Br,
            I::Call(_) => Opcode::Call,
            I::CallPrimitive { .. } => Opcode::Callp,
            I::CallInternal { .. } => Opcode::Callv,
            I::Return => Opcode::Retg,
            I::Dup => Opcode::Dup,
            I::NewEnv(_) => Opcode::Newenv,
            I::PopEnv => Opcode::Popenv,
            I::NewPrimitiveClosure(_) => Opcode::Newcp,
            I::NewInternalClosure(_) => Opcode::Newcv,
        }
    }

    pub fn size(&self) -> usize {
        self.opcode().size()
    }

    pub fn branch_offset(&self) -> Option<i32> {
        match self {
            Instruction::BranchTrue(o) | Instruction::BranchFalse(o) | Instruction::Branch(o) => Some(*o),
            _ => None,
        }
    }

    /// Same branch kind with a different offset; other instructions are returned unchanged.
    pub fn with_branch_offset(&self, offset: i32) -> Instruction {
        match self {
            Instruction::BranchTrue(_) => Instruction::BranchTrue(offset),
            Instruction::BranchFalse(_) => Instruction::BranchFalse(offset),
            Instruction::Branch(_) => Instruction::Branch(offset),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction as I;
        let op = self.opcode();
        match self {
            I::LoadInt(v) => write!(f, "{op} {v}"),
            I::LoadF32(v) => write!(f, "{op} {v:?}"),
            I::LoadF64(v) => write!(f, "{op} {v:?}"),
            I::LoadString(s) => write!(f, "{op} {s:?}"),
            I::NewClosure(idx) => write!(f, "{op} #{idx}"),
            I::LoadLocal(slot) | I::StoreLocal(slot) => write!(f, "{op} {slot}"),
            I::LoadParent { slot, level } | I::StoreParent { slot, level } => {
                write!(f, "{op} {slot} {level}")
            }
            I::BranchTrue(o) | I::BranchFalse(o) | I::Branch(o) => write!(f, "{op} {o:+}"),
            I::Call(argc) => write!(f, "{op} {argc}"),
            I::CallPrimitive { id, argc } | I::CallInternal { id, argc } => write!(f, "{op} {id} {argc}"),
            I::NewEnv(n) => write!(f, "{op} {n}"),
            I::NewPrimitiveClosure(id) | I::NewInternalClosure(id) => write!(f, "{op} {id}"),
            _ => write!(f, "{op}"),
        }
    }
}

// ── Functions and programs ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Maximum operand-stack depth over every path through `code`.
    pub stack_size: u8,
    pub env_size: u8,
    pub num_args: u8,
    pub code: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Index into `functions` of the function run at startup.
    pub entry: u32,
    pub functions: Vec<Function>,
}

impl Program {
    pub fn entry_function(&self) -> Option<&Function> {
        self.functions.get(self.entry as usize)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entry: #{}", self.entry)?;
        for (idx, func) in self.functions.iter().enumerate() {
            writeln!(
                f,
                "\nfunction #{idx} (stack {}, env {}, args {}):",
                func.stack_size, func.env_size, func.num_args
            )?;
            for (pc, ins) in func.code.iter().enumerate() {
                match ins.branch_offset() {
                    Some(o) => writeln!(f, "  {pc:>4}  {:<16} ; -> {}", ins.to_string(), pc as i64 + o as i64)?,
                    None => writeln!(f, "  {pc:>4}  {ins}")?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op as u8), Some(op));
        }
        assert_eq!(Opcode::ALL.len(), 42);
        assert_eq!(Opcode::from_byte(0), None);
        assert_eq!(Opcode::from_byte(43), None);
    }

    #[test]
    fn opcode_sizes_match_operand_widths() {
        assert_eq!(Opcode::Lgci.size(), 5);
        assert_eq!(Opcode::Lgcf64.size(), 9);
        assert_eq!(Opcode::Ldpg.size(), 3);
        assert_eq!(Opcode::Newenv.size(), 2);
        assert_eq!(Opcode::Retg.size(), 1);
        for &op in Opcode::ALL {
            assert!(matches!(op.size(), 1 | 2 | 3 | 5 | 9), "{op} has size {}", op.size());
        }
    }

    #[test]
    fn arithmetic_block_is_contiguous() {
        let names: Vec<&str> = (10..=22)
            .map(|b| Opcode::from_byte(b).unwrap().mnemonic())
            .collect();
        assert_eq!(
            names,
            ["ADDG", "SUBG", "MULG", "DIVG", "MODG", "NEGG", "NOTG", "LTG", "GTG", "LEG", "GEG", "EQG", "NEQG"]
        );
    }

    #[test]
    fn instruction_display() {
        assert_eq!(Instruction::LoadInt(-3).to_string(), "LGCI -3");
        assert_eq!(Instruction::LoadParent { slot: 2, level: 1 }.to_string(), "LDPG 2 1");
        assert_eq!(Instruction::Branch(-4).to_string(), "BR -4");
        assert_eq!(Instruction::BranchFalse(3).to_string(), "BRF +3");
        assert_eq!(Instruction::LoadString("a".into()).to_string(), "LGCS \"a\"");
        assert_eq!(Instruction::CallPrimitive { id: 7, argc: 2 }.to_string(), "CALLP 7 2");
    }

    #[test]
    fn with_branch_offset_keeps_kind() {
        assert_eq!(Instruction::BranchTrue(1).with_branch_offset(9), Instruction::BranchTrue(9));
        assert_eq!(Instruction::Dup.with_branch_offset(9), Instruction::Dup);
    }

    #[test]
    fn program_listing_shows_targets() {
        let prog = Program {
            entry: 0,
            functions: vec![Function {
                stack_size: 1,
                env_size: 0,
                num_args: 0,
                code: vec![
                    Instruction::LoadTrue,
                    Instruction::BranchFalse(2),
                    Instruction::LoadInt(1),
                    Instruction::Return,
                ],
            }],
        };
        let listing = prog.to_string();
        assert!(listing.contains("function #0 (stack 1, env 0, args 0)"));
        assert!(listing.contains("; -> 3"));
    }

    #[test]
    fn program_serializes_to_json() {
        let prog = Program {
            entry: 0,
            functions: vec![Function { stack_size: 1, env_size: 0, num_args: 0, code: vec![Instruction::LoadInt(2)] }],
        };
        let json = serde_json::to_value(&prog).unwrap();
        assert_eq!(json["functions"][0]["code"][0]["LoadInt"], 2);
    }
}
