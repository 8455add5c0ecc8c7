//! Instruction encoding and decoding.
//!
//! Every instruction is four words wide: an opcode followed by three
//! operands. Unused operands are zero.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::regs::Register;

/// Number of words in a single instruction, including its operands.
pub const INSTR_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    Set = 0,
    Add = 1,
    Sub = 2,
    Mul = 3,
    Div = 4,
    Copy = 5,
    Branch = 6,
    Bne = 7,
    Blt = 8,
    Pop = 9,
    Push = 10,
    Load = 11,
    Save = 12,
    Trap = 15,
}

impl Opcode {
    pub const ALL: [Opcode; 14] = [
        Opcode::Set,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Copy,
        Opcode::Branch,
        Opcode::Bne,
        Opcode::Blt,
        Opcode::Pop,
        Opcode::Push,
        Opcode::Load,
        Opcode::Save,
        Opcode::Trap,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Set => "SET",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Copy => "COPY",
            Self::Branch => "BRANCH",
            Self::Bne => "BNE",
            Self::Blt => "BLT",
            Self::Pop => "POP",
            Self::Push => "PUSH",
            Self::Load => "LOAD",
            Self::Save => "SAVE",
            Self::Trap => "TRAP",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }
}

impl TryFrom<i32> for Opcode {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|op| *op as i32 == value)
            .ok_or(value)
    }
}

/// A raw instruction as it sits in RAM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Instruction {
    pub opcode: i32,
    pub args: [i32; 3],
}

impl Instruction {
    pub fn new(opcode: Opcode, args: [i32; 3]) -> Self {
        Self {
            opcode: opcode as i32,
            args,
        }
    }

    /// Decode into a typed operation. Returns `None` for an unknown opcode
    /// or a register operand that does not name a register.
    pub fn decode(&self) -> Option<Op> {
        let [a, b, c] = self.args;
        let reg = Register::from_index;
        let op = match Opcode::try_from(self.opcode).ok()? {
            Opcode::Set => Op::Set(reg(a)?, b),
            Opcode::Add => Op::Add(reg(a)?, reg(b)?, reg(c)?),
            Opcode::Sub => Op::Sub(reg(a)?, reg(b)?, reg(c)?),
            Opcode::Mul => Op::Mul(reg(a)?, reg(b)?, reg(c)?),
            Opcode::Div => Op::Div(reg(a)?, reg(b)?, reg(c)?),
            Opcode::Copy => Op::Copy(reg(a)?, reg(b)?),
            Opcode::Branch => Op::Branch(a),
            Opcode::Bne => Op::Bne(reg(a)?, reg(b)?, c),
            Opcode::Blt => Op::Blt(reg(a)?, reg(b)?, c),
            Opcode::Pop => Op::Pop(reg(a)?),
            Opcode::Push => Op::Push(reg(a)?),
            Opcode::Load => Op::Load(reg(a)?, reg(b)?),
            Opcode::Save => Op::Save(reg(a)?, reg(b)?),
            Opcode::Trap => Op::Trap,
        };
        Some(op)
    }
}

impl From<Op> for Instruction {
    fn from(op: Op) -> Self {
        let r = |reg: Register| reg.index() as i32;
        match op {
            Op::Set(dst, value) => Self::new(Opcode::Set, [r(dst), value, 0]),
            Op::Add(dst, x, y) => Self::new(Opcode::Add, [r(dst), r(x), r(y)]),
            Op::Sub(dst, x, y) => Self::new(Opcode::Sub, [r(dst), r(x), r(y)]),
            Op::Mul(dst, x, y) => Self::new(Opcode::Mul, [r(dst), r(x), r(y)]),
            Op::Div(dst, x, y) => Self::new(Opcode::Div, [r(dst), r(x), r(y)]),
            Op::Copy(dst, src) => Self::new(Opcode::Copy, [r(dst), r(src), 0]),
            Op::Branch(target) => Self::new(Opcode::Branch, [target, 0, 0]),
            Op::Bne(x, y, target) => Self::new(Opcode::Bne, [r(x), r(y), target]),
            Op::Blt(x, y, target) => Self::new(Opcode::Blt, [r(x), r(y), target]),
            Op::Pop(dst) => Self::new(Opcode::Pop, [r(dst), 0, 0]),
            Op::Push(src) => Self::new(Opcode::Push, [r(src), 0, 0]),
            Op::Load(dst, addr) => Self::new(Opcode::Load, [r(dst), r(addr), 0]),
            Op::Save(src, addr) => Self::new(Opcode::Save, [r(src), r(addr), 0]),
            Op::Trap => Self::new(Opcode::Trap, [0, 0, 0]),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Some(op) => fmt::Display::fmt(&op, f),
            None => write!(
                f,
                "?? [{} {} {} {}]",
                self.opcode, self.args[0], self.args[1], self.args[2]
            ),
        }
    }
}

/// A decoded instruction. Branch targets are relative to the start of the
/// program (its BASE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Set(Register, i32),
    Add(Register, Register, Register),
    Sub(Register, Register, Register),
    Mul(Register, Register, Register),
    Div(Register, Register, Register),
    Copy(Register, Register),
    Branch(i32),
    Bne(Register, Register, i32),
    Blt(Register, Register, i32),
    Pop(Register),
    Push(Register),
    /// `dst <- RAM[addr]`
    Load(Register, Register),
    /// `src -> RAM[addr]`
    Save(Register, Register),
    Trap,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(dst, value) => write!(f, "SET {dst} = {value}"),
            Self::Add(dst, x, y) => write!(f, "ADD {dst} = {x} + {y}"),
            Self::Sub(dst, x, y) => write!(f, "SUB {dst} = {x} - {y}"),
            Self::Mul(dst, x, y) => write!(f, "MUL {dst} = {x} * {y}"),
            Self::Div(dst, x, y) => write!(f, "DIV {dst} = {x} / {y}"),
            Self::Copy(dst, src) => write!(f, "COPY {dst} = {src}"),
            Self::Branch(target) => write!(f, "BRANCH @{target}"),
            Self::Bne(x, y, target) => write!(f, "BNE ({x} != {y}) @{target}"),
            Self::Blt(x, y, target) => write!(f, "BLT ({x} < {y}) @{target}"),
            Self::Pop(dst) => write!(f, "POP {dst}"),
            Self::Push(src) => write!(f, "PUSH {src}"),
            Self::Load(dst, addr) => write!(f, "LOAD {dst} <-- @{addr}"),
            Self::Save(src, addr) => write!(f, "SAVE {src} --> @{addr}"),
            Self::Trap => write!(f, "TRAP"),
        }
    }
}
