//! Programs and a small assembler for them.
//!
//! Source is one instruction per line, mnemonic first, operands separated by
//! commas or whitespace. `#` starts a comment. A line may begin with one or
//! more `name:` labels; a label stands for the program-relative address of
//! the next instruction and can be used wherever a number is expected.
//!
//! ```text
//!         SET R0, 0
//!         SET R1, 3
//!         SET R2, 1
//! loop:   ADD R0, R0, R2     # count up to R1
//!         BNE R0, R1, loop
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::ops::{INSTR_SIZE, Instruction, Op, Opcode};
use crate::regs::Register;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: unknown mnemonic `{name}`")]
    UnknownMnemonic { line: usize, name: String },
    #[error("line {line}: {mnemonic} takes {expected} operand(s), found {found}")]
    OperandCount {
        line: usize,
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: `{text}` is not a register")]
    BadRegister { line: usize, text: String },
    #[error("line {line}: `{text}` is not a number or label")]
    BadValue { line: usize, text: String },
    #[error("line {line}: `{name}` is not a valid label")]
    BadLabel { line: usize, name: String },
    #[error("line {line}: label `{name}` is already defined")]
    DuplicateLabel { line: usize, name: String },
    #[error("line {line}: undefined label `{name}`")]
    UndefinedLabel { line: usize, name: String },
}

/// A sequence of instructions, loaded contiguously starting at BASE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ops(ops: impl IntoIterator<Item = Op>) -> Self {
        Self {
            instructions: ops.into_iter().map(Instruction::from).collect(),
        }
    }

    pub fn push(&mut self, instruction: impl Into<Instruction>) {
        self.instructions.push(instruction.into());
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Number of words the program occupies in RAM.
    pub fn size(&self) -> usize {
        self.instructions.len() * INSTR_SIZE
    }

    /// The flat word image, four words per instruction.
    pub fn export(&self) -> Vec<i32> {
        bytemuck::cast_slice(&self.instructions).to_vec()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instr) in self.instructions.iter().enumerate() {
            writeln!(f, "{:>5}: {}", i * INSTR_SIZE, instr)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Operand {
    Reg,
    Value,
}

fn operands(opcode: Opcode) -> &'static [Operand] {
    use Operand::*;
    match opcode {
        Opcode::Set => &[Reg, Value],
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => &[Reg, Reg, Reg],
        Opcode::Copy | Opcode::Load | Opcode::Save => &[Reg, Reg],
        Opcode::Branch => &[Value],
        Opcode::Bne | Opcode::Blt => &[Reg, Reg, Value],
        Opcode::Pop | Opcode::Push => &[Reg],
        Opcode::Trap => &[],
    }
}

fn is_label(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Statement<'a> {
    line: usize,
    mnemonic: &'a str,
    operands: Vec<&'a str>,
}

impl Statement<'_> {
    fn assemble(&self, labels: &HashMap<&str, i32>) -> Result<Instruction, ParseError> {
        let line = self.line;
        let opcode =
            Opcode::from_mnemonic(self.mnemonic).ok_or_else(|| ParseError::UnknownMnemonic {
                line,
                name: self.mnemonic.to_string(),
            })?;
        let kinds = operands(opcode);
        if kinds.len() != self.operands.len() {
            return Err(ParseError::OperandCount {
                line,
                mnemonic: opcode.mnemonic(),
                expected: kinds.len(),
                found: self.operands.len(),
            });
        }

        let mut args = [0; 3];
        for ((arg, kind), text) in args.iter_mut().zip(kinds).zip(&self.operands) {
            *arg = match kind {
                Operand::Reg => text
                    .parse::<Register>()
                    .map(|reg| reg.index() as i32)
                    .map_err(|()| ParseError::BadRegister {
                        line,
                        text: text.to_string(),
                    })?,
                Operand::Value => self.value(text, labels)?,
            };
        }
        Ok(Instruction::new(opcode, args))
    }

    fn value(&self, text: &str, labels: &HashMap<&str, i32>) -> Result<i32, ParseError> {
        if let Ok(value) = text.parse() {
            return Ok(value);
        }
        if !is_label(text) {
            return Err(ParseError::BadValue {
                line: self.line,
                text: text.to_string(),
            });
        }
        labels
            .get(text)
            .copied()
            .ok_or_else(|| ParseError::UndefinedLabel {
                line: self.line,
                name: text.to_string(),
            })
    }
}

impl FromStr for Program {
    type Err = ParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let mut labels = HashMap::new();
        let mut statements = Vec::new();

        for (i, raw) in source.lines().enumerate() {
            let line = i + 1;
            let mut text = raw.split_once('#').map_or(raw, |(code, _)| code).trim();

            while let Some((name, rest)) = text.split_once(':') {
                let name = name.trim();
                if !is_label(name) {
                    return Err(ParseError::BadLabel {
                        line,
                        name: name.to_string(),
                    });
                }
                let address = (statements.len() * INSTR_SIZE) as i32;
                if labels.insert(name, address).is_some() {
                    return Err(ParseError::DuplicateLabel {
                        line,
                        name: name.to_string(),
                    });
                }
                text = rest.trim();
            }

            let mut words = text
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|word| !word.is_empty());
            let Some(mnemonic) = words.next() else {
                continue;
            };
            statements.push(Statement {
                line,
                mnemonic,
                operands: words.collect(),
            });
        }

        let instructions = statements
            .iter()
            .map(|statement| statement.assemble(&labels))
            .collect::<Result<_, _>>()?;
        Ok(Self { instructions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::Register::*;

    #[test]
    fn assemble_with_labels() {
        let program: Program = "
            # count R0 up to R1
                    SET R0, 0
                    SET R1 3
                    SET R2, 1
            loop:   ADD R0, R0, R2
                    BNE R0, R1, loop
                    BRANCH end
            end:
                    TRAP
        "
        .parse()
        .unwrap();
        assert_eq!(
            program,
            Program::from_ops([
                Op::Set(R(0), 0),
                Op::Set(R(1), 3),
                Op::Set(R(2), 1),
                Op::Add(R(0), R(0), R(2)),
                Op::Bne(R(0), R(1), 12),
                Op::Branch(24),
                Op::Trap,
            ])
        );
    }

    #[test]
    fn mnemonics_and_registers_ignore_case() {
        let program: Program = "copy sp, r4\npush Lim\nset r0, -7".parse().unwrap();
        assert_eq!(
            program.instructions(),
            &[
                Instruction::from(Op::Copy(SP, R(4))),
                Instruction::from(Op::Push(LIM)),
                Instruction::from(Op::Set(R(0), -7)),
            ]
        );
    }

    #[test]
    fn export_is_flat() {
        let program = Program::from_ops([Op::Set(R(1), 9), Op::Trap]);
        assert_eq!(program.len(), 2);
        assert_eq!(program.size(), 8);
        assert_eq!(program.export(), vec![0, 1, 9, 0, 15, 0, 0, 0]);
        assert!(Program::new().export().is_empty());
    }

    #[test]
    fn listing() {
        let program = Program::from_ops([Op::Push(R(0)), Op::Trap]);
        assert_eq!(program.to_string(), "    0: PUSH R0\n    4: TRAP\n");
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = "SET R0, 1\nJMP 4".parse::<Program>().unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownMnemonic {
                line: 2,
                name: "JMP".into()
            }
        );

        let err = "\n\nADD R0, R1".parse::<Program>().unwrap_err();
        assert!(matches!(
            err,
            ParseError::OperandCount {
                line: 3,
                expected: 3,
                found: 2,
                ..
            }
        ));

        let err = "PUSH R7".parse::<Program>().unwrap_err();
        assert!(matches!(err, ParseError::BadRegister { line: 1, .. }));

        let err = "BRANCH nowhere".parse::<Program>().unwrap_err();
        assert!(matches!(err, ParseError::UndefinedLabel { line: 1, .. }));

        let err = "SET R0, 1x".parse::<Program>().unwrap_err();
        assert!(matches!(err, ParseError::BadValue { line: 1, .. }));

        let err = "a: TRAP\na: TRAP".parse::<Program>().unwrap_err();
        assert!(matches!(err, ParseError::DuplicateLabel { line: 2, .. }));

        let err = "9lives: TRAP".parse::<Program>().unwrap_err();
        assert!(matches!(err, ParseError::BadLabel { line: 1, .. }));
    }
}
