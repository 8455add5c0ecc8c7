use std::fmt;
use std::ops::{Index, IndexMut};

/// Number of general-purpose registers (`R0`..`R4`).
pub const NUM_GEN_REGS: usize = 5;
/// Total number of registers in the register file.
pub const NUM_REGS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// General-purpose register `R0`..`R4`.
    R(u8),
    /// Program counter.
    PC,
    /// Stack pointer.
    SP,
    /// Bottom of the memory the running process may touch.
    BASE,
    /// Top of the memory the running process may touch.
    LIM,
}

impl Register {
    pub const ALL: [Register; NUM_REGS] = [
        Register::R(0),
        Register::R(1),
        Register::R(2),
        Register::R(3),
        Register::R(4),
        Register::PC,
        Register::SP,
        Register::BASE,
        Register::LIM,
    ];

    /// General-purpose register `R<n>`, if `n` names one.
    pub fn general(n: u8) -> Option<Self> {
        ((n as usize) < NUM_GEN_REGS).then_some(Self::R(n))
    }

    /// Map an operand index from the instruction stream to a register.
    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// Position in the register file.
    ///
    /// # Panics
    ///
    /// On a general-purpose register out of range, such as `R(5)`. Use
    /// [`Register::general`] for unchecked numbers.
    pub fn index(self) -> usize {
        match self {
            Self::R(x) => {
                assert!(
                    (x as usize) < NUM_GEN_REGS,
                    "R{x} is not a general-purpose register"
                );
                x as usize
            }
            Self::PC => 5,
            Self::SP => 6,
            Self::BASE => 7,
            Self::LIM => 8,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::R(x) => write!(f, "R{}", x),
            Self::PC => write!(f, "PC"),
            Self::SP => write!(f, "SP"),
            Self::BASE => write!(f, "BASE"),
            Self::LIM => write!(f, "LIM"),
        }
    }
}

impl std::str::FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PC" => Ok(Self::PC),
            "SP" => Ok(Self::SP),
            "BASE" => Ok(Self::BASE),
            "LIM" => Ok(Self::LIM),
            name => {
                let x: u8 = name.strip_prefix('R').ok_or(())?.parse().map_err(|_| ())?;
                Self::general(x).ok_or(())
            }
        }
    }
}

/// The register file. All values are zero after reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers([i32; NUM_REGS]);

impl Registers {
    pub fn as_array(&self) -> &[i32; NUM_REGS] {
        &self.0
    }
}

impl Index<Register> for Registers {
    type Output = i32;
    fn index(&self, reg: Register) -> &i32 {
        &self.0[reg.index()]
    }
}

impl IndexMut<Register> for Registers {
    fn index_mut(&mut self, reg: Register) -> &mut i32 {
        &mut self.0[reg.index()]
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..NUM_GEN_REGS {
            write!(f, "r{}={} ", i, self.0[i])?;
        }
        write!(
            f,
            "PC={} SP={} BASE={} LIM={}",
            self[Register::PC],
            self[Register::SP],
            self[Register::BASE],
            self[Register::LIM]
        )
    }
}
