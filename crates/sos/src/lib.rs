mod cpu;
pub mod memory;
pub mod ops;
pub mod peripheral;
pub mod process;
pub mod program;
mod regs;
mod sim;
mod sos;
pub mod syscall;
mod traits;

pub use cpu::{Cpu, ExitStatus, Fault, Step};
pub use ops::{INSTR_SIZE, Instruction, Op, Opcode};
pub use process::{FIRST_PID, Pid, Process, ProcessState};
pub use program::{ParseError, Program};
pub use regs::{NUM_GEN_REGS, NUM_REGS, Register, Registers};
pub use sim::{
    CONSOLE_ID, DEFAULT_HEADROOM, DEFAULT_RAM_SIZE, KEYBOARD_ID, Sim, SimConfig,
};
pub use sos::{CoreDump, DeviceInfo, Sos, SosError};
pub use traits::{Device, TrapHandler};
