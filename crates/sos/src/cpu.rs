use std::ops::ControlFlow;

use thiserror::Error;
use tracing::{Level, trace};

use crate::TrapHandler;
use crate::memory::{MemoryError, Ram};
use crate::ops::{INSTR_SIZE, Instruction, Op};
use crate::regs::{Register, Registers};

const INSTR_WORDS: i32 = INSTR_SIZE as i32;

/// A hardware fault raised while executing an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("illegal memory access at {address}")]
    IllegalMemoryAccess { address: i32 },
    #[error("divide by zero")]
    DivideByZero,
    #[error("illegal instruction: {0}")]
    IllegalInstruction(Instruction),
}

impl From<MemoryError> for Fault {
    fn from(err: MemoryError) -> Self {
        Self::IllegalMemoryAccess {
            address: err.address,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The process made the `EXIT` system call.
    Exit,
    /// The process made the `COREDUMP` system call.
    CoreDump,
    /// A fault the handler treated as fatal.
    Fault(Fault),
    /// The configured instruction budget ran out.
    InstructionLimit,
    /// There was no process to run.
    NoProcess,
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exit | Self::CoreDump)
    }
}

/// Result of executing a single instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// A `TRAP` was executed and needs servicing.
    Trap,
}

pub struct Cpu {
    regs: Registers,
    ram: Ram,
    instruction_limit: Option<u64>,
    executed: u64,
}

impl Cpu {
    pub fn new(ram: Ram) -> Self {
        Self {
            regs: Registers::default(),
            ram,
            instruction_limit: None,
            executed: 0,
        }
    }

    pub fn ram(&self) -> &Ram {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut Ram {
        &mut self.ram
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn register(&self, reg: Register) -> i32 {
        self.regs[reg]
    }

    pub fn set_register(&mut self, reg: Register, value: i32) {
        self.regs[reg] = value;
    }

    pub fn pc(&self) -> i32 {
        self.regs[Register::PC]
    }

    pub fn set_pc(&mut self, value: i32) {
        self.regs[Register::PC] = value;
    }

    pub fn sp(&self) -> i32 {
        self.regs[Register::SP]
    }

    pub fn set_sp(&mut self, value: i32) {
        self.regs[Register::SP] = value;
    }

    pub fn base(&self) -> i32 {
        self.regs[Register::BASE]
    }

    pub fn set_base(&mut self, value: i32) {
        self.regs[Register::BASE] = value;
    }

    pub fn lim(&self) -> i32 {
        self.regs[Register::LIM]
    }

    pub fn set_lim(&mut self, value: i32) {
        self.regs[Register::LIM] = value;
    }

    /// Stop a run with [`ExitStatus::InstructionLimit`] once this many
    /// instructions have executed in total.
    pub fn set_instruction_limit(&mut self, limit: Option<u64>) {
        self.instruction_limit = limit;
    }

    pub fn instructions_executed(&self) -> u64 {
        self.executed
    }

    /// Whether the running process may touch `address`.
    pub fn is_valid_address(&self, address: i32) -> bool {
        address >= self.base() && address <= self.lim()
    }

    fn check_address(&self, address: i32) -> Result<(), Fault> {
        if self.is_valid_address(address) {
            Ok(())
        } else {
            Err(Fault::IllegalMemoryAccess { address })
        }
    }

    /// Whether there is at least one value between SP and LIM.
    pub fn has_stack_values(&self) -> bool {
        self.sp() >= self.base() && self.sp() < self.lim()
    }

    /// Push `value` onto the stack. The stack grows down from LIM and may not
    /// leave the process; a rejected push writes nothing and leaves SP alone.
    pub fn push_stack(&mut self, value: i32) -> Result<(), Fault> {
        let sp = self.sp().wrapping_sub(1);
        self.check_address(sp)?;
        self.ram.write(sp, value)?;
        self.set_sp(sp);
        Ok(())
    }

    /// The value at SP. Reading an empty stack is an illegal access at SP.
    fn top_of_stack(&self) -> Result<i32, Fault> {
        let sp = self.sp();
        if !self.has_stack_values() {
            return Err(Fault::IllegalMemoryAccess { address: sp });
        }
        Ok(self.ram.read(sp)?)
    }

    /// Pop the value at SP. Popping an empty stack is an illegal access at SP.
    pub fn pop_stack(&mut self) -> Result<i32, Fault> {
        let value = self.top_of_stack()?;
        self.set_sp(self.sp() + 1);
        Ok(value)
    }

    /// Fetch the instruction at PC. PC must lie inside the process.
    pub fn fetch(&self) -> Result<Instruction, Fault> {
        let pc = self.pc();
        self.check_address(pc)?;
        Ok(self.ram.fetch(pc)?)
    }

    /// Execute `instr` and advance PC past it. PC advances even when the
    /// instruction faults, in which case it had no other effect.
    pub fn execute(&mut self, instr: Instruction) -> Result<Step, Fault> {
        let result = match instr.decode() {
            Some(op) => self.apply(op),
            None => Err(Fault::IllegalInstruction(instr)),
        };
        self.set_pc(self.pc().wrapping_add(INSTR_WORDS));
        self.executed += 1;
        result
    }

    pub fn step(&mut self) -> Result<Step, Fault> {
        let instr = self.fetch()?;
        self.execute(instr)
    }

    /// Branch targets are relative to BASE. The PC advance that follows every
    /// instruction is pre-compensated so that the next fetch is at exactly
    /// `BASE + target`.
    fn branch(&mut self, target: i32) {
        self.set_pc(target.wrapping_add(self.base()).wrapping_sub(INSTR_WORDS));
    }

    fn apply(&mut self, op: Op) -> Result<Step, Fault> {
        match op {
            Op::Set(dst, value) => self.regs[dst] = value,
            Op::Add(dst, x, y) => self.regs[dst] = self.regs[x].wrapping_add(self.regs[y]),
            Op::Sub(dst, x, y) => self.regs[dst] = self.regs[x].wrapping_sub(self.regs[y]),
            Op::Mul(dst, x, y) => self.regs[dst] = self.regs[x].wrapping_mul(self.regs[y]),
            Op::Div(dst, x, y) => {
                if self.regs[y] == 0 {
                    return Err(Fault::DivideByZero);
                }
                self.regs[dst] = self.regs[x].wrapping_div(self.regs[y]);
            }
            Op::Copy(dst, src) => self.regs[dst] = self.regs[src],
            Op::Branch(target) => self.branch(target),
            Op::Bne(x, y, target) => {
                if self.regs[x] != self.regs[y] {
                    self.branch(target);
                }
            }
            Op::Blt(x, y, target) => {
                if self.regs[x] < self.regs[y] {
                    self.branch(target);
                }
            }
            // Store, then bump SP: `POP SP` leaves SP one past the popped value.
            Op::Pop(dst) => {
                self.regs[dst] = self.top_of_stack()?;
                self.set_sp(self.sp().wrapping_add(1));
            }
            Op::Push(src) => self.push_stack(self.regs[src])?,
            Op::Load(dst, addr) => {
                let addr = self.regs[addr];
                self.check_address(addr)?;
                self.regs[dst] = self.ram.read(addr)?;
            }
            Op::Save(src, addr) => {
                let addr = self.regs[addr];
                self.check_address(addr)?;
                self.ram.write(addr, self.regs[src])?;
            }
            Op::Trap => return Ok(Step::Trap),
        }
        Ok(Step::Continue)
    }

    /// Deliver `fault` to the handler.
    pub fn raise<H: TrapHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        fault: Fault,
    ) -> ControlFlow<ExitStatus> {
        match fault {
            Fault::IllegalMemoryAccess { address } => handler.illegal_memory_access(self, address),
            Fault::DivideByZero => handler.divide_by_zero(self),
            Fault::IllegalInstruction(instr) => handler.illegal_instruction(self, instr),
        }
    }

    /// Run the loaded program with `handler` servicing every trap and fault,
    /// until the handler ends the run.
    pub fn run<H: TrapHandler + ?Sized>(&mut self, handler: &mut H) -> ExitStatus {
        loop {
            if self
                .instruction_limit
                .is_some_and(|limit| self.executed >= limit)
            {
                return ExitStatus::InstructionLimit;
            }

            let instr = match self.fetch() {
                Ok(instr) => instr,
                Err(fault) => {
                    // There is no instruction to resume at, so the run is over
                    // whatever the handler decides.
                    return match self.raise(handler, fault) {
                        ControlFlow::Break(status) => status,
                        ControlFlow::Continue(()) => ExitStatus::Fault(fault),
                    };
                }
            };

            if tracing::enabled!(Level::TRACE) {
                trace!("{}", self.regs);
                trace!("{:>5}: {}", self.pc(), instr);
            }

            let flow = match self.execute(instr) {
                Ok(Step::Continue) => ControlFlow::Continue(()),
                Ok(Step::Trap) => handler.system_call(self),
                Err(fault) => self.raise(handler, fault),
            };
            if let ControlFlow::Break(status) = flow {
                return status;
            }
        }
    }
}
