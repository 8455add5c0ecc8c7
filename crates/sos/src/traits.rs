use std::ops::ControlFlow;

use crate::cpu::{Cpu, ExitStatus};
use crate::ops::Instruction;

/// The privileged side of the CPU. The CPU never decides what a fault or a
/// trap means; it hands the event to the handler registered for the run and
/// stops as soon as the handler returns [`ControlFlow::Break`].
///
/// Every callback gets the CPU back so the handler can inspect registers and
/// use the stack accessors. If a handler continues after a fault, the
/// faulting instruction has no effect.
pub trait TrapHandler {
    /// An access outside `[BASE, LIM]`, including stack overflow/underflow and
    /// a program counter that left the process.
    fn illegal_memory_access(&mut self, cpu: &mut Cpu, address: i32) -> ControlFlow<ExitStatus>;

    fn divide_by_zero(&mut self, cpu: &mut Cpu) -> ControlFlow<ExitStatus>;

    fn illegal_instruction(
        &mut self,
        cpu: &mut Cpu,
        instruction: Instruction,
    ) -> ControlFlow<ExitStatus>;

    /// A `TRAP` instruction was executed. The call number and its arguments
    /// are on the stack.
    fn system_call(&mut self, cpu: &mut Cpu) -> ControlFlow<ExitStatus>;
}

/// An I/O device as seen by the supervisor. The supervisor only ever talks to
/// a device through these capabilities.
pub trait Device {
    /// The id assigned by the supervisor when the device was registered.
    fn id(&self) -> i32;
    fn set_id(&mut self, id: i32);

    /// Whether more than one process may have the device open at once.
    fn is_sharable(&self) -> bool;
    /// Whether the device can take a request right now.
    fn is_available(&self) -> bool;
    fn is_readable(&self) -> bool;
    fn is_writeable(&self) -> bool;

    fn read(&mut self, address: i32) -> i32;
    fn write(&mut self, address: i32, value: i32);
}
