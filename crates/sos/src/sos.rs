use std::collections::BTreeSet;
use std::ops::ControlFlow;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cpu::{Cpu, ExitStatus, Fault};
use crate::memory::MemoryError;
use crate::ops::Instruction;
use crate::process::{FIRST_PID, Pid, Process};
use crate::program::Program;
use crate::regs::Registers;
use crate::syscall::*;
use crate::{Device, TrapHandler};

#[derive(Debug, Error)]
pub enum SosError {
    #[error("program does not fit in RAM: {0}")]
    Memory(#[from] MemoryError),
    #[error("allocation of {0} words does not fit the address space")]
    AllocationTooLarge(usize),
}

/// A registered device and the processes that currently have it open.
pub struct DeviceInfo {
    id: i32,
    device: Box<dyn Device>,
    procs: BTreeSet<Pid>,
}

impl DeviceInfo {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn procs(&self) -> &BTreeSet<Pid> {
        &self.procs
    }

    pub fn is_open_by(&self, pid: Pid) -> bool {
        self.procs.contains(&pid)
    }
}

/// What the `COREDUMP` system call reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreDump {
    pub registers: Registers,
    /// Values popped from the top of the stack, topmost first.
    pub stack: Vec<i32>,
}

/// The simulated operating system. It loads programs, keeps the process and
/// device tables, and is the CPU's trap handler while a program runs.
pub struct Sos {
    devices: Vec<DeviceInfo>,
    processes: Vec<Process>,
    current: Option<usize>,
    next_pid: i32,
    output: Vec<i32>,
    core_dump: Option<CoreDump>,
}

impl Sos {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            processes: Vec::new(),
            current: None,
            next_pid: FIRST_PID,
            output: Vec::new(),
            core_dump: None,
        }
    }

    /// Load `program` at address 0 with `alloc_size` words for code, heap and
    /// stack, and point the CPU at it. The allocation is not checked against
    /// the program size.
    pub fn create_process(
        &mut self,
        cpu: &mut Cpu,
        program: &Program,
        alloc_size: usize,
    ) -> Result<Pid, SosError> {
        let words = program.export();
        let base: i32 = 0;
        let lim = i32::try_from(alloc_size)
            .ok()
            .and_then(|size| base.checked_add(size))
            .ok_or(SosError::AllocationTooLarge(alloc_size))?;

        cpu.ram_mut().load(base, &words)?;
        cpu.set_base(base);
        cpu.set_lim(lim);
        cpu.set_pc(base);
        cpu.set_sp(lim);

        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        self.processes.push(Process::new(pid, base, lim));
        self.current = Some(self.processes.len() - 1);
        debug!(%pid, base, lim, words = words.len(), "created process");
        Ok(pid)
    }

    /// Add `device` to the device table under `id`. Ids are chosen by the
    /// caller and must be unique.
    pub fn register_device(&mut self, mut device: Box<dyn Device>, id: i32) {
        device.set_id(id);
        debug!(id, "registered device");
        self.devices.push(DeviceInfo {
            id,
            device,
            procs: BTreeSet::new(),
        });
    }

    pub fn device(&self, id: i32) -> Option<&DeviceInfo> {
        self.devices.iter().find(|info| info.id == id)
    }

    fn device_mut(&mut self, id: i32) -> Option<&mut DeviceInfo> {
        self.devices.iter_mut().find(|info| info.id == id)
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn current_process(&self) -> Option<&Process> {
        self.current.map(|i| &self.processes[i])
    }

    fn current_pid(&self) -> Option<Pid> {
        self.current_process().map(Process::pid)
    }

    /// Values emitted by the `OUTPUT` system call, in order.
    pub fn output(&self) -> &[i32] {
        &self.output
    }

    pub fn core_dump(&self) -> Option<&CoreDump> {
        self.core_dump.as_ref()
    }

    /// Run the current process with this supervisor registered as the CPU's
    /// trap handler.
    ///
    /// A process that already terminated is not resumed; its exit status is
    /// returned again.
    pub fn run(&mut self, cpu: &mut Cpu) -> ExitStatus {
        let Some(i) = self.current else {
            warn!("no process to run");
            return ExitStatus::NoProcess;
        };
        let process = &mut self.processes[i];
        if let Some(status) = process.exit_status() {
            debug!(pid = %process.pid(), ?status, "process already terminated");
            return status;
        }
        process.go_running();
        let status = cpu.run(self);
        debug!(?status, executed = cpu.instructions_executed(), "run finished");
        status
    }

    fn terminate(&mut self, status: ExitStatus) -> ControlFlow<ExitStatus> {
        if let Some(i) = self.current {
            self.processes[i].exit(status);
        }
        ControlFlow::Break(status)
    }

    fn open(&mut self, id: i32) {
        let Some(pid) = self.current_pid() else {
            warn!(id, "OPEN without a current process");
            return;
        };
        let Some(info) = self.device_mut(id) else {
            warn!(id, "OPEN of unknown device ignored");
            return;
        };
        if !info.device.is_sharable() && info.procs.iter().any(|p| *p != pid) {
            warn!(id, %pid, "device is not sharable and already open");
            return;
        }
        info.procs.insert(pid);
    }

    fn close(&mut self, id: i32) {
        let Some(pid) = self.current_pid() else {
            warn!(id, "CLOSE without a current process");
            return;
        };
        match self.device_mut(id) {
            Some(info) => {
                info.procs.remove(&pid);
            }
            None => warn!(id, "CLOSE of unknown device ignored"),
        }
    }

    /// The device `id` if the current process may use it for I/O right now.
    fn usable_device(&mut self, id: i32) -> Option<&mut dyn Device> {
        let pid = self.current_pid()?;
        let info = self.device_mut(id)?;
        if !info.is_open_by(pid) || !info.device.is_available() {
            return None;
        }
        Some(info.device.as_mut())
    }

    fn read_device(&mut self, id: i32, address: i32) -> i32 {
        match self.usable_device(id) {
            Some(device) if device.is_readable() => device.read(address),
            _ => {
                warn!(id, address, "READ from a device that is not open and readable");
                0
            }
        }
    }

    fn write_device(&mut self, id: i32, address: i32, value: i32) {
        match self.usable_device(id) {
            Some(device) if device.is_writeable() => device.write(address, value),
            _ => warn!(id, address, "WRITE to a device that is not open and writeable"),
        }
    }

    fn dump(&mut self, cpu: &mut Cpu) -> Result<(), Fault> {
        let registers = *cpu.registers();
        let mut stack = Vec::with_capacity(COREDUMP_STACK_DEPTH);
        while stack.len() < COREDUMP_STACK_DEPTH && cpu.has_stack_values() {
            stack.push(cpu.pop_stack()?);
        }
        info!("core dump: {}", registers);
        info!("core dump stack: {:?}", stack);
        self.core_dump = Some(CoreDump { registers, stack });
        Ok(())
    }

    fn dispatch(&mut self, cpu: &mut Cpu) -> Result<ControlFlow<ExitStatus>, Fault> {
        let call = cpu.pop_stack()?;
        debug!(call, "system call");
        match call {
            SYSCALL_EXIT => return Ok(self.terminate(ExitStatus::Exit)),
            SYSCALL_OUTPUT => {
                let value = cpu.pop_stack()?;
                info!("OUTPUT: {}", value);
                self.output.push(value);
            }
            SYSCALL_GETPID => match self.current_pid() {
                Some(pid) => cpu.push_stack(pid.0)?,
                None => warn!("GETPID without a current process"),
            },
            SYSCALL_OPEN => {
                let id = cpu.pop_stack()?;
                self.open(id);
            }
            SYSCALL_CLOSE => {
                let id = cpu.pop_stack()?;
                self.close(id);
            }
            SYSCALL_READ => {
                let id = cpu.pop_stack()?;
                let address = cpu.pop_stack()?;
                let value = self.read_device(id, address);
                cpu.push_stack(value)?;
            }
            SYSCALL_WRITE => {
                let id = cpu.pop_stack()?;
                let address = cpu.pop_stack()?;
                let value = cpu.pop_stack()?;
                self.write_device(id, address, value);
            }
            SYSCALL_COREDUMP => {
                self.dump(cpu)?;
                return Ok(self.terminate(ExitStatus::CoreDump));
            }
            _ => debug!(call, "unknown system call ignored"),
        }
        Ok(ControlFlow::Continue(()))
    }
}

impl Default for Sos {
    fn default() -> Self {
        Self::new()
    }
}

impl TrapHandler for Sos {
    fn illegal_memory_access(&mut self, cpu: &mut Cpu, address: i32) -> ControlFlow<ExitStatus> {
        error!(address, pc = cpu.pc(), "illegal memory access, terminating");
        self.terminate(ExitStatus::Fault(Fault::IllegalMemoryAccess { address }))
    }

    fn divide_by_zero(&mut self, cpu: &mut Cpu) -> ControlFlow<ExitStatus> {
        error!(pc = cpu.pc(), "divide by zero, terminating");
        self.terminate(ExitStatus::Fault(Fault::DivideByZero))
    }

    fn illegal_instruction(
        &mut self,
        cpu: &mut Cpu,
        instruction: Instruction,
    ) -> ControlFlow<ExitStatus> {
        error!(pc = cpu.pc(), "illegal instruction {}, terminating", instruction);
        self.terminate(ExitStatus::Fault(Fault::IllegalInstruction(instruction)))
    }

    fn system_call(&mut self, cpu: &mut Cpu) -> ControlFlow<ExitStatus> {
        match self.dispatch(cpu) {
            Ok(flow) => flow,
            Err(fault) => cpu.raise(self, fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Ram;
    use crate::ops::Op;
    use crate::peripheral::{ConsoleDevice, KeyboardDevice};
    use crate::process::ProcessState;
    use crate::regs::Register::*;

    /// Push `args` in order, then the call number, then TRAP.
    fn call(ops: &mut Vec<Op>, args: &[i32], number: i32) {
        for arg in args {
            ops.push(Op::Set(R(4), *arg));
            ops.push(Op::Push(R(4)));
        }
        ops.push(Op::Set(R(4), number));
        ops.push(Op::Push(R(4)));
        ops.push(Op::Trap);
    }

    fn boot(ops: Vec<Op>) -> (Sos, Cpu) {
        let mut sos = Sos::new();
        let mut cpu = Cpu::new(Ram::new(1000));
        let program = Program::from_ops(ops);
        sos.create_process(&mut cpu, &program, program.size() + 50)
            .unwrap();
        (sos, cpu)
    }

    #[test]
    fn create_process_sets_registers() {
        let (sos, cpu) = boot(vec![Op::Set(R(0), 1), Op::Trap]);
        assert_eq!(cpu.base(), 0);
        assert_eq!(cpu.lim(), 58);
        assert_eq!(cpu.pc(), 0);
        assert_eq!(cpu.sp(), 58);
        assert_eq!(cpu.ram().read(2), Ok(1));
        let proc = sos.current_process().unwrap();
        assert_eq!(proc.pid(), Pid(FIRST_PID));
        assert_eq!(proc.state(), ProcessState::Created);
    }

    #[test]
    fn create_process_rejects_programs_bigger_than_ram() {
        let mut sos = Sos::new();
        let mut cpu = Cpu::new(Ram::new(8));
        let program = Program::from_ops(vec![Op::Trap; 3]);
        assert!(matches!(
            sos.create_process(&mut cpu, &program, 100),
            Err(SosError::Memory(_))
        ));
        assert!(sos.current_process().is_none());
    }

    #[test]
    fn exit_terminates_process() {
        let mut ops = vec![];
        call(&mut ops, &[], SYSCALL_EXIT);
        ops.push(Op::Set(R(0), 1));
        let (mut sos, mut cpu) = boot(ops);
        assert_eq!(sos.run(&mut cpu), ExitStatus::Exit);
        assert_eq!(cpu.register(R(0)), 0);
        assert_eq!(
            sos.current_process().unwrap().state(),
            ProcessState::Terminated
        );
    }

    #[test]
    fn run_after_exit_does_not_resume() {
        let mut ops = vec![];
        call(&mut ops, &[], SYSCALL_EXIT);
        ops.push(Op::Set(R(0), 123));
        let (mut sos, mut cpu) = boot(ops);
        assert_eq!(sos.run(&mut cpu), ExitStatus::Exit);
        let executed = cpu.instructions_executed();
        let pc = cpu.pc();

        assert_eq!(sos.run(&mut cpu), ExitStatus::Exit);
        assert_eq!(cpu.instructions_executed(), executed);
        assert_eq!(cpu.pc(), pc);
        assert_eq!(cpu.register(R(0)), 0);
    }

    #[test]
    fn run_after_fault_repeats_the_fault() {
        let (mut sos, mut cpu) = boot(vec![Op::Set(R(1), 0), Op::Div(R(0), R(0), R(1))]);
        let status = ExitStatus::Fault(Fault::DivideByZero);
        assert_eq!(sos.run(&mut cpu), status);
        assert_eq!(sos.run(&mut cpu), status);
        assert_eq!(cpu.instructions_executed(), 2);
    }

    #[test]
    fn run_without_a_process() {
        let mut sos = Sos::new();
        let mut cpu = Cpu::new(Ram::new(64));
        assert_eq!(sos.run(&mut cpu), ExitStatus::NoProcess);
        assert_eq!(cpu.instructions_executed(), 0);
    }

    #[test]
    fn output_in_order() {
        let mut ops = vec![];
        call(&mut ops, &[5], SYSCALL_OUTPUT);
        call(&mut ops, &[-12], SYSCALL_OUTPUT);
        call(&mut ops, &[], SYSCALL_EXIT);
        let (mut sos, mut cpu) = boot(ops);
        assert_eq!(sos.run(&mut cpu), ExitStatus::Exit);
        assert_eq!(sos.output(), &[5, -12]);
    }

    #[test]
    fn getpid_is_stable() {
        let mut ops = vec![];
        call(&mut ops, &[], SYSCALL_GETPID);
        ops.push(Op::Pop(R(0)));
        call(&mut ops, &[], SYSCALL_GETPID);
        ops.push(Op::Pop(R(1)));
        call(&mut ops, &[], SYSCALL_EXIT);
        let (mut sos, mut cpu) = boot(ops);
        sos.run(&mut cpu);
        assert_eq!(cpu.register(R(0)), FIRST_PID);
        assert_eq!(cpu.register(R(1)), FIRST_PID);
    }

    #[test]
    fn open_then_close() {
        let mut ops = vec![];
        call(&mut ops, &[0], SYSCALL_OPEN);
        call(&mut ops, &[0], SYSCALL_CLOSE);
        call(&mut ops, &[1], SYSCALL_OPEN);
        call(&mut ops, &[], SYSCALL_EXIT);
        let (mut sos, mut cpu) = boot(ops);
        sos.register_device(Box::new(KeyboardDevice::with_seed(1)), 0);
        sos.register_device(Box::new(ConsoleDevice::new().0), 1);
        assert_eq!(sos.run(&mut cpu), ExitStatus::Exit);
        assert!(sos.device(0).unwrap().procs().is_empty());
        assert!(sos.device(1).unwrap().is_open_by(Pid(FIRST_PID)));
    }

    #[test]
    fn unknown_device_and_call_are_ignored() {
        let mut ops = vec![];
        call(&mut ops, &[77], SYSCALL_OPEN);
        call(&mut ops, &[77], SYSCALL_CLOSE);
        call(&mut ops, &[], 42);
        call(&mut ops, &[8], SYSCALL_OUTPUT);
        call(&mut ops, &[], SYSCALL_EXIT);
        let (mut sos, mut cpu) = boot(ops);
        assert_eq!(sos.run(&mut cpu), ExitStatus::Exit);
        assert_eq!(sos.output(), &[8]);
        assert!(sos.device(77).is_none());
    }

    #[test]
    fn register_device_assigns_id() {
        let mut sos = Sos::new();
        sos.register_device(Box::new(KeyboardDevice::with_seed(1)), 7);
        let info = sos.device(7).unwrap();
        assert_eq!(info.id(), 7);
        assert_eq!(info.device().id(), 7);
        assert!(info.procs().is_empty());
    }

    #[test]
    fn read_and_write_devices() {
        let mut ops = vec![];
        call(&mut ops, &[0], SYSCALL_OPEN);
        call(&mut ops, &[1], SYSCALL_OPEN);
        // READ keyboard at address 0
        call(&mut ops, &[0, 0], SYSCALL_READ);
        ops.push(Op::Pop(R(0)));
        // WRITE 321 to console address 4
        call(&mut ops, &[321, 4, 1], SYSCALL_WRITE);
        call(&mut ops, &[], SYSCALL_EXIT);
        let (mut sos, mut cpu) = boot(ops);
        let (console, rx) = ConsoleDevice::new();
        sos.register_device(Box::new(KeyboardDevice::with_seed(3)), 0);
        sos.register_device(Box::new(console), 1);
        let expected = KeyboardDevice::with_seed(3).read(0);
        assert_eq!(sos.run(&mut cpu), ExitStatus::Exit);
        assert_eq!(cpu.register(R(0)), expected);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![(4, 321)]);
    }

    #[test]
    fn read_requires_open_device() {
        let mut ops = vec![];
        call(&mut ops, &[0, 0], SYSCALL_READ);
        ops.push(Op::Pop(R(0)));
        call(&mut ops, &[], SYSCALL_EXIT);
        let (mut sos, mut cpu) = boot(ops);
        sos.register_device(Box::new(KeyboardDevice::with_seed(3)), 0);
        cpu.set_register(R(0), 17);
        assert_eq!(sos.run(&mut cpu), ExitStatus::Exit);
        assert_eq!(cpu.register(R(0)), 0);
    }

    #[test]
    fn coredump_with_one_value() {
        let mut ops = vec![Op::Set(R(0), 11), Op::Push(R(0))];
        call(&mut ops, &[], SYSCALL_COREDUMP);
        let (mut sos, mut cpu) = boot(ops);
        assert_eq!(sos.run(&mut cpu), ExitStatus::CoreDump);
        let dump = sos.core_dump().unwrap();
        assert_eq!(dump.stack, vec![11]);
        assert_eq!(dump.registers[R(0)], 11);
        assert_eq!(cpu.sp(), cpu.lim());
        assert_eq!(
            sos.current_process().unwrap().state(),
            ProcessState::Terminated
        );
    }

    #[test]
    fn coredump_reports_at_most_three() {
        let mut ops = vec![];
        for value in 1..=5 {
            ops.push(Op::Set(R(0), value));
            ops.push(Op::Push(R(0)));
        }
        call(&mut ops, &[], SYSCALL_COREDUMP);
        let (mut sos, mut cpu) = boot(ops);
        assert_eq!(sos.run(&mut cpu), ExitStatus::CoreDump);
        assert_eq!(sos.core_dump().unwrap().stack, vec![5, 4, 3]);
        assert_eq!(cpu.lim() - cpu.sp(), 2);
    }

    #[test]
    fn trap_on_empty_stack_is_a_fault() {
        let (mut sos, mut cpu) = boot(vec![Op::Trap]);
        let lim = cpu.lim();
        assert_eq!(
            sos.run(&mut cpu),
            ExitStatus::Fault(Fault::IllegalMemoryAccess { address: lim })
        );
        assert_eq!(
            sos.current_process().unwrap().state(),
            ProcessState::Terminated
        );
    }

    #[test]
    fn faults_terminate() {
        let (mut sos, mut cpu) = boot(vec![Op::Set(R(1), 0), Op::Div(R(0), R(0), R(1))]);
        assert_eq!(
            sos.run(&mut cpu),
            ExitStatus::Fault(Fault::DivideByZero)
        );
        assert_eq!(
            sos.current_process().unwrap().state(),
            ProcessState::Terminated
        );
    }
}
