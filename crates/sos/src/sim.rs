use std::sync::mpsc::Receiver;

use tracing::debug;

use crate::cpu::{Cpu, ExitStatus};
use crate::memory::Ram;
use crate::peripheral::{ConsoleDevice, KeyboardDevice};
use crate::process::Pid;
use crate::program::Program;
use crate::sos::{Sos, SosError};
use crate::Device;

pub const DEFAULT_RAM_SIZE: usize = 1000;
/// Words of heap and stack given to a process on top of its code.
pub const DEFAULT_HEADROOM: usize = 50;

pub const KEYBOARD_ID: i32 = 0;
pub const CONSOLE_ID: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub ram_size: usize,
    /// Words allocated to the process. Defaults to the program size plus
    /// `headroom`.
    pub alloc_size: Option<usize>,
    pub headroom: usize,
    pub instruction_limit: Option<u64>,
    /// Register the keyboard and console under [`KEYBOARD_ID`] and
    /// [`CONSOLE_ID`].
    pub standard_devices: bool,
    pub keyboard_seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ram_size: DEFAULT_RAM_SIZE,
            alloc_size: None,
            headroom: DEFAULT_HEADROOM,
            instruction_limit: None,
            standard_devices: true,
            keyboard_seed: None,
        }
    }
}

/// A complete machine: RAM, CPU and the supervisor.
pub struct Sim {
    cpu: Cpu,
    sos: Sos,
    config: SimConfig,
    console: Option<Receiver<(i32, i32)>>,
}

impl Sim {
    pub fn new(config: SimConfig) -> Self {
        let mut cpu = Cpu::new(Ram::new(config.ram_size));
        cpu.set_instruction_limit(config.instruction_limit);
        let mut sos = Sos::new();

        let mut console = None;
        if config.standard_devices {
            let keyboard = match config.keyboard_seed {
                Some(seed) => KeyboardDevice::with_seed(seed),
                None => KeyboardDevice::new(),
            };
            let (device, rx) = ConsoleDevice::new();
            sos.register_device(Box::new(keyboard), KEYBOARD_ID);
            sos.register_device(Box::new(device), CONSOLE_ID);
            console = Some(rx);
        }

        Self {
            cpu,
            sos,
            config,
            console,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn sos(&self) -> &Sos {
        &self.sos
    }

    pub fn register_device(&mut self, device: Box<dyn Device>, id: i32) {
        self.sos.register_device(device, id);
    }

    /// Create a process for `program`.
    pub fn load(&mut self, program: &Program) -> Result<Pid, SosError> {
        let alloc_size = self
            .config
            .alloc_size
            .unwrap_or(program.size() + self.config.headroom);
        debug!(alloc_size, "loading program");
        self.sos.create_process(&mut self.cpu, program, alloc_size)
    }

    pub fn run(&mut self) -> ExitStatus {
        self.sos.run(&mut self.cpu)
    }

    /// Values from the `OUTPUT` system call.
    pub fn output(&self) -> &[i32] {
        self.sos.output()
    }

    /// `(address, value)` pairs written to the standard console since the
    /// last call.
    pub fn drain_console(&self) -> Vec<(i32, i32)> {
        self.console
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default()
    }
}
