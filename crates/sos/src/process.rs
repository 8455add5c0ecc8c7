use std::fmt;

use crate::cpu::ExitStatus;

/// First id handed out by the supervisor.
pub const FIRST_PID: i32 = 1001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Loaded into RAM, not yet run.
    Created,
    Running,
    Terminated,
}

/// Process control block. The registers of the single resident process live
/// in the CPU, so the record only tracks identity, state and memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pid: Pid,
    state: ProcessState,
    base: i32,
    lim: i32,
    exit_status: Option<ExitStatus>,
}

impl Process {
    pub fn new(pid: Pid, base: i32, lim: i32) -> Self {
        Self {
            pid,
            state: ProcessState::Created,
            base,
            lim,
            exit_status: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn base(&self) -> i32 {
        self.base
    }

    pub fn lim(&self) -> i32 {
        self.lim
    }

    pub fn go_running(&mut self) {
        if self.state == ProcessState::Created {
            self.state = ProcessState::Running;
        }
    }

    /// How the process ended, once it is Terminated.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Terminate with `status`. Only the first exit is recorded.
    pub fn exit(&mut self, status: ExitStatus) {
        if self.state != ProcessState::Terminated {
            self.state = ProcessState::Terminated;
            self.exit_status = Some(status);
        }
    }
}
