//! System call numbers understood by the supervisor. A program pushes the
//! arguments, then the call number, then executes `TRAP`.

/// Terminate the current process.
pub const SYSCALL_EXIT: i32 = 0;
/// Pop a value and emit it as program output.
pub const SYSCALL_OUTPUT: i32 = 1;
/// Push the id of the current process.
pub const SYSCALL_GETPID: i32 = 2;
/// Pop a device id and open that device for the current process.
pub const SYSCALL_OPEN: i32 = 3;
/// Pop a device id and close that device for the current process.
pub const SYSCALL_CLOSE: i32 = 4;
/// Pop a device id, then an address; push the value read from the device.
pub const SYSCALL_READ: i32 = 5;
/// Pop a device id, an address, then a value; write the value to the device.
pub const SYSCALL_WRITE: i32 = 6;
/// Report the registers and the top of the stack, then terminate.
pub const SYSCALL_COREDUMP: i32 = 9;

/// How many stack values a core dump reports at most.
pub const COREDUMP_STACK_DEPTH: usize = 3;
