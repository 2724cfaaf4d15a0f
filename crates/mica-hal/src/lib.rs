//! Hardware Abstraction Layer trait for Mica
//!
//! The syscall layer never touches the simulated machine directly. Everything
//! outside the process-lifecycle and mailbox core is reached through the
//! [`HAL`] trait defined here:
//!
//! - **Virtual CPU**: register file, byte-addressable memory, run, halt
//! - **File system**: opening an executable by path
//! - **Address spaces**: load, clone, register initialization, activation
//! - **Scheduler**: sleep, ready-to-run, fork, yield
//! - **Diagnostics**: debug console and a monotonic clock
//!
//! # Platform Implementations
//!
//! - **Mock**: `mica-hal-mock`, an in-memory machine used by the test suites
//! - **Simulator**: the host CPU emulator loop (not part of this workspace)

#![no_std]

extern crate alloc;

pub mod registers;

use core::fmt;

pub use registers::{
    ARG_REGS, INSTRUCTION_SIZE, NEXT_PC_REG, NUM_TOTAL_REGS, PC_REG, PREV_PC_REG, RESULT_REG,
    SYSCALL_CODE_REG,
};

/// Hardware Abstraction Layer trait
///
/// All methods take `&self`: the kernel runs on a single logical CPU and
/// implementations use interior mutability for the machine state they model.
///
/// # Associated Types
///
/// - `AddressSpace`: an owned user address space (page table + memory image).
///   The kernel keeps exactly one per process and drops it when the process
///   finishes or execs a new image.
/// - `Executable`: an opened program image, consumed by `load_address_space`.
pub trait HAL: Send + Sync + 'static {
    /// Owned handle to a user address space
    type AddressSpace;

    /// Opened executable image
    type Executable;

    // === Virtual CPU ===

    /// Read user register `index` of the process currently on the CPU.
    ///
    /// Indices follow [`registers`]; out-of-range indices read as 0.
    fn read_register(&self, index: usize) -> i32;

    /// Write user register `index` of the process currently on the CPU.
    fn write_register(&self, index: usize, value: i32);

    /// Read one byte of user memory at a virtual address.
    ///
    /// # Returns
    /// * `Ok(byte)` - The byte at `address`
    /// * `Err(HalError::AddressFault)` - Address is not mapped
    fn read_memory_byte(&self, address: i32) -> Result<u8, HalError>;

    /// Transfer control into user-mode execution.
    ///
    /// On the simulator this only comes back once the machine stops; the
    /// kernel treats it as the point where the current program image owns
    /// the CPU.
    fn run(&self);

    /// Stop the whole virtual machine.
    fn halt(&self);

    // === File System ===

    /// Open an executable by path.
    ///
    /// # Returns
    /// * `Ok(Executable)` - The opened image
    /// * `Err(HalError::FileNotFound)` - No such program
    fn open(&self, path: &str) -> Result<Self::Executable, HalError>;

    // === Address Spaces ===

    /// Build a fresh address space from an executable image.
    fn load_address_space(&self, executable: Self::Executable)
        -> Result<Self::AddressSpace, HalError>;

    /// Copy an address space for a forked child.
    fn clone_address_space(&self, space: &Self::AddressSpace)
        -> Result<Self::AddressSpace, HalError>;

    /// Set the CPU registers to the entry state of the image in `space`.
    fn init_registers(&self, space: &Self::AddressSpace);

    /// Make `space` the active mapping on the CPU.
    fn restore_state(&self, space: &Self::AddressSpace);

    // === Scheduler ===

    /// Block process `pid` and give up the CPU.
    fn sleep(&self, pid: u32);

    /// Put a previously blocked process back on the ready queue.
    fn ready_to_run(&self, pid: u32);

    /// Register a newly created process as a schedulable unit.
    ///
    /// When the scheduler first selects it, it must call the kernel's entry
    /// point so the process's pending entry action runs.
    fn fork(&self, pid: u32);

    /// Move the running process `pid` to the back of the ready queue.
    fn yield_now(&self, pid: u32);

    // === Diagnostics ===

    /// Write a debug message to the platform console.
    fn debug_write(&self, msg: &str);

    /// Monotonic time in nanoseconds, used to stamp audit records.
    fn now_nanos(&self) -> u64;
}

/// HAL errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalError {
    /// Path does not name a loadable program
    FileNotFound,
    /// Executable image is malformed or does not fit in memory
    InvalidExecutable,
    /// Virtual address is not mapped
    AddressFault,
    /// Not enough physical memory for a new address space
    OutOfMemory,
    /// Operation not supported on this platform
    NotSupported,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::FileNotFound => write!(f, "file not found"),
            HalError::InvalidExecutable => write!(f, "invalid executable"),
            HalError::AddressFault => write!(f, "address fault"),
            HalError::OutOfMemory => write!(f, "out of memory"),
            HalError::NotSupported => write!(f, "not supported"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_hal_error_display() {
        assert_eq!(HalError::FileNotFound.to_string(), "file not found");
        assert_eq!(HalError::AddressFault.to_string(), "address fault");
    }

    #[test]
    fn test_hal_error_equality() {
        assert_eq!(HalError::OutOfMemory, HalError::OutOfMemory);
        assert_ne!(HalError::OutOfMemory, HalError::NotSupported);
    }
}
