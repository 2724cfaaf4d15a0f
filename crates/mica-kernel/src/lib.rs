//! Mica Kernel - trap and syscall layer
//!
//! `Kernel<H>` is the runtime wrapper around the pure [`KernelState`]. It owns
//! the HAL, the per-process address spaces and the audit gateway, and it is
//! the only place that touches registers:
//!
//! - `trap` - [`Kernel::handle_syscall`], the trap entry for user syscalls
//! - `lifecycle` - spawning programs and the scheduler entry [`Kernel::enter`]
//! - `registers` - PC advance, argument reads, C-string decoding
//! - `syscall` - the user ABI syscall numbers
//! - `config` - [`KernelConfig`]
//!
//! Every trap is bracketed by the Axiom gateway: the trap is journaled in the
//! SysLog, the state changes made by `step` go to the CommitLog.

#![no_std]
extern crate alloc;

pub mod config;
pub mod error;
mod lifecycle;
pub mod registers;
pub mod syscall;
mod trap;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use mica_axiom::AxiomGateway;
use mica_hal::HAL;
use mica_kernel_core::{check_all_invariants, InvariantViolation, KernelState, Process};

pub use config::{ConfigError, ExecFailurePolicy, KernelConfig};
pub use error::TrapError;
pub use registers::DecodeError;
pub use syscall::SyscallCode;
pub use trap::TrapOutcome;

// Re-export the types callers need to inspect results
pub use mica_axiom::{AuditSummary, CommitType};
pub use mica_hal::HalError;
pub use mica_kernel_core::{
    BufferId, EntryAction, KernelError, ProcessId, ProcessState, SyscallResult, WaitReason,
};

/// The syscall layer bound to a HAL.
pub struct Kernel<H: HAL> {
    pub(crate) hal: H,
    pub(crate) state: KernelState,
    /// Address space of every live process
    pub(crate) spaces: BTreeMap<ProcessId, H::AddressSpace>,
    pub(crate) gateway: AxiomGateway,
    pub(crate) config: KernelConfig,
}

impl<H: HAL> Kernel<H> {
    /// Create a kernel with the default configuration.
    pub fn new(hal: H) -> Self {
        Self::build(hal, KernelConfig::default())
    }

    /// Create a kernel with a custom configuration.
    pub fn with_config(hal: H, config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(hal, config))
    }

    fn build(hal: H, config: KernelConfig) -> Self {
        let boot_time = hal.now_nanos();
        Self {
            state: KernelState::new(config.buffer_pool_capacity),
            spaces: BTreeMap::new(),
            gateway: AxiomGateway::new(boot_time, config.syslog_capacity),
            hal,
            config,
        }
    }

    /// Get reference to HAL
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Kernel tables (read-only)
    pub fn state(&self) -> &KernelState {
        &self.state
    }

    /// Active configuration
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Audit gateway (SysLog + CommitLog)
    pub fn gateway(&self) -> &AxiomGateway {
        &self.gateway
    }

    /// Process on the CPU
    pub fn current_pid(&self) -> Option<ProcessId> {
        self.state.current_pid()
    }

    /// Get process info
    pub fn process(&self, pid: ProcessId) -> Option<&Process> {
        self.state.get_process(pid)
    }

    /// Exit status of a finished process
    pub fn exit_status(&self, pid: ProcessId) -> Option<i32> {
        self.state.exit_status_of(pid)
    }

    /// Whether the kernel holds an address space for `pid`
    pub fn has_address_space(&self, pid: ProcessId) -> bool {
        self.spaces.contains_key(&pid)
    }

    /// Run every state invariant; empty means consistent.
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = check_all_invariants(&self.state);
        for pid in self.state.processes.keys() {
            if !self.spaces.contains_key(pid) {
                violations.push(InvariantViolation {
                    invariant: "address_space_ownership",
                    description: alloc::format!("Process {} has no address space", pid.0),
                });
            }
        }
        for pid in self.spaces.keys() {
            if !self.state.processes.contains_key(pid) {
                violations.push(InvariantViolation {
                    invariant: "address_space_ownership",
                    description: alloc::format!("Address space kept for finished process {}", pid.0),
                });
            }
        }
        violations
    }
}
