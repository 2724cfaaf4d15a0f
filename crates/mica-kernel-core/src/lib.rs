//! Mica Kernel Core - pure state machine for process lifecycle and mailbox IPC
//!
//! This crate holds the kernel-side state the syscall layer mutates and the
//! transition function that mutates it. It knows nothing about registers,
//! memory or the scheduler: the runtime wrapper (`mica-kernel`) decodes traps,
//! calls [`step`], and carries out the wakeups the step reports.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    mica-kernel-core                       │
//! │                                                           │
//! │   ┌────────────────┐        ┌──────────────┐              │
//! │   │  KernelState   │        │   step()     │              │
//! │   │  - processes   │───────▶│  transitions │              │
//! │   │  - directory   │        └──────────────┘              │
//! │   │  - buffers     │        ┌──────────────┐              │
//! │   │  - join table  │        │  invariants  │              │
//! │   │  - answers     │        └──────────────┘              │
//! │   └────────────────┘                                      │
//! └───────────────────────────────────────────────────────────┘
//!                              │ used by
//!                              ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                       mica-kernel                         │
//! │   trap decoding, PC handling, HAL calls, audit logging    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `types` - ProcessId, ProcessState, WaitReason, EntryAction, Process
//! - `buffer` - the fixed-capacity message buffer pool
//! - `state` - KernelState with every shared table
//! - `step` - `step(state, pid, syscall) -> StepResult`
//! - `invariants` - checks over a whole KernelState
//! - `error` - KernelError

#![no_std]
extern crate alloc;

pub mod buffer;
pub mod error;
pub mod invariants;
pub mod state;
pub mod step;
pub mod types;

pub use buffer::{BufferPool, MessageBuffer};
pub use error::KernelError;
pub use invariants::{check_all_invariants, InvariantViolation};
pub use state::KernelState;
pub use step::{complete_entry, step, StepResult, Syscall, SyscallResult};
pub use types::{
    BufferId, EntryAction, Process, ProcessId, ProcessMetrics, ProcessState, RegisterFile,
    WaitReason, REGISTER_FILE_LEN, RESULT_REGISTER,
};
