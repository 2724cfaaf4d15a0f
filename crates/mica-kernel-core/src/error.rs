//! Kernel errors

use core::fmt;

use crate::types::{ProcessId, ProcessState};

/// Errors produced by state transitions.
///
/// Syscall-level errors end up as -1 in the caller's result register; the
/// variant is kept in the step result for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// No live process with this pid
    ProcessNotFound(ProcessId),
    /// No process registered under the destination name
    NameNotFound,
    /// Join on self or on a pid that is not live
    InvalidJoinTarget(ProcessId),
    /// Every buffer in the pool is in use
    NoFreeBuffer,
    /// SendAns with nothing in the inbox to answer
    InboxEmpty,
    /// The process a reply is for has finished
    SenderGone(ProcessId),
    /// Operation needs a running process and none is on the CPU
    NoCurrentProcess,
    /// Process state machine refused the transition
    InvalidTransition {
        /// Process whose state was to change
        pid: ProcessId,
        /// State it was in
        from: ProcessState,
    },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::ProcessNotFound(pid) => write!(f, "process {} not found", pid.0),
            KernelError::NameNotFound => write!(f, "no process with that name"),
            KernelError::InvalidJoinTarget(pid) => write!(f, "cannot join process {}", pid.0),
            KernelError::NoFreeBuffer => write!(f, "message buffer pool exhausted"),
            KernelError::InboxEmpty => write!(f, "inbox is empty"),
            KernelError::SenderGone(pid) => write!(f, "sender {} has finished", pid.0),
            KernelError::NoCurrentProcess => write!(f, "no process is running"),
            KernelError::InvalidTransition { pid, from } => {
                write!(f, "process {} cannot leave state {:?}", pid.0, from)
            }
        }
    }
}
