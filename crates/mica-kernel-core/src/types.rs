//! Core kernel types
//!
//! Process identity, the process state machine, and the process control
//! block. All types here are pure data plus the transitions that keep them
//! consistent.

use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Number of registers in a saved user register file
pub const REGISTER_FILE_LEN: usize = 40;

/// Register a syscall result is returned in
pub const RESULT_REGISTER: usize = 2;

/// Process identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

/// Message buffer identifier (index into the buffer pool)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BufferId(pub u32);

/// What a blocked process is waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitReason {
    /// An arrival in its inbox (WaitMsg)
    Message,
    /// A reply deposited for it (WaitAns)
    Answer,
    /// The given process to finish (Join)
    Child(ProcessId),
}

impl WaitReason {
    /// Short label used in audit records
    pub fn describe(&self) -> String {
        match self {
            WaitReason::Message => String::from("message"),
            WaitReason::Answer => String::from("answer"),
            WaitReason::Child(pid) => format!("child {}", pid.0),
        }
    }
}

/// Process state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// On the CPU
    Running,
    /// Runnable, waiting for the scheduler
    Ready,
    /// Parked until the event in the reason happens
    Blocked(WaitReason),
    /// Exited
    Finished,
}

/// One-shot action the scheduler entry runs when a process is next selected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryAction {
    /// Initialize registers for a freshly loaded image and start it
    StartProgram,
    /// Resume a forked child from its saved register snapshot
    ResumeForkedChild,
    /// Report the head of the inbox to a process woken from WaitMsg
    CompleteWaitMsg,
    /// Collect the reply for a process woken from WaitAns
    CompleteWaitAns,
    /// Hand the watched process's exit status to a woken joiner
    CompleteJoin {
        /// Exit status of the process that was joined
        status: i32,
    },
}

/// Saved user register file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterFile(pub [i32; REGISTER_FILE_LEN]);

impl RegisterFile {
    /// All registers zero
    pub fn new() -> Self {
        Self([0; REGISTER_FILE_LEN])
    }

    /// Read a register; out-of-range reads as 0
    pub fn get(&self, index: usize) -> i32 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Write a register; out-of-range writes are ignored
    pub fn set(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-process activity counters
#[derive(Clone, Debug, Default)]
pub struct ProcessMetrics {
    /// Syscalls made
    pub syscall_count: u64,
    /// Messages sent
    pub messages_sent: u64,
    /// Messages placed in this inbox
    pub messages_received: u64,
    /// Replies sent
    pub answers_sent: u64,
    /// Replies collected
    pub answers_received: u64,
    /// Time of last syscall (nanos since boot)
    pub last_active_ns: u64,
    /// Creation time (nanos since boot)
    pub start_time_ns: u64,
}

/// Process control block
#[derive(Clone, Debug)]
pub struct Process {
    /// Process ID
    pub pid: ProcessId,
    /// Name, also the key in the name directory
    pub name: String,
    /// Process that forked this one
    pub parent: Option<ProcessId>,
    /// Current state
    pub state: ProcessState,
    /// Exit status (set on exit or on a refused join)
    pub exit_status: Option<i32>,
    /// Received buffers, oldest first
    pub inbox: VecDeque<BufferId>,
    /// Action to run when the scheduler next selects this process
    pub entry: Option<EntryAction>,
    /// User registers while off the CPU
    pub saved_registers: Option<RegisterFile>,
    /// Activity counters
    pub metrics: ProcessMetrics,
}

impl Process {
    /// Create a Ready process with an empty inbox.
    pub fn new(pid: ProcessId, name: &str, parent: Option<ProcessId>, timestamp: u64) -> Self {
        Self {
            pid,
            name: String::from(name),
            parent,
            state: ProcessState::Ready,
            exit_status: None,
            inbox: VecDeque::new(),
            entry: None,
            saved_registers: None,
            metrics: ProcessMetrics {
                start_time_ns: timestamp,
                ..Default::default()
            },
        }
    }

    /// Whether the process has not exited
    pub fn is_live(&self) -> bool {
        self.state != ProcessState::Finished
    }

    /// The event this process is parked on, if any
    pub fn waiting_for(&self) -> Option<WaitReason> {
        match self.state {
            ProcessState::Blocked(reason) => Some(reason),
            _ => None,
        }
    }

    /// Ready → Running
    pub fn run(&mut self) -> Result<(), KernelError> {
        match self.state {
            ProcessState::Ready => {
                self.state = ProcessState::Running;
                Ok(())
            }
            from => Err(self.refuse(from)),
        }
    }

    /// Running → Blocked(reason)
    pub fn block(&mut self, reason: WaitReason) -> Result<(), KernelError> {
        match self.state {
            ProcessState::Running => {
                self.state = ProcessState::Blocked(reason);
                Ok(())
            }
            from => Err(self.refuse(from)),
        }
    }

    /// Blocked → Ready, arming `entry` for the next time it runs
    pub fn wake(&mut self, entry: EntryAction) -> Result<(), KernelError> {
        match self.state {
            ProcessState::Blocked(_) => {
                self.state = ProcessState::Ready;
                self.entry = Some(entry);
                Ok(())
            }
            from => Err(self.refuse(from)),
        }
    }

    /// Running → Ready
    pub fn preempt(&mut self) -> Result<(), KernelError> {
        match self.state {
            ProcessState::Running => {
                self.state = ProcessState::Ready;
                Ok(())
            }
            from => Err(self.refuse(from)),
        }
    }

    /// Any live state → Finished
    pub fn finish(&mut self, status: i32) -> Result<(), KernelError> {
        match self.state {
            ProcessState::Finished => Err(self.refuse(ProcessState::Finished)),
            _ => {
                self.state = ProcessState::Finished;
                self.exit_status = Some(status);
                self.entry = None;
                Ok(())
            }
        }
    }

    fn refuse(&self, from: ProcessState) -> KernelError {
        KernelError::InvalidTransition {
            pid: self.pid,
            from,
        }
    }
}
