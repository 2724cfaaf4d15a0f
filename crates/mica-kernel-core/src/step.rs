//! Pure step function
//!
//! `step(state, pid, syscall, timestamp)` applies one decoded syscall to the
//! kernel tables. It never touches registers or the scheduler; instead the
//! returned [`StepResult`] tells the runtime what to write back, which
//! processes became runnable, and which commits to append to the audit log.
//!
//! Deferred completions (a process woken from WaitMsg, WaitAns or Join) run
//! through [`complete_entry`] when the scheduler next selects the process.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use mica_axiom::CommitType;

use crate::error::KernelError;
use crate::state::KernelState;
use crate::types::{BufferId, EntryAction, Process, ProcessId, RegisterFile, WaitReason, RESULT_REGISTER};

// ============================================================================
// Syscall definitions
// ============================================================================

/// Decoded syscall, arguments already read out of registers and memory
#[derive(Clone, Debug)]
pub enum Syscall {
    /// Terminate the caller
    Exit { status: i32 },
    /// Create a child from the caller's register snapshot
    Fork { registers: RegisterFile },
    /// Wait for another process to exit
    Join { target: ProcessId },
    /// Record that a new program image replaced the caller's
    Exec { path: String },
    /// Queue a message for the named process
    SendMsg { dest: String, body: String },
    /// Report the oldest queued message, blocking while there is none
    WaitMsg,
    /// Reply to the oldest queued message
    SendAns { body: String },
    /// Collect the caller's reply, blocking while there is none
    WaitAns,
    /// Give up the CPU
    Yield,
}

// ============================================================================
// Syscall results
// ============================================================================

/// What the kernel hands back to the caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyscallResult {
    /// Success with value
    Ok(i32),
    /// Error; the caller sees -1
    Err(KernelError),
    /// Head of the inbox
    Message {
        buffer: BufferId,
        sender: Option<ProcessId>,
        body: String,
    },
    /// Reply collected
    Answer { buffer: BufferId, body: String },
    /// Caller is now parked
    Blocked(WaitReason),
    /// Caller finished
    Exited(i32),
}

impl SyscallResult {
    /// Value the caller sees in its result register, if it returns at all
    pub fn register_value(&self) -> Option<i32> {
        match self {
            SyscallResult::Ok(v) => Some(*v),
            SyscallResult::Err(_) => Some(-1),
            SyscallResult::Message { buffer, .. } => Some(buffer.0 as i32),
            SyscallResult::Answer { buffer, .. } => Some(buffer.0 as i32),
            SyscallResult::Blocked(_) | SyscallResult::Exited(_) => None,
        }
    }

    /// Whether the syscall failed
    pub fn is_err(&self) -> bool {
        matches!(self, SyscallResult::Err(_))
    }
}

/// Outcome of one transition
#[derive(Clone, Debug)]
pub struct StepResult {
    /// Value for the caller
    pub result: SyscallResult,
    /// Processes moved Blocked → Ready; the runtime hands them to the scheduler
    pub wakeups: Vec<ProcessId>,
    /// State mutations for the commit log, in order
    pub commits: Vec<CommitType>,
}

impl StepResult {
    fn err(e: KernelError) -> Self {
        Self {
            result: SyscallResult::Err(e),
            wakeups: vec![],
            commits: vec![],
        }
    }

    fn ok(result: SyscallResult, commits: Vec<CommitType>) -> Self {
        Self {
            result,
            wakeups: vec![],
            commits,
        }
    }
}

/// Apply one syscall made by `from_pid`.
pub fn step(
    state: &mut KernelState,
    from_pid: ProcessId,
    syscall: Syscall,
    timestamp: u64,
) -> StepResult {
    if !state.process_exists(from_pid) {
        return StepResult::err(KernelError::ProcessNotFound(from_pid));
    }
    state.update_syscall_metrics(from_pid, timestamp);

    match syscall {
        Syscall::Exit { status } => step_exit(state, from_pid, status),
        Syscall::Fork { registers } => step_fork(state, from_pid, registers, timestamp),
        Syscall::Join { target } => step_join(state, from_pid, target),
        Syscall::Exec { path } => StepResult::ok(
            SyscallResult::Ok(0),
            vec![CommitType::ProgramLoaded {
                pid: from_pid.0,
                path,
            }],
        ),
        Syscall::SendMsg { dest, body } => step_send_msg(state, from_pid, &dest, &body),
        Syscall::WaitMsg => step_wait_msg(state, from_pid),
        Syscall::SendAns { body } => step_send_ans(state, from_pid, body),
        Syscall::WaitAns => step_wait_ans(state, from_pid),
        Syscall::Yield => step_yield(state, from_pid),
    }
}

/// Run the deferred half of a wait for a process the scheduler just selected.
pub fn complete_entry(state: &mut KernelState, pid: ProcessId, action: EntryAction) -> StepResult {
    match action {
        EntryAction::StartProgram | EntryAction::ResumeForkedChild => {
            StepResult::ok(SyscallResult::Ok(0), vec![])
        }
        EntryAction::CompleteWaitMsg => match report_head(state, pid) {
            Some(result) => StepResult::ok(result, vec![]),
            None => StepResult::err(KernelError::InboxEmpty),
        },
        EntryAction::CompleteWaitAns => match collect_answer(state, pid) {
            Some((result, commit)) => StepResult::ok(result, vec![commit]),
            None => StepResult::err(KernelError::InboxEmpty),
        },
        EntryAction::CompleteJoin { status } => StepResult::ok(SyscallResult::Ok(status), vec![]),
    }
}

// ============================================================================
// Individual syscall handlers
// ============================================================================

fn step_exit(state: &mut KernelState, from_pid: ProcessId, status: i32) -> StepResult {
    let mut process = match state.processes.remove(&from_pid) {
        Some(p) => p,
        None => return StepResult::err(KernelError::ProcessNotFound(from_pid)),
    };
    let mut commits = Vec::new();

    // Queued messages are lost; their senders are never answered.
    while let Some(id) = process.inbox.pop_front() {
        state.buffers.release(id);
        commits.push(CommitType::MessageDropped {
            owner: from_pid.0,
            buffer: id.0,
        });
    }

    if let Some(id) = state.answers.remove(&from_pid) {
        state.buffers.release(id);
        commits.push(CommitType::BufferReleased { buffer: id.0 });
    }

    // finish() only fails on an already finished PCB, which is never in the table
    let _ = process.finish(status);
    if state.directory.get(&process.name) == Some(&from_pid) {
        state.directory.remove(&process.name);
    }
    state.exit_records.insert(from_pid, status);
    if state.current == Some(from_pid) {
        state.current = None;
    }
    commits.push(CommitType::ProcessExited {
        pid: from_pid.0,
        status,
    });

    let mut wakeups = Vec::new();
    for waiter in state.join_waiters.remove(&from_pid).unwrap_or_default() {
        let Some(p) = state.processes.get_mut(&waiter) else {
            continue;
        };
        if p.waiting_for() == Some(WaitReason::Child(from_pid))
            && p.wake(EntryAction::CompleteJoin { status }).is_ok()
        {
            wakeups.push(waiter);
            commits.push(CommitType::ProcessWoken { pid: waiter.0 });
        }
    }

    StepResult {
        result: SyscallResult::Exited(status),
        wakeups,
        commits,
    }
}

fn step_fork(
    state: &mut KernelState,
    from_pid: ProcessId,
    registers: RegisterFile,
    timestamp: u64,
) -> StepResult {
    let parent_name = match state.process(from_pid) {
        Ok(p) => p.name.clone(),
        Err(e) => return StepResult::err(e),
    };

    let child_pid = state.alloc_pid();
    let name = format!("{}#{}", parent_name, child_pid.0);

    let mut child_regs = registers;
    child_regs.set(RESULT_REGISTER, 0);

    let mut child = Process::new(child_pid, &name, Some(from_pid), timestamp);
    child.saved_registers = Some(child_regs);
    child.entry = Some(EntryAction::ResumeForkedChild);
    state.insert_process(child);

    StepResult::ok(
        SyscallResult::Ok(child_pid.0 as i32),
        vec![CommitType::ProcessCreated {
            pid: child_pid.0,
            parent: Some(from_pid.0),
            name,
        }],
    )
}

fn step_join(state: &mut KernelState, from_pid: ProcessId, target: ProcessId) -> StepResult {
    if target == from_pid || !state.process_exists(target) {
        if let Some(p) = state.get_process_mut(from_pid) {
            p.exit_status = Some(-1);
        }
        return StepResult::ok(
            SyscallResult::Err(KernelError::InvalidJoinTarget(target)),
            vec![CommitType::JoinRefused {
                pid: from_pid.0,
                target: target.0,
            }],
        );
    }

    let reason = WaitReason::Child(target);
    block_caller(state, from_pid, reason)
        .map(|result| {
            state.join_waiters.entry(target).or_default().push(from_pid);
            result
        })
        .unwrap_or_else(StepResult::err)
}

fn step_send_msg(state: &mut KernelState, from_pid: ProcessId, dest: &str, body: &str) -> StepResult {
    let dest_pid = match state.resolve_name(dest) {
        Ok(pid) => pid,
        Err(e) => return StepResult::err(e),
    };

    let id = match state.buffers.allocate(from_pid, body) {
        Some(id) => id,
        None => return StepResult::err(KernelError::NoFreeBuffer),
    };

    let mut commits = vec![CommitType::MessageSent {
        from: from_pid.0,
        to: dest_pid.0,
        buffer: id.0,
    }];
    let mut wakeups = Vec::new();

    if let Some(dest_proc) = state.processes.get_mut(&dest_pid) {
        dest_proc.inbox.push_back(id);
        dest_proc.metrics.messages_received += 1;
        if dest_proc.waiting_for() == Some(WaitReason::Message)
            && dest_proc.wake(EntryAction::CompleteWaitMsg).is_ok()
        {
            wakeups.push(dest_pid);
            commits.push(CommitType::ProcessWoken { pid: dest_pid.0 });
        }
    }
    if let Some(sender) = state.processes.get_mut(&from_pid) {
        sender.metrics.messages_sent += 1;
    }
    state.total_messages += 1;

    StepResult {
        result: SyscallResult::Ok(id.0 as i32),
        wakeups,
        commits,
    }
}

fn step_wait_msg(state: &mut KernelState, from_pid: ProcessId) -> StepResult {
    match report_head(state, from_pid) {
        Some(result) => StepResult::ok(result, vec![]),
        None => block_caller(state, from_pid, WaitReason::Message).unwrap_or_else(StepResult::err),
    }
}

fn step_send_ans(state: &mut KernelState, from_pid: ProcessId, body: String) -> StepResult {
    let id = match state
        .get_process_mut(from_pid)
        .and_then(|p| p.inbox.pop_front())
    {
        Some(id) => id,
        None => return StepResult::err(KernelError::InboxEmpty),
    };

    let sender = match state.buffers.get_mut(id) {
        Some(buf) => {
            buf.answer = Some(body);
            buf.sender
        }
        None => None,
    };

    let sender = match sender {
        Some(pid) if state.process_exists(pid) => pid,
        gone => {
            state.buffers.release(id);
            return StepResult::ok(
                SyscallResult::Err(KernelError::SenderGone(gone.unwrap_or(from_pid))),
                vec![CommitType::BufferReleased { buffer: id.0 }],
            );
        }
    };

    let mut commits = vec![CommitType::AnswerSent {
        from: from_pid.0,
        to: sender.0,
        buffer: id.0,
    }];

    // Only the most recent reply per sender is kept.
    if let Some(older) = state.answers.insert(sender, id) {
        if older != id {
            state.buffers.release(older);
            commits.push(CommitType::BufferReleased { buffer: older.0 });
        }
    }

    if let Some(p) = state.get_process_mut(from_pid) {
        p.metrics.answers_sent += 1;
    }

    let mut wakeups = Vec::new();
    if let Some(p) = state.processes.get_mut(&sender) {
        if p.waiting_for() == Some(WaitReason::Answer)
            && p.wake(EntryAction::CompleteWaitAns).is_ok()
        {
            wakeups.push(sender);
            commits.push(CommitType::ProcessWoken { pid: sender.0 });
        }
    }

    StepResult {
        result: SyscallResult::Ok(id.0 as i32),
        wakeups,
        commits,
    }
}

fn step_wait_ans(state: &mut KernelState, from_pid: ProcessId) -> StepResult {
    match collect_answer(state, from_pid) {
        Some((result, commit)) => StepResult::ok(result, vec![commit]),
        None => block_caller(state, from_pid, WaitReason::Answer).unwrap_or_else(StepResult::err),
    }
}

fn step_yield(state: &mut KernelState, from_pid: ProcessId) -> StepResult {
    let preempted = state.process_mut(from_pid).and_then(Process::preempt);
    match preempted {
        Ok(()) => {
            if state.current == Some(from_pid) {
                state.current = None;
            }
            StepResult::ok(SyscallResult::Ok(0), vec![])
        }
        Err(e) => StepResult::err(e),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Park the running caller and take it off the CPU.
fn block_caller(
    state: &mut KernelState,
    pid: ProcessId,
    reason: WaitReason,
) -> Result<StepResult, KernelError> {
    state.process_mut(pid)?.block(reason)?;
    if state.current == Some(pid) {
        state.current = None;
    }
    Ok(StepResult::ok(
        SyscallResult::Blocked(reason),
        vec![CommitType::ProcessBlocked {
            pid: pid.0,
            reason: reason.describe(),
        }],
    ))
}

fn report_head(state: &KernelState, pid: ProcessId) -> Option<SyscallResult> {
    let buf = state.peek_message(pid)?;
    Some(SyscallResult::Message {
        buffer: buf.id,
        sender: buf.sender,
        body: buf.message.clone(),
    })
}

fn collect_answer(state: &mut KernelState, pid: ProcessId) -> Option<(SyscallResult, CommitType)> {
    let (buffer, body) = state.take_answer(pid)?;
    if let Some(p) = state.get_process_mut(pid) {
        p.metrics.answers_received += 1;
    }
    Some((
        SyscallResult::Answer { buffer, body },
        CommitType::AnswerCollected {
            pid: pid.0,
            buffer: buffer.0,
        },
    ))
}
