//! Runtime-checkable kernel invariants
//!
//! Used by unit tests after each transition, by the proptest suite after
//! arbitrary syscall sequences, and by the runtime kernel's
//! `check_invariants` debug hook.
//!
//! # Invariants
//!
//! 1. **Buffer Ownership**: every in-use buffer has exactly one holder (an
//!    inbox entry or an answer tracker entry) and every holder names an
//!    in-use buffer
//! 2. **Waiting Consistency**: a process blocked on Message has an empty inbox
//! 3. **Answer Tracker Liveness**: every tracked sender is live
//! 4. **Process Table Consistency**: keys match PCBs, pids are below
//!    `next_pid`, no finished PCB remains, directory entries match
//! 5. **Single Runner**: at most one process is Running and it is `current`
//! 6. **Join Table Consistency**: waiters are blocked on the pid they watch,
//!    and every process blocked on a child is recorded as a waiter

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::state::KernelState;
use crate::types::{BufferId, ProcessState, WaitReason};

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

impl InvariantViolation {
    fn new(invariant: &'static str, description: String) -> Self {
        Self {
            invariant,
            description,
        }
    }
}

/// Check all kernel invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_buffer_ownership(state));
    violations.extend(check_waiting_consistency(state));
    violations.extend(check_answer_liveness(state));
    violations.extend(check_process_table(state));
    violations.extend(check_single_runner(state));
    violations.extend(check_join_table(state));

    violations
}

/// Invariant 1: one holder per in-use buffer
fn check_buffer_ownership(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut holders: BTreeMap<BufferId, usize> = BTreeMap::new();

    let inbox_entries = state
        .processes
        .values()
        .flat_map(|p| p.inbox.iter().map(move |id| (p.pid, *id)));
    let answer_entries = state.answers.iter().map(|(pid, id)| (*pid, *id));

    for (pid, id) in inbox_entries.chain(answer_entries) {
        *holders.entry(id).or_insert(0) += 1;
        if !state.buffers.is_in_use(id) {
            violations.push(InvariantViolation::new(
                "buffer_ownership",
                format!("Process {} holds free or unknown buffer {}", pid.0, id.0),
            ));
        }
    }

    for buf in state.buffers.iter().filter(|b| !b.empty) {
        match holders.get(&buf.id).copied().unwrap_or(0) {
            1 => {}
            0 => violations.push(InvariantViolation::new(
                "buffer_ownership",
                format!("Buffer {} is in use but unreachable", buf.id.0),
            )),
            n => violations.push(InvariantViolation::new(
                "buffer_ownership",
                format!("Buffer {} has {} holders", buf.id.0, n),
            )),
        }
    }

    violations
}

/// Invariant 2: blocked on Message implies empty inbox
fn check_waiting_consistency(state: &KernelState) -> Vec<InvariantViolation> {
    state
        .processes
        .values()
        .filter(|p| p.waiting_for() == Some(WaitReason::Message) && !p.inbox.is_empty())
        .map(|p| {
            InvariantViolation::new(
                "waiting_consistency",
                format!(
                    "Process {} waits for a message with {} queued",
                    p.pid.0,
                    p.inbox.len()
                ),
            )
        })
        .collect()
}

/// Invariant 3: tracked answers belong to live processes
fn check_answer_liveness(state: &KernelState) -> Vec<InvariantViolation> {
    state
        .answers
        .keys()
        .filter(|pid| !state.process_exists(**pid))
        .map(|pid| {
            InvariantViolation::new(
                "answer_liveness",
                format!("Answer tracked for non-existent process {}", pid.0),
            )
        })
        .collect()
}

/// Invariant 4: process table and name directory agree
fn check_process_table(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for (pid, process) in &state.processes {
        if process.pid != *pid {
            violations.push(InvariantViolation::new(
                "process_table",
                format!("Table key {} holds PCB for {}", pid.0, process.pid.0),
            ));
        }
        if pid.0 >= state.next_pid {
            violations.push(InvariantViolation::new(
                "process_table",
                format!("Process {} exists but next_pid is {}", pid.0, state.next_pid),
            ));
        }
        if process.state == ProcessState::Finished {
            violations.push(InvariantViolation::new(
                "process_table",
                format!("Finished process {} still in the table", pid.0),
            ));
        }
        if state.exit_records.contains_key(pid) {
            violations.push(InvariantViolation::new(
                "process_table",
                format!("Live process {} has an exit record", pid.0),
            ));
        }
    }

    for (name, pid) in &state.directory {
        match state.processes.get(pid) {
            Some(p) if p.name == *name => {}
            Some(p) => violations.push(InvariantViolation::new(
                "process_table",
                format!("Name {} points at process {} named {}", name, pid.0, p.name),
            )),
            None => violations.push(InvariantViolation::new(
                "process_table",
                format!("Name {} points at non-existent process {}", name, pid.0),
            )),
        }
    }

    violations
}

/// Invariant 5: one runner, and it is `current`
fn check_single_runner(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let running: Vec<_> = state
        .processes
        .values()
        .filter(|p| p.state == ProcessState::Running)
        .map(|p| p.pid)
        .collect();

    if running.len() > 1 {
        violations.push(InvariantViolation::new(
            "single_runner",
            format!("{} processes are Running", running.len()),
        ));
    }
    for pid in running {
        if state.current != Some(pid) {
            violations.push(InvariantViolation::new(
                "single_runner",
                format!("Process {} is Running but not current", pid.0),
            ));
        }
    }

    violations
}

/// Invariant 6: join table matches blocked states
fn check_join_table(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for (watched, waiters) in &state.join_waiters {
        for waiter in waiters {
            let ok = state
                .processes
                .get(waiter)
                .map(|p| p.waiting_for() == Some(WaitReason::Child(*watched)))
                .unwrap_or(false);
            if !ok {
                violations.push(InvariantViolation::new(
                    "join_table",
                    format!(
                        "Process {} listed as waiting for {} but is not blocked on it",
                        waiter.0, watched.0
                    ),
                ));
            }
        }
    }

    for p in state.processes.values() {
        if let Some(WaitReason::Child(watched)) = p.waiting_for() {
            let listed = state
                .join_waiters
                .get(&watched)
                .map(|w| w.contains(&p.pid))
                .unwrap_or(false);
            if !listed {
                violations.push(InvariantViolation::new(
                    "join_table",
                    format!(
                        "Process {} blocked on {} without a join-wait entry",
                        p.pid.0, watched.0
                    ),
                ));
            }
        }
    }

    violations
}

/// Assert all invariants hold (panic if not)
pub fn assert_invariants(state: &KernelState) {
    if let Some(v) = check_all_invariants(state).first() {
        panic!("Invariant violated: {} ({})", v.invariant, v.description);
    }
}
