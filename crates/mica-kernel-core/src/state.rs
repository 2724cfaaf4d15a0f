//! Kernel state - every table the syscall layer shares
//!
//! `KernelState` has no HAL dependency. Registers, address spaces and the
//! scheduler belong to the runtime wrapper (`mica-kernel`); everything that
//! must stay consistent across processes lives here and changes only through
//! [`step`](crate::step::step), [`complete_entry`](crate::step::complete_entry)
//! and the few lifecycle helpers below.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::buffer::{BufferPool, MessageBuffer};
use crate::error::KernelError;
use crate::types::{BufferId, EntryAction, Process, ProcessId, ProcessState};

/// The pure kernel state.
pub struct KernelState {
    /// Process table (live processes only)
    pub processes: BTreeMap<ProcessId, Process>,
    /// Name directory used to address SendMsg
    pub directory: BTreeMap<String, ProcessId>,
    /// Shared message buffers
    pub buffers: BufferPool,
    /// Join-wait table: watched pid → processes waiting for it to exit
    pub join_waiters: BTreeMap<ProcessId, Vec<ProcessId>>,
    /// Answer tracker: original sender → buffer holding its reply
    pub answers: BTreeMap<ProcessId, BufferId>,
    /// Exit status of every finished process
    pub exit_records: BTreeMap<ProcessId, i32>,
    /// Process on the CPU
    pub current: Option<ProcessId>,
    /// Next process ID to allocate
    pub next_pid: u32,
    /// Messages delivered since boot
    pub total_messages: u64,
}

impl KernelState {
    /// Create an empty state with `buffer_capacity` message buffers.
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            processes: BTreeMap::new(),
            directory: BTreeMap::new(),
            buffers: BufferPool::new(buffer_capacity),
            join_waiters: BTreeMap::new(),
            answers: BTreeMap::new(),
            exit_records: BTreeMap::new(),
            current: None,
            next_pid: 1,
            total_messages: 0,
        }
    }

    /// Generate next process ID
    pub fn alloc_pid(&mut self) -> ProcessId {
        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Create a Ready process and publish it in the name directory.
    ///
    /// A name already in the directory is rebound to the new process.
    pub fn register_process(
        &mut self,
        name: &str,
        parent: Option<ProcessId>,
        timestamp: u64,
    ) -> ProcessId {
        let pid = self.alloc_pid();
        self.insert_process(Process::new(pid, name, parent, timestamp));
        pid
    }

    pub(crate) fn insert_process(&mut self, process: Process) {
        self.directory.insert(process.name.clone(), process.pid);
        self.processes.insert(process.pid, process);
    }

    // ========================================================================
    // Read-only accessors
    // ========================================================================

    /// Get process info
    pub fn get_process(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(&pid)
    }

    /// Get mutable process info
    pub fn get_process_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    /// Get a process or fail with `ProcessNotFound`
    pub fn process(&self, pid: ProcessId) -> Result<&Process, KernelError> {
        self.processes
            .get(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))
    }

    /// Mutable variant of [`KernelState::process`]
    pub fn process_mut(&mut self, pid: ProcessId) -> Result<&mut Process, KernelError> {
        self.processes
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))
    }

    /// Whether `pid` names a live process
    pub fn process_exists(&self, pid: ProcessId) -> bool {
        self.processes.get(&pid).map(Process::is_live).unwrap_or(false)
    }

    /// Resolve a destination name to a live pid.
    ///
    /// Both lookups can fail: the name may be unknown, or it may point at a
    /// process that has since left the table.
    pub fn resolve_name(&self, name: &str) -> Result<ProcessId, KernelError> {
        let pid = *self
            .directory
            .get(name)
            .ok_or(KernelError::NameNotFound)?;
        if self.process_exists(pid) {
            Ok(pid)
        } else {
            Err(KernelError::ProcessNotFound(pid))
        }
    }

    /// Process on the CPU, if any
    pub fn current_pid(&self) -> Option<ProcessId> {
        self.current
    }

    /// Exit status recorded for a finished process
    pub fn exit_status_of(&self, pid: ProcessId) -> Option<i32> {
        self.exit_records.get(&pid).copied()
    }

    /// Get all processes
    pub fn list_processes(&self) -> Vec<(ProcessId, &Process)> {
        self.processes.iter().map(|(&pid, p)| (pid, p)).collect()
    }

    /// Head of a process's inbox without dequeuing it
    pub fn peek_message(&self, pid: ProcessId) -> Option<&MessageBuffer> {
        let head = *self.processes.get(&pid)?.inbox.front()?;
        self.buffers.get(head)
    }

    // ========================================================================
    // Mutations outside `step`
    // ========================================================================

    /// Put `pid` on the CPU.
    ///
    /// A different process still Running is preempted first; its pid is
    /// returned so the caller can save its registers.
    pub fn switch_to(&mut self, pid: ProcessId) -> Result<Option<ProcessId>, KernelError> {
        if self.current == Some(pid) && self.process(pid)?.state == ProcessState::Running {
            return Ok(None);
        }

        // Check the target first so a refused switch leaves the CPU alone.
        let target_state = self.process(pid)?.state;
        if target_state != ProcessState::Ready {
            return Err(KernelError::InvalidTransition {
                pid,
                from: target_state,
            });
        }

        let mut preempted = None;
        if let Some(running) = self.current.take() {
            if let Some(p) = self.processes.get_mut(&running) {
                if p.state == ProcessState::Running {
                    p.preempt()?;
                    preempted = Some(running);
                }
            }
        }

        self.process_mut(pid)?.run()?;
        self.current = Some(pid);
        Ok(preempted)
    }

    /// Take the one-shot entry action armed for `pid`
    pub fn take_entry(&mut self, pid: ProcessId) -> Option<EntryAction> {
        self.processes.get_mut(&pid)?.entry.take()
    }

    /// Remove the tracked answer for `sender` and free its buffer.
    ///
    /// Returns the buffer id and the reply text.
    pub fn take_answer(&mut self, sender: ProcessId) -> Option<(BufferId, String)> {
        let id = self.answers.remove(&sender)?;
        let text = self
            .buffers
            .get(id)
            .and_then(|b| b.answer.clone())
            .unwrap_or_default();
        self.buffers.release(id);
        Some((id, text))
    }

    /// Bump the syscall counters of `pid`
    pub fn update_syscall_metrics(&mut self, pid: ProcessId, timestamp: u64) {
        if let Some(p) = self.processes.get_mut(&pid) {
            p.metrics.syscall_count += 1;
            p.metrics.last_active_ns = timestamp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WaitReason;

    #[test]
    fn test_register_and_resolve() {
        let mut state = KernelState::new(4);
        let a = state.register_process("alpha", None, 0);
        let b = state.register_process("beta", Some(a), 0);

        assert_eq!(a, ProcessId(1));
        assert_eq!(b, ProcessId(2));
        assert_eq!(state.resolve_name("beta"), Ok(b));
        assert_eq!(state.resolve_name("gamma"), Err(KernelError::NameNotFound));
        assert_eq!(state.get_process(b).unwrap().parent, Some(a));
    }

    #[test]
    fn test_resolve_stale_directory_entry() {
        let mut state = KernelState::new(4);
        let a = state.register_process("alpha", None, 0);
        state.processes.remove(&a);

        assert_eq!(
            state.resolve_name("alpha"),
            Err(KernelError::ProcessNotFound(a))
        );
    }

    #[test]
    fn test_switch_to_preempts_running() {
        let mut state = KernelState::new(4);
        let a = state.register_process("a", None, 0);
        let b = state.register_process("b", None, 0);

        assert_eq!(state.switch_to(a), Ok(None));
        assert_eq!(state.switch_to(b), Ok(Some(a)));
        assert_eq!(state.get_process(a).unwrap().state, ProcessState::Ready);
        assert_eq!(state.get_process(b).unwrap().state, ProcessState::Running);
        assert_eq!(state.current_pid(), Some(b));

        // Re-selecting the running process is a no-op
        assert_eq!(state.switch_to(b), Ok(None));
    }

    #[test]
    fn test_switch_to_blocked_is_refused() {
        let mut state = KernelState::new(4);
        let a = state.register_process("a", None, 0);
        let b = state.register_process("b", None, 0);
        state.switch_to(b).unwrap();
        state.get_process_mut(b).unwrap().block(WaitReason::Message).unwrap();
        state.current = None;
        state.switch_to(a).unwrap();

        assert!(state.switch_to(b).is_err());
        // The refused switch left the running process alone
        assert_eq!(state.current_pid(), Some(a));
        assert_eq!(state.get_process(a).unwrap().state, ProcessState::Running);
    }

    #[test]
    fn test_take_answer_frees_buffer() {
        let mut state = KernelState::new(2);
        let a = state.register_process("a", None, 0);
        let id = state.buffers.allocate(a, "hello").unwrap();
        state.buffers.get_mut(id).unwrap().answer = Some(String::from("hi"));
        state.answers.insert(a, id);

        assert_eq!(state.take_answer(a), Some((id, String::from("hi"))));
        assert_eq!(state.buffers.free_count(), 2);
        assert_eq!(state.take_answer(a), None);
    }

    #[test]
    fn test_peek_message_does_not_dequeue() {
        let mut state = KernelState::new(2);
        let a = state.register_process("a", None, 0);
        let id = state.buffers.allocate(a, "m1").unwrap();
        state.get_process_mut(a).unwrap().inbox.push_back(id);

        assert_eq!(state.peek_message(a).unwrap().message, "m1");
        assert_eq!(state.peek_message(a).unwrap().id, id);
        assert_eq!(state.get_process(a).unwrap().inbox.len(), 1);
    }

    #[test]
    fn test_update_syscall_metrics() {
        let mut state = KernelState::new(1);
        let a = state.register_process("a", None, 10);
        state.update_syscall_metrics(a, 50);
        state.update_syscall_metrics(a, 70);

        let m = &state.get_process(a).unwrap().metrics;
        assert_eq!(m.syscall_count, 2);
        assert_eq!(m.last_active_ns, 70);
        assert_eq!(m.start_time_ns, 10);
    }
}
