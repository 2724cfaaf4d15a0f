//! Process creation and scheduler entry
//!
//! - `spawn()` - load a program into a new Ready process
//! - `boot()` - spawn and run the first process
//! - `enter()` - called by the scheduler each time it selects a process;
//!   restores its context and runs its pending entry action

use alloc::format;

use mica_axiom::CommitType;
use mica_hal::{HAL, RESULT_REG};
use mica_kernel_core::{complete_entry, EntryAction, KernelError, ProcessId, SyscallResult};

use crate::error::TrapError;
use crate::registers;
use crate::Kernel;

impl<H: HAL> Kernel<H> {
    /// Load `path` into a new process named `name` and hand it to the
    /// scheduler. The program starts when the scheduler enters it.
    pub fn spawn(&mut self, name: &str, path: &str) -> Result<ProcessId, TrapError> {
        let pid = self.create_process(name, path)?;
        self.hal.fork(pid.0);
        Ok(pid)
    }

    /// Spawn the first process and put it on the CPU immediately.
    pub fn boot(&mut self, name: &str, path: &str) -> Result<ProcessId, TrapError> {
        let pid = self.create_process(name, path)?;
        self.enter(pid)?;
        Ok(pid)
    }

    fn create_process(&mut self, name: &str, path: &str) -> Result<ProcessId, TrapError> {
        let now = self.hal.now_nanos();
        let exe = self.hal.open(path)?;
        let space = self.hal.load_address_space(exe)?;

        let pid = self.state.register_process(name, None, now);
        self.state.process_mut(pid)?.entry = Some(EntryAction::StartProgram);
        self.spaces.insert(pid, space);

        self.gateway.record(
            CommitType::ProcessCreated {
                pid: pid.0,
                parent: None,
                name: name.into(),
            },
            now,
        );
        self.gateway.record(
            CommitType::ProgramLoaded {
                pid: pid.0,
                path: path.into(),
            },
            now,
        );
        self.hal
            .debug_write(&format!("[kernel] Spawned {} as PID {}", name, pid.0));
        Ok(pid)
    }

    /// Scheduler entry: make `pid` the running process.
    ///
    /// A different process still on the CPU is preempted and requeued. The
    /// selected process gets its saved registers and address space back,
    /// then its one-shot entry action runs. For the deferred half of a wait
    /// (WaitMsg, WaitAns, Join) the value written to r2 is returned.
    pub fn enter(&mut self, pid: ProcessId) -> Result<Option<SyscallResult>, TrapError> {
        let now = self.hal.now_nanos();

        if let Some(preempted) = self.state.switch_to(pid)? {
            self.save_registers(preempted);
            self.hal.ready_to_run(preempted.0);
        }

        if let Some(regs) = self
            .state
            .get_process_mut(pid)
            .and_then(|p| p.saved_registers.take())
        {
            registers::restore(&self.hal, &regs);
        }
        let space = self
            .spaces
            .get(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;
        self.hal.restore_state(space);

        match self.state.take_entry(pid) {
            None => Ok(None),
            Some(EntryAction::StartProgram) => {
                self.hal.init_registers(space);
                self.hal.run();
                Ok(None)
            }
            Some(EntryAction::ResumeForkedChild) => {
                self.hal.run();
                Ok(None)
            }
            Some(action) => {
                let result = complete_entry(&mut self.state, pid, action);
                for commit in result.commits {
                    self.gateway.record(commit, now);
                }
                self.log_completion(pid, &result.result);
                if let Some(value) = result.result.register_value() {
                    self.hal.write_register(RESULT_REG, value);
                }
                Ok(Some(result.result))
            }
        }
    }

    /// Save the CPU registers into the PCB of `pid`.
    pub(crate) fn save_registers(&mut self, pid: ProcessId) {
        let regs = registers::snapshot(&self.hal);
        if let Some(p) = self.state.get_process_mut(pid) {
            p.saved_registers = Some(regs);
        }
    }

    fn log_completion(&self, pid: ProcessId, result: &SyscallResult) {
        match result {
            SyscallResult::Ok(status) => self
                .hal
                .debug_write(&format!("[PID {}] Joined, status {}", pid.0, status)),
            SyscallResult::Err(e) => self
                .hal
                .debug_write(&format!("[PID {}] Wakeup found nothing: {}", pid.0, e)),
            other => self.log_delivery(pid, other),
        }
    }
}
