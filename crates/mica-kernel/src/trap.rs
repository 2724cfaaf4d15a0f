//! Trap entry: decode a syscall from registers and dispatch it.
//!
//! Each handler performs exactly one protocol and leaves the caller in one
//! of three shapes: resumed with PC advanced and a value in r2, parked with
//! PC already advanced, or gone (exited, replaced by a new image, or the
//! machine halted).

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use mica_axiom::CommitType;
use mica_hal::{HAL, RESULT_REG};
use mica_kernel_core::{step, ProcessId, StepResult, Syscall, SyscallResult, WaitReason};

use crate::config::ExecFailurePolicy;
use crate::error::TrapError;
use crate::registers::{self, decode_cstring};
use crate::syscall::SyscallCode;
use crate::Kernel;

/// What became of the trapping process
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Back to the caller with PC advanced; r2 holds the result
    Resume(SyscallResult),
    /// Back to the caller with PC advanced and -1 in r2; the failure was
    /// outside the kernel tables (bad string, HAL error)
    Fault(TrapError),
    /// Caller parked until the scheduler enters it again
    Blocked(WaitReason),
    /// Caller gave up the CPU and is Ready
    Yielded,
    /// A new program image replaced the caller
    Replaced,
    /// Exec could not load the program; PC left on the trap
    ExecFailed(TrapError),
    /// Caller finished
    Exited(i32),
    /// Machine stopped
    Halted,
}

impl TrapOutcome {
    /// Value journaled as the trap's return
    fn logged_result(&self) -> i64 {
        match self {
            TrapOutcome::Resume(r) => r.register_value().map(i64::from).unwrap_or(0),
            TrapOutcome::Fault(_) | TrapOutcome::ExecFailed(_) => -1,
            TrapOutcome::Exited(status) => i64::from(*status),
            TrapOutcome::Blocked(_)
            | TrapOutcome::Yielded
            | TrapOutcome::Replaced
            | TrapOutcome::Halted => 0,
        }
    }
}

impl<H: HAL> Kernel<H> {
    /// Handle a syscall trap raised by the process on the CPU.
    ///
    /// `code` is the value the program left in r2; arguments are read from
    /// r4..r7. Syscall failures never escape: they are written to r2 as -1.
    pub fn handle_syscall(&mut self, code: i32) -> TrapOutcome {
        let now = self.hal.now_nanos();
        let pid = match self.state.current_pid() {
            Some(pid) => pid,
            None => {
                self.hal
                    .debug_write(&format!("[kernel] Syscall {} with no running process", code));
                self.hal.halt();
                return TrapOutcome::Halted;
            }
        };

        let args = registers::read_args(&self.hal);
        let ticket = self.gateway.begin(pid.0, code, args, now);

        let (outcome, commits) = match SyscallCode::from_code(code) {
            Some(syscall) => {
                if self.config.trace_syscalls {
                    self.hal.debug_write(&format!(
                        "[PID {}] {}({}, {}, {}, {})",
                        pid.0,
                        syscall.name(),
                        args[0],
                        args[1],
                        args[2],
                        args[3]
                    ));
                }
                self.dispatch(pid, syscall, args, now)
            }
            None => {
                self.hal
                    .debug_write(&format!("[PID {}] Unexpected syscall {}", pid.0, code));
                self.hal.halt();
                (TrapOutcome::Halted, vec![])
            }
        };

        self.gateway
            .complete(ticket, outcome.logged_result(), commits, now);
        outcome
    }

    fn dispatch(
        &mut self,
        pid: ProcessId,
        syscall: SyscallCode,
        args: [i32; 4],
        now: u64,
    ) -> (TrapOutcome, Vec<CommitType>) {
        match syscall {
            SyscallCode::Halt => {
                self.hal.debug_write(&format!("[PID {}] Halt", pid.0));
                self.hal.halt();
                (TrapOutcome::Halted, vec![])
            }
            SyscallCode::Exit => self.sys_exit(pid, args[0], now),
            SyscallCode::Exec => self.sys_exec(pid, args[0], now),
            SyscallCode::Fork => self.sys_fork(pid, now),
            SyscallCode::Yield => self.sys_yield(pid, now),
            SyscallCode::Join => {
                registers::advance_pc(&self.hal);
                // Negative pids can never be live; 0 is never allocated
                let target = ProcessId(u32::try_from(args[0]).unwrap_or(0));
                let result = step(&mut self.state, pid, Syscall::Join { target }, now);
                if result.result.is_err() {
                    self.hal.debug_write(&format!(
                        "[PID {}] Join({}) refused",
                        pid.0, args[0]
                    ));
                }
                self.finish_step(pid, result)
            }
            SyscallCode::SendMsg => self.sys_send_msg(pid, args, now),
            SyscallCode::WaitMsg => {
                registers::advance_pc(&self.hal);
                let result = step(&mut self.state, pid, Syscall::WaitMsg, now);
                self.log_delivery(pid, &result.result);
                self.finish_step(pid, result)
            }
            SyscallCode::SendAns => self.sys_send_ans(pid, args[0], now),
            SyscallCode::WaitAns => {
                registers::advance_pc(&self.hal);
                let result = step(&mut self.state, pid, Syscall::WaitAns, now);
                self.log_delivery(pid, &result.result);
                self.finish_step(pid, result)
            }
        }
    }

    // ========================================================================
    // Process lifecycle
    // ========================================================================

    fn sys_exit(&mut self, pid: ProcessId, status: i32, now: u64) -> (TrapOutcome, Vec<CommitType>) {
        let result = step(&mut self.state, pid, Syscall::Exit { status }, now);

        for commit in &result.commits {
            if let CommitType::MessageDropped { buffer, .. } = commit {
                self.hal.debug_write(&format!(
                    "[PID {}] Dropped unanswered message in buffer {}",
                    pid.0, buffer
                ));
            }
        }

        // The address space goes with the process
        self.spaces.remove(&pid);
        for waiter in &result.wakeups {
            self.hal.ready_to_run(waiter.0);
        }
        self.hal
            .debug_write(&format!("[PID {}] Exit({})", pid.0, status));

        (TrapOutcome::Exited(status), result.commits)
    }

    fn sys_fork(&mut self, pid: ProcessId, now: u64) -> (TrapOutcome, Vec<CommitType>) {
        registers::advance_pc(&self.hal);

        let cloned = match self.spaces.get(&pid) {
            Some(space) => self.hal.clone_address_space(space),
            None => Err(mica_hal::HalError::NotSupported),
        };
        let space = match cloned {
            Ok(space) => space,
            Err(e) => {
                self.hal
                    .debug_write(&format!("[PID {}] Fork failed: {}", pid.0, e));
                self.hal.write_register(RESULT_REG, -1);
                return (TrapOutcome::Fault(TrapError::Hal(e)), vec![]);
            }
        };

        let registers = registers::snapshot(&self.hal);
        let result = step(&mut self.state, pid, Syscall::Fork { registers }, now);
        let child = match result.result {
            SyscallResult::Ok(child) => ProcessId(child as u32),
            _ => return self.finish_step(pid, result),
        };

        self.spaces.insert(child, space);
        self.hal.write_register(RESULT_REG, child.0 as i32);
        self.hal.fork(child.0);
        self.hal
            .debug_write(&format!("[PID {}] Fork -> PID {}", pid.0, child.0));

        (TrapOutcome::Resume(result.result), result.commits)
    }

    fn sys_exec(&mut self, pid: ProcessId, path_ptr: i32, now: u64) -> (TrapOutcome, Vec<CommitType>) {
        let loaded = decode_cstring(&self.hal, path_ptr, self.config.max_string_len)
            .map_err(TrapError::from)
            .and_then(|path| {
                let exe = self.hal.open(&path)?;
                let space = self.hal.load_address_space(exe)?;
                Ok((path, space))
            });

        let (path, space) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => return (self.exec_failed(pid, e), vec![]),
        };

        let result = step(&mut self.state, pid, Syscall::Exec { path: path.clone() }, now);
        self.hal.init_registers(&space);
        self.hal.restore_state(&space);
        // The previous image is dropped here
        self.spaces.insert(pid, space);
        self.hal
            .debug_write(&format!("[PID {}] Exec {}", pid.0, path));
        self.hal.run();

        (TrapOutcome::Replaced, result.commits)
    }

    fn exec_failed(&mut self, pid: ProcessId, error: TrapError) -> TrapOutcome {
        self.hal
            .debug_write(&format!("[PID {}] Exec failed: {}", pid.0, error));
        match self.config.exec_failure {
            ExecFailurePolicy::Retrap => TrapOutcome::ExecFailed(error),
            ExecFailurePolicy::ReturnError => {
                self.hal.write_register(RESULT_REG, -1);
                registers::advance_pc(&self.hal);
                TrapOutcome::Fault(error)
            }
        }
    }

    fn sys_yield(&mut self, pid: ProcessId, now: u64) -> (TrapOutcome, Vec<CommitType>) {
        registers::advance_pc(&self.hal);
        let result = step(&mut self.state, pid, Syscall::Yield, now);
        if result.result.is_err() {
            return self.finish_step(pid, result);
        }
        self.save_registers(pid);
        self.hal.yield_now(pid.0);
        (TrapOutcome::Yielded, result.commits)
    }

    // ========================================================================
    // Mailbox IPC
    // ========================================================================

    fn sys_send_msg(&mut self, pid: ProcessId, args: [i32; 4], now: u64) -> (TrapOutcome, Vec<CommitType>) {
        registers::advance_pc(&self.hal);

        let decoded = self
            .read_string(args[0])
            .and_then(|dest| Ok((dest, self.read_string(args[1])?)));
        let (dest, body) = match decoded {
            Ok(strings) => strings,
            Err(e) => return (self.fault(pid, "SendMsg", e), vec![]),
        };

        let result = step(
            &mut self.state,
            pid,
            Syscall::SendMsg {
                dest: dest.clone(),
                body,
            },
            now,
        );
        match &result.result {
            SyscallResult::Ok(buffer) => self.hal.debug_write(&format!(
                "[PID {}] Sent message to {} in buffer {}",
                pid.0, dest, buffer
            )),
            SyscallResult::Err(e) => self.hal.debug_write(&format!(
                "[PID {}] SendMsg to {} failed: {}",
                pid.0, dest, e
            )),
            _ => {}
        }
        self.finish_step(pid, result)
    }

    fn sys_send_ans(&mut self, pid: ProcessId, body_ptr: i32, now: u64) -> (TrapOutcome, Vec<CommitType>) {
        registers::advance_pc(&self.hal);

        let body = match self.read_string(body_ptr) {
            Ok(body) => body,
            Err(e) => return (self.fault(pid, "SendAns", e), vec![]),
        };

        let result = step(&mut self.state, pid, Syscall::SendAns { body }, now);
        match &result.result {
            SyscallResult::Ok(buffer) => self.hal.debug_write(&format!(
                "[PID {}] Answered message in buffer {}",
                pid.0, buffer
            )),
            SyscallResult::Err(e) => self
                .hal
                .debug_write(&format!("[PID {}] SendAns failed: {}", pid.0, e)),
            _ => {}
        }
        self.finish_step(pid, result)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn read_string(&self, pointer: i32) -> Result<String, TrapError> {
        decode_cstring(&self.hal, pointer, self.config.max_string_len).map_err(TrapError::from)
    }

    fn fault(&self, pid: ProcessId, name: &str, error: TrapError) -> TrapOutcome {
        self.hal
            .debug_write(&format!("[PID {}] {} failed: {}", pid.0, name, error));
        self.hal.write_register(RESULT_REG, -1);
        TrapOutcome::Fault(error)
    }

    pub(crate) fn log_delivery(&self, pid: ProcessId, result: &SyscallResult) {
        match result {
            SyscallResult::Message { sender, body, .. } => {
                let from = sender.map(|p| p.0 as i64).unwrap_or(-1);
                self.hal.debug_write(&format!(
                    "[PID {}] Received message from PID {}: {}",
                    pid.0, from, body
                ));
            }
            SyscallResult::Answer { body, .. } => self
                .hal
                .debug_write(&format!("[PID {}] Received answer: {}", pid.0, body)),
            _ => {}
        }
    }

    /// Carry out what `step` decided: wake processes, then either write the
    /// caller's result or park it.
    fn finish_step(&mut self, pid: ProcessId, result: StepResult) -> (TrapOutcome, Vec<CommitType>) {
        for woken in &result.wakeups {
            self.hal.ready_to_run(woken.0);
        }

        let outcome = match result.result {
            SyscallResult::Blocked(reason) => {
                self.save_registers(pid);
                self.hal.sleep(pid.0);
                TrapOutcome::Blocked(reason)
            }
            SyscallResult::Exited(status) => TrapOutcome::Exited(status),
            other => {
                if let Some(value) = other.register_value() {
                    self.hal.write_register(RESULT_REG, value);
                }
                TrapOutcome::Resume(other)
            }
        };
        (outcome, result.commits)
    }
}
