//! Kernel integration tests
//!
//! Drive the real trap dispatcher against `MockHal`. The mock's ready queue
//! stands in for the scheduler: `run_next` pops it and calls `enter`, the
//! way the simulator's context switch would.

use mica_hal::{ARG_REGS, NEXT_PC_REG, NUM_TOTAL_REGS, PC_REG, PREV_PC_REG, RESULT_REG};
use mica_hal_mock::{MockHal, SchedEvent};
use mica_kernel::syscall::{
    SC_EXEC, SC_EXIT, SC_FORK, SC_HALT, SC_JOIN, SC_OPEN, SC_SEND_ANS, SC_SEND_MSG, SC_WAIT_ANS,
    SC_WAIT_MSG, SC_YIELD,
};
use mica_kernel::{
    BufferId, CommitType, DecodeError, EntryAction, ExecFailurePolicy, HalError, Kernel,
    KernelConfig, KernelError, ProcessId, ProcessState, SyscallResult, TrapError, TrapOutcome,
    WaitReason,
};

// ============================================================================
// Fixtures
// ============================================================================

const SERVER_NAME: i32 = 0x1000;
const CLIENT_NAME: i32 = 0x1040;
const HELLO: i32 = 0x1100;
const HI: i32 = 0x1140;
const M1: i32 = 0x1180;
const M2: i32 = 0x11c0;
const MISSING_PATH: i32 = 0x1200;
const OTHER_PATH: i32 = 0x1240;

const SERVER: ProcessId = ProcessId(1);

fn machine() -> MockHal {
    let hal = MockHal::new();
    hal.install_program("server", 0x100);
    hal.install_program("client", 0x800);
    hal.install_program("other", 0x4000);
    hal.write_cstring(SERVER_NAME as usize, "server");
    hal.write_cstring(CLIENT_NAME as usize, "client");
    hal.write_cstring(HELLO as usize, "hello");
    hal.write_cstring(HI as usize, "hi");
    hal.write_cstring(M1 as usize, "m1");
    hal.write_cstring(M2 as usize, "m2");
    hal.write_cstring(MISSING_PATH as usize, "missing");
    hal.write_cstring(OTHER_PATH as usize, "other");
    hal
}

fn kernel_with(config: KernelConfig) -> Kernel<MockHal> {
    Kernel::with_config(machine(), config).unwrap()
}

/// Server booted and running as PID 1
fn booted() -> Kernel<MockHal> {
    let mut kernel = Kernel::new(machine());
    assert_eq!(kernel.boot("server", "server").unwrap(), SERVER);
    kernel
}

/// Raise a syscall trap from the running process
fn trap(kernel: &mut Kernel<MockHal>, code: i32, args: &[i32]) -> TrapOutcome {
    let hal = kernel.hal();
    hal.set_register(RESULT_REG, code);
    for (reg, value) in ARG_REGS.iter().zip(args) {
        hal.set_register(*reg, *value);
    }
    kernel.handle_syscall(code)
}

/// Let the scheduler pick the next ready process
fn run_next(kernel: &mut Kernel<MockHal>) -> (ProcessId, Option<SyscallResult>) {
    let pid = ProcessId(kernel.hal().next_ready().expect("ready queue is empty"));
    let completion = kernel.enter(pid).unwrap();
    (pid, completion)
}

fn r2(kernel: &Kernel<MockHal>) -> i32 {
    kernel.hal().register(RESULT_REG)
}

fn state_of(kernel: &Kernel<MockHal>, pid: ProcessId) -> ProcessState {
    kernel.process(pid).unwrap().state
}

fn assert_consistent(kernel: &Kernel<MockHal>) {
    let violations = kernel.check_invariants();
    assert!(violations.is_empty(), "{:?}", violations);
}

// ============================================================================
// Mailbox IPC
// ============================================================================

#[test]
fn test_hello_hi_round_trip() {
    let mut kernel = booted();
    let client = kernel.spawn("client", "client").unwrap();

    // Server waits on an empty inbox
    assert_eq!(
        trap(&mut kernel, SC_WAIT_MSG, &[]),
        TrapOutcome::Blocked(WaitReason::Message)
    );
    assert_eq!(state_of(&kernel, SERVER), ProcessState::Blocked(WaitReason::Message));

    // Client starts, sends "hello" and waits for the answer
    assert_eq!(run_next(&mut kernel), (client, None));
    assert_eq!(kernel.hal().register(PC_REG), 0x800);
    assert_eq!(
        trap(&mut kernel, SC_SEND_MSG, &[SERVER_NAME, HELLO]),
        TrapOutcome::Resume(SyscallResult::Ok(0))
    );
    assert_eq!(r2(&kernel), 0);
    assert_eq!(kernel.hal().ready_queue(), vec![SERVER.0]);
    assert_eq!(
        kernel.process(SERVER).unwrap().entry,
        Some(EntryAction::CompleteWaitMsg)
    );

    kernel.hal().set_register(8, 555);
    assert_eq!(
        trap(&mut kernel, SC_WAIT_ANS, &[]),
        TrapOutcome::Blocked(WaitReason::Answer)
    );

    // Server wakes up holding the message
    let (pid, completion) = run_next(&mut kernel);
    assert_eq!(pid, SERVER);
    assert_eq!(
        completion,
        Some(SyscallResult::Message {
            buffer: BufferId(0),
            sender: Some(client),
            body: String::from("hello"),
        })
    );
    assert_eq!(r2(&kernel), 0);
    assert!(kernel
        .hal()
        .has_log_containing("Received message from PID 2: hello"));

    // Server answers "hi"
    kernel.hal().set_register(8, 1);
    assert_eq!(
        trap(&mut kernel, SC_SEND_ANS, &[HI]),
        TrapOutcome::Resume(SyscallResult::Ok(0))
    );
    assert!(kernel.process(SERVER).unwrap().inbox.is_empty());

    // Client collects the answer with its own registers back
    let (pid, completion) = run_next(&mut kernel);
    assert_eq!(pid, client);
    assert_eq!(
        completion,
        Some(SyscallResult::Answer {
            buffer: BufferId(0),
            body: String::from("hi"),
        })
    );
    assert_eq!(r2(&kernel), 0);
    assert_eq!(kernel.hal().register(8), 555);
    assert_eq!(kernel.state().buffers.free_count(), 16);
    assert!(kernel.state().answers.is_empty());

    // The preempted server was requeued
    assert_eq!(kernel.hal().ready_queue(), vec![SERVER.0]);
    assert_consistent(&kernel);
    assert!(kernel.gateway().verify_integrity());
}

#[test]
fn test_send_beyond_pool_capacity() {
    let mut kernel = kernel_with(KernelConfig {
        buffer_pool_capacity: 3,
        ..KernelConfig::default()
    });
    kernel.boot("client", "client").unwrap();
    let server = kernel.spawn("server", "server").unwrap();
    kernel.hal().clear_sched_log();

    for expected in 0..3 {
        assert_eq!(
            trap(&mut kernel, SC_SEND_MSG, &[SERVER_NAME, HELLO]),
            TrapOutcome::Resume(SyscallResult::Ok(expected))
        );
    }

    let outcome = trap(&mut kernel, SC_SEND_MSG, &[SERVER_NAME, HELLO]);
    assert_eq!(
        outcome,
        TrapOutcome::Resume(SyscallResult::Err(KernelError::NoFreeBuffer))
    );
    assert_eq!(r2(&kernel), -1);
    assert_eq!(kernel.process(server).unwrap().inbox.len(), 3);
    assert_eq!(state_of(&kernel, ProcessId(1)), ProcessState::Running);
    assert_eq!(state_of(&kernel, server), ProcessState::Ready);
    assert!(kernel.hal().sched_log().is_empty());

    // Server answers the oldest; the client collects it and the slot frees up
    kernel.enter(server).unwrap();
    trap(&mut kernel, SC_SEND_ANS, &[HI]);
    kernel.enter(ProcessId(1)).unwrap();
    assert_eq!(
        trap(&mut kernel, SC_WAIT_ANS, &[]),
        TrapOutcome::Resume(SyscallResult::Answer {
            buffer: BufferId(0),
            body: String::from("hi"),
        })
    );
    assert_eq!(
        trap(&mut kernel, SC_SEND_MSG, &[SERVER_NAME, HELLO]),
        TrapOutcome::Resume(SyscallResult::Ok(0))
    );
    assert_consistent(&kernel);
}

#[test]
fn test_inbox_is_fifo_and_wait_msg_peeks() {
    let mut kernel = booted();
    let client = kernel.spawn("client", "client").unwrap();
    run_next(&mut kernel);

    trap(&mut kernel, SC_SEND_MSG, &[SERVER_NAME, M1]);
    trap(&mut kernel, SC_SEND_MSG, &[SERVER_NAME, M2]);
    kernel.enter(SERVER).unwrap();

    let head = |body: &str, buffer: u32| {
        TrapOutcome::Resume(SyscallResult::Message {
            buffer: BufferId(buffer),
            sender: Some(client),
            body: String::from(body),
        })
    };

    assert_eq!(trap(&mut kernel, SC_WAIT_MSG, &[]), head("m1", 0));
    assert_eq!(trap(&mut kernel, SC_WAIT_MSG, &[]), head("m1", 0));
    assert_eq!(kernel.process(SERVER).unwrap().inbox.len(), 2);

    trap(&mut kernel, SC_SEND_ANS, &[HI]);
    assert_eq!(trap(&mut kernel, SC_WAIT_MSG, &[]), head("m2", 1));
    assert_consistent(&kernel);
}

#[test]
fn test_send_to_unknown_name() {
    let mut kernel = booted();
    assert_eq!(
        trap(&mut kernel, SC_SEND_MSG, &[CLIENT_NAME, HELLO]),
        TrapOutcome::Resume(SyscallResult::Err(KernelError::NameNotFound))
    );
    assert_eq!(r2(&kernel), -1);
    assert_eq!(kernel.state().buffers.free_count(), 16);
}

#[test]
fn test_send_ans_with_empty_inbox() {
    let mut kernel = booted();
    assert_eq!(
        trap(&mut kernel, SC_SEND_ANS, &[HI]),
        TrapOutcome::Resume(SyscallResult::Err(KernelError::InboxEmpty))
    );
    assert_eq!(r2(&kernel), -1);
}

#[test]
fn test_unterminated_string_is_rejected() {
    let mut kernel = kernel_with(KernelConfig {
        max_string_len: 3,
        ..KernelConfig::default()
    });
    kernel.boot("server", "server").unwrap();

    assert_eq!(
        trap(&mut kernel, SC_SEND_MSG, &[SERVER_NAME, HI]),
        TrapOutcome::Fault(TrapError::Decode(DecodeError::Unterminated {
            address: SERVER_NAME
        }))
    );
    assert_eq!(r2(&kernel), -1);
    assert_eq!(kernel.process(SERVER).unwrap().inbox.len(), 0);
}

#[test]
fn test_exit_with_unanswered_messages() {
    let mut kernel = booted();
    let c1 = kernel.spawn("c1", "client").unwrap();
    let c2 = kernel.spawn("c2", "client").unwrap();

    assert_eq!(trap(&mut kernel, SC_YIELD, &[]), TrapOutcome::Yielded);

    for expected in [c1, c2] {
        let (pid, _) = run_next(&mut kernel);
        assert_eq!(pid, expected);
        trap(&mut kernel, SC_SEND_MSG, &[SERVER_NAME, HELLO]);
        trap(&mut kernel, SC_WAIT_ANS, &[]);
    }

    let (pid, _) = run_next(&mut kernel);
    assert_eq!(pid, SERVER);
    assert_eq!(kernel.process(SERVER).unwrap().inbox.len(), 2);

    assert_eq!(trap(&mut kernel, SC_EXIT, &[0]), TrapOutcome::Exited(0));

    assert!(kernel
        .hal()
        .has_log_containing("Dropped unanswered message in buffer 0"));
    assert!(kernel
        .hal()
        .has_log_containing("Dropped unanswered message in buffer 1"));
    assert_eq!(kernel.state().buffers.free_count(), 16);
    assert!(kernel.process(SERVER).is_none());
    assert_eq!(kernel.current_pid(), None);

    // Lost-message policy: the senders are never answered
    assert_eq!(state_of(&kernel, c1), ProcessState::Blocked(WaitReason::Answer));
    assert_eq!(state_of(&kernel, c2), ProcessState::Blocked(WaitReason::Answer));
    assert!(kernel.hal().ready_queue().is_empty());

    let dropped = kernel
        .gateway()
        .commitlog()
        .filter(|c| matches!(c, CommitType::MessageDropped { owner: 1, .. }));
    assert_eq!(dropped.len(), 2);
    assert_consistent(&kernel);
}

// ============================================================================
// Process lifecycle
// ============================================================================

#[test]
fn test_fork_register_snapshot() {
    let mut kernel = booted();
    let hal = kernel.hal();
    for r in 8..32 {
        hal.set_register(r, r as i32 * 3);
    }
    hal.set_pc(0x200);
    let before = hal.registers();

    let outcome = trap(&mut kernel, SC_FORK, &[]);
    let child = ProcessId(2);
    assert_eq!(outcome, TrapOutcome::Resume(SyscallResult::Ok(2)));

    // Parent: only r2 and the PC family changed
    let after = kernel.hal().registers();
    for r in 0..NUM_TOTAL_REGS {
        match r {
            RESULT_REG => assert_eq!(after[r], 2),
            PC_REG => assert_eq!(after[r], 0x204),
            NEXT_PC_REG => assert_eq!(after[r], 0x208),
            PREV_PC_REG => assert_eq!(after[r], 0x200),
            _ if ARG_REGS.contains(&r) => {}
            _ => assert_eq!(after[r], before[r], "register {}", r),
        }
    }
    assert_eq!(state_of(&kernel, SERVER), ProcessState::Running);
    assert!(kernel
        .hal()
        .sched_log()
        .contains(&SchedEvent::Fork(child.0)));

    let c = kernel.process(child).unwrap();
    assert_eq!(c.parent, Some(SERVER));
    assert_eq!(c.name, "server#2");
    assert!(kernel.has_address_space(child));
    assert_consistent(&kernel);

    // Child resumes at the same point with r2 = 0
    kernel.hal().set_register(9, -1);
    let (pid, completion) = run_next(&mut kernel);
    assert_eq!((pid, completion), (child, None));
    assert_eq!(r2(&kernel), 0);
    assert_eq!(kernel.hal().register(PC_REG), 0x204);
    assert_eq!(kernel.hal().register(9), 27);
    assert_eq!(state_of(&kernel, SERVER), ProcessState::Ready);
}

#[test]
fn test_fork_clone_failure() {
    let mut kernel = booted();
    kernel.hal().set_clone_failure(true);

    assert_eq!(
        trap(&mut kernel, SC_FORK, &[]),
        TrapOutcome::Fault(TrapError::Hal(HalError::OutOfMemory))
    );
    assert_eq!(r2(&kernel), -1);
    assert_eq!(kernel.state().processes.len(), 1);
    assert!(kernel.hal().ready_queue().is_empty());
}

#[test]
fn test_join_waits_for_exit_status() {
    let mut kernel = booted();
    let child = kernel.spawn("client", "client").unwrap();

    assert_eq!(
        trap(&mut kernel, SC_JOIN, &[child.0 as i32]),
        TrapOutcome::Blocked(WaitReason::Child(child))
    );
    assert!(kernel.hal().sched_log().contains(&SchedEvent::Sleep(1)));

    run_next(&mut kernel);
    assert_eq!(trap(&mut kernel, SC_EXIT, &[7]), TrapOutcome::Exited(7));
    assert!(!kernel.has_address_space(child));
    assert_eq!(kernel.exit_status(child), Some(7));

    let (pid, completion) = run_next(&mut kernel);
    assert_eq!(pid, SERVER);
    assert_eq!(completion, Some(SyscallResult::Ok(7)));
    assert_eq!(r2(&kernel), 7);
    assert_consistent(&kernel);
}

#[test]
fn test_join_invalid_targets_never_block() {
    let mut kernel = booted();

    for target in [1, 99, -5] {
        let outcome = trap(&mut kernel, SC_JOIN, &[target]);
        assert!(
            matches!(
                outcome,
                TrapOutcome::Resume(SyscallResult::Err(KernelError::InvalidJoinTarget(_)))
            ),
            "{:?}",
            outcome
        );
        assert_eq!(r2(&kernel), -1);
        let p = kernel.process(SERVER).unwrap();
        assert_eq!(p.exit_status, Some(-1));
        assert_eq!(p.state, ProcessState::Running);
    }
    assert!(kernel.hal().sched_log().is_empty());
}

#[test]
fn test_yield_requeues_caller() {
    let mut kernel = booted();
    let other = kernel.spawn("client", "client").unwrap();
    kernel.hal().set_pc(0x300);

    assert_eq!(trap(&mut kernel, SC_YIELD, &[]), TrapOutcome::Yielded);
    assert_eq!(state_of(&kernel, SERVER), ProcessState::Ready);
    assert_eq!(kernel.hal().ready_queue(), vec![other.0, SERVER.0]);

    run_next(&mut kernel);
    let (pid, _) = run_next(&mut kernel);
    assert_eq!(pid, SERVER);
    assert_eq!(kernel.hal().register(PC_REG), 0x304);
}

#[test]
fn test_exec_replaces_image() {
    let mut kernel = booted();
    let old_space = kernel.hal().active_space();
    let runs = kernel.hal().run_count();

    assert_eq!(trap(&mut kernel, SC_EXEC, &[OTHER_PATH]), TrapOutcome::Replaced);
    assert_eq!(kernel.hal().register(PC_REG), 0x4000);
    assert_ne!(kernel.hal().active_space(), old_space);
    assert_eq!(kernel.hal().run_count(), runs + 1);

    let loaded = kernel
        .gateway()
        .commitlog()
        .filter(|c| matches!(c, CommitType::ProgramLoaded { path, .. } if path == "other"));
    assert_eq!(loaded.len(), 1);
    assert_consistent(&kernel);
}

#[test]
fn test_exec_failure_retraps_by_default() {
    let mut kernel = booted();
    kernel.hal().set_pc(0x500);

    assert_eq!(
        trap(&mut kernel, SC_EXEC, &[MISSING_PATH]),
        TrapOutcome::ExecFailed(TrapError::Hal(HalError::FileNotFound))
    );
    assert_eq!(kernel.hal().register(PC_REG), 0x500);
    assert_eq!(r2(&kernel), SC_EXEC);
    assert_eq!(state_of(&kernel, SERVER), ProcessState::Running);
}

#[test]
fn test_exec_failure_can_return_error() {
    let mut kernel = kernel_with(KernelConfig {
        exec_failure: ExecFailurePolicy::ReturnError,
        ..KernelConfig::default()
    });
    kernel.boot("server", "server").unwrap();
    kernel.hal().set_pc(0x500);

    assert_eq!(
        trap(&mut kernel, SC_EXEC, &[MISSING_PATH]),
        TrapOutcome::Fault(TrapError::Hal(HalError::FileNotFound))
    );
    assert_eq!(r2(&kernel), -1);
    assert_eq!(kernel.hal().register(PC_REG), 0x504);
}

// ============================================================================
// Halting and host-facing errors
// ============================================================================

#[test]
fn test_halt() {
    let mut kernel = booted();
    assert_eq!(trap(&mut kernel, SC_HALT, &[]), TrapOutcome::Halted);
    assert!(kernel.hal().is_halted());
}

#[test]
fn test_unserviced_syscall_halts() {
    let mut kernel = booted();
    assert_eq!(trap(&mut kernel, SC_OPEN, &[HELLO]), TrapOutcome::Halted);
    assert!(kernel.hal().is_halted());
    assert!(kernel.hal().has_log_containing("Unexpected syscall 5"));
}

#[test]
fn test_trap_without_running_process_halts() {
    let mut kernel = Kernel::new(machine());
    assert_eq!(kernel.handle_syscall(SC_WAIT_MSG), TrapOutcome::Halted);
    assert!(kernel.hal().is_halted());
}

#[test]
fn test_spawn_missing_program() {
    let mut kernel = booted();
    assert_eq!(
        kernel.spawn("ghost", "nope"),
        Err(TrapError::Hal(HalError::FileNotFound))
    );
    assert_eq!(kernel.state().processes.len(), 1);
}

#[test]
fn test_enter_blocked_process_is_refused() {
    let mut kernel = booted();
    trap(&mut kernel, SC_WAIT_MSG, &[]);

    assert!(matches!(
        kernel.enter(SERVER),
        Err(TrapError::Kernel(KernelError::InvalidTransition { .. }))
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = KernelConfig {
        buffer_pool_capacity: 0,
        ..KernelConfig::default()
    };
    assert!(Kernel::with_config(machine(), config).is_err());
}

#[test]
fn test_every_trap_is_audited() {
    let mut kernel = kernel_with(KernelConfig {
        trace_syscalls: true,
        ..KernelConfig::default()
    });
    kernel.boot("server", "server").unwrap();

    trap(&mut kernel, SC_SEND_MSG, &[CLIENT_NAME, HELLO]);
    trap(&mut kernel, SC_FORK, &[]);

    let syslog = kernel.gateway().syslog();
    assert_eq!(syslog.len(), 4);
    assert_eq!(syslog.traps_by(1).len(), 2);
    assert!(kernel.hal().has_log_containing("[PID 1] SendMsg("));
    assert!(kernel.hal().has_log_containing("[PID 1] Fork("));
    assert!(kernel.gateway().verify_integrity());
}
