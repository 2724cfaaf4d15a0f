//! Mock HAL implementation for testing Mica
//!
//! This provides an in-memory machine behind the HAL trait so the kernel can
//! be exercised without the CPU simulator: one register file, a flat byte
//! memory, a table of installed programs, numbered address spaces and a
//! recorded scheduler.

#![no_std]
extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicU64, Ordering};
use mica_hal::{HalError, HAL, NEXT_PC_REG, NUM_TOTAL_REGS, PC_REG, PREV_PC_REG};

/// Default size of the simulated user memory
pub const DEFAULT_MEMORY_SIZE: usize = 64 * 1024;

/// An opened program image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockExecutable {
    /// Path the program was opened with
    pub path: String,
    /// Entry point of the program
    pub entry_pc: i32,
}

/// A numbered address space
///
/// Deliberately not `Clone`: copies only come from `clone_address_space`.
#[derive(Debug, PartialEq, Eq)]
pub struct MockAddressSpace {
    /// Unique space number
    pub id: u64,
    /// Program the space was built from
    pub program: String,
    /// Entry point used by `init_registers`
    pub entry_pc: i32,
}

/// Scheduler interaction recorded by the mock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedEvent {
    /// `sleep(pid)`
    Sleep(u32),
    /// `ready_to_run(pid)`
    Ready(u32),
    /// `fork(pid)`
    Fork(u32),
    /// `yield_now(pid)`
    Yield(u32),
}

/// Mock HAL for unit testing
pub struct MockHal {
    /// Simulated time in nanoseconds
    time: AtomicU64,
    /// Captured debug messages
    debug_log: RefCell<Vec<String>>,
    /// The CPU register file
    registers: RefCell<[i32; NUM_TOTAL_REGS]>,
    /// Flat user memory
    memory: RefCell<Vec<u8>>,
    /// Installed programs (path -> entry pc)
    programs: RefCell<BTreeMap<String, i32>>,
    /// Next address space number to hand out
    next_space_id: AtomicU64,
    /// Space most recently activated with `restore_state`
    active_space: Cell<Option<u64>>,
    /// When set, `clone_address_space` fails with `OutOfMemory`
    fail_clone: Cell<bool>,
    /// Processes waiting for the CPU, in order
    ready_queue: RefCell<VecDeque<u32>>,
    /// Every scheduler call in order
    sched_log: RefCell<Vec<SchedEvent>>,
    /// Number of `run` calls
    run_count: Cell<usize>,
    /// Set once `halt` is called
    halted: Cell<bool>,
}

impl MockHal {
    /// Create a new mock HAL
    pub fn new() -> Self {
        Self::with_memory(DEFAULT_MEMORY_SIZE)
    }

    /// Create a mock HAL with `size` bytes of user memory
    pub fn with_memory(size: usize) -> Self {
        Self {
            time: AtomicU64::new(0),
            debug_log: RefCell::new(Vec::new()),
            registers: RefCell::new([0; NUM_TOTAL_REGS]),
            memory: RefCell::new(alloc::vec![0; size]),
            programs: RefCell::new(BTreeMap::new()),
            next_space_id: AtomicU64::new(1),
            active_space: Cell::new(None),
            fail_clone: Cell::new(false),
            ready_queue: RefCell::new(VecDeque::new()),
            sched_log: RefCell::new(Vec::new()),
            run_count: Cell::new(0),
            halted: Cell::new(false),
        }
    }

    // === Time ===

    /// Advance the simulated time by the given duration
    pub fn advance_time(&self, nanos: u64) {
        self.time.fetch_add(nanos, Ordering::SeqCst);
    }

    // === Debug log ===

    /// Get all captured debug messages
    pub fn get_debug_log(&self) -> Vec<String> {
        self.debug_log.borrow().clone()
    }

    /// Clear the debug log
    pub fn clear_debug_log(&self) {
        self.debug_log.borrow_mut().clear();
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.debug_log
            .borrow()
            .iter()
            .any(|msg| msg.contains(substr))
    }

    // === Registers ===

    /// Read a register
    pub fn register(&self, index: usize) -> i32 {
        self.registers.borrow().get(index).copied().unwrap_or(0)
    }

    /// Write a register
    pub fn set_register(&self, index: usize, value: i32) {
        if let Some(slot) = self.registers.borrow_mut().get_mut(index) {
            *slot = value;
        }
    }

    /// Copy of the whole register file
    pub fn registers(&self) -> [i32; NUM_TOTAL_REGS] {
        *self.registers.borrow()
    }

    /// Replace the whole register file
    pub fn set_registers(&self, regs: [i32; NUM_TOTAL_REGS]) {
        *self.registers.borrow_mut() = regs;
    }

    /// Point PrevPC/PC/NextPC at `pc` as if the CPU were about to execute it
    pub fn set_pc(&self, pc: i32) {
        let mut regs = self.registers.borrow_mut();
        regs[PREV_PC_REG] = pc - 4;
        regs[PC_REG] = pc;
        regs[NEXT_PC_REG] = pc + 4;
    }

    // === Memory ===

    /// Copy `bytes` into user memory at `address`
    pub fn write_memory(&self, address: usize, bytes: &[u8]) {
        let mut memory = self.memory.borrow_mut();
        let end = (address + bytes.len()).min(memory.len());
        if address < end {
            memory[address..end].copy_from_slice(&bytes[..end - address]);
        }
    }

    /// Write `s` followed by a NUL terminator at `address`
    pub fn write_cstring(&self, address: usize, s: &str) {
        self.write_memory(address, s.as_bytes());
        self.write_memory(address + s.len(), &[0]);
    }

    // === Programs and address spaces ===

    /// Make `path` loadable with the given entry point
    pub fn install_program(&self, path: &str, entry_pc: i32) {
        self.programs.borrow_mut().insert(String::from(path), entry_pc);
    }

    /// Space most recently activated with `restore_state`
    pub fn active_space(&self) -> Option<u64> {
        self.active_space.get()
    }

    /// Make the next `clone_address_space` calls fail
    pub fn set_clone_failure(&self, fail: bool) {
        self.fail_clone.set(fail);
    }

    // === Scheduler ===

    /// Pop the next process the scheduler would run
    pub fn next_ready(&self) -> Option<u32> {
        self.ready_queue.borrow_mut().pop_front()
    }

    /// Processes currently waiting for the CPU
    pub fn ready_queue(&self) -> Vec<u32> {
        self.ready_queue.borrow().iter().copied().collect()
    }

    /// Every scheduler call so far
    pub fn sched_log(&self) -> Vec<SchedEvent> {
        self.sched_log.borrow().clone()
    }

    /// Forget recorded scheduler calls and queued processes
    pub fn clear_sched_log(&self) {
        self.sched_log.borrow_mut().clear();
        self.ready_queue.borrow_mut().clear();
    }

    /// Number of times control was handed to user mode
    pub fn run_count(&self) -> usize {
        self.run_count.get()
    }

    /// Whether the machine has been halted
    pub fn is_halted(&self) -> bool {
        self.halted.get()
    }

    fn record(&self, event: SchedEvent) {
        self.sched_log.borrow_mut().push(event);
    }
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

// MockHal is Send + Sync because the kernel drives it from a single thread;
// the RefCell/Cell state is only touched from single-threaded test contexts
unsafe impl Send for MockHal {}
unsafe impl Sync for MockHal {}

impl HAL for MockHal {
    type AddressSpace = MockAddressSpace;
    type Executable = MockExecutable;

    fn read_register(&self, index: usize) -> i32 {
        self.register(index)
    }

    fn write_register(&self, index: usize, value: i32) {
        self.set_register(index, value);
    }

    fn read_memory_byte(&self, address: i32) -> Result<u8, HalError> {
        let index = usize::try_from(address).map_err(|_| HalError::AddressFault)?;
        self.memory
            .borrow()
            .get(index)
            .copied()
            .ok_or(HalError::AddressFault)
    }

    fn run(&self) {
        self.run_count.set(self.run_count.get() + 1);
    }

    fn halt(&self) {
        self.halted.set(true);
        self.debug_log
            .borrow_mut()
            .push(String::from("[mock-hal] Machine halted"));
    }

    fn open(&self, path: &str) -> Result<Self::Executable, HalError> {
        self.programs
            .borrow()
            .get(path)
            .map(|&entry_pc| MockExecutable {
                path: String::from(path),
                entry_pc,
            })
            .ok_or(HalError::FileNotFound)
    }

    fn load_address_space(
        &self,
        executable: Self::Executable,
    ) -> Result<Self::AddressSpace, HalError> {
        Ok(MockAddressSpace {
            id: self.next_space_id.fetch_add(1, Ordering::SeqCst),
            program: executable.path,
            entry_pc: executable.entry_pc,
        })
    }

    fn clone_address_space(
        &self,
        space: &Self::AddressSpace,
    ) -> Result<Self::AddressSpace, HalError> {
        if self.fail_clone.get() {
            return Err(HalError::OutOfMemory);
        }
        Ok(MockAddressSpace {
            id: self.next_space_id.fetch_add(1, Ordering::SeqCst),
            program: space.program.clone(),
            entry_pc: space.entry_pc,
        })
    }

    fn init_registers(&self, space: &Self::AddressSpace) {
        self.set_registers([0; NUM_TOTAL_REGS]);
        self.set_pc(space.entry_pc);
    }

    fn restore_state(&self, space: &Self::AddressSpace) {
        self.active_space.set(Some(space.id));
    }

    fn sleep(&self, pid: u32) {
        self.record(SchedEvent::Sleep(pid));
    }

    fn ready_to_run(&self, pid: u32) {
        self.record(SchedEvent::Ready(pid));
        self.ready_queue.borrow_mut().push_back(pid);
    }

    fn fork(&self, pid: u32) {
        self.record(SchedEvent::Fork(pid));
        self.ready_queue.borrow_mut().push_back(pid);
    }

    fn yield_now(&self, pid: u32) {
        self.record(SchedEvent::Yield(pid));
        self.ready_queue.borrow_mut().push_back(pid);
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.borrow_mut().push(String::from(msg));
    }

    fn now_nanos(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }
}
