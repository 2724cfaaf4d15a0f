//! User register file layout of the simulated CPU.
//!
//! 32 general purpose registers followed by special registers. Syscalls pass
//! their code and return their result in r2 and take arguments in r4-r7.

/// Register holding the syscall code on entry to the trap handler
pub const SYSCALL_CODE_REG: usize = 2;

/// Register receiving the syscall result
pub const RESULT_REG: usize = 2;

/// Syscall argument registers, in argument order
pub const ARG_REGS: [usize; 4] = [4, 5, 6, 7];

/// Current program counter
pub const PC_REG: usize = 34;

/// Program counter of the next instruction (branch delay slot)
pub const NEXT_PC_REG: usize = 35;

/// Program counter of the previously executed instruction
pub const PREV_PC_REG: usize = 36;

/// Size of the complete user register file
pub const NUM_TOTAL_REGS: usize = 40;

/// Width of one instruction in bytes
pub const INSTRUCTION_SIZE: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_registers_fit_in_file() {
        assert!(PC_REG < NUM_TOTAL_REGS);
        assert!(NEXT_PC_REG < NUM_TOTAL_REGS);
        assert!(PREV_PC_REG < NUM_TOTAL_REGS);
        assert!(ARG_REGS.iter().all(|r| *r < 32));
    }

    #[test]
    fn test_arguments_do_not_alias_result() {
        assert!(!ARG_REGS.contains(&RESULT_REG));
    }
}
