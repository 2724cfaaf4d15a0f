//! Register and user-memory helpers for the trap path

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use mica_hal::{ARG_REGS, HAL, INSTRUCTION_SIZE, NEXT_PC_REG, NUM_TOTAL_REGS, PC_REG, PREV_PC_REG};
use mica_kernel_core::{RegisterFile, REGISTER_FILE_LEN, RESULT_REGISTER};

const _: () = assert!(REGISTER_FILE_LEN == NUM_TOTAL_REGS);
const _: () = assert!(RESULT_REGISTER == mica_hal::RESULT_REG);

/// Failure reading a C string out of user memory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// A byte of the string is not mapped
    Fault { address: i32 },
    /// No terminator within the configured limit
    Unterminated { address: i32 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Fault { address } => write!(f, "address fault at {:#x}", address),
            DecodeError::Unterminated { address } => {
                write!(f, "unterminated string at {:#x}", address)
            }
        }
    }
}

/// Step past the trapping instruction: PrevPC ← PC, PC ← NextPC, NextPC += 4.
pub fn advance_pc<H: HAL>(hal: &H) {
    let pc = hal.read_register(PC_REG);
    let next = hal.read_register(NEXT_PC_REG);
    hal.write_register(PREV_PC_REG, pc);
    hal.write_register(PC_REG, next);
    hal.write_register(NEXT_PC_REG, next.wrapping_add(INSTRUCTION_SIZE));
}

/// Syscall arguments r4..r7
pub fn read_args<H: HAL>(hal: &H) -> [i32; 4] {
    ARG_REGS.map(|r| hal.read_register(r))
}

/// Copy the CPU register file.
pub fn snapshot<H: HAL>(hal: &H) -> RegisterFile {
    let mut regs = RegisterFile::new();
    for i in 0..REGISTER_FILE_LEN {
        regs.set(i, hal.read_register(i));
    }
    regs
}

/// Load a saved register file onto the CPU.
pub fn restore<H: HAL>(hal: &H, regs: &RegisterFile) {
    for (i, value) in regs.0.iter().enumerate() {
        hal.write_register(i, *value);
    }
}

/// Read a NUL-terminated string starting at `pointer`.
///
/// At most `max_len` bytes are accepted before the terminator. Bytes that
/// are not valid UTF-8 are replaced.
pub fn decode_cstring<H: HAL>(hal: &H, pointer: i32, max_len: usize) -> Result<String, DecodeError> {
    let mut bytes = Vec::new();
    let mut address = pointer;
    loop {
        let byte = hal
            .read_memory_byte(address)
            .map_err(|_| DecodeError::Fault { address })?;
        if byte == 0 {
            break;
        }
        if bytes.len() == max_len {
            return Err(DecodeError::Unterminated { address: pointer });
        }
        bytes.push(byte);
        address = address.wrapping_add(1);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_hal_mock::MockHal;

    #[test]
    fn test_advance_pc() {
        let hal = MockHal::new();
        hal.set_pc(100);

        advance_pc(&hal);

        assert_eq!(hal.register(PREV_PC_REG), 100);
        assert_eq!(hal.register(PC_REG), 104);
        assert_eq!(hal.register(NEXT_PC_REG), 108);
    }

    #[test]
    fn test_read_args() {
        let hal = MockHal::new();
        for (i, r) in ARG_REGS.iter().enumerate() {
            hal.set_register(*r, i as i32 + 10);
        }
        assert_eq!(read_args(&hal), [10, 11, 12, 13]);
    }

    #[test]
    fn test_snapshot_restore() {
        let hal = MockHal::new();
        hal.set_register(8, 77);
        hal.set_pc(40);
        let regs = snapshot(&hal);

        hal.set_registers([0; NUM_TOTAL_REGS]);
        restore(&hal, &regs);

        assert_eq!(hal.register(8), 77);
        assert_eq!(hal.register(PC_REG), 40);
    }

    #[test]
    fn test_decode_cstring() {
        let hal = MockHal::new();
        hal.write_cstring(200, "hello");
        assert_eq!(decode_cstring(&hal, 200, 64), Ok(String::from("hello")));

        hal.write_cstring(300, "");
        assert_eq!(decode_cstring(&hal, 300, 64), Ok(String::new()));
    }

    #[test]
    fn test_decode_cstring_limit() {
        let hal = MockHal::new();
        hal.write_cstring(0, "abcdef");
        assert_eq!(decode_cstring(&hal, 0, 6), Ok(String::from("abcdef")));
        assert_eq!(
            decode_cstring(&hal, 0, 5),
            Err(DecodeError::Unterminated { address: 0 })
        );
    }

    #[test]
    fn test_decode_cstring_fault() {
        let hal = MockHal::with_memory(4);
        hal.write_memory(0, b"abcd");
        assert_eq!(
            decode_cstring(&hal, 0, 64),
            Err(DecodeError::Fault { address: 4 })
        );
        assert_eq!(
            decode_cstring(&hal, -1, 64),
            Err(DecodeError::Fault { address: -1 })
        );
    }
}
