//! Syscall numbers (user ABI)
//!
//! User programs place one of these codes in r2 before trapping.

pub const SC_HALT: i32 = 0;
pub const SC_EXIT: i32 = 1;
pub const SC_EXEC: i32 = 2;
pub const SC_JOIN: i32 = 3;
pub const SC_CREATE: i32 = 4;
pub const SC_OPEN: i32 = 5;
pub const SC_READ: i32 = 6;
pub const SC_WRITE: i32 = 7;
pub const SC_CLOSE: i32 = 8;
pub const SC_FORK: i32 = 9;
pub const SC_YIELD: i32 = 10;
pub const SC_SEND_MSG: i32 = 13;
pub const SC_WAIT_MSG: i32 = 14;
pub const SC_SEND_ANS: i32 = 15;
pub const SC_WAIT_ANS: i32 = 16;

/// Syscalls this layer services
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallCode {
    Halt,
    Exit,
    Exec,
    Join,
    Fork,
    Yield,
    SendMsg,
    WaitMsg,
    SendAns,
    WaitAns,
}

impl SyscallCode {
    /// Decode a trap code. File syscalls and unknown codes give `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            SC_HALT => Some(SyscallCode::Halt),
            SC_EXIT => Some(SyscallCode::Exit),
            SC_EXEC => Some(SyscallCode::Exec),
            SC_JOIN => Some(SyscallCode::Join),
            SC_FORK => Some(SyscallCode::Fork),
            SC_YIELD => Some(SyscallCode::Yield),
            SC_SEND_MSG => Some(SyscallCode::SendMsg),
            SC_WAIT_MSG => Some(SyscallCode::WaitMsg),
            SC_SEND_ANS => Some(SyscallCode::SendAns),
            SC_WAIT_ANS => Some(SyscallCode::WaitAns),
            _ => None,
        }
    }

    /// Name used in trace output
    pub fn name(&self) -> &'static str {
        match self {
            SyscallCode::Halt => "Halt",
            SyscallCode::Exit => "Exit",
            SyscallCode::Exec => "Exec",
            SyscallCode::Join => "Join",
            SyscallCode::Fork => "Fork",
            SyscallCode::Yield => "Yield",
            SyscallCode::SendMsg => "SendMsg",
            SyscallCode::WaitMsg => "WaitMsg",
            SyscallCode::SendAns => "SendAns",
            SyscallCode::WaitAns => "WaitAns",
        }
    }
}
