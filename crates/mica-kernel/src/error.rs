//! Errors surfaced by the runtime kernel

use core::fmt;

use mica_hal::HalError;
use mica_kernel_core::KernelError;

use crate::registers::DecodeError;

/// Failure of a host-facing kernel operation (`spawn`, `boot`, `enter`).
///
/// Syscall failures never come out as a `TrapError`; they are reported to
/// the user program as -1 in its result register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapError {
    /// Kernel state refused the operation
    Kernel(KernelError),
    /// A collaborator behind the HAL failed
    Hal(HalError),
    /// A string could not be read out of user memory
    Decode(DecodeError),
}

impl From<KernelError> for TrapError {
    fn from(e: KernelError) -> Self {
        TrapError::Kernel(e)
    }
}

impl From<HalError> for TrapError {
    fn from(e: HalError) -> Self {
        TrapError::Hal(e)
    }
}

impl From<DecodeError> for TrapError {
    fn from(e: DecodeError) -> Self {
        TrapError::Decode(e)
    }
}

impl fmt::Display for TrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrapError::Kernel(e) => write!(f, "kernel: {}", e),
            TrapError::Hal(e) => write!(f, "hal: {}", e),
            TrapError::Decode(e) => write!(f, "decode: {}", e),
        }
    }
}
