//! Primitive identifiers shared by the logs.

/// Raw process identifier as recorded in the logs
pub type ProcessId = u32;

/// Monotonic SysLog event identifier
pub type EventId = u64;

/// SHA-256 hash identifying a commit
pub type CommitId = [u8; 32];
