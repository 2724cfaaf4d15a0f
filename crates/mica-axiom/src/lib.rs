//! Mica Axiom - audit trail and mutation record for the syscall layer
//!
//! Two append-only logs sit beside the kernel:
//!
//! - [`SysLog`]: every trap, as an entry (code + argument registers) and a
//!   return (the value handed back to the caller)
//! - [`CommitLog`]: every kernel state mutation, hash-chained so the record
//!   can be checked for tampering or loss
//!
//! [`AxiomGateway`] owns both and is what the kernel talks to.

#![no_std]
extern crate alloc;

pub mod commitlog;
pub mod gateway;
pub mod syslog;
pub mod types;

pub use commitlog::{Commit, CommitLog, CommitType};
pub use gateway::{AuditSummary, AxiomGateway, TrapTicket};
pub use syslog::{SysEvent, SysEventKind, SysLog, DEFAULT_SYSLOG_CAPACITY};
pub use types::{CommitId, EventId, ProcessId};
