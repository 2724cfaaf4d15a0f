//! Axiom gateway
//!
//! The kernel opens every trap with [`AxiomGateway::begin`], runs the
//! syscall, then closes it with [`AxiomGateway::complete`]. Opening and
//! closing are split because the syscall body needs `&mut` access to the
//! kernel that owns the gateway. Mutations that happen outside a trap
//! (process spawn, scheduler entry) go through [`AxiomGateway::record`].

use alloc::vec::Vec;

use crate::commitlog::{CommitLog, CommitType};
use crate::syslog::SysLog;
use crate::types::{CommitId, EventId, ProcessId};

/// Handle for an open trap. Consumed by [`AxiomGateway::complete`].
#[derive(Debug)]
#[must_use = "an open trap must be completed"]
pub struct TrapTicket {
    pid: ProcessId,
    event: EventId,
}

impl TrapTicket {
    /// SysLog ID of the trap entry.
    pub fn event(&self) -> EventId {
        self.event
    }
}

pub struct AxiomGateway {
    syslog: SysLog,
    commitlog: CommitLog,
}

impl AxiomGateway {
    /// `boot_time` stamps the genesis commit.
    pub fn new(boot_time: u64, syslog_capacity: usize) -> Self {
        Self {
            syslog: SysLog::with_capacity(syslog_capacity),
            commitlog: CommitLog::new(boot_time),
        }
    }

    pub fn begin(&mut self, pid: ProcessId, code: i32, args: [i32; 4], now: u64) -> TrapTicket {
        let event = self.syslog.record_trap(pid, code, args, now);
        TrapTicket { pid, event }
    }

    /// Close a trap: chain its commits (each pointing at the trap entry),
    /// then journal the value handed back to the caller.
    pub fn complete(
        &mut self,
        ticket: TrapTicket,
        value: i64,
        commits: Vec<CommitType>,
        now: u64,
    ) -> Vec<CommitId> {
        let mut ids = Vec::with_capacity(commits.len());
        for commit in commits {
            ids.push(self.commitlog.append(commit, Some(ticket.event), now));
        }
        self.syslog.record_return(ticket.pid, ticket.event, value, now);
        ids
    }

    /// Chain a commit that has no trap behind it.
    pub fn record(&mut self, commit: CommitType, now: u64) -> CommitId {
        self.commitlog.append(commit, None, now)
    }

    pub fn syslog(&self) -> &SysLog {
        &self.syslog
    }

    pub fn commitlog(&self) -> &CommitLog {
        &self.commitlog
    }

    pub fn verify_integrity(&self) -> bool {
        self.commitlog.verify_integrity()
    }

    pub fn summary(&self) -> AuditSummary {
        AuditSummary {
            events: self.syslog.len(),
            events_evicted: self.syslog.evicted(),
            next_event: self.syslog.next_id(),
            commits: self.commitlog.len(),
            head: self.commitlog.head(),
        }
    }
}

/// Point-in-time counters for both logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditSummary {
    pub events: usize,
    pub events_evicted: u64,
    pub next_event: EventId,
    pub commits: usize,
    pub head: CommitId,
}
