//! Trap journal
//!
//! Every trap leaves two entries: the `Trap` itself (code and argument
//! registers as the process left them) and the matching `Return` (the value
//! written back to r2, or the marker for a call that never returns). The
//! CommitLog records what the trap changed; this records what was asked.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::types::{EventId, ProcessId};

/// Default number of events kept in memory
pub const DEFAULT_SYSLOG_CAPACITY: usize = 10000;

/// One journal entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysEvent {
    pub id: EventId,
    /// Process that trapped
    pub pid: ProcessId,
    /// Nanos since boot
    pub at: u64,
    pub kind: SysEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SysEventKind {
    /// Trap entry: r2 and r4-r7
    Trap { code: i32, args: [i32; 4] },
    /// Trap exit, pointing back at its `Trap` entry
    Return { trap: EventId, value: i64 },
}

impl SysEvent {
    pub fn is_trap(&self) -> bool {
        matches!(self.kind, SysEventKind::Trap { .. })
    }
}

/// Bounded, append-only trap journal.
///
/// IDs are never reused. When the journal is full the oldest entry is
/// evicted and counted in [`SysLog::evicted`].
pub struct SysLog {
    entries: VecDeque<SysEvent>,
    next_id: EventId,
    capacity: usize,
    evicted: u64,
}

impl SysLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SYSLOG_CAPACITY)
    }

    /// A journal holding at most `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 0,
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    /// Record a trap entry. The returned ID is what the matching
    /// [`SysLog::record_return`] refers to.
    pub fn record_trap(&mut self, pid: ProcessId, code: i32, args: [i32; 4], at: u64) -> EventId {
        self.append(pid, at, SysEventKind::Trap { code, args })
    }

    pub fn record_return(&mut self, pid: ProcessId, trap: EventId, value: i64, at: u64) -> EventId {
        self.append(pid, at, SysEventKind::Return { trap, value })
    }

    /// Retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SysEvent> + '_ {
        self.entries.iter()
    }

    /// Retained entries with `id >= from`.
    pub fn since(&self, from: EventId) -> impl Iterator<Item = &SysEvent> + '_ {
        self.entries.iter().filter(move |e| e.id >= from)
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<&SysEvent> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    /// Trap entries made by `pid`, oldest first.
    pub fn traps_by(&self, pid: ProcessId) -> Vec<&SysEvent> {
        self.entries
            .iter()
            .filter(|e| e.pid == pid && e.is_trap())
            .collect()
    }

    /// Value recorded for the return of trap `trap`, if still retained.
    pub fn returned_value(&self, trap: EventId) -> Option<i64> {
        self.entries.iter().find_map(|e| match e.kind {
            SysEventKind::Return { trap: t, value } if t == trap => Some(value),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// ID the next entry will get.
    pub fn next_id(&self) -> EventId {
        self.next_id
    }

    /// Entries dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn append(&mut self, pid: ProcessId, at: u64, kind: SysEventKind) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(SysEvent { id, pid, at, kind });
        id
    }
}

impl Default for SysLog {
    fn default() -> Self {
        Self::new()
    }
}
