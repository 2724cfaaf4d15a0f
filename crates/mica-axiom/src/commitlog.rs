//! Commit Log
//!
//! Append-only record of kernel state mutations. Each commit carries the
//! hash of its predecessor, so dropping, reordering or editing an entry
//! breaks the chain and `verify_integrity` reports it.
//!
//! The hash covers the previous commit ID, the sequence number, the
//! timestamp, the causing SysLog event and the JSON encoding of the
//! commit type.

use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{CommitId, EventId, ProcessId};

/// Kinds of kernel state mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitType {
    /// First commit of every log
    Genesis,
    /// A PCB was created (initial load or fork)
    ProcessCreated {
        pid: ProcessId,
        parent: Option<ProcessId>,
        name: String,
    },
    /// A new program image replaced a process's address space
    ProgramLoaded { pid: ProcessId, path: String },
    /// A process finished
    ProcessExited { pid: ProcessId, status: i32 },
    /// A process was parked; `reason` names what it waits for
    ProcessBlocked { pid: ProcessId, reason: String },
    /// A parked process was made runnable again
    ProcessWoken { pid: ProcessId },
    /// A join was refused (unknown or self target)
    JoinRefused { pid: ProcessId, target: ProcessId },
    /// A message was placed in a receiver's inbox
    MessageSent {
        from: ProcessId,
        to: ProcessId,
        buffer: u32,
    },
    /// A queued message was discarded because its receiver exited
    MessageDropped { owner: ProcessId, buffer: u32 },
    /// A reply was deposited for the original sender
    AnswerSent {
        from: ProcessId,
        to: ProcessId,
        buffer: u32,
    },
    /// A sender picked up its reply
    AnswerCollected { pid: ProcessId, buffer: u32 },
    /// A buffer went back to the free pool
    BufferReleased { buffer: u32 },
}

/// A commit record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit {
    /// Hash of this commit
    pub id: CommitId,
    /// Hash of the previous commit (zero for genesis)
    pub prev_commit: CommitId,
    /// Sequence number (genesis is 0)
    pub seq: u64,
    /// Timestamp (nanos since boot)
    pub timestamp: u64,
    /// Type of mutation
    pub commit_type: CommitType,
    /// SysLog request that caused this commit, if any
    pub caused_by: Option<EventId>,
}

/// Hash-chained log of state mutations.
pub struct CommitLog {
    commits: Vec<Commit>,
}

impl CommitLog {
    /// Create a log holding only the genesis commit.
    pub fn new(timestamp: u64) -> Self {
        let mut log = Self {
            commits: Vec::new(),
        };
        log.push(CommitType::Genesis, None, timestamp);
        log
    }

    /// Append a commit and return its ID.
    pub fn append(
        &mut self,
        commit_type: CommitType,
        caused_by: Option<EventId>,
        timestamp: u64,
    ) -> CommitId {
        self.push(commit_type, caused_by, timestamp)
    }

    /// All commits, genesis first.
    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    /// Commits whose type matches `pred`.
    pub fn filter<F>(&self, pred: F) -> Vec<&Commit>
    where
        F: Fn(&CommitType) -> bool,
    {
        self.commits
            .iter()
            .filter(|c| pred(&c.commit_type))
            .collect()
    }

    /// Number of commits including genesis.
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Always false: a log holds at least its genesis commit.
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Sequence number of the newest commit.
    pub fn current_seq(&self) -> u64 {
        self.commits.last().map(|c| c.seq).unwrap_or(0)
    }

    /// ID of the newest commit.
    pub fn head(&self) -> CommitId {
        self.commits.last().map(|c| c.id).unwrap_or([0u8; 32])
    }

    /// Re-check sequence numbers, back links and hashes of the whole chain.
    pub fn verify_integrity(&self) -> bool {
        let mut prev: CommitId = [0u8; 32];
        for (index, commit) in self.commits.iter().enumerate() {
            if commit.seq != index as u64 || commit.prev_commit != prev {
                return false;
            }
            let expected = compute_commit_id(
                &commit.prev_commit,
                commit.seq,
                commit.timestamp,
                commit.caused_by,
                &commit.commit_type,
            );
            if expected != commit.id {
                return false;
            }
            prev = commit.id;
        }
        true
    }

    /// Serialize the whole log as JSON (for export/inspection).
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.commits)
    }

    fn push(
        &mut self,
        commit_type: CommitType,
        caused_by: Option<EventId>,
        timestamp: u64,
    ) -> CommitId {
        let prev_commit = self.head();
        let seq = self.commits.len() as u64;
        let id = compute_commit_id(&prev_commit, seq, timestamp, caused_by, &commit_type);

        self.commits.push(Commit {
            id,
            prev_commit,
            seq,
            timestamp,
            commit_type,
            caused_by,
        });
        id
    }
}

fn compute_commit_id(
    prev: &CommitId,
    seq: u64,
    timestamp: u64,
    caused_by: Option<EventId>,
    commit_type: &CommitType,
) -> CommitId {
    let mut hasher = Sha256::new();
    hasher.update(prev);
    hasher.update(seq.to_le_bytes());
    hasher.update(timestamp.to_le_bytes());
    match caused_by {
        Some(event) => {
            hasher.update([1u8]);
            hasher.update(event.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
    // Plain enums of integers and strings always encode
    let encoded = serde_json::to_vec(commit_type).unwrap_or_default();
    hasher.update(&encoded);
    hasher.finalize().into()
}
