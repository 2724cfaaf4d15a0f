//! Message buffer pool
//!
//! A fixed number of slots shared by every process. A slot is either free or
//! held by exactly one inbox entry or one pending answer; the pool itself
//! only tracks occupancy, the holders live in [`KernelState`].
//!
//! [`KernelState`]: crate::state::KernelState

use alloc::string::String;
use alloc::vec::Vec;

use crate::types::{BufferId, ProcessId};

/// One slot of the pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageBuffer {
    /// Slot index
    pub id: BufferId,
    /// Free for allocation
    pub empty: bool,
    /// Process that sent the message
    pub sender: Option<ProcessId>,
    /// Request text
    pub message: String,
    /// Reply text, set by SendAns
    pub answer: Option<String>,
}

impl MessageBuffer {
    fn free(id: BufferId) -> Self {
        Self {
            id,
            empty: true,
            sender: None,
            message: String::new(),
            answer: None,
        }
    }
}

/// Fixed-capacity pool of message buffers
#[derive(Clone, Debug)]
pub struct BufferPool {
    slots: Vec<MessageBuffer>,
}

impl BufferPool {
    /// Create a pool of `capacity` free buffers.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| MessageBuffer::free(BufferId(i as u32)))
            .collect();
        Self { slots }
    }

    /// Claim the lowest-numbered free buffer for `sender`.
    ///
    /// Returns `None` when every buffer is in use.
    pub fn allocate(&mut self, sender: ProcessId, body: &str) -> Option<BufferId> {
        let slot = self.slots.iter_mut().find(|b| b.empty)?;
        slot.empty = false;
        slot.sender = Some(sender);
        slot.message = String::from(body);
        slot.answer = None;
        Some(slot.id)
    }

    /// Look up a buffer
    pub fn get(&self, id: BufferId) -> Option<&MessageBuffer> {
        self.slots.get(id.0 as usize)
    }

    /// Look up a buffer mutably
    pub fn get_mut(&mut self, id: BufferId) -> Option<&mut MessageBuffer> {
        self.slots.get_mut(id.0 as usize)
    }

    /// Return a buffer to the pool. Releasing a free or unknown id is a no-op.
    pub fn release(&mut self, id: BufferId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            *slot = MessageBuffer::free(id);
        }
    }

    /// Whether `id` names an in-use buffer
    pub fn is_in_use(&self, id: BufferId) -> bool {
        self.get(id).map(|b| !b.empty).unwrap_or(false)
    }

    /// Number of free buffers
    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|b| b.empty).count()
    }

    /// Total number of buffers
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over every slot
    pub fn iter(&self) -> impl Iterator<Item = &MessageBuffer> {
        self.slots.iter()
    }
}
