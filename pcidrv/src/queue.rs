//! FIFO request queues bridging the upper edge to TCB/RFD availability.

use alloc::collections::VecDeque;

use crate::request::RequestId;

/// Anything that can sit on a [`RequestQueue`].
pub trait Queued {
    fn request_id(&self) -> RequestId;
}

/// Strict FIFO queue with removal by id for cancellation.
pub struct RequestQueue<T> {
    name: &'static str,
    entries: VecDeque<T>,
}

impl<T: Queued> RequestQueue<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push_back(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    /// Pull a specific request out, preserving the order of the rest.
    pub fn remove(&mut self, id: RequestId) -> Option<T> {
        let pos = self.entries.iter().position(|e| e.request_id() == id)?;
        self.entries.remove(pos)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.iter().any(|e| e.request_id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Empty the queue in FIFO order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..)
    }
}
