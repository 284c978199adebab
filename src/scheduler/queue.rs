use std::collections::VecDeque;

use uuid::Uuid;

/// FIFO of job ids waiting for a worker slot.
///
/// Holds ids only. The dispatcher re-reads the stored record before acting,
/// so an id here is an ordering hint and never a source of job content.
#[derive(Debug, Default)]
pub struct PendingQueue {
    ids: VecDeque<Uuid>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id. Callers push each id at most once.
    pub fn push(&mut self, id: Uuid) {
        self.ids.push_back(id);
    }

    /// Return an id to the head of the queue after a failed dispatch attempt.
    pub fn push_front(&mut self, id: Uuid) {
        self.ids.push_front(id);
    }

    pub fn pop(&mut self) -> Option<Uuid> {
        self.ids.pop_front()
    }

    /// Best-effort removal, used when a queued job is cancelled.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        match self.ids.iter().position(|queued| queued == id) {
            Some(pos) => self.ids.remove(pos).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
