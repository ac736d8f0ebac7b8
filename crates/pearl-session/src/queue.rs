//! Outbound message queue.
//!
//! FIFO for normal messages; express messages go ahead of every normal
//! message but stay FIFO among themselves.

use std::collections::VecDeque;

use pearl_protocol::ClientMessage;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub express: bool,
    pub message: ClientMessage,
    /// Messages that replace the whole queue once this one is sent.
    /// Only meaningful for `model#abort`.
    pub continuation: Vec<ClientMessage>,
}

impl QueuedMessage {
    fn normal(message: ClientMessage) -> Self {
        Self {
            express: false,
            message,
            continuation: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    pub fn enqueue(&mut self, message: ClientMessage) {
        self.entries.push_back(QueuedMessage::normal(message));
    }

    pub fn enqueue_express(&mut self, message: ClientMessage) {
        self.insert_express(QueuedMessage {
            express: true,
            message,
            continuation: Vec::new(),
        });
    }

    /// Express abort; once sent, the queue becomes `continuation`.
    pub fn enqueue_abort(&mut self, continuation: Vec<ClientMessage>) {
        self.insert_express(QueuedMessage {
            express: true,
            message: ClientMessage::Abort,
            continuation,
        });
    }

    fn insert_express(&mut self, entry: QueuedMessage) {
        let position = self
            .entries
            .iter()
            .position(|queued| !queued.express)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
    }

    pub fn head(&self) -> Option<&QueuedMessage> {
        self.entries.front()
    }

    pub fn pop(&mut self) -> Option<QueuedMessage> {
        self.entries.pop_front()
    }

    pub fn replace_with(&mut self, messages: Vec<ClientMessage>) {
        self.entries = messages.into_iter().map(QueuedMessage::normal).collect();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> Vec<QueuedMessage> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pearl_protocol::{AoiId, CheckpointId};

    fn checkpoint(id: u64) -> ClientMessage {
        ClientMessage::checkpoint(CheckpointId::new(id))
    }

    fn aoi(id: u64) -> ClientMessage {
        ClientMessage::load_aoi(AoiId::new(id))
    }

    #[test]
    fn express_messages_precede_normal_ones_in_arrival_order() {
        let mut queue = OutboundQueue::default();
        queue.enqueue(checkpoint(1));
        queue.enqueue_express(aoi(10));
        queue.enqueue(checkpoint(2));
        queue.enqueue_express(aoi(11));
        queue.enqueue_abort(Vec::new());
        queue.enqueue(checkpoint(3));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop().map(|q| q.message)).collect();
        assert_eq!(
            order,
            vec![
                aoi(10),
                aoi(11),
                ClientMessage::Abort,
                checkpoint(1),
                checkpoint(2),
                checkpoint(3),
            ]
        );
    }

    #[test]
    fn replace_with_drops_pending_and_marks_normal() {
        let mut queue = OutboundQueue::default();
        queue.enqueue(checkpoint(1));
        queue.enqueue_express(aoi(2));
        queue.replace_with(vec![checkpoint(9)]);
        assert_eq!(queue.len(), 1);
        let head = queue.head().unwrap();
        assert!(!head.express);
        assert_eq!(head.message, checkpoint(9));
    }

    #[test]
    fn clear_empties_queue() {
        let mut queue = OutboundQueue::default();
        queue.enqueue(checkpoint(1));
        queue.enqueue_abort(vec![checkpoint(2)]);
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.head().is_none());
    }
}
