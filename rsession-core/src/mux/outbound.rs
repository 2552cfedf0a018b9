//! The send loop's queue: priority classes plus superseding.

use std::collections::VecDeque;

use crate::message::{DeliveryMode, Message, Priority};

/// A message on its way to the send loop, tagged with its channel's
/// delivery semantics.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub message: Message,
    pub mode: DeliveryMode,
    pub priority: Priority,
}

/// What happened to a pushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// An older unsent message of the same best-effort channel was
    /// discarded; the new one took its place.
    Superseded { dropped_sequence: u64 },
}

/// Two FIFO classes. Control is always dequeued before data; within a
/// class, messages leave in first-submitted order.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    control: VecDeque<Outbound>,
    data: VecDeque<Outbound>,
    superseded: u64,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Outbound) -> PushOutcome {
        let class = match item.priority {
            Priority::Control => &mut self.control,
            Priority::Data => &mut self.data,
        };

        if item.mode == DeliveryMode::BestEffortLatest {
            if let Some(slot) = class
                .iter_mut()
                .find(|queued| queued.message.channel() == item.message.channel())
            {
                let dropped_sequence = slot.message.sequence();
                *slot = item;
                self.superseded += 1;
                return PushOutcome::Superseded { dropped_sequence };
            }
        }

        class.push_back(item);
        PushOutcome::Queued
    }

    pub fn pop(&mut self) -> Option<Outbound> {
        self.control.pop_front().or_else(|| self.data.pop_front())
    }

    pub fn pop_control(&mut self) -> Option<Outbound> {
        self.control.pop_front()
    }

    pub fn len(&self) -> usize {
        self.control.len() + self.data.len()
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.control.is_empty() && self.data.is_empty()
    }

    /// Unsent messages of `channel` currently held.
    pub fn pending_for(&self, channel: &str) -> usize {
        self.control
            .iter()
            .chain(self.data.iter())
            .filter(|q| q.message.channel() == channel)
            .count()
    }

    /// Total best-effort messages discarded by superseding.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    /// Discard everything. Returns how many messages were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.len();
        self.control.clear();
        self.data.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;

    fn item(channel: &str, seq: u64, mode: DeliveryMode, priority: Priority) -> Outbound {
        Outbound {
            message: Message::new(Arc::from(channel), seq, Bytes::from(vec![seq as u8])),
            mode,
            priority,
        }
    }

    fn frame(seq: u64) -> Outbound {
        item("rs.framebuffer", seq, DeliveryMode::BestEffortLatest, Priority::Data)
    }

    fn input(seq: u64) -> Outbound {
        item("rs.input", seq, DeliveryMode::ReliableOrdered, Priority::Data)
    }

    #[test]
    fn newer_frame_supersedes_unsent_one() {
        let mut q = OutboundQueue::new();
        assert_eq!(q.push(frame(1)), PushOutcome::Queued);
        assert_eq!(q.push(frame(2)), PushOutcome::Superseded { dropped_sequence: 1 });
        assert_eq!(q.push(frame(3)), PushOutcome::Superseded { dropped_sequence: 2 });
        assert_eq!(q.pending_for("rs.framebuffer"), 1);
        assert_eq!(q.pop().unwrap().message.sequence(), 3);
        assert!(q.is_empty());
        assert_eq!(q.superseded(), 2);
    }

    #[test]
    fn reliable_messages_are_never_superseded() {
        let mut q = OutboundQueue::new();
        for seq in 0..5 {
            assert_eq!(q.push(input(seq)), PushOutcome::Queued);
        }
        let seqs: Vec<u64> = std::iter::from_fn(|| q.pop()).map(|o| o.message.sequence()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn control_preempts_data_and_data_keeps_submission_order() {
        let mut q = OutboundQueue::new();
        q.push(input(0));
        q.push(frame(0));
        q.push(input(1));
        q.push(item("rs.control", 7, DeliveryMode::ReliableOrdered, Priority::Control));

        let order: Vec<(String, u64)> = std::iter::from_fn(|| q.pop())
            .map(|o| (o.message.channel().to_string(), o.message.sequence()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("rs.control".into(), 7),
                ("rs.input".into(), 0),
                ("rs.framebuffer".into(), 0),
                ("rs.input".into(), 1),
            ]
        );
    }

    #[test]
    fn superseding_frame_keeps_original_slot() {
        let mut q = OutboundQueue::new();
        q.push(frame(1));
        q.push(input(0));
        q.push(frame(2));
        assert_eq!(q.pop().unwrap().message.sequence(), 2);
        assert_eq!(q.pop().unwrap().message.channel(), "rs.input");
    }

    #[test]
    fn clear_reports_discarded_count() {
        let mut q = OutboundQueue::new();
        q.push(input(0));
        q.push(frame(0));
        assert_eq!(q.clear(), 2);
        assert!(q.pop().is_none());
    }
}
