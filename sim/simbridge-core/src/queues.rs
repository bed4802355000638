//! The inbound frame queue sitting between the multiplexer (producer) and a
//! session's tick (consumer).

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

/// A queue shared between a session and its reader task. Both run on the
/// host thread and never overlap, so no locking is involved.
pub type SharedQueue = Rc<RefCell<FrameQueue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStat {
    Ok,
    Dropped,
}

/// A FIFO of complete frames awaiting delivery to the hardware.
///
/// Unbounded unless a capacity (in frames) is given. Network input that
/// outpaces the simulated clock grows an unbounded queue without limit; a
/// bounded queue drops the newest frame instead.
#[derive(Debug, Default)]
pub struct FrameQueue {
    queue: VecDeque<Vec<u8>>,
    capacity: Option<usize>,
    total: usize,
    dropped: u64,
}

impl FrameQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn shared(capacity: Option<usize>) -> SharedQueue {
        Rc::new(RefCell::new(Self::new(capacity)))
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Bytes currently queued.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Frames refused because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn put(&mut self, frame: Vec<u8>) -> PutStat {
        match self.capacity {
            Some(capacity) if self.queue.len() >= capacity => {
                self.dropped += 1;
                PutStat::Dropped
            }
            _ => {
                self.total += frame.len();
                self.queue.push_back(frame);
                PutStat::Ok
            }
        }
    }

    pub fn get(&mut self) -> Option<Vec<u8>> {
        let top = self.queue.pop_front()?;
        self.total -= top.len();
        Some(top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_leave_in_arrival_order() {
        let mut queue = FrameQueue::new(None);
        assert_eq!(queue.put(vec![1; 10]), PutStat::Ok);
        assert_eq!(queue.put(vec![2; 20]), PutStat::Ok);
        assert_eq!(queue.total(), 30);
        assert_eq!(queue.get(), Some(vec![1; 10]));
        assert_eq!(queue.get(), Some(vec![2; 20]));
        assert_eq!(queue.get(), None);
        assert_eq!(queue.total(), 0);
    }

    #[test]
    fn bounded_queue_drops_newest() {
        let mut queue = FrameQueue::new(Some(1));
        assert_eq!(queue.put(vec![1]), PutStat::Ok);
        assert_eq!(queue.put(vec![2]), PutStat::Dropped);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(), Some(vec![1]));
    }
}
