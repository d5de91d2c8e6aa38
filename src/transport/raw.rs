//! Raw sockets (§4.G): received IP or raw-Ethernet frames are handed to a
//! per-socket queue verbatim, with no protocol interpretation.

use alloc::collections::VecDeque;

use crate::buffer::PacketBuffer;

/// A bounded FIFO of whole frames/datagrams delivered to one raw socket.
/// Oldest-drop on overflow, matching the "best effort, no flow control"
/// nature of raw delivery.
pub struct RawQueue {
    queue: VecDeque<PacketBuffer>,
    capacity: usize,
}

impl RawQueue {
    pub fn new(capacity: usize) -> Self {
        RawQueue {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, buf: PacketBuffer) {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back(buf);
    }

    pub fn pop(&mut self) -> Option<PacketBuffer> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest() {
        let mut q = RawQueue::new(2);
        q.push(PacketBuffer::allocate(1));
        q.push(PacketBuffer::allocate(2));
        q.push(PacketBuffer::allocate(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().unwrap().len(), 2);
        assert_eq!(q.pop().unwrap().len(), 3);
    }
}
