//! Generic IP fragment reassembly engine (§4.E), shared by IPv4 and IPv6.
//!
//! Implements the RFC 815 hole-list algorithm: each reassembly slot starts
//! with one hole spanning the whole (as yet unknown) datagram; every
//! arriving fragment removes the hole it fills and, unless the fragment
//! exactly matches the hole's bounds, re-inserts the leftover pieces.
//! Reassembly is complete exactly when the hole list empties (§3, §8
//! invariant #2).

use alloc::vec::Vec;

use crate::buffer::PacketBuffer;
use crate::Instant;

/// `last` is inclusive. The sentinel `u32::MAX` stands in for "unbounded"
/// until the final fragment (`more_fragments = false`) pins the real
/// datagram length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hole {
    first: u32,
    last: u32,
}

const UNBOUNDED: u32 = u32::MAX;

struct Entry<K> {
    key: K,
    holes: Vec<Hole>,
    total_len: Option<u32>,
    data: Vec<u8>,
    /// Extension/protocol headers copied from the first fragment (offset
    /// 0), handed back to the caller on completion so it can re-derive
    /// upper-layer framing.
    first_header: Vec<u8>,
    deadline: Instant,
}

pub struct ReassemblyTable<K> {
    entries: Vec<Entry<K>>,
    capacity: usize,
    timeout: crate::Duration,
}

/// Outcome of inserting one fragment.
pub enum InsertOutcome {
    /// More fragments still expected.
    Pending,
    /// The hole list is now empty: full datagram payload plus the header
    /// captured from the first fragment.
    Complete { payload: Vec<u8>, first_header: Vec<u8> },
}

impl<K: PartialEq + Clone> ReassemblyTable<K> {
    pub fn new(capacity: usize, timeout: crate::Duration) -> Self {
        ReassemblyTable {
            entries: Vec::with_capacity(capacity),
            capacity,
            timeout,
        }
    }

    fn find_index(&self, key: &K) -> Option<usize> {
        self.entries.iter().position(|e| &e.key == key)
    }

    /// Inserts one fragment's payload at byte offset `offset` within the
    /// reassembled datagram. `first_header` must be supplied (and is only
    /// used) for the fragment at offset 0.
    pub fn insert(
        &mut self,
        key: K,
        offset: u32,
        payload: &[u8],
        more_fragments: bool,
        first_header: Option<&[u8]>,
        now: Instant,
    ) -> InsertOutcome {
        let idx = match self.find_index(&key) {
            Some(i) => i,
            None => {
                if self.entries.len() >= self.capacity {
                    // Evict the oldest (closest to expiry) slot to make
                    // room; a malformed/slow sender should not starve
                    // well-behaved ones.
                    if let Some(oldest) = self
                        .entries
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, e)| e.deadline)
                        .map(|(i, _)| i)
                    {
                        self.entries.remove(oldest);
                    }
                }
                self.entries.push(Entry {
                    key,
                    holes: alloc::vec![Hole {
                        first: 0,
                        last: UNBOUNDED,
                    }],
                    total_len: None,
                    data: Vec::new(),
                    first_header: Vec::new(),
                    deadline: now + self.timeout,
                });
                self.entries.len() - 1
            }
        };

        let first = offset;
        let last = offset + payload.len() as u32 - 1;

        {
            let entry = &mut self.entries[idx];
            if offset == 0 {
                if let Some(hdr) = first_header {
                    entry.first_header = hdr.to_vec();
                }
            }
            if !more_fragments {
                entry.total_len = Some(last + 1);
            }

            let mut new_holes = Vec::with_capacity(entry.holes.len() + 1);
            for hole in entry.holes.drain(..) {
                if last < hole.first || first > hole.last {
                    new_holes.push(hole);
                    continue;
                }
                if first > hole.first {
                    new_holes.push(Hole {
                        first: hole.first,
                        last: first - 1,
                    });
                }
                if last < hole.last && more_fragments {
                    new_holes.push(Hole {
                        first: last + 1,
                        last: hole.last,
                    });
                }
            }
            entry.holes = new_holes;

            let needed = (last + 1) as usize;
            if entry.data.len() < needed {
                entry.data.resize(needed, 0);
            }
            entry.data[first as usize..=last as usize].copy_from_slice(payload);
        }

        let entry = &self.entries[idx];
        if entry.holes.is_empty() && entry.total_len.is_some() {
            let entry = self.entries.remove(idx);
            return InsertOutcome::Complete {
                payload: entry.data,
                first_header: entry.first_header,
            };
        }
        InsertOutcome::Pending
    }

    /// Frees every slot whose absolute deadline has passed, returning
    /// their keys so the caller can log/account for the drop.
    pub fn expire(&mut self, now: Instant) -> Vec<K> {
        let mut expired = Vec::new();
        self.entries.retain(|e| {
            if e.deadline <= now {
                expired.push(e.key.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Helper used by callers that want to hand a reassembled datagram onward
/// as a [`PacketBuffer`] without an extra copy of the header bytes.
pub fn to_packet_buffer(payload: Vec<u8>) -> PacketBuffer {
    PacketBuffer::from_received(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_fragments_reassemble_in_order() {
        let mut table: ReassemblyTable<u32> = ReassemblyTable::new(4, crate::Duration::from_millis(1000));
        let key = 1u32;
        let a = table.insert(key, 0, &[1, 2, 3, 4], true, Some(&[0xAA]), Instant::ZERO);
        assert!(matches!(a, InsertOutcome::Pending));
        let b = table.insert(key, 4, &[5, 6, 7, 8], true, None, Instant::ZERO);
        assert!(matches!(b, InsertOutcome::Pending));
        let c = table.insert(key, 8, &[9, 10], false, None, Instant::ZERO);
        match c {
            InsertOutcome::Complete { payload, first_header } => {
                assert_eq!(payload, alloc::vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
                assert_eq!(first_header, alloc::vec![0xAA]);
            }
            InsertOutcome::Pending => panic!("expected completion"),
        }
    }

    #[test]
    fn out_of_order_fragments_still_reassemble() {
        let mut table: ReassemblyTable<u32> = ReassemblyTable::new(4, crate::Duration::from_millis(1000));
        let key = 7u32;
        table.insert(key, 8, &[9, 10], false, None, Instant::ZERO);
        table.insert(key, 0, &[1, 2, 3, 4], true, Some(&[]), Instant::ZERO);
        let last = table.insert(key, 4, &[5, 6, 7, 8], true, None, Instant::ZERO);
        match last {
            InsertOutcome::Complete { payload, .. } => {
                assert_eq!(payload, alloc::vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
            }
            InsertOutcome::Pending => panic!("expected completion"),
        }
    }

    #[test]
    fn missing_middle_fragment_expires() {
        let mut table: ReassemblyTable<u32> =
            ReassemblyTable::new(4, crate::Duration::from_millis(500));
        let key = 3u32;
        table.insert(key, 0, &[1, 2, 3, 4], true, Some(&[]), Instant::ZERO);
        table.insert(key, 8, &[9, 10], false, None, Instant::ZERO);
        assert_eq!(table.len(), 1);
        let expired = table.expire(Instant::from_millis(600));
        assert_eq!(expired, alloc::vec![3u32]);
        assert!(table.is_empty());
    }
}
