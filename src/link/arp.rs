//! ARP cache and resolution (§4.D), RFC 826 wire format (§6.2).

use alloc::vec::Vec;

use crate::buffer::PacketBuffer;
use crate::config::ArpConfig;
use crate::error::{Error, Result, RxError};
use crate::ipv4::Ipv4Address;
use crate::link::ethernet::EthernetAddress;
use crate::Instant;

pub const HARDWARE_TYPE_ETHERNET: u16 = 1;
pub const PROTOCOL_TYPE_IPV4: u16 = 0x0800;
pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;
pub const WIRE_LEN: usize = 28;

#[derive(Debug, Clone)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: EthernetAddress,
    pub sender_ip: Ipv4Address,
    pub target_mac: EthernetAddress,
    pub target_ip: Ipv4Address,
}

pub fn parse(data: &[u8]) -> core::result::Result<ArpPacket, RxError> {
    if data.len() < WIRE_LEN {
        return Err(RxError::TooShort);
    }
    let htype = u16::from_be_bytes([data[0], data[1]]);
    let ptype = u16::from_be_bytes([data[2], data[3]]);
    let hlen = data[4];
    let plen = data[5];
    if htype != HARDWARE_TYPE_ETHERNET || ptype != PROTOCOL_TYPE_IPV4 || hlen != 6 || plen != 4 {
        return Err(RxError::Unsupported);
    }
    let operation = u16::from_be_bytes([data[6], data[7]]);
    let sender_mac = EthernetAddress::from_bytes(&data[8..14]).unwrap();
    let sender_ip = Ipv4Address([data[14], data[15], data[16], data[17]]);
    let target_mac = EthernetAddress::from_bytes(&data[18..24]).unwrap();
    let target_ip = Ipv4Address([data[24], data[25], data[26], data[27]]);
    Ok(ArpPacket {
        operation,
        sender_mac,
        sender_ip,
        target_mac,
        target_ip,
    })
}

pub fn encode(out: &mut [u8], pkt: &ArpPacket) -> Result<()> {
    if out.len() < WIRE_LEN {
        return Err(Error::OutOfResources);
    }
    out[0..2].copy_from_slice(&HARDWARE_TYPE_ETHERNET.to_be_bytes());
    out[2..4].copy_from_slice(&PROTOCOL_TYPE_IPV4.to_be_bytes());
    out[4] = 6;
    out[5] = 4;
    out[6..8].copy_from_slice(&pkt.operation.to_be_bytes());
    out[8..14].copy_from_slice(&pkt.sender_mac.0);
    out[14..18].copy_from_slice(&pkt.sender_ip.0);
    out[18..24].copy_from_slice(&pkt.target_mac.0);
    out[24..28].copy_from_slice(&pkt.target_ip.0);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Incomplete,
    Reachable,
    Stale,
}

/// One cache entry (§3 data model). `pending` holds at most one queued
/// outbound buffer; queuing a newer one drops whatever was waiting.
pub struct ArpEntry {
    pub ip: Ipv4Address,
    pub mac: EthernetAddress,
    pub state: ArpState,
    pub timestamp: Instant,
    pub retries: u32,
    pub pending: Option<PacketBuffer>,
}

/// What the caller must do after a cache operation: nothing, send a
/// request/probe, or deliver a buffer that just got resolved.
pub enum ArpAction {
    None,
    SendRequest { target: Ipv4Address },
    SendProbe { target: Ipv4Address, mac: EthernetAddress },
    Deliver(PacketBuffer, EthernetAddress),
    DropPending,
}

pub struct ArpCache {
    entries: Vec<ArpEntry>,
    capacity: usize,
    config: ArpConfig,
}

impl ArpCache {
    pub fn new(capacity: usize, config: ArpConfig) -> Self {
        ArpCache {
            entries: Vec::with_capacity(capacity),
            capacity,
            config,
        }
    }

    fn find_mut(&mut self, ip: Ipv4Address) -> Option<&mut ArpEntry> {
        self.entries.iter_mut().find(|e| e.ip == ip)
    }

    /// Looks up `ip`. On a `Reachable` hit returns the MAC immediately. On
    /// a miss, creates an `Incomplete` entry, queues `packet` (dropping any
    /// older pending packet for that entry) and tells the caller to send a
    /// broadcast request. `Stale` entries return their last-known MAC but
    /// also ask the caller to probe it.
    pub fn resolve(
        &mut self,
        ip: Ipv4Address,
        packet: PacketBuffer,
        now: Instant,
    ) -> (Option<EthernetAddress>, ArpAction) {
        if let Some(idx) = self.entries.iter().position(|e| e.ip == ip) {
            let entry = &mut self.entries[idx];
            match entry.state {
                ArpState::Reachable => (Some(entry.mac), ArpAction::None),
                ArpState::Stale => {
                    let mac = entry.mac;
                    (Some(mac), ArpAction::SendProbe { target: ip, mac })
                }
                ArpState::Incomplete => {
                    entry.pending = Some(packet);
                    entry.timestamp = now;
                    (None, ArpAction::None)
                }
            }
        } else {
            self.evict_if_full();
            self.entries.push(ArpEntry {
                ip,
                mac: EthernetAddress::default(),
                state: ArpState::Incomplete,
                timestamp: now,
                retries: 0,
                pending: Some(packet),
            });
            (None, ArpAction::SendRequest { target: ip })
        }
    }

    fn evict_if_full(&mut self) {
        if self.entries.len() < self.capacity {
            return;
        }
        // LRU eviction by timestamp, per §3's "evicted LRU on overflow".
        if let Some(idx) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.timestamp)
            .map(|(i, _)| i)
        {
            self.entries.remove(idx);
        }
    }

    /// Processes an inbound ARP reply or gratuitous announcement: moves a
    /// matching entry to `Reachable` and flushes its pending packet.
    pub fn handle_reply(&mut self, ip: Ipv4Address, mac: EthernetAddress, now: Instant) -> ArpAction {
        if let Some(entry) = self.find_mut(ip) {
            entry.mac = mac;
            entry.state = ArpState::Reachable;
            entry.timestamp = now;
            entry.retries = 0;
            if let Some(buf) = entry.pending.take() {
                return ArpAction::Deliver(buf, mac);
            }
        } else {
            self.evict_if_full();
            self.entries.push(ArpEntry {
                ip,
                mac,
                state: ArpState::Reachable,
                timestamp: now,
                retries: 0,
                pending: None,
            });
        }
        ArpAction::None
    }

    /// Ticks every entry: `Reachable` entries older than
    /// `reachable_timeout_ms` go `Stale`; `Incomplete` entries retry with
    /// exponential backoff up to `max_retries`, after which the pending
    /// packet is dropped and the entry removed (§4.D).
    pub fn tick(&mut self, now: Instant) -> Vec<(Ipv4Address, ArpAction)> {
        let mut actions = Vec::new();
        let mut remove = Vec::new();
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            match entry.state {
                ArpState::Reachable => {
                    let age = now.saturating_sub(entry.timestamp).as_millis();
                    if age >= u64::from(self.config.reachable_timeout_ms) {
                        entry.state = ArpState::Stale;
                    }
                }
                ArpState::Incomplete => {
                    let backoff = self.config.request_timeout_ms << entry.retries.min(16);
                    let age = now.saturating_sub(entry.timestamp).as_millis();
                    if age >= u64::from(backoff) {
                        if entry.retries >= self.config.max_retries {
                            remove.push(idx);
                            actions.push((entry.ip, ArpAction::DropPending));
                        } else {
                            entry.retries += 1;
                            entry.timestamp = now;
                            actions.push((entry.ip, ArpAction::SendRequest { target: entry.ip }));
                        }
                    }
                }
                ArpState::Stale => {}
            }
        }
        for idx in remove.into_iter().rev() {
            self.entries.remove(idx);
        }
        actions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, ip: Ipv4Address) -> Option<(EthernetAddress, ArpState)> {
        self.entries
            .iter()
            .find(|e| e.ip == ip)
            .map(|e| (e.mac, e.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf() -> PacketBuffer {
        PacketBuffer::allocate(8)
    }

    #[test]
    fn miss_creates_incomplete_and_requests() {
        let mut cache = ArpCache::new(4, ArpConfig::default());
        let (mac, action) = cache.resolve(Ipv4Address([192, 0, 2, 1]), buf(), Instant::ZERO);
        assert!(mac.is_none());
        assert!(matches!(action, ArpAction::SendRequest { .. }));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reply_resolves_and_flushes_pending() {
        let mut cache = ArpCache::new(4, ArpConfig::default());
        let ip = Ipv4Address([192, 0, 2, 1]);
        let (_, _) = cache.resolve(ip, buf(), Instant::ZERO);
        let action = cache.handle_reply(ip, EthernetAddress([1; 6]), Instant::ZERO);
        assert!(matches!(action, ArpAction::Deliver(_, mac) if mac == EthernetAddress([1; 6])));
        let (mac, state) = cache.get(ip).unwrap();
        assert_eq!(mac, EthernetAddress([1; 6]));
        assert_eq!(state, ArpState::Reachable);
    }

    #[test]
    fn newer_pending_replaces_older() {
        let mut cache = ArpCache::new(4, ArpConfig::default());
        let ip = Ipv4Address([192, 0, 2, 1]);
        cache.resolve(ip, buf(), Instant::ZERO);
        cache.resolve(ip, buf(), Instant::ZERO);
        let action = cache.handle_reply(ip, EthernetAddress([2; 6]), Instant::ZERO);
        assert!(matches!(action, ArpAction::Deliver(_, _)));
    }

    #[test]
    fn reachable_entry_goes_stale_after_timeout() {
        let mut config = ArpConfig::default();
        config.reachable_timeout_ms = 1000;
        let mut cache = ArpCache::new(4, config);
        let ip = Ipv4Address([192, 0, 2, 1]);
        cache.handle_reply(ip, EthernetAddress([1; 6]), Instant::ZERO);
        cache.tick(Instant::from_millis(2000));
        let (_, state) = cache.get(ip).unwrap();
        assert_eq!(state, ArpState::Stale);
    }

    #[test]
    fn exhausted_retries_drop_entry_and_pending() {
        let mut config = ArpConfig::default();
        config.max_retries = 2;
        config.request_timeout_ms = 100;
        let mut cache = ArpCache::new(4, config);
        let ip = Ipv4Address([192, 0, 2, 1]);
        cache.resolve(ip, buf(), Instant::ZERO);
        let mut now = Instant::ZERO;
        let mut dropped = false;
        for _ in 0..10 {
            now = now + crate::Duration::from_millis(200);
            let actions = cache.tick(now);
            for (_, action) in actions {
                if matches!(action, ArpAction::DropPending) {
                    dropped = true;
                }
            }
            if dropped {
                break;
            }
        }
        assert!(dropped);
        assert!(cache.is_empty());
    }
}
