//! NDP neighbor cache (RFC 4861 Neighbor Unreachability Detection, §4.F)
//! and Duplicate Address Detection (RFC 4861/4862).

use alloc::vec::Vec;

use crate::buffer::PacketBuffer;
use crate::ipv6::Ipv6Address;
use crate::link::ethernet::EthernetAddress;
use crate::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudState {
    Incomplete,
    Reachable,
    Stale,
    Delay,
    Probe,
}

pub struct NeighborEntry {
    pub ip: Ipv6Address,
    pub mac: EthernetAddress,
    pub state: NudState,
    pub is_router: bool,
    pub timestamp: Instant,
    pub probes_sent: u32,
    pub pending: Option<PacketBuffer>,
}

pub enum NudAction {
    None,
    SendNeighborSolicitation { target: Ipv6Address, unicast: Option<EthernetAddress> },
    Deliver(PacketBuffer, EthernetAddress),
    Unreachable,
}

/// Timing constants from RFC 4861 §10, expressed through the stack's
/// millisecond `Duration` type.
pub struct NudTiming {
    pub reachable_time: Duration,
    pub retrans_timer: Duration,
    pub delay_first_probe_time: Duration,
    pub max_unicast_solicit: u32,
}

impl Default for NudTiming {
    fn default() -> Self {
        NudTiming {
            reachable_time: Duration::from_millis(30_000),
            retrans_timer: Duration::from_millis(1_000),
            delay_first_probe_time: Duration::from_millis(5_000),
            max_unicast_solicit: 3,
        }
    }
}

pub struct NeighborCache {
    entries: Vec<NeighborEntry>,
    capacity: usize,
    timing: NudTiming,
    pub default_routers: Vec<Ipv6Address>,
}

impl NeighborCache {
    pub fn new(capacity: usize, timing: NudTiming) -> Self {
        NeighborCache {
            entries: Vec::with_capacity(capacity),
            capacity,
            timing,
            default_routers: Vec::new(),
        }
    }

    fn evict_if_full(&mut self) {
        if self.entries.len() < self.capacity {
            return;
        }
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

    pub fn get(&self, ip: Ipv6Address) -> Option<(EthernetAddress, NudState)> {
        self.entries.iter().find(|e| e.ip == ip).map(|e| (e.mac, e.state))
    }

    /// Resolves `ip`, queuing `packet` and kicking off Neighbor Solicitation
    /// on a cache miss, exactly mirroring [`crate::link::arp::ArpCache::resolve`]
    /// but with the richer RFC 4861 state set.
    pub fn resolve(&mut self, ip: Ipv6Address, packet: PacketBuffer, now: Instant) -> (Option<EthernetAddress>, NudAction) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.ip == ip) {
            match entry.state {
                NudState::Reachable | NudState::Delay => (Some(entry.mac), NudAction::None),
                NudState::Stale => {
                    entry.state = NudState::Delay;
                    entry.timestamp = now;
                    (Some(entry.mac), NudAction::None)
                }
                NudState::Probe => (Some(entry.mac), NudAction::None),
                NudState::Incomplete => {
                    entry.pending = Some(packet);
                    (None, NudAction::None)
                }
            }
        } else {
            self.evict_if_full();
            self.entries.push(NeighborEntry {
                ip,
                mac: EthernetAddress::default(),
                state: NudState::Incomplete,
                is_router: false,
                timestamp: now,
                probes_sent: 0,
                pending: Some(packet),
            });
            (None, NudAction::SendNeighborSolicitation { target: ip, unicast: None })
        }
    }

    /// Applies a received Neighbor Advertisement/Solicitation to move an
    /// entry towards `Reachable`.
    pub fn handle_advertisement(
        &mut self,
        ip: Ipv6Address,
        mac: EthernetAddress,
        is_router: bool,
        solicited: bool,
        now: Instant,
    ) -> NudAction {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.ip == ip) {
            entry.mac = mac;
            entry.is_router = is_router;
            entry.timestamp = now;
            entry.probes_sent = 0;
            if solicited {
                entry.state = NudState::Reachable;
            } else if entry.state == NudState::Incomplete {
                entry.state = NudState::Stale;
            }
            if let Some(buf) = entry.pending.take() {
                return NudAction::Deliver(buf, mac);
            }
        } else {
            self.evict_if_full();
            self.entries.push(NeighborEntry {
                ip,
                mac,
                state: if solicited { NudState::Reachable } else { NudState::Stale },
                is_router,
                timestamp: now,
                probes_sent: 0,
                pending: None,
            });
        }
        NudAction::None
    }

    /// Advances the NUD state machine: `Reachable` -> `Stale` after
    /// `reachable_time`; `Delay` -> `Probe` after
    /// `delay_first_probe_time`; `Probe`/`Incomplete` retransmit up to
    /// `max_unicast_solicit` times before the entry is declared
    /// unreachable and removed.
    pub fn tick(&mut self, now: Instant) -> Vec<(Ipv6Address, NudAction)> {
        let mut actions = Vec::new();
        let mut remove = Vec::new();
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            let age = now.saturating_sub(entry.timestamp);
            match entry.state {
                NudState::Reachable => {
                    if age >= self.timing.reachable_time {
                        entry.state = NudState::Stale;
                    }
                }
                NudState::Delay => {
                    if age >= self.timing.delay_first_probe_time {
                        entry.state = NudState::Probe;
                        entry.timestamp = now;
                        actions.push((
                            entry.ip,
                            NudAction::SendNeighborSolicitation {
                                target: entry.ip,
                                unicast: Some(entry.mac),
                            },
                        ));
                    }
                }
                NudState::Probe | NudState::Incomplete => {
                    if age >= self.timing.retrans_timer {
                        if entry.probes_sent >= self.timing.max_unicast_solicit {
                            remove.push(idx);
                            actions.push((entry.ip, NudAction::Unreachable));
                        } else {
                            entry.probes_sent += 1;
                            entry.timestamp = now;
                            let unicast = (entry.state == NudState::Probe).then_some(entry.mac);
                            actions.push((
                                entry.ip,
                                NudAction::SendNeighborSolicitation { target: entry.ip, unicast },
                            ));
                        }
                    }
                }
                NudState::Stale => {}
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
}

/// Duplicate Address Detection state for one tentative address (RFC 4862).
pub struct DadProbe {
    pub address: Ipv6Address,
    pub transmits_remaining: u32,
    pub next_transmit: Instant,
    pub duplicate: bool,
}

impl DadProbe {
    pub fn new(address: Ipv6Address, dup_addr_detect_transmits: u32, now: Instant) -> Self {
        DadProbe {
            address,
            transmits_remaining: dup_addr_detect_transmits,
            next_transmit: now,
            duplicate: false,
        }
    }

    /// Called when a Neighbor Solicitation/Advertisement for `address` is
    /// observed from a *different* host while the probe is outstanding.
    pub fn observe_conflict(&mut self, address: Ipv6Address) {
        if address == self.address {
            self.duplicate = true;
        }
    }

    /// Returns `true` once and only once it is time to send the next
    /// solicitation, decrementing the remaining count.
    pub fn tick(&mut self, now: Instant, retrans_timer: Duration) -> bool {
        if self.duplicate || self.transmits_remaining == 0 || now < self.next_transmit {
            return false;
        }
        self.transmits_remaining -= 1;
        self.next_transmit = now + retrans_timer;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.duplicate || self.transmits_remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf() -> PacketBuffer {
        PacketBuffer::allocate(8)
    }

    #[test]
    fn miss_queues_and_solicits() {
        let mut cache = NeighborCache::new(4, NudTiming::default());
        let ip = Ipv6Address([1; 16]);
        let (mac, action) = cache.resolve(ip, buf(), Instant::ZERO);
        assert!(mac.is_none());
        assert!(matches!(action, NudAction::SendNeighborSolicitation { .. }));
    }

    #[test]
    fn solicited_advertisement_flushes_pending() {
        let mut cache = NeighborCache::new(4, NudTiming::default());
        let ip = Ipv6Address([1; 16]);
        cache.resolve(ip, buf(), Instant::ZERO);
        let action = cache.handle_advertisement(ip, EthernetAddress([9; 6]), false, true, Instant::ZERO);
        assert!(matches!(action, NudAction::Deliver(_, _)));
        assert_eq!(cache.get(ip).unwrap().1, NudState::Reachable);
    }

    #[test]
    fn dad_flags_conflict_from_another_host() {
        let mut probe = DadProbe::new(Ipv6Address([2; 16]), 3, Instant::ZERO);
        assert!(!probe.is_complete());
        probe.observe_conflict(Ipv6Address([2; 16]));
        assert!(probe.duplicate);
        assert!(probe.is_complete());
    }

    #[test]
    fn unreachable_after_max_solicitations() {
        let mut timing = NudTiming::default();
        timing.retrans_timer = Duration::from_millis(100);
        timing.max_unicast_solicit = 2;
        let mut cache = NeighborCache::new(4, timing);
        let ip = Ipv6Address([3; 16]);
        cache.resolve(ip, buf(), Instant::ZERO);
        let mut now = Instant::ZERO;
        let mut gave_up = false;
        for _ in 0..10 {
            now = now + Duration::from_millis(150);
            for (_, action) in cache.tick(now) {
                if matches!(action, NudAction::Unreachable) {
                    gave_up = true;
                }
            }
            if gave_up {
                break;
            }
        }
        assert!(gave_up);
        assert_eq!(cache.len(), 0);
    }
}
