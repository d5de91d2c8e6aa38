//! Interface registry (§4.B): up to `interface_count` logical interfaces,
//! each with a parent pointer for VLAN/port tagging, link state, addressing
//! contexts, and a driver binding.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::StackConfig;
use crate::driver::{DriverBinding, MacFilterEntry};
use crate::error::{Error, Result};
#[cfg(feature = "ipv4")]
use crate::ip::ipv4::Ipv4Context;
#[cfg(feature = "ipv6")]
use crate::ip::ipv6::Ipv6Context;
#[cfg(feature = "ipv4")]
use crate::link::arp::ArpCache;
use crate::link::ethernet::EthernetAddress;
#[cfg(feature = "igmp")]
use crate::neighbor::igmp::{IgmpState, IgmpVersion};
#[cfg(feature = "mld")]
use crate::neighbor::mld::{MldState, ReportVersion};
#[cfg(feature = "ipv6")]
use crate::neighbor::ndp::{NeighborCache, NudTiming};
use crate::rand::Prng;
use crate::Instant;

/// Reserved VLAN identifier that both `set_vlan_id` and `set_vman_id` must
/// reject (§4.B, §8 boundary behaviour).
pub const RESERVED_VID: u16 = 0xFFF;

/// A stable, zero-based reference to an [`Interface`] (§9: "pointer graphs
/// -> arenas + indices").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceIndex(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Emitted by [`InterfaceRegistry::set_link_state`] only when the state
/// actually flips, carrying the minimal information the rest of the stack
/// (DNS cache, responders, link-change callbacks, socket event table — all
/// outside this module) needs to react, per `processLinkChange` in §4.B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkChangeEvent {
    pub iface: InterfaceIndex,
    pub up: bool,
}

/// One logical network interface (§3 data model).
pub struct Interface {
    pub index: InterfaceIndex,
    pub id: u32,
    name: String,
    hostname: String,
    mac: EthernetAddress,
    eui64: [u8; 8],
    pub link_state: LinkState,
    pub link_speed_mbps: u32,
    pub duplex: Duplex,
    pub configured: bool,
    pub parent: Option<InterfaceIndex>,
    pub vlan_id: Option<u16>,
    pub vman_id: Option<u16>,
    pub driver: Option<DriverBinding>,
    mac_filter: Vec<MacFilterEntry>,
    /// if-MIB `ifLastChange`, in centiseconds since stack start (§4.B).
    pub last_change_centiseconds: u32,
    #[cfg(feature = "ipv4")]
    pub arp: ArpCache,
    #[cfg(feature = "ipv4")]
    pub ipv4: Ipv4Context,
    #[cfg(feature = "ipv6")]
    pub ipv6: Ipv6Context,
    #[cfg(feature = "ipv6")]
    pub ndp: NeighborCache,
    #[cfg(feature = "mld")]
    pub mld: MldState,
    #[cfg(feature = "igmp")]
    pub igmp: IgmpState,
}

impl Interface {
    fn new(index: InterfaceIndex, config: &StackConfig) -> Self {
        Interface {
            index,
            id: index.0 as u32,
            name: String::new(),
            hostname: String::new(),
            mac: EthernetAddress::default(),
            eui64: [0u8; 8],
            link_state: LinkState::Down,
            link_speed_mbps: 0,
            duplex: Duplex::Full,
            configured: false,
            parent: None,
            vlan_id: None,
            vman_id: None,
            driver: None,
            mac_filter: Vec::new(),
            last_change_centiseconds: 0,
            #[cfg(feature = "ipv4")]
            arp: ArpCache::new(config.arp_cache_size, config.arp),
            #[cfg(feature = "ipv4")]
            ipv4: Ipv4Context::new(config.reassembly_slots, &config.ip),
            #[cfg(feature = "ipv6")]
            ipv6: Ipv6Context::new(config.reassembly_slots, &config.ip),
            #[cfg(feature = "ipv6")]
            ndp: NeighborCache::new(config.ndp_cache_size, NudTiming::default()),
            #[cfg(feature = "mld")]
            mld: MldState::new(ReportVersion::V2),
            #[cfg(feature = "igmp")]
            igmp: IgmpState::new(IgmpVersion::V3),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn mac(&self) -> EthernetAddress {
        self.mac
    }

    pub fn eui64(&self) -> [u8; 8] {
        self.eui64
    }

    /// Joins `mac` in the filter table, incrementing its ref count (or
    /// inserting a fresh entry at refcount 1); returns the entries that
    /// must now be programmed into hardware.
    fn filter_join(&mut self, mac: [u8; 6]) {
        if let Some(entry) = self.mac_filter.iter_mut().find(|e| e.mac == mac) {
            entry.ref_count += 1;
        } else {
            self.mac_filter.push(MacFilterEntry { mac, ref_count: 1 });
        }
    }

    fn filter_leave(&mut self, mac: [u8; 6]) {
        if let Some(idx) = self.mac_filter.iter().position(|e| e.mac == mac) {
            self.mac_filter[idx].ref_count -= 1;
            if self.mac_filter[idx].ref_count == 0 {
                self.mac_filter.remove(idx);
            }
        }
    }

    fn sync_mac_filter(&mut self) -> Result<()> {
        if let Some(driver) = &mut self.driver {
            driver.device.update_mac_addr_filter(&self.mac_filter)?;
        }
        Ok(())
    }

    /// Whether a received frame addressed to `dst` should be accepted,
    /// per this interface's own MAC, refcounted filter table, and
    /// promiscuous setting (§4.D delegated to `ethernet::accept_destination`).
    pub fn accepts_destination(&self, dst: EthernetAddress, promiscuous: bool) -> bool {
        let filter: Vec<EthernetAddress> = self.mac_filter.iter().map(|e| EthernetAddress(e.mac)).collect();
        crate::link::ethernet::accept_destination(dst, self.mac, &filter, false, promiscuous)
    }
}

/// The registry of all logical interfaces plus the one PRNG shared across
/// them (§4.A: "reinitialised on each `config-interface`").
pub struct InterfaceRegistry {
    interfaces: Vec<Interface>,
    max_if_name_len: usize,
    max_hostname_len: usize,
    rand: Prng,
}

impl InterfaceRegistry {
    pub fn new(config: &StackConfig) -> Self {
        let interfaces = (0..config.interface_count)
            .map(|i| Interface::new(InterfaceIndex(i), config))
            .collect();
        InterfaceRegistry {
            interfaces,
            max_if_name_len: config.max_if_name_len,
            max_hostname_len: config.max_hostname_len,
            rand: Prng::seeded(&[0u8; 16], [0u8; 8]),
        }
    }

    pub fn get_default(&self) -> InterfaceIndex {
        InterfaceIndex(0)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn get(&self, idx: InterfaceIndex) -> Option<&Interface> {
        self.interfaces.get(idx.0)
    }

    pub fn get_mut(&mut self, idx: InterfaceIndex) -> Option<&mut Interface> {
        self.interfaces.get_mut(idx.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Interface> {
        self.interfaces.iter_mut()
    }

    fn check_index(&self, idx: InterfaceIndex) -> Result<()> {
        if idx.0 >= self.interfaces.len() {
            Err(Error::InvalidInterface)
        } else {
            Ok(())
        }
    }

    pub fn set_mac(&mut self, idx: InterfaceIndex, mac: EthernetAddress) -> Result<()> {
        self.check_index(idx)?;
        self.interfaces[idx.0].mac = mac;
        Ok(())
    }

    /// Returns `idx`'s MAC, following the parent chain while the current
    /// interface has none set. Capped at `N_INTERFACES` hops as a defensive
    /// bound against a malformed parent graph (§9 open question).
    pub fn get_mac(&self, idx: InterfaceIndex) -> Option<EthernetAddress> {
        let mut current = idx;
        let default_mac = EthernetAddress::default();
        for _ in 0..self.interfaces.len() {
            let iface = self.interfaces.get(current.0)?;
            if iface.mac != default_mac {
                return Some(iface.mac);
            }
            match iface.parent {
                Some(parent) => current = parent,
                None => return Some(iface.mac),
            }
        }
        None
    }

    pub fn set_eui64(&mut self, idx: InterfaceIndex, eui64: [u8; 8]) -> Result<()> {
        self.check_index(idx)?;
        self.interfaces[idx.0].eui64 = eui64;
        Ok(())
    }

    pub fn get_eui64(&self, idx: InterfaceIndex) -> Result<[u8; 8]> {
        self.check_index(idx)?;
        Ok(self.interfaces[idx.0].eui64)
    }

    pub fn set_name(&mut self, idx: InterfaceIndex, name: &str) -> Result<()> {
        self.check_index(idx)?;
        if name.len() > self.max_if_name_len {
            return Err(Error::InvalidParameter);
        }
        self.interfaces[idx.0].name = String::from(name);
        Ok(())
    }

    pub fn set_hostname(&mut self, idx: InterfaceIndex, hostname: &str) -> Result<()> {
        self.check_index(idx)?;
        if hostname.len() > self.max_hostname_len {
            return Err(Error::InvalidParameter);
        }
        self.interfaces[idx.0].hostname = String::from(hostname);
        Ok(())
    }

    /// Rejects the reserved VID (§8 boundary behaviour).
    pub fn set_vlan_id(&mut self, idx: InterfaceIndex, vid: u16) -> Result<()> {
        self.check_index(idx)?;
        if vid == RESERVED_VID {
            return Err(Error::InvalidParameter);
        }
        self.interfaces[idx.0].vlan_id = Some(vid);
        Ok(())
    }

    pub fn set_vman_id(&mut self, idx: InterfaceIndex, vid: u16) -> Result<()> {
        self.check_index(idx)?;
        if vid == RESERVED_VID {
            return Err(Error::InvalidParameter);
        }
        self.interfaces[idx.0].vman_id = Some(vid);
        Ok(())
    }

    pub fn set_parent(&mut self, idx: InterfaceIndex, parent: Option<InterfaceIndex>) -> Result<()> {
        self.check_index(idx)?;
        if let Some(p) = parent {
            self.check_index(p)?;
        }
        self.interfaces[idx.0].parent = parent;
        Ok(())
    }

    pub fn join_multicast_mac(&mut self, idx: InterfaceIndex, mac: [u8; 6]) -> Result<()> {
        self.check_index(idx)?;
        self.interfaces[idx.0].filter_join(mac);
        self.interfaces[idx.0].sync_mac_filter()
    }

    pub fn leave_multicast_mac(&mut self, idx: InterfaceIndex, mac: [u8; 6]) -> Result<()> {
        self.check_index(idx)?;
        self.interfaces[idx.0].filter_leave(mac);
        self.interfaces[idx.0].sync_mac_filter()
    }

    /// Sets `idx`'s link state. If it actually changed, updates
    /// `ifLastChange` and returns an event for the caller (the scheduler,
    /// per §4.B / §4.I) to fan out to IPv4/IPv6 re-binding, DNS cache
    /// flush, responder restarts, link-change callbacks and the socket
    /// event table — all of which live outside this module.
    pub fn set_link_state(&mut self, idx: InterfaceIndex, up: bool, now: Instant) -> Result<Option<LinkChangeEvent>> {
        self.check_index(idx)?;
        let iface = &mut self.interfaces[idx.0];
        let new_state = if up { LinkState::Up } else { LinkState::Down };
        if iface.link_state == new_state {
            return Ok(None);
        }
        iface.link_state = new_state;
        iface.last_change_centiseconds = (now.total_millis() / 10) as u32;
        Ok(Some(LinkChangeEvent { iface: idx, up }))
    }

    /// Marks `idx` configured and reseeds the shared PRNG from its EUI-64,
    /// mirroring the upstream `configInterface` call (§3, §9 open
    /// question: this does reduce statistical quality when many
    /// interfaces configure back-to-back, preserved deliberately — see
    /// DESIGN.md).
    pub fn configure_interface(&mut self, idx: InterfaceIndex) -> Result<()> {
        self.check_index(idx)?;
        let eui64 = self.interfaces[idx.0].eui64;
        self.rand.reseed(eui64);
        self.interfaces[idx.0].configured = true;
        Ok(())
    }

    /// Clears `configured`, forces link down, and leaves the interface
    /// otherwise untouched; callers (scheduler) must also mask IRQs and
    /// dequiesce any running sub-protocol ticks for it (§4.I cancellation).
    pub fn stop_interface(&mut self, idx: InterfaceIndex) -> Result<()> {
        self.check_index(idx)?;
        let iface = &mut self.interfaces[idx.0];
        iface.configured = false;
        iface.link_state = LinkState::Down;
        Ok(())
    }

    pub fn seed_rand(&mut self, seed: &[u8]) {
        self.rand = Prng::seeded(seed, [0u8; 8]);
    }

    pub fn rand(&mut self) -> &mut Prng {
        &mut self.rand
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> InterfaceRegistry {
        InterfaceRegistry::new(&StackConfig::default())
    }

    #[test]
    fn default_interface_is_index_zero() {
        let reg = registry();
        assert_eq!(reg.get_default(), InterfaceIndex(0));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn vlan_id_rejects_reserved_value() {
        let mut reg = registry();
        assert!(reg.set_vlan_id(InterfaceIndex(0), RESERVED_VID).is_err());
        assert!(reg.set_vman_id(InterfaceIndex(0), RESERVED_VID).is_err());
        assert!(reg.set_vlan_id(InterfaceIndex(0), 42).is_ok());
    }

    #[test]
    fn mac_lookup_follows_parent_chain() {
        let mut reg = registry();
        reg.set_mac(InterfaceIndex(0), EthernetAddress([1, 2, 3, 4, 5, 6])).unwrap();
        reg.set_parent(InterfaceIndex(1), Some(InterfaceIndex(0))).unwrap();
        assert_eq!(reg.get_mac(InterfaceIndex(1)), Some(EthernetAddress([1, 2, 3, 4, 5, 6])));
    }

    #[test]
    fn link_state_change_reported_once() {
        let mut reg = registry();
        let idx = InterfaceIndex(0);
        let first = reg.set_link_state(idx, true, Instant::ZERO).unwrap();
        assert!(matches!(first, Some(LinkChangeEvent { up: true, .. })));
        let second = reg.set_link_state(idx, true, Instant::ZERO).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn stopping_interface_clears_configured_and_link() {
        let mut reg = registry();
        let idx = InterfaceIndex(0);
        reg.configure_interface(idx).unwrap();
        reg.set_link_state(idx, true, Instant::ZERO).unwrap();
        reg.stop_interface(idx).unwrap();
        assert!(!reg.get(idx).unwrap().configured);
        assert_eq!(reg.get(idx).unwrap().link_state, LinkState::Down);
    }

    #[test]
    fn multicast_filter_refcounts_until_last_leave() {
        let mut reg = registry();
        let idx = InterfaceIndex(0);
        reg.join_multicast_mac(idx, [0x33, 0x33, 0, 0, 0, 1]).unwrap();
        reg.join_multicast_mac(idx, [0x33, 0x33, 0, 0, 0, 1]).unwrap();
        assert_eq!(reg.get(idx).unwrap().mac_filter.len(), 1);
        reg.leave_multicast_mac(idx, [0x33, 0x33, 0, 0, 0, 1]).unwrap();
        assert_eq!(reg.get(idx).unwrap().mac_filter.len(), 1);
        reg.leave_multicast_mac(idx, [0x33, 0x33, 0, 0, 0, 1]).unwrap();
        assert!(reg.get(idx).unwrap().mac_filter.is_empty());
    }
}
