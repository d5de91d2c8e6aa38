//! Neighbor discovery and multicast group management (§4.F): the NDP
//! neighbor cache with RFC 4861 NUD and duplicate-address detection, MLD
//! for IPv6 and IGMP for IPv4.

pub mod igmp;
pub mod mld;
pub mod ndp;
