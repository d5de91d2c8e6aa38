//! Link layer (§4.D): Ethernet framing with 802.1Q/802.1ad tagging, the
//! ARP cache, and a thin PPP framing shim.

pub mod arp;
pub mod ethernet;
pub mod ppp;

pub use ethernet::{EtherType, EthernetAddress, EthernetHeader, VlanTag};
