//! IP layer (§4.E): IPv4 and IPv6 headers, routing, fragmentation &
//! reassembly, and the upper-layer pseudo-header checksum.

pub mod ipv4;
pub mod ipv6;
pub mod reassembly;
pub mod route;
