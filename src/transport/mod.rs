//! Transport layer (§4.G): UDP datagrams, the TCP state machine, and raw
//! sockets.

pub mod raw;
pub mod tcp;
pub mod udp;
