//! The socket layer (§4.H): a shared, fixed-size table of sockets keyed by
//! `(type, local, remote)`, a per-socket event-flag model, and the
//! BSD-shaped API (`socket`/`bind`/`connect`/`listen`/`accept`/`send`/
//! `recv`/`close`/`shutdown`/`setsockopt`/`getsockopt`/`socket_poll`) that
//! everything above this crate — including the DHCP/mDNS/NAT responders
//! out of scope here — is built on.

use alloc::vec::Vec;

use crate::config::StackConfig;
use crate::error::{Error, Result};
use crate::iface::InterfaceIndex;
use crate::ipv4::Ipv4Address;
use crate::ipv6::Ipv6Address;
use crate::transport::raw::RawQueue;
use crate::transport::tcp::Tcb;

/// An index into the shared socket table. Stable for the socket's
/// lifetime; reused only after `close` and the slot's next `socket()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAddress {
    Unspecified,
    V4(Ipv4Address),
    V6(Ipv6Address),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpEndpoint {
    pub addr: IpAddress,
    pub port: u16,
}

impl IpEndpoint {
    pub const UNSPECIFIED: IpEndpoint = IpEndpoint {
        addr: IpAddress::Unspecified,
        port: 0,
    };

    pub fn is_specified(&self) -> bool {
        !matches!(self.addr, IpAddress::Unspecified) || self.port != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Unused,
    Stream,
    Datagram,
    RawIp,
    RawEth,
}

bitflags::bitflags! {
    /// Stack-raised readiness flags, ANDed against a socket's user-selected
    /// event mask before `socket_poll` reports it ready (§4.H).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SocketEvents: u8 {
        const READABLE   = 0x01;
        const WRITABLE   = 0x02;
        const ERROR      = 0x04;
        const HUP        = 0x08;
        const ACCEPTABLE = 0x10;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    pub ttl: Option<u8>,
    pub tos: u8,
    pub broadcast_allowed: bool,
}

enum Payload {
    None,
    Stream(Tcb),
    Datagram(RawQueue),
    Raw(RawQueue),
}

/// One entry in the shared socket table (§3 data model). `owner` guards
/// against a stale handle from a since-recycled slot acting on the wrong
/// socket.
pub struct Socket {
    pub kind: SocketType,
    pub local: IpEndpoint,
    pub remote: IpEndpoint,
    pub bound_iface: Option<InterfaceIndex>,
    pub options: SocketOptions,
    pub event_mask: SocketEvents,
    pub event_flags: SocketEvents,
    pub listening: bool,
    owner: u32,
    payload: Payload,
}

impl Socket {
    fn unused() -> Self {
        Socket {
            kind: SocketType::Unused,
            local: IpEndpoint::UNSPECIFIED,
            remote: IpEndpoint::UNSPECIFIED,
            bound_iface: None,
            options: SocketOptions::default(),
            event_mask: SocketEvents::empty(),
            event_flags: SocketEvents::empty(),
            listening: false,
            owner: 0,
            payload: Payload::None,
        }
    }

    pub fn tcb(&self) -> Option<&Tcb> {
        match &self.payload {
            Payload::Stream(tcb) => Some(tcb),
            _ => None,
        }
    }

    pub fn tcb_mut(&mut self) -> Option<&mut Tcb> {
        match &mut self.payload {
            Payload::Stream(tcb) => Some(tcb),
            _ => None,
        }
    }

    pub fn raw_queue_mut(&mut self) -> Option<&mut RawQueue> {
        match &mut self.payload {
            Payload::Datagram(q) | Payload::Raw(q) => Some(q),
            _ => None,
        }
    }
}

/// The shared fixed-size socket table (§4.H, §5: guarded by the one stack
/// mutex along with everything else).
pub struct SocketTable {
    sockets: Vec<Socket>,
    next_owner: u32,
    raw_queue_capacity: usize,
    tcp_config: crate::config::TcpConfig,
}

impl SocketTable {
    pub fn new(config: &StackConfig) -> Self {
        let mut sockets = Vec::with_capacity(config.max_sockets);
        for _ in 0..config.max_sockets {
            sockets.push(Socket::unused());
        }
        SocketTable {
            sockets,
            next_owner: 1,
            raw_queue_capacity: 8,
            tcp_config: config.tcp,
        }
    }

    /// Allocates a socket of `kind` in the first free slot. Corresponds to
    /// the abstract `socket(type)` call in §4.H.
    pub fn socket(&mut self, kind: SocketType) -> Result<SocketHandle> {
        let owner = self.next_owner;
        self.next_owner = self.next_owner.wrapping_add(1).max(1);
        let iss = u32::from(owner).wrapping_mul(2_654_435_761);
        let idx = self
            .sockets
            .iter()
            .position(|s| s.kind == SocketType::Unused)
            .ok_or(Error::OutOfResources)?;

        let payload = match kind {
            SocketType::Stream => Payload::Stream(Tcb::new(self.tcp_config, iss)),
            SocketType::Datagram => Payload::Datagram(RawQueue::new(self.raw_queue_capacity)),
            SocketType::RawIp | SocketType::RawEth => Payload::Raw(RawQueue::new(self.raw_queue_capacity)),
            SocketType::Unused => return Err(Error::InvalidParameter),
        };

        let slot = &mut self.sockets[idx];
        *slot = Socket::unused();
        slot.kind = kind;
        slot.owner = owner;
        slot.payload = payload;
        Ok(SocketHandle(idx))
    }

    fn get_checked(&self, handle: SocketHandle) -> Result<&Socket> {
        self.sockets.get(handle.0).filter(|s| s.kind != SocketType::Unused).ok_or(Error::InvalidParameter)
    }

    fn get_checked_mut(&mut self, handle: SocketHandle) -> Result<&mut Socket> {
        self.sockets
            .get_mut(handle.0)
            .filter(|s| s.kind != SocketType::Unused)
            .ok_or(Error::InvalidParameter)
    }

    pub fn get(&self, handle: SocketHandle) -> Result<&Socket> {
        self.get_checked(handle)
    }

    pub fn get_mut(&mut self, handle: SocketHandle) -> Result<&mut Socket> {
        self.get_checked_mut(handle)
    }

    /// Whether `handle`'s slot is free, i.e. holds no live socket. Unlike
    /// [`SocketTable::get`], this tolerates an out-of-range handle (treated
    /// as free) so callers can check slot liveness across a `reap_closed`
    /// without `get`'s `Unused`-filtering turning that check into an error.
    pub fn is_free(&self, handle: SocketHandle) -> bool {
        self.sockets.get(handle.0).map(|s| s.kind == SocketType::Unused).unwrap_or(true)
    }

    fn tuple_in_use(&self, kind: SocketType, local: IpEndpoint, remote: IpEndpoint, except: SocketHandle) -> bool {
        self.sockets.iter().enumerate().any(|(i, s)| {
            i != except.0 && s.kind == kind && s.local == local && s.remote == remote
        })
    }

    /// Binds the socket's local endpoint. Fails if another socket already
    /// owns `(type, local, remote)` (§3 invariant).
    pub fn bind(&mut self, handle: SocketHandle, local: IpEndpoint, iface: Option<InterfaceIndex>) -> Result<()> {
        let kind = self.get_checked(handle)?.kind;
        let remote = self.get_checked(handle)?.remote;
        if self.tuple_in_use(kind, local, remote, handle) {
            return Err(Error::WrongIdentifier);
        }
        let socket = self.get_checked_mut(handle)?;
        socket.local = local;
        socket.bound_iface = iface;
        Ok(())
    }

    /// Sets the remote endpoint and, for stream sockets, kicks off the
    /// active open.
    pub fn connect(&mut self, handle: SocketHandle, remote: IpEndpoint, now: crate::Instant) -> Result<Vec<crate::transport::tcp::TcpAction>> {
        let kind = self.get_checked(handle)?.kind;
        let local = self.get_checked(handle)?.local;
        if self.tuple_in_use(kind, local, remote, handle) {
            return Err(Error::WrongIdentifier);
        }
        let socket = self.get_checked_mut(handle)?;
        socket.remote = remote;
        match (&mut socket.payload, kind) {
            (Payload::Stream(tcb), SocketType::Stream) => Ok(tcb.open_active(now)),
            _ => Ok(Vec::new()),
        }
    }

    /// Marks a stream socket as listening (remote stays unspecified, per
    /// §3's invariant for listening sockets).
    pub fn listen(&mut self, handle: SocketHandle) -> Result<()> {
        let socket = self.get_checked_mut(handle)?;
        if socket.kind != SocketType::Stream {
            return Err(Error::InvalidParameter);
        }
        socket.listening = true;
        if let Some(tcb) = socket.tcb_mut() {
            tcb.open_passive();
        }
        Ok(())
    }

    /// Queues outbound bytes on a stream socket.
    pub fn send(&mut self, handle: SocketHandle, data: &[u8], now: crate::Instant) -> Result<Vec<crate::transport::tcp::TcpAction>> {
        let socket = self.get_checked_mut(handle)?;
        match socket.tcb_mut() {
            Some(tcb) => Ok(tcb.send(data, now)),
            None => Err(Error::InvalidParameter),
        }
    }

    /// Drains available received bytes from a stream socket's receive
    /// buffer into `out`, returning how many were copied.
    pub fn recv(&mut self, handle: SocketHandle, out: &mut [u8]) -> Result<usize> {
        let socket = self.get_checked_mut(handle)?;
        match socket.tcb_mut() {
            Some(tcb) => {
                let n = out.len().min(tcb.rx_buffer.len());
                for (slot, byte) in out[..n].iter_mut().zip(tcb.rx_buffer.drain(..n)) {
                    *slot = byte;
                }
                if tcb.rx_buffer.is_empty() {
                    socket.event_flags.remove(SocketEvents::READABLE);
                }
                Ok(n)
            }
            None => Err(Error::InvalidParameter),
        }
    }

    /// User-initiated close; for stream sockets this starts the FIN
    /// sequence rather than freeing the slot immediately (the slot frees
    /// once the TCB reaches `Closed`, reaped by [`SocketTable::reap_closed`]).
    pub fn close(&mut self, handle: SocketHandle, now: crate::Instant) -> Result<Vec<crate::transport::tcp::TcpAction>> {
        let socket = self.get_checked_mut(handle)?;
        match &mut socket.payload {
            Payload::Stream(tcb) => Ok(tcb.close(now)),
            _ => {
                *socket = Socket::unused();
                Ok(Vec::new())
            }
        }
    }

    /// Frees any stream socket slot whose TCB has reached `Closed`.
    pub fn reap_closed(&mut self) {
        for socket in self.sockets.iter_mut() {
            let should_free = matches!(
                &socket.payload,
                Payload::Stream(tcb) if tcb.state == crate::transport::tcp::State::Closed
            );
            if should_free {
                *socket = Socket::unused();
            }
        }
    }

    pub fn setsockopt(&mut self, handle: SocketHandle, options: SocketOptions) -> Result<()> {
        self.get_checked_mut(handle)?.options = options;
        Ok(())
    }

    pub fn getsockopt(&self, handle: SocketHandle) -> Result<SocketOptions> {
        Ok(self.get_checked(handle)?.options)
    }

    /// The `select`-equivalent: returns the subset of `handles` whose
    /// raised event flags intersect their user-selected event mask.
    pub fn socket_poll(&self, handles: &[SocketHandle]) -> Vec<SocketHandle> {
        handles
            .iter()
            .copied()
            .filter(|&h| {
                self.get_checked(h)
                    .map(|s| !(s.event_flags & s.event_mask).is_empty())
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Socket> {
        self.sockets.iter_mut().filter(|s| s.kind != SocketType::Unused)
    }

    /// Finds the stream socket matching an inbound segment's addressing:
    /// an established/connecting socket bound to the exact 4-tuple, or
    /// failing that a listener bound to `local` with an unspecified
    /// remote (§4.H demux order).
    pub fn find_stream(&self, local: IpEndpoint, remote: IpEndpoint) -> Option<SocketHandle> {
        self.sockets
            .iter()
            .position(|s| s.kind == SocketType::Stream && s.local == local && s.remote == remote)
            .or_else(|| {
                self.sockets.iter().position(|s| {
                    s.kind == SocketType::Stream && s.listening && s.local == local && s.remote == IpEndpoint::UNSPECIFIED
                })
            })
            .map(SocketHandle)
    }

    /// Finds the datagram socket bound to `local`, used for inbound UDP
    /// demux.
    pub fn find_datagram(&self, local: IpEndpoint) -> Option<SocketHandle> {
        self.sockets
            .iter()
            .position(|s| s.kind == SocketType::Datagram && s.local == local)
            .map(SocketHandle)
    }

    /// Runs `Tcb::tick` for every stream socket, returning each one's
    /// addressing and resulting actions for the caller to apply. Taken as
    /// a batch so the caller isn't forced to hold this table borrowed
    /// while it also needs `&mut Stack` to transmit (§4.H/§4.I TCP tick
    /// slot).
    pub fn tick_streams(&mut self, now: crate::Instant) -> Vec<(SocketHandle, IpEndpoint, IpEndpoint, Vec<crate::transport::tcp::TcpAction>)> {
        let mut due = Vec::new();
        for (idx, socket) in self.sockets.iter_mut().enumerate() {
            if let Some(tcb) = socket.tcb_mut() {
                let actions = tcb.tick(now);
                if !actions.is_empty() {
                    due.push((SocketHandle(idx), socket.local, socket.remote, actions));
                }
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StackConfig {
        StackConfig::default()
    }

    #[test]
    fn rebinding_same_tuple_is_rejected() {
        let mut table = SocketTable::new(&config());
        let a = table.socket(SocketType::Stream).unwrap();
        let b = table.socket(SocketType::Stream).unwrap();
        let local = IpEndpoint {
            addr: IpAddress::V4(Ipv4Address([10, 0, 0, 1])),
            port: 80,
        };
        table.bind(a, local, None).unwrap();
        assert!(table.bind(b, local, None).is_err());
    }

    #[test]
    fn poll_reports_only_ready_and_selected_events() {
        let mut table = SocketTable::new(&config());
        let h = table.socket(SocketType::Datagram).unwrap();
        {
            let s = table.get_mut(h).unwrap();
            s.event_mask = SocketEvents::READABLE;
            s.event_flags = SocketEvents::WRITABLE;
        }
        assert!(table.socket_poll(&[h]).is_empty());
        table.get_mut(h).unwrap().event_flags |= SocketEvents::READABLE;
        assert_eq!(table.socket_poll(&[h]), alloc::vec![h]);
    }

    #[test]
    fn closing_stream_socket_frees_slot_once_tcb_closes() {
        let mut table = SocketTable::new(&config());
        let h = table.socket(SocketType::Stream).unwrap();
        table.get_mut(h).unwrap().tcb_mut().unwrap().state = crate::transport::tcp::State::Established;
        table.close(h, crate::Instant::ZERO).unwrap();
        table.get_mut(h).unwrap().tcb_mut().unwrap().state = crate::transport::tcp::State::Closed;
        table.reap_closed();
        assert!(table.is_free(h));
    }
}
