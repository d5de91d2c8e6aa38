//! Upward dispatch (§4.C) and the downward glue that drives it: the single
//! entry point a driver-polling caller feeds received frames into, routing
//! each one through link framing, ARP/NDP resolution, IP reassembly and
//! transport demux all the way to socket state, plus [`Stack::run_once`],
//! which drains driver queues and fires the scheduler's tick slots.
//!
//! ICMP/ICMPv6/IGMP/MLD/NDP wire reception is out of scope here: this
//! crate's neighbor/multicast state machines (`neighbor::*`) only expose
//! tick-driven and directly-invoked transitions, never a wire codec, so
//! there is nothing for dispatch to parse those protocols into. Their tick
//! slots still fire in the fixed order; an inbound datagram carrying one
//! of those protocols is handed to a raw socket like any other
//! undemuxed payload, same as an IPv4 protocol this crate doesn't parse.

use alloc::vec::Vec;

use crate::buffer::PacketBuffer;
use crate::driver::DeviceKind;
use crate::iface::InterfaceIndex;
use crate::link::arp::{self, ArpAction};
use crate::link::ethernet::{self, EtherType, EthernetAddress};
#[cfg(feature = "ipv4")]
use crate::link::arp::ArpState;
#[cfg(feature = "ipv4")]
use crate::ip::ipv4::{self, Ipv4Address};
#[cfg(feature = "ipv6")]
use crate::ip::ipv6::{self, Ipv6Address};
use crate::sched::TickSlot;
use crate::socket::{IpAddress, IpEndpoint, SocketEvents, SocketHandle, SocketType};
use crate::transport::tcp::{segment as tcp_segment, Flags as TcpFlags, TcpAction};
use crate::transport::udp;
use crate::{Duration, Instant, Stack};

const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

impl Stack {
    /// Drains every driver's receive queue into [`Stack::process_packet`],
    /// then fires whatever scheduler slots are due. The one function an
    /// embedder's network task calls once per iteration (§4.I).
    pub fn run_once(&mut self, now: Instant) {
        self.poll_drivers(now);
        let fired = self.scheduler.tick();
        for slot in fired {
            self.run_tick_slot(slot, now);
        }
        self.scheduler.run_due_timers(now);
    }

    fn poll_drivers(&mut self, now: Instant) {
        for i in 0..self.ifaces.len() {
            let idx = InterfaceIndex(i);
            let mut received = Vec::new();
            if let Some(iface) = self.ifaces.get_mut(idx) {
                if let Some(driver) = &mut iface.driver {
                    driver.device.receive_packets(&mut |buf| received.push(buf));
                }
            }
            for buf in received {
                self.process_packet(idx, &buf.linearize(), now);
            }
        }
    }

    fn run_tick_slot(&mut self, slot: TickSlot, now: Instant) {
        match slot {
            TickSlot::Nic => {
                for iface in self.ifaces.iter_mut() {
                    if let Some(driver) = &mut iface.driver {
                        driver.device.tick();
                    }
                }
            }
            #[cfg(feature = "ipv4")]
            TickSlot::Arp => self.tick_arp(now),
            #[cfg(feature = "ipv4")]
            TickSlot::Ipv4Fragments => {
                for iface in self.ifaces.iter_mut() {
                    iface.ipv4.expire_reassembly(now);
                }
            }
            #[cfg(feature = "ipv6")]
            TickSlot::Ipv6Fragments => {
                for iface in self.ifaces.iter_mut() {
                    iface.ipv6.expire_reassembly(now);
                }
            }
            TickSlot::Tcp => self.tick_tcp(now),
            _ => {}
        }
    }

    #[cfg(feature = "ipv4")]
    fn tick_arp(&mut self, now: Instant) {
        for i in 0..self.ifaces.len() {
            let idx = InterfaceIndex(i);
            let actions = match self.ifaces.get_mut(idx) {
                Some(iface) => iface.arp.tick(now),
                None => continue,
            };
            for (_, action) in actions {
                self.apply_arp_action(idx, action, now);
            }
        }
    }

    /// Runs every stream socket's `Tcb::tick`, applies the resulting
    /// actions, then reaps any socket whose TCB just reached `Closed`
    /// (§4.H: lazy reaping belongs on the TCP tick slot, not on `close`).
    fn tick_tcp(&mut self, now: Instant) {
        let due = self.sockets.tick_streams(now);
        for (handle, local, remote, actions) in due {
            let iface_idx = self
                .sockets
                .get(handle)
                .ok()
                .and_then(|s| s.bound_iface)
                .unwrap_or_else(|| self.ifaces.get_default());
            self.apply_tcp_actions(iface_idx, handle, local, remote, actions, now);
        }
        self.sockets.reap_closed();
    }

    /// The upward dispatch entry point (§4.C): routes one received frame,
    /// handed up from `iface`'s driver, by that interface's link-layer
    /// kind.
    pub fn process_packet(&mut self, iface: InterfaceIndex, frame: &[u8], now: Instant) {
        let kind = match self.ifaces.get(iface).and_then(|i| i.driver.as_ref()) {
            Some(driver) => driver.kind,
            None => return,
        };
        match kind {
            DeviceKind::Ethernet | DeviceKind::Loopback => self.process_ethernet_frame(iface, frame, now),
            DeviceKind::Ppp => self.process_ppp_frame(iface, frame, now),
            DeviceKind::SixLowPan => {}
        }
    }

    fn process_ethernet_frame(&mut self, iface_idx: InterfaceIndex, frame: &[u8], now: Instant) {
        let hdr = match ethernet::parse(frame) {
            Ok(hdr) => hdr,
            Err(e) => {
                log::trace!("dropping malformed ethernet frame: {}", e);
                return;
            }
        };
        let accepted = match self.ifaces.get(iface_idx) {
            Some(i) => i.accepts_destination(hdr.dst, false),
            None => return,
        };
        if !accepted {
            return;
        }
        self.deliver_raw_eth(frame);
        let payload = &frame[hdr.wire_len..];
        match hdr.ethertype {
            #[cfg(feature = "ipv4")]
            EtherType::Arp => self.process_arp(iface_idx, payload, now),
            #[cfg(feature = "ipv4")]
            EtherType::Ipv4 => self.process_ipv4_datagram(iface_idx, payload, now),
            #[cfg(feature = "ipv6")]
            EtherType::Ipv6 => self.process_ipv6_datagram(iface_idx, payload, now),
            _ => {}
        }
    }

    fn process_ppp_frame(&mut self, iface_idx: InterfaceIndex, frame: &[u8], now: Instant) {
        let (protocol, payload) = match crate::link::ppp::decode(frame) {
            Ok(v) => v,
            Err(e) => {
                log::trace!("dropping malformed ppp frame: {}", e);
                return;
            }
        };
        match protocol {
            #[cfg(feature = "ipv4")]
            crate::link::ppp::PROTO_IPV4 => self.process_ipv4_datagram(iface_idx, &payload, now),
            #[cfg(feature = "ipv6")]
            crate::link::ppp::PROTO_IPV6 => self.process_ipv6_datagram(iface_idx, &payload, now),
            _ => {}
        }
    }

    /// Delivers a whole received frame to every raw-Ethernet socket,
    /// undemuxed (§4.G: raw sockets perform no protocol interpretation).
    fn deliver_raw_eth(&mut self, frame: &[u8]) {
        for socket in self.sockets.iter_mut() {
            if socket.kind == SocketType::RawEth {
                if let Some(queue) = socket.raw_queue_mut() {
                    queue.push(PacketBuffer::from_received(frame.to_vec()));
                }
                socket.event_flags.insert(SocketEvents::READABLE);
            }
        }
    }

    #[cfg(feature = "ipv4")]
    fn process_arp(&mut self, iface_idx: InterfaceIndex, payload: &[u8], now: Instant) {
        let pkt = match arp::parse(payload) {
            Ok(p) => p,
            Err(e) => {
                log::trace!("dropping malformed arp packet: {}", e);
                return;
            }
        };
        // Any arriving request or reply teaches the cache the sender's
        // mapping, matching gratuitous-ARP handling (§4.D).
        if pkt.sender_ip != Ipv4Address::UNSPECIFIED {
            if let Some(iface) = self.ifaces.get_mut(iface_idx) {
                let action = iface.arp.handle_reply(pkt.sender_ip, pkt.sender_mac, now);
                self.apply_arp_action(iface_idx, action, now);
            }
        }
        if pkt.operation == arp::OP_REQUEST {
            let (our_mac, our_ip) = match self.ifaces.get(iface_idx) {
                Some(i) => (i.mac(), i.ipv4.address),
                None => return,
            };
            if our_ip != Ipv4Address::UNSPECIFIED && pkt.target_ip == our_ip {
                self.send_arp_reply(iface_idx, our_mac, our_ip, pkt.sender_mac, pkt.sender_ip);
            }
        }
    }

    #[cfg(feature = "ipv4")]
    fn apply_arp_action(&mut self, iface_idx: InterfaceIndex, action: ArpAction, _now: Instant) {
        match action {
            ArpAction::None | ArpAction::DropPending => {}
            ArpAction::SendRequest { target } => self.send_arp_request(iface_idx, target),
            ArpAction::SendProbe { target, mac } => self.send_arp_probe(iface_idx, target, mac),
            ArpAction::Deliver(buf, mac) => self.send_ethernet(iface_idx, mac, EtherType::Ipv4, buf),
        }
    }

    #[cfg(feature = "ipv4")]
    fn send_arp_request(&mut self, iface_idx: InterfaceIndex, target: Ipv4Address) {
        let (our_mac, our_ip) = match self.ifaces.get(iface_idx) {
            Some(i) => (i.mac(), i.ipv4.address),
            None => return,
        };
        let pkt = arp::ArpPacket {
            operation: arp::OP_REQUEST,
            sender_mac: our_mac,
            sender_ip: our_ip,
            target_mac: EthernetAddress::default(),
            target_ip: target,
        };
        let mut buf = PacketBuffer::allocate(arp::WIRE_LEN);
        if let Some(slice) = buf.as_mut_slice() {
            if arp::encode(slice, &pkt).is_err() {
                return;
            }
        }
        self.send_ethernet(iface_idx, EthernetAddress::BROADCAST, EtherType::Arp, buf);
    }

    /// A probe is wire-identical to a request; it only differs in being
    /// addressed unicast at the entry's last-known MAC (§4.D).
    #[cfg(feature = "ipv4")]
    fn send_arp_probe(&mut self, iface_idx: InterfaceIndex, target: Ipv4Address, mac: EthernetAddress) {
        let (our_mac, our_ip) = match self.ifaces.get(iface_idx) {
            Some(i) => (i.mac(), i.ipv4.address),
            None => return,
        };
        let pkt = arp::ArpPacket {
            operation: arp::OP_REQUEST,
            sender_mac: our_mac,
            sender_ip: our_ip,
            target_mac: mac,
            target_ip: target,
        };
        let mut buf = PacketBuffer::allocate(arp::WIRE_LEN);
        if let Some(slice) = buf.as_mut_slice() {
            if arp::encode(slice, &pkt).is_err() {
                return;
            }
        }
        self.send_ethernet(iface_idx, mac, EtherType::Arp, buf);
    }

    #[cfg(feature = "ipv4")]
    fn send_arp_reply(
        &mut self,
        iface_idx: InterfaceIndex,
        our_mac: EthernetAddress,
        our_ip: Ipv4Address,
        target_mac: EthernetAddress,
        target_ip: Ipv4Address,
    ) {
        let pkt = arp::ArpPacket {
            operation: arp::OP_REPLY,
            sender_mac: our_mac,
            sender_ip: our_ip,
            target_mac,
            target_ip,
        };
        let mut buf = PacketBuffer::allocate(arp::WIRE_LEN);
        if let Some(slice) = buf.as_mut_slice() {
            if arp::encode(slice, &pkt).is_err() {
                return;
            }
        }
        self.send_ethernet(iface_idx, target_mac, EtherType::Arp, buf);
    }

    /// Prepends an Ethernet header and hands the frame to `iface`'s
    /// driver. `buf`'s payload must already be everything above the
    /// Ethernet layer.
    fn send_ethernet(&mut self, iface_idx: InterfaceIndex, dst: EthernetAddress, ethertype: EtherType, mut buf: PacketBuffer) {
        let our_mac = match self.ifaces.get_mac(iface_idx) {
            Some(m) => m,
            None => return,
        };
        let needed = ethernet::encoded_len(false, false);
        let hdr = match buf.push_header(needed) {
            Ok(h) => h,
            Err(_) => return,
        };
        if ethernet::encode(hdr, dst, our_mac, None, None, ethertype).is_err() {
            return;
        }
        if let Some(iface) = self.ifaces.get_mut(iface_idx) {
            if let Some(driver) = &mut iface.driver {
                let _ = driver.send(&buf, Duration::from_millis(0));
            }
        }
    }

    #[cfg(feature = "ipv4")]
    fn process_ipv4_datagram(&mut self, iface_idx: InterfaceIndex, data: &[u8], now: Instant) {
        let (header, payload_offset) = match ipv4::parse(data) {
            Ok(v) => v,
            Err(e) => {
                log::trace!("dropping malformed ipv4 datagram: {}", e);
                return;
            }
        };
        let our_ip = match self.ifaces.get(iface_idx) {
            Some(i) => i.ipv4.address,
            None => return,
        };
        if our_ip != Ipv4Address::UNSPECIFIED
            && header.dst != our_ip
            && !header.dst.is_broadcast()
            && !header.dst.is_multicast()
        {
            return;
        }
        let end = usize::from(header.total_len).min(data.len());
        if end < payload_offset {
            return;
        }
        let fragment_payload = &data[payload_offset..end];

        let reassembled;
        let upper_payload: &[u8] = if header.more_fragments || header.fragment_offset != 0 {
            let iface = match self.ifaces.get_mut(iface_idx) {
                Some(i) => i,
                None => return,
            };
            match iface.ipv4.reassemble(&header, fragment_payload, now) {
                Some(p) => {
                    reassembled = p;
                    &reassembled
                }
                None => return,
            }
        } else {
            fragment_payload
        };

        self.process_transport(
            iface_idx,
            IpAddress::V4(header.src),
            IpAddress::V4(header.dst),
            header.protocol,
            upper_payload,
            now,
        );
    }

    #[cfg(feature = "ipv6")]
    fn process_ipv6_datagram(&mut self, iface_idx: InterfaceIndex, data: &[u8], now: Instant) {
        let parsed = match ipv6::parse(data) {
            Ok(p) => p,
            Err(e) => {
                log::trace!("dropping malformed ipv6 datagram: {}", e);
                return;
            }
        };
        let ours = match self.ifaces.get(iface_idx) {
            Some(i) => {
                parsed.header.dst.is_multicast()
                    || i.ipv6.link_local == Some(parsed.header.dst)
                    || i.ipv6.global.contains(&parsed.header.dst)
            }
            None => return,
        };
        if !ours {
            return;
        }
        let total_end = ipv6::FIXED_HEADER_LEN + usize::from(parsed.header.payload_len);
        if total_end > data.len() || parsed.payload_offset > total_end {
            return;
        }
        let upper_data = &data[parsed.payload_offset..total_end];

        let reassembled;
        let upper_payload: &[u8] = if let Some(frag) = parsed.fragment {
            let iface = match self.ifaces.get_mut(iface_idx) {
                Some(i) => i,
                None => return,
            };
            match iface.ipv6.reassemble(
                parsed.header.src,
                parsed.header.dst,
                frag,
                parsed.upper_protocol.as_u8(),
                upper_data,
                now,
            ) {
                Some(p) => {
                    reassembled = p;
                    &reassembled
                }
                None => return,
            }
        } else {
            upper_data
        };

        self.process_transport(
            iface_idx,
            IpAddress::V6(parsed.header.src),
            IpAddress::V6(parsed.header.dst),
            parsed.upper_protocol.as_u8(),
            upper_payload,
            now,
        );
    }

    /// Demuxes a reassembled datagram's upper-layer payload to TCP, UDP,
    /// or (for anything this crate has no parser for, e.g. ICMP/ICMPv6/
    /// IGMP) a raw-IP socket verbatim.
    fn process_transport(
        &mut self,
        iface_idx: InterfaceIndex,
        src: IpAddress,
        dst: IpAddress,
        protocol: u8,
        payload: &[u8],
        now: Instant,
    ) {
        match protocol {
            PROTO_TCP => self.process_tcp_segment(iface_idx, src, dst, payload, now),
            PROTO_UDP => self.process_udp_datagram(src, dst, payload),
            _ => self.process_raw_ip(payload),
        }
    }

    fn process_tcp_segment(&mut self, iface_idx: InterfaceIndex, src: IpAddress, dst: IpAddress, data: &[u8], now: Instant) {
        let hdr = match tcp_segment::parse(data) {
            Ok(h) => h,
            Err(e) => {
                log::trace!("dropping malformed tcp segment: {}", e);
                return;
            }
        };
        if !verify_tcp_checksum(src, dst, data) {
            log::trace!("dropping tcp segment with bad checksum");
            return;
        }
        let local = IpEndpoint { addr: dst, port: hdr.dst_port };
        let remote = IpEndpoint { addr: src, port: hdr.src_port };
        let handle = match self.sockets.find_stream(local, remote) {
            Some(h) => h,
            None => return,
        };
        let payload = &data[hdr.header_len()..];
        let actions = match self.sockets.get_mut(handle) {
            Ok(socket) => match socket.tcb_mut() {
                Some(tcb) => tcb.on_segment(hdr.seq, hdr.ack, hdr.flags, hdr.window, payload, now),
                None => return,
            },
            Err(_) => return,
        };
        self.apply_tcp_actions(iface_idx, handle, local, remote, actions, now);
    }

    /// Maps the actions a `Tcb` produced (from `on_segment` or `tick`)
    /// onto transmitted frames and the socket's event flags (§4.H).
    fn apply_tcp_actions(
        &mut self,
        iface_idx: InterfaceIndex,
        handle: SocketHandle,
        local: IpEndpoint,
        remote: IpEndpoint,
        actions: Vec<TcpAction>,
        now: Instant,
    ) {
        for action in actions {
            match action {
                TcpAction::Transmit { seq, ack, flags, window, mss, payload } => {
                    self.send_tcp_segment(iface_idx, local, remote, seq, ack, flags, window, mss, &payload, now);
                }
                TcpAction::DeliverToReceiveBuffer(_) => {
                    if let Ok(socket) = self.sockets.get_mut(handle) {
                        socket.event_flags.insert(SocketEvents::READABLE);
                    }
                }
                TcpAction::RaiseEstablished => {
                    if let Ok(socket) = self.sockets.get_mut(handle) {
                        socket.event_flags.insert(SocketEvents::WRITABLE);
                        if socket.listening {
                            socket.event_flags.insert(SocketEvents::ACCEPTABLE);
                        }
                    }
                }
                TcpAction::RaiseClosed => {
                    if let Ok(socket) = self.sockets.get_mut(handle) {
                        socket.event_flags.insert(SocketEvents::HUP);
                    }
                }
                TcpAction::RaiseError(_) => {
                    if let Ok(socket) = self.sockets.get_mut(handle) {
                        socket.event_flags.insert(SocketEvents::ERROR);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn send_tcp_segment(
        &mut self,
        iface_idx: InterfaceIndex,
        local: IpEndpoint,
        remote: IpEndpoint,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
        window: u16,
        mss: Option<u16>,
        payload: &[u8],
        now: Instant,
    ) {
        let mut buf = PacketBuffer::allocate(payload.len());
        if let Some(slice) = buf.as_mut_slice() {
            slice.copy_from_slice(payload);
        }
        let header_len = tcp_segment::MIN_HEADER_LEN + if mss.is_some() { 4 } else { 0 };
        let hdr = match buf.push_header(header_len) {
            Ok(h) => h,
            Err(_) => return,
        };
        if tcp_segment::encode(hdr, local.port, remote.port, seq, ack, flags, window, mss).is_err() {
            return;
        }
        let segment_len = buf.len() as u32;
        let checksum = match (local.addr, remote.addr) {
            #[cfg(feature = "ipv4")]
            (IpAddress::V4(l), IpAddress::V4(r)) => {
                let pseudo = ipv4::pseudo_header(l, r, PROTO_TCP, segment_len as u16);
                let segment = buf.as_slice().expect("freshly built single-chunk buffer");
                Some(crate::buffer::checksum_with_pseudo_header(&pseudo, segment))
            }
            #[cfg(feature = "ipv6")]
            (IpAddress::V6(l), IpAddress::V6(r)) => {
                let pseudo = ipv6::pseudo_header(l, r, segment_len, PROTO_TCP);
                let segment = buf.as_slice().expect("freshly built single-chunk buffer");
                Some(crate::buffer::checksum_with_pseudo_header(&pseudo, segment))
            }
            _ => None,
        };
        let checksum = match checksum {
            Some(c) => c,
            None => return,
        };
        if buf.write(16, &checksum.to_be_bytes()).is_err() {
            return;
        }

        match (local.addr, remote.addr) {
            #[cfg(feature = "ipv4")]
            (IpAddress::V4(_), IpAddress::V4(r)) => self.send_ipv4(iface_idx, r, PROTO_TCP, buf, now),
            #[cfg(feature = "ipv6")]
            (IpAddress::V6(_), IpAddress::V6(r)) => self.send_ipv6(iface_idx, r, PROTO_TCP, buf),
            _ => {}
        }
    }

    #[cfg(feature = "ipv4")]
    fn send_ipv4(&mut self, iface_idx: InterfaceIndex, dst: Ipv4Address, protocol: u8, mut payload: PacketBuffer, now: Instant) {
        let (our_ip, ttl) = match self.ifaces.get(iface_idx) {
            Some(i) => (i.ipv4.address, i.ipv4.ttl),
            None => return,
        };
        let payload_len = payload.len() as u16;
        let id = self.ifaces.rand().u32() as u16;
        let hdr = match payload.push_header(ipv4::MIN_HEADER_LEN) {
            Ok(h) => h,
            Err(_) => return,
        };
        if ipv4::encode(hdr, 0, payload_len, id, false, false, 0, ttl, protocol, our_ip, dst).is_err() {
            return;
        }

        if dst.is_broadcast() {
            self.send_ethernet(iface_idx, EthernetAddress::BROADCAST, EtherType::Ipv4, payload);
            return;
        }
        if dst.is_multicast() {
            let mac = EthernetAddress([0x01, 0x00, 0x5e, dst.0[1] & 0x7f, dst.0[2], dst.0[3]]);
            self.send_ethernet(iface_idx, mac, EtherType::Ipv4, payload);
            return;
        }

        let iface = match self.ifaces.get_mut(iface_idx) {
            Some(i) => i,
            None => return,
        };
        match iface.arp.get(dst) {
            // Reachable or Stale both carry a usable last-known MAC; routing
            // this datagram through `resolve` instead would hand the
            // datagram itself to the cache with nothing to give it back in
            // either of those states.
            Some((mac, ArpState::Reachable)) | Some((mac, ArpState::Stale)) => {
                self.send_ethernet(iface_idx, mac, EtherType::Ipv4, payload);
            }
            _ => {
                let (_, action) = iface.arp.resolve(dst, payload, now);
                self.apply_arp_action(iface_idx, action, now);
            }
        }
    }

    /// IPv6 neighbor resolution needs a Neighbor Solicitation, which this
    /// crate has no ICMPv6 encoder for (§1: no ICMPv6 wire codec exists).
    /// Delivery here is therefore limited to destinations the neighbor
    /// cache already has a usable entry for.
    #[cfg(feature = "ipv6")]
    fn send_ipv6(&mut self, iface_idx: InterfaceIndex, dst: Ipv6Address, protocol: u8, mut payload: PacketBuffer) {
        let (src, hop_limit) = match self.ifaces.get(iface_idx) {
            Some(i) => (i.ipv6.link_local.unwrap_or(Ipv6Address::UNSPECIFIED), i.ipv6.hop_limit),
            None => return,
        };
        let payload_len = payload.len() as u16;
        let hdr = match payload.push_header(ipv6::FIXED_HEADER_LEN) {
            Ok(h) => h,
            Err(_) => return,
        };
        if ipv6::encode_fixed_header(hdr, 0, 0, payload_len, protocol, hop_limit, src, dst).is_err() {
            return;
        }

        if dst.is_multicast() {
            let mac = EthernetAddress([0x33, 0x33, dst.0[12], dst.0[13], dst.0[14], dst.0[15]]);
            self.send_ethernet(iface_idx, mac, EtherType::Ipv6, payload);
            return;
        }

        let iface = match self.ifaces.get_mut(iface_idx) {
            Some(i) => i,
            None => return,
        };
        if let Some((mac, _)) = iface.ndp.get(dst) {
            self.send_ethernet(iface_idx, mac, EtherType::Ipv6, payload);
        }
    }

    fn process_udp_datagram(&mut self, src: IpAddress, dst: IpAddress, data: &[u8]) {
        let hdr = match udp::parse(data) {
            Ok(h) => h,
            Err(e) => {
                log::trace!("dropping malformed udp datagram: {}", e);
                return;
            }
        };
        let segment = &data[..usize::from(hdr.length)];
        let checksum_ok = match (src, dst) {
            #[cfg(feature = "ipv4")]
            (IpAddress::V4(s), IpAddress::V4(d)) => {
                let pseudo = ipv4::pseudo_header(s, d, PROTO_UDP, hdr.length);
                udp::verify_checksum(&pseudo, segment)
            }
            #[cfg(feature = "ipv6")]
            (IpAddress::V6(s), IpAddress::V6(d)) => {
                let pseudo = ipv6::pseudo_header(s, d, u32::from(hdr.length), PROTO_UDP);
                udp::verify_checksum(&pseudo, segment)
            }
            _ => false,
        };
        if !checksum_ok {
            log::trace!("dropping udp datagram with bad checksum");
            return;
        }
        let local = IpEndpoint { addr: dst, port: hdr.dst_port };
        let handle = match self.sockets.find_datagram(local) {
            Some(h) => h,
            None => return,
        };
        let payload = data[udp::HEADER_LEN..usize::from(hdr.length)].to_vec();
        if let Ok(socket) = self.sockets.get_mut(handle) {
            if let Some(queue) = socket.raw_queue_mut() {
                queue.push(PacketBuffer::from_received(payload));
            }
            socket.event_flags.insert(SocketEvents::READABLE);
        }
    }

    /// Delivers an undemuxed upper-layer payload to every raw-IP socket
    /// (§4.G), used for any IP protocol this crate has no parser for.
    fn process_raw_ip(&mut self, payload: &[u8]) {
        for socket in self.sockets.iter_mut() {
            if socket.kind == SocketType::RawIp {
                if let Some(queue) = socket.raw_queue_mut() {
                    queue.push(PacketBuffer::from_received(payload.to_vec()));
                }
                socket.event_flags.insert(SocketEvents::READABLE);
            }
        }
    }
}

fn verify_tcp_checksum(src: IpAddress, dst: IpAddress, segment: &[u8]) -> bool {
    match (src, dst) {
        #[cfg(feature = "ipv4")]
        (IpAddress::V4(s), IpAddress::V4(d)) => {
            let pseudo = ipv4::pseudo_header(s, d, PROTO_TCP, segment.len() as u16);
            crate::buffer::checksum_with_pseudo_header(&pseudo, segment) == 0
        }
        #[cfg(feature = "ipv6")]
        (IpAddress::V6(s), IpAddress::V6(d)) => {
            let pseudo = ipv6::pseudo_header(s, d, segment.len() as u32, PROTO_TCP);
            crate::buffer::checksum_with_pseudo_header(&pseudo, segment) == 0
        }
        _ => false,
    }
}
