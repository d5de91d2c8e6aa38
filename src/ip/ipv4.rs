//! IPv4 (RFC 791, §4.E / §6.2): header parsing/encoding, the pseudo-header
//! checksum, and per-interface fragmentation & reassembly.

use alloc::vec::Vec;

use crate::buffer::{self, PacketBuffer};
use crate::config::IpConfig;
use crate::error::{Error, Result, RxError};
use crate::ip::reassembly::{InsertOutcome, ReassemblyTable};
use crate::Instant;

pub const MIN_HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0, 0, 0, 0]);
    pub const BROADCAST: Ipv4Address = Ipv4Address([255, 255, 255, 255]);

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_u32(v: u32) -> Self {
        Ipv4Address(v.to_be_bytes())
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    pub fn is_multicast(self) -> bool {
        (self.0[0] & 0xf0) == 0xe0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Igmp = 2,
    Tcp = 6,
    Udp = 17,
}

#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header {
    pub ihl_words: u8,
    pub dscp_ecn: u8,
    pub total_len: u16,
    pub identification: u16,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
}

impl Ipv4Header {
    pub fn header_len(&self) -> usize {
        usize::from(self.ihl_words) * 4
    }
}

/// Validates version, IHL, total length and header checksum, then returns
/// the parsed header and where the payload starts.
pub fn parse(data: &[u8]) -> core::result::Result<(Ipv4Header, usize), RxError> {
    if data.len() < MIN_HEADER_LEN {
        return Err(RxError::TooShort);
    }
    let version = data[0] >> 4;
    if version != 4 {
        return Err(RxError::BadVersion);
    }
    let ihl = data[0] & 0x0f;
    let header_len = usize::from(ihl) * 4;
    if header_len < MIN_HEADER_LEN || data.len() < header_len {
        return Err(RxError::TooShort);
    }
    let total_len = u16::from_be_bytes([data[2], data[3]]);
    if usize::from(total_len) > data.len() || usize::from(total_len) < header_len {
        return Err(RxError::TooShort);
    }
    if buffer::checksum(&data[..header_len]) != 0 {
        return Err(RxError::BadChecksum);
    }
    let flags_fragment = u16::from_be_bytes([data[6], data[7]]);
    let header = Ipv4Header {
        ihl_words: ihl,
        dscp_ecn: data[1],
        total_len,
        identification: u16::from_be_bytes([data[4], data[5]]),
        dont_fragment: flags_fragment & 0x4000 != 0,
        more_fragments: flags_fragment & 0x2000 != 0,
        fragment_offset: (flags_fragment & 0x1fff) * 8,
        ttl: data[8],
        protocol: data[9],
        checksum: u16::from_be_bytes([data[10], data[11]]),
        src: Ipv4Address([data[12], data[13], data[14], data[15]]),
        dst: Ipv4Address([data[16], data[17], data[18], data[19]]),
    };
    Ok((header, header_len))
}

/// Encodes a minimal (no-options) IPv4 header into `out[..20]`, computing
/// the header checksum.
#[allow(clippy::too_many_arguments)]
pub fn encode(
    out: &mut [u8],
    dscp_ecn: u8,
    payload_len: u16,
    identification: u16,
    dont_fragment: bool,
    more_fragments: bool,
    fragment_offset: u16,
    ttl: u8,
    protocol: u8,
    src: Ipv4Address,
    dst: Ipv4Address,
) -> Result<()> {
    if out.len() < MIN_HEADER_LEN {
        return Err(Error::OutOfResources);
    }
    let total_len = MIN_HEADER_LEN as u16 + payload_len;
    out[0] = (4 << 4) | 5;
    out[1] = dscp_ecn;
    out[2..4].copy_from_slice(&total_len.to_be_bytes());
    out[4..6].copy_from_slice(&identification.to_be_bytes());
    let mut flags_fragment = fragment_offset / 8;
    if dont_fragment {
        flags_fragment |= 0x4000;
    }
    if more_fragments {
        flags_fragment |= 0x2000;
    }
    out[6..8].copy_from_slice(&flags_fragment.to_be_bytes());
    out[8] = ttl;
    out[9] = protocol;
    out[10..12].copy_from_slice(&0u16.to_be_bytes());
    out[12..16].copy_from_slice(&src.0);
    out[16..20].copy_from_slice(&dst.0);
    let checksum = buffer::checksum(&out[..MIN_HEADER_LEN]);
    out[10..12].copy_from_slice(&checksum.to_be_bytes());
    Ok(())
}

/// Builds the 12-byte IPv4 pseudo-header (RFC 793/768) for an upper-layer
/// checksum.
pub fn pseudo_header(src: Ipv4Address, dst: Ipv4Address, protocol: u8, upper_len: u16) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0..4].copy_from_slice(&src.0);
    out[4..8].copy_from_slice(&dst.0);
    out[8] = 0;
    out[9] = protocol;
    out[10..12].copy_from_slice(&upper_len.to_be_bytes());
    out
}

/// Splits `payload` into a sequence of `(offset, more_fragments, chunk)`
/// fragments no larger than `mtu` bytes of IP payload each, offsets
/// rounded down to an 8-byte boundary as RFC 791 requires.
pub fn fragment<'a>(payload: &'a [u8], mtu: usize) -> Vec<(u16, bool, &'a [u8])> {
    let max_chunk = (mtu / 8) * 8;
    if max_chunk == 0 || payload.len() <= mtu {
        return alloc::vec![(0, false, payload)];
    }
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < payload.len() {
        let end = (offset + max_chunk).min(payload.len());
        let more = end < payload.len();
        out.push((offset as u16, more, &payload[offset..end]));
        offset = end;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub id: u16,
    pub protocol: u8,
}

/// Per-interface IPv4 state: configured address/prefix and the
/// fragment-reassembly table (§3: "a per-interface table of reassembly
/// entries keyed by (src, dst, id, protocol)").
pub struct Ipv4Context {
    pub address: Ipv4Address,
    pub prefix_len: u8,
    pub ttl: u8,
    reassembly: ReassemblyTable<ReassemblyKey>,
}

impl Ipv4Context {
    pub fn new(slots: usize, config: &IpConfig) -> Self {
        Ipv4Context {
            address: Ipv4Address::UNSPECIFIED,
            prefix_len: 0,
            ttl: config.default_ttl,
            reassembly: ReassemblyTable::new(
                slots,
                crate::Duration::from_millis(u64::from(config.reassembly_timeout_ms)),
            ),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.address != Ipv4Address::UNSPECIFIED
    }

    /// Feeds one received fragment into the reassembly table. Returns
    /// `Some(datagram)` once the hole list for that (src, dst, id,
    /// protocol) empties.
    pub fn reassemble(
        &mut self,
        header: &Ipv4Header,
        payload: &[u8],
        now: Instant,
    ) -> Option<Vec<u8>> {
        let key = ReassemblyKey {
            src: header.src,
            dst: header.dst,
            id: header.identification,
            protocol: header.protocol,
        };
        let outcome = self.reassembly.insert(
            key,
            u32::from(header.fragment_offset),
            payload,
            header.more_fragments,
            None,
            now,
        );
        match outcome {
            InsertOutcome::Complete { payload, .. } => Some(payload),
            InsertOutcome::Pending => None,
        }
    }

    /// Drops expired reassembly slots (§4.E: "the reassembly deadline is
    /// absolute... on expiry the entry is freed").
    pub fn expire_reassembly(&mut self, now: Instant) -> Vec<ReassemblyKey> {
        self.reassembly.expire(now)
    }

    pub fn reassembly_slots_in_use(&self) -> usize {
        self.reassembly.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut buf = [0u8; MIN_HEADER_LEN];
        encode(
            &mut buf,
            0,
            100,
            0xBEEF,
            false,
            false,
            0,
            64,
            Protocol::Udp as u8,
            Ipv4Address([192, 0, 2, 2]),
            Ipv4Address([192, 0, 2, 1]),
        )
        .unwrap();
        let (hdr, hdr_len) = parse(&buf).unwrap();
        assert_eq!(hdr_len, 20);
        assert_eq!(hdr.identification, 0xBEEF);
        assert_eq!(hdr.src, Ipv4Address([192, 0, 2, 2]));
        assert_eq!(hdr.protocol, Protocol::Udp as u8);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut buf = [0u8; MIN_HEADER_LEN];
        encode(
            &mut buf, 0, 0, 1, false, false, 0, 64, 17,
            Ipv4Address([10, 0, 0, 1]),
            Ipv4Address([10, 0, 0, 2]),
        )
        .unwrap();
        buf[1] ^= 0xff;
        assert_eq!(parse(&buf).unwrap_err(), RxError::BadChecksum);
    }

    #[test]
    fn fragment_offsets_stay_on_eight_byte_boundary() {
        let payload = alloc::vec![0u8; 4000];
        let frags = fragment(&payload, 1480);
        for (offset, _, chunk) in &frags {
            assert_eq!(offset % 8, 0);
            assert!(chunk.len() <= 1480);
        }
        assert!(!frags.last().unwrap().1);
    }

    #[test]
    fn three_fragment_echo_reassembles() {
        let mut ctx = Ipv4Context::new(4, &IpConfig::default());
        let base = Ipv4Header {
            ihl_words: 5,
            dscp_ecn: 0,
            total_len: 0,
            identification: 7,
            dont_fragment: false,
            more_fragments: true,
            fragment_offset: 0,
            ttl: 64,
            protocol: 1,
            checksum: 0,
            src: Ipv4Address([192, 0, 2, 2]),
            dst: Ipv4Address([192, 0, 2, 1]),
        };
        let payload = alloc::vec![0xABu8; 4000];
        let frags = fragment(&payload, 1480);
        let mut result = None;
        for (offset, more, chunk) in frags {
            let mut hdr = base;
            hdr.fragment_offset = offset;
            hdr.more_fragments = more;
            result = ctx.reassemble(&hdr, chunk, Instant::ZERO);
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn missing_fragment_expires_and_frees_slot() {
        let mut ctx = Ipv4Context::new(4, &IpConfig { reassembly_timeout_ms: 100, default_ttl: 64 });
        let hdr = Ipv4Header {
            ihl_words: 5,
            dscp_ecn: 0,
            total_len: 0,
            identification: 9,
            dont_fragment: false,
            more_fragments: true,
            fragment_offset: 0,
            ttl: 64,
            protocol: 1,
            checksum: 0,
            src: Ipv4Address([192, 0, 2, 2]),
            dst: Ipv4Address([192, 0, 2, 1]),
        };
        ctx.reassemble(&hdr, &[1, 2, 3, 4], Instant::ZERO);
        assert_eq!(ctx.reassembly_slots_in_use(), 1);
        ctx.expire_reassembly(Instant::from_millis(200));
        assert_eq!(ctx.reassembly_slots_in_use(), 0);
    }
}
