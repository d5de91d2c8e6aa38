//! IPv6 (RFC 8200, §4.E / §6.2): fixed header, extension-header walk, and
//! per-interface fragmentation & reassembly.

use alloc::vec::Vec;

use crate::config::IpConfig;
use crate::error::{Error, Result, RxError};
use crate::ip::reassembly::{InsertOutcome, ReassemblyTable};
use crate::Instant;

pub const FIXED_HEADER_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ipv6Address(pub [u8; 16]);

impl Ipv6Address {
    pub const UNSPECIFIED: Ipv6Address = Ipv6Address([0; 16]);

    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xff
    }

    pub fn is_link_local(&self) -> bool {
        self.0[0] == 0xfe && (self.0[1] & 0xc0) == 0x80
    }

    pub fn solicited_node_multicast(&self) -> Ipv6Address {
        let mut out = [0u8; 16];
        out[0] = 0xff;
        out[1] = 0x02;
        out[11] = 0x01;
        out[12] = 0xff;
        out[13] = self.0[13];
        out[14] = self.0[14];
        out[15] = self.0[15];
        Ipv6Address(out)
    }

    /// Forms an interface identifier from a 48-bit MAC via the modified
    /// EUI-64 transform (RFC 4291 appendix A), used by SLAAC (§4.F).
    pub fn from_eui64(prefix: &[u8; 8], eui64: [u8; 8]) -> Ipv6Address {
        let mut iid = eui64;
        iid[0] ^= 0x02;
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(prefix);
        out[8..].copy_from_slice(&iid);
        Ipv6Address(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHeader {
    HopByHop,
    Routing,
    Fragment,
    DestinationOptions,
    Icmpv6,
    Tcp,
    Udp,
    NoNextHeader,
    Other(u8),
}

impl NextHeader {
    fn from_u8(v: u8) -> NextHeader {
        match v {
            0 => NextHeader::HopByHop,
            43 => NextHeader::Routing,
            44 => NextHeader::Fragment,
            58 => NextHeader::Icmpv6,
            59 => NextHeader::NoNextHeader,
            60 => NextHeader::DestinationOptions,
            6 => NextHeader::Tcp,
            17 => NextHeader::Udp,
            other => NextHeader::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match *self {
            NextHeader::HopByHop => 0,
            NextHeader::Routing => 43,
            NextHeader::Fragment => 44,
            NextHeader::Icmpv6 => 58,
            NextHeader::NoNextHeader => 59,
            NextHeader::DestinationOptions => 60,
            NextHeader::Tcp => 6,
            NextHeader::Udp => 17,
            NextHeader::Other(v) => v,
        }
    }

    fn is_extension(&self) -> bool {
        matches!(
            self,
            NextHeader::HopByHop
                | NextHeader::Routing
                | NextHeader::Fragment
                | NextHeader::DestinationOptions
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub payload_len: u16,
    pub hop_limit: u8,
    pub src: Ipv6Address,
    pub dst: Ipv6Address,
}

/// The subset of a fragment extension header relevant to reassembly.
#[derive(Debug, Clone, Copy)]
pub struct FragmentInfo {
    pub offset: u16,
    pub more_fragments: bool,
    pub identification: u32,
}

/// Parsed datagram: the fixed header, the upper-layer protocol found after
/// walking any extension headers, where the upper-layer payload starts,
/// and fragment info if a Fragment header was present.
pub struct ParsedDatagram {
    pub header: Ipv6Header,
    pub upper_protocol: NextHeader,
    pub payload_offset: usize,
    pub fragment: Option<FragmentInfo>,
}

/// Parses the fixed header and walks Hop-by-Hop, Routing, Fragment and
/// Destination Options extension headers until it reaches an upper-layer
/// protocol or runs out of recognized extension headers.
pub fn parse(data: &[u8]) -> core::result::Result<ParsedDatagram, RxError> {
    if data.len() < FIXED_HEADER_LEN {
        return Err(RxError::TooShort);
    }
    let version = data[0] >> 4;
    if version != 6 {
        return Err(RxError::BadVersion);
    }
    let traffic_class = (data[0] << 4) | (data[1] >> 4);
    let flow_label = (u32::from(data[1] & 0x0f) << 16) | (u32::from(data[2]) << 8) | u32::from(data[3]);
    let payload_len = u16::from_be_bytes([data[4], data[5]]);
    let mut next_header = NextHeader::from_u8(data[6]);
    let hop_limit = data[7];
    let src = Ipv6Address(data[8..24].try_into().unwrap());
    let dst = Ipv6Address(data[24..40].try_into().unwrap());

    if data.len() < FIXED_HEADER_LEN + usize::from(payload_len) {
        return Err(RxError::TooShort);
    }

    let header = Ipv6Header {
        traffic_class,
        flow_label,
        payload_len,
        hop_limit,
        src,
        dst,
    };

    let mut pos = FIXED_HEADER_LEN;
    let mut fragment = None;
    let max_pos = FIXED_HEADER_LEN + usize::from(payload_len);

    while next_header.is_extension() {
        if pos + 2 > max_pos {
            return Err(RxError::TooShort);
        }
        let this_next = NextHeader::from_u8(data[pos]);
        if matches!(next_header, NextHeader::Fragment) {
            if pos + 8 > max_pos {
                return Err(RxError::TooShort);
            }
            let offset_res = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);
            fragment = Some(FragmentInfo {
                offset: (offset_res >> 3) * 8,
                more_fragments: offset_res & 0x1 != 0,
                identification: u32::from_be_bytes(
                    data[pos + 4..pos + 8].try_into().unwrap(),
                ),
            });
            pos += 8;
        } else {
            let ext_len_words = data[pos + 1];
            let ext_len = (usize::from(ext_len_words) + 1) * 8;
            if pos + ext_len > max_pos {
                return Err(RxError::TooShort);
            }
            pos += ext_len;
        }
        next_header = this_next;
    }

    Ok(ParsedDatagram {
        header,
        upper_protocol: next_header,
        payload_offset: pos,
        fragment,
    })
}

/// Encodes the 40-byte fixed header into `out`.
pub fn encode_fixed_header(
    out: &mut [u8],
    traffic_class: u8,
    flow_label: u32,
    payload_len: u16,
    next_header: u8,
    hop_limit: u8,
    src: Ipv6Address,
    dst: Ipv6Address,
) -> Result<()> {
    if out.len() < FIXED_HEADER_LEN {
        return Err(Error::OutOfResources);
    }
    out[0] = 0x60 | (traffic_class >> 4);
    out[1] = (traffic_class << 4) | ((flow_label >> 16) as u8 & 0x0f);
    out[2] = (flow_label >> 8) as u8;
    out[3] = flow_label as u8;
    out[4..6].copy_from_slice(&payload_len.to_be_bytes());
    out[6] = next_header;
    out[7] = hop_limit;
    out[8..24].copy_from_slice(&src.0);
    out[24..40].copy_from_slice(&dst.0);
    Ok(())
}

/// 40-byte IPv6 pseudo-header (RFC 8200 §8.1) for an upper-layer checksum.
pub fn pseudo_header(src: Ipv6Address, dst: Ipv6Address, upper_len: u32, next_header: u8) -> [u8; 40] {
    let mut out = [0u8; 40];
    out[0..16].copy_from_slice(&src.0);
    out[16..32].copy_from_slice(&dst.0);
    out[32..36].copy_from_slice(&upper_len.to_be_bytes());
    out[39] = next_header;
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub src: Ipv6Address,
    pub dst: Ipv6Address,
    pub id: u32,
    pub protocol: u8,
}

pub struct Ipv6Context {
    pub link_local: Option<Ipv6Address>,
    pub global: Vec<Ipv6Address>,
    pub hop_limit: u8,
    reassembly: ReassemblyTable<ReassemblyKey>,
}

impl Ipv6Context {
    pub fn new(slots: usize, config: &IpConfig) -> Self {
        Ipv6Context {
            link_local: None,
            global: Vec::new(),
            hop_limit: config.default_ttl,
            reassembly: ReassemblyTable::new(
                slots,
                crate::Duration::from_millis(u64::from(config.reassembly_timeout_ms)),
            ),
        }
    }

    pub fn reassemble(
        &mut self,
        src: Ipv6Address,
        dst: Ipv6Address,
        frag: FragmentInfo,
        upper_protocol: u8,
        payload: &[u8],
        now: Instant,
    ) -> Option<Vec<u8>> {
        let key = ReassemblyKey {
            src,
            dst,
            id: frag.identification,
            protocol: upper_protocol,
        };
        let outcome = self.reassembly.insert(
            key,
            u32::from(frag.offset),
            payload,
            frag.more_fragments,
            None,
            now,
        );
        match outcome {
            InsertOutcome::Complete { payload, .. } => Some(payload),
            InsertOutcome::Pending => None,
        }
    }

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
    fn parses_plain_udp_datagram() {
        let mut buf = [0u8; FIXED_HEADER_LEN + 8];
        encode_fixed_header(
            &mut buf,
            0,
            0,
            8,
            NextHeader::Udp.as_u8(),
            64,
            Ipv6Address([1; 16]),
            Ipv6Address([2; 16]),
        )
        .unwrap();
        let parsed = parse(&buf).unwrap();
        assert_eq!(parsed.upper_protocol, NextHeader::Udp);
        assert_eq!(parsed.payload_offset, FIXED_HEADER_LEN);
        assert!(parsed.fragment.is_none());
    }

    #[test]
    fn walks_hop_by_hop_then_fragment_header() {
        let mut buf = alloc::vec![0u8; FIXED_HEADER_LEN + 8 + 8 + 4];
        let payload_len = 8 + 8 + 4;
        encode_fixed_header(
            &mut buf,
            0,
            0,
            payload_len as u16,
            NextHeader::HopByHop.as_u8(),
            64,
            Ipv6Address([1; 16]),
            Ipv6Address([2; 16]),
        )
        .unwrap();
        // Hop-by-hop: next header = Fragment, length field = 0 (8 bytes total).
        buf[40] = NextHeader::Fragment.as_u8();
        buf[41] = 0;
        // Fragment header at offset 48: next header = Udp.
        buf[48] = NextHeader::Udp.as_u8();
        let offset_res: u16 = (10 << 3) | 1; // offset=10*8=80, M=1
        buf[50..52].copy_from_slice(&offset_res.to_be_bytes());
        buf[52..56].copy_from_slice(&0xCAFEBABEu32.to_be_bytes());
        let parsed = parse(&buf).unwrap();
        assert_eq!(parsed.upper_protocol, NextHeader::Udp);
        assert_eq!(parsed.payload_offset, 56);
        let frag = parsed.fragment.unwrap();
        assert_eq!(frag.offset, 80);
        assert!(frag.more_fragments);
        assert_eq!(frag.identification, 0xCAFEBABE);
    }

    #[test]
    fn eui64_interface_identifier_flips_universal_bit() {
        let prefix = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0];
        let eui64 = [0x00, 0x11, 0x22, 0xff, 0xfe, 0x33, 0x44, 0x55];
        let addr = Ipv6Address::from_eui64(&prefix, eui64);
        assert_eq!(addr.0[8], 0x02);
    }
}
