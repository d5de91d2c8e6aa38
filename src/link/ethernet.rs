//! Ethernet II framing with optional 802.1Q/802.1ad tags (§4.D, §6.2).

use crate::error::{Error, Result, RxError};

pub const HEADER_LEN: usize = 14;
pub const TAG_LEN: usize = 4;

pub const TPID_802_1Q: u16 = 0x8100;
pub const TPID_802_1AD: u16 = 0x88A8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EthernetAddress(pub [u8; 6]);

impl EthernetAddress {
    pub const BROADCAST: EthernetAddress = EthernetAddress([0xff; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        if b.len() < 6 {
            return Err(Error::InvalidLength);
        }
        let mut out = [0u8; 6];
        out.copy_from_slice(&b[..6]);
        Ok(EthernetAddress(out))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EtherType {
    Ipv4 = 0x0800,
    Arp = 0x0806,
    Ipv6 = 0x86DD,
    VlanTagged = TPID_802_1Q,
    VlanTaggedAd = TPID_802_1AD,
    Other(u16),
}

impl EtherType {
    pub fn from_u16(v: u16) -> EtherType {
        match v {
            0x0800 => EtherType::Ipv4,
            0x0806 => EtherType::Arp,
            0x86DD => EtherType::Ipv6,
            TPID_802_1Q => EtherType::VlanTagged,
            TPID_802_1AD => EtherType::VlanTaggedAd,
            other => EtherType::Other(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match *self {
            EtherType::Ipv4 => 0x0800,
            EtherType::Arp => 0x0806,
            EtherType::Ipv6 => 0x86DD,
            EtherType::VlanTagged => TPID_802_1Q,
            EtherType::VlanTaggedAd => TPID_802_1AD,
            EtherType::Other(v) => v,
        }
    }
}

/// A parsed 802.1Q/802.1ad tag: priority code point, drop-eligible
/// indicator, VLAN id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    pub pcp: u8,
    pub dei: bool,
    pub vid: u16,
    /// True for an 802.1ad (QinQ) outer tag.
    pub is_service_tag: bool,
}

impl VlanTag {
    pub const RESERVED_VID: u16 = 0xFFF;

    fn parse(tci: u16, is_service_tag: bool) -> VlanTag {
        VlanTag {
            pcp: ((tci >> 13) & 0x7) as u8,
            dei: (tci >> 12) & 0x1 != 0,
            vid: tci & 0x0FFF,
            is_service_tag,
        }
    }

    fn encode(&self) -> u16 {
        (u16::from(self.pcp) << 13) | (u16::from(self.dei) << 12) | (self.vid & 0x0FFF)
    }
}

#[derive(Debug, Clone)]
pub struct EthernetHeader {
    pub dst: EthernetAddress,
    pub src: EthernetAddress,
    pub outer_tag: Option<VlanTag>,
    pub inner_tag: Option<VlanTag>,
    pub ethertype: EtherType,
    /// Byte length of the header actually present on the wire, including
    /// any tags, so the caller knows how many bytes to strip.
    pub wire_len: usize,
}

/// Parses an Ethernet II header, including up to one 802.1ad outer tag and
/// one 802.1Q inner tag (double tagging / QinQ).
pub fn parse(frame: &[u8]) -> core::result::Result<EthernetHeader, RxError> {
    if frame.len() < HEADER_LEN {
        return Err(RxError::TooShort);
    }
    let dst = EthernetAddress::from_bytes(&frame[0..6]).map_err(|_| RxError::TooShort)?;
    let src = EthernetAddress::from_bytes(&frame[6..12]).map_err(|_| RxError::TooShort)?;
    let mut pos = 12;
    let mut outer_tag = None;
    let mut inner_tag = None;

    let mut ethertype_raw = u16::from_be_bytes([frame[pos], frame[pos + 1]]);
    pos += 2;

    if ethertype_raw == TPID_802_1AD {
        if frame.len() < pos + TAG_LEN {
            return Err(RxError::TooShort);
        }
        let tci = u16::from_be_bytes([frame[pos], frame[pos + 1]]);
        outer_tag = Some(VlanTag::parse(tci, true));
        pos += 2;
        ethertype_raw = u16::from_be_bytes([frame[pos], frame[pos + 1]]);
        pos += 2;
    }
    if ethertype_raw == TPID_802_1Q {
        if frame.len() < pos + TAG_LEN {
            return Err(RxError::TooShort);
        }
        let tci = u16::from_be_bytes([frame[pos], frame[pos + 1]]);
        inner_tag = Some(VlanTag::parse(tci, false));
        pos += 2;
        ethertype_raw = u16::from_be_bytes([frame[pos], frame[pos + 1]]);
        pos += 2;
    }

    Ok(EthernetHeader {
        dst,
        src,
        outer_tag,
        inner_tag,
        ethertype: EtherType::from_u16(ethertype_raw),
        wire_len: pos,
    })
}

/// Writes an Ethernet II header (with optional tags) into `out`, returning
/// the number of bytes written. `out` must be at least
/// [`encoded_len`] bytes.
pub fn encode(
    out: &mut [u8],
    dst: EthernetAddress,
    src: EthernetAddress,
    outer_tag: Option<VlanTag>,
    inner_tag: Option<VlanTag>,
    ethertype: EtherType,
) -> Result<usize> {
    let needed = encoded_len(outer_tag.is_some(), inner_tag.is_some());
    if out.len() < needed {
        return Err(Error::OutOfResources);
    }
    out[0..6].copy_from_slice(&dst.0);
    out[6..12].copy_from_slice(&src.0);
    let mut pos = 12;
    if let Some(tag) = outer_tag {
        out[pos..pos + 2].copy_from_slice(&TPID_802_1AD.to_be_bytes());
        out[pos + 2..pos + 4].copy_from_slice(&tag.encode().to_be_bytes());
        pos += 4;
    }
    if let Some(tag) = inner_tag {
        out[pos..pos + 2].copy_from_slice(&TPID_802_1Q.to_be_bytes());
        out[pos + 2..pos + 4].copy_from_slice(&tag.encode().to_be_bytes());
        pos += 4;
    }
    out[pos..pos + 2].copy_from_slice(&ethertype.as_u16().to_be_bytes());
    pos += 2;
    Ok(pos)
}

pub fn encoded_len(has_outer: bool, has_inner: bool) -> usize {
    HEADER_LEN + usize::from(has_outer) * TAG_LEN + usize::from(has_inner) * TAG_LEN
}

/// Acceptance filter (§4.D): accept iff destination matches our MAC, is in
/// the refcounted filter table, broadcast, multicast-accept-all, or
/// promiscuous.
pub fn accept_destination(
    dst: EthernetAddress,
    our_mac: EthernetAddress,
    filter_table: &[EthernetAddress],
    accept_all_multicast: bool,
    promiscuous: bool,
) -> bool {
    if promiscuous {
        return true;
    }
    if dst == our_mac || dst.is_broadcast() {
        return true;
    }
    if dst.is_multicast() {
        if accept_all_multicast {
            return true;
        }
        return filter_table.contains(&dst);
    }
    filter_table.contains(&dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_vid() {
        // The setter-level rejection lives in iface::Interface; here we
        // only check the tag decodes the VID correctly so that rejection
        // logic has something trustworthy to compare against.
        let tci = 0x0FFF;
        let tag = VlanTag::parse(tci, false);
        assert_eq!(tag.vid, VlanTag::RESERVED_VID);
    }

    #[test]
    fn parse_plain_frame() {
        let mut frame = alloc::vec![0u8; 14];
        frame[0..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        frame[6..12].copy_from_slice(&[6, 5, 4, 3, 2, 1]);
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        let hdr = parse(&frame).unwrap();
        assert_eq!(hdr.ethertype, EtherType::Ipv4);
        assert_eq!(hdr.wire_len, 14);
        assert!(hdr.outer_tag.is_none());
    }

    #[test]
    fn parse_single_tagged_frame() {
        let mut frame = alloc::vec![0u8; 18];
        frame[0..6].copy_from_slice(&[1; 6]);
        frame[6..12].copy_from_slice(&[2; 6]);
        frame[12..14].copy_from_slice(&TPID_802_1Q.to_be_bytes());
        frame[14..16].copy_from_slice(&0x002Au16.to_be_bytes()); // vid 42
        frame[16..18].copy_from_slice(&0x86DDu16.to_be_bytes());
        let hdr = parse(&frame).unwrap();
        assert_eq!(hdr.ethertype, EtherType::Ipv6);
        let tag = hdr.inner_tag.unwrap();
        assert_eq!(tag.vid, 42);
        assert_eq!(hdr.wire_len, 18);
    }

    #[test]
    fn encode_then_parse_round_trips() {
        let mut out = [0u8; 18];
        let n = encode(
            &mut out,
            EthernetAddress([1; 6]),
            EthernetAddress([2; 6]),
            None,
            Some(VlanTag {
                pcp: 3,
                dei: true,
                vid: 100,
                is_service_tag: false,
            }),
            EtherType::Ipv4,
        )
        .unwrap();
        let hdr = parse(&out[..n]).unwrap();
        assert_eq!(hdr.ethertype, EtherType::Ipv4);
        let tag = hdr.inner_tag.unwrap();
        assert_eq!(tag.vid, 100);
        assert_eq!(tag.pcp, 3);
        assert!(tag.dei);
    }
}
