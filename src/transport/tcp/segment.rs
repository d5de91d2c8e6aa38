//! TCP header and option parsing (RFC 793, §6.2). Strict wire-format
//! compliance here (endianness, option lengths) is called out in §1 as one
//! of the three things correctness is dominated by.

use crate::error::{Error, Result, RxError};

pub const MIN_HEADER_LEN: usize = 20;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
    pub sack_permitted: bool,
    pub timestamp: Option<(u32, u32)>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            mss: None,
            window_scale: None,
            sack_permitted: false,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub data_offset_words: u8,
    pub flags: Flags,
    pub window: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
    pub options: Options,
}

impl TcpHeader {
    pub fn header_len(&self) -> usize {
        usize::from(self.data_offset_words) * 4
    }
}

/// Parses a TCP segment header including options; does *not* verify the
/// checksum (callers do that against the pseudo-header once they know
/// which IP version framed the segment).
pub fn parse(data: &[u8]) -> core::result::Result<TcpHeader, RxError> {
    if data.len() < MIN_HEADER_LEN {
        return Err(RxError::TooShort);
    }
    let data_offset_words = data[12] >> 4;
    let header_len = usize::from(data_offset_words) * 4;
    if header_len < MIN_HEADER_LEN || data.len() < header_len {
        return Err(RxError::TooShort);
    }
    let flags = Flags::from_bits_truncate(data[13]);
    let options = parse_options(&data[MIN_HEADER_LEN..header_len])?;

    Ok(TcpHeader {
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        seq: u32::from_be_bytes(data[4..8].try_into().unwrap()),
        ack: u32::from_be_bytes(data[8..12].try_into().unwrap()),
        data_offset_words,
        flags,
        window: u16::from_be_bytes([data[14], data[15]]),
        checksum: u16::from_be_bytes([data[16], data[17]]),
        urgent_pointer: u16::from_be_bytes([data[18], data[19]]),
        options,
    })
}

fn parse_options(mut data: &[u8]) -> core::result::Result<Options, RxError> {
    let mut options = Options::default();
    while !data.is_empty() {
        match data[0] {
            0 => break, // end of option list
            1 => {
                data = &data[1..]; // no-op
            }
            2 => {
                if data.len() < 4 || data[1] != 4 {
                    return Err(RxError::Unsupported);
                }
                options.mss = Some(u16::from_be_bytes([data[2], data[3]]));
                data = &data[4..];
            }
            3 => {
                if data.len() < 3 || data[1] != 3 {
                    return Err(RxError::Unsupported);
                }
                options.window_scale = Some(data[2]);
                data = &data[3..];
            }
            4 => {
                if data.len() < 2 || data[1] != 2 {
                    return Err(RxError::Unsupported);
                }
                options.sack_permitted = true;
                data = &data[2..];
            }
            8 => {
                if data.len() < 10 || data[1] != 10 {
                    return Err(RxError::Unsupported);
                }
                let tsval = u32::from_be_bytes(data[2..6].try_into().unwrap());
                let tsecr = u32::from_be_bytes(data[6..10].try_into().unwrap());
                options.timestamp = Some((tsval, tsecr));
                data = &data[10..];
            }
            _kind => {
                if data.len() < 2 {
                    return Err(RxError::Unsupported);
                }
                let len = usize::from(data[1]).max(2);
                if len > data.len() {
                    return Err(RxError::Unsupported);
                }
                data = &data[len..];
            }
        }
    }
    Ok(options)
}

/// Encodes a header plus an optional MSS option (the only option this
/// stack ever originates, on the SYN/SYN-ACK), padded to a 4-byte
/// boundary. Returns the header length written.
#[allow(clippy::too_many_arguments)]
pub fn encode(
    out: &mut [u8],
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: Flags,
    window: u16,
    mss: Option<u16>,
) -> Result<usize> {
    let options_len = if mss.is_some() { 4 } else { 0 };
    let header_len = MIN_HEADER_LEN + options_len;
    if out.len() < header_len {
        return Err(Error::OutOfResources);
    }
    out[0..2].copy_from_slice(&src_port.to_be_bytes());
    out[2..4].copy_from_slice(&dst_port.to_be_bytes());
    out[4..8].copy_from_slice(&seq.to_be_bytes());
    out[8..12].copy_from_slice(&ack.to_be_bytes());
    out[12] = ((header_len / 4) as u8) << 4;
    out[13] = flags.bits();
    out[14..16].copy_from_slice(&window.to_be_bytes());
    out[16..18].copy_from_slice(&0u16.to_be_bytes());
    out[18..20].copy_from_slice(&0u16.to_be_bytes());
    if let Some(mss) = mss {
        out[20] = 2;
        out[21] = 4;
        out[22..24].copy_from_slice(&mss.to_be_bytes());
    }
    Ok(header_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse_mss_option() {
        let mut buf = [0u8; 24];
        let len = encode(&mut buf, 1234, 80, 100, 0, Flags::SYN, 64240, Some(1460)).unwrap();
        assert_eq!(len, 24);
        let hdr = parse(&buf[..len]).unwrap();
        assert_eq!(hdr.options.mss, Some(1460));
        assert!(hdr.flags.contains(Flags::SYN));
        assert_eq!(hdr.seq, 100);
    }

    #[test]
    fn unknown_trailing_option_is_skipped() {
        let mut buf = alloc::vec![0u8; 24];
        encode(&mut buf, 1, 2, 0, 0, Flags::SYN, 0, None).unwrap();
        // header_len with no mss is 20; grow to add a vendor option (kind 30, len 4)
        let mut full = alloc::vec![0u8; 24];
        full[..20].copy_from_slice(&buf[..20]);
        full[12] = ((24 / 4) as u8) << 4;
        full[20] = 30;
        full[21] = 4;
        full[22] = 0xAA;
        full[23] = 0xBB;
        let hdr = parse(&full).unwrap();
        assert!(hdr.options.mss.is_none());
    }
}
