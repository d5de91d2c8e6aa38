//! DNS message name codec (§4.J): `encodeName`/`parseName` with RFC 1035
//! compression, and the two name-comparison primitives mDNS, DNS-SD,
//! LLMNR and NBNS responders build their probing/lookup logic on top of.
//! The responders themselves live outside this crate.

use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Maximum length of one encoded name, including every length octet and
/// the terminating zero (RFC 1035 §3.1).
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

/// Bound on compression-pointer chases while parsing one name (§6.3).
pub const DNS_NAME_MAX_RECURSION: u8 = 4;

const COMPRESSION_TAG: u8 = 0xC0;

/// Encodes a dot-separated name (e.g. `"mydevice.local"`) as canonical
/// length-prefixed labels terminated by a zero byte.
pub fn encode_name(src: &str, dst: &mut Vec<u8>) -> Result<()> {
    let start = dst.len();
    if src.is_empty() {
        dst.push(0);
        return Ok(());
    }
    for label in src.split('.') {
        if label.len() > MAX_LABEL_LEN {
            dst.truncate(start);
            return Err(Error::MessageTooLong);
        }
        dst.push(label.len() as u8);
        dst.extend_from_slice(label.as_bytes());
    }
    dst.push(0);
    if dst.len() - start > MAX_NAME_LEN {
        dst.truncate(start);
        return Err(Error::MessageTooLong);
    }
    Ok(())
}

/// Parses a name starting at `pos` within `message`, following compression
/// pointers (high bits `11`) up to [`DNS_NAME_MAX_RECURSION`] deep, and
/// appends the decoded dot-separated labels to `dst`.
///
/// Returns the number of bytes consumed from `message` starting at `pos`
/// for the *initial* (non-pointer-chased) representation — i.e. callers
/// advance their own cursor by this amount regardless of how many bytes
/// were read while following pointers elsewhere in the message.
pub fn parse_name(message: &[u8], pos: usize, dst: &mut Vec<u8>) -> Result<usize> {
    parse_name_inner(message, pos, dst, 0).map(|(consumed, _)| consumed)
}

fn parse_name_inner(
    message: &[u8],
    mut pos: usize,
    dst: &mut Vec<u8>,
    depth: u8,
) -> Result<(usize, usize)> {
    if depth > DNS_NAME_MAX_RECURSION {
        return Err(Error::InvalidPacket);
    }
    let initial_pos = pos;
    let mut consumed_before_pointer: Option<usize> = None;
    let mut first_label = true;

    loop {
        let Some(&len_octet) = message.get(pos) else {
            return Err(Error::InvalidPacket);
        };

        if len_octet & COMPRESSION_TAG == COMPRESSION_TAG {
            let Some(&lo) = message.get(pos + 1) else {
                return Err(Error::InvalidPacket);
            };
            let pointer = (usize::from(len_octet & !COMPRESSION_TAG) << 8) | usize::from(lo);
            if consumed_before_pointer.is_none() {
                consumed_before_pointer = Some(pos + 2 - initial_pos);
            }
            let (_, _) = parse_name_inner(message, pointer, dst, depth + 1)?;
            return Ok((consumed_before_pointer.unwrap(), dst.len()));
        }

        if len_octet == 0 {
            pos += 1;
            if consumed_before_pointer.is_none() {
                consumed_before_pointer = Some(pos - initial_pos);
            }
            return Ok((consumed_before_pointer.unwrap(), dst.len()));
        }

        let len = usize::from(len_octet);
        if len > MAX_LABEL_LEN {
            return Err(Error::InvalidPacket);
        }
        let label_start = pos + 1;
        let label_end = label_start + len;
        let Some(label) = message.get(label_start..label_end) else {
            return Err(Error::InvalidPacket);
        };
        if !first_label {
            dst.push(b'.');
        }
        dst.extend_from_slice(label);
        first_label = false;
        pos = label_end;
    }
}

/// Compares an encoded name against a plain `host.service.suffix` string,
/// case-insensitively, without materializing the decoded name.
pub fn compare_name(message: &[u8], pos: usize, other: &str) -> Result<bool> {
    let mut decoded = Vec::new();
    parse_name(message, pos, &mut decoded)?;
    Ok(ascii_eq_ignore_case(&decoded, other.as_bytes()))
}

/// Compares two encoded names, each possibly in a different message,
/// independently resolving compression for each.
pub fn compare_encoded_name(
    message_a: &[u8],
    pos_a: usize,
    message_b: &[u8],
    pos_b: usize,
) -> Result<bool> {
    let mut a = Vec::new();
    parse_name(message_a, pos_a, &mut a)?;
    let mut b = Vec::new();
    parse_name(message_b, pos_b, &mut b)?;
    Ok(ascii_eq_ignore_case(&a, &b))
}

fn ascii_eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_compression_pointer() {
        let mut message = Vec::new();
        encode_name("mydevice.local", &mut message).unwrap();
        assert_eq!(
            &message,
            &[8, b'm', b'y', b'd', b'e', b'v', b'i', b'c', b'e', 5, b'l', b'o', b'c', b'a', b'l', 0]
        );

        let pointer_offset = message.len();
        message.push(COMPRESSION_TAG); // pointer back to offset 0
        message.push(0);

        let mut decoded = Vec::new();
        let consumed = parse_name(&message, pointer_offset, &mut decoded).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(decoded, b"mydevice.local");
    }

    #[test]
    fn label_over_63_bytes_rejected() {
        let long_label = "a".repeat(64);
        let mut out = Vec::new();
        assert!(encode_name(&long_label, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn compression_loop_past_max_recursion_fails() {
        // Each pointer refers to the next, one level deeper than allowed.
        let mut message = Vec::new();
        for i in 0..(DNS_NAME_MAX_RECURSION as usize + 2) {
            let next = (i as u16 + 1) * 2;
            message.push(COMPRESSION_TAG | ((next >> 8) as u8));
            message.push((next & 0xFF) as u8);
        }
        message.push(0); // terminator, never reached if the depth cap works
        let mut decoded = Vec::new();
        assert!(parse_name(&message, 0, &mut decoded).is_err());
    }

    #[test]
    fn compare_encoded_name_across_two_messages() {
        let mut msg_a = Vec::new();
        encode_name("host.local", &mut msg_a).unwrap();
        let mut msg_b = Vec::new();
        encode_name("HOST.LOCAL", &mut msg_b).unwrap();
        assert!(compare_encoded_name(&msg_a, 0, &msg_b, 0).unwrap());
    }
}
