//! Binary relay frame: `<dest>\0<src>\0<order>\0<payload>`.
//!
//! Only the three header segments are decoded. The payload tail is opaque and
//! frames are always relayed as the original bytes, never re-encoded.

use std::borrow::Cow;

/// Separator between header segments
pub const HEADER_DELIMITER: u8 = 0;

/// Order value a peer sends when it wants every other peer to offer it a session
pub const NEED_OFFER: &str = "needoffer";

/// Parsed view over a binary frame
#[derive(Debug)]
pub struct BinaryFrame<'a> {
    pub dest: Cow<'a, str>,
    pub src: Cow<'a, str>,
    pub order: Cow<'a, str>,
    pub raw: &'a [u8],
}

impl<'a> BinaryFrame<'a> {
    /// Never fails: missing segments decode as empty strings.
    #[inline]
    pub fn parse(data: &'a [u8]) -> Self {
        let mut cursor = 0;
        let dest = next_segment(data, &mut cursor);
        let src = next_segment(data, &mut cursor);
        let order = next_segment(data, &mut cursor);

        Self {
            dest,
            src,
            order,
            raw: data,
        }
    }

    /// Destination length is measured in UTF-16 code units. Under two means
    /// every peer but the source.
    #[inline]
    pub fn is_unicast(&self) -> bool {
        self.dest.encode_utf16().nth(1).is_some()
    }

    #[inline]
    pub fn is_offer_request(&self) -> bool {
        self.order == NEED_OFFER
    }
}

/// Scans for the next delimiter starting at `cursor`.
///
/// When no delimiter follows, the segment is empty and the cursor stays put so
/// the next segment scans from the same offset.
#[inline]
fn next_segment<'a>(data: &'a [u8], cursor: &mut usize) -> Cow<'a, str> {
    let start = *cursor;
    match data[start..].iter().position(|&b| b == HEADER_DELIMITER) {
        Some(len) => {
            *cursor = start + len + 1;
            String::from_utf8_lossy(&data[start..start + len])
        }
        None => Cow::Borrowed(""),
    }
}

/// Builds a frame the way clients put it on the wire
pub fn encode_frame(dest: &str, src: &str, order: &str, payload: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(dest.len() + src.len() + order.len() + 3 + payload.len());
    buffer.extend_from_slice(dest.as_bytes());
    buffer.push(HEADER_DELIMITER);
    buffer.extend_from_slice(src.as_bytes());
    buffer.push(HEADER_DELIMITER);
    buffer.extend_from_slice(order.as_bytes());
    buffer.push(HEADER_DELIMITER);
    buffer.extend_from_slice(payload);
    buffer
}
