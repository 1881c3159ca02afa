//! Ready-made framing for the common "length header + body" layout.

use super::traits::PacketLength;

/// Frames carried as a 4-byte big-endian body length followed by the body.
///
/// The length announced to the engine covers header and body, so packets are
/// delivered whole; [`payload`](Self::payload) strips the header.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPrefixed;

impl LengthPrefixed {
    pub const HEADER_LEN: usize = 4;

    pub fn packet_length(buffered: &[u8]) -> PacketLength {
        match buffered.get(..Self::HEADER_LEN) {
            Some(header) => {
                let body = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
                PacketLength::Ready(Self::HEADER_LEN + body as usize)
            }
            None => PacketLength::MoreToCome,
        }
    }

    pub fn payload(frame: &[u8]) -> &[u8] {
        frame.get(Self::HEADER_LEN..).unwrap_or_default()
    }

    /// Prefixes `body` with its length. `None` if it does not fit in a `u32`.
    pub fn encode(body: &[u8]) -> Option<Vec<u8>> {
        let len = u32::try_from(body.len()).ok()?;
        let mut frame = Vec::with_capacity(Self::HEADER_LEN + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(body);
        Some(frame)
    }
}
