//! RTP packet model and header decoding (RFC 3550).
//!
//! RTP header format:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Packets reach the adapter already decrypted; this module only parses what
//! the stats engine and the recorder need.

/// Minimum RTP header size in bytes (no CSRC, no extension).
pub const RTP_HEADER_SIZE: usize = 12;

/// Size of the 16-bit sequence number space.
pub const SEQ_NUM_CYCLE: u32 = 1 << 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RtpError {
    #[error("RTP packet too short: {0} bytes")]
    TooShort(usize),
    #[error("unsupported RTP version: {0}")]
    UnsupportedVersion(u8),
    #[error("RTP packet truncated: header needs {needed} bytes, got {len}")]
    Truncated { needed: usize, len: usize },
    #[error("invalid RTP padding length {0}")]
    BadPadding(usize),
}

/// Parsed RTP packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpPacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Header-only packet, mostly useful for feeding sequence numbers.
    pub fn with_sequence(sequence_number: u16, timestamp: u32) -> Self {
        Self {
            version: 2,
            sequence_number,
            timestamp,
            ..Default::default()
        }
    }
}

/// Compute the full RTP header length from raw packet bytes.
///
/// Accounts for CSRC entries and header extensions (RFC 3550 §5.3.1).
/// Returns `None` if the packet is too short.
pub fn full_header_len(data: &[u8]) -> Option<usize> {
    if data.len() < RTP_HEADER_SIZE {
        return None;
    }
    let csrc_count = (data[0] & 0x0F) as usize;
    let has_extension = (data[0] >> 4) & 0x01 != 0;
    let mut len = RTP_HEADER_SIZE + csrc_count * 4;
    if data.len() < len {
        return None;
    }
    if has_extension {
        // Extension header: 2 bytes profile + 2 bytes length (in 32-bit words)
        if data.len() < len + 4 {
            return None;
        }
        let ext_words = u16::from_be_bytes([data[len + 2], data[len + 3]]) as usize;
        len += 4 + ext_words * 4;
        if data.len() < len {
            return None;
        }
    }
    Some(len)
}

/// Encode an RTP packet into bytes (no CSRCs, no extension).
pub fn encode(pkt: &RtpPacket) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RTP_HEADER_SIZE + pkt.payload.len());

    // Byte 0: V=2, P=0, X=0, CC=0 -> 0x80
    buf.push(0x80);
    // Byte 1: M, PT
    buf.push(((pkt.marker as u8) << 7) | (pkt.payload_type & 0x7F));
    buf.extend_from_slice(&pkt.sequence_number.to_be_bytes());
    buf.extend_from_slice(&pkt.timestamp.to_be_bytes());
    buf.extend_from_slice(&pkt.ssrc.to_be_bytes());
    buf.extend_from_slice(&pkt.payload);

    buf
}

/// Decode bytes into an RTP packet.
///
/// The payload excludes CSRCs, the header extension and trailing padding.
pub fn decode(data: &[u8]) -> Result<RtpPacket, RtpError> {
    if data.len() < RTP_HEADER_SIZE {
        return Err(RtpError::TooShort(data.len()));
    }

    let version = (data[0] >> 6) & 0x03;
    if version != 2 {
        return Err(RtpError::UnsupportedVersion(version));
    }

    let padding = (data[0] >> 5) & 0x01 != 0;
    let extension = (data[0] >> 4) & 0x01 != 0;
    let csrc_count = data[0] & 0x0F;
    let marker = (data[1] >> 7) & 0x01 != 0;
    let payload_type = data[1] & 0x7F;
    let sequence_number = u16::from_be_bytes([data[2], data[3]]);
    let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

    let header_len = full_header_len(data).ok_or(RtpError::Truncated {
        needed: RTP_HEADER_SIZE + (csrc_count as usize) * 4 + if extension { 4 } else { 0 },
        len: data.len(),
    })?;

    let mut end = data.len();
    if padding {
        let pad = data[end - 1] as usize;
        if pad == 0 || header_len + pad > end {
            return Err(RtpError::BadPadding(pad));
        }
        end -= pad;
    }

    Ok(RtpPacket {
        version,
        padding,
        extension,
        csrc_count,
        marker,
        payload_type,
        sequence_number,
        timestamp,
        ssrc,
        payload: data[header_len..end].to_vec(),
    })
}
