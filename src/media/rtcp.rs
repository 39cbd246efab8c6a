//! RTCP payload-specific feedback (RFC 4585).
//!
//! Only Picture Loss Indication is built here: it is what the keyframe broker
//! writes into the room when the recorder needs a fresh keyframe.

/// Payload-specific feedback packet type.
const PT_PSFB: u8 = 206;

/// FMT value identifying a PLI inside a PSFB packet.
const FMT_PLI: u8 = 1;

/// PLI is a fixed 12-byte packet (header + sender SSRC + media SSRC).
pub const PLI_SIZE: usize = 12;

/// Parsed RTCP block from an incoming compound packet.
#[derive(Debug, PartialEq, Eq)]
pub enum RtcpBlock {
    PictureLossIndication { sender_ssrc: u32, media_ssrc: u32 },
    Unknown(u8),
}

/// Build a PLI asking `media_ssrc` for a keyframe.
pub fn build_pli(sender_ssrc: u32, media_ssrc: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PLI_SIZE);

    // Header: V=2, P=0, FMT=1, PT=PSFB
    buf.push(0x80 | FMT_PLI);
    buf.push(PT_PSFB);
    // Length in 32-bit words minus one
    buf.extend_from_slice(&2u16.to_be_bytes());
    buf.extend_from_slice(&sender_ssrc.to_be_bytes());
    buf.extend_from_slice(&media_ssrc.to_be_bytes());

    buf
}

/// Parse an RTCP compound packet into blocks.
pub fn parse_rtcp(data: &[u8]) -> Vec<RtcpBlock> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset + 4 <= data.len() {
        let fmt = data[offset] & 0x1F;
        let pt = data[offset + 1];
        let length_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let packet_len = (length_words + 1) * 4;

        if offset + packet_len > data.len() {
            break;
        }

        let pkt = &data[offset..offset + packet_len];

        match (pt, fmt) {
            (PT_PSFB, FMT_PLI) if pkt.len() >= PLI_SIZE => {
                blocks.push(RtcpBlock::PictureLossIndication {
                    sender_ssrc: u32::from_be_bytes([pkt[4], pkt[5], pkt[6], pkt[7]]),
                    media_ssrc: u32::from_be_bytes([pkt[8], pkt[9], pkt[10], pkt[11]]),
                });
            }
            (other, _) => blocks.push(RtcpBlock::Unknown(other)),
        }

        offset += packet_len;
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse_pli() {
        let buf = build_pli(0xAABBCCDD, 0x11223344);
        assert_eq!(buf.len(), PLI_SIZE);
        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 206);

        assert_eq!(
            parse_rtcp(&buf),
            vec![RtcpBlock::PictureLossIndication {
                sender_ssrc: 0xAABBCCDD,
                media_ssrc: 0x11223344,
            }]
        );
    }

    #[test]
    fn test_parse_compound_with_unknown() {
        // Empty RR (PT=201, length 1) followed by a PLI
        let mut buf = vec![0x80, 201, 0, 1, 0, 0, 0, 9];
        buf.extend(build_pli(1, 2));

        let blocks = parse_rtcp(&buf);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], RtcpBlock::Unknown(201));
    }

    #[test]
    fn test_parse_truncated() {
        let buf = build_pli(1, 2);
        assert!(parse_rtcp(&buf[..8]).is_empty());
    }
}
