//! # DSI Packet Framing
//!
//! Byte-level layout of everything the host pushes into, or pops out of, the
//! 32-bit DSI FIFOs. Words are little-endian; the ECC byte is always written
//! as zero and filled in by the controller.
//!
//! ```text
//! short:   [ ECC | data0 | reg   | VC<<6 | type ]
//! long:    [ ECC | wc_hi | wc_lo | VC<<6 | type ]  then payload words
//!                                                  byte0 of payload = reg
//! ```
//!
//! | Header | Read response         | Payload       | Skip |
//! |--------|-----------------------|---------------|------|
//! | 0x1A   | DCS long              | bytes 1..=2   | 4    |
//! | 0x1C   | generic long          | bytes 1..=2   | 4    |
//! | 0x11   | DCS short, 1 byte     | 1             | 1    |
//! | 0x21   | generic short, 1 byte | 1             | 1    |
//! | 0x12   | DCS short, 2 bytes    | 2             | 1    |
//! | 0x22   | generic short, 2 bytes| 2             | 1    |
//! | 0x02   | acknowledge/error     | 2             | 1    |
//! | other  | invalid               | whole FIFO    | 0    |

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{DsiError, DsiResult};

// ============================================================================
// DATA TYPES AND DCS OPCODES
// ============================================================================

/// MIPI DSI data type identifiers
pub mod data_type {
    pub const VSYNC_START: u8 = 0x01;
    pub const VSYNC_END: u8 = 0x11;
    pub const HSYNC_START: u8 = 0x21;
    pub const HSYNC_END: u8 = 0x31;
    /// End of transmission
    pub const EOT: u8 = 0x08;
    pub const BLANKING: u8 = 0x19;
    pub const HSYNC_ACTIVE: u8 = BLANKING;
    pub const HBACK_PORCH: u8 = BLANKING;
    pub const HFRONT_PORCH: u8 = BLANKING;

    pub const DCS_SHORT_WRITE: u8 = 0x05;
    pub const DCS_READ_NO_PARAMS: u8 = 0x06;
    pub const DCS_SHORT_WRITE_PARAM: u8 = 0x15;
    pub const MAX_RETURN_PACKET_SIZE: u8 = 0x37;
    pub const LONG_WRITE: u8 = 0x39;

    pub const HACTIVE_LENGTH_16BPP: u8 = 0x0e;
    pub const HACTIVE_LENGTH_18BPP: u8 = 0x1e;
    pub const HACTIVE_LENGTH_18BPP_NP: u8 = 0x2e;
    pub const HACTIVE_LENGTH_24BPP: u8 = 0x3e;
}

/// DCS command opcodes
pub mod dcs {
    pub const NOP: u8 = 0x00;
    pub const SET_DISPLAY_OFF: u8 = 0x28;
    pub const SET_DISPLAY_ON: u8 = 0x29;
    pub const SET_COLUMN_ADDRESS: u8 = 0x2a;
    pub const SET_PAGE_ADDRESS: u8 = 0x2b;
    pub const WRITE_MEMORY_START: u8 = 0x2c;
    pub const SET_PARTIAL_AREA: u8 = 0x30;
    pub const SET_ADDRESS_MODE: u8 = 0x36;
    pub const SET_PIXEL_FORMAT: u8 = 0x3a;
    pub const WRITE_MEMORY_CONTINUE: u8 = 0x3c;
}

/// Read response header bytes
pub mod response {
    pub const ACK_ERROR_REPORT: u8 = 0x02;
    pub const GENERIC_SHORT_1: u8 = 0x11;
    pub const GENERIC_SHORT_2: u8 = 0x12;
    pub const GENERIC_LONG: u8 = 0x1a;
    pub const DCS_LONG: u8 = 0x1c;
    pub const DCS_SHORT_1: u8 = 0x21;
    pub const DCS_SHORT_2: u8 = 0x22;
}

/// Trailing word appended to every command sent in HS mode
pub const EOT_WORD: u32 = 0x000f_0f08;

/// Single-word BTA replies that are reported but harmless
pub const BTA_ACK_SINGLE_ECC_ERR: u32 = 0x0000_0102;
pub const BTA_ACK_FALSE_CTRL_ERR: u32 = 0x0000_4002;

/// Largest long-packet payload (word count is 16 bits and includes `reg`)
pub const MAX_LONG_PAYLOAD: usize = 0xfffe;

const VC_SHIFT: u32 = 6;

fn header_byte(vc: u32, command: u8) -> u32 {
    ((vc & 0x3) << VC_SHIFT) | (command as u32 & 0x3f)
}

// ============================================================================
// WRITE FRAMING
// ============================================================================

/// One command to push through the host FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescriptor<'a> {
    pub command: u8,
    pub reg: u8,
    pub payload: &'a [u8],
    pub long: bool,
}

impl<'a> PacketDescriptor<'a> {
    pub fn short(command: u8, reg: u8, payload: &'a [u8]) -> Self {
        Self {
            command,
            reg,
            payload,
            long: false,
        }
    }

    pub fn long(command: u8, reg: u8, payload: &'a [u8]) -> Self {
        Self {
            command,
            reg,
            payload,
            long: true,
        }
    }

    /// FIFO words for this packet on virtual channel `vc`
    pub fn encode(&self, vc: u32) -> DsiResult<Vec<u32>> {
        if !self.long {
            let data0 = self.payload.first().copied().unwrap_or(0) as u32;
            return Ok(vec![data0 << 16 | (self.reg as u32) << 8 | header_byte(vc, self.command)]);
        }

        if self.payload.len() > MAX_LONG_PAYLOAD {
            return Err(DsiError::InvalidArgument(format!(
                "long packet payload of {} bytes exceeds {}",
                self.payload.len(),
                MAX_LONG_PAYLOAD
            )));
        }
        let word_count = ((self.payload.len() as u32 + 1) & 0xffff) << 8;
        let mut words = Vec::with_capacity(2 + self.payload.len() / 4);
        words.push(word_count | header_byte(vc, self.command));
        words.extend(pack_payload(self.reg, self.payload));
        Ok(words)
    }
}

/// Pack `reg` followed by `payload` into little-endian FIFO words, zero
/// padding the last one
pub fn pack_payload(reg: u8, payload: &[u8]) -> Vec<u32> {
    let mut words = Vec::with_capacity((payload.len() + 4) / 4);

    // the first word carries reg plus up to three payload bytes
    let head = payload.len().min(3);
    let mut first = [0u8; 4];
    first[0] = reg;
    first[1..=head].copy_from_slice(&payload[..head]);
    words.push(LittleEndian::read_u32(&first));

    let rest = &payload[head..];
    let mut chunks = rest.chunks_exact(4);
    for chunk in &mut chunks {
        words.push(LittleEndian::read_u32(chunk));
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut last = [0u8; 4];
        last[..tail.len()].copy_from_slice(tail);
        words.push(LittleEndian::read_u32(&last));
    }
    words
}

/// Flatten FIFO words back to bytes
pub fn unpack_words(words: &[u32]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut bytes);
    bytes
}

/// Control word announcing the largest response the panel may return
pub fn max_return_size_word(len: usize, vc: u32) -> u32 {
    ((len as u32) & 0xffff) << 8 | header_byte(vc, data_type::MAX_RETURN_PACKET_SIZE)
}

pub fn dcs_read_word(reg: u8, vc: u32) -> u32 {
    (reg as u32) << 8 | header_byte(vc, data_type::DCS_READ_NO_PARAMS)
}

// ============================================================================
// READ CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Long,
    Short1,
    Short2,
    AckError,
    Invalid,
}

/// Where the payload sits in the staging buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLayout {
    pub kind: ResponseKind,
    pub header: u8,
    /// Bytes the header claims (before clamping)
    pub len: usize,
    /// Offset of the first payload byte
    pub skip: usize,
    /// Bytes present after the skip, as the hardware accounts them
    pub available: usize,
}

impl ResponseLayout {
    /// Bytes to copy for a caller asking for `requested`
    pub fn copy_len(&self, requested: usize) -> usize {
        self.len.min(requested).min(self.available)
    }
}

/// Classify a drained read FIFO of `word_count` words
pub fn classify_response(staging: &[u8], word_count: usize) -> ResponseLayout {
    let header = staging.first().copied().unwrap_or(0);
    let fifo_bytes = word_count * 4;
    let (kind, len, skip, available) = match header {
        response::GENERIC_LONG | response::DCS_LONG => {
            let len = staging
                .get(1..3)
                .map(LittleEndian::read_u16)
                .unwrap_or(0) as usize;
            (ResponseKind::Long, len, 4, fifo_bytes.saturating_sub(4))
        }
        response::GENERIC_SHORT_1 | response::DCS_SHORT_1 => (ResponseKind::Short1, 1, 1, fifo_bytes),
        response::GENERIC_SHORT_2 | response::DCS_SHORT_2 => (ResponseKind::Short2, 2, 1, fifo_bytes),
        response::ACK_ERROR_REPORT => (ResponseKind::AckError, 2, 1, fifo_bytes),
        _ => (ResponseKind::Invalid, fifo_bytes, 0, fifo_bytes),
    };
    ResponseLayout {
        kind,
        header,
        len,
        skip,
        available,
    }
}

/// True when a BTA returned exactly one word and it is a tolerated report
pub fn is_benign_bta_reply(words: &[u32]) -> bool {
    match words {
        [only] => {
            let masked = only & 0x00ff_ffff;
            masked == BTA_ACK_SINGLE_ECC_ERR || masked == BTA_ACK_FALSE_CTRL_ERR
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(words: &[u32]) -> Vec<u8> {
        let header = words[0];
        let count = ((header >> 8) & 0xffff) as usize;
        let bytes = unpack_words(&words[1..]);
        bytes[..count].to_vec()
    }

    #[test]
    fn test_long_packet_reassembles_exactly() {
        for n in [0usize, 1, 3, 4, 5, 8, 17] {
            let payload: Vec<u8> = (0..n as u8).map(|b| b.wrapping_mul(7).wrapping_add(1)).collect();
            let words = PacketDescriptor::long(data_type::LONG_WRITE, 0xb0, &payload)
                .encode(0)
                .unwrap();
            assert_eq!(words.len(), 1 + (n + 1).div_ceil(4), "n = {}", n);
            let mut expected = vec![0xb0];
            expected.extend_from_slice(&payload);
            assert_eq!(reassemble(&words), expected, "n = {}", n);
        }
    }

    #[test]
    fn test_short_packet_layout() {
        let words = PacketDescriptor::short(data_type::DCS_SHORT_WRITE_PARAM, 0x36, &[0x08])
            .encode(2)
            .unwrap();
        assert_eq!(words, vec![0x0008_3695]);

        let words = PacketDescriptor::short(data_type::DCS_SHORT_WRITE, dcs::SET_DISPLAY_ON, &[])
            .encode(0)
            .unwrap();
        assert_eq!(words, vec![0x0000_2905]);
    }

    #[test]
    fn test_long_header_word_count_includes_reg() {
        let words = PacketDescriptor::long(data_type::LONG_WRITE, dcs::SET_COLUMN_ADDRESS, &[0, 0, 1, 0xdf])
            .encode(1)
            .unwrap();
        assert_eq!(words[0], 0x0000_0579);
        assert_eq!(words[1], 0x0100_002a);
        assert_eq!(words[2], 0x0000_00df);
    }

    #[test]
    fn test_oversized_long_packet_rejected() {
        let payload = vec![0u8; MAX_LONG_PAYLOAD + 1];
        assert!(matches!(
            PacketDescriptor::long(data_type::LONG_WRITE, 0, &payload).encode(0),
            Err(DsiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_control_words() {
        assert_eq!(max_return_size_word(4, 0), 0x0000_0437);
        assert_eq!(dcs_read_word(0x0a, 1), 0x0000_0a46);
    }

    #[test]
    fn test_classification_table() {
        let cases = [
            (0x1a, ResponseKind::Long, 3usize),
            (0x1c, ResponseKind::Long, 3),
            (0x11, ResponseKind::Short1, 1),
            (0x21, ResponseKind::Short1, 1),
            (0x12, ResponseKind::Short2, 2),
            (0x22, ResponseKind::Short2, 2),
            (0x02, ResponseKind::AckError, 2),
            (0x99, ResponseKind::Invalid, 8),
        ];
        for (header, kind, len) in cases {
            let staging = [header, 0x03, 0x00, 0x00, 0xaa, 0xbb, 0xcc, 0xdd];
            let layout = classify_response(&staging, 2);
            assert_eq!(layout.kind, kind, "header {:#x}", header);
            assert_eq!(layout.len, len, "header {:#x}", header);
        }
    }

    #[test]
    fn test_copy_len_clamps() {
        let staging = [0x1c, 0x20, 0x00, 0x00, 1, 2, 3, 4];
        let layout = classify_response(&staging, 2);
        assert_eq!(layout.len, 0x20);
        assert_eq!(layout.copy_len(100), 4);
        assert_eq!(layout.copy_len(2), 2);
    }

    #[test]
    fn test_benign_bta_replies() {
        assert!(is_benign_bta_reply(&[0x0000_0102]));
        assert!(is_benign_bta_reply(&[0x0000_4002]));
        assert!(is_benign_bta_reply(&[0x7f00_0102]));
        assert!(!is_benign_bta_reply(&[0x0000_0103]));
        assert!(!is_benign_bta_reply(&[0x0000_0102, 0]));
        assert!(!is_benign_bta_reply(&[]));
    }
}
