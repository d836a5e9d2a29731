//! # Packet Sequencer
//!
//! Builds the per-scanline packet program: six line types, each a LO/HI
//! register pair holding up to three sub-packets per half.
//!
//! ```text
//! LO: [30] FORCE_LP  [29] EN2 [28:23] ID2 [22:20] SZ2
//!                    [19] EN1 [18:13] ID1 [12:10] SZ1
//!                    [ 9] EN0 [ 8: 3] ID0 [ 2: 0] SZ0
//! HI: same sub-packet layout, no FORCE_LP
//! ```
//!
//! Line 0 is vsync start, 1 vsync end / hsync, 2 and 4 hsync, 3 and 5 the
//! active line. Line 5 is always a copy of line 3.

use crate::config::{DataFormat, VideoModeVariant};
use crate::hal::RegisterBackend;
use crate::packet::data_type;
use crate::regs::{dsi_reg, field};

pub const FORCE_LP: u32 = 1 << 30;

/// One sub-packet of a sequence half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqPacket {
    pub id: u8,
    /// Index into the packet length table
    pub size: u8,
    pub enabled: bool,
}

impl SeqPacket {
    pub const fn on(id: u8, size: u8) -> Self {
        Self { id, size, enabled: true }
    }

    pub const fn off(id: u8, size: u8) -> Self {
        Self { id, size, enabled: false }
    }

    /// Encode into sub-packet position 0, 1 or 2
    fn encode(self, pos: u32) -> u32 {
        let shift = pos * 10;
        let en = if self.enabled { 1 << 9 } else { 0 };
        let raw = ((self.id as u32) & field::PKT_SEQ_ID_MASK) << 3
            | en
            | (self.size as u32) & field::PKT_SEQ_SIZE_MASK;
        raw << shift
    }
}

/// Encode up to three sub-packets into one register half
pub fn encode_half(packets: &[SeqPacket], force_lp: bool) -> u32 {
    let mut word = if force_lp { FORCE_LP } else { 0 };
    for (pos, pkt) in packets.iter().take(3).enumerate() {
        word |= pkt.encode(pos as u32);
    }
    word
}

/// Active-length packet id for a format
pub fn active_length_command(format: DataFormat) -> u8 {
    match format {
        DataFormat::Packed16 => data_type::HACTIVE_LENGTH_16BPP,
        DataFormat::Packed18 => data_type::HACTIVE_LENGTH_18BPP,
        DataFormat::Loose18 => data_type::HACTIVE_LENGTH_18BPP_NP,
        DataFormat::Packed24 => data_type::HACTIVE_LENGTH_24BPP,
    }
}

/// Six `(lo, hi)` line-type slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketSequenceProgram {
    pub slots: [(u32, u32); 6],
}

impl PacketSequenceProgram {
    /// Write all twelve sequence registers, slot order, LO before HI
    pub fn write(&self, regs: &mut dyn RegisterBackend) {
        for ((lo_off, hi_off), (lo, hi)) in dsi_reg::PKT_SEQ.iter().zip(self.slots.iter()) {
            regs.write(*lo_off, *lo);
            regs.write(*hi_off, *hi);
        }
    }

    fn mirror_active_line(mut self) -> Self {
        self.slots[5] = self.slots[3];
        self
    }
}

pub fn build_program(variant: VideoModeVariant, format: DataFormat) -> PacketSequenceProgram {
    use data_type::*;

    let active = active_length_command(format);
    let mut p = PacketSequenceProgram::default();

    match variant {
        VideoModeVariant::DcDrivenCommand => {
            p.slots[3].0 = encode_half(
                &[SeqPacket::on(LONG_WRITE, 3), SeqPacket::on(EOT, 7), SeqPacket::off(0, 0)],
                false,
            );
            p.slots[3].1 = encode_half(&[SeqPacket::off(BLANKING, 4)], false);
        }
        VideoModeVariant::Ganged { .. } => {
            p.slots[0].0 = encode_half(&[SeqPacket::on(VSYNC_START, 0)], false);
            p.slots[1].0 = encode_half(&[SeqPacket::on(HSYNC_START, 0)], false);
            p.slots[2].0 = encode_half(&[SeqPacket::on(HSYNC_START, 0)], false);
            p.slots[4].0 = p.slots[2].0;
            p.slots[3].0 = encode_half(
                &[
                    SeqPacket::on(HSYNC_START, 0),
                    SeqPacket::on(active, 3),
                    SeqPacket::on(BLANKING, 4),
                ],
                false,
            );
        }
        VideoModeVariant::NonBurstSyncEnd => {
            p.slots[0].0 = encode_half(&[SeqPacket::on(VSYNC_START, 0)], true);
            p.slots[1].0 = encode_half(&[SeqPacket::on(VSYNC_END, 0)], true);
            p.slots[2].0 = encode_half(&[SeqPacket::on(HSYNC_START, 0)], true);
            p.slots[4].0 = p.slots[2].0;
            p.slots[3].0 = encode_half(
                &[
                    SeqPacket::on(HSYNC_START, 0),
                    SeqPacket::on(HSYNC_ACTIVE, 1),
                    SeqPacket::on(HSYNC_END, 0),
                ],
                false,
            );
            p.slots[3].1 = encode_half(
                &[
                    SeqPacket::on(HBACK_PORCH, 2),
                    SeqPacket::on(active, 3),
                    SeqPacket::on(HFRONT_PORCH, 4),
                ],
                false,
            );
        }
        VideoModeVariant::NonBurst | VideoModeVariant::Burst => {
            // only the active line's force-LP differs between the two
            let active_line_lp = variant == VideoModeVariant::Burst;
            p.slots[0].0 = encode_half(&[SeqPacket::on(VSYNC_START, 0)], true);
            p.slots[1].0 = encode_half(&[SeqPacket::on(HSYNC_START, 0)], true);
            p.slots[2].0 = encode_half(&[SeqPacket::on(HSYNC_START, 0)], true);
            p.slots[4].0 = p.slots[2].0;
            p.slots[3].0 = encode_half(
                &[
                    SeqPacket::on(HSYNC_START, 0),
                    SeqPacket::on(HSYNC_ACTIVE, 2),
                    SeqPacket::on(active, 3),
                ],
                active_line_lp,
            );
            p.slots[3].1 = encode_half(
                &[SeqPacket::on(BLANKING, 4), SeqPacket::off(0, 0), SeqPacket::off(0, 0)],
                false,
            );
        }
    }

    p.mirror_active_line()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GangedSplit, VideoMode};
    use crate::mock::MockRegisters;

    fn all_variants() -> Vec<VideoModeVariant> {
        let mut v = vec![
            VideoModeVariant::Burst,
            VideoModeVariant::NonBurst,
            VideoModeVariant::NonBurstSyncEnd,
            VideoModeVariant::DcDrivenCommand,
        ];
        for split in [GangedSplit::LeftRight, GangedSplit::OddEven] {
            for inner in [VideoMode::Burst, VideoMode::NonBurst, VideoMode::DcDrivenCommand] {
                v.push(VideoModeVariant::Ganged { split, inner });
            }
        }
        v
    }

    #[test]
    fn test_slot5_mirrors_slot3_everywhere() {
        for variant in all_variants() {
            for format in DataFormat::ALL {
                let p = build_program(variant, format);
                assert_eq!(p.slots[5], p.slots[3], "{:?} {:?}", variant, format);
                assert_ne!(p.slots[3].0, 0);
            }
        }
    }

    #[test]
    fn test_dc_driven_only_populates_active_lines() {
        let p = build_program(VideoModeVariant::DcDrivenCommand, DataFormat::Packed24);
        for slot in [0, 1, 2, 4] {
            assert_eq!(p.slots[slot], (0, 0));
        }
        let lo = p.slots[3].0;
        assert_eq!(lo & FORCE_LP, 0);
        assert_eq!(lo & 0x3ff, (0x39 << 3) | (1 << 9) | 3);
        assert_eq!((lo >> 10) & 0x3ff, (0x08 << 3) | (1 << 9) | 7);
        assert_eq!(lo >> 20, 0);
        // blanking with size 4, not enabled
        assert_eq!(p.slots[3].1, (0x19 << 3) | 4);
    }

    #[test]
    fn test_non_burst_populates_every_slot() {
        for variant in [
            VideoModeVariant::NonBurst,
            VideoModeVariant::NonBurstSyncEnd,
            VideoModeVariant::Burst,
        ] {
            let p = build_program(variant, DataFormat::Packed16);
            for slot in 0..6 {
                assert_ne!(p.slots[slot].0, 0);
                assert_ne!(p.slots[slot].0 & (1 << 9), 0);
            }
            assert_ne!(p.slots[0].0 & FORCE_LP, 0);
            assert_ne!(p.slots[2].0 & FORCE_LP, 0);
            assert_ne!(p.slots[4].0 & FORCE_LP, 0);
        }
    }

    #[test]
    fn test_sync_end_layout() {
        let p = build_program(VideoModeVariant::NonBurstSyncEnd, DataFormat::Packed18);
        assert_eq!((p.slots[1].0 >> 3) & 0x3f, 0x11);
        let hi = p.slots[3].1;
        assert_eq!((hi >> 3) & 0x3f, 0x19);
        assert_eq!((hi >> 13) & 0x3f, 0x1e);
        assert_eq!((hi >> 10) & 0x7, 3);
        assert_eq!((hi >> 20) & 0x7, 4);
        assert_eq!(p.slots[3].0 & FORCE_LP, 0);
    }

    #[test]
    fn test_burst_and_non_burst_differ_only_in_active_line_lp() {
        let burst = build_program(VideoModeVariant::Burst, DataFormat::Packed24);
        let plain = build_program(VideoModeVariant::NonBurst, DataFormat::Packed24);
        for slot in [0, 1, 2, 4] {
            assert_eq!(burst.slots[slot], plain.slots[slot]);
        }
        assert_eq!(burst.slots[3].0 ^ plain.slots[3].0, FORCE_LP);
        assert_eq!(burst.slots[3].1, plain.slots[3].1);
    }

    #[test]
    fn test_ganged_layout() {
        let v = VideoModeVariant::Ganged {
            split: GangedSplit::LeftRight,
            inner: VideoMode::NonBurst,
        };
        let p = build_program(v, DataFormat::Loose18);
        for slot in 0..6 {
            assert_eq!(p.slots[slot].0 & FORCE_LP, 0);
        }
        assert_eq!(p.slots[3].1, 0);
        let lo = p.slots[3].0;
        assert_eq!((lo >> 13) & 0x3f, 0x2e);
        assert_eq!((lo >> 23) & 0x3f, 0x19);
    }

    #[test]
    fn test_write_emits_twelve_registers_in_order() {
        let mut regs = MockRegisters::new();
        let p = build_program(VideoModeVariant::NonBurst, DataFormat::Packed24);
        p.write(&mut regs);
        let writes = regs.writes();
        assert_eq!(writes.len(), 12);
        assert_eq!(writes[0], (dsi_reg::PKT_SEQ_0_LO, p.slots[0].0));
        assert_eq!(writes[11], (dsi_reg::PKT_SEQ_5_HI, p.slots[5].1));
        assert_eq!(regs.value(dsi_reg::PKT_SEQ_5_LO), regs.value(dsi_reg::PKT_SEQ_3_LO));
    }
}
