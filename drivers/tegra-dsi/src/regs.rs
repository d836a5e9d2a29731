//! # Tegra DSI Register Map
//!
//! Byte offsets from the DSI aperture base and the bit fields the transport
//! programs. Offsets are word index × 4.
//!
//! ```text
//! 0x028 WR_DATA ─┐ host/video FIFO write port
//! 0x024 RD_DATA ─┘ read FIFO pop
//! 0x03c HOST_DSI_CONTROL   trigger source, HS, FIFO select, BTA
//! 0x040 DSI_CONTROL        lanes, format, video/host enable
//! 0x04c TRIGGER            host/video trigger (self-clearing)
//! 0x08c..0x0b8 PKT_SEQ_n   six line types × {LO, HI}
//! 0x0d0..0x0dc PKT_LEN     eight packet lengths, two per register
//! 0x0f0..0x0fc PHY/BTA     D-PHY timing
//! ```

// ============================================================================
// DSI REGISTER OFFSETS
// ============================================================================

/// DSI register offsets
pub mod dsi_reg {
    /// Read FIFO
    pub const RD_DATA: usize = 0x024;
    /// Write FIFO (host or video, per HOST_DSI_CONTROL)
    pub const WR_DATA: usize = 0x028;
    pub const POWER_CONTROL: usize = 0x02c;
    pub const INT_ENABLE: usize = 0x030;
    pub const INT_STATUS: usize = 0x034;
    pub const INT_MASK: usize = 0x038;
    pub const HOST_DSI_CONTROL: usize = 0x03c;
    pub const DSI_CONTROL: usize = 0x040;
    pub const SOL_DELAY: usize = 0x044;
    pub const MAX_THRESHOLD: usize = 0x048;
    pub const TRIGGER: usize = 0x04c;
    pub const TX_CRC: usize = 0x050;
    pub const STATUS: usize = 0x054;
    pub const INIT_SEQ_CONTROL: usize = 0x068;
    pub const INIT_SEQ_DATA_0: usize = 0x06c;
    pub const INIT_SEQ_DATA_1: usize = 0x070;
    pub const INIT_SEQ_DATA_2: usize = 0x074;
    pub const INIT_SEQ_DATA_3: usize = 0x078;
    pub const INIT_SEQ_DATA_4: usize = 0x07c;
    pub const INIT_SEQ_DATA_5: usize = 0x080;
    pub const INIT_SEQ_DATA_6: usize = 0x084;
    pub const INIT_SEQ_DATA_7: usize = 0x088;
    pub const PKT_SEQ_0_LO: usize = 0x08c;
    pub const PKT_SEQ_0_HI: usize = 0x090;
    pub const PKT_SEQ_1_LO: usize = 0x094;
    pub const PKT_SEQ_1_HI: usize = 0x098;
    pub const PKT_SEQ_2_LO: usize = 0x09c;
    pub const PKT_SEQ_2_HI: usize = 0x0a0;
    pub const PKT_SEQ_3_LO: usize = 0x0a4;
    pub const PKT_SEQ_3_HI: usize = 0x0a8;
    pub const PKT_SEQ_4_LO: usize = 0x0ac;
    pub const PKT_SEQ_4_HI: usize = 0x0b0;
    pub const PKT_SEQ_5_LO: usize = 0x0b4;
    pub const PKT_SEQ_5_HI: usize = 0x0b8;
    /// Write-memory start/continue opcodes for DC-driven command mode
    pub const DCS_CMDS: usize = 0x0cc;
    pub const PKT_LEN_0_1: usize = 0x0d0;
    pub const PKT_LEN_2_3: usize = 0x0d4;
    pub const PKT_LEN_4_5: usize = 0x0d8;
    pub const PKT_LEN_6_7: usize = 0x0dc;
    pub const PHY_TIMING_0: usize = 0x0f0;
    pub const PHY_TIMING_1: usize = 0x0f4;
    pub const PHY_TIMING_2: usize = 0x0f8;
    pub const BTA_TIMING: usize = 0x0fc;
    pub const TIMEOUT_0: usize = 0x110;
    pub const TIMEOUT_1: usize = 0x114;
    pub const TO_TALLY: usize = 0x118;
    pub const PAD_CONTROL: usize = 0x12c;
    pub const PAD_CONTROL_CD: usize = 0x130;
    pub const GANGED_MODE_CONTROL: usize = 0x14c;
    pub const GANGED_MODE_START: usize = 0x150;
    pub const GANGED_MODE_SIZE: usize = 0x154;

    /// Packet sequence registers in slot order, `(lo, hi)`
    pub const PKT_SEQ: [(usize, usize); 6] = [
        (PKT_SEQ_0_LO, PKT_SEQ_0_HI),
        (PKT_SEQ_1_LO, PKT_SEQ_1_HI),
        (PKT_SEQ_2_LO, PKT_SEQ_2_HI),
        (PKT_SEQ_3_LO, PKT_SEQ_3_HI),
        (PKT_SEQ_4_LO, PKT_SEQ_4_HI),
        (PKT_SEQ_5_LO, PKT_SEQ_5_HI),
    ];

    /// Packet length registers, lengths `(2n, 2n+1)`
    pub const PKT_LEN: [usize; 4] = [PKT_LEN_0_1, PKT_LEN_2_3, PKT_LEN_4_5, PKT_LEN_6_7];

    /// Registers cleared by the init pass, in write order
    pub const INIT_ZERO: [usize; 32] = [
        WR_DATA,
        INT_ENABLE,
        INT_STATUS,
        INT_MASK,
        INIT_SEQ_DATA_0,
        INIT_SEQ_DATA_1,
        INIT_SEQ_DATA_2,
        INIT_SEQ_DATA_3,
        INIT_SEQ_DATA_4,
        INIT_SEQ_DATA_5,
        INIT_SEQ_DATA_6,
        INIT_SEQ_DATA_7,
        DCS_CMDS,
        PKT_SEQ_0_LO,
        PKT_SEQ_1_LO,
        PKT_SEQ_2_LO,
        PKT_SEQ_3_LO,
        PKT_SEQ_4_LO,
        PKT_SEQ_5_LO,
        PKT_SEQ_0_HI,
        PKT_SEQ_1_HI,
        PKT_SEQ_2_HI,
        PKT_SEQ_3_HI,
        PKT_SEQ_4_HI,
        PKT_SEQ_5_HI,
        DSI_CONTROL,
        PAD_CONTROL,
        PAD_CONTROL_CD,
        PKT_LEN_0_1,
        PKT_LEN_2_3,
        PKT_LEN_4_5,
        PKT_LEN_6_7,
    ];
}

// ============================================================================
// BIT FIELDS
// ============================================================================

/// POWER_CONTROL bits
pub mod power_bits {
    pub const LEG_DSI_ENABLE: u32 = 1 << 0;
}

/// HOST_DSI_CONTROL bits
pub mod host_bits {
    pub const FIFO_RESET: u32 = 1 << 21;
    pub const CRC_RESET: u32 = 1 << 20;
    /// Host trigger source field
    pub const TX_TRIG_MASK: u32 = 0x3 << 12;
    pub const TX_TRIG_SOL: u32 = 0 << 12;
    pub const TX_TRIG_FIFO: u32 = 1 << 12;
    pub const TX_TRIG_IMMEDIATE: u32 = 2 << 12;
    pub const RAW_DATA: u32 = 1 << 6;
    /// High-speed transmission
    pub const HIGH_SPEED_TRANS: u32 = 1 << 5;
    /// Packet write FIFO select: set = video, clear = host
    pub const FIFO_SEL_VIDEO: u32 = 1 << 4;
    pub const FIFO_SEL_HOST: u32 = 0;
    /// Immediate bus turn-around (self-clearing)
    pub const IMM_BTA: u32 = 1 << 3;
    pub const PKT_BTA: u32 = 1 << 2;
    pub const CS_ENABLE: u32 = 1 << 1;
    pub const ECC_ENABLE: u32 = 1 << 0;
}

/// DSI_CONTROL bits
pub mod control_bits {
    /// HS clock lane control: set = TX only, clear = continuous
    pub const HS_CLK_TX_ONLY: u32 = 1 << 20;
    pub const HS_CLK_CONTINUOUS: u32 = 0;
    pub const HS_CLK_MASK: u32 = 1 << 20;
    pub const DCS_ENABLE: u32 = 1 << 3;
    /// Video source: set = display controller B
    pub const VID_SOURCE_DISPLAY_1: u32 = 1 << 2;
    pub const VID_ENABLE: u32 = 1 << 1;
    pub const HOST_ENABLE: u32 = 1 << 0;

    pub const fn virtual_channel(vc: u32) -> u32 {
        (vc & 0x3) << 16
    }

    pub const fn data_format(code: u32) -> u32 {
        (code & 0x3) << 12
    }

    /// Video trigger source field
    pub const VID_TX_TRIG_SOL: u32 = 2 << 8;

    pub const fn num_data_lanes(lanes: u32) -> u32 {
        (lanes.saturating_sub(1) & 0x3) << 4
    }
}

/// STATUS fields
pub mod status_bits {
    pub const RD_FIFO_COUNT_MASK: u32 = 0x3f;
    pub const OVERFLOW_UNDERFLOW_SHIFT: u32 = 8;
    pub const OVERFLOW_UNDERFLOW_MASK: u32 = 0x3;

    pub const fn rd_fifo_count(status: u32) -> u32 {
        status & RD_FIFO_COUNT_MASK
    }

    pub const fn fifo_error(status: u32) -> u32 {
        (status >> OVERFLOW_UNDERFLOW_SHIFT) & OVERFLOW_UNDERFLOW_MASK
    }
}

/// TRIGGER bits
pub mod trigger_bits {
    pub const VIDEO: u32 = 1 << 0;
    pub const HOST: u32 = 1 << 1;
}

/// PAD_CONTROL bits cleared to power the pads up
pub mod pad_bits {
    pub const PDIO: u32 = 0xf;
    pub const PDIO_CLK: u32 = 1 << 8;
    pub const PULLDN_ENAB: u32 = 1 << 24;
}

/// GANGED_MODE_* fields
pub mod ganged_bits {
    pub const ENABLE: u32 = 1 << 0;
    const WIDTH_MASK: u32 = 0x1fff;

    /// GANGED_MODE_SIZE: valid pixels in the low and high halves
    pub const fn size(low: u32, high: u32) -> u32 {
        (low & WIDTH_MASK) | (high & WIDTH_MASK) << 16
    }
}

/// DCS_CMDS opcode slots used by DC-driven command mode
pub mod dcs_cmds_bits {
    /// Opcode for long packet type 5 (first line of a frame)
    pub const fn lt5(cmd: u8) -> u32 {
        (cmd as u32) << 8
    }

    /// Opcode for long packet type 3 (every other line)
    pub const fn lt3(cmd: u8) -> u32 {
        cmd as u32
    }
}

/// Field masks used when saturating computed values
pub mod field {
    pub const PHY_TIMING_MAX: u32 = 0xff;
    pub const TIMEOUT_MAX: u32 = 0xffff;
    pub const PKT_LEN_MAX: u32 = 0xffff;
    pub const PKT_SEQ_SIZE_MASK: u32 = 0x7;
    pub const PKT_SEQ_ID_MASK: u32 = 0x3f;
    /// THSPREPR occupies bits 7:0 of PHY_TIMING_0
    pub const THSPREPR_MASK: u32 = 0xff;
}

// ============================================================================
// DISPLAY CONTROLLER REGISTERS
// ============================================================================

/// Display controller registers touched on behalf of the DSI link
pub mod dc_reg {
    pub const DISP_CLOCK_CONTROL: usize = 0x10b8;

    /// Pixel clock divider field (bits 11:8)
    pub const PIXEL_CLK_DIVIDER_PCD1: u32 = 0 << 8;

    pub const fn shift_clk_divider(div: u32) -> u32 {
        div & 0xff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkt_seq_offsets_interleave() {
        for (slot, (lo, hi)) in dsi_reg::PKT_SEQ.iter().enumerate() {
            assert_eq!(*lo, dsi_reg::PKT_SEQ_0_LO + slot * 8);
            assert_eq!(*hi, lo + 4);
        }
    }

    #[test]
    fn test_control_fields() {
        assert_eq!(control_bits::num_data_lanes(4), 3 << 4);
        assert_eq!(control_bits::num_data_lanes(1), 0);
        assert_eq!(control_bits::virtual_channel(2), 2 << 16);
        assert_eq!(status_bits::rd_fifo_count(0x0000_0305), 5);
        assert_eq!(status_bits::fifo_error(0x0000_0305), 3);
        assert_eq!(ganged_bits::size(600, 600), 0x0258_0258);
        assert_eq!(dcs_cmds_bits::lt5(0x2c) | dcs_cmds_bits::lt3(0x3c), 0x2c3c);
    }
}
