//! # Timing Calculator
//!
//! Pure arithmetic: D-PHY timing registers, start-of-line delay, packet
//! lengths and the display-controller clock split. Nothing here touches
//! hardware except the `write` helpers, which only serialize an already
//! computed value into registers.
//!
//! ```text
//!   tbit  = 10^9 / (2 * freq_khz)          ps, DDR bit period
//!   tbyte = 8 * tbit                        ps
//!   field = ceil(min_ps / tbyte)            saturated to 8 bits
//! ```
//!
//! Every value is saturated to its register field width; nothing wraps.

use crate::config::{
    BytesPerPixel, DataFormat, DeviceTiming, DsiConfig, GangedSplit, VideoMode, VideoModeVariant,
};
use crate::error::{DsiError, DsiResult};
use crate::hal::RegisterBackend;
use crate::regs::{dsi_reg, field};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Byte clocks per timeout counter tick
pub const CYCLE_COUNTER_VALUE: u32 = 512;
pub const HTX_TO_MARGIN: u32 = 720;
pub const LRXH_TO_VALUE: u32 = 0x2000;
pub const PR_TO_VALUE: u32 = 0x2000;
pub const TA_TO_VALUE: u32 = 0x2000;
pub const ULPM_WAKEUP_TIME_MS: u32 = 1;

/// Header, blanking header and checksum bytes carried by each segment
pub const HSYNC_BLNK_PKT_OVERHEAD: u32 = 10;
pub const HBACK_PORCH_PKT_OVERHEAD: u32 = 14;
pub const HFRONT_PORCH_PKT_OVERHEAD: u32 = 8;
/// hsync + hact + hfp headers in ganged mode: 4 + (4+2) + (4+2)
pub const GANGED_HEADER_OVERHEAD: u32 = 16;
/// Trailing length used by DC-driven and ganged programs
pub const PKT_LEN_TRAILER: u32 = 0x0f0f;

pub const DEFAULT_SOL_DELAY: u32 = 24;
pub const MAX_SOL_DELAY: u32 = 480 * 4;
/// SOL-to-valid (4) + valid-to-FIFO (4) + FIFO write (2) pixel clocks
pub const TOT_INTERNAL_PIX_DELAY: u32 = 10;
pub const FIFO_RD_BYTE_CLK_DELAY: u32 = 6;
pub const DC_DRIVEN_GANGED_SOL_EXTRA: u32 = 20;

/// Floor for THS-PREPARE under the continuous-clock WAR
pub const WAR_MIN_THSPREPR_NS: u32 = 300;

// ============================================================================
// D-PHY TIMING
// ============================================================================

fn sat8(v: u64) -> u8 {
    v.min(field::PHY_TIMING_MAX as u64) as u8
}

fn sat16(v: u64) -> u16 {
    v.min(field::TIMEOUT_MAX as u64) as u16
}

/// Bit period in picoseconds
fn tbit_ps(freq_khz: u32) -> u64 {
    1_000_000_000u64 / (2 * freq_khz as u64)
}

/// Byte clocks covering `ps`, rounded up
fn byte_clocks(ps: u64, freq_khz: u32) -> u64 {
    let tbyte = 8 * tbit_ps(freq_khz);
    if tbyte == 0 {
        return u64::MAX;
    }
    ps.div_ceil(tbyte)
}

/// Timeout counter value for `ms` at `freq_khz`
pub fn timeout_value(ms: u32, freq_khz: u32) -> u32 {
    let v = ms as u64 * freq_khz as u64 / CYCLE_COUNTER_VALUE as u64;
    v.min(u32::MAX as u64) as u32
}

/// THS-PREPARE under the continuous-clock WAR: `max(user, 300ns)` in byte
/// clocks, plus one
pub fn war_thsprepr(min_ns: u32, freq_khz: u32) -> u8 {
    if freq_khz == 0 {
        return field::PHY_TIMING_MAX as u8;
    }
    let ns = min_ns.max(WAR_MIN_THSPREPR_NS) as u64;
    sat8(byte_clocks(ns * 1000, freq_khz).saturating_add(1))
}

/// D-PHY, BTA and timeout register values for one link frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyTimingSet {
    pub ths_exit: u8,
    pub ths_trail: u8,
    pub tdat_zero: u8,
    pub ths_prepr: u8,
    pub tclk_trail: u8,
    pub tclk_post: u8,
    pub tclk_zero: u8,
    pub ttlpx: u8,
    pub tclk_prepare: u8,
    pub tclk_pre: u8,
    pub twakeup: u8,
    pub ta_get: u8,
    pub ta_sure: u8,
    pub ta_go: u8,
    pub htx_timeout: u16,
    pub lrxh_timeout: u16,
    pub pr_timeout: u16,
    pub ta_timeout: u16,
}

impl PhyTimingSet {
    /// Every field at its maximum
    pub const fn all_max() -> Self {
        Self {
            ths_exit: u8::MAX,
            ths_trail: u8::MAX,
            tdat_zero: u8::MAX,
            ths_prepr: u8::MAX,
            tclk_trail: u8::MAX,
            tclk_post: u8::MAX,
            tclk_zero: u8::MAX,
            ttlpx: u8::MAX,
            tclk_prepare: u8::MAX,
            tclk_pre: u8::MAX,
            twakeup: u8::MAX,
            ta_get: u8::MAX,
            ta_sure: u8::MAX,
            ta_go: u8::MAX,
            htx_timeout: u16::MAX,
            lrxh_timeout: u16::MAX,
            pr_timeout: u16::MAX,
            ta_timeout: u16::MAX,
        }
    }

    pub fn phy_timing_0(&self) -> u32 {
        (self.ths_exit as u32) << 24
            | (self.ths_trail as u32) << 16
            | (self.tdat_zero as u32) << 8
            | self.ths_prepr as u32
    }

    pub fn phy_timing_1(&self) -> u32 {
        (self.tclk_trail as u32) << 24
            | (self.tclk_post as u32) << 16
            | (self.tclk_zero as u32) << 8
            | self.ttlpx as u32
    }

    pub fn phy_timing_2(&self) -> u32 {
        (self.tclk_prepare as u32) << 16 | (self.tclk_pre as u32) << 8 | self.twakeup as u32
    }

    pub fn bta_timing(&self) -> u32 {
        (self.ta_get as u32) << 16 | (self.ta_sure as u32) << 8 | self.ta_go as u32
    }

    pub fn timeout_0(&self) -> u32 {
        (self.lrxh_timeout as u32) << 16 | self.htx_timeout as u32
    }

    pub fn timeout_1(&self) -> u32 {
        (self.pr_timeout as u32) << 16 | self.ta_timeout as u32
    }

    /// Program PHY, BTA, timeout and tally registers
    pub fn write(&self, regs: &mut dyn RegisterBackend) {
        regs.write(dsi_reg::PHY_TIMING_0, self.phy_timing_0());
        regs.write(dsi_reg::PHY_TIMING_1, self.phy_timing_1());
        regs.write(dsi_reg::PHY_TIMING_2, self.phy_timing_2());
        regs.write(dsi_reg::BTA_TIMING, self.bta_timing());
        regs.write(dsi_reg::TIMEOUT_0, self.timeout_0());
        regs.write(dsi_reg::TIMEOUT_1, self.timeout_1());
        regs.write(dsi_reg::TO_TALLY, 0);
    }
}

/// Derive the full timing set for `freq_khz`
///
/// Panel overrides win over the formulas. The HS transmit timeout is sized
/// to one frame when the controller timing is known, else left at maximum.
pub fn compute_phy_timing(
    config: &DsiConfig,
    freq_khz: u32,
    controller_timing: Option<&DeviceTiming>,
) -> PhyTimingSet {
    if freq_khz == 0 {
        return PhyTimingSet::all_max();
    }

    let tbit = tbit_ps(freq_khz);
    let div = |ps: u64| byte_clocks(ps, freq_khz);
    let twakeup = sat8(timeout_value(ULPM_WAKEUP_TIME_MS, freq_khz) as u64);

    let mut set = match config.phy_timing {
        Some(o) => PhyTimingSet {
            ths_exit: sat8(o.ths_exit as u64),
            ths_trail: sat8(o.ths_trail as u64),
            tdat_zero: sat8(o.tdat_zero as u64),
            ths_prepr: sat8(o.ths_prepr as u64),
            tclk_trail: sat8(o.tclk_trail as u64),
            tclk_post: sat8(o.tclk_post as u64),
            tclk_zero: sat8(o.tclk_zero as u64),
            ttlpx: sat8(o.ttlpx as u64),
            tclk_prepare: sat8(o.tclk_prepr as u64),
            tclk_pre: sat8(o.tclk_pre as u64),
            twakeup,
            ..PhyTimingSet::all_max()
        },
        None => {
            let ths_trail_ps = (8 * tbit).max(60_000 + 4 * tbit);
            PhyTimingSet {
                ths_exit: sat8(div(120_000)),
                ths_trail: sat8(3 + div(ths_trail_ps)),
                tdat_zero: sat8(div(145_000 + 5 * tbit)),
                ths_prepr: sat8(div(65_000 + 5 * tbit).max(1)),
                tclk_trail: sat8(div(80_000)),
                tclk_post: sat8(div(70_000 + 52 * tbit)),
                tclk_zero: sat8(div(260_000)),
                ttlpx: sat8(div(60_000).max(1)),
                tclk_prepare: 0,
                tclk_pre: 0,
                twakeup,
                ..PhyTimingSet::all_max()
            }
        }
    };

    let tlpx = set.ttlpx as u64;
    set.ta_get = sat8(5 * tlpx);
    set.ta_sure = sat8(2 * tlpx);
    set.ta_go = sat8(4 * tlpx);

    set.htx_timeout = match controller_timing {
        Some(t) => {
            let frame = t.htotal() as u64 * t.vtotal() as u64;
            let bpp = config.data_format.bytes_per_pixel();
            let bytes = frame * bpp.mul as u64 / bpp.div as u64;
            let lanes = config.data_lanes.max(1) as u64;
            sat16(bytes / CYCLE_COUNTER_VALUE as u64 / lanes + HTX_TO_MARGIN as u64)
        }
        None => u16::MAX,
    };
    set.lrxh_timeout = LRXH_TO_VALUE as u16;
    set.pr_timeout = if config.panel_reset_timeout_ms != 0 {
        sat16(timeout_value(config.panel_reset_timeout_ms, freq_khz) as u64)
    } else {
        PR_TO_VALUE as u16
    };
    set.ta_timeout = TA_TO_VALUE as u16;
    set
}

// ============================================================================
// START-OF-LINE DELAY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolDelay {
    pub delay: u32,
    /// PHY clock to run at; only differs from the configured one when the
    /// burst delay had to be capped
    pub adjusted_phy_khz: u32,
    pub panel_khz: u32,
}

fn panel_khz(timing: &DeviceTiming, refresh: u32) -> u32 {
    let f = timing.htotal() as u64 * timing.vtotal() as u64 * refresh as u64 / 1000;
    f.min(u32::MAX as u64) as u32
}

fn ganged_sol_delay(inner: VideoMode, bpp: BytesPerPixel, lanes: u32, timing: &DeviceTiming) -> u32 {
    let d = (bpp.div * lanes * 2) as u64;
    let internal = (TOT_INTERNAL_PIX_DELAY as u64 * bpp.mul as u64 / d) as u32 + FIFO_RD_BYTE_CLK_DELAY;
    let htotal_byte = (timing.htotal() as u64 * bpp.mul as u64 / d) as u32;
    let delay = htotal_byte - htotal_byte / 2 + internal;
    if inner == VideoMode::DcDrivenCommand {
        delay + DC_DRIVEN_GANGED_SOL_EXTRA
    } else {
        delay
    }
}

/// Burst-mode delay from the DSI-to-pixel clock ratio (1000x fixed point)
pub fn burst_sol_delay(
    format: DataFormat,
    lanes: u32,
    timing: &DeviceTiming,
    refresh: u32,
    phy_freq_khz: u32,
) -> SolDelay {
    let lanes = lanes.max(1) as u64;
    let panel = panel_khz(timing, refresh);
    if panel == 0 {
        return SolDelay {
            delay: DEFAULT_SOL_DELAY,
            adjusted_phy_khz: phy_freq_khz,
            panel_khz: 0,
        };
    }

    let bpp = format.bytes_per_pixel();
    let panel64 = panel as u64;
    let ratio = (phy_freq_khz as u64 * 2 + panel64 - 1) / panel64 * (1000 / 8);
    let bpp_milli = 1000 * bpp.mul as u64 / bpp.div as u64;
    if ratio * lanes < bpp_milli {
        log::warn!(
            "burst PHY clock {} kHz is below the non-burst rate for {:?}",
            phy_freq_khz,
            format
        );
    }

    let active = timing.h_disp_active as u64;
    let line_to_fp = (timing.htotal() - timing.h_front_porch) as u64;
    let raw = (line_to_fp * ratio)
        .saturating_sub(active * 1000 * bpp.mul as u64 / (bpp.div as u64 * lanes));
    let delay = raw.div_ceil(1000);

    if delay > MAX_SOL_DELAY as u64 {
        let active_bytes = active * bpp.mul as u64 / (bpp.div as u64 * lanes);
        let adjusted = if line_to_fp == 0 {
            phy_freq_khz as u64
        } else {
            ((MAX_SOL_DELAY as u64 + active_bytes) * panel64 / line_to_fp) << 2
        };
        SolDelay {
            delay: MAX_SOL_DELAY,
            adjusted_phy_khz: adjusted.min(u32::MAX as u64) as u32,
            panel_khz: panel,
        }
    } else {
        SolDelay {
            delay: delay as u32,
            adjusted_phy_khz: phy_freq_khz,
            panel_khz: panel,
        }
    }
}

pub fn compute_sol_delay(
    variant: VideoModeVariant,
    format: DataFormat,
    lanes: u32,
    timing: &DeviceTiming,
    refresh: u32,
    phy_freq_khz: u32,
) -> SolDelay {
    let lanes = lanes.max(1);
    let bpp = format.bytes_per_pixel();
    match variant {
        VideoModeVariant::Ganged { inner, .. } => SolDelay {
            delay: ganged_sol_delay(inner, bpp, lanes, timing),
            adjusted_phy_khz: phy_freq_khz,
            panel_khz: panel_khz(timing, refresh),
        },
        VideoModeVariant::Burst => burst_sol_delay(format, lanes, timing, refresh, phy_freq_khz),
        VideoModeVariant::NonBurst
        | VideoModeVariant::NonBurstSyncEnd
        | VideoModeVariant::DcDrivenCommand => SolDelay {
            delay: 8 * bpp.mul / (bpp.div * lanes),
            adjusted_phy_khz: phy_freq_khz,
            panel_khz: panel_khz(timing, refresh),
        },
    }
}

// ============================================================================
// PACKET LENGTHS
// ============================================================================

/// Eight packet length fields, L0..L7
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketLengths(pub [u32; 8]);

impl PacketLengths {
    /// Register words: even length in bits 15:0, odd length in bits 31:16
    pub fn register_words(&self) -> [u32; 4] {
        let l = |i: usize| self.0[i].min(field::PKT_LEN_MAX);
        [
            l(0) | l(1) << 16,
            l(2) | l(3) << 16,
            l(4) | l(5) << 16,
            l(6) | l(7) << 16,
        ]
    }

    pub fn write(&self, regs: &mut dyn RegisterBackend) {
        for (offset, word) in dsi_reg::PKT_LEN.iter().zip(self.register_words()) {
            regs.write(*offset, word);
        }
    }
}

/// Raw per-segment byte counts before overhead is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBytes {
    pub hsync: u32,
    pub back_porch: u32,
    pub active: u32,
    pub front_porch: u32,
}

impl SegmentBytes {
    pub fn of(format: DataFormat, timing: &DeviceTiming) -> Self {
        let bpp = format.bytes_per_pixel();
        Self {
            hsync: bpp.bytes(timing.h_sync_width),
            back_porch: bpp.bytes(timing.h_back_porch),
            active: bpp.bytes(timing.h_disp_active),
            front_porch: bpp.bytes(timing.h_front_porch),
        }
    }
}

fn ganged_packet_lengths(format: DataFormat, timing: &DeviceTiming, instance: usize) -> PacketLengths {
    let bpp = format.bytes_per_pixel();
    let active = timing.h_disp_active;
    let total = timing.htotal();
    let (half_active, half_total) = if instance == 0 {
        (active / 2, total / 2)
    } else {
        (active - active / 2, total - total / 2)
    };

    let mut l = [0u32; 8];
    l[3] = bpp.bytes(half_active);
    l[4] = bpp
        .bytes(half_total)
        .saturating_sub(l[3])
        .saturating_sub(GANGED_HEADER_OVERHEAD);
    l[7] = PKT_LEN_TRAILER;
    PacketLengths(l)
}

pub fn compute_packet_lengths(
    variant: VideoModeVariant,
    format: DataFormat,
    timing: &DeviceTiming,
    instance: usize,
) -> PacketLengths {
    let seg = SegmentBytes::of(format, timing);
    let mut l = [0u32; 8];
    match variant {
        VideoModeVariant::Ganged { .. } => return ganged_packet_lengths(format, timing, instance),
        VideoModeVariant::DcDrivenCommand => {
            l[3] = seg.active + 1;
            l[5] = seg.active + 1;
            l[7] = PKT_LEN_TRAILER;
        }
        VideoModeVariant::Burst | VideoModeVariant::NonBurst | VideoModeVariant::NonBurstSyncEnd => {
            let back_porch = if variant == VideoModeVariant::NonBurstSyncEnd {
                seg.back_porch
            } else {
                seg.back_porch + seg.hsync
            };
            l[1] = seg.hsync.saturating_sub(HSYNC_BLNK_PKT_OVERHEAD);
            l[2] = back_porch.saturating_sub(HBACK_PORCH_PKT_OVERHEAD);
            l[3] = seg.active;
            l[4] = seg.front_porch.saturating_sub(HFRONT_PORCH_PKT_OVERHEAD);
        }
    }
    PacketLengths(l)
}

// ============================================================================
// GANGED PIXEL CORRECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GangedCorrection {
    pub timing: DeviceTiming,
    pub active_corr: u32,
    pub fp_corr: u32,
}

/// Pad the active width so each half is lane-aligned, then grow the front
/// porch until both the pixel and byte totals are lane multiples.
///
/// Both split kinds hand each controller half the active width, so the
/// padding does not depend on the split.
pub fn ganged_pixel_correction(
    timing: &DeviceTiming,
    format: DataFormat,
    lanes: u32,
) -> GangedCorrection {
    let lanes = lanes.max(1);
    let bpp = format.bytes_per_pixel();
    let mut total = timing.htotal();

    let pair = 2 * lanes;
    let rem = timing.h_disp_active % pair;
    let active_corr = if rem != 0 { pair - rem } else { 0 };
    total += active_corr;

    let rem = total % lanes;
    let mut fp_corr = if rem != 0 { lanes - rem } else { 0 };
    total += fp_corr;

    // terminates within four steps for every supported ratio
    for _ in 0..4 * lanes {
        if bpp.bytes(total) % lanes == 0 {
            break;
        }
        total += lanes;
        fp_corr += lanes;
    }

    let mut corrected = *timing;
    corrected.h_disp_active += active_corr;
    corrected.h_front_porch += fp_corr;
    GangedCorrection {
        timing: corrected,
        active_corr,
        fp_corr,
    }
}

/// Pixel count each ganged instance drives: `(start, width)`
pub fn ganged_halves(split: GangedSplit, width: u32, instance: usize) -> (u32, u32) {
    match split {
        GangedSplit::LeftRight => {
            let low = width / 2;
            if instance == 0 {
                (0, low)
            } else {
                (low, width - low)
            }
        }
        GangedSplit::OddEven => (instance as u32, 1),
    }
}

// ============================================================================
// DISPLAY CLOCK
// ============================================================================

/// DSI PLL target and DC pixel clock for video mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayClock {
    pub dsi_khz: u32,
    pub pixel_khz: u32,
    /// DC shift-clock divider
    pub shift_divider: u32,
}

pub fn display_clock_config(
    variant: VideoModeVariant,
    format: DataFormat,
    lanes: u32,
    timing: &DeviceTiming,
    refresh: u32,
    phy_freq_khz: u32,
    force_pclk_div1: bool,
) -> DisplayClock {
    let lanes = lanes.max(1);
    let ganged = variant.is_ganged();
    let burst = matches!(
        variant,
        VideoModeVariant::Burst
            | VideoModeVariant::Ganged {
                inner: VideoMode::Burst,
                ..
            }
    );

    let mut clock = if burst {
        let sol = burst_sol_delay(format, lanes, timing, refresh, phy_freq_khz);
        let divider = if sol.panel_khz == 0 {
            0
        } else {
            let p = sol.panel_khz as u64;
            ((sol.adjusted_phy_khz as u64 * 2 + p - 1) / p).saturating_sub(2) as u32
        };
        DisplayClock {
            dsi_khz: sol.adjusted_phy_khz,
            pixel_khz: sol.panel_khz,
            shift_divider: divider,
        }
    } else {
        let panel = timing.htotal() as u64 * timing.vtotal() as u64 * refresh as u64;
        let l = lanes as u64;
        let (byte_clock, divider) = match (format, ganged) {
            (DataFormat::Packed16, true) => (panel * 2 / l, (16 / (2 * lanes)).saturating_sub(2)),
            (DataFormat::Packed18, true) => (panel * 9 / (4 * l), (18 / (2 * lanes)).saturating_sub(2)),
            (DataFormat::Loose18 | DataFormat::Packed24, true) => {
                (panel * 3 / (2 * l), (24 / (2 * lanes)).saturating_sub(2))
            }
            (DataFormat::Packed16, false) => (panel * 2 / l, (16 / lanes).saturating_sub(2)),
            (DataFormat::Packed18, false) => (panel * 9 / (4 * l), (18 / lanes).saturating_sub(2)),
            (DataFormat::Loose18 | DataFormat::Packed24, false) => {
                (panel * 3 / l, (24 / lanes).saturating_sub(2))
            }
        };
        // the clock driver doubles the request
        let mipi = byte_clock * 8 / 1000 / 2;
        DisplayClock {
            dsi_khz: mipi.min(u32::MAX as u64) as u32,
            pixel_khz: (panel / 1000).min(u32::MAX as u64) as u32,
            shift_divider: divider,
        }
    };

    if force_pclk_div1 {
        clock.shift_divider = if ganged { 0 } else { 1 };
    }
    clock
}

// ============================================================================
// DBI PIXEL FORMATS
// ============================================================================

/// DCS SET_PIXEL_FORMAT code and bytes per pixel for a surface depth
pub fn dbi_pixel_format(bpp: u32) -> DsiResult<(u8, u32)> {
    match bpp {
        3 => Ok((1, 1)),
        8 => Ok((2, 1)),
        12 => Ok((3, 2)),
        16 => Ok((5, 2)),
        18 => Ok((6, 3)),
        24 => Ok((7, 3)),
        _ => Err(DsiError::InvalidArgument(format!("unsupported surface depth {}", bpp))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhyTimingOverride;

    fn lg_timing() -> DeviceTiming {
        DeviceTiming {
            h_ref_to_sync: 1,
            v_ref_to_sync: 1,
            h_sync_width: 4,
            v_sync_width: 4,
            h_back_porch: 82,
            v_back_porch: 7,
            h_disp_active: 720,
            v_disp_active: 1280,
            h_front_porch: 4,
            v_front_porch: 20,
        }
    }

    #[test]
    fn test_phy_timing_at_162mhz() {
        let cfg = DsiConfig::default();
        let set = compute_phy_timing(&cfg, 162_000, None);
        // tbit = 3086ps, tbyte = 24688ps
        assert_eq!(set.ths_exit, 5);
        assert_eq!(set.ths_trail, 3 + 3);
        assert_eq!(set.tdat_zero, 7);
        assert_eq!(set.ths_prepr, 4);
        assert_eq!(set.ttlpx, 3);
        assert_eq!(set.tclk_trail, 4);
        assert_eq!(set.tclk_post, 10);
        assert_eq!(set.tclk_zero, 11);
        assert_eq!(set.ta_get, 15);
        assert_eq!(set.ta_sure, 6);
        assert_eq!(set.ta_go, 12);
        assert_eq!(set.htx_timeout, u16::MAX);
        assert_eq!(set.pr_timeout, PR_TO_VALUE as u16);
        assert_eq!(set.phy_timing_1() & 0xff, 3);
    }

    #[test]
    fn test_phy_timing_minimums_at_low_freq() {
        let set = compute_phy_timing(&DsiConfig::default(), 1_000, None);
        assert_eq!(set.ths_prepr, 1);
        assert_eq!(set.ttlpx, 1);
        assert_eq!(set.ta_get, 5);
    }

    #[test]
    fn test_phy_timing_zero_freq_is_max() {
        let set = compute_phy_timing(&DsiConfig::default(), 0, Some(&lg_timing()));
        assert_eq!(set, PhyTimingSet::all_max());
    }

    #[test]
    fn test_phy_timing_overrides_used_verbatim() {
        let cfg = DsiConfig {
            phy_timing: Some(PhyTimingOverride {
                ths_exit: 9,
                ths_trail: 8,
                tdat_zero: 7,
                ths_prepr: 6,
                tclk_trail: 5,
                tclk_post: 4,
                tclk_zero: 3,
                ttlpx: 2,
                tclk_prepr: 1,
                tclk_pre: 300,
            }),
            ..Default::default()
        };
        let set = compute_phy_timing(&cfg, 162_000, None);
        assert_eq!(set.phy_timing_0(), 0x0908_0706);
        assert_eq!(set.phy_timing_1(), 0x0504_0302);
        assert_eq!(set.tclk_prepare, 1);
        assert_eq!(set.tclk_pre, 0xff);
        assert_eq!(set.bta_timing(), 10 << 16 | 4 << 8 | 8);
    }

    #[test]
    fn test_htx_timeout_from_frame_size() {
        let cfg = DsiConfig {
            data_lanes: 4,
            data_format: DataFormat::Packed24,
            panel_reset_timeout_ms: 202,
            ..Default::default()
        };
        let t = lg_timing();
        let set = compute_phy_timing(&cfg, 162_000, Some(&t));
        let bytes = (t.htotal() * t.vtotal() * 3) as u64;
        let expect = bytes / 512 / 4 + 720;
        assert_eq!(set.htx_timeout as u64, expect);
        assert_eq!(set.pr_timeout as u32, 202 * 162_000 / 512);
        assert_eq!(set.timeout_0(), (LRXH_TO_VALUE << 16) | expect as u32);
    }

    #[test]
    fn test_htx_timeout_saturates() {
        let cfg = DsiConfig {
            data_lanes: 1,
            ..Default::default()
        };
        let huge = DeviceTiming {
            h_disp_active: 8000,
            v_disp_active: 8000,
            ..Default::default()
        };
        let set = compute_phy_timing(&cfg, 162_000, Some(&huge));
        assert_eq!(set.htx_timeout, u16::MAX);
    }

    #[test]
    fn test_packet_lengths_overhead_round_trip() {
        for format in DataFormat::ALL {
            for lanes in 1..=4u32 {
                let t = DeviceTiming {
                    h_sync_width: 10 + lanes,
                    h_back_porch: 40,
                    h_disp_active: 720,
                    h_front_porch: 30,
                    ..lg_timing()
                };
                let seg = SegmentBytes::of(format, &t);
                let l = compute_packet_lengths(VideoModeVariant::NonBurstSyncEnd, format, &t, 0).0;
                assert_eq!(l[1] + HSYNC_BLNK_PKT_OVERHEAD, seg.hsync);
                assert_eq!(l[2] + HBACK_PORCH_PKT_OVERHEAD, seg.back_porch);
                assert_eq!(l[3], seg.active);
                assert_eq!(l[4] + HFRONT_PORCH_PKT_OVERHEAD, seg.front_porch);
            }
        }
    }

    #[test]
    fn test_packet_lengths_hsync_16bpp() {
        let t = DeviceTiming {
            h_sync_width: 10,
            ..lg_timing()
        };
        let l = compute_packet_lengths(VideoModeVariant::NonBurst, DataFormat::Packed16, &t, 0).0;
        assert_eq!(l[1], 10);
        // back porch carries the sync width outside sync-end mode
        assert_eq!(l[2], (82 + 10) * 2 - HBACK_PORCH_PKT_OVERHEAD);
        assert_eq!(l[6], 0);
        assert_eq!(l[7], 0);
    }

    #[test]
    fn test_packet_lengths_saturate_small_segments() {
        let t = DeviceTiming {
            h_sync_width: 2,
            h_front_porch: 1,
            ..lg_timing()
        };
        let l = compute_packet_lengths(VideoModeVariant::NonBurstSyncEnd, DataFormat::Packed16, &t, 0).0;
        assert_eq!(l[1], 0);
        assert_eq!(l[4], 0);
    }

    #[test]
    fn test_packet_lengths_dc_driven() {
        let l = compute_packet_lengths(
            VideoModeVariant::DcDrivenCommand,
            DataFormat::Packed24,
            &lg_timing(),
            0,
        );
        assert_eq!(l.0, [0, 0, 0, 2161, 0, 2161, 0, 0x0f0f]);
        assert_eq!(
            l.register_words(),
            [0, 2161 << 16, 2161 << 16, 0x0f0f << 16]
        );
    }

    #[test]
    fn test_ganged_packet_lengths_split_remainder() {
        let t = DeviceTiming {
            h_disp_active: 1201,
            ..lg_timing()
        };
        let v = VideoModeVariant::Ganged {
            split: GangedSplit::LeftRight,
            inner: VideoMode::NonBurst,
        };
        let left = compute_packet_lengths(v, DataFormat::Packed24, &t, 0).0;
        let right = compute_packet_lengths(v, DataFormat::Packed24, &t, 1).0;
        assert_eq!(left[3], 600 * 3);
        assert_eq!(right[3], 601 * 3);
        let total = t.htotal();
        assert_eq!(left[4], (total / 2) * 3 - left[3] - GANGED_HEADER_OVERHEAD);
        assert_eq!(left[7], PKT_LEN_TRAILER);
    }

    #[test]
    fn test_non_burst_sol_delay() {
        let t = lg_timing();
        let d = |f, lanes| compute_sol_delay(VideoModeVariant::NonBurst, f, lanes, &t, 60, 0).delay;
        assert_eq!(d(DataFormat::Packed16, 2), 8);
        assert_eq!(d(DataFormat::Packed18, 4), 4);
        assert_eq!(d(DataFormat::Packed24, 4), 6);
        assert_eq!(d(DataFormat::Loose18, 3), 8);
    }

    #[test]
    fn test_non_burst_sol_delay_non_increasing_in_lanes() {
        let t = lg_timing();
        for format in DataFormat::ALL {
            let mut prev = u32::MAX;
            for lanes in 1..=4 {
                let d = compute_sol_delay(VideoModeVariant::NonBurst, format, lanes, &t, 60, 0).delay;
                assert!(d <= prev);
                prev = d;
            }
        }
    }

    #[test]
    fn test_burst_sol_delay_monotonic_in_lanes() {
        let t = lg_timing();
        for format in DataFormat::ALL {
            let mut prev = 0;
            for lanes in 1..=4 {
                let sol = compute_sol_delay(VideoModeVariant::Burst, format, lanes, &t, 60, 500_000);
                assert!(sol.delay >= prev, "{:?} lanes {}", format, lanes);
                assert!(sol.delay <= MAX_SOL_DELAY);
                prev = sol.delay;
            }
        }
    }

    #[test]
    fn test_burst_sol_delay_caps_and_adjusts_clock() {
        let t = lg_timing();
        let sol = compute_sol_delay(VideoModeVariant::Burst, DataFormat::Packed24, 4, &t, 60, 2_000_000);
        assert_eq!(sol.delay, MAX_SOL_DELAY);
        let panel = sol.panel_khz as u64;
        let line = (t.htotal() - t.h_front_porch) as u64;
        let expect = ((1920 + 720 * 3 / 4) * panel / line) << 2;
        assert_eq!(sol.adjusted_phy_khz as u64, expect);
    }

    #[test]
    fn test_burst_sol_delay_zero_panel_freq() {
        let sol = compute_sol_delay(
            VideoModeVariant::Burst,
            DataFormat::Packed24,
            4,
            &DeviceTiming::default(),
            60,
            162_000,
        );
        assert_eq!(sol.delay, DEFAULT_SOL_DELAY);
        assert_eq!(sol.adjusted_phy_khz, 162_000);
    }

    #[test]
    fn test_ganged_sol_delay() {
        let t = lg_timing();
        let v = VideoModeVariant::Ganged {
            split: GangedSplit::LeftRight,
            inner: VideoMode::NonBurst,
        };
        let sol = compute_sol_delay(v, DataFormat::Packed24, 4, &t, 60, 0);
        let htot_byte = t.htotal() * 3 / 8;
        assert_eq!(sol.delay, htot_byte - htot_byte / 2 + 30 / 8 + 6);

        let v = VideoModeVariant::Ganged {
            split: GangedSplit::LeftRight,
            inner: VideoMode::DcDrivenCommand,
        };
        assert_eq!(compute_sol_delay(v, DataFormat::Packed24, 4, &t, 60, 0).delay, sol.delay + 20);
    }

    #[test]
    fn test_ganged_correction_conserves_pixels() {
        for format in DataFormat::ALL {
            for lanes in 1..=4u32 {
                for active in [1200u32, 1201, 1202, 1203, 1077, 2560] {
                    let t = DeviceTiming {
                        h_disp_active: active,
                        ..lg_timing()
                    };
                    let c = ganged_pixel_correction(&t, format, lanes);
                    let a = c.timing.h_disp_active;
                    assert_eq!(a, active + c.active_corr);
                    let (_, left) = ganged_halves(GangedSplit::LeftRight, a, 0);
                    let (_, right) = ganged_halves(GangedSplit::LeftRight, a, 1);
                    assert_eq!(left + right, active + c.active_corr);
                    assert_eq!(left % lanes, 0);
                    assert_eq!(right % lanes, 0);
                    let total = c.timing.htotal();
                    assert_eq!(total % lanes, 0);
                    assert_eq!(format.bytes_per_pixel().bytes(total) % lanes, 0);
                }
            }
        }
    }

    #[test]
    fn test_display_clock_non_burst() {
        let t = lg_timing();
        let c = display_clock_config(VideoModeVariant::NonBurst, DataFormat::Packed24, 4, &t, 60, 0, false);
        let panel = (t.htotal() * t.vtotal() * 60) as u64;
        assert_eq!(c.pixel_khz as u64, panel / 1000);
        assert_eq!(c.dsi_khz as u64, panel * 3 / 4 * 8 / 1000 / 2);
        assert_eq!(c.shift_divider, 4);

        let forced = display_clock_config(VideoModeVariant::NonBurst, DataFormat::Packed24, 4, &t, 60, 0, true);
        assert_eq!(forced.shift_divider, 1);
    }

    #[test]
    fn test_display_clock_ganged_divider() {
        let t = lg_timing();
        let v = VideoModeVariant::Ganged {
            split: GangedSplit::LeftRight,
            inner: VideoMode::NonBurst,
        };
        let c = display_clock_config(v, DataFormat::Packed24, 4, &t, 60, 0, false);
        assert_eq!(c.shift_divider, 1);
        let forced = display_clock_config(v, DataFormat::Packed24, 4, &t, 60, 0, true);
        assert_eq!(forced.shift_divider, 0);
    }

    #[test]
    fn test_war_thsprepr() {
        // 300ns at 162 MHz = ceil(300000 / 24688) = 13, plus one
        assert_eq!(war_thsprepr(0, 162_000), 14);
        assert_eq!(war_thsprepr(500, 162_000), 22);
        assert_eq!(war_thsprepr(100_000, 162_000), 0xff);
    }

    #[test]
    fn test_dbi_pixel_format() {
        assert_eq!(dbi_pixel_format(16).unwrap(), (5, 2));
        assert_eq!(dbi_pixel_format(24).unwrap(), (7, 3));
        assert!(dbi_pixel_format(32).is_err());
    }
}
