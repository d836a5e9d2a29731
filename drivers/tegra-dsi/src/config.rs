//! Panel descriptor and DSI link configuration
//!
//! A [`PanelDescriptor`] is everything the transport needs to know about one
//! panel: its display mode and horizontal/vertical timing, plus the DSI link
//! settings in [`DsiConfig`]. Descriptors round-trip through TOML so board
//! bring-up can tweak a panel without rebuilding.
//!
//! The raw video mode and display mode are folded into a single
//! [`VideoModeVariant`], which is what every other module matches on.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DsiError, DsiResult, FatalFault};

/// Default low-power / high-speed command clock when the panel leaves it unset
pub const DEFAULT_COMMAND_FREQ_KHZ: u32 = 50_000;
pub const DEFAULT_REFRESH_RATE: u32 = 60;
/// Ceiling for the clock used while bringing the link up under the PLL WAR
pub const MAX_INIT_DSI_CLK_KHZ: u32 = 1_200;
pub const MAX_DATA_LANES: u32 = 4;
pub const MAX_VIRTUAL_CHANNEL: u32 = 3;
/// Largest horizontal or vertical timing value a panel may declare
pub const MAX_TIMING_VALUE: u32 = 0xffff;

// ============================================================================
// PIXEL FORMAT
// ============================================================================

/// Pixel data format on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// 16 bpp, packed
    Packed16,
    /// 18 bpp, one pixel per 3 bytes
    Loose18,
    /// 18 bpp, packed (9 bytes per 4 pixels)
    Packed18,
    /// 24 bpp
    Packed24,
}

/// Bytes-per-pixel as a `mul / div` ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytesPerPixel {
    pub mul: u32,
    pub div: u32,
}

impl BytesPerPixel {
    /// Byte count for `pixels` pixels, rounded down
    pub fn bytes(self, pixels: u32) -> u32 {
        let b = pixels as u64 * self.mul as u64 / self.div as u64;
        b.min(u32::MAX as u64) as u32
    }
}

impl DataFormat {
    pub const ALL: [DataFormat; 4] = [
        DataFormat::Packed16,
        DataFormat::Loose18,
        DataFormat::Packed18,
        DataFormat::Packed24,
    ];

    /// Decode the board-file numbering (1 = 16P, 2 = 18NP, 3 = 18P, 4 = 24P)
    pub fn from_raw(raw: u32) -> DsiResult<Self> {
        match raw {
            1 => Ok(DataFormat::Packed16),
            2 => Ok(DataFormat::Loose18),
            3 => Ok(DataFormat::Packed18),
            4 => Ok(DataFormat::Packed24),
            _ => {
                log::error!("unknown DSI data format {}", raw);
                Err(DsiError::FatalHardwareFault(FatalFault::UnknownDataFormat))
            }
        }
    }

    pub fn bytes_per_pixel(self) -> BytesPerPixel {
        match self {
            DataFormat::Packed16 => BytesPerPixel { mul: 2, div: 1 },
            DataFormat::Loose18 => BytesPerPixel { mul: 3, div: 1 },
            DataFormat::Packed18 => BytesPerPixel { mul: 9, div: 4 },
            DataFormat::Packed24 => BytesPerPixel { mul: 3, div: 1 },
        }
    }

    /// DSI_CONTROL data-format field value
    pub fn control_code(self) -> u32 {
        match self {
            DataFormat::Packed16 => 0,
            DataFormat::Loose18 => 1,
            DataFormat::Packed18 => 2,
            DataFormat::Packed24 => 3,
        }
    }

    pub fn bits_per_pixel(self) -> u32 {
        match self {
            DataFormat::Packed16 => 16,
            DataFormat::Loose18 | DataFormat::Packed18 => 18,
            DataFormat::Packed24 => 24,
        }
    }
}

// ============================================================================
// MODE ENUMS
// ============================================================================

/// Video mode as configured on the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoMode {
    Burst,
    NonBurst,
    NonBurstSyncEnd,
    /// Command-mode panel refreshed by the display controller
    DcDrivenCommand,
}

/// How many controllers drive the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DsiDisplayMode {
    Normal,
    /// Two independent panels, not supported by the transport
    Dual,
    /// One panel split across both DSI instances
    Ganged,
}

/// Pixel distribution between the two ganged instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GangedSplit {
    LeftRight,
    OddEven,
}

/// HS clock-lane policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HsClockControl {
    Continuous,
    TxOnly,
    /// Continuous clock with a THS-PREPARE override during bring-up
    ContinuousThspreprWar,
    /// As above, and the PLL is lowered while THS-PREPARE is zeroed
    ContinuousThspreprPllWar,
}

impl HsClockControl {
    pub fn is_war(self) -> bool {
        matches!(
            self,
            HsClockControl::ContinuousThspreprWar | HsClockControl::ContinuousThspreprPllWar
        )
    }
}

/// The one mode selector consumed by timing, sequencing and lifecycle code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoModeVariant {
    Burst,
    NonBurst,
    NonBurstSyncEnd,
    DcDrivenCommand,
    Ganged { split: GangedSplit, inner: VideoMode },
}

impl VideoModeVariant {
    pub fn is_dc_driven(self) -> bool {
        matches!(
            self,
            VideoModeVariant::DcDrivenCommand
                | VideoModeVariant::Ganged {
                    inner: VideoMode::DcDrivenCommand,
                    ..
                }
        )
    }

    pub fn is_ganged(self) -> bool {
        matches!(self, VideoModeVariant::Ganged { .. })
    }

    pub fn ganged_split(self) -> Option<GangedSplit> {
        match self {
            VideoModeVariant::Ganged { split, .. } => Some(split),
            _ => None,
        }
    }
}

// ============================================================================
// DSI CONFIGURATION
// ============================================================================

/// Explicit D-PHY timing from the panel datasheet, in byte clocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhyTimingOverride {
    pub ths_exit: u32,
    pub ths_trail: u32,
    pub tdat_zero: u32,
    pub ths_prepr: u32,
    pub tclk_trail: u32,
    pub tclk_post: u32,
    pub tclk_zero: u32,
    pub ttlpx: u32,
    pub tclk_prepr: u32,
    pub tclk_pre: u32,
}

/// DSI link settings for one panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DsiConfig {
    pub data_format: DataFormat,
    pub video_mode: VideoMode,
    pub virtual_channel: u32,
    pub data_lanes: u32,
    /// Hz; 0 selects the default
    pub refresh_rate: u32,
    /// Video-mode PHY clock in kHz
    pub phy_freq_khz: u32,
    /// 0 keeps the hardware default peripheral-reset timeout
    pub panel_reset_timeout_ms: u32,
    pub lp_command_mode_freq_khz: u32,
    pub hs_command_mode_freq_khz: u32,
    /// Push frame-buffer updates in HS rather than LP
    pub hs_support_for_frame_buffer: bool,
    pub hs_clock_control: HsClockControl,
    pub war_min_thsprepr_ns: u32,
    pub war_max_init_dsi_clk_khz: u32,
    /// Keep the HS bit on in command mode
    pub enable_hs_clock_in_lp_mode: bool,
    pub display_mode: DsiDisplayMode,
    pub ganged_split: GangedSplit,
    pub phy_timing: Option<PhyTimingOverride>,
}

impl Default for DsiConfig {
    fn default() -> Self {
        Self {
            data_format: DataFormat::Packed24,
            video_mode: VideoMode::NonBurst,
            virtual_channel: 0,
            data_lanes: 4,
            refresh_rate: DEFAULT_REFRESH_RATE,
            phy_freq_khz: 0,
            panel_reset_timeout_ms: 0,
            lp_command_mode_freq_khz: DEFAULT_COMMAND_FREQ_KHZ,
            hs_command_mode_freq_khz: DEFAULT_COMMAND_FREQ_KHZ,
            hs_support_for_frame_buffer: false,
            hs_clock_control: HsClockControl::TxOnly,
            war_min_thsprepr_ns: 0,
            war_max_init_dsi_clk_khz: MAX_INIT_DSI_CLK_KHZ,
            enable_hs_clock_in_lp_mode: false,
            display_mode: DsiDisplayMode::Normal,
            ganged_split: GangedSplit::LeftRight,
            phy_timing: None,
        }
    }
}

impl DsiConfig {
    /// Copy with unset values replaced by driver defaults
    pub fn normalized(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.lp_command_mode_freq_khz == 0 {
            cfg.lp_command_mode_freq_khz = DEFAULT_COMMAND_FREQ_KHZ;
        }
        if cfg.hs_command_mode_freq_khz == 0 {
            cfg.hs_command_mode_freq_khz = DEFAULT_COMMAND_FREQ_KHZ;
        }
        if cfg.refresh_rate == 0 {
            cfg.refresh_rate = DEFAULT_REFRESH_RATE;
        }
        if cfg.war_max_init_dsi_clk_khz == 0 || cfg.war_max_init_dsi_clk_khz > MAX_INIT_DSI_CLK_KHZ
        {
            cfg.war_max_init_dsi_clk_khz = MAX_INIT_DSI_CLK_KHZ;
        }
        cfg
    }

    pub fn validate(&self) -> DsiResult<()> {
        if self.data_lanes == 0 || self.data_lanes > MAX_DATA_LANES {
            return Err(DsiError::Config(format!(
                "data lanes must be 1..={}, got {}",
                MAX_DATA_LANES, self.data_lanes
            )));
        }
        if self.virtual_channel > MAX_VIRTUAL_CHANNEL {
            return Err(DsiError::Config(format!(
                "virtual channel must be 0..={}, got {}",
                MAX_VIRTUAL_CHANNEL, self.virtual_channel
            )));
        }
        if self.display_mode == DsiDisplayMode::Dual {
            return Err(DsiError::Config("dual display mode is not supported".into()));
        }
        Ok(())
    }

    pub fn video_variant(&self) -> VideoModeVariant {
        if self.display_mode == DsiDisplayMode::Ganged {
            return VideoModeVariant::Ganged {
                split: self.ganged_split,
                inner: self.video_mode,
            };
        }
        match self.video_mode {
            VideoMode::Burst => VideoModeVariant::Burst,
            VideoMode::NonBurst => VideoModeVariant::NonBurst,
            VideoMode::NonBurstSyncEnd => VideoModeVariant::NonBurstSyncEnd,
            VideoMode::DcDrivenCommand => VideoModeVariant::DcDrivenCommand,
        }
    }

    pub fn is_ganged(&self) -> bool {
        self.display_mode == DsiDisplayMode::Ganged
    }
}

// ============================================================================
// PANEL TIMING
// ============================================================================

/// Horizontal/vertical timing in pixels and lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceTiming {
    pub h_ref_to_sync: u32,
    pub v_ref_to_sync: u32,
    pub h_sync_width: u32,
    pub v_sync_width: u32,
    pub h_back_porch: u32,
    pub v_back_porch: u32,
    pub h_disp_active: u32,
    pub v_disp_active: u32,
    pub h_front_porch: u32,
    pub v_front_porch: u32,
}

impl DeviceTiming {
    /// Saturates at `u32::MAX`; `validate` keeps loaded panels far below it
    pub fn htotal(&self) -> u32 {
        self.h_sync_width
            .saturating_add(self.h_back_porch)
            .saturating_add(self.h_disp_active)
            .saturating_add(self.h_front_porch)
    }

    pub fn vtotal(&self) -> u32 {
        self.v_sync_width
            .saturating_add(self.v_back_porch)
            .saturating_add(self.v_disp_active)
            .saturating_add(self.v_front_porch)
    }

    fn fields(&self) -> [(&'static str, u32); 10] {
        [
            ("h_ref_to_sync", self.h_ref_to_sync),
            ("v_ref_to_sync", self.v_ref_to_sync),
            ("h_sync_width", self.h_sync_width),
            ("v_sync_width", self.v_sync_width),
            ("h_back_porch", self.h_back_porch),
            ("v_back_porch", self.v_back_porch),
            ("h_disp_active", self.h_disp_active),
            ("v_disp_active", self.v_disp_active),
            ("h_front_porch", self.h_front_porch),
            ("v_front_porch", self.v_front_porch),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub refresh_hz: u32,
    /// Panel runs in partial-display mode
    #[serde(default)]
    pub partial: bool,
    pub timing: DeviceTiming,
}

/// Complete panel description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Display controller feeding the panel
    #[serde(default)]
    pub controller: usize,
    /// GPIO carrying the tearing-effect signal
    #[serde(default)]
    pub te_gpio: Option<u32>,
    pub mode: DisplayMode,
    pub dsi: DsiConfig,
}

impl PanelDescriptor {
    pub fn from_toml_str(s: &str) -> DsiResult<Self> {
        let panel: PanelDescriptor =
            toml::from_str(s).map_err(|e| DsiError::Config(e.to_string()))?;
        panel.validate()?;
        Ok(panel)
    }

    pub fn to_toml_string(&self) -> DsiResult<String> {
        toml::to_string_pretty(self).map_err(|e| DsiError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> DsiResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DsiError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: &Path) -> DsiResult<()> {
        let text = self.to_toml_string()?;
        fs::write(path, text).map_err(|e| DsiError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> DsiResult<()> {
        self.dsi.validate()?;
        if self.mode.timing.h_disp_active == 0 || self.mode.timing.v_disp_active == 0 {
            return Err(DsiError::Config(format!(
                "panel '{}' has an empty active area",
                self.name
            )));
        }
        for (field, value) in self.mode.timing.fields() {
            if value > MAX_TIMING_VALUE {
                return Err(DsiError::Config(format!(
                    "panel '{}': {} = {} exceeds {}",
                    self.name, field, value, MAX_TIMING_VALUE
                )));
            }
        }
        Ok(())
    }

    pub fn variant(&self) -> VideoModeVariant {
        self.dsi.video_variant()
    }
}
