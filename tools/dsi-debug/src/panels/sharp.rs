//! Sharp 320x480 command-mode panel
//!
//! Frame memory lives on the panel; updates go through DCS memory writes
//! in HS.

use once_cell::sync::Lazy;
use tegra_dsi::{
    DataFormat, DeviceTiming, DisplayMode, DsiConfig, HsClockControl, PanelDescriptor, VideoMode,
};

pub static SHARP_HVGA_PANEL: Lazy<PanelDescriptor> = Lazy::new(|| PanelDescriptor {
    name: "Sharp HVGA".to_string(),
    description: "320x480 command-mode panel with frame memory".to_string(),
    controller: 0,
    te_gpio: None,
    mode: DisplayMode {
        width: 320,
        height: 480,
        bpp: 24,
        refresh_hz: 60,
        partial: false,
        timing: DeviceTiming {
            h_ref_to_sync: 11,
            v_ref_to_sync: 1,
            h_sync_width: 4,
            v_sync_width: 1,
            h_back_porch: 64,
            v_back_porch: 1,
            h_disp_active: 320,
            v_disp_active: 480,
            h_front_porch: 64,
            v_front_porch: 10,
        },
    },
    dsi: DsiConfig {
        data_format: DataFormat::Packed24,
        video_mode: VideoMode::NonBurst,
        data_lanes: 2,
        refresh_rate: 60,
        phy_freq_khz: 80_220,
        lp_command_mode_freq_khz: 20_000,
        hs_command_mode_freq_khz: 50_000,
        hs_support_for_frame_buffer: true,
        hs_clock_control: HsClockControl::TxOnly,
        ..DsiConfig::default()
    },
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharp_profile() {
        let panel = &*SHARP_HVGA_PANEL;
        assert_eq!(panel.dsi.data_lanes, 2);
        assert!(panel.dsi.hs_support_for_frame_buffer);
        assert_eq!(panel.dsi.hs_clock_control, HsClockControl::TxOnly);
    }
}
