//! LG 720x1280 video-mode panel

use once_cell::sync::Lazy;
use tegra_dsi::{
    DataFormat, DeviceTiming, DisplayMode, DsiConfig, HsClockControl, PanelDescriptor, VideoMode,
};

pub static LG_720P_PANEL: Lazy<PanelDescriptor> = Lazy::new(|| PanelDescriptor {
    name: "LG 720p".to_string(),
    description: "720x1280 non-burst video-mode panel".to_string(),
    controller: 0,
    te_gpio: None,
    mode: DisplayMode {
        width: 720,
        height: 1280,
        bpp: 24,
        refresh_hz: 60,
        partial: false,
        timing: DeviceTiming {
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
        },
    },
    dsi: DsiConfig {
        data_format: DataFormat::Packed24,
        video_mode: VideoMode::NonBurst,
        data_lanes: 4,
        refresh_rate: 60,
        phy_freq_khz: 162_000,
        lp_command_mode_freq_khz: 4_165,
        hs_command_mode_freq_khz: 20_250,
        hs_clock_control: HsClockControl::Continuous,
        ..DsiConfig::default()
    },
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lg_profile() {
        let panel = &*LG_720P_PANEL;
        assert_eq!(panel.mode.timing.htotal(), 810);
        assert_eq!(panel.mode.timing.vtotal(), 1311);
        assert!(!panel.dsi.is_ganged());
    }
}
