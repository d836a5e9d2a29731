//! AUO E1807 1200x1920 video-mode panel

use once_cell::sync::Lazy;
use tegra_dsi::{
    DataFormat, DeviceTiming, DisplayMode, DsiConfig, HsClockControl, PanelDescriptor, VideoMode,
};

pub static AUO_E1807_PANEL: Lazy<PanelDescriptor> = Lazy::new(|| PanelDescriptor {
    name: "AUO E1807".to_string(),
    description: "WUXGA 8\" video-mode panel, sync-end packets".to_string(),
    controller: 0,
    te_gpio: None,
    mode: DisplayMode {
        width: 1200,
        height: 1920,
        bpp: 24,
        refresh_hz: 60,
        partial: false,
        timing: DeviceTiming {
            h_ref_to_sync: 4,
            v_ref_to_sync: 1,
            h_sync_width: 16,
            v_sync_width: 2,
            h_back_porch: 32,
            v_back_porch: 16,
            h_disp_active: 1200,
            v_disp_active: 1920,
            h_front_porch: 120,
            v_front_porch: 17,
        },
    },
    dsi: DsiConfig {
        data_format: DataFormat::Packed24,
        video_mode: VideoMode::NonBurstSyncEnd,
        data_lanes: 4,
        refresh_rate: 60,
        phy_freq_khz: 162_000,
        lp_command_mode_freq_khz: 4_165,
        hs_command_mode_freq_khz: 20_250,
        hs_clock_control: HsClockControl::Continuous,
        ..DsiConfig::default()
    },
});
