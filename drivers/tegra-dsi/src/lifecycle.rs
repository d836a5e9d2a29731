//! # Lifecycle Manager
//!
//! [`DsiContext`] owns both transport instances and the collaborators they
//! share, and exposes the public transport entry points.
//!
//! ```text
//! Uninitialized --trans_init--> Ready --enable--> Enabled
//!       ^                         |  \               |
//!       |                         |   trans_enable_command_mode
//!       +------trans_deinit-------+------disable-----+
//! ```
//!
//! Each instance slot is a `Mutex<Option<TransportInstance>>`; `None` is the
//! uninitialized state. Ping and frame updates additionally take the frame
//! lock, always before the instance lock.
//!
//! Ganged panels drive instances 0 and 1 as one. Their setup is sequenced
//! here and must not race with another ganged setup.

use std::sync::{Mutex, MutexGuard};

use log::{debug, info, warn};

use crate::config::PanelDescriptor;
use crate::error::{DsiError, DsiResult};
use crate::hal::Services;
use crate::packet::PacketDescriptor;
use crate::timing::dbi_pixel_format;
use crate::transport::{PartialRegion, TransportInstance};

/// Number of DSI controllers on the SoC
pub const MAX_INSTANCES: usize = 2;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Source origin of an update, in surface pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Update rectangle; `top`/`bottom` also bound the partial area
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Outcome of a ping that reached the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResponse {
    Success { len: usize },
    ReadAckError { len: usize },
    InvalidResponse { header: u8, len: usize },
    NoReadResponse,
}

/// Link configuration a diagnostic mode switch selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagMode {
    /// Video path driven by the display controller
    DcDrivenCommand,
    /// Host FIFO owns the link
    Command,
}

/// Both DSI instances plus the services they share
pub struct DsiContext {
    services: Services,
    instances: [Mutex<Option<TransportInstance>>; MAX_INSTANCES],
    frame_lock: Mutex<()>,
}

impl DsiContext {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            instances: [Mutex::new(None), Mutex::new(None)],
            frame_lock: Mutex::new(()),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn slot(&self, instance: usize) -> DsiResult<MutexGuard<'_, Option<TransportInstance>>> {
        self.instances
            .get(instance)
            .map(lock)
            .ok_or(DsiError::InvalidInstance(instance))
    }

    fn with_instance<T, F>(&self, instance: usize, f: F) -> DsiResult<T>
    where
        F: FnOnce(&mut TransportInstance, &Services) -> DsiResult<T>,
    {
        let mut slot = self.slot(instance)?;
        let inst = slot.as_mut().ok_or(DsiError::NotInitialized(instance))?;
        f(inst, &self.services)
    }

    /// Instances a panel occupies
    fn targets(panel: &PanelDescriptor, instance: usize) -> Vec<usize> {
        if panel.dsi.is_ganged() {
            (0..MAX_INSTANCES).collect()
        } else {
            vec![instance]
        }
    }

    pub fn is_initialized(&self, instance: usize) -> bool {
        self.slot(instance).map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn is_enabled(&self, instance: usize) -> bool {
        self.slot(instance)
            .map(|s| s.as_ref().is_some_and(|i| i.is_enabled()))
            .unwrap_or(false)
    }

    // ========================================================================
    // INIT / DEINIT
    // ========================================================================

    /// Bring the panel's instance(s) to the ready state. Idempotent.
    pub fn trans_init(&self, panel: &PanelDescriptor, instance: usize, flags: u32) -> DsiResult<()> {
        panel.validate()?;
        debug!("trans_init '{}' instance {} flags {:#x}", panel.name, instance, flags);

        for i in Self::targets(panel, instance) {
            self.init_instance(panel, i)?;
        }
        if let Some(split) = panel.variant().ganged_split() {
            for i in 0..MAX_INSTANCES {
                self.with_instance(i, |inst, svc| inst.program_ganged(svc, split))?;
            }
        }
        Ok(())
    }

    fn init_instance(&self, panel: &PanelDescriptor, instance: usize) -> DsiResult<()> {
        let mut slot = self.slot(instance)?;
        if slot.is_some() {
            return Ok(());
        }

        let regs = self.services.mapper.map(instance)?;
        let mut inst = TransportInstance::new(instance, panel, regs);
        let result = inst.bring_up(&self.services).and_then(|()| match panel.te_gpio {
            Some(pin) => inst.attach_te(&*self.services.gpio, pin),
            None => Ok(()),
        });

        if let Err(e) = result {
            warn!("dsi{}: init failed, unwinding: {}", instance, e);
            inst.shutdown(&self.services);
            self.services.mapper.unmap(instance);
            return Err(e);
        }

        info!(
            "dsi{}: ready for '{}' at {} kHz",
            instance,
            panel.name,
            inst.phy_freq_khz()
        );
        *slot = Some(inst);
        Ok(())
    }

    /// Tear the panel's instance(s) down. Safe on any state.
    pub fn trans_deinit(&self, panel: &PanelDescriptor, instance: usize) -> DsiResult<()> {
        for i in Self::targets(panel, instance) {
            self.deinit_instance(i)?;
        }
        Ok(())
    }

    fn deinit_instance(&self, instance: usize) -> DsiResult<()> {
        let mut slot = self.slot(instance)?;
        if let Some(mut inst) = slot.take() {
            inst.shutdown(&self.services);
            self.services.mapper.unmap(instance);
            info!("dsi{}: released", instance);
        }
        Ok(())
    }

    // ========================================================================
    // ENABLE / DISABLE
    // ========================================================================

    /// Start video on the panel's instance(s), initializing first if needed
    pub fn enable(&self, controller: usize, panel: &PanelDescriptor, instance: usize) -> DsiResult<()> {
        panel.validate()?;
        for i in Self::targets(panel, instance) {
            self.init_instance(panel, i)?;
            self.with_instance(i, |inst, svc| {
                inst.bind_controller(controller);
                inst.enable_video(svc)
            })?;
        }
        if let Some(split) = panel.variant().ganged_split() {
            for i in 0..MAX_INSTANCES {
                self.with_instance(i, |inst, svc| inst.program_ganged(svc, split))?;
            }
        }
        Ok(())
    }

    /// Stop DC output into DSI, then deinit
    pub fn disable(&self, panel: &PanelDescriptor, instance: usize) -> DsiResult<()> {
        for i in Self::targets(panel, instance) {
            {
                let slot = self.slot(i)?;
                if let Some(inst) = slot.as_ref().filter(|inst| inst.is_enabled()) {
                    self.services.display.set_dsi_output(inst.controller(), false);
                }
            }
            self.deinit_instance(i)?;
        }
        Ok(())
    }

    /// Re-enable video, stopping DC output first for partial mode
    pub fn switch_mode(
        &self,
        controller: usize,
        panel: &PanelDescriptor,
        instance: usize,
        partial: bool,
    ) -> DsiResult<()> {
        if partial {
            self.services.display.wait_for_vblank(controller);
            self.services.display.set_dsi_output(controller, false);
        }
        self.enable(controller, panel, instance)
    }

    // ========================================================================
    // TRANSPORT ENTRY POINTS
    // ========================================================================

    pub fn trans_enable_command_mode(&self, _panel: &PanelDescriptor, instance: usize) -> DsiResult<()> {
        self.with_instance(instance, |inst, svc| inst.enable_command_mode(svc))
    }

    pub fn trans_write(
        &self,
        _panel: &PanelDescriptor,
        command: u8,
        reg: u8,
        data: &[u8],
        instance: usize,
        is_long: bool,
    ) -> DsiResult<()> {
        let packet = PacketDescriptor {
            command,
            reg,
            payload: data,
            long: is_long,
        };
        self.with_instance(instance, |inst, svc| inst.write_command(svc, &packet))
    }

    /// DCS read into `buf`, returning the bytes copied
    pub fn trans_read(
        &self,
        _panel: &PanelDescriptor,
        reg: u8,
        buf: &mut [u8],
        instance: usize,
        is_long: bool,
    ) -> DsiResult<usize> {
        self.with_instance(instance, |inst, svc| inst.read_command(svc, reg, buf, is_long))
    }

    /// Push a `width` x `height` surface region to panel memory
    #[allow(clippy::too_many_arguments)]
    pub fn trans_update(
        &self,
        _panel: &PanelDescriptor,
        surface: &[u8],
        width: u32,
        height: u32,
        bpp: u32,
        src: Point,
        instance: usize,
        update: Rect,
    ) -> DsiResult<()> {
        if width == 0 || height == 0 {
            return Err(DsiError::InvalidArgument(format!(
                "empty update {}x{}",
                width, height
            )));
        }
        let (_, bytes_pp) = dbi_pixel_format(bpp)?;
        let size = width as usize * height as usize * bytes_pp as usize;
        let data = surface.get(..size).ok_or_else(|| {
            DsiError::InvalidArgument(format!(
                "surface holds {} bytes, update needs {}",
                surface.len(),
                size
            ))
        })?;

        let (right, bottom) = match (src.x.checked_add(width - 1), src.y.checked_add(height)) {
            (Some(right), Some(bottom)) => (right, bottom),
            _ => {
                return Err(DsiError::InvalidArgument(format!(
                    "update {}x{} at ({}, {}) leaves the address space",
                    width, height, src.x, src.y
                )))
            }
        };
        let region = PartialRegion {
            top_bar: update.top,
            bot_bar: update.bottom,
            left: src.x,
            right,
            top: src.y,
            bottom,
            bits_per_pixel: bpp,
        };

        let _frame = lock(&self.frame_lock);
        self.with_instance(instance, |inst, svc| inst.command_mode_update(svc, &region, data))
    }

    /// Current link rate; 0 when the instance is not initialized
    pub fn trans_get_phy_freq(&self, _panel: &PanelDescriptor, instance: usize) -> DsiResult<u32> {
        let slot = self.slot(instance)?;
        Ok(slot.as_ref().map_or(0, |inst| inst.phy_freq_khz()))
    }

    /// LP register read with video state saved and restored around it
    ///
    /// Panel-side read failures come back as a [`ReadResponse`]; transport
    /// failures are errors.
    pub fn trans_ping(
        &self,
        _panel: &PanelDescriptor,
        reg: u8,
        buf: &mut [u8],
        instance: usize,
        flags: u32,
    ) -> DsiResult<ReadResponse> {
        debug!("dsi{}: ping {:#04x} flags {:#x}", instance, reg, flags);
        let _frame = lock(&self.frame_lock);
        match self.with_instance(instance, |inst, svc| inst.ping(svc, reg, buf)) {
            Ok(len) => Ok(ReadResponse::Success { len }),
            Err(DsiError::ReadAckError { len }) => Ok(ReadResponse::ReadAckError { len }),
            Err(DsiError::ReadInvalidResponse { header, len }) => {
                Ok(ReadResponse::InvalidResponse { header, len })
            }
            Err(DsiError::NoReadResponse(_)) => Ok(ReadResponse::NoReadResponse),
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // DIAGNOSTICS
    // ========================================================================
    //
    // Each waits one frame on `controller` before acting.

    pub fn test_init(&self, controller: usize, panel: &PanelDescriptor, instance: usize) -> DsiResult<()> {
        self.services.display.wait_for_vblank(controller);
        self.trans_init(panel, instance, 0)
    }

    pub fn test_set_mode(
        &self,
        controller: usize,
        panel: &PanelDescriptor,
        instance: usize,
        mode: DiagMode,
    ) -> DsiResult<()> {
        self.services.display.wait_for_vblank(controller);
        match mode {
            DiagMode::DcDrivenCommand => {
                self.disable(panel, instance)?;
                self.enable(controller, panel, instance)
            }
            DiagMode::Command => self.trans_enable_command_mode(panel, instance),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn test_send_command(
        &self,
        controller: usize,
        panel: &PanelDescriptor,
        instance: usize,
        command: u8,
        reg: u8,
        data: &[u8],
        is_long: bool,
    ) -> DsiResult<()> {
        self.services.display.wait_for_vblank(controller);
        self.trans_write(panel, command, reg, data, instance, is_long)
    }

    /// Ping with panel-side failures turned back into errors
    pub fn test_read(
        &self,
        controller: usize,
        panel: &PanelDescriptor,
        instance: usize,
        reg: u8,
        buf: &mut [u8],
    ) -> DsiResult<usize> {
        self.services.display.wait_for_vblank(controller);
        match self.trans_ping(panel, reg, buf, instance, 0)? {
            ReadResponse::Success { len } => Ok(len),
            ReadResponse::ReadAckError { len } => Err(DsiError::ReadAckError { len }),
            ReadResponse::InvalidResponse { header, len } => {
                Err(DsiError::ReadInvalidResponse { header, len })
            }
            ReadResponse::NoReadResponse => Err(DsiError::NoReadResponse(0)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn test_update(
        &self,
        controller: usize,
        panel: &PanelDescriptor,
        instance: usize,
        surface: &[u8],
        width: u32,
        height: u32,
        bpp: u32,
        src: Point,
        update: Rect,
    ) -> DsiResult<()> {
        self.services.display.wait_for_vblank(controller);
        self.trans_update(panel, surface, width, height, bpp, src, instance, update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DataFormat, DeviceTiming, DisplayMode, DsiConfig, DsiDisplayMode, GangedSplit,
        HsClockControl,
    };
    use crate::hal::ClockModule;
    use crate::mock::{self, MockHandles};
    use crate::regs::{dsi_reg, ganged_bits};
    use crate::transport::HOST_FIFO_DEPTH;
    use std::sync::Arc;
    use std::thread;

    fn panel() -> PanelDescriptor {
        PanelDescriptor {
            name: "smart".into(),
            description: "command-mode test panel".into(),
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
                data_lanes: 2,
                phy_freq_khz: 80_220,
                lp_command_mode_freq_khz: 20_000,
                hs_command_mode_freq_khz: 50_000,
                hs_clock_control: HsClockControl::TxOnly,
                ..DsiConfig::default()
            },
        }
    }

    fn ganged_panel() -> PanelDescriptor {
        let mut p = panel();
        p.mode.timing.h_disp_active = 1200;
        p.dsi.data_lanes = 4;
        p.dsi.display_mode = DsiDisplayMode::Ganged;
        p.dsi.ganged_split = GangedSplit::LeftRight;
        p
    }

    fn context() -> (DsiContext, MockHandles) {
        let (svc, handles) = mock::services();
        (DsiContext::new(svc), handles)
    }

    #[test]
    fn test_init_is_idempotent() {
        let (ctx, h) = context();
        let p = panel();
        ctx.trans_init(&p, 0, 0).unwrap();
        ctx.trans_init(&p, 0, 0).unwrap();

        assert!(ctx.is_initialized(0));
        assert!(!ctx.is_initialized(1));
        assert!(h.mapper.is_mapped(0));
        assert_eq!(h.clock.enable_count(ClockModule::Dsi(0)), 1);
        assert_eq!(ctx.trans_get_phy_freq(&p, 0), Ok(20_000));
    }

    #[test]
    fn test_init_unwinds_on_clock_failure() {
        let (ctx, h) = context();
        h.clock.set_fail_configure(true);
        assert!(matches!(ctx.trans_init(&panel(), 0, 0), Err(DsiError::Clock(_))));
        assert!(!ctx.is_initialized(0));
        assert!(!h.mapper.is_mapped(0));
        assert!(!h.clock.is_enabled(ClockModule::Host));
    }

    #[test]
    fn test_init_unwinds_on_te_failure() {
        let (ctx, h) = context();
        let mut p = panel();
        p.te_gpio = Some(33);
        h.gpio.set_fail_register(true);

        assert!(matches!(ctx.trans_init(&p, 0, 0), Err(DsiError::Gpio(_))));
        assert!(!ctx.is_initialized(0));
        assert!(!h.mapper.is_mapped(0));
        assert!(!h.clock.is_enabled(ClockModule::Dsi(0)));
        assert_eq!(h.registers(0).value(dsi_reg::POWER_CONTROL), 0);
    }

    #[test]
    fn test_init_mapping_failure() {
        let (ctx, h) = context();
        h.mapper.set_fail(true);
        assert!(matches!(ctx.trans_init(&panel(), 1, 0), Err(DsiError::Mapping(_))));
        assert!(!ctx.is_initialized(1));
    }

    #[test]
    fn test_uninitialized_and_invalid_instances() {
        let (ctx, _h) = context();
        let p = panel();
        assert_eq!(
            ctx.trans_write(&p, 0x05, 0x29, &[], 0, false),
            Err(DsiError::NotInitialized(0))
        );
        assert_eq!(ctx.trans_get_phy_freq(&p, 1), Ok(0));
        assert_eq!(
            ctx.trans_enable_command_mode(&p, 2),
            Err(DsiError::InvalidInstance(2))
        );
        assert_eq!(ctx.trans_deinit(&p, 0), Ok(()));
    }

    #[test]
    fn test_dual_mode_rejected() {
        let (ctx, _h) = context();
        let mut p = panel();
        p.dsi.display_mode = DsiDisplayMode::Dual;
        assert!(matches!(ctx.trans_init(&p, 0, 0), Err(DsiError::Config(_))));
    }

    #[test]
    fn test_write_and_read_through_context() {
        let (ctx, h) = context();
        let p = panel();
        ctx.trans_init(&p, 0, 0).unwrap();
        ctx.trans_enable_command_mode(&p, 0).unwrap();
        let regs = h.registers(0);
        regs.take_fifo_words();

        ctx.trans_write(&p, 0x05, 0x11, &[], 0, false).unwrap();
        assert_eq!(regs.take_fifo_words(), vec![0x0000_1105]);

        regs.respond_to_bta(&[0x0000_1c22]);
        let mut buf = [0u8; 2];
        assert_eq!(ctx.trans_read(&p, 0xdb, &mut buf, 0, false), Ok(2));
        assert_eq!(buf, [0x1c, 0x00]);
    }

    #[test]
    fn test_ping_reports_panel_responses() {
        let (ctx, h) = context();
        let p = panel();
        ctx.trans_init(&p, 0, 0).unwrap();
        let regs = h.registers(0);

        regs.respond_to_bta(&[0x0000_9c21]);
        let mut buf = [0u8; 1];
        assert_eq!(
            ctx.trans_ping(&p, 0x0a, &mut buf, 0, 0),
            Ok(ReadResponse::Success { len: 1 })
        );
        assert_eq!(buf[0], 0x9c);

        regs.respond_to_bta(&[0x0000_0102]);
        let mut buf = [0u8; 2];
        assert_eq!(
            ctx.trans_ping(&p, 0x0a, &mut buf, 0, 0),
            Ok(ReadResponse::ReadAckError { len: 2 })
        );

        assert_eq!(
            ctx.trans_ping(&p, 0x0a, &mut buf, 0, 0),
            Ok(ReadResponse::NoReadResponse)
        );
        assert_eq!(
            ctx.test_read(0, &p, 0, 0x0a, &mut buf),
            Err(DsiError::NoReadResponse(0))
        );
        assert_eq!(h.display.vblank_waits(), 1);
    }

    #[test]
    fn test_update_window_from_source_point() {
        let (ctx, h) = context();
        let p = panel();
        ctx.trans_init(&p, 0, 0).unwrap();
        ctx.trans_enable_command_mode(&p, 0).unwrap();
        let regs = h.registers(0);
        regs.take_fifo_words();

        let surface = vec![0u8; 2 * 2 * 3];
        ctx.trans_update(
            &p,
            &surface,
            2,
            2,
            24,
            Point { x: 10, y: 20 },
            0,
            Rect::default(),
        )
        .unwrap();

        let words = regs.take_fifo_words();
        // SET_COLUMN_ADDRESS 10..=11
        let col = words.iter().position(|w| *w == 0x000a_002a).unwrap();
        assert_eq!(words[col + 1], 0x0000_000b);
        // SET_PAGE_ADDRESS 20..22
        let page = words.iter().position(|w| *w == 0x0014_002b).unwrap();
        assert_eq!(words[page + 1], 0x0000_0016);

        assert!(matches!(
            ctx.trans_update(&p, &surface[..5], 2, 2, 24, Point::default(), 0, Rect::default()),
            Err(DsiError::InvalidArgument(_))
        ));

        // window past the end of the address space is refused, nothing sent
        let far = Point { x: u32::MAX, y: 0 };
        assert!(matches!(
            ctx.trans_update(&p, &surface, 2, 2, 24, far, 0, Rect::default()),
            Err(DsiError::InvalidArgument(_))
        ));
        let far = Point { x: 0, y: u32::MAX - 1 };
        assert!(matches!(
            ctx.trans_update(&p, &surface, 2, 2, 24, far, 0, Rect::default()),
            Err(DsiError::InvalidArgument(_))
        ));
        assert!(regs.take_fifo_words().is_empty());
    }

    #[test]
    fn test_enable_then_disable() {
        let (ctx, h) = context();
        let p = panel();
        ctx.enable(1, &p, 0).unwrap();
        assert!(ctx.is_enabled(0));
        assert!(h.display.dsi_output(1));
        assert_eq!(h.pads.calibrated(), vec![0]);
        assert!(h
            .clock
            .configured()
            .iter()
            .any(|(m, _)| *m == ClockModule::Display(1)));

        ctx.disable(&p, 0).unwrap();
        assert!(!ctx.is_initialized(0));
        assert!(!h.display.dsi_output(1));
        assert!(!h.mapper.is_mapped(0));
    }

    #[test]
    fn test_ganged_enable_programs_both_halves() {
        let (ctx, h) = context();
        let p = ganged_panel();
        ctx.enable(0, &p, 0).unwrap();

        assert!(ctx.is_enabled(0));
        assert!(ctx.is_enabled(1));
        let left = h.registers(0);
        let right = h.registers(1);
        assert_eq!(left.value(dsi_reg::GANGED_MODE_START), 0);
        assert_eq!(right.value(dsi_reg::GANGED_MODE_START), 600);
        assert_eq!(right.value(dsi_reg::GANGED_MODE_SIZE), ganged_bits::size(600, 600));
        assert_eq!(left.value(dsi_reg::GANGED_MODE_CONTROL), ganged_bits::ENABLE);

        ctx.trans_deinit(&p, 0).unwrap();
        assert!(!ctx.is_initialized(0));
        assert!(!ctx.is_initialized(1));
    }

    #[test]
    fn test_deinit_releases_te() {
        let (ctx, h) = context();
        let mut p = panel();
        p.te_gpio = Some(5);
        ctx.trans_init(&p, 0, 0).unwrap();
        assert_eq!(h.gpio.registered(), vec![5]);

        ctx.trans_deinit(&p, 0).unwrap();
        ctx.trans_deinit(&p, 0).unwrap();
        assert_eq!(h.gpio.released(), vec![5]);
        assert!(!h.clock.is_enabled(ClockModule::Dsi(0)));
    }

    #[test]
    fn test_switch_mode_partial_stops_output_first() {
        let (ctx, h) = context();
        let p = panel();
        ctx.switch_mode(0, &p, 0, true).unwrap();
        assert_eq!(h.display.vblank_waits(), 1);
        assert!(h.display.dsi_output(0));
        assert!(ctx.is_enabled(0));
    }

    #[test]
    fn test_diagnostic_mode_switches() {
        let (ctx, h) = context();
        let p = panel();
        ctx.test_init(0, &p, 0).unwrap();
        ctx.test_set_mode(0, &p, 0, DiagMode::Command).unwrap();
        assert_eq!(h.registers(0).value(dsi_reg::MAX_THRESHOLD), HOST_FIFO_DEPTH);

        ctx.test_set_mode(0, &p, 0, DiagMode::DcDrivenCommand).unwrap();
        assert!(ctx.is_enabled(0));
        ctx.test_send_command(0, &p, 0, 0x05, 0x29, &[], false).unwrap();
        assert_eq!(h.display.vblank_waits(), 4);
    }

    #[test]
    fn test_instances_are_independent_across_threads() {
        let (ctx, h) = context();
        let p = panel();
        ctx.trans_init(&p, 0, 0).unwrap();
        ctx.trans_init(&p, 1, 0).unwrap();
        h.registers(0).take_fifo_words();
        h.registers(1).take_fifo_words();

        let ctx = Arc::new(ctx);
        let workers: Vec<_> = (0..MAX_INSTANCES)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                let p = p.clone();
                thread::spawn(move || {
                    for n in 0..10u8 {
                        ctx.trans_write(&p, 0x15, 0x36, &[n], i, false).unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(h.registers(0).take_fifo_words().len(), 10);
        assert_eq!(h.registers(1).take_fifo_words().len(), 10);
    }
}
