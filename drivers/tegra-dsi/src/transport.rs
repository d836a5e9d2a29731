//! # Transport Engine
//!
//! Moves command bytes to and from the panel through the host FIFO, turns
//! the link around for reads, and brings video transmission up or down.
//!
//! Every operation takes `&mut TransportInstance` (the caller holds the
//! instance lock) plus the shared [`Services`].
//!
//! ```text
//! write:  clock gate -> FIFO guard -> ready? -> WR_DATA* [-> EOT] -> TRIGGER -> ready?
//! read:   clock gate -> FIFO guard -> empty? -> MAX_RETURN -> DCS_READ -> BTA
//!         -> sample RD_FIFO count -> drain -> classify header -> copy out
//! ```
//!
//! Two scoped guards keep the hardware consistent on every exit path:
//!
//! | Guard            | Acquire                                  | Drop                 |
//! |------------------|------------------------------------------|----------------------|
//! | `HostClockGate`  | enable host clock                        | disable host clock   |
//! | `HostFifoGuard`  | snapshot HOST/DSI control, select host   | restore both         |

use std::borrow::Cow;
use std::ops::{Deref, DerefMut};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error, trace, warn};

use crate::config::{
    DeviceTiming, DisplayMode, DsiConfig, GangedSplit, HsClockControl, PanelDescriptor, VideoMode,
    VideoModeVariant,
};
use crate::error::{DsiError, DsiResult, FatalFault};
use crate::hal::{
    poll_until, ClockModule, ClockService, Delay, FreqRange, GpioService, RegisterBackend,
    Services, TeSignal,
};
use crate::packet::{
    classify_response, data_type, dcs, dcs_read_word, is_benign_bta_reply, max_return_size_word,
    PacketDescriptor, ResponseKind, EOT_WORD,
};
use crate::regs::{
    control_bits, dc_reg, dcs_cmds_bits, dsi_reg, field, ganged_bits, host_bits, pad_bits,
    power_bits, status_bits, trigger_bits,
};
use crate::sequencer::build_program;
use crate::timing::{
    compute_packet_lengths, compute_phy_timing, compute_sol_delay, dbi_pixel_format,
    display_clock_config, ganged_halves, ganged_pixel_correction, war_thsprepr, DisplayClock,
    DEFAULT_SOL_DELAY,
};

// ============================================================================
// FIFO GEOMETRY AND WAIT BOUNDS
// ============================================================================

/// Host FIFO depth in words
pub const HOST_FIFO_DEPTH: u32 = 64;
/// Video FIFO depth in words
pub const VIDEO_FIFO_DEPTH: u32 = 480;
pub const HOST_FIFO_DEPTH_BYTES: usize = HOST_FIFO_DEPTH as usize * 4;
pub const VIDEO_FIFO_DEPTH_BYTES: usize = VIDEO_FIFO_DEPTH as usize * 4;
pub const READ_FIFO_DEPTH_BYTES: usize = 128;
pub const MAX_READ_WORDS: u32 = (READ_FIFO_DEPTH_BYTES / 4) as u32;

pub const COMMAND_DELAY_STEP_US: u32 = 1_000;
pub const MAX_COMMAND_DELAY_US: u32 = 250_000;
/// Settle after a host trigger completes
pub const COMMAND_COMPLETION_DELAY_US: u32 = 5;

pub const STATUS_POLL_STEP_US: u32 = 5;
pub const STATUS_POLL_CEILING_US: u32 = 5_000;

pub const READ_FIFO_SAMPLE_STEP_US: u32 = 1_000;
pub const READ_FIFO_SAMPLE_CEILING_US: u32 = 5_000;

pub const POWER_CONTROL_SETTLE_US: u32 = 7;
pub const POWER_CONTROL_STEP_US: u32 = 1;
pub const POWER_CONTROL_CEILING_US: u32 = 1_000;

pub const CLOCK_ENABLE_ATTEMPTS: u32 = 5;
pub const TE_WAIT_TIMEOUT_MS: u32 = 100;
pub const WAR_SETTLE_MS: u32 = 1;

const DUMPED_REGISTERS: &[(&str, usize)] = &[
    ("POWER_CONTROL", dsi_reg::POWER_CONTROL),
    ("HOST_DSI_CONTROL", dsi_reg::HOST_DSI_CONTROL),
    ("DSI_CONTROL", dsi_reg::DSI_CONTROL),
    ("SOL_DELAY", dsi_reg::SOL_DELAY),
    ("MAX_THRESHOLD", dsi_reg::MAX_THRESHOLD),
    ("TRIGGER", dsi_reg::TRIGGER),
    ("STATUS", dsi_reg::STATUS),
    ("PHY_TIMING_0", dsi_reg::PHY_TIMING_0),
    ("PHY_TIMING_1", dsi_reg::PHY_TIMING_1),
    ("PHY_TIMING_2", dsi_reg::PHY_TIMING_2),
    ("BTA_TIMING", dsi_reg::BTA_TIMING),
    ("TIMEOUT_0", dsi_reg::TIMEOUT_0),
    ("TIMEOUT_1", dsi_reg::TIMEOUT_1),
    ("PAD_CONTROL", dsi_reg::PAD_CONTROL),
];

// ============================================================================
// GUARDS
// ============================================================================

/// Host interface clock held on for the guard's lifetime
pub struct HostClockGate<'a> {
    clock: &'a dyn ClockService,
}

impl<'a> HostClockGate<'a> {
    pub fn acquire(clock: &'a dyn ClockService) -> DsiResult<Self> {
        clock.enable(ClockModule::Host)?;
        Ok(Self { clock })
    }
}

impl Drop for HostClockGate<'_> {
    fn drop(&mut self) {
        self.clock.disable(ClockModule::Host);
    }
}

/// Routes the host FIFO to the link while video owns it
///
/// When host control is already active nothing is touched. Otherwise
/// HOST_DSI_CONTROL and DSI_CONTROL are snapshotted, the host trigger is set
/// to immediate, host enable is set, video and DCS enable are cleared, and
/// both registers are written back on drop.
pub struct HostFifoGuard<'a> {
    inst: &'a mut TransportInstance,
    saved: Option<(u32, u32)>,
}

impl<'a> HostFifoGuard<'a> {
    pub fn acquire(inst: &'a mut TransportInstance) -> Self {
        let saved = if inst.host_ctrl_enabled {
            None
        } else {
            let host = inst.regs.read(dsi_reg::HOST_DSI_CONTROL);
            let ctrl = inst.regs.read(dsi_reg::DSI_CONTROL);
            inst.regs.write(
                dsi_reg::HOST_DSI_CONTROL,
                (host & !host_bits::TX_TRIG_MASK) | host_bits::TX_TRIG_IMMEDIATE,
            );
            inst.regs.write(
                dsi_reg::DSI_CONTROL,
                (ctrl & !(control_bits::VID_ENABLE | control_bits::DCS_ENABLE))
                    | control_bits::HOST_ENABLE,
            );
            Some((host, ctrl))
        };
        Self { inst, saved }
    }
}

impl Deref for HostFifoGuard<'_> {
    type Target = TransportInstance;

    fn deref(&self) -> &TransportInstance {
        &*self.inst
    }
}

impl DerefMut for HostFifoGuard<'_> {
    fn deref_mut(&mut self) -> &mut TransportInstance {
        &mut *self.inst
    }
}

impl Drop for HostFifoGuard<'_> {
    fn drop(&mut self) {
        if let Some((host, ctrl)) = self.saved.take() {
            self.inst.regs.write(dsi_reg::HOST_DSI_CONTROL, host);
            self.inst.regs.write(dsi_reg::DSI_CONTROL, ctrl);
        }
    }
}

// ============================================================================
// PARTIAL UPDATE REGION
// ============================================================================

/// Window and partial area for a command-mode frame push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialRegion {
    pub top_bar: u32,
    pub bot_bar: u32,
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
    pub bits_per_pixel: u32,
}

/// Swap every byte pair of a 16bpp surface to panel order
pub fn swap_16bpp(data: &[u8]) -> DsiResult<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(DsiError::InvalidArgument(format!(
            "16bpp surface has odd length {}",
            data.len()
        )));
    }
    let mut out = data.to_vec();
    for pair in out.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
    Ok(out)
}

fn be16(v: u32) -> [u8; 2] {
    [(v >> 8) as u8, v as u8]
}

// ============================================================================
// TRANSPORT INSTANCE
// ============================================================================

/// Runtime state of one DSI controller
pub struct TransportInstance {
    instance: usize,
    controller: usize,
    config: DsiConfig,
    mode: DisplayMode,
    /// Timing the display controller scans out, set on enable
    controller_timing: Option<DeviceTiming>,
    phy_freq_khz: u32,
    in_hs_mode: bool,
    host_ctrl_enabled: bool,
    enabled: bool,
    dsi_clock_on: bool,
    te: Option<Box<dyn TeSignal>>,
    te_pin: Option<u32>,
    regs: Box<dyn RegisterBackend + Send>,
}

impl TransportInstance {
    pub fn new(instance: usize, panel: &PanelDescriptor, regs: Box<dyn RegisterBackend + Send>) -> Self {
        Self {
            instance,
            controller: panel.controller,
            config: panel.dsi.normalized(),
            mode: panel.mode.clone(),
            controller_timing: None,
            phy_freq_khz: 0,
            in_hs_mode: false,
            host_ctrl_enabled: false,
            enabled: false,
            dsi_clock_on: false,
            te: None,
            te_pin: None,
            regs,
        }
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn controller(&self) -> usize {
        self.controller
    }

    /// Display controller that feeds this instance from now on
    pub fn bind_controller(&mut self, controller: usize) {
        self.controller = controller;
    }

    pub fn config(&self) -> &DsiConfig {
        &self.config
    }

    pub fn phy_freq_khz(&self) -> u32 {
        self.phy_freq_khz
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn host_control_active(&self) -> bool {
        self.host_ctrl_enabled
    }

    pub fn in_high_speed(&self) -> bool {
        self.in_hs_mode
    }

    pub fn has_te(&self) -> bool {
        self.te.is_some()
    }

    fn variant(&self) -> VideoModeVariant {
        self.config.video_variant()
    }

    // ------------------------------------------------------------------------
    // Low-level helpers
    // ------------------------------------------------------------------------

    fn wait_command_ready(&mut self, delay: &dyn Delay) -> bool {
        let regs = &mut self.regs;
        poll_until(delay, COMMAND_DELAY_STEP_US, MAX_COMMAND_DELAY_US, || {
            regs.read(dsi_reg::TRIGGER) == 0
        })
        .is_ready()
    }

    fn trigger_host(&mut self, delay: &dyn Delay) -> DsiResult<()> {
        self.regs.write(dsi_reg::TRIGGER, trigger_bits::HOST);
        if !self.wait_command_ready(delay) {
            warn!("dsi{}: host trigger did not complete", self.instance);
            return Err(DsiError::TriggerTimeout);
        }
        delay.wait_us(COMMAND_COMPLETION_DELAY_US);
        Ok(())
    }

    fn read_fifo_words(&mut self) -> u32 {
        status_bits::rd_fifo_count(self.regs.read(dsi_reg::STATUS))
    }

    fn ensure_read_fifo_empty(&mut self) -> DsiResult<()> {
        match self.read_fifo_words() {
            0 => Ok(()),
            words => {
                warn!("dsi{}: read FIFO holds {} words", self.instance, words);
                Err(DsiError::FifoNotEmptyAtStart { words })
            }
        }
    }

    /// Reprogram PHY/BTA/timeout registers for the current link rate
    fn program_phy_timing(&mut self, with_frame: bool) {
        let frame = if with_frame {
            self.controller_timing.as_ref()
        } else {
            None
        };
        let set = compute_phy_timing(&self.config, self.phy_freq_khz, frame);
        set.write(&mut *self.regs);
        debug!(
            "dsi{}: PHY timing @ {} kHz: {:#010x} {:#010x} {:#010x}",
            self.instance,
            self.phy_freq_khz,
            set.phy_timing_0(),
            set.phy_timing_1(),
            set.phy_timing_2()
        );
    }

    fn set_thsprepr(&mut self, value: u8) {
        self.regs
            .modify(dsi_reg::PHY_TIMING_0, field::THSPREPR_MASK, value as u32);
    }

    fn set_hs_clock_control(&mut self, clk: u32) {
        self.regs
            .modify(dsi_reg::DSI_CONTROL, control_bits::HS_CLK_MASK, clk);
    }

    /// Run the DSI clock at `khz` and retime the PHY without a frame bound
    fn set_command_clock(&mut self, svc: &Services, khz: u32) -> DsiResult<()> {
        self.phy_freq_khz = svc
            .clock
            .configure(ClockModule::Dsi(self.instance), khz, None)?;
        self.program_phy_timing(false);
        Ok(())
    }

    /// Write POWER_CONTROL until it reads back
    fn set_power(&mut self, delay: &dyn Delay, on: bool) -> DsiResult<()> {
        let value = if on { power_bits::LEG_DSI_ENABLE } else { 0 };
        let regs = &mut self.regs;
        let outcome = poll_until(delay, POWER_CONTROL_STEP_US, POWER_CONTROL_CEILING_US, || {
            regs.write(dsi_reg::POWER_CONTROL, value);
            regs.read(dsi_reg::POWER_CONTROL) == value
        });
        if !outcome.is_ready() {
            error!("dsi{}: POWER_CONTROL stuck, wanted {:#x}", self.instance, value);
            return Err(FatalFault::PowerControlStuck.into());
        }
        Ok(())
    }

    pub fn dump_registers(&mut self, label: &str) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        debug!("dsi{} registers ({})", self.instance, label);
        for (name, offset) in DUMPED_REGISTERS {
            let value = self.regs.read(*offset);
            debug!("  {:<18} [{:#05x}] = {:#010x}", name, offset, value);
        }
    }

    // ------------------------------------------------------------------------
    // Command writes
    // ------------------------------------------------------------------------

    fn send_words(&mut self, delay: &dyn Delay, words: &[u32]) -> DsiResult<()> {
        if !self.wait_command_ready(delay) {
            warn!("dsi{}: host FIFO busy before send", self.instance);
            return Err(DsiError::HardwareBusyTimeout);
        }
        for word in words {
            self.regs.write(dsi_reg::WR_DATA, *word);
        }
        if self.in_hs_mode {
            self.regs.write(dsi_reg::WR_DATA, EOT_WORD);
        }
        self.trigger_host(delay)
    }

    /// Send one short or long packet through the host FIFO
    pub fn write_command(&mut self, svc: &Services, packet: &PacketDescriptor) -> DsiResult<()> {
        let words = packet.encode(self.config.virtual_channel)?;
        let _gate = HostClockGate::acquire(&*svc.clock)?;
        let mut inst = HostFifoGuard::acquire(self);
        inst.send_words(&*svc.delay, &words)
    }

    fn write_dcs_long(&mut self, svc: &Services, cmd: u8, payload: &[u8]) -> DsiResult<()> {
        self.write_command(svc, &PacketDescriptor::long(data_type::LONG_WRITE, cmd, payload))
    }

    fn write_display_power(&mut self, svc: &Services, on: bool) -> DsiResult<()> {
        let reg = if on {
            dcs::SET_DISPLAY_ON
        } else {
            dcs::SET_DISPLAY_OFF
        };
        self.write_command(svc, &PacketDescriptor::short(data_type::DCS_SHORT_WRITE, reg, &[]))
    }

    // ------------------------------------------------------------------------
    // Bus turn-around
    // ------------------------------------------------------------------------

    fn turn_around(&mut self, delay: &dyn Delay) -> DsiResult<()> {
        self.regs
            .modify(dsi_reg::HOST_DSI_CONTROL, 0, host_bits::IMM_BTA);
        let regs = &mut self.regs;
        let outcome = poll_until(delay, STATUS_POLL_STEP_US, STATUS_POLL_CEILING_US, || {
            regs.read(dsi_reg::HOST_DSI_CONTROL) & host_bits::IMM_BTA == 0
        });
        if !outcome.is_ready() {
            warn!("dsi{}: BTA did not complete", self.instance);
            return Err(DsiError::BtaTimeout);
        }
        Ok(())
    }

    /// Sample the read FIFO count until the response window closes
    fn sample_read_fifo(&mut self, delay: &dyn Delay) -> DsiResult<u32> {
        let regs = &mut self.regs;
        let mut status = 0;
        poll_until(delay, READ_FIFO_SAMPLE_STEP_US, READ_FIFO_SAMPLE_CEILING_US, || {
            status = regs.read(dsi_reg::STATUS);
            status_bits::rd_fifo_count(status) as usize * 4 > READ_FIFO_DEPTH_BYTES
        });
        let count = status_bits::rd_fifo_count(status);
        if count as usize * 4 > READ_FIFO_DEPTH_BYTES || status_bits::fifo_error(status) != 0 {
            warn!("dsi{}: read FIFO fault, status {:#010x}", self.instance, status);
            return Err(DsiError::ReadFifoFull { status });
        }
        Ok(count)
    }

    /// Turn the bus around and accept only an empty or benign reply
    ///
    /// The host FIFO owns the link for the turn-around; video and DC-driven
    /// control are restored afterwards.
    pub fn bta_check_error(&mut self, delay: &dyn Delay) -> DsiResult<()> {
        let mut inst = HostFifoGuard::acquire(self);
        inst.bta_locked(delay)
    }

    fn bta_locked(&mut self, delay: &dyn Delay) -> DsiResult<()> {
        self.ensure_read_fifo_empty()?;
        self.turn_around(delay)?;
        let count = self.sample_read_fifo(delay)?;
        if count == 0 {
            return Ok(());
        }
        let words: Vec<u32> = (0..count).map(|_| self.regs.read(dsi_reg::RD_DATA)).collect();
        if is_benign_bta_reply(&words) {
            return Ok(());
        }
        warn!("dsi{}: BTA returned {:08x?}", self.instance, words);
        Err(DsiError::BtaProtocolError {
            word_count: count,
            first_word: words.first().copied().unwrap_or(0),
        })
    }

    // ------------------------------------------------------------------------
    // Command reads
    // ------------------------------------------------------------------------

    /// DCS read of `reg` into `out`, returning the bytes copied
    ///
    /// Acknowledge/error reports and unknown headers still fill `out` before
    /// the error is returned.
    pub fn read_command(
        &mut self,
        svc: &Services,
        reg: u8,
        out: &mut [u8],
        is_long: bool,
    ) -> DsiResult<usize> {
        if out.is_empty() {
            return Err(DsiError::InvalidArgument("empty read buffer".into()));
        }
        trace!(
            "dsi{}: read {:#04x}, {} bytes, long={}",
            self.instance,
            reg,
            out.len(),
            is_long
        );
        let _gate = HostClockGate::acquire(&*svc.clock)?;
        let mut inst = HostFifoGuard::acquire(self);
        inst.read_locked(&*svc.delay, reg, out)
    }

    fn send_control_word(&mut self, delay: &dyn Delay, word: u32) -> DsiResult<()> {
        self.regs.write(dsi_reg::WR_DATA, word);
        self.trigger_host(delay)
    }

    fn read_locked(&mut self, delay: &dyn Delay, reg: u8, out: &mut [u8]) -> DsiResult<usize> {
        self.ensure_read_fifo_empty()?;

        let vc = self.config.virtual_channel;
        self.send_control_word(delay, max_return_size_word(out.len(), vc))?;
        self.send_control_word(delay, dcs_read_word(reg, vc))?;

        self.turn_around(delay)?;
        let count = self.sample_read_fifo(delay)?;
        if count == 0 || count > MAX_READ_WORDS {
            warn!("dsi{}: no read response for {:#04x}", self.instance, reg);
            return Err(DsiError::NoReadResponse(count));
        }

        let mut words = [0u32; MAX_READ_WORDS as usize];
        for word in words.iter_mut().take(count as usize) {
            *word = self.regs.read(dsi_reg::RD_DATA);
        }
        self.ensure_read_fifo_empty()?;

        let mut staging = [0u8; READ_FIFO_DEPTH_BYTES];
        LittleEndian::write_u32_into(&words, &mut staging);

        let layout = classify_response(&staging, count as usize);
        let n = layout
            .copy_len(out.len())
            .min(READ_FIFO_DEPTH_BYTES - layout.skip);
        out[..n].copy_from_slice(&staging[layout.skip..layout.skip + n]);
        trace!(
            "dsi{}: response {:?} header {:#04x}: {:02x?}",
            self.instance,
            layout.kind,
            layout.header,
            &out[..n]
        );

        match layout.kind {
            ResponseKind::AckError => Err(DsiError::ReadAckError { len: n }),
            ResponseKind::Invalid => Err(DsiError::ReadInvalidResponse {
                header: layout.header,
                len: n,
            }),
            ResponseKind::Long | ResponseKind::Short1 | ResponseKind::Short2 => Ok(n),
        }
    }

    // ------------------------------------------------------------------------
    // Mode switching
    // ------------------------------------------------------------------------

    /// Switch command transmission between HS and LP
    pub fn set_high_speed_mode(&mut self, svc: &Services, enable: bool) -> DsiResult<()> {
        let _gate = HostClockGate::acquire(&*svc.clock)?;
        let host = self.regs.read(dsi_reg::HOST_DSI_CONTROL);
        if (host & host_bits::HIGH_SPEED_TRANS != 0) == enable {
            return Ok(());
        }

        let (host, freq) = if enable {
            (
                host | host_bits::HIGH_SPEED_TRANS,
                self.config.hs_command_mode_freq_khz,
            )
        } else {
            (
                host & !host_bits::HIGH_SPEED_TRANS,
                self.config.lp_command_mode_freq_khz,
            )
        };
        if self.phy_freq_khz != freq {
            self.set_command_clock(svc, freq)?;
        }

        self.regs.write(dsi_reg::HOST_DSI_CONTROL, host);
        self.in_hs_mode = enable;
        if !self.wait_command_ready(&*svc.delay) {
            error!("dsi{}: not ready after HS={} switch", self.instance, enable);
            return Err(FatalFault::CommandModeNotReady.into());
        }
        Ok(())
    }

    fn program_host_command_control(&mut self) {
        let mut host = host_bits::CRC_RESET
            | host_bits::TX_TRIG_IMMEDIATE
            | host_bits::CS_ENABLE
            | host_bits::ECC_ENABLE
            | host_bits::FIFO_SEL_HOST;
        let mut ctrl = control_bits::HOST_ENABLE | control_bits::num_data_lanes(self.config.data_lanes);
        let hs_in_lp = self.config.enable_hs_clock_in_lp_mode;
        if hs_in_lp {
            host |= host_bits::HIGH_SPEED_TRANS;
            ctrl |= control_bits::HS_CLK_CONTINUOUS;
        }
        self.regs.write(dsi_reg::HOST_DSI_CONTROL, host);
        self.regs.write(dsi_reg::DSI_CONTROL, ctrl);
        self.in_hs_mode = hs_in_lp;
    }

    /// Hand the link to the host FIFO at the LP command rate
    pub fn enable_command_mode(&mut self, svc: &Services) -> DsiResult<()> {
        let _gate = HostClockGate::acquire(&*svc.clock)?;
        let delay = &*svc.delay;
        let lp = self.config.lp_command_mode_freq_khz;

        if self.variant().is_dc_driven() {
            self.set_command_clock(svc, lp)?;
            self.program_host_command_control();
        } else {
            self.set_power(delay, false)?;
            delay.wait_us(POWER_CONTROL_SETTLE_US);
            self.set_command_clock(svc, lp)?;
            self.program_host_command_control();
            self.set_power(delay, true)?;
        }

        self.regs.write(dsi_reg::MAX_THRESHOLD, HOST_FIFO_DEPTH);
        self.regs.write(dsi_reg::TRIGGER, 0);
        self.regs.write(dsi_reg::TX_CRC, 0);
        self.regs.write(dsi_reg::INIT_SEQ_CONTROL, 0);

        if self.config.enable_hs_clock_in_lp_mode {
            self.regs
                .modify(dsi_reg::HOST_DSI_CONTROL, host_bits::HIGH_SPEED_TRANS, 0);
        }

        self.host_ctrl_enabled = true;
        self.in_hs_mode = false;
        self.dump_registers("command mode");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Video transmission
    // ------------------------------------------------------------------------

    fn video_control_word(&self) -> u32 {
        let mut ctrl = control_bits::VID_ENABLE
            | control_bits::num_data_lanes(self.config.data_lanes)
            | control_bits::VID_TX_TRIG_SOL
            | control_bits::data_format(self.config.data_format.control_code())
            | control_bits::virtual_channel(self.config.virtual_channel);
        if self.controller != 0 {
            ctrl |= control_bits::VID_SOURCE_DISPLAY_1;
        }
        // HS clock starts TX-only whatever the policy; turn_on_hs_clock
        // applies the configured one
        ctrl |= control_bits::HS_CLK_TX_ONLY;
        if self.variant().is_dc_driven() {
            ctrl |= control_bits::DCS_ENABLE;
        }
        ctrl
    }

    /// Program the packet program and start scanning out video
    pub fn enable_video_transmission(&mut self, svc: &Services) -> DsiResult<()> {
        let _gate = HostClockGate::acquire(&*svc.clock)?;
        let variant = self.variant();
        let format = self.config.data_format;
        let timing = self.controller_timing.unwrap_or(self.mode.timing);

        self.program_phy_timing(true);
        build_program(variant, format).write(&mut *self.regs);
        compute_packet_lengths(variant, format, &timing, self.instance).write(&mut *self.regs);
        if variant.is_dc_driven() {
            self.regs.write(
                dsi_reg::DCS_CMDS,
                dcs_cmds_bits::lt5(dcs::WRITE_MEMORY_START)
                    | dcs_cmds_bits::lt3(dcs::WRITE_MEMORY_CONTINUE),
            );
        }

        self.regs.write(dsi_reg::HOST_DSI_CONTROL, 0);
        self.regs.write(dsi_reg::TRIGGER, 0);
        self.regs.write(dsi_reg::DSI_CONTROL, 0);
        self.host_ctrl_enabled = false;

        let sol = compute_sol_delay(
            variant,
            format,
            self.config.data_lanes,
            &timing,
            self.config.refresh_rate,
            self.phy_freq_khz,
        );
        self.regs.write(dsi_reg::SOL_DELAY, sol.delay);
        self.regs.write(dsi_reg::MAX_THRESHOLD, VIDEO_FIFO_DEPTH);
        self.regs
            .write(dsi_reg::POWER_CONTROL, power_bits::LEG_DSI_ENABLE);

        let ctrl = self.video_control_word();
        self.regs.write(dsi_reg::DSI_CONTROL, ctrl);

        let war = self.config.hs_clock_control == HsClockControl::ContinuousThspreprWar;
        if war {
            self.set_thsprepr(war_thsprepr(
                self.config.war_min_thsprepr_ns,
                self.phy_freq_khz,
            ));
            self.regs.write(
                dsi_reg::DSI_CONTROL,
                (ctrl & !control_bits::HS_CLK_MASK) | control_bits::HS_CLK_CONTINUOUS,
            );
        }

        self.regs.write(
            dsi_reg::HOST_DSI_CONTROL,
            host_bits::HIGH_SPEED_TRANS
                | host_bits::FIFO_SEL_VIDEO
                | host_bits::CS_ENABLE
                | host_bits::ECC_ENABLE,
        );

        if war {
            svc.delay.sleep_ms(WAR_SETTLE_MS);
            self.program_phy_timing(true);
        }

        for attempt in 1..=CLOCK_ENABLE_ATTEMPTS {
            match self.turn_on_hs_clock(svc) {
                Ok(()) => {
                    self.dump_registers("video");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(
                    "dsi{}: HS clock attempt {}/{} failed: {}",
                    self.instance, attempt, CLOCK_ENABLE_ATTEMPTS, e
                ),
            }
        }
        error!("dsi{}: HS clock could not be enabled", self.instance);
        Err(FatalFault::ClockEnableRetriesExhausted.into())
    }

    /// Apply the HS clock policy, running the THS-PREPARE workaround when
    /// configured
    pub fn turn_on_hs_clock(&mut self, svc: &Services) -> DsiResult<()> {
        let policy = self.config.hs_clock_control;
        self.set_hs_clock_control(if policy == HsClockControl::Continuous {
            control_bits::HS_CLK_CONTINUOUS
        } else {
            control_bits::HS_CLK_TX_ONLY
        });

        let host = host_bits::FIFO_SEL_HOST | host_bits::CS_ENABLE | host_bits::ECC_ENABLE;
        self.regs.write(dsi_reg::HOST_DSI_CONTROL, host);

        if !policy.is_war() {
            self.regs
                .write(dsi_reg::HOST_DSI_CONTROL, host | host_bits::HIGH_SPEED_TRANS);
            self.in_hs_mode = true;
            return Ok(());
        }

        if let Err(e) = self.write_display_power(svc, false) {
            debug!("dsi{}: display off before WAR: {}", self.instance, e);
        }

        let module = ClockModule::Dsi(self.instance);
        let saved_khz = svc.clock.current_khz(module);
        let thsprepr = if policy == HsClockControl::ContinuousThspreprPllWar {
            let target = self.config.war_max_init_dsi_clk_khz / 2;
            svc.clock
                .configure(module, target, Some(FreqRange::around(target)))?;
            0
        } else {
            war_thsprepr(self.config.war_min_thsprepr_ns, self.phy_freq_khz)
        };
        self.set_thsprepr(thsprepr);
        self.set_hs_clock_control(control_bits::HS_CLK_CONTINUOUS);

        self.regs
            .write(dsi_reg::HOST_DSI_CONTROL, host | host_bits::HIGH_SPEED_TRANS);
        self.in_hs_mode = true;

        svc.delay.sleep_ms(WAR_SETTLE_MS);
        if policy == HsClockControl::ContinuousThspreprPllWar {
            self.phy_freq_khz = svc
                .clock
                .configure(module, saved_khz, Some(FreqRange::around(saved_khz)))?;
        }
        self.program_phy_timing(true);

        let sanity = self.run_sanity_check(svc);
        if let Err(e) = &sanity {
            warn!(
                "dsi{}: link check failed after WAR ({}), falling back to TX-only clock",
                self.instance, e
            );
            self.set_hs_clock_control(control_bits::HS_CLK_TX_ONLY);
        }

        if let Err(e) = self.write_display_power(svc, true) {
            debug!("dsi{}: display on after WAR: {}", self.instance, e);
        }
        sanity
    }

    /// NOP write followed by a bus turn-around
    fn run_sanity_check(&mut self, svc: &Services) -> DsiResult<()> {
        self.write_command(
            svc,
            &PacketDescriptor::short(data_type::DCS_SHORT_WRITE, dcs::NOP, &[]),
        )?;
        let _gate = HostClockGate::acquire(&*svc.clock)?;
        self.bta_check_error(&*svc.delay)
    }

    // ------------------------------------------------------------------------
    // Command-mode frame updates
    // ------------------------------------------------------------------------

    /// Arm TE and wait for one edge; a timeout is only logged
    fn wait_for_te(&mut self) {
        if let Some(te) = self.te.as_mut() {
            te.unmask();
            if !te.wait_timeout_ms(TE_WAIT_TIMEOUT_MS) {
                warn!("dsi{}: TE wait timed out", self.instance);
            }
        }
    }

    /// Push `surface` into the panel's frame memory through DCS writes
    pub fn command_mode_update(
        &mut self,
        svc: &Services,
        region: &PartialRegion,
        surface: &[u8],
    ) -> DsiResult<()> {
        let (pixel_format, bytes_pp) = dbi_pixel_format(region.bits_per_pixel)?;
        let data: Cow<'_, [u8]> = if region.bits_per_pixel == 16 {
            Cow::Owned(swap_16bpp(surface)?)
        } else {
            Cow::Borrowed(surface)
        };

        let depth = if self.variant().is_dc_driven() {
            VIDEO_FIFO_DEPTH_BYTES
        } else {
            HOST_FIFO_DEPTH_BYTES
        };
        let bytes_pp = bytes_pp as usize;
        let chunk = depth / bytes_pp * bytes_pp;

        let [tb_hi, tb_lo] = be16(region.top_bar);
        let [bb_hi, bb_lo] = be16(region.bot_bar);
        self.write_dcs_long(svc, dcs::SET_PARTIAL_AREA, &[tb_hi, tb_lo, bb_hi, bb_lo])?;
        self.write_dcs_long(svc, dcs::SET_PIXEL_FORMAT, &[pixel_format])?;
        self.write_dcs_long(svc, dcs::SET_ADDRESS_MODE, &[0])?;

        let [l_hi, l_lo] = be16(region.left);
        let [r_hi, r_lo] = be16(region.right);
        self.write_dcs_long(svc, dcs::SET_COLUMN_ADDRESS, &[l_hi, l_lo, r_hi, r_lo])?;
        let [t_hi, t_lo] = be16(region.top);
        let [b_hi, b_lo] = be16(region.bottom);
        self.write_dcs_long(svc, dcs::SET_PAGE_ADDRESS, &[t_hi, t_lo, b_hi, b_lo])?;

        if self.config.hs_support_for_frame_buffer {
            self.set_high_speed_mode(svc, true)?;
        }

        let mut chunks = data.chunks(chunk);
        if let Some(first) = chunks.next() {
            self.wait_for_te();
            self.write_dcs_long(svc, dcs::WRITE_MEMORY_START, first)?;
        }
        for rest in chunks {
            self.write_dcs_long(svc, dcs::WRITE_MEMORY_CONTINUE, rest)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Bring-up and teardown
    // ------------------------------------------------------------------------

    /// Clock, reset, zero and power the controller into a known idle state
    pub fn bring_up(&mut self, svc: &Services) -> DsiResult<()> {
        let _gate = HostClockGate::acquire(&*svc.clock)?;
        let module = ClockModule::Dsi(self.instance);

        self.phy_freq_khz = svc
            .clock
            .configure(module, self.config.lp_command_mode_freq_khz, None)?;
        svc.clock.enable(module)?;
        self.dsi_clock_on = true;
        svc.clock.reset(module);

        for offset in dsi_reg::INIT_ZERO {
            self.regs.write(offset, 0);
        }
        self.regs.write(dsi_reg::SOL_DELAY, DEFAULT_SOL_DELAY);
        self.regs.write(dsi_reg::MAX_THRESHOLD, VIDEO_FIFO_DEPTH);
        self.regs.write(dsi_reg::TRIGGER, 0);
        self.regs.write(dsi_reg::INIT_SEQ_CONTROL, 0);

        self.program_phy_timing(false);

        self.regs.modify(
            dsi_reg::PAD_CONTROL,
            pad_bits::PDIO | pad_bits::PDIO_CLK | pad_bits::PULLDN_ENAB,
            0,
        );

        self.set_power(&*svc.delay, true)?;
        self.host_ctrl_enabled = false;
        debug!(
            "dsi{}: initialized at {} kHz",
            self.instance, self.phy_freq_khz
        );
        Ok(())
    }

    /// Register the panel's TE line; the signal starts masked
    pub fn attach_te(&mut self, gpio: &dyn GpioService, pin: u32) -> DsiResult<()> {
        let te = gpio.register_te(pin)?;
        self.te = Some(te);
        self.te_pin = Some(pin);
        Ok(())
    }

    /// Release TE, power off and stop the DSI clock. Safe on any state.
    pub fn shutdown(&mut self, svc: &Services) {
        self.te = None;
        if let Some(pin) = self.te_pin.take() {
            svc.gpio.release_te(pin);
        }
        self.regs.write(dsi_reg::POWER_CONTROL, 0);
        if self.dsi_clock_on {
            svc.clock.disable(ClockModule::Dsi(self.instance));
            self.dsi_clock_on = false;
        }
        self.enabled = false;
        self.host_ctrl_enabled = false;
        self.in_hs_mode = false;
    }

    /// Scan-out timing after ganged lane alignment
    fn effective_timing(&self) -> DeviceTiming {
        match self.variant() {
            VideoModeVariant::Ganged { inner, .. } if inner != VideoMode::Burst => {
                ganged_pixel_correction(
                    &self.mode.timing,
                    self.config.data_format,
                    self.config.data_lanes,
                )
                .timing
            }
            _ => self.mode.timing,
        }
    }

    fn apply_display_clock(&mut self, svc: &Services, clock: DisplayClock) -> DsiResult<()> {
        let module = ClockModule::Dsi(self.instance);
        if !self.dsi_clock_on {
            svc.clock.enable(module)?;
            self.dsi_clock_on = true;
        }
        self.phy_freq_khz =
            svc.clock
                .configure(module, clock.dsi_khz, Some(FreqRange::around(clock.dsi_khz)))?;
        svc.clock
            .configure(ClockModule::Display(self.controller), clock.pixel_khz, None)?;
        svc.display.write_reg(
            self.controller,
            dc_reg::DISP_CLOCK_CONTROL,
            dc_reg::PIXEL_CLK_DIVIDER_PCD1 | dc_reg::shift_clk_divider(clock.shift_divider),
        );
        debug!(
            "dsi{}: DSI {} kHz, pixel {} kHz, shift div {}",
            self.instance, clock.dsi_khz, clock.pixel_khz, clock.shift_divider
        );
        Ok(())
    }

    /// Clock the link for video, start transmission and route DC output
    pub fn enable_video(&mut self, svc: &Services) -> DsiResult<()> {
        let timing = self.effective_timing();
        self.controller_timing = Some(timing);

        let clock = display_clock_config(
            self.variant(),
            self.config.data_format,
            self.config.data_lanes,
            &timing,
            self.config.refresh_rate,
            self.config.phy_freq_khz,
            false,
        );
        self.apply_display_clock(svc, clock)?;
        self.enable_video_transmission(svc)?;

        svc.display.set_dsi_output(self.controller, true);
        self.enabled = true;
        svc.pads.calibrate(self.instance);
        Ok(())
    }

    /// Tell the display controller which pixels this instance carries
    pub fn program_ganged(&mut self, svc: &Services, split: GangedSplit) -> DsiResult<()> {
        let _gate = HostClockGate::acquire(&*svc.clock)?;
        let width = self
            .controller_timing
            .unwrap_or(self.mode.timing)
            .h_disp_active;
        let (start, _) = ganged_halves(split, width, self.instance);
        let size = match split {
            GangedSplit::LeftRight => {
                let low = width / 2;
                ganged_bits::size(low, width - low)
            }
            GangedSplit::OddEven => ganged_bits::size(1, 1),
        };
        self.regs.write(dsi_reg::GANGED_MODE_START, start);
        self.regs.write(dsi_reg::GANGED_MODE_SIZE, size);
        self.regs
            .write(dsi_reg::GANGED_MODE_CONTROL, ganged_bits::ENABLE);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Ping
    // ------------------------------------------------------------------------

    /// LP register read with the video configuration saved and restored
    pub fn ping(&mut self, svc: &Services, reg: u8, out: &mut [u8]) -> DsiResult<usize> {
        let _gate = HostClockGate::acquire(&*svc.clock)?;

        // let in-flight video lines drain
        let frame_ms = 1000 / self.config.refresh_rate.max(1);
        svc.delay.sleep_ms(3 * frame_ms);

        let module = ClockModule::Dsi(self.instance);
        let saved_khz = svc.clock.current_khz(module);
        let saved_host = self.regs.read(dsi_reg::HOST_DSI_CONTROL);
        let saved_ctrl = self.regs.read(dsi_reg::DSI_CONTROL);
        let saved_host_enable = self.host_ctrl_enabled;

        let result = self.ping_in_lp(svc, reg, out);

        match svc.clock.configure(module, saved_khz, None) {
            Ok(khz) => self.phy_freq_khz = khz,
            Err(e) => warn!("dsi{}: restoring {} kHz: {}", self.instance, saved_khz, e),
        }
        self.program_phy_timing(true);
        self.regs.write(dsi_reg::HOST_DSI_CONTROL, saved_host);
        self.regs.write(dsi_reg::DSI_CONTROL, saved_ctrl);
        self.host_ctrl_enabled = saved_host_enable;
        result
    }

    fn ping_in_lp(&mut self, svc: &Services, reg: u8, out: &mut [u8]) -> DsiResult<usize> {
        self.set_command_clock(svc, self.config.lp_command_mode_freq_khz)?;
        self.regs.write(dsi_reg::MAX_THRESHOLD, HOST_FIFO_DEPTH);
        self.regs.write(
            dsi_reg::HOST_DSI_CONTROL,
            host_bits::CRC_RESET
                | host_bits::CS_ENABLE
                | host_bits::ECC_ENABLE
                | host_bits::FIFO_SEL_HOST
                | host_bits::TX_TRIG_IMMEDIATE,
        );
        self.regs.write(
            dsi_reg::DSI_CONTROL,
            control_bits::HOST_ENABLE | control_bits::num_data_lanes(self.config.data_lanes),
        );
        self.host_ctrl_enabled = true;
        self.in_hs_mode = false;
        self.read_command(svc, reg, out, false)
    }
}
