//! In-memory doubles for the DSI register window and its collaborators
//!
//! `MockRegisters` behaves like a cooperative controller: TRIGGER and
//! IMM_BTA clear themselves after being written, WR_DATA words are captured
//! into a transmit log, and queued BTA responses appear in the read FIFO
//! when an immediate bus turn-around is requested. Individual registers can
//! be pinned to a fixed read value to model a wedged link.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{DsiError, DsiResult};
use crate::hal::{
    ApertureMapper, ClockModule, ClockService, Delay, DisplayController, FreqRange, GpioService,
    PadCalibrator, RegisterBackend, Services, TeSignal,
};
use crate::regs::{dsi_reg, host_bits, status_bits};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// REGISTERS
// ============================================================================

#[derive(Default)]
struct RegisterState {
    values: HashMap<usize, u32>,
    writes: Vec<(usize, u32)>,
    read_counts: HashMap<usize, u32>,
    pinned: HashMap<usize, u32>,
    self_clearing: HashMap<usize, u32>,
    tx_fifo: Vec<u32>,
    rx_fifo: VecDeque<u32>,
    bta_responses: VecDeque<Vec<u32>>,
    status_flags: u32,
}

/// Shared-state register window; clones observe the same registers
#[derive(Clone)]
pub struct MockRegisters {
    state: Arc<Mutex<RegisterState>>,
}

impl Default for MockRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegisters {
    pub fn new() -> Self {
        let mut state = RegisterState::default();
        state.self_clearing.insert(dsi_reg::TRIGGER, u32::MAX);
        state
            .self_clearing
            .insert(dsi_reg::HOST_DSI_CONTROL, host_bits::IMM_BTA);
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Current stored value (ignores pins)
    pub fn value(&self, offset: usize) -> u32 {
        lock(&self.state).values.get(&offset).copied().unwrap_or(0)
    }

    /// Store a value without logging a write
    pub fn set(&self, offset: usize, value: u32) {
        lock(&self.state).values.insert(offset, value);
    }

    /// Make every read of `offset` return `value`
    pub fn pin(&self, offset: usize, value: u32) {
        lock(&self.state).pinned.insert(offset, value);
    }

    pub fn unpin(&self, offset: usize) {
        lock(&self.state).pinned.remove(&offset);
    }

    pub fn read_count(&self, offset: usize) -> u32 {
        lock(&self.state).read_counts.get(&offset).copied().unwrap_or(0)
    }

    pub fn reset_read_counts(&self) {
        lock(&self.state).read_counts.clear();
    }

    /// Full write log, in order
    pub fn writes(&self) -> Vec<(usize, u32)> {
        lock(&self.state).writes.clone()
    }

    /// Values written to `offset`, in order
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        lock(&self.state)
            .writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.state).writes.clear();
    }

    /// Drain the words written to WR_DATA so far
    pub fn take_fifo_words(&self) -> Vec<u32> {
        std::mem::take(&mut lock(&self.state).tx_fifo)
    }

    /// Queue a response delivered on the next immediate BTA
    pub fn respond_to_bta(&self, words: &[u32]) {
        lock(&self.state).bta_responses.push_back(words.to_vec());
    }

    /// Put words into the read FIFO right away
    pub fn fill_read_fifo(&self, words: &[u32]) {
        lock(&self.state).rx_fifo.extend(words.iter().copied());
    }

    pub fn read_fifo_len(&self) -> usize {
        lock(&self.state).rx_fifo.len()
    }

    /// Extra STATUS bits above the FIFO count (overflow/underflow)
    pub fn set_status_flags(&self, flags: u32) {
        lock(&self.state).status_flags = flags & !status_bits::RD_FIFO_COUNT_MASK;
    }
}

impl RegisterBackend for MockRegisters {
    fn read(&mut self, offset: usize) -> u32 {
        let mut s = lock(&self.state);
        *s.read_counts.entry(offset).or_insert(0) += 1;
        if let Some(v) = s.pinned.get(&offset) {
            return *v;
        }
        match offset {
            dsi_reg::RD_DATA => s.rx_fifo.pop_front().unwrap_or(0),
            dsi_reg::STATUS => {
                let count = (s.rx_fifo.len() as u32).min(status_bits::RD_FIFO_COUNT_MASK);
                s.status_flags | count
            }
            _ => s.values.get(&offset).copied().unwrap_or(0),
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        let mut s = lock(&self.state);
        s.writes.push((offset, value));
        if offset == dsi_reg::WR_DATA {
            s.tx_fifo.push(value);
        }
        if offset == dsi_reg::HOST_DSI_CONTROL && value & host_bits::IMM_BTA != 0 {
            if let Some(words) = s.bta_responses.pop_front() {
                s.rx_fifo.extend(words);
            }
        }
        let clear = s.self_clearing.get(&offset).copied().unwrap_or(0);
        s.values.insert(offset, value & !clear);
    }
}

// ============================================================================
// DELAY
// ============================================================================

/// Records requested waits instead of sleeping
#[derive(Clone, Default)]
pub struct MockDelay {
    elapsed_us: Arc<AtomicU64>,
}

impl MockDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.elapsed_us.store(0, Ordering::SeqCst);
    }
}

impl Delay for MockDelay {
    fn wait_us(&self, us: u32) {
        self.elapsed_us.fetch_add(us as u64, Ordering::SeqCst);
    }

    fn sleep_ms(&self, ms: u32) {
        self.elapsed_us.fetch_add(ms as u64 * 1000, Ordering::SeqCst);
    }
}

// ============================================================================
// CLOCK
// ============================================================================

#[derive(Default)]
struct ClockState {
    rates: HashMap<ClockModule, u32>,
    /// Nesting depth per module
    enabled: HashMap<ClockModule, u32>,
    configured: Vec<(ClockModule, u32)>,
    ranges: Vec<(ClockModule, u32, Option<FreqRange>)>,
    enable_count: HashMap<ClockModule, u32>,
    resets: Vec<ClockModule>,
}

/// Clock service that grants every requested rate; enables nest
#[derive(Default)]
pub struct MockClock {
    state: Mutex<ClockState>,
    fail_configure: AtomicBool,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }

    pub fn is_enabled(&self, module: ClockModule) -> bool {
        lock(&self.state).enabled.get(&module).copied().unwrap_or(0) > 0
    }

    pub fn enable_count(&self, module: ClockModule) -> u32 {
        lock(&self.state).enable_count.get(&module).copied().unwrap_or(0)
    }

    /// `(module, requested_khz)` for every configure call
    pub fn configured(&self) -> Vec<(ClockModule, u32)> {
        lock(&self.state).configured.clone()
    }

    /// `(module, requested_khz, window)` for every configure call
    pub fn requested_ranges(&self) -> Vec<(ClockModule, u32, Option<FreqRange>)> {
        lock(&self.state).ranges.clone()
    }

    pub fn resets(&self) -> Vec<ClockModule> {
        lock(&self.state).resets.clone()
    }
}

impl ClockService for MockClock {
    fn configure(
        &self,
        module: ClockModule,
        target_khz: u32,
        range: Option<FreqRange>,
    ) -> DsiResult<u32> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(DsiError::Clock(format!("cannot configure {:?}", module)));
        }
        let mut s = lock(&self.state);
        s.configured.push((module, target_khz));
        s.ranges.push((module, target_khz, range));
        s.rates.insert(module, target_khz);
        Ok(target_khz)
    }

    fn current_khz(&self, module: ClockModule) -> u32 {
        lock(&self.state).rates.get(&module).copied().unwrap_or(0)
    }

    fn enable(&self, module: ClockModule) -> DsiResult<()> {
        let mut s = lock(&self.state);
        *s.enabled.entry(module).or_insert(0) += 1;
        *s.enable_count.entry(module).or_insert(0) += 1;
        Ok(())
    }

    fn disable(&self, module: ClockModule) {
        if let Some(depth) = lock(&self.state).enabled.get_mut(&module) {
            *depth = depth.saturating_sub(1);
        }
    }

    fn reset(&self, module: ClockModule) {
        lock(&self.state).resets.push(module);
    }
}

// ============================================================================
// DISPLAY CONTROLLER
// ============================================================================

#[derive(Default)]
struct DisplayState {
    regs: HashMap<(usize, usize), u32>,
    vblank_waits: u32,
    dsi_output: HashMap<usize, bool>,
}

#[derive(Default)]
pub struct MockDisplay {
    state: Mutex<DisplayState>,
}

impl MockDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reg(&self, controller: usize, offset: usize) -> u32 {
        lock(&self.state)
            .regs
            .get(&(controller, offset))
            .copied()
            .unwrap_or(0)
    }

    pub fn vblank_waits(&self) -> u32 {
        lock(&self.state).vblank_waits
    }

    pub fn dsi_output(&self, controller: usize) -> bool {
        lock(&self.state)
            .dsi_output
            .get(&controller)
            .copied()
            .unwrap_or(false)
    }
}

impl DisplayController for MockDisplay {
    fn write_reg(&self, controller: usize, offset: usize, value: u32) {
        lock(&self.state).regs.insert((controller, offset), value);
    }

    fn read_reg(&self, controller: usize, offset: usize) -> u32 {
        self.reg(controller, offset)
    }

    fn wait_for_vblank(&self, _controller: usize) {
        lock(&self.state).vblank_waits += 1;
    }

    fn set_dsi_output(&self, controller: usize, active: bool) {
        lock(&self.state).dsi_output.insert(controller, active);
    }
}

// ============================================================================
// GPIO / TE
// ============================================================================

#[derive(Default)]
struct GpioState {
    registered: Vec<u32>,
    released: Vec<u32>,
    unmasks: u32,
    waits: u32,
}

/// GPIO service whose TE line fires on every wait unless told otherwise
pub struct MockGpio {
    state: Arc<Mutex<GpioState>>,
    te_fires: Arc<AtomicBool>,
    fail_register: AtomicBool,
}

impl Default for MockGpio {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(GpioState::default())),
            te_fires: Arc::new(AtomicBool::new(true)),
            fail_register: AtomicBool::new(false),
        }
    }
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_te_fires(&self, fires: bool) {
        self.te_fires.store(fires, Ordering::SeqCst);
    }

    pub fn set_fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn registered(&self) -> Vec<u32> {
        lock(&self.state).registered.clone()
    }

    pub fn released(&self) -> Vec<u32> {
        lock(&self.state).released.clone()
    }

    pub fn te_waits(&self) -> u32 {
        lock(&self.state).waits
    }

    pub fn te_unmasks(&self) -> u32 {
        lock(&self.state).unmasks
    }
}

struct MockTe {
    state: Arc<Mutex<GpioState>>,
    fires: Arc<AtomicBool>,
    armed: bool,
}

impl TeSignal for MockTe {
    fn unmask(&mut self) {
        self.armed = true;
        lock(&self.state).unmasks += 1;
    }

    fn wait_timeout_ms(&mut self, _ms: u32) -> bool {
        lock(&self.state).waits += 1;
        let fired = self.armed && self.fires.load(Ordering::SeqCst);
        self.armed = false;
        fired
    }
}

impl GpioService for MockGpio {
    fn register_te(&self, pin: u32) -> DsiResult<Box<dyn TeSignal>> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(DsiError::Gpio(format!("pin {} unavailable", pin)));
        }
        lock(&self.state).registered.push(pin);
        Ok(Box::new(MockTe {
            state: Arc::clone(&self.state),
            fires: Arc::clone(&self.te_fires),
            armed: false,
        }))
    }

    fn release_te(&self, pin: u32) {
        lock(&self.state).released.push(pin);
    }
}

// ============================================================================
// APERTURE MAPPER AND PADS
// ============================================================================

/// Hands out one shared `MockRegisters` per instance
pub struct MockMapper {
    regs: [MockRegisters; 2],
    mapped: Mutex<[bool; 2]>,
    fail: AtomicBool,
}

impl Default for MockMapper {
    fn default() -> Self {
        Self {
            regs: [MockRegisters::new(), MockRegisters::new()],
            mapped: Mutex::new([false; 2]),
            fail: AtomicBool::new(false),
        }
    }
}

impl MockMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registers(&self, instance: usize) -> MockRegisters {
        self.regs[instance % 2].clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn is_mapped(&self, instance: usize) -> bool {
        lock(&self.mapped).get(instance).copied().unwrap_or(false)
    }
}

impl ApertureMapper for MockMapper {
    fn map(&self, instance: usize) -> DsiResult<Box<dyn RegisterBackend + Send>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DsiError::Mapping(format!("aperture {} unavailable", instance)));
        }
        let regs = self
            .regs
            .get(instance)
            .cloned()
            .ok_or(DsiError::InvalidInstance(instance))?;
        lock(&self.mapped)[instance] = true;
        Ok(Box::new(regs))
    }

    fn unmap(&self, instance: usize) {
        if let Some(slot) = lock(&self.mapped).get_mut(instance) {
            *slot = false;
        }
    }
}

#[derive(Default)]
pub struct MockPads {
    calibrated: Mutex<Vec<usize>>,
}

impl MockPads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calibrated(&self) -> Vec<usize> {
        lock(&self.calibrated).clone()
    }
}

impl PadCalibrator for MockPads {
    fn calibrate(&self, instance: usize) {
        lock(&self.calibrated).push(instance);
    }
}

// ============================================================================
// BUNDLE
// ============================================================================

/// Concrete handles behind a mock [`Services`] bundle
#[derive(Clone)]
pub struct MockHandles {
    pub clock: Arc<MockClock>,
    pub display: Arc<MockDisplay>,
    pub gpio: Arc<MockGpio>,
    pub mapper: Arc<MockMapper>,
    pub pads: Arc<MockPads>,
    pub delay: MockDelay,
}

impl MockHandles {
    pub fn registers(&self, instance: usize) -> MockRegisters {
        self.mapper.registers(instance)
    }
}

/// Build a `Services` bundle wired to fresh mocks
pub fn services() -> (Services, MockHandles) {
    let handles = MockHandles {
        clock: Arc::new(MockClock::new()),
        display: Arc::new(MockDisplay::new()),
        gpio: Arc::new(MockGpio::new()),
        mapper: Arc::new(MockMapper::new()),
        pads: Arc::new(MockPads::new()),
        delay: MockDelay::new(),
    };
    let services = Services {
        clock: handles.clock.clone(),
        display: handles.display.clone(),
        gpio: handles.gpio.clone(),
        mapper: handles.mapper.clone(),
        pads: handles.pads.clone(),
        delay: Arc::new(handles.delay.clone()),
    };
    (services, handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_self_clears() {
        let mut regs = MockRegisters::new();
        regs.write(dsi_reg::TRIGGER, 0x2);
        assert_eq!(regs.read(dsi_reg::TRIGGER), 0);
        assert_eq!(regs.writes_to(dsi_reg::TRIGGER), vec![0x2]);
    }

    #[test]
    fn test_bta_delivers_queued_response() {
        let mut regs = MockRegisters::new();
        regs.respond_to_bta(&[0x0000_0121, 0x0000_0000]);
        assert_eq!(regs.read(dsi_reg::STATUS) & 0x3f, 0);
        regs.write(dsi_reg::HOST_DSI_CONTROL, host_bits::IMM_BTA | host_bits::ECC_ENABLE);
        assert_eq!(regs.read(dsi_reg::HOST_DSI_CONTROL), host_bits::ECC_ENABLE);
        assert_eq!(regs.read(dsi_reg::STATUS) & 0x3f, 2);
        assert_eq!(regs.read(dsi_reg::RD_DATA), 0x121);
    }

    #[test]
    fn test_pinned_register() {
        let mut regs = MockRegisters::new();
        regs.pin(dsi_reg::TRIGGER, 1);
        regs.write(dsi_reg::TRIGGER, 0);
        assert_eq!(regs.read(dsi_reg::TRIGGER), 1);
        assert_eq!(regs.read_count(dsi_reg::TRIGGER), 1);
    }

    #[test]
    fn test_mapper_failure() {
        let mapper = MockMapper::new();
        mapper.set_fail(true);
        assert!(mapper.map(0).is_err());
        mapper.set_fail(false);
        assert!(mapper.map(1).is_ok());
        assert!(mapper.is_mapped(1));
        assert!(mapper.map(2).is_err());
    }
}
