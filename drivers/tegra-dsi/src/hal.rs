//! # Hardware Abstraction Layer
//!
//! Every register access and every collaborator the transport depends on
//! goes through a trait defined here, so the engine runs unchanged against
//! memory-mapped hardware or the doubles in [`crate::mock`].
//!
//! | Trait               | Collaborator                                  |
//! |---------------------|-----------------------------------------------|
//! | `RegisterBackend`   | One DSI register aperture                     |
//! | `Delay`             | Microsecond spin / millisecond sleep          |
//! | `ClockService`      | Module clock rate, enable, reset              |
//! | `DisplayController` | DC registers, vblank wait, DSI output select  |
//! | `GpioService`       | TE line edge interrupt                        |
//! | `ApertureMapper`    | Physical register window mapping              |
//! | `PadCalibrator`     | MIPI pad calibration                          |

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::DsiResult;

// ============================================================================
// REGISTER ACCESS
// ============================================================================

/// 32-bit register window addressed by byte offset
pub trait RegisterBackend {
    fn read(&mut self, offset: usize) -> u32;
    fn write(&mut self, offset: usize, value: u32);

    /// Read-modify-write: clear `clear`, then set `set`
    fn modify(&mut self, offset: usize, clear: u32, set: u32) {
        let value = self.read(offset);
        self.write(offset, (value & !clear) | set);
    }
}

/// Volatile MMIO window
///
/// # Safety
///
/// `base` must point to a mapped DSI aperture that stays valid for the
/// lifetime of the backend and is not accessed through any other alias.
pub struct MmioRegisters {
    base: *mut u32,
}

impl MmioRegisters {
    /// # Safety
    ///
    /// See the type-level contract.
    pub const unsafe fn new(base: *mut u32) -> Self {
        Self { base }
    }
}

// The aperture is exclusively owned by its transport instance.
unsafe impl Send for MmioRegisters {}

impl RegisterBackend for MmioRegisters {
    fn read(&mut self, offset: usize) -> u32 {
        unsafe { core::ptr::read_volatile(self.base.add(offset / 4)) }
    }

    fn write(&mut self, offset: usize, value: u32) {
        unsafe { core::ptr::write_volatile(self.base.add(offset / 4), value) }
    }
}

// ============================================================================
// DELAYS AND BOUNDED POLLING
// ============================================================================

pub trait Delay: Send + Sync {
    /// Busy-wait for `us` microseconds
    fn wait_us(&self, us: u32);
    /// Yield the thread for `ms` milliseconds
    fn sleep_ms(&self, ms: u32);
}

/// Delay backed by `std::thread::sleep`
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn wait_us(&self, us: u32) {
        thread::sleep(Duration::from_micros(us as u64));
    }

    fn sleep_ms(&self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
}

impl PollOutcome {
    pub fn is_ready(self) -> bool {
        self == PollOutcome::Ready
    }
}

/// Number of predicate evaluations for a `(step, ceiling)` pair
pub const fn poll_attempts(step_us: u32, ceiling_us: u32) -> u32 {
    if step_us == 0 {
        return 1;
    }
    let n = ceiling_us.div_ceil(step_us);
    if n == 0 {
        1
    } else {
        n
    }
}

/// Evaluate `ready` at most `ceil(ceiling_us / step_us)` times, waiting
/// `step_us` after every miss.
pub fn poll_until<F>(delay: &dyn Delay, step_us: u32, ceiling_us: u32, mut ready: F) -> PollOutcome
where
    F: FnMut() -> bool,
{
    for _ in 0..poll_attempts(step_us, ceiling_us) {
        if ready() {
            return PollOutcome::Ready;
        }
        delay.wait_us(step_us);
    }
    PollOutcome::TimedOut
}

// ============================================================================
// CLOCK SERVICE
// ============================================================================

/// Clock domains the transport reconfigures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockModule {
    /// DSI byte clock of one instance
    Dsi(usize),
    /// Display controller pixel clock
    Display(usize),
    /// Host interface clock gated around every FIFO access
    Host,
}

/// Acceptable window around a requested rate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreqRange {
    pub min_khz: u32,
    pub max_khz: u32,
}

impl FreqRange {
    /// 99%..109% of `target_khz`
    pub fn around(target_khz: u32) -> Self {
        let t = target_khz as u64;
        Self {
            min_khz: (t * 99 / 100) as u32,
            max_khz: (t * 109 / 100).min(u32::MAX as u64) as u32,
        }
    }

    pub fn contains(&self, khz: u32) -> bool {
        khz >= self.min_khz && khz <= self.max_khz
    }
}

pub trait ClockService: Send + Sync {
    /// Program `module` as close to `target_khz` as possible, returning the
    /// rate actually achieved.
    fn configure(&self, module: ClockModule, target_khz: u32, range: Option<FreqRange>)
        -> DsiResult<u32>;
    fn current_khz(&self, module: ClockModule) -> u32;
    /// Enable/disable pairs nest; the clock stops on the last disable
    fn enable(&self, module: ClockModule) -> DsiResult<()>;
    fn disable(&self, module: ClockModule);
    fn reset(&self, module: ClockModule);
}

// ============================================================================
// DISPLAY CONTROLLER
// ============================================================================

pub trait DisplayController: Send + Sync {
    fn write_reg(&self, controller: usize, offset: usize, value: u32);
    fn read_reg(&self, controller: usize, offset: usize) -> u32;
    /// Block until the next frame boundary on `controller`
    fn wait_for_vblank(&self, controller: usize);
    /// Route the controller's pixel output to DSI
    fn set_dsi_output(&self, controller: usize, active: bool);
}

// ============================================================================
// GPIO / TE
// ============================================================================

/// Tearing-effect line, one-shot per wait
pub trait TeSignal: Send {
    /// Re-arm the edge interrupt
    fn unmask(&mut self);
    /// Wait for one edge; false on timeout
    fn wait_timeout_ms(&mut self, ms: u32) -> bool;
}

pub trait GpioService: Send + Sync {
    /// Register an edge handler on `pin`. The returned signal starts masked.
    fn register_te(&self, pin: u32) -> DsiResult<Box<dyn TeSignal>>;
    fn release_te(&self, pin: u32);
}

// ============================================================================
// APERTURE MAPPING AND PADS
// ============================================================================

pub trait ApertureMapper: Send + Sync {
    fn map(&self, instance: usize) -> DsiResult<Box<dyn RegisterBackend + Send>>;
    fn unmap(&self, instance: usize);
}

pub trait PadCalibrator: Send + Sync {
    fn calibrate(&self, instance: usize);
}

/// Collaborators shared by both transport instances
#[derive(Clone)]
pub struct Services {
    pub clock: Arc<dyn ClockService>,
    pub display: Arc<dyn DisplayController>,
    pub gpio: Arc<dyn GpioService>,
    pub mapper: Arc<dyn ApertureMapper>,
    pub pads: Arc<dyn PadCalibrator>,
    pub delay: Arc<dyn Delay>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDelay;
    use std::cell::Cell;

    #[test]
    fn test_poll_attempts() {
        assert_eq!(poll_attempts(1000, 250_000), 250);
        assert_eq!(poll_attempts(5, 5000), 1000);
        assert_eq!(poll_attempts(3, 10), 4);
        assert_eq!(poll_attempts(10, 0), 1);
        assert_eq!(poll_attempts(0, 100), 1);
    }

    #[test]
    fn test_poll_until_times_out_after_exact_count() {
        let delay = MockDelay::new();
        let calls = Cell::new(0u32);
        let outcome = poll_until(&delay, 10, 95, || {
            calls.set(calls.get() + 1);
            false
        });
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(calls.get(), 10);
        assert_eq!(delay.elapsed_us(), 100);
    }

    #[test]
    fn test_poll_until_ready_stops_early() {
        let delay = MockDelay::new();
        let calls = Cell::new(0u32);
        let outcome = poll_until(&delay, 10, 1000, || {
            calls.set(calls.get() + 1);
            calls.get() == 3
        });
        assert!(outcome.is_ready());
        assert_eq!(calls.get(), 3);
        assert_eq!(delay.elapsed_us(), 20);
    }

    #[test]
    fn test_freq_range() {
        let range = FreqRange::around(100_000);
        assert_eq!(range.min_khz, 99_000);
        assert_eq!(range.max_khz, 109_000);
        assert!(range.contains(100_000));
        assert!(!range.contains(110_000));
    }
}
