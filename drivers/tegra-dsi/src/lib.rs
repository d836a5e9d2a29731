//! MIPI-DSI transport for Tegra display controllers
//!
//! Drives one or two DSI host controllers: computes link timing from panel
//! geometry, programs the per-line packet sequencer, moves DCS commands
//! through the host FIFO, and brings video or command-mode scan-out up and
//! down.
//!
//! # Architecture
//!
//! ```text
//!              DsiContext (lifecycle)
//!          trans_init / write / read / update
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//!  TransportInstance 0     TransportInstance 1
//!          │                       │
//!   ┌──────┼───────┐               │
//!   ▼      ▼       ▼               ▼
//! timing sequencer packet    (same stack)
//!          │
//!          ▼
//!   RegisterBackend ── MMIO or MockRegisters
//! ```
//!
//! Platform services (clocks, display controller, GPIO, aperture mapping,
//! pad calibration, delays) are traits in [`hal`], bundled as
//! [`hal::Services`]. The [`mock`] module implements all of them in memory.
//!
//! # Example
//!
//! ```no_run
//! use tegra_dsi::{mock, DsiContext, PanelDescriptor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let panel = PanelDescriptor::load(std::path::Path::new("panel.toml"))?;
//! let (services, _handles) = mock::services();
//! let ctx = DsiContext::new(services);
//!
//! ctx.trans_init(&panel, 0, 0)?;
//! ctx.trans_enable_command_mode(&panel, 0)?;
//! ctx.trans_write(&panel, 0x05, 0x11, &[], 0, false)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hal;
pub mod lifecycle;
pub mod mock;
pub mod packet;
pub mod regs;
pub mod sequencer;
pub mod timing;
pub mod transport;

pub use config::{
    DataFormat, DeviceTiming, DisplayMode, DsiConfig, DsiDisplayMode, GangedSplit,
    HsClockControl, PanelDescriptor, VideoMode, VideoModeVariant,
};
pub use error::{DsiError, DsiResult, FatalFault};
pub use hal::{RegisterBackend, Services};
pub use lifecycle::{DiagMode, DsiContext, Point, ReadResponse, Rect, MAX_INSTANCES};
pub use packet::PacketDescriptor;
pub use transport::{PartialRegion, TransportInstance};
