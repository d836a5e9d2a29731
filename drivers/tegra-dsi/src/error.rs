//! Error types for the DSI transport
//!
//! Every operation returns [`DsiResult`]. Timeouts and protocol violations
//! fail a single operation and leave the instance usable. A
//! [`DsiError::FatalHardwareFault`] means the controller state is unknown and
//! the caller should stop driving it.

use core::fmt;
use thiserror::Error;

/// Conditions after which the hardware state can no longer be trusted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalFault {
    /// TRIGGER never cleared after switching HS/LP transmission
    CommandModeNotReady,
    /// Raw data-format value outside the known set
    UnknownDataFormat,
    /// HS clock lane could not be brought up after all retries
    ClockEnableRetriesExhausted,
    /// POWER_CONTROL did not latch the requested value
    PowerControlStuck,
}

impl fmt::Display for FatalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FatalFault::CommandModeNotReady => "command mode not ready after mode switch",
            FatalFault::UnknownDataFormat => "unknown pixel data format",
            FatalFault::ClockEnableRetriesExhausted => "clock enable retries exhausted",
            FatalFault::PowerControlStuck => "power control register did not settle",
        };
        f.write_str(msg)
    }
}

/// DSI transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DsiError {
    #[error("DSI instance {0} is not initialized")]
    NotInitialized(usize),

    #[error("DSI instance {0} does not exist")]
    InvalidInstance(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("host FIFO not ready before send")]
    HardwareBusyTimeout,

    #[error("host trigger did not complete")]
    TriggerTimeout,

    #[error("bus turn-around did not complete")]
    BtaTimeout,

    #[error("read FIFO holds {words} stale words")]
    FifoNotEmptyAtStart { words: u32 },

    #[error("read FIFO overflow or underflow (status {status:#010x})")]
    ReadFifoFull { status: u32 },

    #[error("BTA returned {word_count} error words, first {first_word:#010x}")]
    BtaProtocolError { word_count: u32, first_word: u32 },

    #[error("no read response (word count {0})")]
    NoReadResponse(u32),

    #[error("panel sent an acknowledge/error report ({len} bytes copied)")]
    ReadAckError { len: usize },

    #[error("unrecognized read response header {header:#04x} ({len} bytes copied)")]
    ReadInvalidResponse { header: u8, len: usize },

    #[error("clock service: {0}")]
    Clock(String),

    #[error("register aperture: {0}")]
    Mapping(String),

    #[error("GPIO service: {0}")]
    Gpio(String),

    #[error("panel configuration: {0}")]
    Config(String),

    #[error("fatal hardware fault: {0}")]
    FatalHardwareFault(FatalFault),
}

impl DsiError {
    /// True for faults after which the instance must not be driven further
    pub fn is_fatal(&self) -> bool {
        matches!(self, DsiError::FatalHardwareFault(_))
    }

    /// True for bounded-wait expiries
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DsiError::HardwareBusyTimeout | DsiError::TriggerTimeout | DsiError::BtaTimeout
        )
    }
}

impl From<FatalFault> for DsiError {
    fn from(fault: FatalFault) -> Self {
        DsiError::FatalHardwareFault(fault)
    }
}

/// Result type for DSI operations
pub type DsiResult<T> = Result<T, DsiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err: DsiError = FatalFault::ClockEnableRetriesExhausted.into();
        assert!(err.is_fatal());
        assert!(!err.is_timeout());
        assert!(DsiError::BtaTimeout.is_timeout());
        assert!(!DsiError::ReadAckError { len: 2 }.is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = DsiError::FatalHardwareFault(FatalFault::CommandModeNotReady);
        assert_eq!(
            err.to_string(),
            "fatal hardware fault: command mode not ready after mode switch"
        );
        let err = DsiError::ReadInvalidResponse { header: 0x99, len: 4 };
        assert!(err.to_string().contains("0x99"));
    }
}
