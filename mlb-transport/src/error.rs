//! Error types.
//!
//! Every fallible operation returns [`Error`]. The two leaf structs,
//! [`RegisterTimeout`] and [`DepthError`], are what the lower layers produce
//! and convert into it with `?`.

use core::fmt;

use crate::types::ChannelType;

/// Which bounded wait ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// A table transaction at `offset` never reported completion.
    Transaction { offset: u32 },
    /// The bus clock was not observed running (clock-missing kept reasserting).
    ClockRunning,
    /// The bus clock ran but the controller never reported lock.
    BusLock,
}

/// A bounded wait on the controller expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterTimeout {
    pub stage: TimeoutStage,
}

impl RegisterTimeout {
    pub const fn transaction(offset: u32) -> Self {
        RegisterTimeout {
            stage: TimeoutStage::Transaction { offset },
        }
    }

    /// Whether the wait was for the bus rather than a table transaction.
    pub const fn is_bus_wait(&self) -> bool {
        matches!(
            self.stage,
            TimeoutStage::ClockRunning | TimeoutStage::BusLock
        )
    }
}

impl fmt::Display for RegisterTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            TimeoutStage::Transaction { offset } => {
                write!(f, "table transaction at {:#04x} timed out", offset)
            }
            TimeoutStage::ClockRunning => f.write_str("bus clock not running"),
            TimeoutStage::BusLock => f.write_str("bus lock not acquired"),
        }
    }
}

/// A buffer depth the channel type cannot encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthError {
    pub channel_type: ChannelType,
    pub depth: u32,
}

impl fmt::Display for DepthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "depth {} is not valid for {} channels",
            self.depth,
            self.channel_type.name()
        )
    }
}

/// Errors returned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A register transaction or bus wait exceeded its budget.
    RegisterTimeout(RegisterTimeout),
    /// A table row read back differently from what was written.
    TableProgrammingError { offset: u32 },
    /// A buffer depth was rejected before touching the controller.
    InvalidDepth(DepthError),
    /// Synchronous channels could not be unmuted: no clock or no lock.
    BusNotLocked,
    /// The call would have to sleep and the caller asked it not to.
    WouldBlock,
    /// A blocking wait was cancelled.
    Interrupted,
    /// The DMA allocator could not satisfy a request.
    OutOfMemory,
    InvalidArgument,
    /// The call is not allowed in the channel's current lifecycle state.
    InvalidState,
    NotOpen,
    Busy,
    /// A transmit frame is larger than the channel's buffer.
    FrameTooLarge,
    /// A read buffer is shorter than one packet.
    BufferTooSmall,
}

impl From<RegisterTimeout> for Error {
    fn from(e: RegisterTimeout) -> Self {
        Error::RegisterTimeout(e)
    }
}

impl From<DepthError> for Error {
    fn from(e: DepthError) -> Self {
        Error::InvalidDepth(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RegisterTimeout(t) => t.fmt(f),
            Error::TableProgrammingError { offset } => {
                write!(f, "table row {:#04x} read back wrong", offset)
            }
            Error::InvalidDepth(d) => d.fmt(f),
            Error::BusNotLocked => f.write_str("MediaLB bus not locked"),
            Error::WouldBlock => f.write_str("operation would block"),
            Error::Interrupted => f.write_str("wait interrupted"),
            Error::OutOfMemory => f.write_str("out of DMA memory"),
            Error::InvalidArgument => f.write_str("invalid argument"),
            Error::InvalidState => f.write_str("invalid channel state"),
            Error::NotOpen => f.write_str("device node not open"),
            Error::Busy => f.write_str("device busy"),
            Error::FrameTooLarge => f.write_str("frame too large"),
            Error::BufferTooSmall => f.write_str("buffer too small"),
        }
    }
}
