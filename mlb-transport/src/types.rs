//! Small value types shared by every layer.

use bitflags::bitflags;

use crate::constants::*;

/// The four MediaLB traffic classes.
///
/// The discriminant is the hardware channel-type code written into CAT
/// entries. Each class is also one device node of the [`Transport`](crate::Transport).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelType {
    Synchronous = 0,
    Control = 1,
    Asynchronous = 2,
    Isochronous = 3,
}

impl ChannelType {
    /// All classes, in device-node order.
    pub const ALL: [ChannelType; 4] = [
        ChannelType::Synchronous,
        ChannelType::Control,
        ChannelType::Asynchronous,
        ChannelType::Isochronous,
    ];

    /// Index of this class in device-node order.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short device-node name.
    pub const fn name(self) -> &'static str {
        match self {
            ChannelType::Synchronous => "sync",
            ChannelType::Control => "ctrl",
            ChannelType::Asynchronous => "async",
            ChannelType::Isochronous => "isoc",
        }
    }

    /// Bus-side buffer depth in bytes, which is also the size of one
    /// host-side packet for this class.
    pub const fn buffer_depth(self) -> u16 {
        match self {
            ChannelType::Synchronous => SYNC_BUF_DEPTH,
            ChannelType::Control => CTRL_BUF_DEPTH,
            ChannelType::Asynchronous => ASYNC_BUF_DEPTH,
            ChannelType::Isochronous => ISOC_BUF_DEPTH,
        }
    }

    /// Start of this class's region in the data buffer region.
    pub const fn dbr_offset(self) -> u16 {
        match self {
            ChannelType::Synchronous => SYNC_DBR_OFFSET,
            ChannelType::Control => CTRL_DBR_OFFSET,
            ChannelType::Asynchronous => ASYNC_DBR_OFFSET,
            ChannelType::Isochronous => ISOC_DBR_OFFSET,
        }
    }

    /// Control and asynchronous channels move discrete packets, one per
    /// ping/pong half; the others stream.
    pub const fn is_packetized(self) -> bool {
        matches!(self, ChannelType::Control | ChannelType::Asynchronous)
    }
}

/// Transfer direction as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bus to host.
    Receive,
    /// Host to bus.
    Transmit,
}

/// Logical channel numbers of one device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPair {
    pub rx: u8,
    pub tx: u8,
}

impl ChannelPair {
    pub const fn new(rx: u8, tx: u8) -> Self {
        ChannelPair { rx, tx }
    }

    /// Both numbers address a logical channel and they differ.
    pub const fn is_valid(&self) -> bool {
        (self.rx as usize) < LOGICAL_CHANNELS
            && (self.tx as usize) < LOGICAL_CHANNELS
            && self.rx != self.tx
    }

    /// Unpack the `tx << 16 | rx` form used by the legacy address call.
    pub const fn from_packed(packed: u32) -> Option<Self> {
        let tx = (packed >> 16) & 0xFFFF;
        let rx = packed & 0xFFFF;
        if tx >= LOGICAL_CHANNELS as u32 || rx >= LOGICAL_CHANNELS as u32 {
            return None;
        }
        Some(ChannelPair::new(rx as u8, tx as u8))
    }

    pub const fn get(&self, direction: Direction) -> u8 {
        match direction {
            Direction::Receive => self.rx,
            Direction::Transmit => self.tx,
        }
    }

    /// Default assignment for a device node before the user sets one.
    pub const fn default_for(ctype: ChannelType) -> Self {
        match ctype {
            ChannelType::Control => ChannelPair::new(16, 0),
            ChannelType::Asynchronous => ChannelPair::new(48, 32),
            ChannelType::Synchronous => ChannelPair::new(24, 8),
            ChannelType::Isochronous => ChannelPair::new(56, 40),
        }
    }
}

bitflags! {
    /// Pending protocol exceptions of one device node.
    ///
    /// Transmit-channel events occupy the low half-word, receive-channel
    /// events the same bits shifted into the high half-word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExceptionFlags: u32 {
        const TX_PROTOCOL_ERROR = 1 << 0;
        const TX_BREAK = 1 << 1;
        const TX_BUFFER_OVERFLOW = 1 << 2;
        const RX_PROTOCOL_ERROR = 1 << 16;
        const RX_BREAK = 1 << 17;
        const RX_BUFFER_OVERFLOW = 1 << 18;
    }
}

impl ExceptionFlags {
    /// Protocol error for a channel of the given direction.
    pub const fn protocol_error(direction: Direction) -> Self {
        match direction {
            Direction::Transmit => Self::TX_PROTOCOL_ERROR,
            Direction::Receive => Self::RX_PROTOCOL_ERROR,
        }
    }

    /// A break (aborted packet) reported by a channel of the given direction.
    pub const fn break_received(direction: Direction) -> Self {
        match direction {
            Direction::Transmit => Self::TX_BREAK,
            Direction::Receive => Self::RX_BREAK,
        }
    }

    pub const fn buffer_overflow(direction: Direction) -> Self {
        match direction {
            Direction::Transmit => Self::TX_BUFFER_OVERFLOW,
            Direction::Receive => Self::RX_BUFFER_OVERFLOW,
        }
    }
}

bitflags! {
    /// Result of [`Transport::poll_readiness`](crate::Transport::poll_readiness).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Readiness: u8 {
        /// A packet is waiting in the receive ring.
        const READABLE = 1 << 0;
        /// No transmit is in flight.
        const WRITABLE = 1 << 1;
        /// Exceptions are pending.
        const EXCEPTION = 1 << 2;
    }
}

/// MediaLB bus clock speed, in multiples of the frame rate (Fs).
///
/// The discriminant is the MLBC0.MLBCLK code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BusClockClass {
    Fs256 = 0,
    Fs512 = 1,
    Fs1024 = 2,
    Fs2048 = 3,
    Fs3072 = 4,
    Fs4096 = 5,
    Fs6144 = 6,
    Fs8192 = 7,
}

impl BusClockClass {
    /// Map a clock rate in Fs to its class.
    pub const fn from_fs(fs: u32) -> Option<Self> {
        Some(match fs {
            256 => BusClockClass::Fs256,
            512 => BusClockClass::Fs512,
            1024 => BusClockClass::Fs1024,
            2048 => BusClockClass::Fs2048,
            3072 => BusClockClass::Fs3072,
            4096 => BusClockClass::Fs4096,
            6144 => BusClockClass::Fs6144,
            8192 => BusClockClass::Fs8192,
            _ => return None,
        })
    }

    pub const fn from_code(code: u8) -> Self {
        match code & 0x7 {
            0 => BusClockClass::Fs256,
            1 => BusClockClass::Fs512,
            2 => BusClockClass::Fs1024,
            3 => BusClockClass::Fs2048,
            4 => BusClockClass::Fs3072,
            5 => BusClockClass::Fs4096,
            6 => BusClockClass::Fs6144,
            _ => BusClockClass::Fs8192,
        }
    }

    /// Speeds of 2048·Fs and above use the 6-pin interface and its PLL.
    pub const fn needs_pll(self) -> bool {
        self as u8 >= BusClockClass::Fs2048 as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_addresses_split_high_tx_low_rx() {
        let pair = ChannelPair::from_packed((5 << 16) | 9).unwrap();
        assert_eq!(pair, ChannelPair::new(9, 5));
        assert!(ChannelPair::from_packed(64).is_none());
        assert!(ChannelPair::from_packed(64 << 16).is_none());
    }

    #[test]
    fn pair_validity() {
        assert!(ChannelPair::new(1, 2).is_valid());
        assert!(!ChannelPair::new(3, 3).is_valid());
        assert!(!ChannelPair::new(64, 0).is_valid());
        for ctype in ChannelType::ALL {
            assert!(ChannelPair::default_for(ctype).is_valid());
        }
    }

    #[test]
    fn clock_classes() {
        assert_eq!(BusClockClass::from_fs(256), Some(BusClockClass::Fs256));
        assert_eq!(BusClockClass::from_fs(6144), Some(BusClockClass::Fs6144));
        assert_eq!(BusClockClass::from_fs(300), None);
        assert!(!BusClockClass::Fs1024.needs_pll());
        assert!(BusClockClass::Fs2048.needs_pll());
        assert_eq!(BusClockClass::from_code(5), BusClockClass::Fs4096);
    }

    #[test]
    fn dbr_regions_do_not_overlap() {
        let mut prev_end = 0u32;
        for ctype in ChannelType::ALL {
            let start = ctype.dbr_offset() as u32;
            assert!(start >= prev_end);
            prev_end = start + 2 * ctype.buffer_depth() as u32;
        }
    }
}
