//! Channel descriptor table: where each logical channel's buffer lives in
//! the bus-side data buffer region, how deep it is, and its live status.

use embedded_hal::delay::DelayNs;

use crate::constants::*;
use crate::error::{DepthError, Error};
use crate::hal::Mmio;
use crate::protocol::ControlPort;
use crate::regs::*;
use crate::types::{ChannelType, Direction, ExceptionFlags};

/// Encode a buffer depth in bytes as the CDT depth field (`depth - 1`),
/// rejecting depths the channel type cannot use.
///
/// | Type | Rule |
/// |------|------|
/// | synchronous | multiple of `4 × bytes-per-frame` |
/// | control | at least one maximum control packet |
/// | asynchronous | at least one maximum asynchronous packet |
/// | isochronous | whole number of blocks: `(field + 1) % (BS + 1) == 0` |
///
/// Every depth must also fit the 13-bit field.
pub fn encode_depth(ctype: ChannelType, depth: u32) -> Result<u16, DepthError> {
    let err = DepthError {
        channel_type: ctype,
        depth,
    };
    if depth == 0 || depth > CDT_MAX_DEPTH as u32 {
        return Err(err);
    }
    let valid = match ctype {
        ChannelType::Synchronous => depth % (4 * SYNC_BYTES_PER_FRAME as u32) == 0,
        ChannelType::Control => depth >= CTRL_MAX_PACKET as u32,
        ChannelType::Asynchronous => depth >= ASYNC_MAX_PACKET as u32,
        ChannelType::Isochronous => depth % ISOC_BLOCK_SIZE as u32 == 0,
    };
    if !valid {
        return Err(err);
    }
    Ok((depth - 1) as u16)
}

/// Inverse of [`encode_depth`].
pub fn decode_depth(_ctype: ChannelType, field: u16) -> u32 {
    (field as u32 & CDT_BD_MASK) + 1
}

/// Build the CDT row for a channel without touching the controller.
pub fn build_row(
    ctype: ChannelType,
    direction: Direction,
    dbr_offset: u16,
    depth: u32,
) -> Result<[u32; 4], DepthError> {
    let field = encode_depth(ctype, depth)?;
    // Each class's region holds the transmit buffer, then the receive buffer.
    let base = match direction {
        Direction::Transmit => dbr_offset as u32,
        Direction::Receive => dbr_offset as u32 + depth,
    };
    let mut row = [0u32; 4];
    row[3] = ((base << CDT_BA_SHIFT) & CDT_BA_MASK) | (field as u32 & CDT_BD_MASK);
    if ctype == ChannelType::Isochronous {
        row[1] = (ISOC_BLOCK_SIZE as u32 - 1) & CDT_BS_MASK;
    }
    Ok(row)
}

/// CDT operations, borrowed from a [`ControlPort`].
pub struct Cdt<'a, M, D> {
    port: &'a ControlPort<M, D>,
}

impl<'a, M, D> Cdt<'a, M, D>
where
    M: Mmio,
    D: DelayNs + Clone,
{
    pub(crate) fn new(port: &'a ControlPort<M, D>) -> Self {
        Cdt { port }
    }

    /// Program `channel`'s row. The depth is validated before any register
    /// access.
    pub fn init_channel(
        &self,
        channel: u8,
        ctype: ChannelType,
        direction: Direction,
        dbr_offset: u16,
        depth: u32,
    ) -> Result<(), Error> {
        let row = build_row(ctype, direction, dbr_offset, depth)?;
        log::debug!(
            "cdt[{}] {} {:?}: {:08x?}",
            channel,
            ctype.name(),
            direction,
            row
        );
        self.port.write_row(CDT_BASE + channel as u32, row)
    }

    /// Zero the rows of all logical channels.
    pub fn reset_all(&self) -> Result<(), Error> {
        let mut window = self.port.lock();
        for channel in 0..LOGICAL_CHANNELS as u32 {
            window.write_row(CDT_BASE + channel, [0; 4])?;
        }
        Ok(())
    }

    pub fn reset_channel(&self, channel: u8) -> Result<(), Error> {
        self.port.write_row(CDT_BASE + channel as u32, [0; 4])
    }

    pub fn read(&self, channel: u8) -> Result<[u32; 4], Error> {
        Ok(self.port.read_row(CDT_BASE + channel as u32)?)
    }

    /// Read `channel`'s status for `direction`, clear the bits that must be
    /// cleared for the channel to resume, and report them.
    ///
    /// Read and write-back happen under one hold of the window.
    pub fn take_status(
        &self,
        channel: u8,
        ctype: ChannelType,
        direction: Direction,
    ) -> Result<ExceptionFlags, Error> {
        let offset = CDT_BASE + channel as u32;
        let mut window = self.port.lock();
        let mut row = window.read_row(offset)?;
        let (flags, cleared) = status_of(&mut row, ctype, direction);
        if cleared {
            window.write_row(offset, row)?;
        }
        Ok(flags)
    }
}

/// Decode and clear one direction's status in a CDT row. Returns the flags
/// and whether the row changed.
fn status_of(row: &mut [u32; 4], ctype: ChannelType, direction: Direction) -> (ExceptionFlags, bool) {
    let mut flags = ExceptionFlags::empty();
    let before = *row;
    match ctype {
        ChannelType::Synchronous => {
            let shift = sts_shift(direction);
            if (row[2] >> shift) & 0x8 != 0 {
                flags |= ExceptionFlags::protocol_error(direction);
            }
            row[2] &= !(0x8 << shift);
        }
        ChannelType::Control | ChannelType::Asynchronous => {
            let shift = sts_shift(direction);
            let bit4 = match direction {
                Direction::Transmit => CDT_WSTS_4,
                Direction::Receive => CDT_RSTS_4,
            };
            if (row[2] >> shift) & 0x4 != 0 {
                flags |= ExceptionFlags::break_received(direction);
            }
            if row[3] & bit4 != 0 {
                flags |= ExceptionFlags::protocol_error(direction);
            }
            row[2] &= !(0x4 << shift);
            row[3] &= !bit4;
        }
        ChannelType::Isochronous => {
            let shift = match direction {
                Direction::Transmit => CDT_ISOC_WSTS_SHIFT,
                Direction::Receive => CDT_ISOC_RSTS_SHIFT,
            };
            let sts = (row[2] >> shift) & 0x7;
            if sts & 0x2 != 0 {
                flags |= ExceptionFlags::buffer_overflow(direction);
            }
            if sts & 0x4 != 0 {
                flags |= ExceptionFlags::protocol_error(direction);
            }
            row[2] &= !(0x6 << shift);
        }
    }
    (flags, *row != before)
}

fn sts_shift(direction: Direction) -> u32 {
    match direction {
        Direction::Transmit => CDT_WSTS_SHIFT,
        Direction::Receive => CDT_RSTS_SHIFT,
    }
}
