//! Host-side transfer descriptors: each channel direction has one ADT row
//! describing two DMA buffers, ping (half 1) and pong (half 2).
//!
//! Only one half is handed to the controller at a time. Start arms ping;
//! every completion retires the half that finished and arms the other one,
//! so the controller alternates ping, pong, ping without the host touching
//! the row in between.
//!
//! ```text
//! word 0   CE | LE | PG
//! word 1   RDY2 DNE2 ERR2 PS2 MEP2 BD2 | RDY1 DNE1 ERR1 PS1 MEP1 BD1
//! word 2   ping bus address
//! word 3   pong bus address
//! ```

use core::sync::atomic::{AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;

use crate::constants::{ADT_BASE, ADT_MAX_DEPTH, LOGICAL_CHANNELS};
use crate::error::{DepthError, Error};
use crate::hal::Mmio;
use crate::protocol::ControlPort;
use crate::regs::*;
use crate::types::ChannelType;

/// One half of a ping/pong pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Ping,
    Pong,
}

impl Half {
    pub const fn other(self) -> Half {
        match self {
            Half::Ping => Half::Pong,
            Half::Pong => Half::Ping,
        }
    }

    const fn index(self) -> usize {
        match self {
            Half::Ping => 0,
            Half::Pong => 1,
        }
    }

    const fn ready_flag(self) -> u32 {
        match self {
            Half::Ping => ADT_RDY1,
            Half::Pong => ADT_RDY2,
        }
    }

    /// The row word holding this half's buffer address.
    const fn address_word(self) -> usize {
        match self {
            Half::Ping => 2,
            Half::Pong => 3,
        }
    }
}

/// The two buffers of one channel direction and which of them the
/// controller currently owns.
#[derive(Debug)]
pub struct PingPong {
    addrs: [u32; 2],
    active: AtomicU8,
}

impl PingPong {
    pub const fn new(ping: u32, pong: u32) -> Self {
        PingPong {
            addrs: [ping, pong],
            active: AtomicU8::new(0),
        }
    }

    pub fn addr(&self, half: Half) -> u32 {
        self.addrs[half.index()]
    }

    /// The half last handed to the controller.
    pub fn active(&self) -> Half {
        if self.active.load(Ordering::Acquire) == 0 {
            Half::Ping
        } else {
            Half::Pong
        }
    }

    pub fn set_active(&self, half: Half) {
        self.active.store(half.index() as u8, Ordering::Release);
    }

    /// Which half a completion with ADT status `status` retired. Falls back
    /// to the active half when the controller reports neither done flag.
    pub fn completed(&self, status: u32) -> Half {
        if status & ADT_DNE1 != 0 {
            Half::Ping
        } else if status & ADT_DNE2 != 0 {
            Half::Pong
        } else {
            self.active()
        }
    }
}

/// The half to arm after a completion reporting `done_status`.
pub const fn next_half(done_status: u32) -> Half {
    if done_status & ADT_DNE1 != 0 {
        Half::Pong
    } else {
        Half::Ping
    }
}

/// ADT operations, borrowed from a [`ControlPort`].
pub struct Adt<'a, M, D> {
    port: &'a ControlPort<M, D>,
}

impl<'a, M, D> Adt<'a, M, D>
where
    M: Mmio,
    D: DelayNs + Clone,
{
    pub(crate) fn new(port: &'a ControlPort<M, D>) -> Self {
        Adt { port }
    }

    /// Program both halves with their addresses and `depth - 1`. Neither
    /// half is ready afterwards.
    pub fn init_channel(
        &self,
        channel: u8,
        buffers: &PingPong,
        depth: u32,
        ctype: ChannelType,
    ) -> Result<(), Error> {
        if depth == 0 || depth > ADT_MAX_DEPTH as u32 {
            return Err(DepthError {
                channel_type: ctype,
                depth,
            }
            .into());
        }
        let bd = (depth - 1) & ADT_BD_MASK;
        let mut row = [0u32; 4];
        row[0] = ADT_CE | ADT_LE;
        row[1] = (bd << ADT_BD1_SHIFT) | (bd << ADT_BD2_SHIFT) | packet_start(ctype);
        row[2] = buffers.addr(Half::Ping);
        row[3] = buffers.addr(Half::Pong);
        buffers.set_active(Half::Ping);
        log::debug!("adt[{}] {}: {:08x?}", channel, ctype.name(), row);
        self.port.write_row(ADT_BASE + channel as u32, row)
    }

    /// Hand `half` to the controller with buffer `addr`.
    ///
    /// Only the status flags and `half`'s address word are written; the
    /// depth fields and the other half's address are left alone. All done
    /// and error flags are cleared on the way.
    pub fn arm(&self, channel: u8, half: Half, addr: u32, ctype: ChannelType) -> Result<(), Error> {
        let mut row = [0u32; 4];
        let mut mask = [0u32; 4];
        row[1] = packet_start(ctype) | half.ready_flag();
        mask[1] = ADT_STATUS_FLAGS;
        row[half.address_word()] = addr;
        mask[half.address_word()] = u32::MAX;
        self.port
            .write_row_masked(ADT_BASE + channel as u32, row, mask)
    }

    /// Retire the half reported done in `done_status` and arm the other one
    /// with `next_addr`. Returns the half armed.
    ///
    /// Must run exactly once per completion; a second call for the same
    /// completion arms a half the controller may still own.
    pub fn rearm(
        &self,
        channel: u8,
        ctype: ChannelType,
        done_status: u32,
        next_addr: u32,
    ) -> Result<Half, Error> {
        let half = next_half(done_status);
        self.arm(channel, half, next_addr, ctype)?;
        Ok(half)
    }

    /// Row word 1: per-half flags and depths.
    pub fn status(&self, channel: u8) -> Result<u32, Error> {
        Ok(self.port.read_row(ADT_BASE + channel as u32)?[1])
    }

    pub fn reset_all(&self) -> Result<(), Error> {
        let mut window = self.port.lock();
        for channel in 0..LOGICAL_CHANNELS as u32 {
            window.write_row(ADT_BASE + channel, [0; 4])?;
        }
        Ok(())
    }

    pub fn reset_channel(&self, channel: u8) -> Result<(), Error> {
        self.port.write_row(ADT_BASE + channel as u32, [0; 4])
    }
}

/// Packetized channels carry one packet per half.
const fn packet_start(ctype: ChannelType) -> u32 {
    if ctype.is_packetized() {
        ADT_PS1 | ADT_PS2
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::mock::{MockMlb, NoDelay};

    fn port(mlb: &MockMlb) -> ControlPort<&MockMlb, NoDelay> {
        ControlPort::new(mlb, NoDelay::default(), TransportConfig::default())
    }

    #[test]
    fn init_programs_both_halves() {
        let mlb = MockMlb::new();
        let port = port(&mlb);
        let bufs = PingPong::new(0x1000, 0x2000);
        port.adt()
            .init_channel(16, &bufs, 64, ChannelType::Control)
            .unwrap();
        let row = mlb.row(ADT_BASE + 16);
        assert_eq!(row[0], ADT_CE | ADT_LE);
        assert_eq!(row[1], 63 | (63 << 16) | ADT_PS1 | ADT_PS2);
        assert_eq!(row[2..], [0x1000, 0x2000]);

        port.adt()
            .init_channel(8, &bufs, 2048, ChannelType::Synchronous)
            .unwrap();
        assert_eq!(mlb.row(ADT_BASE + 8)[1], 2047 | (2047 << 16));
    }

    #[test]
    fn init_rejects_depth_beyond_field() {
        let mlb = MockMlb::new();
        let port = port(&mlb);
        let bufs = PingPong::new(0, 0);
        assert!(matches!(
            port.adt().init_channel(0, &bufs, 2049, ChannelType::Asynchronous),
            Err(Error::InvalidDepth(_))
        ));
        assert_eq!(mlb.transactions(), 0);
    }

    #[test]
    fn rearm_alternates_halves() {
        let mlb = MockMlb::new();
        let port = port(&mlb);
        let adt = port.adt();
        let bufs = PingPong::new(0x1000, 0x2000);
        adt.init_channel(16, &bufs, 64, ChannelType::Control).unwrap();

        // Ping finished: pong gets the next buffer, ping's address stays.
        let half = adt
            .rearm(16, ChannelType::Control, ADT_DNE1 | ADT_RDY2, 0x3000)
            .unwrap();
        assert_eq!(half, Half::Pong);
        let row = mlb.row(ADT_BASE + 16);
        assert_eq!(row[1], 63 | (63 << 16) | ADT_PS1 | ADT_PS2 | ADT_RDY2);
        assert_eq!(row[2..], [0x1000, 0x3000]);

        // Pong finished (or no flag at all): ping is next.
        assert_eq!(adt.rearm(16, ChannelType::Control, ADT_DNE2, 0x4000).unwrap(), Half::Ping);
        let row = mlb.row(ADT_BASE + 16);
        assert_eq!(row[1] & (ADT_RDY1 | ADT_RDY2 | ADT_DNE1 | ADT_DNE2), ADT_RDY1);
        assert_eq!(row[2..], [0x4000, 0x3000]);
    }

    #[test]
    fn arm_clears_stale_done_and_error_flags() {
        let mlb = MockMlb::new();
        let port = port(&mlb);
        mlb.set_row(ADT_BASE + 3, [ADT_CE, ADT_DNE1 | ADT_ERR2 | 0x7FF, 0x10, 0x20]);
        port.adt().arm(3, Half::Pong, 0x30, ChannelType::Isochronous).unwrap();
        assert_eq!(mlb.row(ADT_BASE + 3), [ADT_CE, ADT_RDY2 | 0x7FF, 0x10, 0x30]);
        assert_eq!(port.adt().status(3).unwrap(), ADT_RDY2 | 0x7FF);
    }

    #[test]
    fn completed_half_follows_done_flags() {
        let bufs = PingPong::new(1, 2);
        assert_eq!(bufs.completed(ADT_DNE1), Half::Ping);
        assert_eq!(bufs.completed(ADT_DNE2), Half::Pong);
        bufs.set_active(Half::Pong);
        assert_eq!(bufs.completed(0), Half::Pong);
        assert_eq!(next_half(ADT_DNE1), Half::Pong);
        assert_eq!(next_half(0), Half::Ping);
        assert_eq!(Half::Ping.other(), Half::Pong);
    }

    #[test]
    fn reset_channel_zeroes_row() {
        let mlb = MockMlb::new();
        mlb.set_row(ADT_BASE + 7, [1, 2, 3, 4]);
        let port = port(&mlb);
        port.adt().reset_channel(7).unwrap();
        assert_eq!(mlb.row(ADT_BASE + 7), [0; 4]);
        mlb.set_row(ADT_BASE + 63, [1, 2, 3, 4]);
        port.adt().reset_all().unwrap();
        assert_eq!(mlb.row(ADT_BASE + 63), [0; 4]);
    }
}
