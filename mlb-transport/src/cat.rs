//! Channel assignment table.
//!
//! Each direction of a channel owns two 16-bit entries, one in the
//! bus-facing (MLB) namespace and one in the host-facing (HBI) namespace.
//! Their enable bits go up and down together: every operation that touches
//! enables writes all four entries of a channel pair under one hold of the
//! table window, and puts the previous entries back if a write fails.

use embedded_hal::delay::DelayNs;

use crate::constants::{CAT_BUS_BASE, CAT_HOST_BASE, CAT_ROWS};
use crate::error::{Error, RegisterTimeout, TimeoutStage};
use crate::hal::Mmio;
use crate::protocol::{poll_until, ControlPort, Window};
use crate::regs::*;
use crate::types::{ChannelType, Direction};

/// Direction × DMA side of one CAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatRoute {
    /// Receive channel, bus into the DBR.
    RxInbound,
    /// Receive channel, DBR out to host memory.
    RxOutbound,
    /// Transmit channel, host memory into the DBR.
    TxInbound,
    /// Transmit channel, DBR out to the bus.
    TxOutbound,
}

impl CatRoute {
    /// First row of the namespace this route's entry lives in.
    pub const fn namespace(self) -> u32 {
        match self {
            CatRoute::RxInbound | CatRoute::TxOutbound => CAT_BUS_BASE,
            CatRoute::TxInbound | CatRoute::RxOutbound => CAT_HOST_BASE,
        }
    }

    /// Outbound DMA reads the DBR.
    pub const fn read_not_write(self) -> bool {
        matches!(self, CatRoute::TxOutbound | CatRoute::RxOutbound)
    }

    /// The two routes of one channel direction.
    pub const fn of(direction: Direction) -> [CatRoute; 2] {
        match direction {
            Direction::Receive => [CatRoute::RxInbound, CatRoute::RxOutbound],
            Direction::Transmit => [CatRoute::TxOutbound, CatRoute::TxInbound],
        }
    }
}

/// Enabled CAT entry: `CE | type << 8 | channel`, plus RNW for outbound
/// routes and MT (muted) for synchronous channels.
pub const fn entry(channel: u8, ctype: ChannelType, route: CatRoute) -> u16 {
    let mut value = CAT_CE | ((ctype as u16) << CAT_CT_SHIFT) | (channel as u16 & CAT_CL_MASK);
    if route.read_not_write() {
        value |= CAT_RNW;
    }
    if matches!(ctype, ChannelType::Synchronous) {
        value |= CAT_MT;
    }
    value
}

/// The four entries of a channel pair, in programming order.
fn pair_slots(rx: u8, tx: u8) -> [(u8, CatRoute); 4] {
    [
        (rx, CatRoute::RxInbound),
        (tx, CatRoute::TxOutbound),
        (rx, CatRoute::RxOutbound),
        (tx, CatRoute::TxInbound),
    ]
}

/// CAT operations, borrowed from a [`ControlPort`].
pub struct Cat<'a, M, D> {
    port: &'a ControlPort<M, D>,
}

impl<'a, M, D> Cat<'a, M, D>
where
    M: Mmio,
    D: DelayNs + Clone,
{
    pub(crate) fn new(port: &'a ControlPort<M, D>) -> Self {
        Cat { port }
    }

    /// Write an enabled entry for `channel` on `route`.
    pub fn init_channel(&self, channel: u8, route: CatRoute, ctype: ChannelType) -> Result<(), Error> {
        let value = entry(channel, ctype, route);
        log::debug!("cat {:?} ch {}: {:#06x}", route, channel, value);
        self.port.cat_write(route.namespace(), channel, value)
    }

    /// Write the entry with its enable clear, so nothing moves before start.
    pub fn stage_channel(&self, channel: u8, route: CatRoute, ctype: ChannelType) -> Result<(), Error> {
        let value = entry(channel, ctype, route) & !CAT_CE;
        self.port.cat_write(route.namespace(), channel, value)
    }

    /// Zero both namespaces.
    pub fn reset_all(&self) -> Result<(), Error> {
        let mut window = self.port.lock();
        for row in 0..CAT_ROWS as u32 {
            window.write_row(CAT_BUS_BASE + row, [0; 4])?;
            window.write_row(CAT_HOST_BASE + row, [0; 4])?;
        }
        Ok(())
    }

    /// Enable all four entries of a non-synchronous pair.
    pub fn enable_pair(&self, rx: u8, tx: u8, ctype: ChannelType) -> Result<(), Error> {
        self.replace_pair(rx, tx, |ch, route| entry(ch, ctype, route))
    }

    /// Wait for the bus clock and lock, then enable and unmute a synchronous
    /// pair.
    ///
    /// Neither wait holds the table window. A timeout leaves the entries as
    /// they were and reports which wait expired.
    pub fn unmute_sync_channel(&self, rx: u8, tx: u8) -> Result<(), Error> {
        let budget = self.port.config().sync_lock_poll;
        let mmio = self.port.mmio();

        let mut delay = self.port.delay();
        let clock_running = poll_until(&mut delay, budget, || {
            if mmio.read(MLBC1) & MLBC1_CLKM == 0 {
                return true;
            }
            self.port.modify_register(MLBC1, MLBC1_CLKM, 0);
            false
        });
        if !clock_running {
            return Err(RegisterTimeout {
                stage: TimeoutStage::ClockRunning,
            }
            .into());
        }

        let mut delay = self.port.delay();
        let locked = poll_until(&mut delay, budget, || mmio.read(MLBC0) & MLBC0_MLBLK != 0);
        if !locked {
            return Err(RegisterTimeout {
                stage: TimeoutStage::BusLock,
            }
            .into());
        }

        self.replace_pair(rx, tx, |ch, route| {
            entry(ch, ChannelType::Synchronous, route) & !CAT_MT
        })
    }

    /// Clear the enable bits of a pair, keeping the rest of each entry.
    pub fn disable_pair(&self, rx: u8, tx: u8) -> Result<(), Error> {
        let mut window = self.port.lock();
        for (ch, route) in pair_slots(rx, tx) {
            let value = window.cat_read(route.namespace(), ch)?;
            window.cat_write(route.namespace(), ch, value & !CAT_CE)?;
        }
        Ok(())
    }

    /// Zero the four entries of a pair.
    pub fn clear_pair(&self, rx: u8, tx: u8) -> Result<(), Error> {
        let mut window = self.port.lock();
        for (ch, route) in pair_slots(rx, tx) {
            window.cat_write(route.namespace(), ch, 0)?;
        }
        Ok(())
    }

    /// Replace the four entries of a pair; on failure, write back what was
    /// there before.
    fn replace_pair(
        &self,
        rx: u8,
        tx: u8,
        value: impl Fn(u8, CatRoute) -> u16,
    ) -> Result<(), Error> {
        let slots = pair_slots(rx, tx);
        let mut window = self.port.lock();
        let mut previous = [0u16; 4];
        for (saved, (ch, route)) in previous.iter_mut().zip(slots) {
            *saved = window.cat_read(route.namespace(), ch)?;
        }
        for (written, (ch, route)) in slots.iter().enumerate() {
            if let Err(e) = window.cat_write(route.namespace(), *ch, value(*ch, *route)) {
                restore(&mut window, &slots[..=written], &previous);
                return Err(e);
            }
        }
        Ok(())
    }
}

fn restore<M, D>(window: &mut Window<'_, M, D>, slots: &[(u8, CatRoute)], previous: &[u16; 4])
where
    M: Mmio,
    D: DelayNs + Clone,
{
    for ((ch, route), value) in slots.iter().zip(previous) {
        if window.cat_write(route.namespace(), *ch, *value).is_err() {
            log::warn!("cat {:?} ch {}: restore failed", route, ch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PollBudget, TransportConfig};
    use crate::mock::{MockMlb, NoDelay};

    fn port(mlb: &MockMlb) -> ControlPort<&MockMlb, NoDelay> {
        ControlPort::new(mlb, NoDelay::default(), TransportConfig::default())
    }

    fn cat_rows(mlb: &MockMlb) -> [[u32; 4]; 16] {
        let mut rows = [[0; 4]; 16];
        for (i, row) in rows.iter_mut().enumerate() {
            *row = mlb.row(CAT_BUS_BASE + i as u32);
        }
        rows
    }

    #[test]
    fn entry_encoding() {
        assert_eq!(
            entry(16, ChannelType::Control, CatRoute::RxInbound),
            CAT_CE | (1 << 8) | 16
        );
        assert_eq!(
            entry(0, ChannelType::Asynchronous, CatRoute::TxOutbound),
            CAT_CE | (2 << 8) | CAT_RNW
        );
        assert_eq!(
            entry(8, ChannelType::Synchronous, CatRoute::RxOutbound),
            CAT_CE | CAT_RNW | CAT_MT | 8
        );
    }

    #[test]
    fn routes_select_namespace() {
        assert_eq!(CatRoute::RxInbound.namespace(), CAT_BUS_BASE);
        assert_eq!(CatRoute::TxOutbound.namespace(), CAT_BUS_BASE);
        assert_eq!(CatRoute::RxOutbound.namespace(), CAT_HOST_BASE);
        assert_eq!(CatRoute::TxInbound.namespace(), CAT_HOST_BASE);
    }

    #[test]
    fn stage_then_enable_pair() {
        let mlb = MockMlb::new();
        let port = port(&mlb);
        let cat = port.cat();
        for direction in [Direction::Receive, Direction::Transmit] {
            let ch = if direction == Direction::Receive { 16 } else { 0 };
            for route in CatRoute::of(direction) {
                cat.stage_channel(ch, route, ChannelType::Control).unwrap();
            }
        }
        assert_eq!(port.cat_read(CAT_BUS_BASE, 16).unwrap() & CAT_CE, 0);
        assert_eq!(port.cat_read(CAT_HOST_BASE, 0).unwrap() & CAT_CE, 0);

        cat.enable_pair(16, 0, ChannelType::Control).unwrap();
        assert_eq!(port.cat_read(CAT_BUS_BASE, 16).unwrap(), CAT_CE | 0x100 | 16);
        assert_eq!(port.cat_read(CAT_HOST_BASE, 16).unwrap(), CAT_CE | CAT_RNW | 0x100 | 16);
        assert_eq!(port.cat_read(CAT_BUS_BASE, 0).unwrap(), CAT_CE | CAT_RNW | 0x100);
        assert_eq!(port.cat_read(CAT_HOST_BASE, 0).unwrap(), CAT_CE | 0x100);

        cat.disable_pair(16, 0).unwrap();
        assert_eq!(port.cat_read(CAT_BUS_BASE, 16).unwrap(), 0x100 | 16);
        cat.clear_pair(16, 0).unwrap();
        assert_eq!(cat_rows(&mlb), [[0; 4]; 16]);
    }

    #[test]
    fn unmute_writes_four_unmuted_entries() {
        let mlb = MockMlb::new();
        let port = port(&mlb);
        port.cat().unmute_sync_channel(24, 8).unwrap();
        assert_eq!(port.cat_read(CAT_BUS_BASE, 24).unwrap(), CAT_CE | 24);
        assert_eq!(port.cat_read(CAT_BUS_BASE, 8).unwrap(), CAT_CE | CAT_RNW | 8);
        assert_eq!(port.cat_read(CAT_HOST_BASE, 24).unwrap(), CAT_CE | CAT_RNW | 24);
        assert_eq!(port.cat_read(CAT_HOST_BASE, 8).unwrap(), CAT_CE | 8);
    }

    #[test]
    fn unmute_without_lock_times_out_and_leaves_rows() {
        let mlb = MockMlb::new();
        mlb.set_locked(false);
        mlb.set_row(CAT_BUS_BASE + 1, [0x1234_5678, 0, 0, 0]);
        mlb.set_row(CAT_HOST_BASE + 3, [0, 0, 0, 0x0000_2818]);
        let before = cat_rows(&mlb);

        let delay = NoDelay::default();
        let config = TransportConfig {
            sync_lock_poll: PollBudget::new(1_000, 50_000),
            ..TransportConfig::default()
        };
        let port = ControlPort::new(&mlb, delay.clone(), config);
        let err = port.cat().unmute_sync_channel(24, 8).unwrap_err();
        assert_eq!(
            err,
            Error::RegisterTimeout(RegisterTimeout {
                stage: TimeoutStage::BusLock
            })
        );
        assert_eq!(delay.elapsed_ns(), 50_000);
        assert_eq!(cat_rows(&mlb), before);
        assert_eq!(mlb.transactions(), 0);
    }

    #[test]
    fn unmute_without_clock_clears_clkm_while_waiting() {
        let mlb = MockMlb::new();
        mlb.set_clock_running(false);
        mlb.raise(MLBC1, 0x42 << MLBC1_NDA_SHIFT);
        let config = TransportConfig {
            sync_lock_poll: PollBudget::new(1_000, 3_000),
            ..TransportConfig::default()
        };
        let port = ControlPort::new(&mlb, NoDelay::default(), config);
        let err = port.cat().unmute_sync_channel(24, 8).unwrap_err();
        assert_eq!(
            err,
            Error::RegisterTimeout(RegisterTimeout {
                stage: TimeoutStage::ClockRunning
            })
        );
        let clears = mlb.writes_to(MLBC1);
        assert_eq!(clears.len(), 4);
        assert!(clears.iter().all(|v| v & MLBC1_CLKM == 0 && v & MLBC1_NDA_MASK != 0));
    }

    // Transaction counts differ when every write is read back.
    #[cfg(not(feature = "debug-readback"))]
    #[test]
    fn failed_write_restores_previous_entries() {
        let mlb = MockMlb::new();
        let port = port(&mlb);
        port.cat_write(CAT_BUS_BASE, 16, 0x0110).unwrap();
        port.cat_write(CAT_HOST_BASE, 16, 0x0010).unwrap();
        let before = cat_rows(&mlb);
        // Four snapshot reads, the first entry's read-modify-write, then the
        // second entry's read; its write hangs.
        mlb.drop_transaction(4 + 2 + 1);
        let err = port.cat().enable_pair(16, 0, ChannelType::Control).unwrap_err();
        assert!(matches!(err, Error::RegisterTimeout(_)));
        assert_eq!(cat_rows(&mlb), before);
    }
}
