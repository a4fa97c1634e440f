//! Indirect access to the controller's descriptor tables.
//!
//! The CDT, ADT and CAT are not memory mapped. A row is reached through a
//! window of registers: four data words (MDAT0..3), four per-bit write
//! enables (MDWE0..3), an address register (MADR) whose write starts the
//! transaction, and a control register (MCTL) whose XCMP bit reports
//! completion.
//!
//! ## Transaction sequence
//!
//! ```text
//! write:  MDWEn ← mask (if changed)   read:  MCTL ← 0
//!         MDATn ← data                       MADR ← addr
//!         MCTL  ← 0                          poll MCTL.XCMP
//!         MADR  ← WNR | addr                 MDATn → data
//!         poll MCTL.XCMP                     MCTL ← 0
//!         MCTL  ← 0
//! ```
//!
//! The window is one shared resource, so [`ControlPort`] guards it with a
//! `spin::Mutex`: the lock never sleeps and is taken from both process and
//! interrupt context. Nothing that can block runs while it is held. On a
//! single-core target the platform must keep the controller's interrupts
//! masked around process-context calls, the same contract a kernel's
//! `irqsave` spinlock provides.
//!
//! Every wait on XCMP is bounded by the [`PollBudget`] in the configuration.
//! A transaction that never completes is abandoned (MCTL cleared) and
//! reported as [`RegisterTimeout`].

use embedded_hal::delay::DelayNs;
use spin::{Mutex, MutexGuard};

use crate::adt::Adt;
use crate::cat::Cat;
use crate::cdt::Cdt;
use crate::config::{PollBudget, TransportConfig};
use crate::constants::{CAT_ENTRIES_PER_ROW, TABLE_END};
use crate::error::{Error, RegisterTimeout};
use crate::hal::Mmio;
use crate::regs::*;

/// A full-row write enable.
pub const FULL_MASK: [u32; 4] = [u32::MAX; 4];

/// Check `done`, sleeping `interval_ns` between checks, until it holds or
/// `timeout_ns` of sleep has been spent. Returns whether it held.
pub(crate) fn poll_until<D: DelayNs>(
    delay: &mut D,
    budget: PollBudget,
    mut done: impl FnMut() -> bool,
) -> bool {
    let step = budget.interval_ns.max(1);
    let mut waited: u32 = 0;
    loop {
        if done() {
            return true;
        }
        if waited >= budget.timeout_ns {
            return false;
        }
        delay.delay_ns(step);
        waited = waited.saturating_add(step);
    }
}

/// State cached while the window is held.
struct WindowState {
    /// Last value written to MDWE0..3; `None` until the first write.
    mdwe: Option<[u32; 4]>,
}

/// Owner of the controller register window.
pub struct ControlPort<M, D> {
    mmio: M,
    delay: D,
    config: TransportConfig,
    window: Mutex<WindowState>,
}

impl<M, D> ControlPort<M, D>
where
    M: Mmio,
    D: DelayNs + Clone,
{
    pub fn new(mmio: M, delay: D, config: TransportConfig) -> Self {
        ControlPort {
            mmio,
            delay,
            config,
            window: Mutex::new(WindowState { mdwe: None }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Direct register access for status registers that live outside the
    /// window (ACSRn, MSn, HCERn). Multi-step sequences on shared
    /// configuration registers go through [`modify_register`](Self::modify_register).
    pub fn mmio(&self) -> &M {
        &self.mmio
    }

    /// A fresh delay for a bounded wait.
    pub(crate) fn delay(&self) -> D {
        self.delay.clone()
    }

    /// Acquire the window for a sequence of row operations.
    pub fn lock(&self) -> Window<'_, M, D> {
        Window {
            port: self,
            state: self.window.lock(),
        }
    }

    pub fn read_row(&self, offset: u32) -> Result<[u32; 4], RegisterTimeout> {
        self.lock().read_row(offset)
    }

    pub fn write_row(&self, offset: u32, row: [u32; 4]) -> Result<(), Error> {
        self.lock().write_row(offset, row)
    }

    /// Write only the bits of `row` selected by `mask`.
    pub fn write_row_masked(&self, offset: u32, row: [u32; 4], mask: [u32; 4]) -> Result<(), Error> {
        self.lock().write_row_masked(offset, row, mask)
    }

    /// Read-modify-write one 16-bit CAT entry; see [`Window::cat_write`].
    pub fn cat_write(&self, table_base: u32, channel: u8, value: u16) -> Result<(), Error> {
        self.lock().cat_write(table_base, channel, value)
    }

    pub fn cat_read(&self, table_base: u32, channel: u8) -> Result<u16, RegisterTimeout> {
        self.lock().cat_read(table_base, channel)
    }

    /// `reg = (reg & !clear) | set` on a controller configuration register,
    /// serialised with table traffic. Returns the new value.
    pub fn modify_register(&self, offset: u32, clear: u32, set: u32) -> u32 {
        let _window = self.window.lock();
        let value = (self.mmio.read(offset) & !clear) | set;
        self.mmio.write(offset, value);
        value
    }

    pub fn cdt(&self) -> Cdt<'_, M, D> {
        Cdt::new(self)
    }

    pub fn cat(&self) -> Cat<'_, M, D> {
        Cat::new(self)
    }

    pub fn adt(&self) -> Adt<'_, M, D> {
        Adt::new(self)
    }
}

/// Exclusive hold on the table window. Dropping it releases the lock.
pub struct Window<'a, M, D> {
    port: &'a ControlPort<M, D>,
    state: MutexGuard<'a, WindowState>,
}

impl<M, D> Window<'_, M, D>
where
    M: Mmio,
    D: DelayNs + Clone,
{
    fn transact(&mut self, madr: u32) -> Result<(), RegisterTimeout> {
        let mmio = &self.port.mmio;
        let offset = madr & MADR_ADDR_MASK;
        mmio.write(MCTL, 0);
        mmio.write(MADR, madr);
        let mut delay = self.port.delay();
        let done = poll_until(&mut delay, self.port.config.register_poll, || {
            mmio.read(MCTL) & MCTL_XCMP != 0
        });
        mmio.write(MCTL, 0);
        if done {
            Ok(())
        } else {
            log::warn!("table transaction at {:#04x} timed out", offset);
            Err(RegisterTimeout::transaction(offset))
        }
    }

    pub fn read_row(&mut self, offset: u32) -> Result<[u32; 4], RegisterTimeout> {
        debug_assert!(offset < TABLE_END);
        self.transact(offset & MADR_ADDR_MASK)?;
        let mmio = &self.port.mmio;
        Ok([
            mmio.read(MDAT[0]),
            mmio.read(MDAT[1]),
            mmio.read(MDAT[2]),
            mmio.read(MDAT[3]),
        ])
    }

    pub fn write_row(&mut self, offset: u32, row: [u32; 4]) -> Result<(), Error> {
        self.write_row_masked(offset, row, FULL_MASK)
    }

    pub fn write_row_masked(
        &mut self,
        offset: u32,
        row: [u32; 4],
        mask: [u32; 4],
    ) -> Result<(), Error> {
        debug_assert!(offset < TABLE_END);
        let mmio = &self.port.mmio;
        if self.state.mdwe != Some(mask) {
            for (reg, bits) in MDWE.iter().zip(mask) {
                mmio.write(*reg, bits);
            }
            self.state.mdwe = Some(mask);
        }
        for (reg, word) in MDAT.iter().zip(row) {
            mmio.write(*reg, word);
        }
        self.transact(MADR_WNR | (offset & MADR_ADDR_MASK))?;

        #[cfg(feature = "debug-readback")]
        {
            let back = self.read_row(offset)?;
            let mismatch = back
                .iter()
                .zip(row)
                .zip(mask)
                .any(|((b, w), m)| (b ^ w) & m != 0);
            if mismatch {
                log::warn!("row {:#04x} read back {:08x?}, wrote {:08x?}", offset, back, row);
                return Err(Error::TableProgrammingError { offset });
            }
        }

        Ok(())
    }

    /// Read-modify-write of CAT entry `channel` in the namespace starting at
    /// `table_base`: row `table_base + channel / 8`, entry `channel % 8`,
    /// which is the low half of word `(channel % 8) / 2` for even channels
    /// and the high half for odd ones.
    pub fn cat_write(&mut self, table_base: u32, channel: u8, value: u16) -> Result<(), Error> {
        let (row_addr, word, shift) = cat_position(table_base, channel);
        let mut row = self.read_row(row_addr)?;
        row[word] = (row[word] & !(0xFFFF << shift)) | ((value as u32) << shift);
        self.write_row(row_addr, row)
    }

    pub fn cat_read(&mut self, table_base: u32, channel: u8) -> Result<u16, RegisterTimeout> {
        let (row_addr, word, shift) = cat_position(table_base, channel);
        let row = self.read_row(row_addr)?;
        Ok((row[word] >> shift) as u16)
    }
}

fn cat_position(table_base: u32, channel: u8) -> (u32, usize, u32) {
    let index = channel as usize % CAT_ENTRIES_PER_ROW;
    let row = table_base + (channel as usize / CAT_ENTRIES_PER_ROW) as u32;
    (row, index / 2, 16 * (index as u32 % 2))
}
