//! Test doubles for the platform traits.
//!
//! [`MockMlb`] simulates just enough of the MLB150 to exercise the driver:
//! a register file, the control-table window with its write-enable masks,
//! and knobs for stalling transactions and for bus clock/lock state.

extern crate std;

use std::boxed::Box;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use std::vec::Vec;

use core::ptr::NonNull;

use embedded_hal::delay::DelayNs;

use crate::constants::TABLE_END;
use crate::hal::{BusPower, DmaAllocator, DmaRegion, Interrupted, Mmio, WaitQueue};
use crate::regs::*;

// ── Simulated controller ───────────────────────────────────────────────────

pub struct MockMlb {
    regs: Mutex<HashMap<u32, u32>>,
    table: Mutex<[[u32; 4]; TABLE_END as usize]>,
    writes: Mutex<Vec<(u32, u32)>>,
    transactions: AtomicUsize,
    /// Transactions left before the window stops completing; negative means never.
    stall_after: AtomicI32,
    /// Index of one upcoming transaction that will not complete; negative means none.
    skip_nth: AtomicI32,
    clock_running: AtomicBool,
    locked: AtomicBool,
    /// Bits of row word 0 that never latch (read-back faults).
    stuck_low: AtomicU32,
}

impl MockMlb {
    pub fn new() -> Self {
        MockMlb {
            regs: Mutex::new(HashMap::new()),
            table: Mutex::new([[0; 4]; TABLE_END as usize]),
            writes: Mutex::new(Vec::new()),
            transactions: AtomicUsize::new(0),
            stall_after: AtomicI32::new(-1),
            skip_nth: AtomicI32::new(-1),
            clock_running: AtomicBool::new(true),
            locked: AtomicBool::new(true),
            stuck_low: AtomicU32::new(0),
        }
    }

    /// Stop completing table transactions from now on.
    pub fn stall(&self) {
        self.stall_after.store(0, Ordering::SeqCst);
    }

    /// Complete `n` more transactions, then stall.
    pub fn stall_after(&self, n: i32) {
        self.stall_after.store(n, Ordering::SeqCst);
    }

    /// Let the `n`th upcoming transaction (0-based) hang, and only that one.
    pub fn drop_transaction(&self, n: i32) {
        self.skip_nth.store(n, Ordering::SeqCst);
    }

    pub fn unstall(&self) {
        self.stall_after.store(-1, Ordering::SeqCst);
    }

    pub fn set_clock_running(&self, on: bool) {
        self.clock_running.store(on, Ordering::SeqCst);
    }

    pub fn set_locked(&self, on: bool) {
        self.locked.store(on, Ordering::SeqCst);
    }

    pub fn set_stuck_low(&self, bits: u32) {
        self.stuck_low.store(bits, Ordering::SeqCst);
    }

    /// Started table transactions, completed or not.
    pub fn transactions(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn row(&self, addr: u32) -> [u32; 4] {
        self.table.lock().unwrap()[addr as usize]
    }

    pub fn set_row(&self, addr: u32, row: [u32; 4]) {
        self.table.lock().unwrap()[addr as usize] = row;
    }

    /// Current value of a register as stored (no synthesized status bits).
    pub fn reg(&self, offset: u32) -> u32 {
        *self.regs.lock().unwrap().get(&offset).unwrap_or(&0)
    }

    /// Set bits the way hardware would, bypassing the write log.
    pub fn raise(&self, offset: u32, bits: u32) {
        *self.regs.lock().unwrap().entry(offset).or_insert(0) |= bits;
    }

    /// Every value written to `offset`, in order.
    pub fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_log(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn run_transaction(&self, madr: u32) {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        let left = self.stall_after.load(Ordering::SeqCst);
        if left == 0 {
            return;
        }
        if left > 0 {
            self.stall_after.store(left - 1, Ordering::SeqCst);
        }
        let skip = self.skip_nth.load(Ordering::SeqCst);
        if skip >= 0 {
            self.skip_nth.store(skip - 1, Ordering::SeqCst);
            if skip == 0 {
                return;
            }
        }
        let addr = (madr & MADR_ADDR_MASK) as usize;
        let mut regs = self.regs.lock().unwrap();
        let mut table = self.table.lock().unwrap();
        if addr < table.len() {
            let row = &mut table[addr];
            if madr & MADR_WNR != 0 {
                for i in 0..4 {
                    let mask = *regs.get(&MDWE[i]).unwrap_or(&0);
                    let data = *regs.get(&MDAT[i]).unwrap_or(&0);
                    row[i] = (row[i] & !mask) | (data & mask);
                }
                row[0] &= !self.stuck_low.load(Ordering::SeqCst);
            } else {
                for i in 0..4 {
                    regs.insert(MDAT[i], row[i]);
                }
            }
        }
        *regs.entry(MCTL).or_insert(0) |= MCTL_XCMP;
    }
}

impl Mmio for MockMlb {
    fn read(&self, offset: u32) -> u32 {
        let value = self.reg(offset);
        match offset {
            MLBC0 if self.locked.load(Ordering::SeqCst) => value | MLBC0_MLBLK,
            MLBC0 => value & !MLBC0_MLBLK,
            MLBC1 if !self.clock_running.load(Ordering::SeqCst) => value | MLBC1_CLKM,
            _ => value,
        }
    }

    fn write(&self, offset: u32, value: u32) {
        self.writes.lock().unwrap().push((offset, value));
        match offset {
            // Write-one-to-clear status in software-clear mode.
            ACSR0 | ACSR1 | HCER0 | HCER1 => {
                *self.regs.lock().unwrap().entry(offset).or_insert(0) &= !value;
            }
            MADR => {
                self.regs.lock().unwrap().insert(MADR, value);
                self.run_transaction(value);
            }
            _ => {
                self.regs.lock().unwrap().insert(offset, value);
            }
        }
    }
}

// ── Delay ──────────────────────────────────────────────────────────────────

/// A delay that returns immediately and counts the time it was asked for.
#[derive(Clone, Default)]
pub struct NoDelay {
    elapsed_ns: Arc<AtomicU64>,
}

impl NoDelay {
    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed_ns.load(Ordering::SeqCst)
    }
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns.fetch_add(ns as u64, Ordering::SeqCst);
    }
}

// ── DMA memory ─────────────────────────────────────────────────────────────

/// Heap-backed DMA allocator handing out fake bus addresses.
pub struct HeapDma {
    next_phys: u32,
    live: HashMap<u32, (NonNull<u8>, usize)>,
    /// Allocations left before failing; `None` means unlimited.
    budget: Option<usize>,
}

// SAFETY: the pointers are owned heap allocations, only touched under the
// transport's allocator lock.
unsafe impl Send for HeapDma {}

impl HeapDma {
    pub fn new() -> Self {
        HeapDma {
            next_phys: 0x8000_0000,
            live: HashMap::new(),
            budget: None,
        }
    }

    /// Satisfy `n` more allocations, then fail.
    pub fn fail_after(&mut self, n: usize) {
        self.budget = Some(n);
    }

    pub fn outstanding(&self) -> usize {
        self.live.len()
    }

    /// CPU view of a region previously handed out, by bus address.
    pub fn bytes_at(&self, phys: u32, len: usize) -> Vec<u8> {
        for (&base, &(ptr, size)) in &self.live {
            if phys >= base && (phys - base) as usize + len <= size {
                let start = (phys - base) as usize;
                let slice = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), size) };
                return slice[start..start + len].to_vec();
            }
        }
        panic!("no DMA region covers {:#x}+{}", phys, len);
    }

    /// Write through the CPU view, as the controller would by DMA.
    pub fn poke(&self, phys: u32, data: &[u8]) {
        for (&base, &(ptr, size)) in &self.live {
            if phys >= base && (phys - base) as usize + data.len() <= size {
                let start = (phys - base) as usize;
                let slice = unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), size) };
                slice[start..start + data.len()].copy_from_slice(data);
                return;
            }
        }
        panic!("no DMA region covers {:#x}+{}", phys, data.len());
    }
}

impl Drop for HeapDma {
    fn drop(&mut self) {
        for (_, (ptr, len)) in self.live.drain() {
            let slice = core::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len);
            drop(unsafe { Box::from_raw(slice) });
        }
    }
}

impl DmaAllocator for HeapDma {
    fn allocate(&mut self, len: usize) -> Option<DmaRegion> {
        if let Some(left) = self.budget.as_mut() {
            if *left == 0 {
                return None;
            }
            *left -= 1;
        }
        let raw = Box::into_raw(std::vec![0u8; len].into_boxed_slice()) as *mut u8;
        let ptr = NonNull::new(raw)?;
        let phys = self.next_phys;
        // Keep bus addresses word aligned and apart.
        self.next_phys += ((len as u32 + 0xFFF) & !0xFFF).max(0x1000);
        self.live.insert(phys, (ptr, len));
        Some(unsafe { DmaRegion::from_raw_parts(ptr, phys, len) })
    }

    fn release(&mut self, region: DmaRegion) {
        let (ptr, len) = self
            .live
            .remove(&region.phys())
            .expect("released a region this allocator never handed out");
        assert_eq!(ptr, region.as_ptr());
        let slice = core::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len);
        drop(unsafe { Box::from_raw(slice) });
    }
}

// ── Wait queue ─────────────────────────────────────────────────────────────

/// Condvar-backed wait queue with a cancel switch.
#[derive(Default)]
pub struct CondvarQueue {
    lock: Mutex<u64>,
    cond: Condvar,
    cancelled: AtomicBool,
    wakes: AtomicUsize,
}

impl CondvarQueue {
    /// Make current and future waits fail with `Interrupted`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    pub fn wakes(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }
}

impl WaitQueue for CondvarQueue {
    fn wait_until(&self, condition: &dyn Fn() -> bool) -> Result<(), Interrupted> {
        let mut generation = self.lock.lock().unwrap();
        loop {
            if condition() {
                return Ok(());
            }
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(Interrupted);
            }
            // The condition is evaluated outside the lock's protection, so
            // bound each sleep rather than trust a single notification.
            let (g, _) = self
                .cond
                .wait_timeout(generation, Duration::from_millis(5))
                .unwrap();
            generation = g;
        }
    }

    fn wake_all(&self) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut generation) = self.lock.try_lock() {
            *generation += 1;
        }
        self.cond.notify_all();
    }
}

// ── Power ──────────────────────────────────────────────────────────────────

/// Records transceiver/PLL switching; clones share state.
#[derive(Clone, Default)]
pub struct MockPower {
    pub transceiver: Arc<AtomicBool>,
    pub pll: Arc<AtomicBool>,
    pub transitions: Arc<AtomicUsize>,
}

impl MockPower {
    pub fn transceiver_on(&self) -> bool {
        self.transceiver.load(Ordering::SeqCst)
    }

    pub fn pll_on(&self) -> bool {
        self.pll.load(Ordering::SeqCst)
    }
}

impl BusPower for MockPower {
    fn set_transceiver(&mut self, on: bool) {
        self.transitions.fetch_add(1, Ordering::SeqCst);
        self.transceiver.store(on, Ordering::SeqCst);
    }

    fn set_pll_clock(&mut self, on: bool) {
        self.pll.store(on, Ordering::SeqCst);
    }
}
