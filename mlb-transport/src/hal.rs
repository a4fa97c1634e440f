//! Platform collaborators.
//!
//! The transport never touches a platform API directly. Register access,
//! DMA-capable memory, sleeping and power control come in through the traits
//! below; pacing of bounded waits uses [`embedded_hal::delay::DelayNs`].

use core::ptr::{self, NonNull};

/// 32-bit access to the controller's register window.
///
/// Both methods take `&self`: the interrupt dispatcher and process-context
/// calls share one window, and the implementation is expected to be a thin
/// volatile accessor.
pub trait Mmio {
    fn read(&self, offset: u32) -> u32;
    fn write(&self, offset: u32, value: u32);
}

impl<T: Mmio + ?Sized> Mmio for &T {
    fn read(&self, offset: u32) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        (**self).write(offset, value)
    }
}

/// [`Mmio`] over a memory-mapped register block.
pub struct VolatileMmio {
    base: NonNull<u32>,
}

// SAFETY: register accesses are single volatile word operations; callers
// serialise multi-register sequences themselves.
unsafe impl Send for VolatileMmio {}
unsafe impl Sync for VolatileMmio {}

impl VolatileMmio {
    /// # Safety
    ///
    /// `base` must point to the controller's register block, mapped for the
    /// lifetime of the returned value, and every offset the transport uses
    /// must fall inside it.
    pub const unsafe fn new(base: NonNull<u32>) -> Self {
        VolatileMmio { base }
    }
}

impl Mmio for VolatileMmio {
    fn read(&self, offset: u32) -> u32 {
        // SAFETY: see `new`.
        unsafe { ptr::read_volatile(self.base.as_ptr().add(offset as usize / 4)) }
    }

    fn write(&self, offset: u32, value: u32) {
        // SAFETY: see `new`.
        unsafe { ptr::write_volatile(self.base.as_ptr().add(offset as usize / 4), value) }
    }
}

/// A DMA-capable memory region: CPU mapping plus the bus address the
/// controller sees.
#[derive(Debug)]
pub struct DmaRegion {
    ptr: NonNull<u8>,
    phys: u32,
    len: usize,
}

// SAFETY: the region is plain memory. Concurrent users (an interrupt
// producer and a process-context consumer) touch disjoint byte ranges, which
// the ring's index protocol guarantees.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// region is handed back to its allocator, and `phys` must be the
    /// controller-visible address of the same memory.
    pub const unsafe fn from_raw_parts(ptr: NonNull<u8>, phys: u32, len: usize) -> Self {
        DmaRegion { ptr, phys, len }
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Bus address of byte 0.
    pub fn phys(&self) -> u32 {
        self.phys
    }

    /// Bus address of byte `offset`.
    pub fn phys_at(&self, offset: usize) -> u32 {
        self.phys.wrapping_add(offset as u32)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `data` into the region at `offset`. Bytes past the end of the
    /// region are not written.
    pub fn write_at(&self, offset: usize, data: &[u8]) {
        let n = data.len().min(self.len.saturating_sub(offset));
        if n == 0 {
            return;
        }
        // SAFETY: `offset + n <= len`.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), n) }
    }

    /// Fill `len` bytes at `offset` with `byte`, clamped to the region.
    pub fn fill_at(&self, offset: usize, len: usize, byte: u8) {
        let n = len.min(self.len.saturating_sub(offset));
        if n == 0 {
            return;
        }
        // SAFETY: `offset + n <= len`.
        unsafe { ptr::write_bytes(self.ptr.as_ptr().add(offset), byte, n) }
    }

    /// Copy from the region at `offset` into `out`, clamped to the region.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len.saturating_sub(offset));
        if n == 0 {
            return 0;
        }
        // SAFETY: `offset + n <= len`.
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), n) }
        n
    }

    /// Copy `len` bytes between two regions.
    pub fn copy_from_region(&self, offset: usize, src: &DmaRegion, src_offset: usize, len: usize) {
        let n = len
            .min(self.len.saturating_sub(offset))
            .min(src.len.saturating_sub(src_offset));
        if n == 0 {
            return;
        }
        // SAFETY: both ranges are in bounds; distinct regions never overlap.
        unsafe {
            ptr::copy(
                src.ptr.as_ptr().add(src_offset),
                self.ptr.as_ptr().add(offset),
                n,
            )
        }
    }
}

/// Source of DMA-capable memory.
pub trait DmaAllocator {
    /// Allocate `len` bytes, or `None` when exhausted.
    fn allocate(&mut self, len: usize) -> Option<DmaRegion>;
    /// Return a region obtained from [`allocate`](Self::allocate).
    fn release(&mut self, region: DmaRegion);
}

/// A blocking wait was cancelled by the platform (e.g. a signal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// A per-channel sleep/wake primitive.
///
/// `wait_until` must re-check `condition` after every wake and return as
/// soon as it holds; `wake_all` is called from interrupt context and must
/// not block.
pub trait WaitQueue {
    fn wait_until(&self, condition: &dyn Fn() -> bool) -> Result<(), Interrupted>;
    fn wake_all(&self);
}

/// Transceiver and clock control of the board.
pub trait BusPower {
    fn set_transceiver(&mut self, on: bool);
    /// Gate the PLL reference used by the 6-pin interface.
    fn set_pll_clock(&mut self, on: bool);
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec;

    #[test]
    fn volatile_mmio_indexes_words() {
        let mut block = [0u32; 8];
        let mmio = unsafe { VolatileMmio::new(NonNull::new(block.as_mut_ptr()).unwrap()) };
        mmio.write(0x0C, 0xDEAD_BEEF);
        assert_eq!(mmio.read(0x0C), 0xDEAD_BEEF);
        drop(mmio);
        assert_eq!(block[3], 0xDEAD_BEEF);
    }

    #[test]
    fn region_accessors_clamp_at_the_end() {
        let mut backing = vec![0u8; 16];
        let region = unsafe {
            DmaRegion::from_raw_parts(NonNull::new(backing.as_mut_ptr()).unwrap(), 0x1000, 16)
        };
        region.write_at(12, &[1, 2, 3, 4, 5, 6]);
        let mut out = [0u8; 8];
        assert_eq!(region.read_at(12, &mut out), 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        region.fill_at(14, 10, 0xAA);
        assert_eq!(region.read_at(12, &mut out), 4);
        assert_eq!(&out[..4], &[1, 2, 0xAA, 0xAA]);
        assert_eq!(region.phys_at(12), 0x100C);
    }

    #[test]
    fn region_accessors_ignore_offsets_past_the_end() {
        let mut backing = vec![7u8; 16];
        let region = unsafe {
            DmaRegion::from_raw_parts(NonNull::new(backing.as_mut_ptr()).unwrap(), 0x1000, 16)
        };
        region.write_at(64, &[1, 2, 3]);
        region.fill_at(17, 4, 0);
        let mut out = [0u8; 4];
        assert_eq!(region.read_at(16, &mut out), 0);
        assert_eq!(region.read_at(1000, &mut out), 0);
        region.copy_from_region(32, &region, 0, 4);
        drop(region);
        assert!(backing.iter().all(|&b| b == 7));
    }
}
