//! MLB150 controller register offsets and bitfield definitions.
//!
//! Offsets are byte offsets from the controller base; every register is
//! 32 bits wide. Descriptor-table row layouts (CDT/ADT/CAT) live alongside
//! the registers because they are only ever reached through the
//! MADR/MDAT/MCTL window.

// Some registers are defined for completeness (PLL configuration, protocol
// error status) but only touched by a subset of the driver paths.
#![allow(dead_code)]

// ── MediaLB interface ──────────────────────────────────────────────────────

/// MediaLB control 0.
/// - Bit  7   — MLBLK (bus locked, read-only)
/// - Bit  5   — MLBPEN (6-pin interface / PLL enable)
/// - Bits 4:2 — MLBCLK (clock class, see [`BusClockClass`](crate::BusClockClass))
/// - Bit  0   — MLBEN
pub const MLBC0: u32 = 0x00;
pub const MLBC0_MLBEN: u32 = 1 << 0;
pub const MLBC0_MLBCLK_SHIFT: u32 = 2;
pub const MLBC0_MLBCLK_MASK: u32 = 0x7 << MLBC0_MLBCLK_SHIFT;
pub const MLBC0_MLBPEN: u32 = 1 << 5;
pub const MLBC0_MLBLK: u32 = 1 << 7;

/// MediaLB 6-pin control 0.
pub const MLBPC0: u32 = 0x08;

/// Channel status 0 (channels 0–31), bus-side protocol events.
pub const MS0: u32 = 0x0C;
/// Channel status 1 (channels 32–63).
pub const MS1: u32 = 0x14;

/// System status.
pub const MSS: u32 = 0x20;
/// System data.
pub const MSD: u32 = 0x24;

/// Interrupt enable: protocol-error sources per traffic class.
pub const MIEN: u32 = 0x2C;
pub const MIEN_ISOC_PE: u32 = 1 << 0;
pub const MIEN_ISOC_BUFO: u32 = 1 << 1;
pub const MIEN_SYNC_PE: u32 = 1 << 16;
pub const MIEN_ARX_PE: u32 = 1 << 18;
pub const MIEN_ATX_PE: u32 = 1 << 21;
pub const MIEN_CRX_PE: u32 = 1 << 25;
pub const MIEN_CTX_PE: u32 = 1 << 28;

/// MediaLB 6-pin control 1 (PLL bias).
pub const MLBPC1: u32 = 0x38;
pub const MLBPC1_VAL: u32 = 0x0000_0888;

/// MediaLB control 1.
/// - Bits 15:8 — NDA (node device address)
/// - Bit  7    — CLKM (clock missing, write 0 to clear)
/// - Bit  6    — LOCK (lock error, write 0 to clear)
pub const MLBC1: u32 = 0x3C;
pub const MLBC1_LOCK: u32 = 1 << 6;
pub const MLBC1_CLKM: u32 = 1 << 7;
pub const MLBC1_NDA_SHIFT: u32 = 8;
pub const MLBC1_NDA_MASK: u32 = 0xFF << MLBC1_NDA_SHIFT;

// ── Host bus interface ─────────────────────────────────────────────────────

/// HBI control.
pub const HCTL: u32 = 0x80;
pub const HCTL_RST0: u32 = 1 << 0;
pub const HCTL_RST1: u32 = 1 << 1;
pub const HCTL_EN: u32 = 1 << 15;

/// HBI channel mask (which channels the host interface services).
pub const HCMR0: u32 = 0x88;
pub const HCMR1: u32 = 0x8C;
/// HBI channel error (per-channel DMA error, parallel to ACSRn).
pub const HCER0: u32 = 0x90;
pub const HCER1: u32 = 0x94;
/// HBI channel busy.
pub const HCBR0: u32 = 0x98;
pub const HCBR1: u32 = 0x9C;

// ── Control table window ───────────────────────────────────────────────────

/// Table row data words, MDAT0 is the least significant.
pub const MDAT: [u32; 4] = [0xC0, 0xC4, 0xC8, 0xCC];
/// Per-bit write enables for the matching MDAT word.
pub const MDWE: [u32; 4] = [0xD0, 0xD4, 0xD8, 0xDC];

/// Table transaction control.
/// - Bit 0 — XCMP (transfer complete; software writes 0 to clear)
pub const MCTL: u32 = 0xE0;
pub const MCTL_XCMP: u32 = 1 << 0;

/// Table transaction address. Writing it starts the transaction.
/// - Bit 31  — WNR (write, not read)
/// - Bit 30  — TB (target is the DBR instead of the control tables)
/// - Bits 7:0 — row address
pub const MADR: u32 = 0xE4;
pub const MADR_WNR: u32 = 1 << 31;
pub const MADR_TB: u32 = 1 << 30;
pub const MADR_ADDR_MASK: u32 = 0xFF;

// ── AHB DMA block ──────────────────────────────────────────────────────────

/// AHB control.
/// - Bit 4 — MPB (multiple packets per buffer)
/// - Bit 2 — DMAMODE (DMA mode 1)
/// - Bit 1 — SMX (single interrupt line for all channels)
/// - Bit 0 — SCE (software clears ACSRn by writing 1s)
pub const ACTL: u32 = 0x3C0;
pub const ACTL_SCE: u32 = 1 << 0;
pub const ACTL_SMX: u32 = 1 << 1;
pub const ACTL_DMAMODE: u32 = 1 << 2;
pub const ACTL_MPB: u32 = 1 << 4;

/// AHB channel status (completion), channels 0–31 / 32–63.
pub const ACSR0: u32 = 0x3D0;
pub const ACSR1: u32 = 0x3D4;
/// AHB channel interrupt mask, channels 0–31 / 32–63.
pub const ACMR0: u32 = 0x3D8;
pub const ACMR1: u32 = 0x3DC;

/// Select the 0/1 register of a per-channel bitmap pair and the channel's bit.
pub const fn channel_bit(channel: u8, regs: [u32; 2]) -> (u32, u32) {
    let reg = regs[(channel as usize / 32) & 1];
    (reg, 1 << (channel as u32 % 32))
}

// ── CDT row layout ─────────────────────────────────────────────────────────
//
// word 3: BA (bits 29:16), RSTS[4] (bit 15), WSTS[4] (bit 14), BD (bits 12:0)
// word 2: RSTS (bits 31:28), WSTS (bits 15:12); isochronous uses 31:29 / 15:13
// word 1: BS (isochronous block size - 1)

pub const CDT_BD_MASK: u32 = 0x1FFF;
pub const CDT_BA_SHIFT: u32 = 16;
pub const CDT_BA_MASK: u32 = 0x3FFF << CDT_BA_SHIFT;
pub const CDT_BS_MASK: u32 = 0x1FFF;

pub const CDT_WSTS_SHIFT: u32 = 12;
pub const CDT_RSTS_SHIFT: u32 = 28;
pub const CDT_ISOC_WSTS_SHIFT: u32 = 13;
pub const CDT_ISOC_RSTS_SHIFT: u32 = 29;
/// Fifth status bit of control/asynchronous channels, in word 3.
pub const CDT_WSTS_4: u32 = 1 << 14;
pub const CDT_RSTS_4: u32 = 1 << 15;

// ── ADT row layout ─────────────────────────────────────────────────────────
//
// word 0: CE (bit 15), LE (bit 14), PG (bit 13)
// word 1: half 2 flags/depth in 31:16, half 1 flags/depth in 15:0
// word 2: ping (half 1) buffer address
// word 3: pong (half 2) buffer address

pub const ADT_PG: u32 = 1 << 13;
pub const ADT_LE: u32 = 1 << 14;
pub const ADT_CE: u32 = 1 << 15;

pub const ADT_BD1_SHIFT: u32 = 0;
pub const ADT_BD2_SHIFT: u32 = 16;
pub const ADT_BD_MASK: u32 = 0x7FF;

pub const ADT_MEP1: u32 = 1 << 11;
pub const ADT_PS1: u32 = 1 << 12;
pub const ADT_ERR1: u32 = 1 << 13;
pub const ADT_DNE1: u32 = 1 << 14;
pub const ADT_RDY1: u32 = 1 << 15;

pub const ADT_MEP2: u32 = 1 << 27;
pub const ADT_PS2: u32 = 1 << 28;
pub const ADT_ERR2: u32 = 1 << 29;
pub const ADT_DNE2: u32 = 1 << 30;
pub const ADT_RDY2: u32 = 1 << 31;

/// Bits of ADT word 1 that software may touch while the channel runs.
pub const ADT_STATUS_FLAGS: u32 = ADT_RDY1
    | ADT_DNE1
    | ADT_ERR1
    | ADT_PS1
    | ADT_MEP1
    | ADT_RDY2
    | ADT_DNE2
    | ADT_ERR2
    | ADT_PS2
    | ADT_MEP2;

// ── CAT entry layout (16 bits, eight per row) ──────────────────────────────

pub const CAT_CL_MASK: u16 = 0x3F;
pub const CAT_CT_SHIFT: u16 = 8;
pub const CAT_CE: u16 = 1 << 11;
pub const CAT_RNW: u16 = 1 << 12;
pub const CAT_MT: u16 = 1 << 13;
