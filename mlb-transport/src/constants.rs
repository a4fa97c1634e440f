//! Fixed geometry of the descriptor tables and per-type buffer sizing.

/// Number of logical channels addressable by the CDT/ADT/CAT tables.
pub const LOGICAL_CHANNELS: usize = 64;

/// Channel assignment entries packed into one 128-bit table row.
pub const CAT_ENTRIES_PER_ROW: usize = 8;

/// Rows per CAT namespace.
pub const CAT_ROWS: usize = LOGICAL_CHANNELS / CAT_ENTRIES_PER_ROW;

// ── Table address space ────────────────────────────────────────────────────

/// First CDT row (one row per logical channel).
pub const CDT_BASE: u32 = 0x00;
/// First ADT row (one row per logical channel).
pub const ADT_BASE: u32 = 0x40;
/// First row of the bus-facing (MLB) CAT namespace.
pub const CAT_BUS_BASE: u32 = 0x80;
/// First row of the host-facing (HBI) CAT namespace.
pub const CAT_HOST_BASE: u32 = 0x88;
/// One past the last row of the table address space.
pub const TABLE_END: u32 = 0x90;

// ── Channel buffer sizing ──────────────────────────────────────────────────

/// Frames per synchronous sub-buffer.
pub const SYNC_SAMPLE_COUNT: u16 = 128;
/// Bytes per synchronous frame.
pub const SYNC_BYTES_PER_FRAME: u16 = 4;
/// Synchronous buffer depth: `4 × m × bpf`.
pub const SYNC_BUF_DEPTH: u16 = 4 * SYNC_SAMPLE_COUNT * SYNC_BYTES_PER_FRAME;

/// Largest control packet.
pub const CTRL_MAX_PACKET: u16 = 64;
/// Control buffer depth.
pub const CTRL_BUF_DEPTH: u16 = 64;

/// Largest asynchronous packet (MOST Ethernet packet; data packets are 1024).
pub const ASYNC_MAX_PACKET: u16 = 1536;
/// Asynchronous buffer depth.
pub const ASYNC_BUF_DEPTH: u16 = 2048;

/// Isochronous block size in bytes.
pub const ISOC_BLOCK_SIZE: u16 = 196;
/// Isochronous blocks per buffer.
pub const ISOC_BLOCK_COUNT: u16 = 3;
/// Isochronous buffer depth.
pub const ISOC_BUF_DEPTH: u16 = ISOC_BLOCK_SIZE * ISOC_BLOCK_COUNT;

/// Largest value the 13-bit CDT depth field can describe, plus one.
pub const CDT_MAX_DEPTH: u16 = 1 << 13;

/// Largest value the 11-bit ADT per-half depth field can describe, plus one.
pub const ADT_MAX_DEPTH: u16 = 1 << 11;

// ── Data buffer region layout ──────────────────────────────────────────────
//
// Each traffic class owns a TX buffer followed by an RX buffer in the DBR.

pub const SYNC_DBR_OFFSET: u16 = 0;
pub const CTRL_DBR_OFFSET: u16 = SYNC_DBR_OFFSET + 2 * SYNC_BUF_DEPTH;
pub const ASYNC_DBR_OFFSET: u16 = CTRL_DBR_OFFSET + 2 * CTRL_BUF_DEPTH;
pub const ISOC_DBR_OFFSET: u16 = ASYNC_DBR_OFFSET + 2 * ASYNC_BUF_DEPTH;

// ── Host side ──────────────────────────────────────────────────────────────

/// Default number of receive ring nodes per channel.
pub const RX_RING_NODES: usize = 10;

/// Value reported by the "get protocol version" control call.
pub const PROTOCOL_VERSION: u32 = 0x0303_0003;
