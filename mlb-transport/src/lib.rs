//! # mlb-transport
//!
//! A `no_std` channel transport for the MediaLB (MLB150) host controller.
//! It programs the controller's three descriptor tables, moves packets
//! through ping/pong DMA buffers and hands received packets to readers
//! through lock-free rings that interrupt handlers can fill.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Registers | [`regs`] / [`constants`] | Register map, table geometry, buffer sizing |
//! | Platform | [`hal`] | `Mmio`, `DmaAllocator`, `WaitQueue`, `BusPower` traits |
//! | Protocol | [`protocol`] | Bounded-wait table row access through the control window |
//! | Tables | [`cdt`] / [`cat`] / [`adt`] | Bus buffers, channel routing, host DMA descriptors |
//! | Queue | [`ring`] | Fixed-size packet ring with a drop slot |
//! | Node | [`channel`] | One device node's lifecycle and data path |
//! | Registry | [`transport`] / [`irq`] | The four nodes, bring-up, interrupt entry points |
//!
//! ## Usage
//!
//! ```ignore
//! use mlb_transport::{ChannelType, Transport, TransportConfig};
//!
//! let mlb = Transport::new(mmio, delay, dma, power, TransportConfig::default());
//! mlb.init();
//!
//! mlb.open(ChannelType::Control)?;
//! mlb.start(ChannelType::Control)?;
//! mlb.write(ChannelType::Control, &frame, true)?;
//!
//! // Wired to the controller's interrupts:
//! mlb.on_host_completion();
//! mlb.on_bus_protocol();
//!
//! let mut packet = [0u8; 64];
//! mlb.read(ChannelType::Control, &mut packet, true)?;
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `debug-readback` | no | Read back every table row written and report mismatches |
//!
//! ## Traffic classes
//!
//! | Node | Packet size | Default rx/tx channels |
//! |------|-------------|------------------------|
//! | sync | 2048 | 24 / 8 |
//! | ctrl | 64 | 16 / 0 |
//! | async | 2048 | 48 / 32 |
//! | isoc | 588 (3 × 196) | 56 / 40 |

#![no_std]

pub mod constants;
pub mod types;
pub mod regs;
pub mod error;
pub mod config;
pub mod hal;
pub mod protocol;
pub mod cdt;
pub mod cat;
pub mod adt;
pub mod ring;
pub mod channel;
pub mod irq;
pub mod transport;

#[cfg(test)]
mod mock;


pub use config::{PollBudget, TransportConfig};
pub use error::Error;
pub use transport::Transport;
pub use types::{BusClockClass, ChannelPair, ChannelType, Direction, ExceptionFlags, Readiness};
