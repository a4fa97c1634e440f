//! The device-node registry: one [`Channel`] per traffic class, the shared
//! [`ControlPort`], the DMA allocator and the bus power hooks.
//!
//! All lifecycle calls (`open`, `close`, `start`, `stop`, address changes)
//! run under one registry lock, so whole-table resets on first open and the
//! transceiver reference count never race. Data calls (`read`, `write`,
//! `poll_readiness`, `get_exceptions`) go straight to the channel.

use core::sync::atomic::{AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;
use spin::Mutex;

use crate::channel::{Channel, ChannelState};
use crate::config::TransportConfig;
use crate::constants::PROTOCOL_VERSION;
use crate::error::Error;
use crate::hal::{BusPower, DmaAllocator, Mmio, WaitQueue};
use crate::protocol::ControlPort;
use crate::regs::*;
use crate::types::{BusClockClass, ChannelPair, ChannelType, Direction, ExceptionFlags, Readiness};

/// Process-context state guarded by the registry lock.
struct Registry<P> {
    power: P,
    /// Nodes currently started; the transceiver is on while non-zero.
    started: u32,
    pll_on: bool,
}

pub struct Transport<M, D, A, W, P> {
    pub(crate) port: ControlPort<M, D>,
    pub(crate) dma: Mutex<A>,
    registry: Mutex<Registry<P>>,
    pub(crate) channels: [Channel<W>; 4],
    clock_class: AtomicU8,
}

impl<M, D, A, W, P> Transport<M, D, A, W, P>
where
    M: Mmio,
    D: DelayNs + Clone,
    A: DmaAllocator,
    W: WaitQueue + Default,
    P: BusPower,
{
    pub fn new(mmio: M, delay: D, dma: A, power: P, config: TransportConfig) -> Self {
        Transport {
            port: ControlPort::new(mmio, delay, config),
            dma: Mutex::new(dma),
            registry: Mutex::new(Registry {
                power,
                started: 0,
                pll_on: false,
            }),
            channels: ChannelType::ALL.map(Channel::new),
            clock_class: AtomicU8::new(BusClockClass::Fs256 as u8),
        }
    }
}

impl<M, D, A, W, P> Transport<M, D, A, W, P>
where
    M: Mmio,
    D: DelayNs + Clone,
    A: DmaAllocator,
    W: WaitQueue,
    P: BusPower,
{
    /// Bring the controller up: 3-pin interface at 256·Fs, host interface
    /// enabled for every channel, DMA mode 1 with software-cleared status.
    /// Channel and protocol interrupts stay masked until a node starts.
    pub fn init(&self) {
        let mmio = self.port.mmio();
        mmio.write(MIEN, 0);
        mmio.write(ACMR0, 0);
        mmio.write(ACMR1, 0);
        mmio.write(MLBC0, 0);
        mmio.write(HCTL, 0);

        let class = BusClockClass::Fs256;
        mmio.write(MLBC0, MLBC0_MLBEN | ((class as u32) << MLBC0_MLBCLK_SHIFT));
        self.clock_class.store(class as u8, Ordering::Release);

        mmio.write(HCMR0, u32::MAX);
        mmio.write(HCMR1, u32::MAX);
        mmio.write(HCTL, HCTL_EN);
        mmio.write(ACTL, ACTL_DMAMODE | ACTL_SCE);
        log::debug!("controller enabled, version {:#010x}", PROTOCOL_VERSION);
    }

    /// Mask every interrupt and disable the controller. Refused while any
    /// node is open.
    pub fn shutdown(&self) -> Result<(), Error> {
        let mut registry = self.registry.lock();
        if self.channels.iter().any(|ch| ch.state() != ChannelState::Closed) {
            return Err(Error::Busy);
        }
        let mmio = self.port.mmio();
        mmio.write(MIEN, 0);
        mmio.write(ACMR0, 0);
        mmio.write(ACMR1, 0);
        mmio.write(HCMR0, 0);
        mmio.write(HCMR1, 0);
        mmio.write(HCTL, 0);
        self.port.modify_register(MLBC0, MLBC0_MLBEN, 0);
        if registry.pll_on {
            registry.power.set_pll_clock(false);
            registry.pll_on = false;
        }
        log::debug!("controller disabled");
        Ok(())
    }

    pub fn config(&self) -> &TransportConfig {
        self.port.config()
    }

    pub fn channel(&self, node: ChannelType) -> &Channel<W> {
        &self.channels[node.index()]
    }

    /// The configured node owning logical channel `number`, and in which
    /// direction.
    pub(crate) fn owner(&self, number: u8) -> Option<(&Channel<W>, Direction)> {
        self.channels.iter().find_map(|ch| {
            if !ch.state().is_configured() {
                return None;
            }
            ch.direction_of(number).map(|dir| (ch, dir))
        })
    }

    pub fn open(&self, node: ChannelType) -> Result<(), Error> {
        let _registry = self.registry.lock();
        let sole_user = self
            .channels
            .iter()
            .all(|ch| ch.channel_type() == node || ch.state() == ChannelState::Closed);
        self.channel(node).open(&self.port, &self.dma, sole_user)
    }

    pub fn close(&self, node: ChannelType) -> Result<(), Error> {
        let mut registry = self.registry.lock();
        let ch = self.channel(node);
        let was_started = ch.state() == ChannelState::Started;
        let result = ch.close(&self.port, &self.dma);
        if was_started && ch.state() != ChannelState::Started {
            self.release_bus(&mut registry);
        }
        result
    }

    /// Start a node. The first started node powers the transceiver (and the
    /// PLL at 2048·Fs and above); a failed start leaves power as it was.
    pub fn start(&self, node: ChannelType) -> Result<(), Error> {
        let mut registry = self.registry.lock();
        let ch = self.channel(node);
        if ch.state() == ChannelState::Started {
            return Ok(());
        }

        let powered_up = registry.started == 0;
        if powered_up {
            registry.power.set_transceiver(true);
        }
        let class = self.bus_clock_class();
        if class.needs_pll() && !registry.pll_on {
            registry.power.set_pll_clock(true);
            registry.pll_on = true;
        }

        match ch.start(&self.port) {
            Ok(()) => {
                registry.started += 1;
                Ok(())
            }
            Err(e) => {
                if powered_up {
                    self.power_down(&mut registry);
                }
                Err(e)
            }
        }
    }

    pub fn stop(&self, node: ChannelType) -> Result<(), Error> {
        let mut registry = self.registry.lock();
        let ch = self.channel(node);
        if ch.state() != ChannelState::Started {
            return ch.stop(&self.port);
        }
        let result = ch.stop(&self.port);
        self.release_bus(&mut registry);
        result
    }

    fn release_bus(&self, registry: &mut Registry<P>) {
        registry.started = registry.started.saturating_sub(1);
        if registry.started == 0 {
            self.power_down(registry);
        }
    }

    fn power_down(&self, registry: &mut Registry<P>) {
        registry.power.set_transceiver(false);
        if registry.pll_on {
            registry.power.set_pll_clock(false);
            registry.pll_on = false;
        }
    }

    /// Read one packet. `buf` must hold the node's full packet size.
    pub fn read(&self, node: ChannelType, buf: &mut [u8], blocking: bool) -> Result<usize, Error> {
        self.channel(node).read(buf, blocking)
    }

    /// Send one frame of at most the node's packet size.
    pub fn write(&self, node: ChannelType, buf: &[u8], blocking: bool) -> Result<usize, Error> {
        self.channel(node).write(&self.port, buf, blocking)
    }

    pub fn get_exceptions(&self, node: ChannelType) -> Result<ExceptionFlags, Error> {
        self.channel(node).take_exceptions()
    }

    pub fn poll_readiness(&self, node: ChannelType) -> Readiness {
        self.channel(node).readiness()
    }

    /// Assign a node's logical channels. Numbers owned by another node are
    /// refused.
    pub fn set_channel_addresses(&self, node: ChannelType, rx: u8, tx: u8) -> Result<(), Error> {
        let pair = ChannelPair::new(rx, tx);
        if !pair.is_valid() {
            return Err(Error::InvalidArgument);
        }
        let _registry = self.registry.lock();
        let taken = self
            .channels
            .iter()
            .filter(|ch| ch.channel_type() != node)
            .any(|ch| ch.direction_of(rx).is_some() || ch.direction_of(tx).is_some());
        if taken {
            return Err(Error::InvalidArgument);
        }
        self.channel(node).set_addresses(&self.port, pair)
    }

    /// [`set_channel_addresses`](Self::set_channel_addresses) with both
    /// numbers packed as `tx << 16 | rx`.
    pub fn set_channel_addresses_packed(&self, node: ChannelType, packed: u32) -> Result<(), Error> {
        let pair = ChannelPair::from_packed(packed).ok_or(Error::InvalidArgument)?;
        self.set_channel_addresses(node, pair.rx, pair.tx)
    }

    pub fn bus_clock_class(&self) -> BusClockClass {
        BusClockClass::from_code(self.clock_class.load(Ordering::Acquire))
    }

    /// Select the bus clock by its rate in Fs (256 through 8192). Speeds of
    /// 2048·Fs and above switch to the 6-pin interface.
    pub fn set_bus_clock_class(&self, fs: u32) -> Result<(), Error> {
        let class = BusClockClass::from_fs(fs).ok_or(Error::InvalidArgument)?;
        let mut registry = self.registry.lock();

        let mut set = (class as u32) << MLBC0_MLBCLK_SHIFT;
        if class.needs_pll() {
            set |= MLBC0_MLBPEN;
        }
        self.port
            .modify_register(MLBC0, MLBC0_MLBCLK_MASK | MLBC0_MLBPEN, set);
        self.clock_class.store(class as u8, Ordering::Release);

        // Follow the new class right away if the bus is in use.
        if registry.started > 0 && class.needs_pll() != registry.pll_on {
            let on = class.needs_pll();
            registry.power.set_pll_clock(on);
            registry.pll_on = on;
        }
        log::debug!("bus clock {}·Fs", fs);
        Ok(())
    }

    /// Set this device's node address on the bus.
    pub fn set_device_bus_address(&self, addr: u8) {
        self.port
            .modify_register(MLBC1, MLBC1_NDA_MASK, (addr as u32) << MLBC1_NDA_SHIFT);
    }

    pub fn get_protocol_version(&self) -> u32 {
        PROTOCOL_VERSION
    }
}
