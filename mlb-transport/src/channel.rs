//! One device node: a receive and a transmit logical channel of the same
//! traffic class, their table rows, buffers and lifecycle.
//!
//! ## Lifecycle
//!
//! ```text
//!           open                    start              stop
//! Closed ──────────► Configured ───────────► Started ◄──────► Stopped
//!   ▲   (Configuring)     │                              start   │
//!   └─────────────────────┴──────────── close ───────────────────┘
//! ```
//!
//! `open` allocates the receive ring and the transfer buffers and programs
//! CDT, CAT (staged, disabled) and ADT. Any failure releases what was
//! allocated and leaves the channel `Closed`. `start` enables the CAT
//! entries (unmuting synchronous channels once the bus is locked), arms the
//! receive ping half and unmasks the channel's interrupts. `stop` masks them
//! and disables the CAT entries but keeps the buffers, so a later `start`
//! reuses them.
//!
//! ## Sharing with interrupt context
//!
//! Interrupt handlers only touch atomics and the session behind
//! [`spin::RwLock::try_read`]. A failed `try_read` means a process-context
//! call is tearing the session down, and the event is skipped.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;
use spin::{Mutex, RwLock};

use crate::adt::{Half, PingPong};
use crate::cat::CatRoute;
use crate::error::Error;
use crate::hal::{DmaAllocator, DmaRegion, Mmio, WaitQueue};
use crate::protocol::ControlPort;
use crate::regs::*;
use crate::ring::RingBuffer;
use crate::types::{ChannelPair, ChannelType, Direction, ExceptionFlags, Readiness};

/// Lifecycle state of a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Closed = 0,
    Configuring = 1,
    Configured = 2,
    Started = 3,
    Stopped = 4,
}

impl ChannelState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ChannelState::Configuring,
            2 => ChannelState::Configured,
            3 => ChannelState::Started,
            4 => ChannelState::Stopped,
            _ => ChannelState::Closed,
        }
    }

    /// Buffers are allocated and table rows programmed.
    pub const fn is_configured(self) -> bool {
        matches!(
            self,
            ChannelState::Configured | ChannelState::Started | ChannelState::Stopped
        )
    }
}

/// Protocol-error interrupt sources of a traffic class.
pub const fn mien_bits(ctype: ChannelType) -> u32 {
    match ctype {
        ChannelType::Synchronous => MIEN_SYNC_PE,
        ChannelType::Control => MIEN_CRX_PE | MIEN_CTX_PE,
        ChannelType::Asynchronous => MIEN_ARX_PE | MIEN_ATX_PE,
        ChannelType::Isochronous => MIEN_ISOC_PE | MIEN_ISOC_BUFO,
    }
}

/// Buffers owned while the channel is open.
struct Session {
    ring: RingBuffer,
    /// Four halves of `depth` bytes: rx ping, rx pong, tx ping, tx pong.
    transfer: DmaRegion,
    rx: PingPong,
    tx: PingPong,
    depth: usize,
}

impl Session {
    fn half_offset(&self, direction: Direction, half: Half) -> usize {
        let base = match direction {
            Direction::Receive => 0,
            Direction::Transmit => 2,
        };
        let index = match half {
            Half::Ping => 0,
            Half::Pong => 1,
        };
        (base + index) * self.depth
    }
}

/// State only process context touches.
struct Lifecycle {
    open_count: u32,
}

pub struct Channel<W> {
    ctype: ChannelType,
    state: AtomicU8,
    rx_addr: AtomicU8,
    tx_addr: AtomicU8,
    tx_busy: AtomicBool,
    exceptions: AtomicU32,
    lifecycle: Mutex<Lifecycle>,
    session: RwLock<Option<Session>>,
    readers: W,
    writers: W,
}

impl<W> Channel<W>
where
    W: WaitQueue + Default,
{
    pub fn new(ctype: ChannelType) -> Self {
        let pair = ChannelPair::default_for(ctype);
        Channel {
            ctype,
            state: AtomicU8::new(ChannelState::Closed as u8),
            rx_addr: AtomicU8::new(pair.rx),
            tx_addr: AtomicU8::new(pair.tx),
            tx_busy: AtomicBool::new(false),
            exceptions: AtomicU32::new(0),
            lifecycle: Mutex::new(Lifecycle { open_count: 0 }),
            session: RwLock::new(None),
            readers: W::default(),
            writers: W::default(),
        }
    }
}

impl<W: WaitQueue> Channel<W> {
    pub fn channel_type(&self) -> ChannelType {
        self.ctype
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn addresses(&self) -> ChannelPair {
        ChannelPair::new(
            self.rx_addr.load(Ordering::Acquire),
            self.tx_addr.load(Ordering::Acquire),
        )
    }

    /// Which of this channel's directions owns logical channel `number`.
    pub fn direction_of(&self, number: u8) -> Option<Direction> {
        let pair = self.addresses();
        if number == pair.rx {
            Some(Direction::Receive)
        } else if number == pair.tx {
            Some(Direction::Transmit)
        } else {
            None
        }
    }

    pub fn readers(&self) -> &W {
        &self.readers
    }

    pub fn writers(&self) -> &W {
        &self.writers
    }

    /// Packets dropped by the receive ring this session.
    pub fn dropped(&self) -> u32 {
        self.session
            .read()
            .as_ref()
            .map_or(0, |s| s.ring.dropped())
    }

    fn depth(&self) -> usize {
        self.ctype.buffer_depth() as usize
    }

    // ── Open / close ───────────────────────────────────────────────────

    /// Open the channel. The first open allocates buffers and programs the
    /// tables; later opens only take a reference.
    ///
    /// `sole_user` says no other device node is configured, in which case
    /// all three tables are cleared first. Otherwise only this channel's
    /// rows are cleared, so neighbours keep running.
    pub fn open<M, D, A>(
        &self,
        port: &ControlPort<M, D>,
        dma: &Mutex<A>,
        sole_user: bool,
    ) -> Result<(), Error>
    where
        M: Mmio,
        D: DelayNs + Clone,
        A: DmaAllocator,
    {
        let mut life = self.lifecycle.lock();
        if life.open_count > 0 {
            life.open_count += 1;
            return Ok(());
        }

        self.set_state(ChannelState::Configuring);
        let capacity = port.config().ring_capacity;
        let session = match self.allocate(dma, capacity) {
            Ok(session) => session,
            Err(e) => {
                self.set_state(ChannelState::Closed);
                return Err(e);
            }
        };

        if let Err(e) = self.program_tables(port, &session, sole_user) {
            log::warn!("{}: configuration failed: {}", self.ctype.name(), e);
            // Rows written so far point at buffers about to be released.
            if let Err(e) = clear_rows(port, self.addresses()) {
                log::warn!("{}: clearing table rows failed: {}", self.ctype.name(), e);
            }
            release(dma, session);
            self.set_state(ChannelState::Closed);
            return Err(e);
        }

        self.tx_busy.store(false, Ordering::Release);
        self.exceptions.store(0, Ordering::Release);
        *self.session.write() = Some(session);
        life.open_count = 1;
        self.set_state(ChannelState::Configured);
        log::debug!("{}: configured {:?}", self.ctype.name(), self.addresses());
        Ok(())
    }

    fn allocate<A: DmaAllocator>(&self, dma: &Mutex<A>, capacity: usize) -> Result<Session, Error> {
        let depth = self.depth();
        let mut dma = dma.lock();
        let storage = dma
            .allocate(RingBuffer::required_len(capacity, depth))
            .ok_or(Error::OutOfMemory)?;
        let ring = match RingBuffer::new(storage, capacity, depth) {
            Ok(ring) => ring,
            Err(storage) => {
                dma.release(storage);
                return Err(Error::InvalidArgument);
            }
        };
        let transfer = match dma.allocate(4 * depth) {
            Some(region) => region,
            None => {
                dma.release(ring.into_storage());
                return Err(Error::OutOfMemory);
            }
        };
        let rx = PingPong::new(transfer.phys_at(0), transfer.phys_at(depth));
        let tx = PingPong::new(transfer.phys_at(2 * depth), transfer.phys_at(3 * depth));
        Ok(Session {
            ring,
            transfer,
            rx,
            tx,
            depth,
        })
    }

    fn program_tables<M, D>(
        &self,
        port: &ControlPort<M, D>,
        session: &Session,
        sole_user: bool,
    ) -> Result<(), Error>
    where
        M: Mmio,
        D: DelayNs + Clone,
    {
        let pair = self.addresses();
        let (cdt, cat, adt) = (port.cdt(), port.cat(), port.adt());
        let depth = session.depth as u32;

        if sole_user {
            cdt.reset_all()?;
            cat.reset_all()?;
            adt.reset_all()?;
        } else {
            clear_rows(port, pair)?;
        }

        cdt.init_channel(pair.rx, self.ctype, Direction::Receive, self.ctype.dbr_offset(), depth)?;
        cdt.init_channel(pair.tx, self.ctype, Direction::Transmit, self.ctype.dbr_offset(), depth)?;
        for direction in [Direction::Receive, Direction::Transmit] {
            for route in CatRoute::of(direction) {
                cat.stage_channel(pair.get(direction), route, self.ctype)?;
            }
        }
        adt.init_channel(pair.rx, &session.rx, depth, self.ctype)?;
        adt.init_channel(pair.tx, &session.tx, depth, self.ctype)?;
        Ok(())
    }

    /// Drop one reference; the last one stops the channel if needed, zeroes
    /// its table rows and releases its buffers.
    ///
    /// Teardown always completes. The first register error met on the way
    /// is returned afterwards.
    pub fn close<M, D, A>(&self, port: &ControlPort<M, D>, dma: &Mutex<A>) -> Result<(), Error>
    where
        M: Mmio,
        D: DelayNs + Clone,
        A: DmaAllocator,
    {
        let mut life = self.lifecycle.lock();
        match life.open_count {
            0 => return Err(Error::NotOpen),
            1 => {}
            _ => {
                life.open_count -= 1;
                return Ok(());
            }
        }

        let mut first_error = None;
        if self.state() == ChannelState::Started {
            if let Err(e) = self.stop_locked(port) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = clear_rows(port, self.addresses()) {
            log::warn!("{}: clearing table rows failed: {}", self.ctype.name(), e);
            first_error.get_or_insert(e);
        }

        self.set_state(ChannelState::Closed);
        if let Some(session) = self.session.write().take() {
            release(dma, session);
        }
        life.open_count = 0;
        self.readers.wake_all();
        self.writers.wake_all();
        log::debug!("{}: closed", self.ctype.name());
        first_error.map_or(Ok(()), Err)
    }

    // ── Start / stop ───────────────────────────────────────────────────

    /// Enable the channel on the bus. Starting a started channel does
    /// nothing.
    pub fn start<M, D>(&self, port: &ControlPort<M, D>) -> Result<(), Error>
    where
        M: Mmio,
        D: DelayNs + Clone,
    {
        let _life = self.lifecycle.lock();
        match self.state() {
            ChannelState::Started => return Ok(()),
            ChannelState::Configured => {}
            ChannelState::Stopped => {
                // Packets from the previous run are stale.
                if let Some(session) = self.session.write().as_mut() {
                    session.ring.reset();
                }
            }
            ChannelState::Closed => return Err(Error::NotOpen),
            ChannelState::Configuring => return Err(Error::InvalidState),
        }

        let pair = self.addresses();
        let cat = port.cat();
        let enabled = match self.ctype {
            ChannelType::Synchronous => cat.unmute_sync_channel(pair.rx, pair.tx),
            _ => cat.enable_pair(pair.rx, pair.tx, self.ctype),
        };
        if let Err(e) = enabled {
            return Err(match e {
                Error::RegisterTimeout(t) if t.is_bus_wait() => {
                    log::warn!("{}: {}", self.ctype.name(), t);
                    Error::BusNotLocked
                }
                other => other,
            });
        }

        if let Err(e) = self.arm_receive(port) {
            if cat.disable_pair(pair.rx, pair.tx).is_err() {
                log::warn!("{}: could not disable CAT after failed start", self.ctype.name());
            }
            return Err(e);
        }

        self.tx_busy.store(false, Ordering::Release);
        for number in [pair.rx, pair.tx] {
            let (reg, bit) = channel_bit(number, [ACMR0, ACMR1]);
            port.modify_register(reg, 0, bit);
        }
        port.modify_register(MIEN, 0, mien_bits(self.ctype));
        self.set_state(ChannelState::Started);
        log::debug!("{}: started", self.ctype.name());
        Ok(())
    }

    fn arm_receive<M, D>(&self, port: &ControlPort<M, D>) -> Result<(), Error>
    where
        M: Mmio,
        D: DelayNs + Clone,
    {
        let guard = self.session.read();
        let session = guard.as_ref().ok_or(Error::NotOpen)?;
        let rx = self.addresses().rx;
        port.adt()
            .arm(rx, Half::Ping, session.rx.addr(Half::Ping), self.ctype)?;
        session.rx.set_active(Half::Ping);
        Ok(())
    }

    /// Take the channel off the bus, keeping its buffers. Stopping a channel
    /// that is not started does nothing.
    ///
    /// Interrupts are masked first, so the channel reaches `Stopped` even
    /// when disabling its CAT entries fails; that error is still returned.
    pub fn stop<M, D>(&self, port: &ControlPort<M, D>) -> Result<(), Error>
    where
        M: Mmio,
        D: DelayNs + Clone,
    {
        let _life = self.lifecycle.lock();
        match self.state() {
            ChannelState::Started => self.stop_locked(port),
            ChannelState::Closed => Err(Error::NotOpen),
            _ => Ok(()),
        }
    }

    fn stop_locked<M, D>(&self, port: &ControlPort<M, D>) -> Result<(), Error>
    where
        M: Mmio,
        D: DelayNs + Clone,
    {
        let pair = self.addresses();
        for number in [pair.rx, pair.tx] {
            let (reg, bit) = channel_bit(number, [ACMR0, ACMR1]);
            port.modify_register(reg, bit, 0);
        }
        port.modify_register(MIEN, mien_bits(self.ctype), 0);

        let result = port.cat().disable_pair(pair.rx, pair.tx);
        if let Err(e) = &result {
            log::warn!("{}: disabling CAT entries failed: {}", self.ctype.name(), e);
        }
        self.tx_busy.store(false, Ordering::Release);
        self.set_state(ChannelState::Stopped);
        self.readers.wake_all();
        self.writers.wake_all();
        log::debug!("{}: stopped", self.ctype.name());
        result
    }

    // ── Addresses ──────────────────────────────────────────────────────

    /// Assign logical channel numbers. A configured channel has its rows
    /// moved: the old rows are zeroed and the new ones programmed. Not
    /// allowed while started.
    pub fn set_addresses<M, D>(&self, port: &ControlPort<M, D>, pair: ChannelPair) -> Result<(), Error>
    where
        M: Mmio,
        D: DelayNs + Clone,
    {
        if !pair.is_valid() {
            return Err(Error::InvalidArgument);
        }
        let _life = self.lifecycle.lock();
        let state = self.state();
        if state == ChannelState::Started || state == ChannelState::Configuring {
            return Err(Error::InvalidState);
        }
        let old = self.addresses();
        if old == pair {
            return Ok(());
        }
        self.store_addresses(pair);
        log::debug!("{}: addresses {:?} -> {:?}", self.ctype.name(), old, pair);
        if !state.is_configured() {
            return Ok(());
        }

        let guard = self.session.read();
        let Some(session) = guard.as_ref() else {
            return Ok(());
        };
        let moved = clear_rows(port, old).and_then(|()| self.program_tables(port, session, false));
        if let Err(e) = moved {
            log::warn!("{}: moving to {:?} failed: {}", self.ctype.name(), pair, e);
            if clear_rows(port, pair).is_err() {
                log::warn!("{}: could not clear rows of {:?}", self.ctype.name(), pair);
            }
            self.store_addresses(old);
            if let Err(restore) = self.program_tables(port, session, false) {
                log::warn!("{}: could not restore {:?}: {}", self.ctype.name(), old, restore);
            }
            return Err(e);
        }
        Ok(())
    }

    fn store_addresses(&self, pair: ChannelPair) {
        self.rx_addr.store(pair.rx, Ordering::Release);
        self.tx_addr.store(pair.tx, Ordering::Release);
    }

    // ── Data path ──────────────────────────────────────────────────────

    /// Read one packet of the channel's fixed size into `out`.
    ///
    /// A blocking read waits while the channel is started and its ring is
    /// empty. Once the channel is not started, an empty ring yields
    /// [`Error::WouldBlock`] since nothing more will arrive.
    pub fn read(&self, out: &mut [u8], blocking: bool) -> Result<usize, Error> {
        if out.len() < self.depth() {
            return Err(Error::BufferTooSmall);
        }
        loop {
            {
                let guard = self.session.read();
                let session = guard.as_ref().ok_or(Error::NotOpen)?;
                match session.ring.dequeue(out, false, &self.readers) {
                    Err(Error::WouldBlock) => {}
                    other => return other,
                }
            }
            if !blocking || self.state() != ChannelState::Started {
                return Err(Error::WouldBlock);
            }
            self.readers
                .wait_until(&|| self.has_packet() || self.state() != ChannelState::Started)
                .map_err(|_| Error::Interrupted)?;
        }
    }

    /// Send one frame. At most one transmit is in flight; a second write
    /// waits for its completion or, non-blocking, returns
    /// [`Error::WouldBlock`].
    pub fn write<M, D>(&self, port: &ControlPort<M, D>, data: &[u8], blocking: bool) -> Result<usize, Error>
    where
        M: Mmio,
        D: DelayNs + Clone,
    {
        if data.len() > self.depth() {
            return Err(Error::FrameTooLarge);
        }
        self.claim_transmit(blocking)?;

        let guard = self.session.read();
        let Some(session) = guard.as_ref() else {
            self.tx_busy.store(false, Ordering::Release);
            return Err(Error::NotOpen);
        };

        let tx = self.addresses().tx;
        let adt = port.adt();
        let armed = adt.status(tx).and_then(|status| {
            let half = crate::adt::next_half(status);
            let offset = session.half_offset(Direction::Transmit, half);
            session.transfer.write_at(offset, data);
            session
                .transfer
                .fill_at(offset + data.len(), session.depth - data.len(), 0);
            adt.rearm(tx, self.ctype, status, session.tx.addr(half))
        });
        match armed {
            Ok(half) => {
                session.tx.set_active(half);
                Ok(data.len())
            }
            Err(e) => {
                log::warn!("{}: transmit not armed: {}", self.ctype.name(), e);
                self.tx_busy.store(false, Ordering::Release);
                self.writers.wake_all();
                Err(Error::WouldBlock)
            }
        }
    }

    fn claim_transmit(&self, blocking: bool) -> Result<(), Error> {
        loop {
            match self.state() {
                ChannelState::Started => {}
                ChannelState::Closed => return Err(Error::NotOpen),
                _ => return Err(Error::InvalidState),
            }
            if self
                .tx_busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
            if !blocking {
                return Err(Error::WouldBlock);
            }
            self.writers
                .wait_until(&|| {
                    !self.tx_busy.load(Ordering::Acquire) || self.state() != ChannelState::Started
                })
                .map_err(|_| Error::Interrupted)?;
        }
    }

    fn has_packet(&self) -> bool {
        self.session
            .try_read()
            .map_or(false, |guard| guard.as_ref().map_or(false, |s| !s.ring.is_empty()))
    }

    /// Return and clear pending exceptions; [`Error::WouldBlock`] when none
    /// are pending.
    pub fn take_exceptions(&self) -> Result<ExceptionFlags, Error> {
        if self.state() == ChannelState::Closed {
            return Err(Error::NotOpen);
        }
        let raw = self.exceptions.swap(0, Ordering::AcqRel);
        if raw == 0 {
            return Err(Error::WouldBlock);
        }
        Ok(ExceptionFlags::from_bits_retain(raw))
    }

    pub fn readiness(&self) -> Readiness {
        let mut ready = Readiness::empty();
        if self.has_packet() {
            ready |= Readiness::READABLE;
        }
        if self.state() == ChannelState::Started && !self.tx_busy.load(Ordering::Acquire) {
            ready |= Readiness::WRITABLE;
        }
        if self.exceptions.load(Ordering::Acquire) != 0 {
            ready |= Readiness::EXCEPTION;
        }
        ready
    }

    // ── Interrupt context ──────────────────────────────────────────────

    /// A receive half completed: hand the controller the other half, then
    /// queue the completed one. Returns `false` if the event was skipped.
    pub fn service_receive<M, D>(&self, port: &ControlPort<M, D>) -> bool
    where
        M: Mmio,
        D: DelayNs + Clone,
    {
        let Some(guard) = self.session.try_read() else {
            return false;
        };
        let Some(session) = guard.as_ref() else {
            return false;
        };
        let rx = self.addresses().rx;
        let adt = port.adt();

        let status = match adt.status(rx) {
            Ok(status) => status,
            Err(e) => {
                log::warn!("{}: rx status unreadable: {}", self.ctype.name(), e);
                return false;
            }
        };
        let completed = session.rx.completed(status);
        let done = match completed {
            Half::Ping => ADT_DNE1,
            Half::Pong => ADT_DNE2,
        };
        let next = completed.other();
        match adt.rearm(rx, self.ctype, done, session.rx.addr(next)) {
            Ok(half) => session.rx.set_active(half),
            Err(e) => log::warn!("{}: rx rearm failed: {}", self.ctype.name(), e),
        }

        let offset = session.half_offset(Direction::Receive, completed);
        session
            .ring
            .try_enqueue_from(&session.transfer, offset, &self.readers);
        true
    }

    /// The in-flight transmit completed.
    pub fn service_transmit(&self) {
        self.tx_busy.store(false, Ordering::Release);
        self.writers.wake_all();
    }

    /// Logical channel `number` of this node raised a protocol event:
    /// collect and clear its status and record it as an exception.
    pub fn service_protocol<M, D>(&self, port: &ControlPort<M, D>, number: u8) -> bool
    where
        M: Mmio,
        D: DelayNs + Clone,
    {
        let Some(direction) = self.direction_of(number) else {
            return false;
        };
        match port.cdt().take_status(number, self.ctype, direction) {
            Ok(flags) if !flags.is_empty() => {
                self.exceptions.fetch_or(flags.bits(), Ordering::AcqRel);
                self.readers.wake_all();
                true
            }
            Ok(_) => false,
            Err(e) => {
                log::warn!("{}: ch {} status unreadable: {}", self.ctype.name(), number, e);
                false
            }
        }
    }
}

/// Zero the CDT, CAT and ADT rows of a pair.
fn clear_rows<M, D>(port: &ControlPort<M, D>, pair: ChannelPair) -> Result<(), Error>
where
    M: Mmio,
    D: DelayNs + Clone,
{
    port.cdt().reset_channel(pair.rx)?;
    port.cdt().reset_channel(pair.tx)?;
    port.cat().clear_pair(pair.rx, pair.tx)?;
    port.adt().reset_channel(pair.rx)?;
    port.adt().reset_channel(pair.tx)
}

fn release<A: DmaAllocator>(dma: &Mutex<A>, session: Session) {
    let mut dma = dma.lock();
    dma.release(session.ring.into_storage());
    dma.release(session.transfer);
}
