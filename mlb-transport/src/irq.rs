//! Interrupt entry points.
//!
//! The platform wires two controller interrupts to these handlers:
//! [`Transport::on_host_completion`] for host-side DMA completion and
//! [`Transport::on_bus_protocol`] for bus-side protocol events. Both may run
//! concurrently with process-context calls on another core or preempt them
//! on this one; they never block, and they skip any channel whose session
//! is being torn down.
//!
//! Within one call, channels are serviced in increasing channel number.

use embedded_hal::delay::DelayNs;

use crate::hal::{BusPower, DmaAllocator, Mmio, WaitQueue};
use crate::regs::*;
use crate::transport::Transport;
use crate::types::Direction;

/// Set bits of a two-register channel bitmap, lowest channel first.
fn channels_in(words: [u32; 2]) -> impl Iterator<Item = u8> {
    (0u8..64).filter(move |&n| words[n as usize / 32] & (1 << (n % 32)) != 0)
}

impl<M, D, A, W, P> Transport<M, D, A, W, P>
where
    M: Mmio,
    D: DelayNs + Clone,
    A: DmaAllocator,
    W: WaitQueue,
    P: BusPower,
{
    /// Service host-side channel completions. Returns how many channel
    /// events were handled.
    pub fn on_host_completion(&self) -> usize {
        let mmio = self.port.mmio();
        let status = [mmio.read(ACSR0), mmio.read(ACSR1)];
        let errors = [mmio.read(HCER0), mmio.read(HCER1)];
        if status == [0, 0] && errors == [0, 0] {
            return 0;
        }

        if mmio.read(ACTL) & ACTL_SCE != 0 {
            mmio.write(ACSR0, status[0]);
            mmio.write(ACSR1, status[1]);
            mmio.write(HCER0, errors[0]);
            mmio.write(HCER1, errors[1]);
        }

        let mut handled = 0;
        for number in channels_in(status) {
            if errors[number as usize / 32] & (1 << (number % 32)) != 0 {
                log::warn!("ch {}: host DMA error, completion skipped", number);
                continue;
            }
            let Some((channel, direction)) = self.owner(number) else {
                log::debug!("ch {}: completion for unowned channel", number);
                continue;
            };
            match direction {
                Direction::Receive => {
                    if channel.service_receive(&self.port) {
                        handled += 1;
                    }
                }
                Direction::Transmit => {
                    channel.service_transmit();
                    handled += 1;
                }
            }
        }
        handled
    }

    /// Service bus-side protocol events. Returns how many channels recorded
    /// an exception.
    pub fn on_bus_protocol(&self) -> usize {
        let mmio = self.port.mmio();
        let status = [mmio.read(MS0), mmio.read(MS1)];
        mmio.write(MS0, 0);
        mmio.write(MS1, 0);

        let system = mmio.read(MSS);
        if system != 0 {
            log::debug!("system status {:#010x}, data {:#010x}", system, mmio.read(MSD));
            mmio.write(MSS, 0);
        }

        let mut handled = 0;
        for number in channels_in(status) {
            match self.owner(number) {
                Some((channel, _)) => {
                    if channel.service_protocol(&self.port, number) {
                        handled += 1;
                    }
                }
                None => log::debug!("ch {}: protocol event for unowned channel", number),
            }
        }
        handled
    }
}
