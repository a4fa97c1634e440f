//! Deployment knobs.

use crate::constants::RX_RING_NODES;

/// A bounded wait: check, then sleep `interval_ns`, until `timeout_ns` has
/// been spent sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval_ns: u32,
    pub timeout_ns: u32,
}

impl PollBudget {
    pub const fn new(interval_ns: u32, timeout_ns: u32) -> Self {
        PollBudget {
            interval_ns,
            timeout_ns,
        }
    }

    /// Upper bound on how many checks a wait under this budget performs.
    pub const fn max_checks(&self) -> u32 {
        if self.interval_ns == 0 {
            return 1;
        }
        self.timeout_ns / self.interval_ns + 1
    }
}

/// Transport-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Budget for one table transaction to report completion.
    pub register_poll: PollBudget,
    /// Budget for each of the clock-running and bus-lock waits that
    /// precede unmuting synchronous channels.
    pub sync_lock_poll: PollBudget,
    /// Receive ring capacity in packets, per channel.
    pub ring_capacity: usize,
}

impl TransportConfig {
    pub const DEFAULT: TransportConfig = TransportConfig {
        register_poll: PollBudget::new(100, 100_000),
        sync_lock_poll: PollBudget::new(1_000, 10_000_000),
        ring_capacity: RX_RING_NODES,
    };
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budgets() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.register_poll.max_checks(), 1001);
        assert_eq!(cfg.sync_lock_poll.max_checks(), 10_001);
        assert_eq!(cfg.ring_capacity, 10);
        assert_eq!(PollBudget::new(0, 50).max_checks(), 1);
    }
}
