//! Byte counters kept per filter.

use serde::{Deserialize, Serialize};

/// Direction of a classified flow relative to the rule that matched it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

/// Cumulative sent/received byte counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounterPair {
    /// Bytes sent
    pub sent: u64,
    /// Bytes received
    pub recv: u64,
}

impl TrafficCounterPair {
    pub fn new(sent: u64, recv: u64) -> Self {
        Self { sent, recv }
    }

    /// Add bytes in the given direction, saturating at `u64::MAX`
    pub fn add(&mut self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Sent => self.sent = self.sent.saturating_add(bytes),
            Direction::Received => self.recv = self.recv.saturating_add(bytes),
        }
    }

    pub fn total(&self) -> u64 {
        self.sent.saturating_add(self.recv)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_reset() {
        let mut counters = TrafficCounterPair::default();
        counters.add(Direction::Sent, 100);
        counters.add(Direction::Received, 50);
        counters.add(Direction::Sent, 1);
        assert_eq!(counters, TrafficCounterPair::new(101, 50));
        assert_eq!(counters.total(), 151);

        counters.reset();
        assert_eq!(counters.total(), 0);
    }

    #[test]
    fn test_saturates() {
        let mut counters = TrafficCounterPair::new(u64::MAX - 1, u64::MAX);
        counters.add(Direction::Sent, 10);
        assert_eq!(counters.sent, u64::MAX);
        assert_eq!(counters.total(), u64::MAX);
    }
}
