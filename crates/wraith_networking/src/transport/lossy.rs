//! Simulated network conditions layered over any transport.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{Transport, TransportStats};
use crate::error::NetResult;
use crate::server::ConnectionId;

/// Simulated link quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkConditions {
    /// Packet loss percentage (0-100).
    pub packet_loss_percent: u8,
    /// Duplicate delivery percentage (0-100).
    pub duplicate_percent: u8,
}

impl NetworkConditions {
    /// Perfect link.
    pub const PERFECT: Self = Self {
        packet_loss_percent: 0,
        duplicate_percent: 0,
    };

    /// Mildly degraded link.
    pub const DEGRADED: Self = Self {
        packet_loss_percent: 5,
        duplicate_percent: 1,
    };

    /// Heavily degraded link.
    pub const HOSTILE: Self = Self {
        packet_loss_percent: 20,
        duplicate_percent: 5,
    };
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::PERFECT
    }
}

/// Drops and duplicates outgoing packets of an inner transport.
///
/// Decisions come from a seeded [`ChaCha8Rng`], so a run is reproducible.
pub struct LossyTransport<T> {
    inner: T,
    conditions: NetworkConditions,
    rng: Mutex<ChaCha8Rng>,
    stats: Mutex<TransportStats>,
}

impl<T: Transport> LossyTransport<T> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: T, conditions: NetworkConditions, seed: u64) -> Self {
        Self {
            inner,
            conditions,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            stats: Mutex::new(TransportStats::default()),
        }
    }

    /// Wrapped transport.
    #[inline]
    #[must_use]
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    /// Active conditions.
    #[inline]
    #[must_use]
    pub const fn conditions(&self) -> NetworkConditions {
        self.conditions
    }

    /// Replaces the active conditions.
    pub fn set_conditions(&mut self, conditions: NetworkConditions) {
        self.conditions = conditions;
    }

    fn roll(&self, percent: u8) -> bool {
        percent > 0 && self.rng.lock().gen_range(0..100u8) < percent
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    fn send(&self, to: ConnectionId, bytes: &[u8]) -> NetResult<()> {
        if bytes.len() > self.inner.max_datagram_size() {
            return self.inner.send(to, bytes);
        }
        if self.roll(self.conditions.packet_loss_percent) {
            self.stats.lock().packets_dropped += 1;
            return Ok(());
        }
        self.inner.send(to, bytes)?;
        {
            let mut stats = self.stats.lock();
            stats.packets_sent += 1;
            stats.bytes_sent += bytes.len() as u64;
        }
        if self.roll(self.conditions.duplicate_percent) {
            self.inner.send(to, bytes)?;
            self.stats.lock().packets_duplicated += 1;
        }
        Ok(())
    }

    fn receive(&self) -> Option<(ConnectionId, Vec<u8>)> {
        let datagram = self.inner.receive()?;
        let mut stats = self.stats.lock();
        stats.packets_received += 1;
        stats.bytes_received += datagram.1.len() as u64;
        Some(datagram)
    }

    fn max_datagram_size(&self) -> usize {
        self.inner.max_datagram_size()
    }

    fn stats(&self) -> TransportStats {
        *self.stats.lock()
    }
}
