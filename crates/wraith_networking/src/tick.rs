//! # Tick Loop
//!
//! Fixed-timestep controller and the Full/Partial tick classifier.
//!
//! ## Design
//!
//! Render frames rarely line up with simulation ticks. Time accumulates;
//! every whole tick in the accumulator becomes a [`TickKind::Full`] tick
//! and the remainder becomes one [`TickKind::Partial`] tick, which the
//! prediction engine resimulates without restoring.
//!
//! ```text
//! ticks:   |-------|-------|-------|
//! frames:  ^    ^     ^       ^
//!          F    P     F,P     F
//! ```

use std::time::{Duration, Instant};

/// How a client tick is simulated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickKind {
    /// A whole tick: restore from authoritative data, resimulate, back up.
    Full,
    /// A fraction of the next tick: resimulate only.
    Partial {
        /// Elapsed share of the tick, in `(0, 1)`.
        fraction: f32,
    },
}

impl TickKind {
    /// Returns true for partial ticks.
    #[inline]
    #[must_use]
    pub const fn is_partial(self) -> bool {
        matches!(self, Self::Partial { .. })
    }
}

/// Work produced by one [`TickLoop::advance`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickSchedule {
    /// Whole ticks to run.
    pub full_ticks: u32,
    /// Fraction of the following tick, if any time is left over.
    pub partial: Option<f32>,
}

/// Fixed-timestep tick loop controller.
pub struct TickLoop {
    /// Target tick duration.
    tick_duration: Duration,
    /// Time of last poll.
    last_tick: Instant,
    /// Accumulated time not yet simulated.
    accumulator: Duration,
    /// Total ticks executed.
    tick_count: u64,
    /// Frame time statistics.
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    /// Minimum tick duration observed.
    pub min_tick_us: u64,
    /// Maximum tick duration observed.
    pub max_tick_us: u64,
    /// Average tick duration (rolling).
    pub avg_tick_us: u64,
    /// Number of late ticks (took longer than budget).
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickLoop {
    /// Creates a tick loop running at `tick_rate` Hz.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            last_tick: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: Self::fresh_stats(tick_duration),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn fresh_stats(tick_duration: Duration) -> TickStats {
        TickStats {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: tick_duration.as_micros() as u64,
            late_ticks: 0,
            total_ticks: 0,
        }
    }

    /// Adds `elapsed` to the accumulator and splits it into ticks.
    ///
    /// Whole ticks are consumed; the remainder stays accumulated and is
    /// reported as a partial fraction.
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&mut self, elapsed: Duration) -> TickSchedule {
        self.accumulator += elapsed;
        let mut full_ticks = 0;
        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            full_ticks += 1;
        }
        self.tick_count += u64::from(full_ticks);

        let partial = (!self.accumulator.is_zero()).then(|| {
            (self.accumulator.as_secs_f64() / self.tick_duration.as_secs_f64()) as f32
        });
        TickSchedule { full_ticks, partial }
    }

    /// Advances by wall-clock time since the previous poll.
    pub fn poll(&mut self) -> TickSchedule {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick);
        self.last_tick = now;
        self.advance(elapsed)
    }

    /// Marks the start of a tick's work.
    #[must_use]
    pub fn begin_tick(&self) -> Instant {
        Instant::now()
    }

    /// Records how long a tick's work took.
    #[allow(clippy::cast_possible_truncation)]
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = duration.as_micros() as u64;

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);

        // Rolling average
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;

        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Sleeps until the accumulator holds a whole tick.
    pub fn wait_for_next_tick(&self) {
        let elapsed = self.last_tick.elapsed() + self.accumulator;
        if elapsed < self.tick_duration {
            std::thread::sleep(self.tick_duration - elapsed);
        }
    }

    /// Total whole ticks produced.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Tick statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = Self::fresh_stats(self.tick_duration);
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(crate::WRAITH_TICK_RATE)
    }
}
