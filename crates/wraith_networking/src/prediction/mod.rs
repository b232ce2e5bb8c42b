//! # Client-Side Prediction
//!
//! Rollback and resimulation of predicted ghosts.
//!
//! ## How It Works
//!
//! ```text
//! Full tick T:
//!   restore   latest authoritative entry (tick A) if new, else backup (tick B)
//!   replay    A+1 ..= T  (or B+1 ..= T) with the commands of each tick
//!   backup    state at T
//!
//! Partial tick T + f:
//!   start     from the backup, never from authoritative data
//!   replay    B+1 ..= T-1 as full steps, then T as a partial step
//!   keep      the backup untouched
//! ```
//!
//! Replaying from the same starting state with the same commands gives the
//! same result no matter how many partial ticks happened in between.

use wraith_core::{GhostInstance, GhostSerializer, GhostState, GhostType, SnapshotHistory, Tick};

use crate::command::{Command, CommandBuffer};
use crate::tick::TickKind;

/// One step handed to game simulation code.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationStep {
    /// Tick being simulated.
    pub tick: Tick,
    /// Whole tick or a fraction of it.
    pub kind: TickKind,
}

/// Game-provided simulation of predicted ghosts.
///
/// Must be deterministic: equal state, command and step give equal output.
/// Called from worker threads, one ghost per call.
pub trait PredictedSimulation<C>: Sync {
    /// Advances `state` by one step.
    fn simulate(
        &self,
        instance: &GhostInstance,
        ghost_type: &GhostType,
        state: &mut GhostState,
        command: Option<&C>,
        step: SimulationStep,
    );
}

/// Simulation that changes nothing, for ghosts without predicted logic.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSimulation;

impl<C> PredictedSimulation<C> for NoSimulation {
    fn simulate(&self, _: &GhostInstance, _: &GhostType, _: &mut GhostState, _: Option<&C>, _: SimulationStep) {}
}

/// Where a ghost is in the per-tick prediction cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PredictionPhase {
    /// Nothing pending.
    #[default]
    Idle,
    /// State restored, replay not yet run.
    Restore,
    /// Replaying commands.
    Resimulate,
}

/// Predicted state saved at the end of a full tick.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionBackup {
    /// Tick the state belongs to.
    pub tick: Tick,
    /// Saved state.
    pub state: GhostState,
}

/// Prediction counters of one ghost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PredictionStats {
    /// Restores from new authoritative data.
    pub rollbacks: u64,
    /// Restores from the backup.
    pub backup_restores: u64,
    /// Steps simulated, full and partial.
    pub steps: u64,
}

/// Rollback state of one predicted ghost.
#[derive(Clone, Debug, Default)]
pub struct Predictor {
    phase: PredictionPhase,
    backup: Option<PredictionBackup>,
    restored_entry: Option<Tick>,
    replay_from: Tick,
    stats: PredictionStats,
}

/// Command for `tick`: exact match, else the newest earlier one.
#[inline]
fn command_for<C: Command>(commands: Option<&CommandBuffer<C>>, tick: Tick) -> Option<&C> {
    let buffer = commands?;
    buffer
        .get_at_tick(tick)
        .or_else(|| buffer.get_at_or_before(tick).map(|entry| &entry.command))
}

impl Predictor {
    /// Creates an idle predictor with no backup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> PredictionPhase {
        self.phase
    }

    /// Backup of the last full tick.
    #[inline]
    #[must_use]
    pub const fn backup(&self) -> Option<&PredictionBackup> {
        self.backup.as_ref()
    }

    /// Counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &PredictionStats {
        &self.stats
    }

    /// Restore phase of a full tick.
    ///
    /// Loads the latest authoritative entry if it has not been restored
    /// before, otherwise the backup. Returns true if `state` was replaced.
    pub fn restore(
        &mut self,
        ghost_type: &GhostType,
        serializer: &dyn GhostSerializer,
        history: &SnapshotHistory,
        state: &mut GhostState,
    ) -> bool {
        if let Some(latest) = history.latest() {
            if self.restored_entry != Some(latest.tick) {
                *state = serializer.dequantize(ghost_type.layout(), &latest.units, &latest.enabled);
                self.restored_entry = Some(latest.tick);
                self.replay_from = latest.tick;
                self.phase = PredictionPhase::Restore;
                self.stats.rollbacks += 1;
                return true;
            }
        }
        if let Some(backup) = &self.backup {
            state.clone_from(&backup.state);
            self.replay_from = backup.tick;
            self.phase = PredictionPhase::Restore;
            self.stats.backup_restores += 1;
            return true;
        }
        false
    }

    /// Resimulation phase.
    ///
    /// A full tick replays from the restored tick up to `tick` and saves a
    /// backup. A partial tick replays from the backup without touching it;
    /// with no backup yet it does nothing.
    pub fn resimulate<C: Command, S: PredictedSimulation<C> + ?Sized>(
        &mut self,
        instance: &GhostInstance,
        ghost_type: &GhostType,
        state: &mut GhostState,
        commands: Option<&CommandBuffer<C>>,
        step: SimulationStep,
        simulation: &S,
    ) {
        match step.kind {
            TickKind::Full => {
                if self.phase != PredictionPhase::Restore {
                    return;
                }
                self.phase = PredictionPhase::Resimulate;
                for tick in self.replay_from.saturating_add(1)..=step.tick {
                    let full = SimulationStep { tick, kind: TickKind::Full };
                    simulation.simulate(instance, ghost_type, state, command_for(commands, tick), full);
                    self.stats.steps += 1;
                }
                self.backup = Some(PredictionBackup {
                    tick: step.tick.max(self.replay_from),
                    state: state.clone(),
                });
            }
            TickKind::Partial { .. } => {
                let Some(backup) = &self.backup else {
                    return;
                };
                self.phase = PredictionPhase::Resimulate;
                state.clone_from(&backup.state);
                for tick in backup.tick.saturating_add(1)..step.tick {
                    let full = SimulationStep { tick, kind: TickKind::Full };
                    simulation.simulate(instance, ghost_type, state, command_for(commands, tick), full);
                    self.stats.steps += 1;
                }
                if step.tick > backup.tick {
                    simulation.simulate(instance, ghost_type, state, command_for(commands, step.tick), step);
                    self.stats.steps += 1;
                }
            }
        }
        self.phase = PredictionPhase::Idle;
    }

    /// Forgets the backup and restored entry.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
