//! # Spawn Classification
//!
//! Decides what a newly seen ghost becomes on the client.
//!
//! ```text
//! pending requests ──► [predicted] ──► [custom ...] ──► [default] ──► materialize
//!                          │                │               │
//!                  Predicted(entity)   Adopted(entity)    Fresh
//! ```
//!
//! Classifiers run in chain order over the requests nobody has claimed yet.
//! A claim is final; the default classifier only claims once a request has
//! waited the configured delay, so later classifiers get a chance first.

use wraith_core::{
    EntityAllocator, GhostInstance, GhostState, GhostTypeId, LocalEntity, SnapshotHistory, Tick,
};

use crate::config::NetcodeConfig;

/// Outcome of classifying a spawn request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpawnClass {
    /// A new local entity is created.
    Fresh,
    /// The server confirmed a locally predicted spawn; its entity is reused.
    Predicted(LocalEntity),
    /// An existing local entity takes over the ghost.
    Adopted(LocalEntity),
}

/// A ghost seen for the first time, waiting to be classified.
#[derive(Debug)]
pub struct SpawnRequest {
    pub(crate) instance: GhostInstance,
    pub(crate) owned: bool,
    pub(crate) received_tick: Tick,
    pub(crate) history: SnapshotHistory,
    claim: Option<(&'static str, SpawnClass)>,
}

impl SpawnRequest {
    pub(crate) fn new(
        instance: GhostInstance,
        owned: bool,
        received_tick: Tick,
        history: SnapshotHistory,
    ) -> Self {
        Self {
            instance,
            owned,
            received_tick,
            history,
            claim: None,
        }
    }

    /// Identity and type.
    #[inline]
    #[must_use]
    pub const fn instance(&self) -> GhostInstance {
        self.instance
    }

    /// Ghost type.
    #[inline]
    #[must_use]
    pub const fn type_id(&self) -> GhostTypeId {
        self.instance.type_id
    }

    /// Server spawn tick.
    #[inline]
    #[must_use]
    pub const fn spawn_tick(&self) -> Tick {
        self.instance.ghost.spawn_tick
    }

    /// The local player owns the ghost.
    #[inline]
    #[must_use]
    pub const fn owned(&self) -> bool {
        self.owned
    }

    /// Ticks since the request arrived.
    #[inline]
    #[must_use]
    pub const fn age(&self, tick: Tick) -> Tick {
        tick.saturating_sub(self.received_tick)
    }

    /// Entries received so far.
    #[inline]
    #[must_use]
    pub const fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// Claims the request. Returns false if it was already claimed.
    pub fn claim(&mut self, classifier: &'static str, class: SpawnClass) -> bool {
        if self.claim.is_some() {
            return false;
        }
        self.claim = Some((classifier, class));
        true
    }

    /// Classifier and class of the claim, if claimed.
    #[inline]
    #[must_use]
    pub const fn claimed(&self) -> Option<(&'static str, SpawnClass)> {
        self.claim
    }

    /// Returns true once claimed.
    #[inline]
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }
}

/// A locally predicted spawn awaiting server confirmation.
#[derive(Clone, Debug)]
pub struct PredictedSpawn {
    /// Local entity.
    pub entity: LocalEntity,
    /// Predicted type.
    pub type_id: GhostTypeId,
    /// Tick the spawn was predicted for.
    pub spawn_tick: Tick,
    /// Locally simulated state.
    pub state: GhostState,
}

/// Mutable client context handed to classifiers.
pub struct ClassificationContext<'a> {
    /// Current client tick.
    pub tick: Tick,
    /// Replication tuning.
    pub config: &'a NetcodeConfig,
    /// Unconfirmed predicted spawns, oldest first.
    pub predicted: &'a mut Vec<PredictedSpawn>,
    /// Local entity allocator.
    pub entities: &'a mut EntityAllocator,
}

/// One link of the classification chain.
pub trait SpawnClassifier: Send {
    /// Name recorded on claims.
    fn name(&self) -> &'static str;

    /// Claims any of `requests`; every request passed in is unclaimed.
    fn classify(&mut self, ctx: &mut ClassificationContext<'_>, requests: &mut [&mut SpawnRequest]);
}

/// Matches requests against predicted spawns of the same type.
///
/// The closest spawn tick within the window wins; ties go to the oldest
/// prediction. Each prediction matches at most one request.
#[derive(Clone, Copy, Debug, Default)]
pub struct PredictedSpawnClassifier;

impl SpawnClassifier for PredictedSpawnClassifier {
    fn name(&self) -> &'static str {
        "predicted"
    }

    fn classify(&mut self, ctx: &mut ClassificationContext<'_>, requests: &mut [&mut SpawnRequest]) {
        let window = ctx.config.predicted_spawn_tick_window;
        for request in requests.iter_mut() {
            let best = ctx
                .predicted
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    p.type_id == request.type_id() && p.spawn_tick.abs_diff(request.spawn_tick()) <= window
                })
                .min_by_key(|(index, p)| (p.spawn_tick.abs_diff(request.spawn_tick()), *index))
                .map(|(index, _)| index);
            if let Some(index) = best {
                let spawn = ctx.predicted.remove(index);
                request.claim(self.name(), SpawnClass::Predicted(spawn.entity));
            }
        }
    }
}

/// Claims every request as [`SpawnClass::Fresh`] once it has waited the
/// configured delay.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSpawnClassifier;

impl SpawnClassifier for DefaultSpawnClassifier {
    fn name(&self) -> &'static str {
        "default"
    }

    fn classify(&mut self, ctx: &mut ClassificationContext<'_>, requests: &mut [&mut SpawnRequest]) {
        let delay = ctx.config.spawn_classification_delay;
        for request in requests.iter_mut() {
            if request.age(ctx.tick) >= delay {
                request.claim(self.name(), SpawnClass::Fresh);
            }
        }
    }
}

/// Ordered classifier chain; the default classifier always runs last.
pub(crate) struct ClassifierChain {
    classifiers: Vec<Box<dyn SpawnClassifier>>,
    fallback: DefaultSpawnClassifier,
}

impl ClassifierChain {
    pub(crate) fn new() -> Self {
        Self {
            classifiers: vec![Box::new(PredictedSpawnClassifier)],
            fallback: DefaultSpawnClassifier,
        }
    }

    /// Appends a classifier ahead of the default.
    pub(crate) fn push(&mut self, classifier: Box<dyn SpawnClassifier>) {
        tracing::debug!("Spawn classifier '{}' added", classifier.name());
        self.classifiers.push(classifier);
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.classifiers
            .iter()
            .map(|c| c.name())
            .chain(std::iter::once(self.fallback.name()))
            .collect()
    }

    /// Runs every classifier over the still-unclaimed requests.
    pub(crate) fn run(&mut self, ctx: &mut ClassificationContext<'_>, requests: &mut [SpawnRequest]) {
        let links = self
            .classifiers
            .iter_mut()
            .map(|c| c.as_mut() as &mut dyn SpawnClassifier)
            .chain(std::iter::once(&mut self.fallback as &mut dyn SpawnClassifier));
        for classifier in links {
            let mut open: Vec<&mut SpawnRequest> =
                requests.iter_mut().filter(|r| !r.is_claimed()).collect();
            if open.is_empty() {
                break;
            }
            classifier.classify(ctx, &mut open);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wraith_core::{GhostId, GhostRef};

    fn request(index: u32, type_id: u16, spawn_tick: Tick, received: Tick) -> SpawnRequest {
        SpawnRequest::new(
            GhostInstance {
                ghost: GhostRef::new(GhostId::new(index).unwrap(), spawn_tick),
                type_id: GhostTypeId(type_id),
            },
            false,
            received,
            SnapshotHistory::new(4),
        )
    }

    fn predicted(entities: &mut EntityAllocator, type_id: u16, spawn_tick: Tick) -> PredictedSpawn {
        PredictedSpawn {
            entity: entities.allocate(),
            type_id: GhostTypeId(type_id),
            spawn_tick,
            state: GhostState::default(),
        }
    }

    /// Claims requests of one type as adopted into a fixed entity.
    struct Adopter {
        type_id: GhostTypeId,
        entity: LocalEntity,
    }

    impl SpawnClassifier for Adopter {
        fn name(&self) -> &'static str {
            "adopter"
        }

        fn classify(&mut self, _: &mut ClassificationContext<'_>, requests: &mut [&mut SpawnRequest]) {
            for request in requests.iter_mut() {
                if request.type_id() == self.type_id {
                    request.claim(self.name(), SpawnClass::Adopted(self.entity));
                }
            }
        }
    }

    #[test]
    fn test_chain_order_and_single_claim() {
        let config = NetcodeConfig::default();
        let mut entities = EntityAllocator::new();
        let mut predictions = vec![predicted(&mut entities, 1, 100)];
        let adopted_entity = entities.allocate();

        let mut chain = ClassifierChain::new();
        chain.push(Box::new(Adopter {
            type_id: GhostTypeId(1),
            entity: adopted_entity,
        }));
        assert_eq!(chain.names(), vec!["predicted", "adopter", "default"]);

        let mut requests = vec![request(0, 1, 101, 5), request(1, 1, 300, 5), request(2, 2, 50, 5)];
        let mut ctx = ClassificationContext {
            tick: 5,
            config: &config,
            predicted: &mut predictions,
            entities: &mut entities,
        };
        chain.run(&mut ctx, &mut requests);

        assert_eq!(requests[0].claimed().map(|c| c.0), Some("predicted"));
        assert_eq!(requests[1].claimed(), Some(("adopter", SpawnClass::Adopted(adopted_entity))));
        assert_eq!(requests[2].claimed(), Some(("default", SpawnClass::Fresh)));
        assert!(predictions.is_empty());
    }

    #[test]
    fn test_predicted_match_prefers_closest_tick() {
        let config = NetcodeConfig::default();
        let mut entities = EntityAllocator::new();
        let far = predicted(&mut entities, 1, 96);
        let near = predicted(&mut entities, 1, 99);
        let near_entity = near.entity;
        let mut predictions = vec![far, near];

        let mut requests = vec![request(0, 1, 100, 0)];
        let mut ctx = ClassificationContext {
            tick: 0,
            config: &config,
            predicted: &mut predictions,
            entities: &mut entities,
        };
        ClassifierChain::new().run(&mut ctx, &mut requests);
        assert_eq!(
            requests[0].claimed(),
            Some(("predicted", SpawnClass::Predicted(near_entity)))
        );
        assert_eq!(predictions.len(), 1);
    }

    #[test]
    fn test_default_waits_for_delay() {
        let config = NetcodeConfig {
            spawn_classification_delay: 3,
            ..NetcodeConfig::default()
        };
        let mut entities = EntityAllocator::new();
        let mut predictions = Vec::new();
        let mut requests = vec![request(0, 1, 10, 10)];
        let mut chain = ClassifierChain::new();

        for (tick, claimed) in [(11, false), (12, false), (13, true)] {
            let mut ctx = ClassificationContext {
                tick,
                config: &config,
                predicted: &mut predictions,
                entities: &mut entities,
            };
            chain.run(&mut ctx, &mut requests);
            assert_eq!(requests[0].is_claimed(), claimed, "tick {tick}");
        }
    }

    #[test]
    fn test_claim_is_final() {
        let mut req = request(0, 1, 1, 1);
        assert!(req.claim("first", SpawnClass::Fresh));
        assert!(!req.claim("second", SpawnClass::Fresh));
        assert_eq!(req.claimed().map(|c| c.0), Some("first"));
    }
}
