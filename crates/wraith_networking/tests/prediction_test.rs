//! Integration tests for commands, client-side prediction and convergence
//! under packet loss.

mod common;

use common::{Harness, MoveCommand, Walk};
use proptest::prelude::*;
use wraith_core::{FieldValue, GhostInstance};
use wraith_networking::{
    CommandSender, CommandTarget, NetcodeConfig, NetworkConditions, PredictionPhase,
    RelevancyMode, TickKind,
};

fn command_for(tick: u32) -> MoveCommand {
    MoveCommand {
        dx: 1 + (tick % 3) as i32,
        dy: -1,
    }
}

fn server_state(h: &Harness, avatar: GhostInstance) -> (i32, i32) {
    let state = h.server.world().get(avatar.ghost_id()).unwrap().state();
    (state.int(0).unwrap(), state.int(1).unwrap())
}

/// Denies `avatar` to its owner and idles until the owner drops it.
/// Returns the next tick.
fn hide_from_owner(h: &mut Harness, index: usize, avatar: GhostInstance, from: u32) -> u32 {
    let conn = h.clients[index].handle.id();
    {
        let mut relevancy = h.server.context().relevancy.write();
        relevancy.set_mode(RelevancyMode::DenyList);
        relevancy.insert(conn, avatar.ghost_id());
    }
    let mut tick = from;
    while h.client(index).ghost_by_ref(avatar.ghost).is_some() {
        assert!(tick < from + 10, "owner still holds the hidden avatar at tick {tick}");
        tick = h.idle(tick, 1);
    }
    tick
}

fn client_state(h: &Harness, index: usize, avatar: GhostInstance) -> Option<(i32, i32)> {
    let state = h.client(index).ghost_by_ref(avatar.ghost)?.state();
    Some((state.int(0)?, state.int(1)?))
}

#[test]
fn test_owner_prediction_matches_server() {
    let mut h = Harness::new(NetcodeConfig::default());
    let c = h.connect();
    let owner = h.clients[c].handle.id();
    let avatar = h.server.spawn(h.types.avatar, 1, Some(owner)).unwrap();

    for tick in 1..=40 {
        h.step(tick, |_, t| Some(command_for(t)));
        if tick >= 3 {
            assert_eq!(client_state(&h, c, avatar), Some(server_state(&h, avatar)), "tick {tick}");
        }
    }

    let ghost = h.client(c).ghost_by_ref(avatar.ghost).unwrap();
    assert!(ghost.owned());
    assert!(ghost.is_predicted());
    assert_eq!(ghost.predictor().phase(), PredictionPhase::Idle);
    assert!(ghost.predictor().stats().rollbacks > 0);
    assert_eq!(ghost.predictor().backup().map(|b| b.tick), Some(40));
}

#[test]
fn test_non_owner_interpolates() {
    let mut h = Harness::new(NetcodeConfig::default());
    let a = h.connect();
    let b = h.connect();
    let owner = h.clients[a].handle.id();
    let avatar = h.server.spawn(h.types.avatar, 1, Some(owner)).unwrap();

    for tick in 1..=20 {
        h.step(tick, |index, t| (index == a).then(|| command_for(t)));
    }

    let remote = h.client(b).ghost_by_ref(avatar.ghost).unwrap();
    assert!(!remote.owned());
    assert!(!remote.is_predicted());
    // One tick behind: frame 19 arrived during tick 20
    let latest = remote.history().latest().unwrap();
    assert_eq!(latest.tick, 19);
    let server_entry = h.server.world().get(avatar.ghost_id()).unwrap().history().at_tick(19).unwrap();
    assert_eq!(latest.units, server_entry.units);

    let halfway = h.client(b).interpolated_state(avatar.ghost_id(), 18.5).unwrap();
    let at_18 = h.client(b).interpolated_state(avatar.ghost_id(), 18.0).unwrap();
    let at_19 = h.client(b).interpolated_state(avatar.ghost_id(), 19.0).unwrap();
    let x = halfway.int(0).unwrap();
    assert!(x >= at_18.int(0).unwrap() && x <= at_19.int(0).unwrap());
}

#[test]
fn test_commands_for_foreign_ghost_rejected() {
    let mut h = Harness::new(NetcodeConfig::default());
    let a = h.connect();
    let b = h.connect();
    let owner = h.clients[a].handle.id();
    let avatar = h.server.spawn(h.types.avatar, 1, Some(owner)).unwrap();
    let tick = h.idle(1, 3);

    let intruder = h.clients[b].handle.id();
    let mut sender = CommandSender::<MoveCommand>::new(64, 4, 1200);
    sender.set_enabled(true);
    sender.record(tick, MoveCommand { dx: 100, dy: 100 });
    let packet = sender
        .build_packet(tick, h.client(b).acks(), &[avatar.ghost])
        .unwrap();
    h.server.receive_packet(intruder, &packet).unwrap();

    assert!(h.server.command_at(avatar.ghost_id(), tick).is_none());
    assert_eq!(h.server.connection(intruder).unwrap().stats().commands_rejected, 1);
}

#[test]
fn test_commands_for_irrelevant_owned_ghost_rejected() {
    let mut h = Harness::new(NetcodeConfig::default());
    let c = h.connect();
    let owner = h.clients[c].handle.id();
    let avatar = h.server.spawn(h.types.avatar, 1, Some(owner)).unwrap();
    let tick = h.idle(1, 3);
    assert!(h.client(c).ghost_by_ref(avatar.ghost).is_some());

    let tick = hide_from_owner(&mut h, c, avatar, tick);
    let rejected = h.server.connection(owner).unwrap().stats().commands_rejected;

    let mut sender = CommandSender::<MoveCommand>::new(64, 4, 1200);
    sender.set_enabled(true);
    sender.record(tick, MoveCommand { dx: 7, dy: 7 });
    let packet = sender
        .build_packet(tick, h.client(c).acks(), &[avatar.ghost])
        .unwrap();
    h.server.receive_packet(owner, &packet).unwrap();

    assert!(h.server.command_at(avatar.ghost_id(), tick).is_none());
    assert_eq!(
        h.server.connection(owner).unwrap().stats().commands_rejected,
        rejected + 1
    );
}

#[test]
fn test_explicit_target_skipped_once_ghost_leaves() {
    let mut h = Harness::new(NetcodeConfig::default());
    let c = h.connect();
    let owner = h.clients[c].handle.id();
    let avatar = h.server.spawn(h.types.avatar, 1, Some(owner)).unwrap();
    h.client_mut(c)
        .commands_mut()
        .set_target(CommandTarget::Explicit(avatar.ghost));

    for tick in 1..=5 {
        h.step(tick, |_, t| Some(command_for(t)));
    }
    assert_eq!(h.server.command_at(avatar.ghost_id(), 5).unwrap().command, command_for(5));

    let tick = hide_from_owner(&mut h, c, avatar, 6);
    let rejected = h.server.connection(owner).unwrap().stats().commands_rejected;
    for t in tick..tick + 5 {
        h.step(t, |_, t| Some(command_for(t)));
    }

    assert_eq!(h.server.connection(owner).unwrap().stats().commands_rejected, rejected);
    assert!(h.server.command_at(avatar.ghost_id(), tick + 4).is_none());
}

#[test]
fn test_redundancy_covers_lost_packets() {
    let mut h = Harness::new(NetcodeConfig::default());
    let c = h.connect();
    let owner = h.clients[c].handle.id();
    let avatar = h.server.spawn(h.types.avatar, 1, Some(owner)).unwrap();
    let tick = h.idle(1, 3);

    let mut sender = CommandSender::<MoveCommand>::new(6, 4, 1200);
    sender.set_enabled(true);
    let mut last = Vec::new();
    for t in tick..tick + 6 {
        sender.record(t, command_for(t));
        last = sender
            .build_packet(t, h.client(c).acks(), &[avatar.ghost])
            .unwrap();
    }
    // Only the final packet arrives
    h.server.receive_packet(owner, &last).unwrap();

    let newest = tick + 5;
    for t in newest - 3..=newest {
        let entry = h.server.command_at(avatar.ghost_id(), t).unwrap();
        assert_eq!(entry.tick, t);
        assert_eq!(entry.command, command_for(t));
    }
    // Older ticks fall back to nothing: nothing before the window arrived
    assert!(h.server.command_at(avatar.ghost_id(), newest - 4).is_none());
    // Newer ticks fall back to the newest known command
    assert_eq!(h.server.command_at(avatar.ghost_id(), newest + 2).unwrap().tick, newest);
}

#[test]
fn test_partial_ticks_do_not_leak() {
    let mut h = Harness::new(NetcodeConfig::default());
    let a = h.connect();
    let b = h.connect();
    let avatar_a = h.server.spawn(h.types.avatar, 1, Some(h.clients[a].handle.id())).unwrap();
    let avatar_b = h.server.spawn(h.types.avatar, 1, Some(h.clients[b].handle.id())).unwrap();

    for tick in 1..=30 {
        h.step(tick, |_, t| Some(command_for(t)));
        if tick < 3 {
            continue;
        }
        assert_eq!(client_state(&h, a, avatar_a), Some(server_state(&h, avatar_a)));
        assert_eq!(client_state(&h, b, avatar_b), Some(server_state(&h, avatar_b)));
        assert_eq!(server_state(&h, avatar_a), server_state(&h, avatar_b));

        let before = client_state(&h, a, avatar_a).unwrap();
        for fraction in [0.25, 0.5, 0.75] {
            let test_client = &mut h.clients[a];
            test_client
                .client
                .update(tick + 1, TickKind::Partial { fraction }, &test_client.transport, &Walk)
                .unwrap();
            // Partial steps run from the backup, never on top of each other
            let command = command_for(tick);
            assert_eq!(
                client_state(&h, a, avatar_a),
                Some((before.0 + command.dx, before.1 + command.dy))
            );
        }
    }
}

#[test]
fn test_convergence_after_hostile_link() {
    converge(NetworkConditions::HOSTILE, 99);
}

fn converge(conditions: NetworkConditions, seed: u64) {
    let mut h = Harness::with_conditions(NetcodeConfig::default(), conditions, seed);
    let a = h.connect();
    let b = h.connect();
    let avatar = h.server.spawn(h.types.avatar, 1, Some(h.clients[a].handle.id())).unwrap();
    let crates: Vec<_> = (0..4)
        .map(|_| h.server.spawn(h.types.crate_, 1, None).unwrap())
        .collect();

    let lossy_ticks = 200;
    for tick in 1..=lossy_ticks {
        for (index, instance) in crates.iter().enumerate() {
            if (tick as usize + index) % 3 == 0 {
                let state = h.server.world_mut().state_mut(instance.ghost_id()).unwrap();
                state.set(0, FieldValue::Int(tick as i32 * (index as i32 + 1))).unwrap();
                state.set(1, FieldValue::UInt(tick ^ 0xABCD)).unwrap();
            }
        }
        h.step(tick, |index, t| (index == a).then(|| command_for(t)));
    }

    h.set_conditions(NetworkConditions::PERFECT);
    for tick in lossy_ticks + 1..=lossy_ticks + 40 {
        h.step(tick, |index, t| (index == a).then(|| command_for(t)));
    }

    assert_eq!(client_state(&h, a, avatar), Some(server_state(&h, avatar)));
    for index in [a, b] {
        for instance in &crates {
            let server_ghost = h.server.world().get(instance.ghost_id()).unwrap();
            let client_ghost = h.client(index).ghost_by_ref(instance.ghost).unwrap();
            assert_eq!(client_ghost.state(), server_ghost.state());
        }
        for server_ghost in h.server.world().iter() {
            let client_ghost = h.client(index).ghost_by_ref(server_ghost.ghost_ref()).unwrap();
            for entry in client_ghost.history().iter() {
                if let Some(server_entry) = server_ghost.history().at_tick(entry.tick) {
                    assert_eq!(entry.units, server_entry.units);
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_clients_converge_under_loss(seed in any::<u64>(), loss in 0u8..35, duplicate in 0u8..10) {
        converge(
            NetworkConditions {
                packet_loss_percent: loss,
                duplicate_percent: duplicate,
            },
            seed,
        );
    }
}
