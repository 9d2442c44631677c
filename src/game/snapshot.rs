//! Snapshot building
//!
//! The shared part of a snapshot is built once per send and wrapped in an
//! `Arc`; each session only adds its own challenge and loadout.

use std::sync::Arc;

use crate::ws::protocol::{to_wire_y, BulletView, MineView, ServerMsg, TankView, WorldView};

use super::session::Session;
use super::world::World;

/// Decides which ticks send a snapshot
#[derive(Debug)]
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Public view of the world; only live tanks are listed
    pub fn build_view(world: &World, now: u64) -> Arc<WorldView> {
        let tanks = world
            .sessions
            .values()
            .filter(|s| s.alive)
            .map(|s| {
                (
                    s.id,
                    TankView {
                        base: s.base,
                        cannon: s.cannon,
                        name: s.name.clone(),
                        x: s.x,
                        y: to_wire_y(s.y),
                        direction: s.direction,
                        team: s.team,
                    },
                )
            })
            .collect();

        let bullets = world
            .bullets
            .values()
            .map(|b| {
                (
                    b.id,
                    BulletView {
                        rot: b.rot,
                        x: b.x,
                        y: to_wire_y(b.y),
                    },
                )
            })
            .collect();

        let mines = world
            .mines
            .values()
            .map(|m| {
                (
                    m.id,
                    MineView {
                        team: m.team,
                        ticking: m.is_armed(),
                        x: m.x,
                        y: to_wire_y(m.y),
                    },
                )
            })
            .collect();

        Arc::new(WorldView {
            tanks,
            bullets,
            mines,
            scores: world.scores,
            since_start: now.saturating_sub(world.round.started_at()),
        })
    }

    /// Wrap the shared view for one session
    pub fn personalize(session: &Session, view: &Arc<WorldView>) -> ServerMsg {
        ServerMsg::Snapshot {
            challenge: session.challenge,
            clip: session.ammo,
            explosives: session.mines,
            world: Arc::clone(view),
        }
    }
}

impl World {
    /// Queue a snapshot for every session if one is due
    pub(super) fn emit_snapshots(&mut self, now: u64) {
        if !self.snapshots.should_send() || self.sessions.is_empty() {
            return;
        }

        let view = SnapshotBuilder::build_view(self, now);
        let personalized: Vec<_> = self
            .sessions
            .values()
            .map(|s| (s.id, SnapshotBuilder::personalize(s, &view)))
            .collect();
        for (id, msg) in personalized {
            self.send_to(id, msg);
        }
    }
}
