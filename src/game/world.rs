//! Authoritative simulation state
//!
//! `World` owns every registry the simulation touches. Pipeline steps take it
//! by `&mut` and queue their outbound messages instead of writing to sockets;
//! the game loop drains the queue and fans it out after each step.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::config::MapEntry;
use crate::ws::protocol::{KillMethod, Scores, ServerMsg};

use super::combat::{Bullet, EntityId, Mine};
use super::grid::{MapError, Terrain, TileGrid};
use super::round::{RoundConfig, RoundController};
use super::session::{Session, SessionId, Team, TeamBalancer};
use super::snapshot::SnapshotBuilder;
use super::tuning::Tunables;

/// Who an outbound message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Session(SessionId),
}

/// Message queued by the simulation for delivery
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub to: Recipient,
    pub msg: ServerMsg,
}

/// One playable map
#[derive(Debug, Clone)]
pub struct ArenaMap {
    /// Identifier announced to clients
    pub name: String,
    pub grid: Arc<TileGrid>,
    pub tunables: Tunables,
}

/// Non-empty, ordered list of maps
#[derive(Debug, Clone)]
pub struct MapRotation {
    maps: Vec<ArenaMap>,
}

impl MapRotation {
    pub fn new(maps: Vec<ArenaMap>) -> Option<Self> {
        if maps.is_empty() {
            None
        } else {
            Some(Self { maps })
        }
    }

    /// Load every map file of the rotation
    pub fn load(entries: &[MapEntry], defaults: &Tunables) -> Result<Self, MapError> {
        let maps = entries
            .iter()
            .map(|entry| {
                let grid = TileGrid::load(&entry.file)?;
                info!(
                    map = %entry.name,
                    width = grid.width(),
                    height = grid.height(),
                    "Map loaded"
                );
                Ok(ArenaMap {
                    name: entry.name.clone(),
                    grid: Arc::new(grid),
                    tunables: entry.tunables.clone().unwrap_or_else(|| defaults.clone()),
                })
            })
            .collect::<Result<Vec<_>, MapError>>()?;

        Self::new(maps).ok_or(MapError::Empty)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn get(&self, index: usize) -> &ArenaMap {
        &self.maps[index % self.maps.len()]
    }
}

/// The whole simulation
pub struct World {
    pub rotation: MapRotation,
    /// Name of the map being played
    pub map_name: String,
    pub terrain: Terrain,
    pub tunables: Tunables,

    pub sessions: BTreeMap<SessionId, Session>,
    pub bullets: BTreeMap<EntityId, Bullet>,
    pub mines: BTreeMap<EntityId, Mine>,

    pub scores: Scores,
    pub round: RoundController,
    pub(super) snapshots: SnapshotBuilder,

    pub(super) balancer: TeamBalancer,
    pub(super) rng: ChaCha8Rng,
    next_entity: EntityId,
    outbox: Vec<Outgoing>,
    closed: Vec<SessionId>,
}

impl World {
    pub fn new(
        rotation: MapRotation,
        round: RoundConfig,
        snapshot_interval: u32,
        rng: ChaCha8Rng,
        now: u64,
    ) -> Self {
        let map = rotation.get(0).clone();
        Self {
            rotation,
            map_name: map.name,
            terrain: Terrain::new(map.grid, map.tunables.hole_radius),
            tunables: map.tunables,
            sessions: BTreeMap::new(),
            bullets: BTreeMap::new(),
            mines: BTreeMap::new(),
            scores: Scores::default(),
            round: RoundController::new(round, now),
            snapshots: SnapshotBuilder::new(snapshot_interval),
            balancer: TeamBalancer::default(),
            rng,
            next_entity: 1,
            outbox: Vec::new(),
            closed: Vec::new(),
        }
    }

    /// Run one simulation step: combat, round transitions, snapshots
    pub fn tick(&mut self, now: u64) {
        if self.round.is_playing() {
            super::combat::CombatSystem::run(self, now);
        }
        self.update_round(now);
        self.emit_snapshots(now);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn broadcast(&mut self, msg: ServerMsg) {
        self.outbox.push(Outgoing {
            to: Recipient::All,
            msg,
        });
    }

    pub fn send_to(&mut self, id: SessionId, msg: ServerMsg) {
        self.outbox.push(Outgoing {
            to: Recipient::Session(id),
            msg,
        });
    }

    /// Take everything queued since the last drain
    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Sessions whose connections must be closed
    pub fn drain_closed(&mut self) -> Vec<SessionId> {
        std::mem::take(&mut self.closed)
    }

    pub(super) fn mark_closed(&mut self, id: SessionId) {
        self.closed.push(id);
    }

    pub(super) fn next_entity_id(&mut self) -> EntityId {
        let id = self.next_entity;
        self.next_entity += 1;
        id
    }

    pub fn identify(&self, id: SessionId) -> ServerMsg {
        ServerMsg::Identify {
            id,
            map: self.map_name.clone(),
            round_start: self.round.started_at(),
        }
    }

    /// Team of a connected session
    pub fn team_of(&self, id: SessionId) -> Option<Team> {
        self.sessions.get(&id).map(|s| s.team)
    }

    /// Remove a bullet, refunding its owner's clip
    pub fn destroy_bullet(&mut self, id: EntityId) -> bool {
        let Some(bullet) = self.bullets.remove(&id) else {
            return false;
        };
        let cap = self.tunables.max_ammo;
        if let Some(owner) = self.sessions.get_mut(&bullet.owner) {
            owner.refund_ammo(cap);
        }
        self.broadcast(ServerMsg::BulletDestroyed { id });
        true
    }

    /// Remove a mine without a blast, refunding its owner
    pub fn remove_mine(&mut self, id: EntityId) -> Option<Mine> {
        let mine = self.mines.remove(&id)?;
        let cap = self.tunables.max_mines;
        if let Some(owner) = self.sessions.get_mut(&mine.owner) {
            owner.refund_mine(cap);
        }
        self.broadcast(ServerMsg::MineDestroyed { id });
        Some(mine)
    }

    /// Blow up a mine: kill tanks and break destructibles inside the blast
    pub fn detonate_mine(&mut self, id: EntityId, now: u64) {
        let Some(mine) = self.remove_mine(id) else {
            return;
        };
        let radius = self.tunables.blast_radius;

        let victims: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.alive && mine.distance_to(s.x, s.y) < radius)
            .map(|s| s.id)
            .collect();
        let killer_team = self.team_of(mine.owner).unwrap_or(mine.owner_team);
        for victim in victims {
            self.kill_tank(victim, mine.owner, KillMethod::Mine, killer_team);
        }

        let mut broken = Vec::new();
        for tile in self.terrain.destructibles_mut() {
            if !tile.destroyed && tile.distance_to(mine.x, mine.y) < radius {
                tile.destroyed = true;
                tile.destroyed_at = now;
                broken.push((tile.x, tile.y));
            }
        }
        for (x, y) in broken {
            self.broadcast(ServerMsg::TileChanged {
                x,
                y,
                destroyed: true,
            });
        }
    }

    /// Apply a kill and the killstreak/score rules.
    ///
    /// Self-eliminations and team kills never score.
    pub fn kill_tank(
        &mut self,
        victim_id: SessionId,
        killer_id: SessionId,
        method: KillMethod,
        killer_team: Team,
    ) {
        let Some(victim) = self.sessions.get_mut(&victim_id) else {
            return;
        };
        if !victim.alive {
            return;
        }
        victim.alive = false;
        victim.killstreak = 0;
        let victim_team = victim.team;

        let killstreak = if killer_id == victim_id {
            0
        } else {
            let streak = match self.sessions.get_mut(&killer_id) {
                Some(killer) => {
                    killer.killstreak += 1;
                    killer.killstreak
                }
                None => 1,
            };
            if killer_team != victim_team {
                self.scores.credit(killer_team);
            }
            streak
        };

        info!(
            victim = %victim_id,
            killer = %killer_id,
            method = ?method,
            killstreak,
            "Tank destroyed"
        );

        self.broadcast(ServerMsg::TankDestroyed {
            id: victim_id,
            killer: killer_id,
            method,
            killstreak,
        });
    }
}
