//! Client intents applied to the world
//!
//! Everything here runs inside the game loop, so inbound messages are
//! serialized with the tick and the timeout sweep.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::ws::protocol::{ClientMsg, KillMethod, Pose, ServerMsg};

use super::combat::{Bullet, Mine};
use super::physics::{MoveVerdict, PhysicsSystem};
use super::session::{Session, SessionId};
use super::world::World;

impl World {
    /// Register a new connection and introduce it
    pub fn connect(&mut self, id: SessionId, now: u64) {
        let team = self.balancer.assign();
        let challenge = self.rng.gen();
        self.sessions.insert(id, Session::new(id, team, challenge, now));

        info!(session_id = %id, team = ?team, "Session connected");

        let msg = self.identify(id);
        self.send_to(id, msg);
    }

    /// Drop a session; peers see a disconnect kill
    pub fn disconnect(&mut self, id: SessionId) -> bool {
        let Some(session) = self.sessions.remove(&id) else {
            return false;
        };
        self.balancer.release(session.team);

        info!(session_id = %id, team = ?session.team, "Session disconnected");

        self.broadcast(ServerMsg::TankDestroyed {
            id,
            killer: id,
            method: KillMethod::Disconnect,
            killstreak: 0,
        });
        true
    }

    /// Disconnect every session that missed its update window
    pub fn sweep_timeouts(&mut self, now: u64) {
        let timeout = self.tunables.session_timeout_ms;
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.is_timed_out(now, timeout))
            .map(|s| s.id)
            .collect();

        for id in expired {
            info!(session_id = %id, "Session timed out");
            self.disconnect(id);
            self.mark_closed(id);
        }
    }

    pub fn handle_message(&mut self, id: SessionId, msg: ClientMsg, now: u64) {
        if !self.sessions.contains_key(&id) {
            return;
        }

        match msg {
            ClientMsg::Update { challenge, pose } => self.handle_update(id, challenge, pose, now),
            ClientMsg::Join { name } => self.handle_join(id, name),
            ClientMsg::Fire { rot } => self.handle_fire(id, rot, now),
            ClientMsg::LayMine => self.handle_lay_mine(id, now),
        }
    }

    fn handle_update(&mut self, id: SessionId, challenge: u32, pose: Option<Pose>, now: u64) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if !session.accept_challenge(challenge, &mut self.rng, now) {
            debug!(session_id = %id, "Stale challenge ignored");
            return;
        }
        let Some(pose) = pose else {
            return;
        };

        session.base = pose.base;
        session.cannon = pose.cannon;
        session.direction = pose.direction;
        if !session.alive {
            return;
        }

        let from = (session.x, session.y);
        let verdict = PhysicsSystem::validate_move(
            &self.terrain,
            session.team,
            from,
            (pose.x, pose.y),
            &self.tunables,
        );

        if verdict == MoveVerdict::Accepted {
            session.x = pose.x;
            session.y = pose.y;
            return;
        }

        debug!(session_id = %id, verdict = ?verdict, "Move rejected");
        if self.tunables.position_corrections {
            self.send_to(id, ServerMsg::correction_at(from.0, from.1));
        }
    }

    fn handle_join(&mut self, id: SessionId, name: String) {
        if !self.round.is_playing() || name.chars().count() > self.tunables.max_name_len {
            return;
        }
        let Some(team) = self
            .sessions
            .get(&id)
            .filter(|s| !s.alive)
            .map(|s| s.team)
        else {
            return;
        };
        let Some((x, y)) = self.terrain.next_spawn(team) else {
            warn!(session_id = %id, map = %self.map_name, team = ?team, "Map has no spawn for team");
            return;
        };

        let (ammo, mines) = (self.tunables.max_ammo, self.tunables.max_mines);
        if let Some(session) = self.sessions.get_mut(&id) {
            session.name = name;
            session.x = x;
            session.y = y;
            session.ammo = ammo;
            session.mines = mines;
            session.alive = true;
            info!(session_id = %id, name = %session.name, team = ?team, "Tank spawned");
        }

        let destroyed: Vec<(usize, usize)> = self
            .terrain
            .destructibles()
            .iter()
            .filter(|d| d.destroyed)
            .map(|d| (d.x, d.y))
            .collect();
        for (x, y) in destroyed {
            self.send_to(
                id,
                ServerMsg::TileChanged {
                    x,
                    y,
                    destroyed: true,
                },
            );
        }
    }

    fn handle_fire(&mut self, id: SessionId, rot: f64, now: u64) {
        let Some(session) = self.sessions.get_mut(&id).filter(|s| s.alive) else {
            return;
        };
        let x = session.x + rot.cos();
        let y = session.y + rot.sin();

        if session.ammo == 0 {
            self.broadcast(ServerMsg::fire_result_at(false, x, y));
            return;
        }
        session.ammo -= 1;
        let team = session.team;

        let bullet_id = self.next_entity_id();
        self.bullets.insert(
            bullet_id,
            Bullet {
                id: bullet_id,
                owner: id,
                team,
                x,
                y,
                rot,
                created_at: now,
                ricochet_available: true,
            },
        );
        self.broadcast(ServerMsg::fire_result_at(true, x, y));
    }

    fn handle_lay_mine(&mut self, id: SessionId, now: u64) {
        let Some(session) = self
            .sessions
            .get_mut(&id)
            .filter(|s| s.alive && s.mines > 0)
        else {
            return;
        };
        session.mines -= 1;
        let (x, y, team) = (session.x, session.y, session.team);

        let mine_id = self.next_entity_id();
        self.mines.insert(
            mine_id,
            Mine {
                id: mine_id,
                owner: id,
                owner_team: team,
                team,
                x,
                y,
                placed_at: now,
                armed_at: None,
            },
        );
        debug!(session_id = %id, mine = mine_id, "Mine laid");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::session::{Direction, Team};
    use crate::game::testing::{sessions_by_team, spawn_tank, world_from};
    use crate::game::world::Recipient;
    use assert_approx_eq::assert_approx_eq;
    use uuid::Uuid;

    fn pose(x: f64, y: f64) -> Pose {
        Pose {
            x,
            y,
            base: 1.0,
            cannon: 2.0,
            direction: Direction { x: 1.0, y: 0.0 },
        }
    }

    fn update(world: &mut World, id: SessionId, pose: Option<Pose>, now: u64) {
        let challenge = world.sessions[&id].challenge;
        world.handle_message(id, ClientMsg::Update { challenge, pose }, now);
    }

    #[test]
    fn connect_assigns_team_and_identifies() {
        let mut world = world_from("4,0,5");
        let id = Uuid::new_v4();

        world.connect(id, 10);

        assert_eq!(world.sessions[&id].team, Team::Red);
        let out = world.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, Recipient::Session(id));
        assert!(matches!(
            &out[0].msg,
            ServerMsg::Identify { id: sent, map, round_start: 0 } if *sent == id && map == "test"
        ));
    }

    #[test]
    fn disconnect_releases_team_and_broadcasts() {
        let mut world = world_from("4,0,5");
        let (red, _) = sessions_by_team(&mut world);
        world.drain_outgoing();

        assert!(world.disconnect(red));
        assert!(!world.disconnect(red));

        let out = world.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0].msg,
            ServerMsg::TankDestroyed { id, killer, method: KillMethod::Disconnect, killstreak: 0 }
                if id == red && killer == red
        ));
        // The freed red slot is reused
        let next = Uuid::new_v4();
        world.connect(next, 0);
        assert_eq!(world.sessions[&next].team, Team::Red);
    }

    #[test]
    fn silent_sessions_are_swept() {
        let mut world = world_from("4,0,5");
        let (red, green) = sessions_by_team(&mut world);
        update(&mut world, green, None, 1_500);

        world.sweep_timeouts(2_000);
        assert_eq!(world.session_count(), 2);

        world.sweep_timeouts(2_001);
        assert!(!world.sessions.contains_key(&red));
        assert!(world.sessions.contains_key(&green));
        assert_eq!(world.drain_closed(), vec![red]);
    }

    #[test]
    fn keepalive_rotates_challenge_only() {
        let mut world = world_from("4,0,5");
        let (red, _) = sessions_by_team(&mut world);
        spawn_tank(&mut world, red, 1.0, 1.0);
        let before = world.sessions[&red].challenge;

        update(&mut world, red, None, 500);

        let tank = &world.sessions[&red];
        assert_ne!(tank.challenge, before);
        assert_eq!(tank.last_seen, 500);
        assert_eq!((tank.x, tank.y, tank.base), (1.0, 1.0, 0.0));
    }

    #[test]
    fn stale_challenge_changes_nothing() {
        let mut world = world_from("4,0,0,5");
        let (red, _) = sessions_by_team(&mut world);
        spawn_tank(&mut world, red, 1.0, 1.0);
        world.drain_outgoing();
        let stale = world.sessions[&red].challenge.wrapping_add(1);

        world.handle_message(
            red,
            ClientMsg::Update {
                challenge: stale,
                pose: Some(pose(2.0, 1.0)),
            },
            100,
        );

        let tank = &world.sessions[&red];
        assert_eq!((tank.x, tank.y, tank.base, tank.cannon), (1.0, 1.0, 0.0, 0.0));
        assert_eq!(tank.last_seen, 0);
        assert!(world.drain_outgoing().is_empty());
    }

    #[test]
    fn accepted_move_lands_on_clear_ground() {
        let mut world = world_from("4,0,0,5");
        let (red, _) = sessions_by_team(&mut world);
        spawn_tank(&mut world, red, 1.0, 1.0);

        update(&mut world, red, Some(pose(2.5, 1.0)), 100);

        let tank = &world.sessions[&red];
        assert_eq!((tank.x, tank.y), (2.5, 1.0));
        assert_eq!((tank.base, tank.cannon), (1.0, 2.0));
        let footprint = PhysicsSystem::tank_footprint(tank.x, tank.y, &world.tunables);
        assert!(!world
            .terrain
            .collision_class(&footprint, Some(Team::Red))
            .blocks_tank());
    }

    #[test]
    fn blocked_move_keeps_position_and_sends_correction() {
        let mut world = world_from("4,2,0,5");
        let (red, _) = sessions_by_team(&mut world);
        spawn_tank(&mut world, red, 1.0, 1.0);
        world.drain_outgoing();

        update(&mut world, red, Some(pose(1.5, 1.0)), 100);

        let tank = &world.sessions[&red];
        assert_eq!((tank.x, tank.y), (1.0, 1.0));
        // Orientation still applies
        assert_eq!(tank.base, 1.0);
        let out = world.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].msg, ServerMsg::Correction { x, y } if x == 1.0 && y == -1.0));
    }

    #[test]
    fn correction_can_be_switched_off() {
        let mut world = world_from("4,0,0,0,0,0,5");
        world.tunables.position_corrections = false;
        let (red, _) = sessions_by_team(&mut world);
        spawn_tank(&mut world, red, 1.0, 1.0);
        world.drain_outgoing();

        update(&mut world, red, Some(pose(5.0, 1.0)), 100);

        assert_eq!(world.sessions[&red].x, 1.0);
        assert!(world.drain_outgoing().is_empty());
    }

    #[test]
    fn join_spawns_round_robin_and_replays_tiles() {
        let mut world = world_from("4,1,0,5\n4,0,0,5");
        let (red, _) = sessions_by_team(&mut world);
        world.terrain.destructibles_mut()[0].destroyed = true;
        world.drain_outgoing();

        world.handle_message(red, ClientMsg::Join { name: "ace".into() }, 0);

        let tank = &world.sessions[&red];
        assert!(tank.alive);
        assert_eq!(tank.name, "ace");
        assert_eq!((tank.x, tank.y), (1.0, 2.0));
        assert_eq!((tank.ammo, tank.mines), (7, 2));
        let out = world.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, Recipient::Session(red));
        assert!(matches!(
            out[0].msg,
            ServerMsg::TileChanged { x: 2, y: 1, destroyed: true }
        ));
    }

    #[test]
    fn invalid_joins_are_ignored() {
        let mut world = world_from("4,0,5");
        let (red, _) = sessions_by_team(&mut world);

        let long = "x".repeat(33);
        world.handle_message(red, ClientMsg::Join { name: long }, 0);
        assert!(!world.sessions[&red].alive);

        world.round.begin_ending();
        world.handle_message(red, ClientMsg::Join { name: "ok".into() }, 0);
        assert!(!world.sessions[&red].alive);
    }

    #[test]
    fn fire_spawns_bullet_one_unit_ahead() {
        let mut world = world_from("4,0,0,0,5");
        let (red, _) = sessions_by_team(&mut world);
        spawn_tank(&mut world, red, 1.0, 1.0);
        world.drain_outgoing();

        world.handle_message(red, ClientMsg::Fire { rot: 0.0 }, 40);

        assert_eq!(world.sessions[&red].ammo, 6);
        let bullet = world.bullets.values().next().unwrap();
        assert_approx_eq!(bullet.x, 2.0);
        assert_approx_eq!(bullet.y, 1.0);
        assert_eq!(bullet.created_at, 40);
        assert!(bullet.ricochet_available);
        let out = world.drain_outgoing();
        assert_eq!(out[0].to, Recipient::All);
        assert!(matches!(out[0].msg, ServerMsg::FireResult { success: true, .. }));
    }

    #[test]
    fn empty_clip_reports_failure() {
        let mut world = world_from("4,0,0,0,5");
        let (red, _) = sessions_by_team(&mut world);
        spawn_tank(&mut world, red, 1.0, 1.0);
        world.sessions.get_mut(&red).unwrap().ammo = 0;
        world.drain_outgoing();

        world.handle_message(red, ClientMsg::Fire { rot: 0.0 }, 40);

        assert!(world.bullets.is_empty());
        assert!(matches!(
            world.drain_outgoing()[0].msg,
            ServerMsg::FireResult { success: false, .. }
        ));
    }

    #[test]
    fn dead_tanks_cannot_act() {
        let mut world = world_from("4,0,0,0,5");
        let (red, _) = sessions_by_team(&mut world);
        world.drain_outgoing();

        world.handle_message(red, ClientMsg::Fire { rot: 0.0 }, 0);
        world.handle_message(red, ClientMsg::LayMine, 0);

        assert!(world.bullets.is_empty());
        assert!(world.mines.is_empty());
        assert!(world.drain_outgoing().is_empty());
    }

    #[test]
    fn mines_are_limited_by_slots() {
        let mut world = world_from("4,0,0,0,5");
        let (red, _) = sessions_by_team(&mut world);
        spawn_tank(&mut world, red, 2.0, 1.0);

        for _ in 0..3 {
            world.handle_message(red, ClientMsg::LayMine, 0);
        }

        assert_eq!(world.mines.len(), 2);
        assert_eq!(world.sessions[&red].mines, 0);
        let mine = world.mines.values().next().unwrap();
        assert_eq!((mine.x, mine.y, mine.team), (2.0, 1.0, Team::Red));
        assert!(!mine.is_armed());
    }

    #[test]
    fn unknown_session_messages_are_dropped() {
        let mut world = world_from("4,0,5");
        world.handle_message(Uuid::new_v4(), ClientMsg::LayMine, 0);
        assert!(world.drain_outgoing().is_empty());
        assert!(world.mines.is_empty());
    }
}
