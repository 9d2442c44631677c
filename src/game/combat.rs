//! Combat resolution - bullets, mines, destructible terrain

use tracing::debug;

use crate::ws::protocol::{KillMethod, ServerMsg};

use super::physics::PhysicsSystem;
use super::session::{SessionId, Team};
use super::world::World;

/// Id of a bullet or mine, unique for the process lifetime
pub type EntityId = u64;

/// Bullet in flight
#[derive(Debug, Clone)]
pub struct Bullet {
    pub id: EntityId,
    pub owner: SessionId,
    pub team: Team,
    pub x: f64,
    pub y: f64,
    /// Heading in radians
    pub rot: f64,
    pub created_at: u64,
    /// Cleared by the first wall bounce
    pub ricochet_available: bool,
}

impl Bullet {
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Mine on the ground
#[derive(Debug, Clone)]
pub struct Mine {
    pub id: EntityId,
    /// Credited with kills; a bullet that sets the mine off takes it over
    pub owner: SessionId,
    pub owner_team: Team,
    /// Team that laid it
    pub team: Team,
    pub x: f64,
    pub y: f64,
    pub placed_at: u64,
    /// Set once the fuse is burning
    pub armed_at: Option<u64>,
}

impl Mine {
    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Per-tick combat pipeline
pub struct CombatSystem;

impl CombatSystem {
    /// Run every stage once, in order
    pub fn run(world: &mut World, now: u64) {
        Self::expire_bullets(world, now);
        Self::annihilate_bullets(world);
        Self::resolve_bullet_hits(world);
        Self::move_bullets(world);
        Self::update_mines(world, now);
        Self::regenerate_tiles(world, now);
    }

    /// Bullets past their lifetime are removed
    fn expire_bullets(world: &mut World, now: u64) {
        let lifetime = world.tunables.bullet_lifetime_ms;
        let expired: Vec<EntityId> = world
            .bullets
            .values()
            .filter(|b| b.age(now) >= lifetime)
            .map(|b| b.id)
            .collect();

        for id in expired {
            world.destroy_bullet(id);
        }
    }

    /// Bullets that meet destroy each other; each bullet pairs at most once
    fn annihilate_bullets(world: &mut World) {
        let radius = world.tunables.annihilation_radius;
        let ids: Vec<EntityId> = world.bullets.keys().copied().collect();

        for id in ids {
            let Some(bullet) = world.bullets.get(&id) else {
                continue;
            };
            let partner = world
                .bullets
                .values()
                .find(|other| other.id != id && other.distance_to(bullet.x, bullet.y) < radius)
                .map(|other| other.id);

            if let Some(other) = partner {
                debug!(bullet = id, other, "Bullets collided");
                world.destroy_bullet(id);
                world.destroy_bullet(other);
            }
        }
    }

    /// Bullets that reach a tank kill it.
    ///
    /// A bullet cannot hurt its own firer until it has bounced. Friendly
    /// bullets are absorbed without a kill.
    fn resolve_bullet_hits(world: &mut World) {
        let radius = world.tunables.bullet_hit_radius;
        let ids: Vec<EntityId> = world.bullets.keys().copied().collect();

        for id in ids {
            let Some(bullet) = world.bullets.get(&id) else {
                continue;
            };
            let target = world
                .sessions
                .values()
                .filter(|tank| tank.alive && tank.distance_to(bullet.x, bullet.y) < radius)
                .find(|tank| !(tank.id == bullet.owner && bullet.ricochet_available))
                .map(|tank| (tank.id, tank.team));

            let Some((victim, victim_team)) = target else {
                continue;
            };
            let owner = bullet.owner;
            if bullet.team != victim_team || owner == victim {
                let method = if bullet.ricochet_available {
                    KillMethod::Bullet
                } else {
                    KillMethod::Ricochet
                };
                let killer_team = world.team_of(owner).unwrap_or(bullet.team);
                world.kill_tank(victim, owner, method, killer_team);
            }
            world.destroy_bullet(id);
        }
    }

    /// Step bullets forward; a second bounce destroys the bullet
    fn move_bullets(world: &mut World) {
        let ids: Vec<EntityId> = world.bullets.keys().copied().collect();

        for id in ids {
            let Some(bullet) = world.bullets.get_mut(&id) else {
                continue;
            };
            if !PhysicsSystem::advance_bullet(&world.terrain, bullet, &world.tunables) {
                continue;
            }

            if bullet.ricochet_available {
                bullet.ricochet_available = false;
                let msg = ServerMsg::ricochet_at(bullet.x, bullet.y);
                world.broadcast(msg);
            } else {
                world.destroy_bullet(id);
            }
        }
    }

    /// Arm, trip and detonate mines
    fn update_mines(world: &mut World, now: u64) {
        let ids: Vec<EntityId> = world.mines.keys().copied().collect();
        let arm_delay = world.tunables.mine_arm_delay_ms;
        let fuse = world.tunables.mine_fuse_ms;
        let trigger = world.tunables.mine_trigger_radius;
        let proximity = world.tunables.mine_proximity_radius;

        for id in ids {
            let Some(mine) = world.mines.get(&id) else {
                continue;
            };
            let (mx, my, layer_team) = (mine.x, mine.y, mine.team);

            match mine.armed_at {
                Some(armed_at) if now.saturating_sub(armed_at) >= fuse => {
                    world.detonate_mine(id, now);
                    continue;
                }
                None if now.saturating_sub(mine.placed_at) >= arm_delay => {
                    Self::arm_mine(world, id, now);
                }
                _ => {}
            }

            let hit = world
                .bullets
                .values()
                .find(|b| b.distance_to(mx, my) < trigger)
                .map(|b| (b.id, b.owner, b.team));
            if let Some((bullet_id, shooter, shooter_team)) = hit {
                let shooter_team = world.team_of(shooter).unwrap_or(shooter_team);
                if let Some(mine) = world.mines.get_mut(&id) {
                    mine.owner = shooter;
                    mine.owner_team = shooter_team;
                }
                world.destroy_bullet(bullet_id);
                world.detonate_mine(id, now);
                continue;
            }

            if world.mines.get(&id).map_or(true, Mine::is_armed) {
                continue;
            }
            let tripped = world.sessions.values().any(|tank| {
                tank.alive && tank.team != layer_team && tank.distance_to(mx, my) < proximity
            });
            if tripped {
                debug!(mine = id, "Mine tripped by enemy tank");
                Self::arm_mine(world, id, now);
            }
        }
    }

    fn arm_mine(world: &mut World, id: EntityId, now: u64) {
        if let Some(mine) = world.mines.get_mut(&id) {
            mine.armed_at = Some(now);
        }
    }

    /// Bring destroyed tiles back once the cooldown passed and nobody is close
    fn regenerate_tiles(world: &mut World, now: u64) {
        let delay = world.tunables.regen_delay_ms;
        let clear = world.tunables.regen_clear_radius;
        let tanks: Vec<(f64, f64)> = world
            .sessions
            .values()
            .filter(|s| s.alive)
            .map(|s| (s.x, s.y))
            .collect();

        let mut restored = Vec::new();
        for tile in world.terrain.destructibles_mut() {
            if !tile.destroyed || now.saturating_sub(tile.destroyed_at) < delay {
                continue;
            }
            if tanks.iter().any(|&(x, y)| tile.distance_to(x, y) < clear) {
                continue;
            }
            tile.destroyed = false;
            restored.push((tile.x, tile.y));
        }

        for (x, y) in restored {
            world.broadcast(ServerMsg::TileChanged {
                x,
                y,
                destroyed: false,
            });
        }
    }
}
