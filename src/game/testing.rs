//! Fixtures shared by the simulation tests

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use super::combat::{Bullet, EntityId, Mine};
use super::grid::TileGrid;
use super::round::RoundConfig;
use super::session::SessionId;
use super::tuning::Tunables;
use super::world::{ArenaMap, MapRotation, World};

pub fn arena(name: &str, text: &str) -> ArenaMap {
    ArenaMap {
        name: name.to_string(),
        grid: Arc::new(TileGrid::parse(text).unwrap()),
        tunables: Tunables::default(),
    }
}

/// World on a single map, clock at zero
pub fn world_from(text: &str) -> World {
    let rotation = MapRotation::new(vec![arena("test", text)]).unwrap();
    World::new(
        rotation,
        RoundConfig::default(),
        1,
        ChaCha8Rng::seed_from_u64(7),
        0,
    )
}

/// Connect two sessions; the balancer puts them on opposite teams
pub fn sessions_by_team(world: &mut World) -> (SessionId, SessionId) {
    let red = Uuid::new_v4();
    let green = Uuid::new_v4();
    world.connect(red, 0);
    world.connect(green, 0);
    (red, green)
}

/// Place a live tank with a full loadout
pub fn spawn_tank(world: &mut World, id: SessionId, x: f64, y: f64) {
    let (ammo, mines) = (world.tunables.max_ammo, world.tunables.max_mines);
    let tank = world.sessions.get_mut(&id).unwrap();
    tank.alive = true;
    tank.x = x;
    tank.y = y;
    tank.ammo = ammo;
    tank.mines = mines;
}

pub fn bullet_at(
    world: &mut World,
    owner: SessionId,
    x: f64,
    y: f64,
    rot: f64,
    created_at: u64,
) -> EntityId {
    let team = world.team_of(owner).unwrap();
    let id = world.next_entity_id();
    world.bullets.insert(
        id,
        Bullet {
            id,
            owner,
            team,
            x,
            y,
            rot,
            created_at,
            ricochet_available: true,
        },
    );
    id
}

/// Unarmed mine laid by `owner`
pub fn mine_at(world: &mut World, owner: SessionId, x: f64, y: f64, placed_at: u64) -> EntityId {
    let team = world.team_of(owner).unwrap();
    let id = world.next_entity_id();
    world.mines.insert(
        id,
        Mine {
            id,
            owner,
            owner_team: team,
            team,
            x,
            y,
            placed_at,
            armed_at: None,
        },
    );
    id
}
