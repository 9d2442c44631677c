//! Tank movement validation and bullet motion
//!
//! Both go through `Terrain::collision_class`, so tanks and bullets agree on
//! what is solid.

use std::f64::consts::PI;

use super::combat::Bullet;
use super::grid::{CollisionClass, Footprint, Terrain};
use super::session::Team;
use super::tuning::Tunables;

/// Outcome of checking a client-reported position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveVerdict {
    Accepted,
    /// Destination overlaps something the tank may not enter
    Blocked(CollisionClass),
    /// Jump larger than the per-update bound
    TooFar,
}

/// Physics rules shared by the simulation
pub struct PhysicsSystem;

impl PhysicsSystem {
    pub fn tank_footprint(x: f64, y: f64, tunables: &Tunables) -> Footprint {
        Footprint::square(x, y, tunables.tank_size)
    }

    /// Check a move from the last accepted position to a reported one
    pub fn validate_move(
        terrain: &Terrain,
        team: Team,
        from: (f64, f64),
        to: (f64, f64),
        tunables: &Tunables,
    ) -> MoveVerdict {
        if !to.0.is_finite() || !to.1.is_finite() {
            return MoveVerdict::TooFar;
        }

        let footprint = Self::tank_footprint(to.0, to.1, tunables);
        let class = terrain.collision_class(&footprint, Some(team));
        if class.blocks_tank() {
            return MoveVerdict::Blocked(class);
        }

        let max = tunables.max_move_delta;
        if (to.0 - from.0).abs() > max || (to.1 - from.1).abs() > max {
            return MoveVerdict::TooFar;
        }

        MoveVerdict::Accepted
    }

    /// Advance a bullet one step, bouncing off walls.
    ///
    /// Each axis is probed on its own from the cell centre; a blocked axis has
    /// its heading component mirrored before the step is taken. Returns whether
    /// the bullet reflected.
    pub fn advance_bullet(terrain: &Terrain, bullet: &mut Bullet, tunables: &Tunables) -> bool {
        let mut dx = bullet.rot.cos();
        let mut dy = bullet.rot.sin();
        let cx = bullet.x + 0.5;
        let cy = bullet.y + 0.5;
        let half = tunables.bullet_probe_half_extent;
        let probe = tunables.ricochet_probe;
        let mut reflected = false;

        let ahead_x = Footprint::centered(cx + dx * probe, cy, half);
        if terrain.collision_class(&ahead_x, None).blocks_bullet() {
            bullet.rot = PI - bullet.rot;
            dx = -dx;
            reflected = true;
        }

        let ahead_y = Footprint::centered(cx, cy + dy * probe, half);
        if terrain.collision_class(&ahead_y, None).blocks_bullet() {
            bullet.rot = -bullet.rot;
            dy = -dy;
            reflected = true;
        }

        bullet.x += dx * tunables.bullet_step;
        bullet.y += dy * tunables.bullet_step;
        reflected
    }
}
