//! Physics and combat constants
//!
//! Several of these differ between map versions (ricochet probe distance,
//! annihilation radius), so every value is read from configuration and can be
//! overridden per map.

use serde::Deserialize;

/// Tunable simulation constants for one map
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Side length of a tank footprint
    pub tank_size: f64,
    /// Max accepted displacement per axis between two position updates
    pub max_move_delta: f64,
    /// Distance a bullet travels per tick
    pub bullet_step: f64,
    /// Look-ahead distance of the wall probes
    pub ricochet_probe: f64,
    /// Half side length of a bullet wall probe
    pub bullet_probe_half_extent: f64,
    pub bullet_lifetime_ms: u64,
    /// Two bullets closer than this destroy each other
    pub annihilation_radius: f64,
    pub bullet_hit_radius: f64,
    /// A bullet closer than this to a mine sets it off
    pub mine_trigger_radius: f64,
    pub mine_arm_delay_ms: u64,
    pub mine_fuse_ms: u64,
    /// Enemy tanks closer than this arm an idle mine
    pub mine_proximity_radius: f64,
    pub blast_radius: f64,
    pub regen_delay_ms: u64,
    /// Destroyed tiles only come back with no tank this close
    pub regen_clear_radius: f64,
    /// Holes only block footprints whose origin is this close
    pub hole_radius: f64,
    pub max_ammo: u32,
    pub max_mines: u32,
    pub max_name_len: usize,
    pub session_timeout_ms: u64,
    /// Send authoritative position corrections on rejected moves
    pub position_corrections: bool,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            tank_size: 0.95,
            max_move_delta: 3.0,
            bullet_step: 0.0625,
            ricochet_probe: 0.0625,
            bullet_probe_half_extent: 0.01,
            bullet_lifetime_ms: 10_000,
            annihilation_radius: 0.2,
            bullet_hit_radius: 0.5,
            mine_trigger_radius: 0.6,
            mine_arm_delay_ms: 7_000,
            mine_fuse_ms: 2_000,
            mine_proximity_radius: 3.0,
            blast_radius: 1.5,
            regen_delay_ms: 20_000,
            regen_clear_radius: 3.0,
            hole_radius: 0.975,
            max_ammo: 7,
            max_mines: 2,
            max_name_len: 32,
            session_timeout_ms: 2_000,
            position_corrections: true,
        }
    }
}
