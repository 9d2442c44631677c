//! Tile grid, destructible terrain and collision queries
//!
//! Coordinates are grid space: `x` is the column and `y` the row, both counted
//! from the top-left border cell. The loader wraps every map in a one cell
//! wall ring, and lookups outside the stored grid also answer wall, so no
//! query can index out of range.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::session::Team;

/// Grid cell as (column, row)
pub type Cell = (usize, usize);

/// Tile class as stored in map files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Ground,
    Destructible,
    Wall,
    Hole,
    RedSpawn,
    GreenSpawn,
    /// Only red tanks may pass
    RedBarrier,
    /// Only green tanks may pass
    GreenBarrier,
    HeavySnow,
}

impl Tile {
    /// Map a file id to a tile; unknown and negative ids are ground
    pub fn from_id(id: i64) -> Self {
        match id {
            1 => Self::Destructible,
            2 => Self::Wall,
            3 => Self::Hole,
            4 => Self::RedSpawn,
            5 => Self::GreenSpawn,
            6 => Self::RedBarrier,
            7 => Self::GreenBarrier,
            8 => Self::HeavySnow,
            _ => Self::Ground,
        }
    }
}

/// Result of a collision query, ordered from lowest to highest priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CollisionClass {
    Clear,
    Hole,
    Destructible,
    Wall,
    /// Team-exclusive barrier the querying team may not cross
    Barrier,
}

impl CollisionClass {
    pub fn blocks_tank(self) -> bool {
        self != Self::Clear
    }

    /// Bullets fly over holes and ignore team barriers
    pub fn blocks_bullet(self) -> bool {
        matches!(self, Self::Wall | Self::Destructible)
    }
}

/// Axis-aligned square used for collision queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    pub size: f64,
}

impl Footprint {
    /// Square anchored at its top-left corner
    pub fn square(x: f64, y: f64, size: f64) -> Self {
        Self { x, y, size }
    }

    /// Square around a centre point
    pub fn centered(cx: f64, cy: f64, half_extent: f64) -> Self {
        Self {
            x: cx - half_extent,
            y: cy - half_extent,
            size: half_extent * 2.0,
        }
    }

    /// Every cell the rounded bounding box touches
    fn cells(&self) -> impl Iterator<Item = (i64, i64)> {
        let x0 = self.x.floor() as i64;
        let x1 = (self.x + self.size).floor() as i64;
        let y0 = self.y.floor() as i64;
        let y1 = (self.y + self.size).floor() as i64;
        (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| (x, y)))
    }
}

/// Map loading errors
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Failed to read map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Map has no rows")]
    Empty,
}

/// Static tile layout of one map, border ring included
#[derive(Debug, Clone)]
pub struct TileGrid {
    width: usize,
    height: usize,
    tiles: Vec<Tile>,
    red_spawns: Vec<Cell>,
    green_spawns: Vec<Cell>,
    destructibles: Vec<Cell>,
}

impl TileGrid {
    /// Parse comma separated rows of tile ids
    pub fn parse(text: &str) -> Result<Self, MapError> {
        let rows: Vec<Vec<Tile>> = text
            .trim()
            .lines()
            .map(|line| {
                line.split(',')
                    .map(|cell| Tile::from_id(cell.trim().parse::<i64>().unwrap_or(0)))
                    .collect()
            })
            .collect();

        if rows.is_empty() {
            return Err(MapError::Empty);
        }

        let inner_width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let width = inner_width + 2;
        let height = rows.len() + 2;

        // Short rows stay padded with wall
        let mut grid = Self {
            width,
            height,
            tiles: vec![Tile::Wall; width * height],
            red_spawns: Vec::new(),
            green_spawns: Vec::new(),
            destructibles: Vec::new(),
        };

        for (row, tiles) in rows.iter().enumerate() {
            for (col, tile) in tiles.iter().enumerate() {
                let cell = (col + 1, row + 1);
                grid.tiles[cell.1 * width + cell.0] = *tile;
                match tile {
                    Tile::RedSpawn => grid.red_spawns.push(cell),
                    Tile::GreenSpawn => grid.green_spawns.push(cell),
                    Tile::Destructible => grid.destructibles.push(cell),
                    _ => {}
                }
            }
        }

        Ok(grid)
    }

    pub fn load(path: &Path) -> Result<Self, MapError> {
        let text = std::fs::read_to_string(path).map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Tile at a cell; anything off the grid is wall
    pub fn tile(&self, x: i64, y: i64) -> Tile {
        if x < 0 || y < 0 {
            return Tile::Wall;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return Tile::Wall;
        }
        self.tiles[y * self.width + x]
    }

    pub fn spawns(&self, team: Team) -> &[Cell] {
        match team {
            Team::Red => &self.red_spawns,
            Team::Green => &self.green_spawns,
        }
    }

    pub fn destructible_cells(&self) -> &[Cell] {
        &self.destructibles
    }
}

/// Live instance of a destructible tile
#[derive(Debug, Clone, PartialEq)]
pub struct Destructible {
    pub x: usize,
    pub y: usize,
    pub destroyed: bool,
    pub destroyed_at: u64,
}

impl Destructible {
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x as f64 - x).hypot(self.y as f64 - y)
    }
}

/// Per-round terrain: the static grid plus mutable destructible state
#[derive(Debug, Clone)]
pub struct Terrain {
    grid: Arc<TileGrid>,
    destructibles: Vec<Destructible>,
    index: HashMap<Cell, usize>,
    red_cursor: usize,
    green_cursor: usize,
    hole_radius: f64,
}

impl Terrain {
    pub fn new(grid: Arc<TileGrid>, hole_radius: f64) -> Self {
        let destructibles: Vec<Destructible> = grid
            .destructible_cells()
            .iter()
            .map(|&(x, y)| Destructible {
                x,
                y,
                destroyed: false,
                destroyed_at: 0,
            })
            .collect();
        let index = destructibles
            .iter()
            .enumerate()
            .map(|(i, d)| ((d.x, d.y), i))
            .collect();

        Self {
            grid,
            destructibles,
            index,
            red_cursor: 0,
            green_cursor: 0,
            hole_radius,
        }
    }

    pub fn destructibles(&self) -> &[Destructible] {
        &self.destructibles
    }

    pub fn destructibles_mut(&mut self) -> &mut [Destructible] {
        &mut self.destructibles
    }

    fn is_intact(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 {
            return true;
        }
        self.index
            .get(&(x as usize, y as usize))
            .map(|&i| !self.destructibles[i].destroyed)
            .unwrap_or(true)
    }

    /// Highest priority blocker under a footprint.
    ///
    /// Team barriers only apply when a team is given; bullet probes pass
    /// `None`.
    pub fn collision_class(&self, footprint: &Footprint, team: Option<Team>) -> CollisionClass {
        let mut class = CollisionClass::Clear;

        for (x, y) in footprint.cells() {
            let found = match self.grid.tile(x, y) {
                Tile::RedBarrier if team == Some(Team::Green) => CollisionClass::Barrier,
                Tile::GreenBarrier if team == Some(Team::Red) => CollisionClass::Barrier,
                Tile::Wall => CollisionClass::Wall,
                Tile::Destructible if self.is_intact(x, y) => CollisionClass::Destructible,
                Tile::Hole => {
                    let dist = (x as f64 - footprint.x).hypot(y as f64 - footprint.y);
                    if dist <= self.hole_radius {
                        CollisionClass::Hole
                    } else {
                        CollisionClass::Clear
                    }
                }
                _ => CollisionClass::Clear,
            };

            if found == CollisionClass::Barrier {
                return found;
            }
            class = class.max(found);
        }

        class
    }

    /// Next spawn point for a team, round-robin
    pub fn next_spawn(&mut self, team: Team) -> Option<(f64, f64)> {
        let cursor = match team {
            Team::Red => &mut self.red_cursor,
            Team::Green => &mut self.green_cursor,
        };
        let spawns = self.grid.spawns(team);
        if spawns.is_empty() {
            return None;
        }
        *cursor += 1;
        let (x, y) = spawns[*cursor % spawns.len()];
        Some((x as f64, y as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terrain(text: &str) -> Terrain {
        Terrain::new(Arc::new(TileGrid::parse(text).unwrap()), 0.975)
    }

    #[test]
    fn loader_adds_wall_ring() {
        let grid = TileGrid::parse("0,0,0\n0,0,0\n").unwrap();

        assert_eq!(grid.width(), 5);
        assert_eq!(grid.height(), 4);
        for x in 0..5 {
            assert_eq!(grid.tile(x, 0), Tile::Wall);
            assert_eq!(grid.tile(x, 3), Tile::Wall);
        }
        assert_eq!(grid.tile(0, 1), Tile::Wall);
        assert_eq!(grid.tile(4, 2), Tile::Wall);
        assert_eq!(grid.tile(1, 1), Tile::Ground);
    }

    #[test]
    fn unknown_and_negative_ids_are_ground() {
        let grid = TileGrid::parse("-4,x,42,8").unwrap();

        assert_eq!(grid.tile(1, 1), Tile::Ground);
        assert_eq!(grid.tile(2, 1), Tile::Ground);
        assert_eq!(grid.tile(3, 1), Tile::Ground);
        assert_eq!(grid.tile(4, 1), Tile::HeavySnow);
    }

    #[test]
    fn short_rows_are_padded_with_wall() {
        let grid = TileGrid::parse("0,0,0\r\n0\r\n").unwrap();

        assert_eq!(grid.tile(1, 2), Tile::Ground);
        assert_eq!(grid.tile(2, 2), Tile::Wall);
        assert_eq!(grid.tile(3, 2), Tile::Wall);
    }

    #[test]
    fn empty_map_is_rejected() {
        assert!(matches!(TileGrid::parse("  \n"), Err(MapError::Empty)));
    }

    #[test]
    fn lookups_off_the_grid_are_wall() {
        let grid = TileGrid::parse("0").unwrap();

        assert_eq!(grid.tile(-1, 1), Tile::Wall);
        assert_eq!(grid.tile(1, 100), Tile::Wall);
    }

    #[test]
    fn footprint_covers_every_overlapped_cell() {
        let terrain = terrain("0,0,0\n0,0,2\n0,0,0");

        // [1.2, 2.15] x [1.2, 2.15] touches (2,2), [2.1, 3.05] touches (3,2)
        assert_eq!(
            terrain.collision_class(&Footprint::square(1.2, 1.2, 0.95), None),
            CollisionClass::Clear
        );
        assert_eq!(
            terrain.collision_class(&Footprint::square(2.1, 1.2, 0.95), None),
            CollisionClass::Wall
        );
    }

    #[test]
    fn barriers_only_block_the_other_team() {
        let terrain = terrain("6,7");
        let red_only = Footprint::square(1.0, 1.0, 0.5);
        let green_only = Footprint::square(2.0, 1.0, 0.5);

        assert_eq!(terrain.collision_class(&red_only, Some(Team::Red)), CollisionClass::Clear);
        assert_eq!(
            terrain.collision_class(&red_only, Some(Team::Green)),
            CollisionClass::Barrier
        );
        assert_eq!(
            terrain.collision_class(&green_only, Some(Team::Red)),
            CollisionClass::Barrier
        );
        assert_eq!(terrain.collision_class(&green_only, None), CollisionClass::Clear);
    }

    #[test]
    fn barrier_outranks_wall_outranks_destructible_outranks_hole() {
        let terrain = terrain("3,1,2,7");

        // Spans the hole (origin distance 0.5) and the destructible
        let hole_and_crate = Footprint::square(1.5, 1.0, 0.95);
        assert_eq!(
            terrain.collision_class(&hole_and_crate, Some(Team::Red)),
            CollisionClass::Destructible
        );

        let crate_and_wall = Footprint::square(2.5, 1.0, 0.95);
        assert_eq!(
            terrain.collision_class(&crate_and_wall, Some(Team::Red)),
            CollisionClass::Wall
        );

        let wall_and_barrier = Footprint::square(3.5, 1.0, 0.95);
        assert_eq!(
            terrain.collision_class(&wall_and_barrier, Some(Team::Red)),
            CollisionClass::Barrier
        );
        assert_eq!(
            terrain.collision_class(&wall_and_barrier, Some(Team::Green)),
            CollisionClass::Wall
        );
    }

    #[test]
    fn holes_allow_near_misses() {
        let terrain = terrain("0,3,0\n0,0,0");

        // Clips the hole cell but the origin is 1.03 away
        let grazing = Footprint::square(1.1, 1.5, 0.95);
        assert_eq!(terrain.collision_class(&grazing, Some(Team::Red)), CollisionClass::Clear);

        let over = Footprint::square(1.5, 1.0, 0.95);
        assert_eq!(terrain.collision_class(&over, Some(Team::Red)), CollisionClass::Hole);
        assert!(!CollisionClass::Hole.blocks_bullet());
    }

    #[test]
    fn destroyed_destructible_no_longer_blocks() {
        let mut terrain = terrain("0,1");
        let probe = Footprint::centered(2.5, 1.5, 0.01);
        assert_eq!(terrain.collision_class(&probe, None), CollisionClass::Destructible);

        terrain.destructibles_mut()[0].destroyed = true;

        assert_eq!(terrain.collision_class(&probe, None), CollisionClass::Clear);
    }

    #[test]
    fn spawn_cursor_is_round_robin() {
        let mut terrain = terrain("4,0,4,5");

        // Cursor is bumped before use
        assert_eq!(terrain.next_spawn(Team::Red), Some((3.0, 1.0)));
        assert_eq!(terrain.next_spawn(Team::Red), Some((1.0, 1.0)));
        assert_eq!(terrain.next_spawn(Team::Red), Some((3.0, 1.0)));
        assert_eq!(terrain.next_spawn(Team::Green), Some((4.0, 1.0)));
    }

    #[test]
    fn missing_spawns_yield_none() {
        let mut terrain = terrain("4,0");

        assert_eq!(terrain.next_spawn(Team::Green), None);
    }
}
