//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Every envelope is a JSON object with an integer `type`. The client's world
//! has `y` pointing up, so wire `y` values are the negated grid rows; the
//! conversion happens only in this module.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::game::session::{Direction, Team};

/// Grid row to wire `y`
pub fn to_wire_y(y: f64) -> f64 {
    -y
}

/// Wire `y` to grid row
pub fn from_wire_y(y: f64) -> f64 {
    -y
}

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing integer type field")]
    MissingType,

    #[error("Unknown message type {0}")]
    UnknownType(i64),

    #[error("Invalid payload for message type {kind}: {source}")]
    Invalid {
        kind: i64,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Frames that are not protocol envelopes at all
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Json(_) | Self::MissingType)
    }
}

/// Tank pose carried by an update, already in grid space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub base: f64,
    pub cannon: f64,
    pub direction: Direction,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    /// Type 1: echo of the last challenge, optionally with the tank pose.
    /// Without a pose it only keeps the session alive.
    Update { challenge: u32, pose: Option<Pose> },

    /// Type 3: spawn request
    Join { name: String },

    /// Type 5: fire along `rot` radians
    Fire { rot: f64 },

    /// Type 7: lay a mine at the tank position
    LayMine,
}

#[derive(Deserialize)]
struct RawUpdate {
    challenge: u32,
    x: Option<f64>,
    y: Option<f64>,
    base: Option<f64>,
    cannon: Option<f64>,
    direction: Option<Direction>,
}

#[derive(Deserialize)]
struct RawJoin {
    name: String,
}

#[derive(Deserialize)]
struct RawFire {
    rot: f64,
}

impl ClientMsg {
    /// Parse one text frame, checking every field the variant needs
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_i64)
            .ok_or(ProtocolError::MissingType)?;
        let invalid = |source| ProtocolError::Invalid { kind, source };

        match kind {
            1 => {
                let raw: RawUpdate = serde_json::from_value(value).map_err(invalid)?;
                let pose = match (raw.x, raw.y, raw.base, raw.cannon) {
                    (Some(x), Some(y), Some(base), Some(cannon)) => Some(Pose {
                        x,
                        y: from_wire_y(y),
                        base,
                        cannon,
                        direction: raw.direction.unwrap_or_default(),
                    }),
                    _ => None,
                };
                Ok(Self::Update {
                    challenge: raw.challenge,
                    pose,
                })
            }
            3 => {
                let raw: RawJoin = serde_json::from_value(value).map_err(invalid)?;
                Ok(Self::Join { name: raw.name })
            }
            5 => {
                let raw: RawFire = serde_json::from_value(value).map_err(invalid)?;
                Ok(Self::Fire { rot: raw.rot })
            }
            7 => Ok(Self::LayMine),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// How a tank was destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KillMethod {
    Bullet,
    Ricochet,
    Mine,
    Disconnect,
}

/// Round result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Red,
    Green,
    Tie,
}

/// Per-team kill counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Scores {
    pub red: u32,
    pub green: u32,
}

impl Scores {
    pub fn credit(&mut self, team: Team) {
        match team {
            Team::Red => self.red += 1,
            Team::Green => self.green += 1,
        }
    }
}

/// Tank entry of a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct TankView {
    pub base: f64,
    pub cannon: f64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub direction: Direction,
    pub team: Team,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulletView {
    pub rot: f64,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MineView {
    pub team: Team,
    pub ticking: bool,
    pub x: f64,
    pub y: f64,
}

/// Part of a snapshot shared by every client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldView {
    pub tanks: BTreeMap<Uuid, TankView>,
    pub bullets: BTreeMap<u64, BulletView>,
    pub mines: BTreeMap<u64, MineView>,
    pub scores: Scores,
    /// Milliseconds since the round started
    pub since_start: u64,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerMsg {
    /// Type 0: per-tick personalized snapshot
    Snapshot {
        challenge: u32,
        /// Bullets left in the clip
        clip: u32,
        /// Mines left
        explosives: u32,
        #[serde(flatten)]
        world: Arc<WorldView>,
    },

    /// Type 2: session id and current map
    #[serde(rename_all = "camelCase")]
    Identify {
        id: Uuid,
        map: String,
        round_start: u64,
    },

    /// Type 4
    TankDestroyed {
        id: Uuid,
        killer: Uuid,
        method: KillMethod,
        killstreak: u32,
    },

    /// Type 6
    BulletDestroyed { id: u64 },

    /// Type 8
    MineDestroyed { id: u64 },

    /// Type 9: `x`/`y` are the tile's column and row
    TileChanged { x: usize, y: usize, destroyed: bool },

    /// Type 10
    Ricochet { x: f64, y: f64 },

    /// Type 11
    FireResult { success: bool, x: f64, y: f64 },

    /// Type 12
    RoundEnd { winner: Winner },

    /// Type 14: authoritative position after a rejected move
    Correction { x: f64, y: f64 },
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(flatten)]
    body: &'a ServerMsg,
}

impl ServerMsg {
    pub fn ricochet_at(x: f64, y: f64) -> Self {
        Self::Ricochet {
            x,
            y: to_wire_y(y),
        }
    }

    pub fn fire_result_at(success: bool, x: f64, y: f64) -> Self {
        Self::FireResult {
            success,
            x,
            y: to_wire_y(y),
        }
    }

    pub fn correction_at(x: f64, y: f64) -> Self {
        Self::Correction {
            x,
            y: to_wire_y(y),
        }
    }

    /// Integer type code on the wire
    pub fn kind(&self) -> u8 {
        match self {
            Self::Snapshot { .. } => 0,
            Self::Identify { .. } => 2,
            Self::TankDestroyed { .. } => 4,
            Self::BulletDestroyed { .. } => 6,
            Self::MineDestroyed { .. } => 8,
            Self::TileChanged { .. } => 9,
            Self::Ricochet { .. } => 10,
            Self::FireResult { .. } => 11,
            Self::RoundEnd { .. } => 12,
            Self::Correction { .. } => 14,
        }
    }

    /// Snapshots may be dropped for a lagging client; the next one supersedes it
    pub fn is_snapshot(&self) -> bool {
        matches!(self, Self::Snapshot { .. })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope {
            kind: self.kind(),
            body: self,
        })
    }
}
