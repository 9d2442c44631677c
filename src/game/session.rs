//! Per-connection authoritative player state

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session token handed to the client on connect
pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Green,
}

/// Keeps teams even with a signed running counter.
///
/// Joins go red while the counter is non-negative.
#[derive(Debug, Default)]
pub struct TeamBalancer {
    counter: i32,
}

impl TeamBalancer {
    pub fn assign(&mut self) -> Team {
        if self.counter >= 0 {
            self.counter -= 1;
            Team::Red
        } else {
            self.counter += 1;
            Team::Green
        }
    }

    pub fn release(&mut self, team: Team) {
        match team {
            Team::Red => self.counter += 1,
            Team::Green => self.counter -= 1,
        }
    }
}

/// Intended movement direction, relayed to peers for dead reckoning
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// Connected player and their tank
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub team: Team,
    pub name: String,

    // Tank pose, grid space
    pub x: f64,
    pub y: f64,
    pub base: f64,
    pub cannon: f64,
    pub direction: Direction,

    pub alive: bool,
    pub ammo: u32,
    pub mines: u32,
    pub killstreak: u32,

    /// Nonce the next update must echo
    pub challenge: u32,
    /// Time of the last accepted update
    pub last_seen: u64,
}

impl Session {
    pub fn new(id: SessionId, team: Team, challenge: u32, now: u64) -> Self {
        Self {
            id,
            team,
            name: "Unknown".to_string(),
            x: 0.0,
            y: 0.0,
            base: 0.0,
            cannon: 0.0,
            direction: Direction::default(),
            alive: false,
            ammo: 0,
            mines: 0,
            killstreak: 0,
            challenge,
            last_seen: now,
        }
    }

    /// Accept an echoed challenge and rotate to a fresh one
    pub fn accept_challenge<R: Rng>(&mut self, echoed: u32, rng: &mut R, now: u64) -> bool {
        if echoed != self.challenge {
            return false;
        }
        self.challenge = rng.gen();
        self.last_seen = now;
        true
    }

    pub fn is_timed_out(&self, now: u64, timeout_ms: u64) -> bool {
        now.saturating_sub(self.last_seen) > timeout_ms
    }

    pub fn refund_ammo(&mut self, cap: u32) {
        self.ammo = (self.ammo + 1).min(cap);
    }

    pub fn refund_mine(&mut self, cap: u32) {
        self.mines = (self.mines + 1).min(cap);
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}
