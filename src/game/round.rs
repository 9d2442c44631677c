//! Round state machine: Playing -> Ending -> Intermission -> Playing

use serde::Deserialize;
use tracing::info;

use crate::ws::protocol::{KillMethod, Scores, ServerMsg, Winner};

use super::combat::EntityId;
use super::grid::Terrain;
use super::session::SessionId;
use super::world::World;

/// Round timing
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// A score lead ends the round after this long
    pub min_duration_secs: u64,
    /// Hard limit
    pub max_duration_secs: u64,
    pub intermission_secs: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: 300,
            max_duration_secs: 600,
            intermission_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Playing,
    Ending,
    Intermission,
}

/// Why a round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ScoreLead,
    TimeLimit,
    Deserted,
}

/// Round timing, phase and map rotation index
#[derive(Debug)]
pub struct RoundController {
    config: RoundConfig,
    map_index: usize,
    started_at: u64,
    state: RoundState,
    intermission_since: u64,
    /// Somebody connected this round
    had_clients: bool,
}

impl RoundController {
    pub fn new(config: RoundConfig, now: u64) -> Self {
        Self {
            config,
            map_index: 0,
            started_at: now,
            state: RoundState::Playing,
            intermission_since: 0,
            had_clients: false,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == RoundState::Playing
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn map_index(&self) -> usize {
        self.map_index
    }

    /// Decide whether a playing round is over
    pub fn check_end(&mut self, now: u64, scores: &Scores, clients: usize) -> Option<EndReason> {
        if !self.is_playing() {
            return None;
        }
        if clients > 0 {
            self.had_clients = true;
        }

        let elapsed = now.saturating_sub(self.started_at);
        if elapsed >= self.config.max_duration_secs * 1000 {
            Some(EndReason::TimeLimit)
        } else if elapsed >= self.config.min_duration_secs * 1000 && scores.red != scores.green {
            Some(EndReason::ScoreLead)
        } else if self.had_clients && clients == 0 {
            Some(EndReason::Deserted)
        } else {
            None
        }
    }

    pub fn begin_ending(&mut self) {
        self.state = RoundState::Ending;
    }

    /// Enter intermission and move on to the next map
    pub fn begin_intermission(&mut self, now: u64, rotation_len: usize) {
        self.state = RoundState::Intermission;
        self.intermission_since = now;
        self.map_index = (self.map_index + 1) % rotation_len.max(1);
    }

    pub fn intermission_over(&self, now: u64) -> bool {
        self.state == RoundState::Intermission
            && now.saturating_sub(self.intermission_since) >= self.config.intermission_secs * 1000
    }

    pub fn start_round(&mut self, now: u64, clients: usize) {
        self.state = RoundState::Playing;
        self.started_at = now;
        self.had_clients = clients > 0;
    }
}

/// Higher score wins; equal scores tie
pub fn winner(scores: &Scores) -> Winner {
    match scores.red.cmp(&scores.green) {
        std::cmp::Ordering::Greater => Winner::Red,
        std::cmp::Ordering::Less => Winner::Green,
        std::cmp::Ordering::Equal => Winner::Tie,
    }
}

impl World {
    /// Advance the round state machine
    pub(super) fn update_round(&mut self, now: u64) {
        let clients = self.session_count();
        if let Some(reason) = self.round.check_end(now, &self.scores, clients) {
            self.end_round(reason, now);
        } else if self.round.intermission_over(now) {
            self.start_next_round(now);
        }
    }

    fn end_round(&mut self, reason: EndReason, now: u64) {
        self.round.begin_ending();
        let winner = winner(&self.scores);
        info!(
            map = %self.map_name,
            reason = ?reason,
            winner = ?winner,
            red = self.scores.red,
            green = self.scores.green,
            "Round over"
        );
        self.broadcast(ServerMsg::RoundEnd { winner });

        let bullets: Vec<EntityId> = self.bullets.keys().copied().collect();
        for id in bullets {
            self.destroy_bullet(id);
        }
        let mines: Vec<EntityId> = self.mines.keys().copied().collect();
        for id in mines {
            self.detonate_mine(id, now);
        }

        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.alive = false;
                session.killstreak = 0;
            }
            self.broadcast(ServerMsg::TankDestroyed {
                id,
                killer: id,
                method: KillMethod::Disconnect,
                killstreak: 0,
            });
        }

        self.scores = Scores::default();
        self.round.begin_intermission(now, self.rotation.len());
    }

    fn start_next_round(&mut self, now: u64) {
        let map = self.rotation.get(self.round.map_index()).clone();
        self.terrain = Terrain::new(map.grid, map.tunables.hole_radius);
        self.tunables = map.tunables;
        self.map_name = map.name;
        self.round.start_round(now, self.session_count());

        info!(map = %self.map_name, sessions = self.session_count(), "Round started");

        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            let msg = self.identify(id);
            self.send_to(id, msg);
        }
    }
}
