//! Game loop actor and outbound fan-out
//!
//! One task owns the `World`. Connection tasks, the tick timer and the
//! timeout sweep all feed the same `select!`, so every mutation runs one at a
//! time in arrival order.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::GameConfig;
use crate::util::time::{next_tick_delay, unix_millis, Timer};
use crate::ws::protocol::ClientMsg;

use super::session::SessionId;
use super::world::{Outgoing, Recipient, World};

const INBOUND_CAPACITY: usize = 1024;

/// Work for the game loop from a connection task
#[derive(Debug)]
pub enum Inbound {
    Connect { id: SessionId },
    Message { id: SessionId, msg: ClientMsg },
    Disconnect { id: SessionId },
}

/// Outbound queues of every open connection
pub struct ConnectionRegistry {
    outboxes: DashMap<SessionId, mpsc::Sender<Arc<str>>>,
    capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            outboxes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Open an outbox; the connection's writer drains the receiver
    pub fn register(&self, id: SessionId) -> mpsc::Receiver<Arc<str>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.outboxes.insert(id, tx);
        rx
    }

    /// Dropping the sender ends the writer, which closes the socket
    pub fn unregister(&self, id: SessionId) -> bool {
        self.outboxes.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    fn deliver(
        &self,
        id: SessionId,
        tx: &mpsc::Sender<Arc<str>>,
        frame: &Arc<str>,
        kind: u8,
        snapshot: bool,
    ) {
        match tx.try_send(Arc::clone(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) if snapshot => {
                debug!(session_id = %id, "Outbox full, snapshot dropped");
            }
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %id, kind, "Outbox full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %id, "Outbox closed");
            }
        }
    }
}

/// Serialize each message once and queue it for its recipients without waiting
pub fn fan_out(registry: &ConnectionRegistry, outgoing: Vec<Outgoing>) {
    for Outgoing { to, msg } in outgoing {
        let frame: Arc<str> = match msg.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                error!(kind = msg.kind(), error = %e, "Failed to serialize server message");
                continue;
            }
        };
        let (kind, snapshot) = (msg.kind(), msg.is_snapshot());

        match to {
            Recipient::All => {
                for entry in registry.outboxes.iter() {
                    registry.deliver(*entry.key(), entry.value(), &frame, kind, snapshot);
                }
            }
            Recipient::Session(id) => {
                if let Some(tx) = registry.outboxes.get(&id) {
                    registry.deliver(id, tx.value(), &frame, kind, snapshot);
                }
            }
        }
    }
}

/// Counters read by the health endpoint
#[derive(Debug, Default)]
pub struct GameStats {
    sessions: AtomicUsize,
    ticks: AtomicU64,
}

impl GameStats {
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Cloneable handle to the running game loop
#[derive(Clone)]
pub struct GameHandle {
    pub inbound_tx: mpsc::Sender<Inbound>,
    pub connections: Arc<ConnectionRegistry>,
    pub stats: Arc<GameStats>,
}

impl GameHandle {
    /// Queue work for the loop; false once the loop has stopped
    pub async fn send(&self, inbound: Inbound) -> bool {
        self.inbound_tx.send(inbound).await.is_ok()
    }
}

/// The authoritative simulation task
pub struct GameLoop {
    world: World,
    inbound_rx: mpsc::Receiver<Inbound>,
    connections: Arc<ConnectionRegistry>,
    stats: Arc<GameStats>,
    tick_interval: Duration,
    sweep_interval: Duration,
}

impl GameLoop {
    pub fn new(world: World, config: &GameConfig) -> (Self, GameHandle) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let connections = Arc::new(ConnectionRegistry::new(config.outbox_capacity));
        let stats = Arc::new(GameStats::default());

        let handle = GameHandle {
            inbound_tx,
            connections: connections.clone(),
            stats: stats.clone(),
        };

        let game_loop = Self {
            world,
            inbound_rx,
            connections,
            stats,
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
            sweep_interval: Duration::from_millis(config.sweep_interval_ms.max(1)),
        };

        (game_loop, handle)
    }

    /// Run until every handle is dropped
    pub async fn run(mut self) {
        info!(
            map = %self.world.map_name,
            tick_ms = self.tick_interval.as_millis() as u64,
            "Game loop started"
        );

        let mut next_tick = Instant::now();
        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sleep_until(next_tick) => {
                    let timer = Timer::new();
                    self.world.tick(unix_millis());
                    self.flush();
                    self.stats.ticks.fetch_add(1, Ordering::Relaxed);

                    let elapsed = timer.elapsed();
                    if elapsed > self.tick_interval {
                        debug!(elapsed_ms = timer.elapsed_ms(), "Tick overran its interval");
                    }
                    next_tick = Instant::now() + next_tick_delay(self.tick_interval, elapsed);
                }
                _ = sweep.tick() => {
                    self.world.sweep_timeouts(unix_millis());
                    self.flush();
                }
                inbound = self.inbound_rx.recv() => {
                    let Some(inbound) = inbound else {
                        info!("All game handles dropped, stopping game loop");
                        break;
                    };
                    self.apply(inbound, unix_millis());
                    self.flush();
                }
            }
        }
    }

    fn apply(&mut self, inbound: Inbound, now: u64) {
        match inbound {
            Inbound::Connect { id } => self.world.connect(id, now),
            Inbound::Message { id, msg } => self.world.handle_message(id, msg, now),
            Inbound::Disconnect { id } => {
                self.world.disconnect(id);
            }
        }
    }

    /// Deliver queued messages, then close timed-out connections
    fn flush(&mut self) {
        fan_out(&self.connections, self.world.drain_outgoing());
        for id in self.world.drain_closed() {
            self.connections.unregister(id);
        }
        self.stats
            .sessions
            .store(self.world.session_count(), Ordering::Relaxed);
    }
}
