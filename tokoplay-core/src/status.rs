// src/status.rs
//
// Snapshot types published once per loop iteration, and the watch-channel
// bus the dashboard reads them from. Publishing is fire-and-forget: the
// loop never blocks on, or fails because of, a slow or absent display.

use chrono::{DateTime, Utc};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopPhase {
    #[default]
    Idle,
    Authenticating,
    Playing,
    Recording,
    Stopped,
}

impl LoopPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopPhase::Idle => "idle",
            LoopPhase::Authenticating => "authenticating",
            LoopPhase::Playing => "playing",
            LoopPhase::Recording => "recording",
            LoopPhase::Stopped => "stopped",
        }
    }
}

/// Outcome of the most recent play cycle, carried in snapshots instead of
/// ever being surfaced to the display as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    Scored { points: i64, multiplier: String },
    Rejected,
    TransportGaveUp,
    ProtocolFailure,
    Unauthorized,
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub phase: LoopPhase,
    pub energy: u32,
    pub energy_cap: u32,
    pub score_total: i64,
    pub games_played: u64,
    pub last_outcome: Option<PlayOutcome>,
    /// Seconds until the current token's assumed expiry; negative if stale.
    pub token_expires_in: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            phase: LoopPhase::Idle,
            energy: 0,
            energy_cap: 0,
            score_total: 0,
            games_played: 0,
            last_outcome: None,
            token_expires_in: None,
            updated_at: Utc::now(),
        }
    }
}

/// Latest-value bus for snapshots. Subscribers only ever see the most
/// recent snapshot; an internal receiver keeps the channel open so
/// publishing with no dashboard attached is a no-op rather than an error.
#[derive(Clone)]
pub struct StatusBus {
    tx: watch::Sender<StatusSnapshot>,
    _keepalive: watch::Receiver<StatusSnapshot>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(StatusSnapshot::default());
        Self { tx, _keepalive: rx }
    }

    pub fn publish(&self, snapshot: StatusSnapshot) {
        let _ = self.tx.send(snapshot);
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}
