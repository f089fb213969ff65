// src/scheduler.rs
//
// The decision loop. One logical thread of control owns the session and
// energy state; every wait is a tokio sleep raced against the shutdown
// watch channel, so cancellation is observed at every suspension point.
//
// Phases: Idle -> Authenticating -> Playing -> Recording -> Idle, with
// Stopped terminal. Only exhaustion of the authentication retry budget is
// fatal; every other failure is a transient cycle outcome carried in the
// published snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::CredentialStore;
use crate::backoff::BackoffPolicy;
use crate::client::{GameApi, PlayRequest, PlayResult};
use crate::config::BotConfig;
use crate::energy::EnergyTracker;
use crate::error::Error;
use crate::status::{LoopPhase, PlayOutcome, StatusBus, StatusSnapshot};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub game_id: u32,
    pub poll_interval_min: Duration,
    pub poll_interval_max: Duration,
    pub auth_backoff: BackoffPolicy,
    pub play_backoff: BackoffPolicy,
    pub score_min: u32,
    pub score_max: u32,
    pub multiplier: String,
    pub pause_min: Duration,
    pub pause_max: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        let (poll_min, poll_max) = config.poll_interval_bounds();
        Self {
            game_id: config.game_id,
            poll_interval_min: poll_min,
            poll_interval_max: poll_max,
            auth_backoff: config.auth_backoff(),
            play_backoff: config.play_backoff(),
            score_min: config.score_min,
            score_max: config.score_max,
            multiplier: config.multiplier.clone(),
            pause_min: Duration::from_secs(config.pause_min_secs),
            pause_max: Duration::from_secs(config.pause_max_secs),
        }
    }
}

pub struct GameLoopScheduler {
    client: Arc<dyn GameApi>,
    creds: CredentialStore,
    energy: EnergyTracker,
    settings: SchedulerSettings,
    status: StatusBus,
    shutdown_rx: watch::Receiver<bool>,

    phase: LoopPhase,
    active_token: Option<String>,
    pending: Option<PlayResult>,
    last_outcome: Option<PlayOutcome>,
    score_total: i64,
    games_played: u64,
}

impl GameLoopScheduler {
    pub fn new(
        client: Arc<dyn GameApi>,
        creds: CredentialStore,
        energy: EnergyTracker,
        settings: SchedulerSettings,
        status: StatusBus,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            creds,
            energy,
            settings,
            status,
            shutdown_rx,
            phase: LoopPhase::Idle,
            active_token: None,
            pending: None,
            last_outcome: None,
            score_total: 0,
            games_played: 0,
        }
    }

    /// Run until shutdown or a fatal authentication failure. The returned
    /// error is the only one that ever escapes the loop.
    pub async fn run(mut self) -> Result<(), Error> {
        info!(user_id = self.creds.account().user_id, "game loop starting");
        let result = loop {
            if self.is_shutdown() && self.phase != LoopPhase::Stopped {
                info!("shutdown requested; stopping game loop");
                self.phase = LoopPhase::Stopped;
            }
            match self.phase {
                LoopPhase::Idle => self.step_idle().await,
                LoopPhase::Authenticating => {
                    if let Err(e) = self.step_authenticate().await {
                        break Err(e);
                    }
                }
                LoopPhase::Playing => self.step_play().await,
                LoopPhase::Recording => self.step_record().await,
                LoopPhase::Stopped => break Ok(()),
            }
        };
        self.phase = LoopPhase::Stopped;
        self.publish();
        info!(
            games = self.games_played,
            score = self.score_total,
            "game loop stopped"
        );
        result
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Sleep for `wait`, returning false if shutdown arrived first.
    async fn wait_or_shutdown(&mut self, wait: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(wait) => true,
            _ = self.shutdown_rx.changed() => false,
        }
    }

    async fn step_idle(&mut self) {
        if self.energy.can_play() {
            self.phase = LoopPhase::Authenticating;
            self.publish();
            return;
        }
        let wait = self
            .energy
            .time_until_next_unit()
            .clamp(self.settings.poll_interval_min, self.settings.poll_interval_max);
        debug!(wait_secs = wait.as_secs(), "no energy; waiting");
        self.publish();
        if !self.wait_or_shutdown(wait).await {
            self.phase = LoopPhase::Stopped;
            return;
        }
        self.try_sync().await;
    }

    /// Opportunistic status poll while idle. Failures here downgrade to a
    /// no-op cycle; the next poll gets another chance.
    async fn try_sync(&mut self) {
        let token = match self.creds.get_valid_token().await {
            Ok(token) => token,
            Err(e) => {
                debug!("status poll skipped, no valid token: {e}");
                return;
            }
        };
        match self
            .client
            .fetch_status(&token, self.creds.account().user_id)
            .await
        {
            Ok(status) => {
                self.energy
                    .sync_from_server(status.energy, status.cap, status.next_regen_at);
                if let Some(score) = status.score {
                    if score > self.score_total {
                        self.score_total = score;
                    }
                }
                debug!(energy = status.energy, "synced account state from server");
            }
            Err(Error::Unauthorized) => self.creds.invalidate(),
            Err(e) => debug!("status poll failed: {e}"),
        }
    }

    async fn step_authenticate(&mut self) -> Result<(), Error> {
        let mut attempts = 0u32;
        loop {
            if self.is_shutdown() {
                self.phase = LoopPhase::Stopped;
                return Ok(());
            }
            match self.creds.get_valid_token().await {
                Ok(token) => {
                    self.active_token = Some(token);
                    self.phase = LoopPhase::Playing;
                    self.publish();
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    if self.settings.auth_backoff.exhausted(attempts) {
                        error!("authentication failed after {attempts} attempts: {e}");
                        self.last_outcome =
                            Some(PlayOutcome::Fatal(format!("authentication failed: {e}")));
                        self.phase = LoopPhase::Stopped;
                        self.publish();
                        return Err(e);
                    }
                    let delay = self.settings.auth_backoff.delay_for(attempts);
                    warn!(
                        "token refresh failed (attempt {attempts}): {e}; retrying in {:?}",
                        delay
                    );
                    self.publish();
                    if !self.wait_or_shutdown(delay).await {
                        self.phase = LoopPhase::Stopped;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn step_play(&mut self) {
        let Some(token) = self.active_token.clone() else {
            self.phase = LoopPhase::Authenticating;
            return;
        };
        let request = PlayRequest {
            game_id: self.settings.game_id,
            score: pick_u32(self.settings.score_min, self.settings.score_max),
            multiplier: self.settings.multiplier.clone(),
        };
        info!(score = request.score, "submitting play");

        let mut attempts = 0u32;
        loop {
            if self.is_shutdown() {
                self.phase = LoopPhase::Stopped;
                return;
            }
            match self
                .client
                .submit_play(&token, self.creds.account().user_id, request.clone())
                .await
            {
                Ok(result) => {
                    self.pending = Some(result);
                    self.phase = LoopPhase::Recording;
                    return;
                }
                Err(Error::Unauthorized) => {
                    warn!("token rejected mid-session; forcing re-authentication");
                    self.creds.invalidate();
                    self.active_token = None;
                    self.last_outcome = Some(PlayOutcome::Unauthorized);
                    self.phase = LoopPhase::Authenticating;
                    self.publish();
                    return;
                }
                Err(e) if e.is_transport() => {
                    attempts += 1;
                    if self.settings.play_backoff.exhausted(attempts) {
                        // Whether the play reached the server is unknown, so
                        // energy is not decremented; the next status poll is
                        // the source of truth.
                        warn!("giving up on play after {attempts} transport failures: {e}");
                        self.last_outcome = Some(PlayOutcome::TransportGaveUp);
                        self.phase = LoopPhase::Idle;
                        self.publish();
                        return;
                    }
                    let delay = self.settings.play_backoff.delay_for(attempts);
                    warn!(
                        "play submission failed (attempt {attempts}): {e}; retrying in {:?}",
                        delay
                    );
                    if !self.wait_or_shutdown(delay).await {
                        self.phase = LoopPhase::Stopped;
                        return;
                    }
                }
                Err(e) => {
                    warn!("discarding play cycle after protocol failure: {e}");
                    self.last_outcome = Some(PlayOutcome::ProtocolFailure);
                    self.phase = LoopPhase::Idle;
                    self.publish();
                    return;
                }
            }
        }
    }

    async fn step_record(&mut self) {
        let Some(result) = self.pending.take() else {
            self.phase = LoopPhase::Idle;
            return;
        };
        match result.energy {
            Some(energy) => self.energy.sync_from_server(energy, None, None),
            None => self.energy.consume_one(),
        }
        if result.success {
            self.score_total += result.score_delta;
            self.games_played += 1;
            info!(
                points = result.score_delta,
                total = self.score_total,
                energy = self.energy.current(),
                "play recorded"
            );
            self.last_outcome = Some(PlayOutcome::Scored {
                points: result.score_delta,
                multiplier: result.multiplier,
            });
        } else {
            info!("server rejected the play; no points awarded");
            self.last_outcome = Some(PlayOutcome::Rejected);
        }
        self.publish();

        let pause = pick_duration(self.settings.pause_min, self.settings.pause_max);
        debug!(pause_secs = pause.as_secs(), "pausing before next cycle");
        if !self.wait_or_shutdown(pause).await {
            self.phase = LoopPhase::Stopped;
            return;
        }
        self.phase = LoopPhase::Idle;
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.phase,
            energy: self.energy.current(),
            energy_cap: self.energy.cap(),
            score_total: self.score_total,
            games_played: self.games_played,
            last_outcome: self.last_outcome.clone(),
            token_expires_in: self.creds.session().map(|s| s.expires_in_secs()),
            updated_at: Utc::now(),
        }
    }

    fn publish(&self) {
        self.status.publish(self.snapshot());
    }
}

fn pick_u32(lo: u32, hi: u32) -> u32 {
    if hi <= lo {
        return lo;
    }
    rand::rng().random_range(lo..=hi)
}

fn pick_duration(lo: Duration, hi: Duration) -> Duration {
    if hi <= lo {
        return lo;
    }
    let ms = rand::rng().random_range(lo.as_millis() as u64..=hi.as_millis() as u64);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccountIdentity, Session};
    use crate::client::{GameStatus, MockGameApi};
    use std::sync::atomic::{AtomicU32, Ordering};

    const INIT_DATA: &str = "query_id=AAbbCC&user=%7B%22id%22%3A42%7D&hash=ff00";

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            game_id: 1,
            poll_interval_min: Duration::from_secs(1),
            poll_interval_max: Duration::from_secs(300),
            auth_backoff: BackoffPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1)),
            play_backoff: BackoffPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1)),
            score_min: 100,
            score_max: 100,
            multiplier: "1".to_string(),
            pause_min: Duration::from_secs(5),
            pause_max: Duration::from_secs(5),
        }
    }

    fn fresh_session(token: &str) -> Session {
        Session::new(token.to_string(), Utc::now() + chrono::Duration::hours(1))
    }

    fn scheduler_with(
        api: MockGameApi,
        energy: EnergyTracker,
        status: &StatusBus,
    ) -> (GameLoopScheduler, Arc<watch::Sender<bool>>) {
        let (tx, rx) = watch::channel(false);
        let client: Arc<dyn GameApi> = Arc::new(api);
        let account = AccountIdentity::from_init_data(INIT_DATA).unwrap();
        let creds = CredentialStore::new(
            Arc::clone(&client),
            account,
            chrono::Duration::minutes(5),
            None,
        );
        let scheduler =
            GameLoopScheduler::new(client, creds, energy, settings(), status.clone(), rx);
        (scheduler, Arc::new(tx))
    }

    fn tracker_with(energy: u32) -> EnergyTracker {
        let mut t = EnergyTracker::new(Duration::from_secs(180));
        t.sync_from_server(energy, Some(5), None);
        t
    }

    #[tokio::test(start_paused = true)]
    async fn empty_tracker_waits_out_regen_without_playing() {
        let mut tracker = EnergyTracker::new(Duration::from_secs(180));
        tracker.sync_from_server(0, Some(5), Some(Utc::now() + Duration::from_secs(30)));

        let status = StatusBus::new();
        let mut api = MockGameApi::new();
        api.expect_submit_play().times(0);
        api.expect_refresh_token()
            .returning(|_| Ok(fresh_session("tok-a")));

        // The first status poll after the wait requests shutdown.
        let (tx_slot, rx_slot) = std::sync::mpsc::channel::<Arc<watch::Sender<bool>>>();
        api.expect_fetch_status().returning(move |_, _| {
            if let Ok(tx) = rx_slot.try_recv() {
                let _ = tx.send(true);
            }
            Ok(GameStatus {
                energy: 0,
                cap: Some(5),
                next_regen_at: Some(Utc::now() + Duration::from_secs(30)),
                score: None,
            })
        });

        let (scheduler, tx) = scheduler_with(api, tracker, &status);
        tx_slot.send(Arc::clone(&tx)).unwrap();

        let started = tokio::time::Instant::now();
        scheduler.run().await.unwrap();
        let elapsed = started.elapsed();

        // Woke from the energy wait on schedule, not after some long sleep.
        assert!(elapsed >= Duration::from_secs(29), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(40), "elapsed {elapsed:?}");
        assert_eq!(status.latest().phase, LoopPhase::Stopped);
        assert_eq!(status.latest().energy, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn three_plays_drain_energy_and_accumulate_score() {
        let status = StatusBus::new();
        let mut api = MockGameApi::new();
        api.expect_refresh_token()
            .times(1)
            .returning(|_| Ok(fresh_session("tok-a")));

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        api.expect_submit_play().times(3).returning(move |_, _, req| {
            let n = calls_in.fetch_add(1, Ordering::SeqCst);
            Ok(PlayResult {
                success: true,
                score_delta: 100,
                multiplier: req.multiplier,
                energy: Some(2 - n),
            })
        });

        let (tx_slot, rx_slot) = std::sync::mpsc::channel::<Arc<watch::Sender<bool>>>();
        api.expect_fetch_status().returning(move |_, _| {
            // Energy is gone; end the run once the loop goes back to polling.
            if let Ok(tx) = rx_slot.try_recv() {
                let _ = tx.send(true);
            }
            Ok(GameStatus {
                energy: 0,
                cap: Some(5),
                next_regen_at: None,
                score: None,
            })
        });

        let (scheduler, tx) = scheduler_with(api, tracker_with(3), &status);
        tx_slot.send(Arc::clone(&tx)).unwrap();

        scheduler.run().await.unwrap();

        let snap = status.latest();
        assert_eq!(snap.games_played, 3);
        assert_eq!(snap.score_total, 300);
        assert_eq!(snap.energy, 0);
        assert_eq!(snap.phase, LoopPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_play_invalidates_once_and_reauthenticates() {
        let status = StatusBus::new();
        let mut api = MockGameApi::new();
        let mut seq = mockall::Sequence::new();

        let (tx_slot, rx_slot) = std::sync::mpsc::channel::<Arc<watch::Sender<bool>>>();

        api.expect_refresh_token()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(fresh_session("tok-a")));
        api.expect_submit_play()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|token, _, _| token == "tok-a")
            .returning(|_, _, _| Err(Error::Unauthorized));
        // Exactly one forced refresh follows the rejection.
        api.expect_refresh_token()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(fresh_session("tok-b")));
        api.expect_submit_play()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|token, _, _| token == "tok-b")
            .returning(move |_, _, req| {
                if let Ok(tx) = rx_slot.try_recv() {
                    let _ = tx.send(true);
                }
                Ok(PlayResult {
                    success: true,
                    score_delta: 100,
                    multiplier: req.multiplier,
                    energy: None,
                })
            });

        let (scheduler, tx) = scheduler_with(api, tracker_with(2), &status);
        tx_slot.send(Arc::clone(&tx)).unwrap();

        scheduler.run().await.unwrap();

        let snap = status.latest();
        // The rejected attempt consumed nothing; only the confirmed play did.
        assert_eq!(snap.energy, 1);
        assert_eq!(snap.games_played, 1);
        assert_eq!(snap.score_total, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_retry_exhaustion_is_fatal() {
        let status = StatusBus::new();
        let mut api = MockGameApi::new();
        // max_attempts is 3: three refresh attempts, then nothing else.
        api.expect_refresh_token()
            .times(3)
            .returning(|_| Err(Error::Transport("refused".into())));
        api.expect_submit_play().times(0);
        api.expect_fetch_status().times(0);

        let (scheduler, _tx) = scheduler_with(api, tracker_with(1), &status);
        let err = scheduler.run().await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));

        let snap = status.latest();
        assert_eq!(snap.phase, LoopPhase::Stopped);
        assert!(matches!(snap.last_outcome, Some(PlayOutcome::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_never_consume_energy() {
        let status = StatusBus::new();
        let mut api = MockGameApi::new();
        api.expect_refresh_token()
            .times(1)
            .returning(|_| Ok(fresh_session("tok-a")));

        let (tx_slot, rx_slot) = std::sync::mpsc::channel::<Arc<watch::Sender<bool>>>();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        // play_backoff allows 2 attempts; both fail at the transport level.
        api.expect_submit_play().times(2).returning(move |_, _, _| {
            if calls_in.fetch_add(1, Ordering::SeqCst) == 1 {
                if let Ok(tx) = rx_slot.try_recv() {
                    let _ = tx.send(true);
                }
            }
            Err(Error::Transport("connection reset".into()))
        });
        api.expect_fetch_status().times(0);

        let (scheduler, tx) = scheduler_with(api, tracker_with(2), &status);
        tx_slot.send(Arc::clone(&tx)).unwrap();

        scheduler.run().await.unwrap();

        let snap = status.latest();
        assert_eq!(snap.energy, 2, "unconfirmed plays must not be guessed away");
        assert_eq!(snap.games_played, 0);
        assert_eq!(snap.score_total, 0);
        assert_eq!(snap.last_outcome, Some(PlayOutcome::TransportGaveUp));
    }
}
