// src/energy.rs
//
// Tracks the account's play energy. Local bookkeeping is always treated as
// provisional: any figure reported by the server overwrites it wholesale.

use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct EnergyTracker {
    current: u32,
    cap: u32,
    next_regen_at: Option<DateTime<Utc>>,
    regen_fallback: Duration,
}

impl EnergyTracker {
    pub fn new(regen_fallback: Duration) -> Self {
        Self {
            current: 0,
            cap: 0,
            next_regen_at: None,
            regen_fallback,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn next_regen_at(&self) -> Option<DateTime<Utc>> {
        self.next_regen_at
    }

    pub fn can_play(&self) -> bool {
        self.current > 0
    }

    /// How long until the next unit should exist. Zero when playable;
    /// clamped to zero once a known regeneration timestamp has passed.
    pub fn time_until_next_unit(&self) -> Duration {
        if self.can_play() {
            return Duration::ZERO;
        }
        match self.next_regen_at {
            Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => self.regen_fallback,
        }
    }

    /// Account for one locally-submitted play. Never goes below zero; when
    /// the last unit is spent with no known regeneration time, pencil in
    /// the fallback interval until the server corrects us.
    pub fn consume_one(&mut self) {
        self.current = self.current.saturating_sub(1);
        if self.current == 0 && self.next_regen_at.is_none() {
            self.next_regen_at = Some(Utc::now() + self.regen_fallback);
        }
    }

    /// Server truth wins over any local estimate.
    pub fn sync_from_server(
        &mut self,
        energy: u32,
        cap: Option<u32>,
        next_regen: Option<DateTime<Utc>>,
    ) {
        self.current = energy;
        if let Some(cap) = cap {
            self.cap = cap;
        } else if energy > self.cap {
            self.cap = energy;
        }
        self.next_regen_at = next_regen;
        if self.current == 0 && self.next_regen_at.is_none() {
            self.next_regen_at = Some(Utc::now() + self.regen_fallback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(energy: u32) -> EnergyTracker {
        let mut t = EnergyTracker::new(Duration::from_secs(180));
        t.sync_from_server(energy, Some(5), None);
        t
    }

    #[test]
    fn energy_never_goes_negative() {
        let mut t = tracker_with(1);
        t.consume_one();
        t.consume_one();
        t.consume_one();
        assert_eq!(t.current(), 0);
    }

    #[test]
    fn hitting_zero_schedules_fallback_regen() {
        let mut t = tracker_with(1);
        // sync_from_server with zero pending units left next_regen unset for
        // a playable tracker; spending the last unit must set it.
        t.next_regen_at = None;
        t.consume_one();
        assert!(!t.can_play());
        assert!(t.next_regen_at().is_some());
        let wait = t.time_until_next_unit();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(180));
    }

    #[test]
    fn sync_overwrites_local_estimates() {
        let mut t = tracker_with(3);
        t.consume_one();
        let regen = Utc::now() + Duration::from_secs(30);
        t.sync_from_server(7, Some(10), Some(regen));
        assert_eq!(t.current(), 7);
        assert_eq!(t.cap(), 10);
        assert_eq!(t.next_regen_at(), Some(regen));

        // Idempotent: syncing the same figures changes nothing.
        t.sync_from_server(7, Some(10), Some(regen));
        assert_eq!(t.current(), 7);
        assert_eq!(t.cap(), 10);
    }

    #[test]
    fn zero_energy_sync_without_regen_still_reports_a_wait() {
        let mut t = tracker_with(3);
        t.sync_from_server(0, None, None);
        assert!(!t.can_play());
        assert!(t.next_regen_at().is_some());
    }

    #[test]
    fn playable_tracker_reports_zero_wait() {
        let t = tracker_with(2);
        assert!(t.can_play());
        assert_eq!(t.time_until_next_unit(), Duration::ZERO);
    }
}
