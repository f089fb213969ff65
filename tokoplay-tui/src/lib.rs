// tokoplay-tui/src/lib.rs
//
// Live status dashboard. Strictly a consumer: it reads the latest snapshot
// off the watch channel on its own redraw schedule and never feeds anything
// back into the loop.

use std::time::Duration;

use chrono::Local;
use colored::Colorize;
use tokio::sync::watch;
use tracing::debug;

use tokoplay_core::status::{LoopPhase, PlayOutcome, StatusSnapshot};

const REDRAW_INTERVAL: Duration = Duration::from_secs(1);

/// Redraw the dashboard until shutdown. Meant to be spawned next to the
/// game loop; it exits on its own once the shutdown flag flips.
pub async fn run_dashboard(
    mut snapshots: watch::Receiver<StatusSnapshot>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(REDRAW_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => {}
        }
        if *shutdown_rx.borrow() {
            debug!("dashboard shutting down");
            return;
        }
        let snapshot = snapshots.borrow_and_update().clone();
        // ANSI clear + home, then the whole frame in one write.
        print!("\x1B[2J\x1B[H{}", render(&snapshot));
    }
}

/// Render one snapshot as a full dashboard frame.
pub fn render(snapshot: &StatusSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n{}\n\n",
        "Tokoplay Bot".bold().cyan(),
        format!("Updated: {}", Local::now().format("%Y-%m-%d %H:%M:%S")).dimmed()
    ));

    out.push_str(&row("Phase", &phase_label(snapshot.phase)));
    out.push_str(&row(
        "Energy",
        &format!("{}/{}", snapshot.energy, snapshot.energy_cap),
    ));
    out.push_str(&row("Total Games", &snapshot.games_played.to_string()));
    out.push_str(&row("Total Points", &snapshot.score_total.to_string()));
    out.push_str(&row("Last Play", &outcome_label(snapshot.last_outcome.as_ref())));
    out.push_str(&row("Token", &token_label(snapshot.token_expires_in)));
    out
}

fn row(name: &str, value: &str) -> String {
    format!("  {:<14} {}\n", name, value)
}

fn phase_label(phase: LoopPhase) -> String {
    let label = phase.as_str();
    match phase {
        LoopPhase::Playing | LoopPhase::Recording => label.green().to_string(),
        LoopPhase::Stopped => label.red().to_string(),
        LoopPhase::Authenticating => label.yellow().to_string(),
        LoopPhase::Idle => label.normal().to_string(),
    }
}

fn outcome_label(outcome: Option<&PlayOutcome>) -> String {
    match outcome {
        None => "n/a".dimmed().to_string(),
        Some(PlayOutcome::Scored { points, multiplier }) => {
            format!("+{points} (x{multiplier})").green().to_string()
        }
        Some(PlayOutcome::Rejected) => "rejected".yellow().to_string(),
        Some(PlayOutcome::TransportGaveUp) => "network trouble".yellow().to_string(),
        Some(PlayOutcome::ProtocolFailure) => "bad response".yellow().to_string(),
        Some(PlayOutcome::Unauthorized) => "re-authenticating".yellow().to_string(),
        Some(PlayOutcome::Fatal(reason)) => reason.red().to_string(),
    }
}

fn token_label(expires_in: Option<i64>) -> String {
    match expires_in {
        None => "none".dimmed().to_string(),
        Some(secs) if secs <= 0 => "expired".red().to_string(),
        Some(secs) => format!("fresh ({}m {}s left)", secs / 60, secs % 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_the_core_figures() {
        colored::control::set_override(false);
        let snapshot = StatusSnapshot {
            phase: LoopPhase::Idle,
            energy: 3,
            energy_cap: 5,
            score_total: 540,
            games_played: 3,
            last_outcome: Some(PlayOutcome::Scored {
                points: 180,
                multiplier: "1".to_string(),
            }),
            token_expires_in: Some(125),
            ..Default::default()
        };
        let frame = render(&snapshot);
        assert!(frame.contains("3/5"));
        assert!(frame.contains("540"));
        assert!(frame.contains("+180 (x1)"));
        assert!(frame.contains("2m 5s"));
    }

    #[test]
    fn stale_token_is_flagged() {
        colored::control::set_override(false);
        assert_eq!(token_label(Some(-10)), "expired");
        assert_eq!(token_label(None), "none");
    }
}
