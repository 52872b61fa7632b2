// Live score poller: fetches upstream state for started games, records
// transitions, scores newly final games, and advances season milestones.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use pickem_core::config::PollerConfig;
use pickem_core::league::SeasonId;
use pickem_core::{LeagueService, Milestone};

use crate::feed::ScoreFeed;
use crate::schedule;

/// Key under which run statistics live in the sync state table.
pub const STATS_KEY: &str = "poller_stats";

/// Counters kept across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_ticks: u64,
    pub successful_ticks: u64,
    pub failed_ticks: u64,
    pub games_updated: u64,
    pub games_scored: u64,
    pub fetch_failures: u64,
    pub last_error: Option<String>,
    pub last_tick: Option<DateTime<Utc>>,
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub polled: usize,
    pub updated: usize,
    pub fetch_failures: usize,
    pub scored: usize,
    pub milestones: Vec<Milestone>,
}

pub struct Poller<F> {
    service: Arc<LeagueService>,
    feed: F,
    config: PollerConfig,
    stats: SyncStats,
}

impl<F: ScoreFeed> Poller<F> {
    pub fn new(service: Arc<LeagueService>, feed: F, config: PollerConfig) -> Self {
        Self {
            service,
            feed,
            config,
            stats: SyncStats::default(),
        }
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Poll every started, non-final game of the current season once.
    ///
    /// A failed fetch leaves its game untouched. Final games not yet scored
    /// are scored afterwards, whether they turned final on this tick or were
    /// left unscored by an earlier run.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let season = self.service.current_season()?;
        let due = self.service.db().games_due_for_poll(season.id, now)?;
        let mut report = TickReport {
            polled: due.len(),
            ..TickReport::default()
        };

        for game in &due {
            let Some(espn_id) = game.espn_id.as_deref() else {
                continue;
            };
            match self.feed.game_state(espn_id).await {
                Ok(state) => {
                    let change = self.service.record_game_state(
                        game.id,
                        state.status,
                        state.home_score,
                        state.away_score,
                    )?;
                    if change.applied {
                        report.updated += 1;
                    }
                }
                Err(e) => {
                    warn!(game_id = game.id, espn_id, error = %e, "failed to fetch game state");
                    report.fetch_failures += 1;
                }
            }
        }

        report.scored = self.service.score_pending_games(season.id, now)?.len();
        report.milestones = self.service.advance_milestones(season.id)?;

        debug!(
            polled = report.polled,
            updated = report.updated,
            scored = report.scored,
            fetch_failures = report.fetch_failures,
            "poll tick complete"
        );
        Ok(report)
    }

    /// Short interval while anything is live, long otherwise.
    pub fn next_interval(&self, season_id: SeasonId) -> Result<Duration> {
        Ok(if self.service.db().has_games_in_progress(season_id)? {
            self.config.live_interval
        } else {
            self.config.idle_interval
        })
    }

    fn current_interval(&self) -> Duration {
        let live = self
            .service
            .current_season()
            .and_then(|season| self.next_interval(season.id));
        match live {
            Ok(interval) => interval,
            Err(e) => {
                warn!(error = %e, "could not pick poll interval, using idle interval");
                self.config.idle_interval
            }
        }
    }

    async fn run_tick(&mut self, now: DateTime<Utc>) {
        self.stats.total_ticks += 1;
        self.stats.last_tick = Some(now);
        match self.tick(now).await {
            Ok(report) => {
                self.stats.successful_ticks += 1;
                self.stats.games_updated += report.updated as u64;
                self.stats.games_scored += report.scored as u64;
                self.stats.fetch_failures += report.fetch_failures as u64;
                if report.updated > 0 || report.scored > 0 {
                    info!(
                        updated = report.updated,
                        scored = report.scored,
                        "poll applied updates"
                    );
                }
            }
            Err(e) => {
                self.stats.failed_ticks += 1;
                self.stats.last_error = Some(format!("{e:#}"));
                error!(error = %format!("{e:#}"), "poll tick failed");
            }
        }
        self.save_stats();
    }

    async fn refresh_schedule(&self) {
        let season = match self.service.current_season() {
            Ok(season) => season,
            Err(e) => {
                warn!(error = %e, "skipping schedule refresh");
                return;
            }
        };
        if let Err(e) = schedule::sync_schedule(&self.service, &self.feed, &season).await {
            error!(error = %format!("{e:#}"), "schedule refresh failed");
        }
    }

    fn load_stats(&mut self) {
        match self.service.db().load_state(STATS_KEY) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(stats) => self.stats = stats,
                Err(e) => warn!(error = %e, "ignoring unreadable poller stats"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to load poller stats"),
        }
    }

    fn save_stats(&self) {
        let saved = serde_json::to_value(&self.stats)
            .map_err(anyhow::Error::from)
            .and_then(|value| self.service.db().save_state(STATS_KEY, &value));
        if let Err(e) = saved {
            warn!(error = %e, "failed to persist poller stats");
        }
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    ///
    /// The schedule is synced on start and every `schedule_refresh`; the first
    /// poll runs immediately.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.load_stats();
        info!(
            live_secs = self.config.live_interval.as_secs(),
            idle_secs = self.config.idle_interval.as_secs(),
            ticks_so_far = self.stats.total_ticks,
            "poller started"
        );

        let mut refresh = tokio::time::interval(self.config.schedule_refresh);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let next_poll = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(next_poll);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = refresh.tick() => {
                    self.refresh_schedule().await;
                }

                _ = &mut next_poll => {
                    self.run_tick(Utc::now()).await;
                    let wait = self.current_interval();
                    debug!(wait_secs = wait.as_secs(), "next poll scheduled");
                    next_poll.as_mut().reset(Instant::now() + wait);
                }
            }
        }

        self.save_stats();
        info!(ticks = self.stats.total_ticks, "poller stopped");
        Ok(())
    }
}
