// Season schedule sync: teams and games for every league week.

use anyhow::Result;
use tracing::{debug, info, warn};

use pickem_core::db::NewGame;
use pickem_core::league::{GameStatus, Season, Week};
use pickem_core::LeagueService;

use crate::feed::{ScheduledGame, ScoreFeed};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub weeks_synced: usize,
    pub weeks_failed: usize,
    pub games: usize,
    /// Playoff slots whose teams are not known yet.
    pub games_skipped: usize,
}

/// Fetch every week of `season` and upsert its teams and games. A week that
/// fails to fetch is logged and skipped; storage errors abort the sync.
pub async fn sync_schedule<F>(service: &LeagueService, feed: &F, season: &Season) -> Result<ScheduleReport>
where
    F: ScoreFeed + ?Sized,
{
    let mut report = ScheduleReport::default();

    for week in 1..=season.total_weeks() {
        let (season_type, upstream_week) = season.upstream_week(week);
        let games = match feed.week_schedule(season.year, season_type, upstream_week).await {
            Ok(games) => games,
            Err(e) => {
                warn!(week, season_type, upstream_week, error = %e, "failed to fetch week schedule");
                report.weeks_failed += 1;
                continue;
            }
        };

        for scheduled in &games {
            if sync_game(service, season, week, scheduled)? {
                report.games += 1;
            } else {
                report.games_skipped += 1;
            }
        }
        report.weeks_synced += 1;
    }

    info!(
        season_id = season.id,
        weeks_synced = report.weeks_synced,
        weeks_failed = report.weeks_failed,
        games = report.games,
        "schedule synced"
    );
    Ok(report)
}

/// Returns false when the matchup is not set yet.
fn sync_game(service: &LeagueService, season: &Season, week: Week, scheduled: &ScheduledGame) -> Result<bool> {
    if scheduled.home.espn_id == scheduled.away.espn_id {
        debug!(espn_id = %scheduled.espn_id, week, "skipping game with undecided teams");
        return Ok(false);
    }

    let db = service.db();
    let home = db.upsert_team(
        &scheduled.home.abbreviation,
        &scheduled.home.name,
        Some(&scheduled.home.espn_id),
    )?;
    let away = db.upsert_team(
        &scheduled.away.abbreviation,
        &scheduled.away.name,
        Some(&scheduled.away.espn_id),
    )?;
    let game_id = db.upsert_game(&NewGame {
        season_id: season.id,
        week,
        home_team_id: home,
        away_team_id: away,
        start_time: scheduled.start_time,
        espn_id: Some(scheduled.espn_id.clone()),
    })?;

    let state = scheduled.state;
    if state.status != GameStatus::Scheduled {
        service.record_game_state(game_id, state.status, state.home_score, state.away_score)?;
    }
    Ok(true)
}
