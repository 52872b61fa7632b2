// Per-user season statistics over a window of weeks.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::league::{Outcome, Pick, Season, UserId, Week, WeekKind};

use super::eligibility::{Eligibility, EligibilityTable};

/// Which weeks a statistic covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsWindow {
    FullSeason,
    RegularSeason,
    /// Playoff weeks before the final.
    PlayoffRounds,
    /// Every playoff week including the final.
    Postseason,
}

impl StatsWindow {
    pub fn contains(self, season: &Season, week: Week) -> bool {
        match self {
            StatsWindow::FullSeason => season.contains_week(week),
            StatsWindow::RegularSeason => season.week_kind(week) == WeekKind::Regular,
            StatsWindow::PlayoffRounds => season.week_kind(week) == WeekKind::PlayoffRound,
            StatsWindow::Postseason => {
                season.is_playoff_week(week) && season.contains_week(week)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonStats {
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    /// Complete weeks the user was eligible for but never picked.
    pub missed: u32,
    /// Picks on games not yet scored.
    pub pending: u32,
    /// wins / (wins + losses + missed), in [0, 1].
    pub accuracy: f64,
    pub total_score: f64,
    pub tiebreaker_total: i32,
    /// Signed run of the most recent decided picks: positive for wins.
    pub streak: i32,
    pub longest_streak: i32,
    /// wins + losses + ties + missed.
    pub weeks_counted: u32,
}

/// Aggregate one user's picks (already filtered to one scope) over `window`.
///
/// `complete_weeks` are the weeks whose games are all final; only those can
/// count as missed.
pub fn compute(
    season: &Season,
    window: StatsWindow,
    user_id: UserId,
    picks: &[Pick],
    complete_weeks: &BTreeSet<Week>,
    eligibility: &EligibilityTable,
) -> SeasonStats {
    let mut in_window: Vec<&Pick> = picks
        .iter()
        .filter(|p| window.contains(season, p.week))
        .collect();
    in_window.sort_by_key(|p| p.week);

    let mut stats = SeasonStats::default();
    let mut decided = Vec::new();
    for pick in &in_window {
        let Some(result) = pick.result else {
            stats.pending += 1;
            continue;
        };
        match result.outcome {
            Outcome::Win => stats.wins += 1,
            Outcome::Loss => stats.losses += 1,
            Outcome::Tie => stats.ties += 1,
        }
        if result.outcome != Outcome::Tie {
            decided.push(result.outcome);
        }
        stats.total_score += result.points;
        stats.tiebreaker_total += result.tiebreaker;
    }

    let picked_weeks: HashSet<Week> = in_window.iter().map(|p| p.week).collect();
    stats.missed = complete_weeks
        .iter()
        .filter(|&&week| window.contains(season, week))
        .filter(|week| !picked_weeks.contains(week))
        .filter(|&&week| eligibility.status(user_id, week) == Eligibility::Eligible)
        .count() as u32;

    stats.weeks_counted = stats.wins + stats.losses + stats.ties + stats.missed;
    let denominator = stats.wins + stats.losses + stats.missed;
    stats.accuracy = if denominator == 0 {
        0.0
    } else {
        f64::from(stats.wins) / f64::from(denominator)
    };
    stats.streak = current_streak(&decided);
    stats.longest_streak = longest_streak(&decided);
    stats
}

fn signed(outcome: Outcome, len: usize) -> i32 {
    let len = len as i32;
    if outcome == Outcome::Win {
        len
    } else {
        -len
    }
}

fn current_streak(decided: &[Outcome]) -> i32 {
    let Some(&last) = decided.last() else {
        return 0;
    };
    let len = decided.iter().rev().take_while(|&&o| o == last).count();
    signed(last, len)
}

/// Longest run, signed; a win run beats an equally long loss run.
fn longest_streak(decided: &[Outcome]) -> i32 {
    let mut best_win = 0;
    let mut best_loss = 0;
    for run in decided.chunk_by(|a, b| a == b) {
        match run[0] {
            Outcome::Win => best_win = best_win.max(run.len()),
            _ => best_loss = best_loss.max(run.len()),
        }
    }
    if best_win >= best_loss {
        signed(Outcome::Win, best_win)
    } else {
        signed(Outcome::Loss, best_loss)
    }
}
