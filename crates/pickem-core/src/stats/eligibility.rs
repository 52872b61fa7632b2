// Playoff eligibility, read only from frozen standings snapshots.
//
// Snapshots are built from leaderboards that never consult eligibility
// (regular-season standings, then playoff-round standings), so lookups here
// never call back into the stats aggregator.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::league::{Season, UserId, Week, WeekKind};

use super::leaderboard::LeaderboardEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eligibility {
    Eligible,
    NotQualified,
    /// The standings that decide this week are not frozen yet.
    Undetermined,
}

/// One user's frozen standing within a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub user_id: UserId,
    pub final_rank: usize,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub total_score: f64,
    pub tiebreaker: i32,
    pub accuracy: f64,
    pub playoff_eligible: bool,
    pub final_eligible: bool,
}

/// Snapshot rows for a regular-season leaderboard; the top
/// `playoff_qualifiers` ranks qualify.
pub fn snapshot_rows(board: &[LeaderboardEntry], playoff_qualifiers: usize) -> Vec<SnapshotRow> {
    board
        .iter()
        .map(|entry| SnapshotRow {
            user_id: entry.user_id,
            final_rank: entry.rank,
            wins: entry.stats.wins,
            losses: entry.stats.losses,
            ties: entry.stats.ties,
            total_score: entry.stats.total_score,
            tiebreaker: entry.stats.tiebreaker_total,
            accuracy: entry.stats.accuracy,
            playoff_eligible: entry.rank <= playoff_qualifiers,
            final_eligible: false,
        })
        .collect()
}

/// The top `final_qualifiers` playoff qualifiers of a playoff-round
/// leaderboard.
pub fn finalists(
    playoff_board: &[LeaderboardEntry],
    table: &EligibilityTable,
    final_qualifiers: usize,
) -> Vec<UserId> {
    playoff_board
        .iter()
        .filter(|entry| table.is_playoff_qualifier(entry.user_id))
        .take(final_qualifiers)
        .map(|entry| entry.user_id)
        .collect()
}

/// Eligibility lookups for one scope of one season.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityTable {
    regular_season_weeks: Week,
    final_week: Week,
    single_round: bool,
    playoff: Option<HashSet<UserId>>,
    finalists: Option<HashSet<UserId>>,
}

impl EligibilityTable {
    /// Build from a scope's snapshot rows. No rows means the regular season
    /// has not been frozen; no flagged finalist means the playoff rounds have
    /// not been decided.
    pub fn new(season: &Season, rows: &[SnapshotRow]) -> Self {
        let playoff = (!rows.is_empty()).then(|| {
            rows.iter()
                .filter(|r| r.playoff_eligible)
                .map(|r| r.user_id)
                .collect()
        });
        let finalists = rows.iter().any(|r| r.final_eligible).then(|| {
            rows.iter()
                .filter(|r| r.final_eligible)
                .map(|r| r.user_id)
                .collect()
        });
        Self {
            regular_season_weeks: season.regular_season_weeks,
            final_week: season.final_week(),
            single_round: season.playoff_rounds().is_empty(),
            playoff,
            finalists,
        }
    }

    /// A table with no snapshot: every regular week is open, every playoff
    /// week undetermined.
    pub fn unfrozen(season: &Season) -> Self {
        Self::new(season, &[])
    }

    fn kind(&self, week: Week) -> WeekKind {
        if week == self.final_week && week > self.regular_season_weeks {
            WeekKind::Final
        } else if week > self.regular_season_weeks {
            WeekKind::PlayoffRound
        } else {
            WeekKind::Regular
        }
    }

    pub fn is_playoff_qualifier(&self, user_id: UserId) -> bool {
        self.playoff
            .as_ref()
            .is_some_and(|set| set.contains(&user_id))
    }

    pub fn status(&self, user_id: UserId, week: Week) -> Eligibility {
        let decided_by = match self.kind(week) {
            WeekKind::Regular => return Eligibility::Eligible,
            WeekKind::PlayoffRound => &self.playoff,
            // With no rounds before the final, playoff qualifiers pick it.
            WeekKind::Final if self.single_round => &self.playoff,
            WeekKind::Final => &self.finalists,
        };
        match decided_by {
            None => Eligibility::Undetermined,
            Some(set) if set.contains(&user_id) => Eligibility::Eligible,
            Some(_) => Eligibility::NotQualified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::league::season::test_season;

    fn row(user_id: UserId, rank: usize, playoff: bool, final_round: bool) -> SnapshotRow {
        SnapshotRow {
            user_id,
            final_rank: rank,
            wins: 10,
            losses: 8,
            ties: 0,
            total_score: 10.0,
            tiebreaker: 0,
            accuracy: 0.55,
            playoff_eligible: playoff,
            final_eligible: final_round,
        }
    }

    #[test]
    fn regular_weeks_always_open() {
        let table = EligibilityTable::unfrozen(&test_season());
        assert_eq!(table.status(1, 1), Eligibility::Eligible);
        assert_eq!(table.status(1, 18), Eligibility::Eligible);
    }

    #[test]
    fn playoffs_undetermined_without_snapshot() {
        let table = EligibilityTable::unfrozen(&test_season());
        assert_eq!(table.status(1, 19), Eligibility::Undetermined);
        assert_eq!(table.status(1, 22), Eligibility::Undetermined);
    }

    #[test]
    fn snapshot_decides_playoff_rounds_then_final() {
        let season = test_season();
        let rows = [row(1, 1, true, false), row(2, 5, false, false)];
        let table = EligibilityTable::new(&season, &rows);
        assert_eq!(table.status(1, 20), Eligibility::Eligible);
        assert_eq!(table.status(2, 20), Eligibility::NotQualified);
        assert_eq!(table.status(1, 22), Eligibility::Undetermined);

        let rows = [row(1, 1, true, true), row(2, 5, false, false), row(3, 2, true, false)];
        let table = EligibilityTable::new(&season, &rows);
        assert_eq!(table.status(1, 22), Eligibility::Eligible);
        assert_eq!(table.status(3, 22), Eligibility::NotQualified);
    }

    #[test]
    fn single_playoff_week_uses_playoff_qualifiers() {
        let season = Season {
            playoff_weeks: 1,
            ..test_season()
        };
        let table = EligibilityTable::new(&season, &[row(1, 1, true, false), row(2, 2, false, false)]);
        assert_eq!(table.status(1, 19), Eligibility::Eligible);
        assert_eq!(table.status(2, 19), Eligibility::NotQualified);
    }
}
