// Leaderboard ranking for seasons and single weeks.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::league::{Outcome, TeamId, User, UserId};

use super::season::SeasonStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub username: String,
    pub stats: SeasonStats,
}

/// Sort by total score, then tiebreaker, then username, and number the ranks
/// from 1.
pub fn rank_season(rows: Vec<(User, SeasonStats)>) -> Vec<LeaderboardEntry> {
    let mut rows = rows;
    rows.sort_by(|(a_user, a), (b_user, b)| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(Ordering::Equal)
            .then(b.tiebreaker_total.cmp(&a.tiebreaker_total))
            .then_with(|| a_user.username.cmp(&b_user.username))
    });
    rows.into_iter()
        .enumerate()
        .map(|(i, (user, stats))| LeaderboardEntry {
            rank: i + 1,
            user_id: user.id,
            username: user.username,
            stats,
        })
        .collect()
}

/// One user's line on a weekly board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub username: String,
    pub team_id: TeamId,
    /// `None` while the pick's game is not final.
    pub outcome: Option<Outcome>,
    pub points: f64,
    pub tiebreaker: i32,
}

pub fn rank_week(entries: Vec<WeekEntry>) -> Vec<WeekEntry> {
    let mut entries = entries;
    entries.sort_by(|a, b| {
        b.points
            .partial_cmp(&a.points)
            .unwrap_or(Ordering::Equal)
            .then(b.tiebreaker.cmp(&a.tiebreaker))
            .then_with(|| a.username.cmp(&b.username))
    });
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: UserId, name: &str) -> User {
        User {
            id,
            username: name.into(),
            picks_are_global: true,
            is_admin: false,
        }
    }

    fn stats(total: f64, tiebreaker: i32) -> SeasonStats {
        SeasonStats {
            total_score: total,
            tiebreaker_total: tiebreaker,
            ..SeasonStats::default()
        }
    }

    #[test]
    fn ranks_by_score_then_tiebreaker_then_name() {
        let board = rank_season(vec![
            (user(1, "cato"), stats(9.0, 40)),
            (user(2, "ada"), stats(10.5, -3)),
            (user(3, "bea"), stats(9.0, 55)),
            (user(4, "abe"), stats(9.0, 40)),
        ]);
        let order: Vec<(usize, &str)> = board.iter().map(|e| (e.rank, e.username.as_str())).collect();
        assert_eq!(order, vec![(1, "ada"), (2, "bea"), (3, "abe"), (4, "cato")]);
    }

    #[test]
    fn week_board_ranks_points_then_margin() {
        let entry = |id: UserId, name: &str, points: f64, tb: i32| WeekEntry {
            rank: 0,
            user_id: id,
            username: name.into(),
            team_id: 1,
            outcome: None,
            points,
            tiebreaker: tb,
        };
        let board = rank_week(vec![
            entry(1, "a", 0.0, -7),
            entry(2, "b", 1.0, 3),
            entry(3, "c", 1.0, 14),
            entry(4, "d", 0.5, 0),
        ]);
        let ids: Vec<UserId> = board.iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
        assert_eq!(board[3].rank, 4);
    }
}
