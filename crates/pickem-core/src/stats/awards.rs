// End-of-season awards.

use serde::{Deserialize, Serialize};

use crate::league::{Scope, SeasonId, UserId};

use super::leaderboard::LeaderboardEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Award {
    Champion,
    RunnerUp,
    ThirdPlace,
}

impl Award {
    pub fn as_str(self) -> &'static str {
        match self {
            Award::Champion => "champion",
            Award::RunnerUp => "runner_up",
            Award::ThirdPlace => "third_place",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "champion" => Some(Award::Champion),
            "runner_up" => Some(Award::RunnerUp),
            "third_place" => Some(Award::ThirdPlace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonWinner {
    pub season_id: SeasonId,
    pub user_id: UserId,
    pub scope: Scope,
    pub award: Award,
    pub total_score: f64,
    pub tiebreaker: i32,
}

/// Awards for a final leaderboard: the global board names a podium, group
/// boards a champion only.
pub fn awards_for(season_id: SeasonId, scope: Scope, board: &[LeaderboardEntry]) -> Vec<SeasonWinner> {
    let podium: &[Award] = match scope {
        Scope::Global => &[Award::Champion, Award::RunnerUp, Award::ThirdPlace],
        Scope::Group(_) => &[Award::Champion],
    };
    board
        .iter()
        .zip(podium)
        .map(|(entry, &award)| SeasonWinner {
            season_id,
            user_id: entry.user_id,
            scope,
            award,
            total_score: entry.stats.total_score,
            tiebreaker: entry.stats.tiebreaker_total,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::season::SeasonStats;

    fn board(n: usize) -> Vec<LeaderboardEntry> {
        (1..=n)
            .map(|rank| LeaderboardEntry {
                rank,
                user_id: rank as UserId * 10,
                username: format!("u{rank}"),
                stats: SeasonStats {
                    total_score: 20.0 - rank as f64,
                    ..SeasonStats::default()
                },
            })
            .collect()
    }

    #[test]
    fn global_board_gets_podium() {
        let winners = awards_for(1, Scope::Global, &board(5));
        let awards: Vec<(UserId, Award)> = winners.iter().map(|w| (w.user_id, w.award)).collect();
        assert_eq!(
            awards,
            vec![(10, Award::Champion), (20, Award::RunnerUp), (30, Award::ThirdPlace)]
        );
    }

    #[test]
    fn group_board_gets_champion_only() {
        let winners = awards_for(1, Scope::Group(4), &board(5));
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].award, Award::Champion);
        assert_eq!(winners[0].scope, Scope::Group(4));
    }

    #[test]
    fn short_board_gets_partial_podium() {
        assert_eq!(awards_for(1, Scope::Global, &board(2)).len(), 2);
        assert!(awards_for(1, Scope::Global, &[]).is_empty());
    }

    #[test]
    fn award_names_round_trip() {
        for award in [Award::Champion, Award::RunnerUp, Award::ThirdPlace] {
            assert_eq!(Award::parse(award.as_str()), Some(award));
        }
    }
}
