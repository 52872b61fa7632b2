// Games, their status state machine, and final scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::season::{SeasonId, Week};

pub type GameId = i64;
pub type TeamId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub abbreviation: String,
    pub name: String,
    pub espn_id: Option<String>,
}

/// Game lifecycle. `Final` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::InProgress => "in_progress",
            GameStatus::Final => "final",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(GameStatus::Scheduled),
            "in_progress" => Some(GameStatus::InProgress),
            "final" => Some(GameStatus::Final),
            _ => None,
        }
    }

    /// Forward-only transitions. Skipping `InProgress` is allowed when a poll
    /// was missed; staying in the same state is allowed for score updates.
    pub fn can_advance_to(self, next: GameStatus) -> bool {
        matches!(
            (self, next),
            (GameStatus::Scheduled, _)
                | (GameStatus::InProgress, GameStatus::InProgress)
                | (GameStatus::InProgress, GameStatus::Final)
                | (GameStatus::Final, GameStatus::Final)
        )
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub season_id: SeasonId,
    pub week: Week,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub start_time: DateTime<Utc>,
    pub status: GameStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub espn_id: Option<String>,
    /// Set once every pick on the game has been scored.
    pub scored_at: Option<DateTime<Utc>>,
}

impl Game {
    /// A game has started once kickoff has passed or upstream reports it
    /// beyond `Scheduled`, whichever comes first.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.status != GameStatus::Scheduled || now >= self.start_time
    }

    pub fn is_final(&self) -> bool {
        self.status == GameStatus::Final
    }

    pub fn involves(&self, team: TeamId) -> bool {
        team == self.home_team_id || team == self.away_team_id
    }

    /// Scores are authoritative only once the game is final.
    pub fn final_score(&self) -> Option<FinalScore> {
        if !self.is_final() {
            return None;
        }
        Some(FinalScore {
            game_id: self.id,
            home_team_id: self.home_team_id,
            away_team_id: self.away_team_id,
            home_score: self.home_score?,
            away_score: self.away_score?,
        })
    }
}

/// The settled result of a final game. Only obtainable through
/// [`Game::final_score`], so scoring can never see a live game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalScore {
    pub game_id: GameId,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub home_score: i32,
    pub away_score: i32,
}

impl FinalScore {
    pub fn is_tie(&self) -> bool {
        self.home_score == self.away_score
    }

    pub fn margin(&self) -> i32 {
        (self.home_score - self.away_score).abs()
    }

    pub fn winner(&self) -> Option<TeamId> {
        match self.home_score.cmp(&self.away_score) {
            std::cmp::Ordering::Greater => Some(self.home_team_id),
            std::cmp::Ordering::Less => Some(self.away_team_id),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn game(status: GameStatus, home: Option<i32>, away: Option<i32>) -> Game {
        Game {
            id: 7,
            season_id: 1,
            week: 1,
            home_team_id: 10,
            away_team_id: 20,
            start_time: Utc.with_ymd_and_hms(2025, 9, 7, 17, 0, 0).unwrap(),
            status,
            home_score: home,
            away_score: away,
            espn_id: None,
            scored_at: None,
        }
    }

    #[test]
    fn status_only_moves_forward() {
        use GameStatus::*;
        assert!(Scheduled.can_advance_to(InProgress));
        assert!(Scheduled.can_advance_to(Final));
        assert!(InProgress.can_advance_to(Final));
        assert!(InProgress.can_advance_to(InProgress));
        assert!(!InProgress.can_advance_to(Scheduled));
        assert!(!Final.can_advance_to(InProgress));
        assert!(!Final.can_advance_to(Scheduled));
    }

    #[test]
    fn status_string_round_trip() {
        for status in [GameStatus::Scheduled, GameStatus::InProgress, GameStatus::Final] {
            assert_eq!(GameStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(GameStatus::parse("halftime"), None);
    }

    #[test]
    fn started_by_clock_or_status() {
        let g = game(GameStatus::Scheduled, None, None);
        assert!(!g.has_started(g.start_time - chrono::Duration::minutes(1)));
        assert!(g.has_started(g.start_time));

        let live = game(GameStatus::InProgress, Some(0), Some(0));
        assert!(live.has_started(live.start_time - chrono::Duration::hours(1)));
    }

    #[test]
    fn final_score_requires_final_status() {
        assert!(game(GameStatus::InProgress, Some(24), Some(17)).final_score().is_none());
        assert!(game(GameStatus::Final, None, None).final_score().is_none());

        let score = game(GameStatus::Final, Some(24), Some(17)).final_score().unwrap();
        assert_eq!(score.winner(), Some(10));
        assert_eq!(score.margin(), 7);
        assert!(!score.is_tie());
    }

    #[test]
    fn tie_has_no_winner() {
        let score = game(GameStatus::Final, Some(20), Some(20)).final_score().unwrap();
        assert!(score.is_tie());
        assert_eq!(score.winner(), None);
        assert_eq!(score.margin(), 0);
    }
}
