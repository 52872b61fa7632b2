// Pick scoring: points and tiebreaker margin from a final score.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::db::Database;
use crate::league::{FinalScore, GameId, Outcome, Pick, PickId, PickResult, SeasonId, TeamId};

pub const WIN_POINTS: f64 = 1.0;
pub const TIE_POINTS: f64 = 0.5;
pub const LOSS_POINTS: f64 = 0.0;

/// Score one selection against a final result.
///
/// Win: 1.0 and +margin. Tie: 0.5 and 0. Loss: 0.0 and -margin. A selection
/// that did not play in the game can never win and scores as a loss.
pub fn score_pick(team: TeamId, score: &FinalScore) -> PickResult {
    let margin = score.margin();
    match score.winner() {
        None => PickResult {
            outcome: Outcome::Tie,
            points: TIE_POINTS,
            tiebreaker: 0,
        },
        Some(winner) if winner == team => PickResult {
            outcome: Outcome::Win,
            points: WIN_POINTS,
            tiebreaker: margin,
        },
        Some(_) => PickResult {
            outcome: Outcome::Loss,
            points: LOSS_POINTS,
            tiebreaker: -margin,
        },
    }
}

/// Result of scoring every pick on one game.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub game_id: GameId,
    pub season_id: SeasonId,
    pub picks_scored: usize,
    /// Picks whose stored result differs from before (newly scored or
    /// corrected). Empty when a game is rescored with unchanged scores.
    pub changed: Vec<(Pick, PickResult)>,
}

/// Score every pick on a final game in one transaction and mark the game
/// scored. Results are written as absolute values, so running this again on
/// the same final score stores identical rows.
pub fn score_game(db: &Database, game_id: GameId, now: DateTime<Utc>) -> Result<ScoreReport> {
    let game = db
        .game(game_id)?
        .with_context(|| format!("game {game_id} not found"))?;
    let score = game
        .final_score()
        .with_context(|| format!("game {game_id} is not final (status {})", game.status))?;

    let picks = db.picks_for_game(game_id)?;
    let results: Vec<(PickId, PickResult)> = picks
        .iter()
        .map(|pick| (pick.id, score_pick(pick.team_id, &score)))
        .collect();

    db.apply_pick_results(game_id, &results, now)?;

    let changed: Vec<(Pick, PickResult)> = picks
        .into_iter()
        .zip(results.iter().map(|(_, r)| *r))
        .filter(|(pick, result)| pick.result != Some(*result))
        .collect();

    if changed.is_empty() {
        debug!(game_id, picks = results.len(), "rescored game with no changes");
    } else {
        info!(
            game_id,
            picks = results.len(),
            changed = changed.len(),
            home = score.home_score,
            away = score.away_score,
            "scored game"
        );
    }

    Ok(ScoreReport {
        game_id,
        season_id: game.season_id,
        picks_scored: results.len(),
        changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: TeamId = 1;
    const AWAY: TeamId = 2;

    fn final_score(home: i32, away: i32) -> FinalScore {
        FinalScore {
            game_id: 9,
            home_team_id: HOME,
            away_team_id: AWAY,
            home_score: home,
            away_score: away,
        }
    }

    #[test]
    fn winner_gets_full_point_and_margin() {
        let result = score_pick(HOME, &final_score(24, 17));
        assert_eq!(result.outcome, Outcome::Win);
        assert_eq!(result.points, 1.0);
        assert_eq!(result.tiebreaker, 7);
        assert_eq!(result.outcome.is_correct(), Some(true));
    }

    #[test]
    fn loser_gets_nothing_and_negative_margin() {
        let result = score_pick(HOME, &final_score(10, 31));
        assert_eq!(result.outcome, Outcome::Loss);
        assert_eq!(result.points, 0.0);
        assert_eq!(result.tiebreaker, -21);
    }

    #[test]
    fn tie_is_half_point_for_either_side() {
        for team in [HOME, AWAY] {
            let result = score_pick(team, &final_score(20, 20));
            assert_eq!(result.outcome, Outcome::Tie);
            assert_eq!(result.points, 0.5);
            assert_eq!(result.tiebreaker, 0);
            assert_eq!(result.outcome.is_correct(), None);
        }
    }

    #[test]
    fn points_and_tiebreaker_sign_agree() {
        for (home, away) in [(0, 3), (3, 0), (14, 14), (45, 44), (6, 38)] {
            for team in [HOME, AWAY] {
                let r = score_pick(team, &final_score(home, away));
                assert!([0.0, 0.5, 1.0].contains(&r.points));
                match r.outcome {
                    Outcome::Win => assert!(r.tiebreaker > 0),
                    Outcome::Loss => assert!(r.tiebreaker < 0),
                    Outcome::Tie => assert_eq!(r.tiebreaker, 0),
                }
            }
        }
    }

    #[test]
    fn non_participant_never_wins() {
        let result = score_pick(99, &final_score(24, 17));
        assert_eq!(result.outcome, Outcome::Loss);
    }
}
