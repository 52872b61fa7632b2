// Pick legality rules, evaluated in order against a loaded snapshot of the
// user's season.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::league::{Game, NewPick, Outcome, Pick, PickId, Scope, Season, TeamId, UserId, Week, WeekKind};
use crate::stats::eligibility::Eligibility;

/// A user's pick together with the game it was made on.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorPick {
    pub pick: Pick,
    pub game: Game,
}

/// The selection being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub user_id: UserId,
    pub team_id: TeamId,
    pub scope: Scope,
}

/// Everything the rules look at. `history` holds the user's picks in the
/// candidate's scope for the season, in any order.
#[derive(Debug, Clone, Copy)]
pub struct PickContext<'a> {
    pub season: &'a Season,
    pub game: &'a Game,
    pub history: &'a [PriorPick],
    /// The user's playoff eligibility for the game's week.
    pub eligibility: Eligibility,
    pub now: DateTime<Utc>,
}

/// What a valid submission writes.
#[derive(Debug, Clone, PartialEq)]
pub struct PickPlan {
    pub pick: NewPick,
    /// The user's existing pick for the same week and scope, which this one
    /// replaces.
    pub replaces: Option<PickId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnknownUser,
    GameNotFound,
    NotCurrentSeason,
    TeamNotInGame,
    NotAMember,
    GameStarted,
    GameFinal,
    CurrentPickLocked { week: Week },
    StandingsPending { week_name: String },
    NotQualified { week_name: String },
    TeamAlreadyUsed { week: Week },
    LostPreviousWeek { week: Week },
    AlreadyPicked,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UnknownUser => f.write_str("Unknown user"),
            Rejection::GameNotFound => f.write_str("Game not found"),
            Rejection::NotCurrentSeason => f.write_str("Game is not part of the current season"),
            Rejection::TeamNotInGame => f.write_str("Selected team is not playing in this game"),
            Rejection::NotAMember => f.write_str("You are not an active member of this group"),
            Rejection::GameStarted => f.write_str("Game has already started"),
            Rejection::GameFinal => f.write_str("Game is already complete"),
            Rejection::CurrentPickLocked { week } => write!(
                f,
                "Cannot switch pick: your current week {week} pick has already started"
            ),
            Rejection::StandingsPending { week_name } => {
                write!(f, "Standings for {week_name} are not final yet")
            }
            Rejection::NotQualified { week_name } => {
                write!(f, "You did not qualify to pick in {week_name}")
            }
            Rejection::TeamAlreadyUsed { week } => {
                write!(f, "Team already used in week {week}")
            }
            Rejection::LostPreviousWeek { week } => write!(
                f,
                "Cannot use this team: they lost your week {week} pick"
            ),
            Rejection::AlreadyPicked => {
                f.write_str("A pick for this week was just submitted; reload and try again")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid(PickPlan),
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid(_))
    }

    /// User-facing reason for a rejection.
    pub fn reason(&self) -> Option<String> {
        match self {
            Verdict::Valid(_) => None,
            Verdict::Rejected(r) => Some(r.to_string()),
        }
    }
}

/// Data-integrity checks that hold even for admin overrides.
pub fn check_integrity(season: &Season, game: &Game, team_id: TeamId) -> Option<Rejection> {
    if game.season_id != season.id || !season.contains_week(game.week) {
        return Some(Rejection::NotCurrentSeason);
    }
    if !game.involves(team_id) {
        return Some(Rejection::TeamNotInGame);
    }
    None
}

/// Run the league rules in order; the first failure wins.
pub fn validate(candidate: Candidate, ctx: &PickContext<'_>) -> Verdict {
    match check(candidate, ctx) {
        Ok(plan) => Verdict::Valid(plan),
        Err(rejection) => Verdict::Rejected(rejection),
    }
}

fn check(candidate: Candidate, ctx: &PickContext<'_>) -> Result<PickPlan, Rejection> {
    let PickContext {
        season,
        game,
        history,
        eligibility,
        now,
    } = *ctx;
    let week = game.week;

    if let Some(rejection) = check_integrity(season, game, candidate.team_id) {
        return Err(rejection);
    }

    // Rule 1: timing, for both the target game and the pick being replaced.
    if game.is_final() {
        return Err(Rejection::GameFinal);
    }
    if game.has_started(now) {
        return Err(Rejection::GameStarted);
    }
    let current = history.iter().find(|prior| prior.pick.week == week);
    if let Some(current) = current {
        if current.game.id != game.id && current.game.has_started(now) {
            return Err(Rejection::CurrentPickLocked { week });
        }
    }

    // Rule 2: one pick per week per scope; a new pick replaces the old one.
    let replaces = current.map(|prior| prior.pick.id);

    match eligibility {
        Eligibility::Eligible => {}
        Eligibility::NotQualified => {
            return Err(Rejection::NotQualified {
                week_name: season.week_name(week),
            })
        }
        Eligibility::Undetermined => {
            return Err(Rejection::StandingsPending {
                week_name: season.week_name(week),
            })
        }
    }

    // Rule 3: no team twice in the regular season, unless it lost.
    if season.week_kind(week) == WeekKind::Regular {
        let used = history
            .iter()
            .filter(|prior| {
                prior.pick.week < week
                    && season.week_kind(prior.pick.week) == WeekKind::Regular
                    && prior.pick.team_id == candidate.team_id
                    && prior.pick.outcome() != Some(Outcome::Loss)
            })
            .map(|prior| prior.pick.week)
            .min();
        if let Some(used_week) = used {
            return Err(Rejection::TeamAlreadyUsed { week: used_week });
        }
    }

    // Rule 4: a team that lost last week is locked out for this week.
    if week > 1 {
        let lost_last_week = history.iter().any(|prior| {
            prior.pick.week == week - 1
                && prior.pick.team_id == candidate.team_id
                && prior.pick.outcome() == Some(Outcome::Loss)
        });
        if lost_last_week {
            return Err(Rejection::LostPreviousWeek { week: week - 1 });
        }
    }

    Ok(PickPlan {
        pick: NewPick {
            user_id: candidate.user_id,
            game_id: game.id,
            season_id: season.id,
            week,
            scope: candidate.scope,
            team_id: candidate.team_id,
        },
        replaces,
    })
}
