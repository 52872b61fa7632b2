// Picks, their scope, and scored results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::game::{GameId, TeamId};
use super::member::{GroupId, User, UserId};
use super::season::{SeasonId, Week};

pub type PickId = i64;

/// Where a pick counts: shared across every group, or within one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Group(GroupId),
}

impl Scope {
    /// Resolve the scope a user's picks land in when acting inside `group`.
    /// Users with global picks always use the global scope; everyone else
    /// picks per group, falling back to global outside any group.
    pub fn for_user(user: &User, group: Option<GroupId>) -> Self {
        match group {
            Some(id) if !user.picks_are_global => Scope::Group(id),
            _ => Scope::Global,
        }
    }

    /// Storage representation: `NULL` for global.
    pub fn group_id(self) -> Option<GroupId> {
        match self {
            Scope::Global => None,
            Scope::Group(id) => Some(id),
        }
    }

    pub fn from_group_id(group_id: Option<GroupId>) -> Self {
        group_id.map_or(Scope::Global, Scope::Group)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Group(id) => write!(f, "group {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Tie,
    Loss,
}

impl Outcome {
    /// Stored tri-state: `Some(true)` win, `Some(false)` loss, `None` tie.
    pub fn is_correct(self) -> Option<bool> {
        match self {
            Outcome::Win => Some(true),
            Outcome::Loss => Some(false),
            Outcome::Tie => None,
        }
    }

    pub fn from_is_correct(is_correct: Option<bool>) -> Self {
        match is_correct {
            Some(true) => Outcome::Win,
            Some(false) => Outcome::Loss,
            None => Outcome::Tie,
        }
    }
}

/// Result stamped on a pick when its game is scored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PickResult {
    pub outcome: Outcome,
    pub points: f64,
    pub tiebreaker: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    pub id: PickId,
    pub user_id: UserId,
    pub game_id: GameId,
    pub season_id: SeasonId,
    pub week: Week,
    pub scope: Scope,
    pub team_id: TeamId,
    /// `None` until the game is final and scored.
    pub result: Option<PickResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pick {
    pub fn is_scored(&self) -> bool {
        self.result.is_some()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.result.map(|r| r.outcome)
    }
}

/// A new or replacement pick about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPick {
    pub user_id: UserId,
    pub game_id: GameId,
    pub season_id: SeasonId,
    pub week: Week,
    pub scope: Scope,
    pub team_id: TeamId,
}
