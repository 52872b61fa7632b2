// Season structure: week numbering, playoff rounds, and week names.

use serde::{Deserialize, Serialize};

use crate::config::LeagueConfig;

pub type SeasonId = i64;
pub type Week = u8;

const PLAYOFF_ROUND_NAMES: [&str; 3] = ["Wild Card", "Divisional", "Conference Championship"];

/// A season of the league. Weeks `1..=regular_season_weeks` are regular
/// season; the remaining `playoff_weeks` are playoff rounds, the last of which
/// is the final (Super Bowl) week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub year: i32,
    pub name: String,
    pub regular_season_weeks: Week,
    pub playoff_weeks: Week,
    pub is_current: bool,
    pub is_complete: bool,
}

/// Which part of the season a week belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeekKind {
    Regular,
    /// Playoff rounds before the final week (Wild Card through Conference).
    PlayoffRound,
    Final,
}

impl Season {
    /// Structure-only season used before a row exists (ids are assigned by
    /// the database).
    pub fn from_config(league: &LeagueConfig) -> Self {
        Self {
            id: 0,
            year: league.season_year,
            name: format!("{} Season", league.season_year),
            regular_season_weeks: league.regular_season_weeks,
            playoff_weeks: league.playoff_weeks,
            is_current: false,
            is_complete: false,
        }
    }

    pub fn total_weeks(&self) -> Week {
        self.regular_season_weeks + self.playoff_weeks
    }

    pub fn final_week(&self) -> Week {
        self.total_weeks()
    }

    pub fn contains_week(&self, week: Week) -> bool {
        (1..=self.total_weeks()).contains(&week)
    }

    pub fn is_playoff_week(&self, week: Week) -> bool {
        week > self.regular_season_weeks
    }

    /// Classify a week. Weeks outside the season are treated as regular.
    pub fn week_kind(&self, week: Week) -> WeekKind {
        if week == self.final_week() && self.playoff_weeks > 0 {
            WeekKind::Final
        } else if self.is_playoff_week(week) {
            WeekKind::PlayoffRound
        } else {
            WeekKind::Regular
        }
    }

    /// Playoff weeks that precede the final week.
    pub fn playoff_rounds(&self) -> std::ops::RangeInclusive<Week> {
        (self.regular_season_weeks + 1)..=(self.final_week().saturating_sub(1))
    }

    /// Display name: "Week 7" for the regular season, round names for the
    /// playoffs.
    pub fn week_name(&self, week: Week) -> String {
        match self.week_kind(week) {
            WeekKind::Regular => format!("Week {week}"),
            WeekKind::Final => "Super Bowl".to_string(),
            WeekKind::PlayoffRound => {
                let round = usize::from(week - self.regular_season_weeks - 1);
                PLAYOFF_ROUND_NAMES
                    .get(round)
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| format!("Playoff Round {}", round + 1))
            }
        }
    }

    /// Upstream season type and week number for a league week: regular
    /// weeks are season type 2, playoff weeks season type 3 renumbered from 1.
    pub fn upstream_week(&self, week: Week) -> (u8, Week) {
        if self.is_playoff_week(week) {
            (3, week - self.regular_season_weeks)
        } else {
            (2, week)
        }
    }
}

#[cfg(test)]
pub(crate) fn test_season() -> Season {
    Season {
        id: 1,
        year: 2025,
        name: "2025 Season".into(),
        regular_season_weeks: 18,
        playoff_weeks: 4,
        is_current: true,
        is_complete: false,
    }
}
