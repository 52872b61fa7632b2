// ESPN public site API client: per-game state and weekly schedules.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use anyhow::Context;
use pickem_core::config::FeedConfig;
use pickem_core::league::{GameStatus, Week};

use crate::retry::{FeedError, RetryPolicy};

// ---------------------------------------------------------------------------
// Feed model
// ---------------------------------------------------------------------------

/// A game's state as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameState {
    pub status: GameStatus,
    /// `None` until the game has started.
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTeam {
    pub espn_id: String,
    pub abbreviation: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledGame {
    pub espn_id: String,
    pub start_time: DateTime<Utc>,
    pub home: FeedTeam,
    pub away: FeedTeam,
    pub state: GameState,
}

/// Source of upstream game data.
#[async_trait]
pub trait ScoreFeed: Send + Sync {
    async fn game_state(&self, espn_id: &str) -> Result<GameState, FeedError>;

    /// Every game of one upstream week (`season_type` 2 regular, 3 playoffs).
    async fn week_schedule(
        &self,
        year: i32,
        season_type: u8,
        week: Week,
    ) -> Result<Vec<ScheduledGame>, FeedError>;
}

// ---------------------------------------------------------------------------
// ESPN response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Summary {
    header: Option<SummaryHeader>,
}

#[derive(Debug, Deserialize)]
struct SummaryHeader {
    #[serde(default)]
    competitions: Vec<Competition>,
}

#[derive(Debug, Deserialize)]
struct Scoreboard {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    id: String,
    date: String,
    #[serde(default)]
    competitions: Vec<Competition>,
}

#[derive(Debug, Deserialize)]
struct Competition {
    #[serde(default)]
    competitors: Vec<Competitor>,
    status: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct Competitor {
    #[serde(rename = "homeAway")]
    home_away: String,
    #[serde(default)]
    score: Option<String>,
    team: Option<EspnTeam>,
}

#[derive(Debug, Deserialize)]
struct EspnTeam {
    id: String,
    abbreviation: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(rename = "type")]
    status_type: StatusType,
}

#[derive(Debug, Deserialize)]
struct StatusType {
    #[serde(default)]
    state: String,
    #[serde(default)]
    completed: bool,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn decode<T: for<'de> Deserialize<'de>>(url: &str, body: &str) -> Result<T, FeedError> {
    serde_json::from_str(body).map_err(|source| FeedError::Decode {
        url: url.to_string(),
        source,
    })
}

/// Postponed games report `post` without `completed`; they stay scheduled.
fn status_of(competition: &Competition) -> GameStatus {
    match &competition.status {
        Some(Status { status_type }) if status_type.completed => GameStatus::Final,
        Some(Status { status_type }) if status_type.state == "in" => GameStatus::InProgress,
        _ => GameStatus::Scheduled,
    }
}

fn side<'a>(competition: &'a Competition, home_away: &str) -> Result<&'a Competitor, FeedError> {
    competition
        .competitors
        .iter()
        .find(|c| c.home_away == home_away)
        .ok_or(FeedError::MissingField("competitors"))
}

fn score_of(competitor: &Competitor) -> Result<i32, FeedError> {
    competitor
        .score
        .as_deref()
        .and_then(|s| s.trim().parse().ok())
        .ok_or(FeedError::MissingField("score"))
}

fn state_of(competition: &Competition) -> Result<GameState, FeedError> {
    let status = status_of(competition);
    if status == GameStatus::Scheduled {
        return Ok(GameState {
            status,
            home_score: None,
            away_score: None,
        });
    }
    Ok(GameState {
        status,
        home_score: Some(score_of(side(competition, "home")?)?),
        away_score: Some(score_of(side(competition, "away")?)?),
    })
}

fn team_of(competitor: &Competitor) -> Result<FeedTeam, FeedError> {
    let team = competitor.team.as_ref().ok_or(FeedError::MissingField("team"))?;
    Ok(FeedTeam {
        espn_id: team.id.clone(),
        abbreviation: team.abbreviation.clone(),
        name: team.display_name.clone(),
    })
}

/// Scoreboard dates come as `2025-09-07T17:00Z`, without seconds.
fn parse_kickoff(date: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(date)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%MZ").map(|dt| dt.and_utc()))
        .ok()
}

pub(crate) fn parse_summary(url: &str, body: &str) -> Result<GameState, FeedError> {
    let summary: Summary = decode(url, body)?;
    let competition = summary
        .header
        .as_ref()
        .and_then(|h| h.competitions.first())
        .ok_or(FeedError::MissingField("header.competitions"))?;
    state_of(competition)
}

pub(crate) fn parse_scoreboard(url: &str, body: &str) -> Result<Vec<ScheduledGame>, FeedError> {
    let board: Scoreboard = decode(url, body)?;
    let mut games = Vec::with_capacity(board.events.len());
    for event in &board.events {
        let Some(competition) = event.competitions.first() else {
            debug!(event_id = %event.id, "skipping event without competitions");
            continue;
        };
        let start_time = parse_kickoff(&event.date).ok_or(FeedError::MissingField("date"))?;
        games.push(ScheduledGame {
            espn_id: event.id.clone(),
            start_time,
            home: team_of(side(competition, "home")?)?,
            away: team_of(side(competition, "away")?)?,
            state: state_of(competition)?,
        });
    }
    Ok(games)
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct EspnFeed {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl EspnFeed {
    pub fn new(config: &FeedConfig, retry: RetryPolicy) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<(String, String), FeedError> {
        let url = format!("{}/{path}", self.base_url);
        let target = &url;
        let body = self
            .retry
            .run(path, || async move {
                let http_err = |source| FeedError::Http {
                    url: target.clone(),
                    source,
                };
                let response = self
                    .http
                    .get(target)
                    .query(query)
                    .send()
                    .await
                    .map_err(http_err)?;

                let status = response.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok())
                        .map(Duration::from_secs);
                    return Err(FeedError::RateLimited {
                        url: target.clone(),
                        retry_after,
                    });
                }
                if !status.is_success() {
                    return Err(FeedError::Status {
                        url: target.clone(),
                        status: status.as_u16(),
                    });
                }
                response.text().await.map_err(http_err)
            })
            .await?;
        Ok((url, body))
    }
}

#[async_trait]
impl ScoreFeed for EspnFeed {
    async fn game_state(&self, espn_id: &str) -> Result<GameState, FeedError> {
        let (url, body) = self
            .get("summary", &[("event", espn_id.to_string())])
            .await?;
        parse_summary(&url, &body)
    }

    async fn week_schedule(
        &self,
        year: i32,
        season_type: u8,
        week: Week,
    ) -> Result<Vec<ScheduledGame>, FeedError> {
        let (url, body) = self
            .get(
                "scoreboard",
                &[
                    ("dates", year.to_string()),
                    ("seasontype", season_type.to_string()),
                    ("week", week.to_string()),
                ],
            )
            .await?;
        parse_scoreboard(&url, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "https://feed/summary";

    fn summary(state: &str, completed: bool, home: &str, away: &str) -> String {
        format!(
            r#"{{
                "header": {{
                    "id": "401671789",
                    "competitions": [{{
                        "status": {{"type": {{"state": "{state}", "completed": {completed}}}}},
                        "competitors": [
                            {{"homeAway": "home", "score": "{home}", "team": {{"id": "12", "abbreviation": "KC", "displayName": "Kansas City Chiefs"}}}},
                            {{"homeAway": "away", "score": "{away}", "team": {{"id": "2", "abbreviation": "BUF", "displayName": "Buffalo Bills"}}}}
                        ]
                    }}]
                }}
            }}"#
        )
    }

    #[test]
    fn final_summary_has_scores() {
        let state = parse_summary(URL, &summary("post", true, "24", "17")).unwrap();
        assert_eq!(
            state,
            GameState {
                status: GameStatus::Final,
                home_score: Some(24),
                away_score: Some(17),
            }
        );
    }

    #[test]
    fn live_summary_is_in_progress() {
        let state = parse_summary(URL, &summary("in", false, "7", "3")).unwrap();
        assert_eq!(state.status, GameStatus::InProgress);
        assert_eq!(state.home_score, Some(7));
    }

    #[test]
    fn pregame_and_postponed_stay_scheduled() {
        for (state, completed) in [("pre", false), ("post", false)] {
            let parsed = parse_summary(URL, &summary(state, completed, "0", "0")).unwrap();
            assert_eq!(parsed.status, GameStatus::Scheduled);
            assert_eq!(parsed.home_score, None);
        }
    }

    #[test]
    fn missing_header_is_an_error() {
        let err = parse_summary(URL, r#"{"boxscore": {}}"#).unwrap_err();
        assert!(matches!(err, FeedError::MissingField("header.competitions")));
        assert!(!err.is_transient());
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let err = parse_summary(URL, "<html>").unwrap_err();
        assert!(matches!(err, FeedError::Decode { .. }));
    }

    #[test]
    fn scoreboard_lists_games_with_teams() {
        let body = r#"{
            "events": [
                {
                    "id": "401671789",
                    "date": "2025-09-07T17:00Z",
                    "competitions": [{
                        "status": {"type": {"state": "pre", "completed": false}},
                        "competitors": [
                            {"homeAway": "home", "score": "0", "team": {"id": "12", "abbreviation": "KC", "displayName": "Kansas City Chiefs"}},
                            {"homeAway": "away", "score": "0", "team": {"id": "2", "abbreviation": "BUF", "displayName": "Buffalo Bills"}}
                        ]
                    }]
                },
                {"id": "401671790", "date": "2025-09-07T20:25Z", "competitions": []}
            ]
        }"#;

        let games = parse_scoreboard(URL, body).unwrap();
        assert_eq!(games.len(), 1);
        let game = &games[0];
        assert_eq!(game.espn_id, "401671789");
        assert_eq!(game.start_time, Utc.with_ymd_and_hms(2025, 9, 7, 17, 0, 0).unwrap());
        assert_eq!(game.home.abbreviation, "KC");
        assert_eq!(game.away.espn_id, "2");
        assert_eq!(game.state.status, GameStatus::Scheduled);
    }

    #[test]
    fn empty_scoreboard_is_fine() {
        assert!(parse_scoreboard(URL, r#"{"events": []}"#).unwrap().is_empty());
        assert!(parse_scoreboard(URL, "{}").unwrap().is_empty());
    }

    #[test]
    fn kickoff_accepts_both_date_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 9, 5, 0, 20, 0).unwrap();
        assert_eq!(parse_kickoff("2025-09-05T00:20Z"), Some(expected));
        assert_eq!(parse_kickoff("2025-09-05T00:20:00Z"), Some(expected));
        assert_eq!(parse_kickoff("next sunday"), None);
    }
}
