// SQLite persistence layer for seasons, games, members, picks, and standings.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::league::member::generate_invite_code;
use crate::league::{
    Game, GameId, GameStatus, Group, GroupId, Membership, NewPick, Outcome, Pick, PickId,
    PickResult, Scope, Season, SeasonId, Team, TeamId, User, UserId, Week,
};
use crate::rules::admin::AdminAction;
use crate::stats::awards::{Award, SeasonWinner};
use crate::stats::eligibility::SnapshotRow;

const SEASON_COLUMNS: &str =
    "id, year, name, regular_season_weeks, playoff_weeks, is_current, is_complete";
const GAME_COLUMNS: &str = "id, season_id, week, home_team_id, away_team_id, start_time, \
     status, home_score, away_score, espn_id, scored_at";
const PICK_COLUMNS: &str = "id, user_id, game_id, season_id, week, group_id, team_id, \
     is_correct, points_earned, tiebreaker_points, scored_at, created_at, updated_at";
const USER_COLUMNS: &str = "id, username, picks_are_global, is_admin";
const GROUP_COLUMNS: &str = "id, name, created_by, invite_code, is_active, max_members";

/// A game row as written by schedule sync. Upserted by `espn_id` when present.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGame {
    pub season_id: SeasonId,
    pub week: Week,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub start_time: DateTime<Utc>,
    pub espn_id: Option<String>,
}

/// Outcome of a pick write. `Conflict` means a storage uniqueness guard
/// rejected the row (a concurrent submission got there first).
#[derive(Debug, Clone, PartialEq)]
pub enum PickWrite {
    Saved(Pick),
    Conflict,
}

/// SQLite-backed persistence for the whole league.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS seasons (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                year                 INTEGER NOT NULL UNIQUE,
                name                 TEXT NOT NULL,
                regular_season_weeks INTEGER NOT NULL,
                playoff_weeks        INTEGER NOT NULL,
                is_current           INTEGER NOT NULL DEFAULT 0,
                is_complete          INTEGER NOT NULL DEFAULT 0
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_seasons_one_current
                ON seasons(is_current) WHERE is_current = 1;

            CREATE TABLE IF NOT EXISTS teams (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                abbreviation TEXT NOT NULL UNIQUE,
                name         TEXT NOT NULL,
                espn_id      TEXT UNIQUE
            );

            CREATE TABLE IF NOT EXISTS games (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id    INTEGER NOT NULL REFERENCES seasons(id),
                week         INTEGER NOT NULL,
                home_team_id INTEGER NOT NULL REFERENCES teams(id),
                away_team_id INTEGER NOT NULL REFERENCES teams(id),
                start_time   TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'scheduled'
                             CHECK (status IN ('scheduled', 'in_progress', 'final')),
                home_score   INTEGER,
                away_score   INTEGER,
                espn_id      TEXT UNIQUE,
                scored_at    TEXT,
                updated_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
                CHECK (home_team_id != away_team_id)
            );
            CREATE INDEX IF NOT EXISTS idx_games_season_week ON games(season_id, week);

            CREATE TABLE IF NOT EXISTS users (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                username         TEXT NOT NULL UNIQUE,
                picks_are_global INTEGER NOT NULL DEFAULT 1,
                is_admin         INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS league_groups (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                created_by  INTEGER NOT NULL REFERENCES users(id),
                invite_code TEXT NOT NULL UNIQUE,
                is_active   INTEGER NOT NULL DEFAULT 1,
                max_members INTEGER NOT NULL DEFAULT 50,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS group_members (
                group_id  INTEGER NOT NULL REFERENCES league_groups(id),
                user_id   INTEGER NOT NULL REFERENCES users(id),
                is_admin  INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                joined_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
                PRIMARY KEY (group_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS picks (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id           INTEGER NOT NULL REFERENCES users(id),
                game_id           INTEGER NOT NULL REFERENCES games(id),
                season_id         INTEGER NOT NULL REFERENCES seasons(id),
                week              INTEGER NOT NULL,
                group_id          INTEGER REFERENCES league_groups(id),
                team_id           INTEGER NOT NULL REFERENCES teams(id),
                is_correct        INTEGER,
                points_earned     REAL NOT NULL DEFAULT 0,
                tiebreaker_points INTEGER NOT NULL DEFAULT 0,
                scored_at         TEXT,
                created_at        TEXT NOT NULL,
                updated_at        TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_picks_user_game_scope
                ON picks(user_id, game_id, IFNULL(group_id, 0));
            CREATE UNIQUE INDEX IF NOT EXISTS idx_picks_user_week_scope
                ON picks(user_id, season_id, week, IFNULL(group_id, 0));
            CREATE INDEX IF NOT EXISTS idx_picks_game ON picks(game_id);

            CREATE TABLE IF NOT EXISTS standings_snapshots (
                season_id           INTEGER NOT NULL REFERENCES seasons(id),
                user_id             INTEGER NOT NULL REFERENCES users(id),
                group_id            INTEGER REFERENCES league_groups(id),
                final_rank          INTEGER NOT NULL,
                wins                INTEGER NOT NULL,
                losses              INTEGER NOT NULL,
                ties                INTEGER NOT NULL,
                total_score         REAL NOT NULL,
                tiebreaker          INTEGER NOT NULL,
                accuracy            REAL NOT NULL,
                is_playoff_eligible INTEGER NOT NULL,
                is_final_eligible   INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshots_user_scope
                ON standings_snapshots(season_id, user_id, IFNULL(group_id, 0));

            CREATE TABLE IF NOT EXISTS season_winners (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id   INTEGER NOT NULL REFERENCES seasons(id),
                user_id     INTEGER NOT NULL REFERENCES users(id),
                group_id    INTEGER REFERENCES league_groups(id),
                award       TEXT NOT NULL CHECK (award IN ('champion', 'runner_up', 'third_place')),
                total_score REAL NOT NULL,
                tiebreaker  INTEGER NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_winners_award
                ON season_winners(season_id, IFNULL(group_id, 0), award);

            CREATE TABLE IF NOT EXISTS admin_actions (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                admin_user_id  INTEGER NOT NULL REFERENCES users(id),
                target_user_id INTEGER REFERENCES users(id),
                group_id       INTEGER,
                action_type    TEXT NOT NULL,
                description    TEXT NOT NULL,
                pick_id        INTEGER,
                game_id        INTEGER,
                season_id      INTEGER,
                metadata       TEXT,
                created_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS sync_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Seasons
    // ------------------------------------------------------------------

    /// Insert a season, or refresh the structure of the season with the same
    /// year. Returns the stored season.
    pub fn upsert_season(&self, season: &Season) -> Result<Season> {
        let conn = self.conn();
        let id: SeasonId = conn
            .query_row(
                "INSERT INTO seasons (year, name, regular_season_weeks, playoff_weeks)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(year) DO UPDATE SET
                    name                 = excluded.name,
                    regular_season_weeks = excluded.regular_season_weeks,
                    playoff_weeks        = excluded.playoff_weeks
                 RETURNING id",
                params![
                    season.year,
                    season.name,
                    season.regular_season_weeks,
                    season.playoff_weeks
                ],
                |row| row.get(0),
            )
            .context("failed to upsert season")?;
        drop(conn);
        self.season(id)?
            .with_context(|| format!("season {id} vanished after upsert"))
    }

    /// Make `season_id` the one current season.
    pub fn set_current_season(&self, season_id: SeasonId) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute("UPDATE seasons SET is_current = 0 WHERE is_current = 1", [])
            .context("failed to clear current season")?;
        let updated = tx
            .execute(
                "UPDATE seasons SET is_current = 1 WHERE id = ?1",
                params![season_id],
            )
            .context("failed to set current season")?;
        anyhow::ensure!(updated == 1, "season {season_id} does not exist");
        tx.commit().context("failed to commit set_current_season")?;
        Ok(())
    }

    pub fn current_season(&self) -> Result<Option<Season>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SEASON_COLUMNS} FROM seasons WHERE is_current = 1"),
            [],
            season_from_row,
        )
        .optional()
        .context("failed to load current season")
    }

    pub fn season(&self, season_id: SeasonId) -> Result<Option<Season>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SEASON_COLUMNS} FROM seasons WHERE id = ?1"),
            params![season_id],
            season_from_row,
        )
        .optional()
        .context("failed to load season")
    }

    pub fn mark_season_complete(&self, season_id: SeasonId) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE seasons SET is_complete = 1 WHERE id = ?1",
            params![season_id],
        )
        .context("failed to mark season complete")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Teams
    // ------------------------------------------------------------------

    /// Insert a team or update it when the abbreviation already exists.
    /// An existing ESPN id is kept when none is supplied.
    pub fn upsert_team(
        &self,
        abbreviation: &str,
        name: &str,
        espn_id: Option<&str>,
    ) -> Result<TeamId> {
        let conn = self.conn();
        conn.query_row(
            "INSERT INTO teams (abbreviation, name, espn_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(abbreviation) DO UPDATE SET
                name    = excluded.name,
                espn_id = COALESCE(excluded.espn_id, teams.espn_id)
             RETURNING id",
            params![abbreviation, name, espn_id],
            |row| row.get(0),
        )
        .context("failed to upsert team")
    }

    pub fn team(&self, team_id: TeamId) -> Result<Option<Team>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, abbreviation, name, espn_id FROM teams WHERE id = ?1",
            params![team_id],
            team_from_row,
        )
        .optional()
        .context("failed to load team")
    }

    // ------------------------------------------------------------------
    // Games
    // ------------------------------------------------------------------

    /// Insert a game, or reschedule the game with the same ESPN id. Status
    /// and scores are never touched here.
    pub fn upsert_game(&self, game: &NewGame) -> Result<GameId> {
        let conn = self.conn();
        conn.query_row(
            "INSERT INTO games (season_id, week, home_team_id, away_team_id, start_time, espn_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(espn_id) DO UPDATE SET
                week         = excluded.week,
                home_team_id = excluded.home_team_id,
                away_team_id = excluded.away_team_id,
                start_time   = excluded.start_time
             RETURNING id",
            params![
                game.season_id,
                game.week,
                game.home_team_id,
                game.away_team_id,
                ts(game.start_time),
                game.espn_id,
            ],
            |row| row.get(0),
        )
        .context("failed to upsert game")
    }

    pub fn game(&self, game_id: GameId) -> Result<Option<Game>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GAME_COLUMNS} FROM games WHERE id = ?1"),
            params![game_id],
            game_from_row,
        )
        .optional()
        .context("failed to load game")
    }

    pub fn games_in_week(&self, season_id: SeasonId, week: Week) -> Result<Vec<Game>> {
        self.query_games(
            "WHERE season_id = ?1 AND week = ?2 ORDER BY start_time, id",
            params![season_id, week],
        )
    }

    pub fn games_in_season(&self, season_id: SeasonId) -> Result<Vec<Game>> {
        self.query_games(
            "WHERE season_id = ?1 ORDER BY week, start_time, id",
            params![season_id],
        )
    }

    /// Non-final games with an upstream id whose kickoff has passed.
    pub fn games_due_for_poll(&self, season_id: SeasonId, now: DateTime<Utc>) -> Result<Vec<Game>> {
        self.query_games(
            "WHERE season_id = ?1 AND status != 'final' AND start_time <= ?2
               AND espn_id IS NOT NULL
             ORDER BY start_time, id",
            params![season_id, ts(now)],
        )
    }

    /// Final games whose picks have not been scored yet.
    pub fn unscored_final_games(&self, season_id: SeasonId) -> Result<Vec<Game>> {
        self.query_games(
            "WHERE season_id = ?1 AND status = 'final' AND scored_at IS NULL
             ORDER BY start_time, id",
            params![season_id],
        )
    }

    pub fn has_games_in_progress(&self, season_id: SeasonId) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM games WHERE season_id = ?1 AND status = 'in_progress')",
            params![season_id],
            |row| row.get(0),
        )
        .context("failed to check for in-progress games")
    }

    /// Store the latest status and scores reported for a game.
    pub fn update_game_state(
        &self,
        game_id: GameId,
        status: GameStatus,
        home_score: Option<i32>,
        away_score: Option<i32>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE games SET status = ?2, home_score = ?3, away_score = ?4,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
             WHERE id = ?1",
            params![game_id, status.as_str(), home_score, away_score],
        )
        .context("failed to update game state")?;
        Ok(())
    }

    /// Clear the scored marker so the next scoring pass recomputes the game.
    pub fn clear_game_scored(&self, game_id: GameId) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE games SET scored_at = NULL WHERE id = ?1",
            params![game_id],
        )
        .context("failed to clear game scored marker")?;
        Ok(())
    }

    /// Weeks in which every game is final.
    pub fn complete_weeks(&self, season_id: SeasonId) -> Result<BTreeSet<Week>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT week FROM games WHERE season_id = ?1
                 GROUP BY week HAVING SUM(status != 'final') = 0",
            )
            .context("failed to prepare complete_weeks query")?;
        let weeks = stmt
            .query_map(params![season_id], |row| row.get(0))
            .context("failed to query complete weeks")?
            .collect::<std::result::Result<BTreeSet<Week>, _>>()
            .context("failed to map complete week rows")?;
        Ok(weeks)
    }

    fn query_games(&self, clause: &str, params: impl rusqlite::Params) -> Result<Vec<Game>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {GAME_COLUMNS} FROM games {clause}"))
            .context("failed to prepare games query")?;
        let games = stmt
            .query_map(params, game_from_row)
            .context("failed to query games")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map game rows")?;
        Ok(games)
    }

    // ------------------------------------------------------------------
    // Users and groups
    // ------------------------------------------------------------------

    pub fn create_user(&self, username: &str, picks_are_global: bool, is_admin: bool) -> Result<User> {
        let conn = self.conn();
        let id: UserId = conn
            .query_row(
                "INSERT INTO users (username, picks_are_global, is_admin) VALUES (?1, ?2, ?3)
                 RETURNING id",
                params![username, picks_are_global, is_admin],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to create user {username}"))?;
        Ok(User {
            id,
            username: username.to_string(),
            picks_are_global,
            is_admin,
        })
    }

    pub fn user(&self, user_id: UserId) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![user_id],
            user_from_row,
        )
        .optional()
        .context("failed to load user")
    }

    /// Create a group with a fresh invite code; the creator joins as group admin.
    pub fn create_group(&self, name: &str, created_by: UserId, max_members: usize) -> Result<Group> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let invite_code = generate_invite_code();
        let id: GroupId = tx
            .query_row(
                "INSERT INTO league_groups (name, created_by, invite_code, max_members)
                 VALUES (?1, ?2, ?3, ?4) RETURNING id",
                params![name, created_by, invite_code, max_members],
                |row| row.get(0),
            )
            .context("failed to create group")?;
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, is_admin) VALUES (?1, ?2, 1)",
            params![id, created_by],
        )
        .context("failed to add group creator")?;
        tx.commit().context("failed to commit create_group")?;
        Ok(Group {
            id,
            name: name.to_string(),
            created_by,
            invite_code,
            is_active: true,
            max_members,
        })
    }

    pub fn group(&self, group_id: GroupId) -> Result<Option<Group>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM league_groups WHERE id = ?1"),
            params![group_id],
            group_from_row,
        )
        .optional()
        .context("failed to load group")
    }

    pub fn group_by_invite_code(&self, code: &str) -> Result<Option<Group>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM league_groups WHERE invite_code = ?1"),
            params![code.trim().to_ascii_uppercase()],
            group_from_row,
        )
        .optional()
        .context("failed to look up invite code")
    }

    pub fn active_groups(&self) -> Result<Vec<Group>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {GROUP_COLUMNS} FROM league_groups WHERE is_active = 1 ORDER BY id"
            ))
            .context("failed to prepare active_groups query")?;
        let groups = stmt
            .query_map([], group_from_row)
            .context("failed to query groups")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map group rows")?;
        Ok(groups)
    }

    /// Add (or reactivate) a member.
    pub fn add_member(&self, group_id: GroupId, user_id: UserId, is_admin: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO group_members (group_id, user_id, is_admin) VALUES (?1, ?2, ?3)
             ON CONFLICT(group_id, user_id) DO UPDATE SET is_active = 1",
            params![group_id, user_id, is_admin],
        )
        .context("failed to add group member")?;
        Ok(())
    }

    pub fn deactivate_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE group_members SET is_active = 0 WHERE group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
        )
        .context("failed to deactivate group member")?;
        Ok(())
    }

    pub fn membership(&self, group_id: GroupId, user_id: UserId) -> Result<Option<Membership>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT group_id, user_id, is_admin, is_active FROM group_members
             WHERE group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
            |row| {
                Ok(Membership {
                    group_id: row.get(0)?,
                    user_id: row.get(1)?,
                    is_admin: row.get(2)?,
                    is_active: row.get(3)?,
                })
            },
        )
        .optional()
        .context("failed to load membership")
    }

    pub fn active_admin_count(&self, group_id: GroupId) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM group_members
                 WHERE group_id = ?1 AND is_admin = 1 AND is_active = 1",
                params![group_id],
                |row| row.get(0),
            )
            .context("failed to count group admins")?;
        Ok(count as usize)
    }

    pub fn active_members(&self, group_id: GroupId) -> Result<Vec<User>> {
        self.query_users(
            "JOIN group_members m ON m.user_id = u.id
             WHERE m.group_id = ?1 AND m.is_active = 1 ORDER BY u.username",
            params![group_id],
        )
    }

    /// Users holding at least one global-scope pick in the season.
    pub fn global_pickers(&self, season_id: SeasonId) -> Result<Vec<User>> {
        self.query_users(
            "WHERE u.id IN (SELECT user_id FROM picks WHERE season_id = ?1 AND group_id IS NULL)
             ORDER BY u.username",
            params![season_id],
        )
    }

    fn query_users(&self, clause: &str, params: impl rusqlite::Params) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT u.id, u.username, u.picks_are_global, u.is_admin FROM users u {clause}"
            ))
            .context("failed to prepare users query")?;
        let users = stmt
            .query_map(params, user_from_row)
            .context("failed to query users")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map user rows")?;
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Picks
    // ------------------------------------------------------------------

    pub fn pick(&self, pick_id: PickId) -> Result<Option<Pick>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PICK_COLUMNS} FROM picks WHERE id = ?1"),
            params![pick_id],
            pick_from_row,
        )
        .optional()
        .context("failed to load pick")
    }

    /// A user's picks for a season within one scope, ordered by week.
    pub fn picks_for_user(&self, user_id: UserId, season_id: SeasonId, scope: Scope) -> Result<Vec<Pick>> {
        self.query_picks(
            "WHERE user_id = ?1 AND season_id = ?2 AND group_id IS ?3 ORDER BY week",
            params![user_id, season_id, scope.group_id()],
        )
    }

    pub fn pick_for_week(
        &self,
        user_id: UserId,
        season_id: SeasonId,
        week: Week,
        scope: Scope,
    ) -> Result<Option<Pick>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {PICK_COLUMNS} FROM picks
                 WHERE user_id = ?1 AND season_id = ?2 AND week = ?3 AND group_id IS ?4"
            ),
            params![user_id, season_id, week, scope.group_id()],
            pick_from_row,
        )
        .optional()
        .context("failed to load weekly pick")
    }

    pub fn picks_for_game(&self, game_id: GameId) -> Result<Vec<Pick>> {
        self.query_picks("WHERE game_id = ?1 ORDER BY id", params![game_id])
    }

    fn query_picks(&self, clause: &str, params: impl rusqlite::Params) -> Result<Vec<Pick>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {PICK_COLUMNS} FROM picks {clause}"))
            .context("failed to prepare picks query")?;
        let picks = stmt
            .query_map(params, pick_from_row)
            .context("failed to query picks")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map pick rows")?;
        Ok(picks)
    }

    /// Write a pick in one transaction. When `replaces` names the user's
    /// existing pick for the week, re-picking the same game updates the team
    /// in place; a different game deletes the old row first. Any uniqueness
    /// violation rolls back and yields `PickWrite::Conflict`.
    pub fn write_pick(
        &self,
        pick: &NewPick,
        replaces: Option<PickId>,
        now: DateTime<Utc>,
    ) -> Result<PickWrite> {
        self.write_pick_audited(pick, replaces, now, None)
    }

    /// Like [`Database::write_pick`], but also inserts `audit` (with its
    /// `pick_id` set to the saved pick) in the same transaction. A failed
    /// audit insert rolls the pick back.
    pub fn write_pick_with_audit(
        &self,
        pick: &NewPick,
        replaces: Option<PickId>,
        now: DateTime<Utc>,
        audit: &AdminAction,
    ) -> Result<PickWrite> {
        self.write_pick_audited(pick, replaces, now, Some(audit))
    }

    fn write_pick_audited(
        &self,
        pick: &NewPick,
        replaces: Option<PickId>,
        now: DateTime<Utc>,
        audit: Option<&AdminAction>,
    ) -> Result<PickWrite> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let now_ts = ts(now);

        let existing_game: Option<GameId> = match replaces {
            Some(id) => tx
                .query_row("SELECT game_id FROM picks WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()
                .context("failed to load replaced pick")?,
            None => None,
        };

        let written = match (replaces, existing_game) {
            (Some(id), Some(game_id)) if game_id == pick.game_id => tx.query_row(
                &format!(
                    "UPDATE picks SET team_id = ?2, is_correct = NULL, points_earned = 0,
                         tiebreaker_points = 0, scored_at = NULL, updated_at = ?3
                     WHERE id = ?1 RETURNING {PICK_COLUMNS}"
                ),
                params![id, pick.team_id, now_ts],
                pick_from_row,
            ),
            _ => {
                if let Some(id) = replaces {
                    tx.execute("DELETE FROM picks WHERE id = ?1", params![id])
                        .context("failed to delete replaced pick")?;
                }
                tx.query_row(
                    &format!(
                        "INSERT INTO picks (user_id, game_id, season_id, week, group_id, team_id,
                             created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) RETURNING {PICK_COLUMNS}"
                    ),
                    params![
                        pick.user_id,
                        pick.game_id,
                        pick.season_id,
                        pick.week,
                        pick.scope.group_id(),
                        pick.team_id,
                        now_ts,
                    ],
                    pick_from_row,
                )
            }
        };

        let saved = match written {
            Ok(saved) => saved,
            Err(e) if is_unique_violation(&e) => return Ok(PickWrite::Conflict),
            Err(e) => return Err(e).context("failed to write pick"),
        };
        if let Some(action) = audit {
            insert_admin_action(
                &tx,
                &AdminAction {
                    pick_id: Some(saved.id),
                    ..action.clone()
                },
            )?;
        }
        tx.commit().context("failed to commit pick")?;
        Ok(PickWrite::Saved(saved))
    }

    /// Stamp results on a game's picks and mark the game scored, all in one
    /// transaction.
    pub fn apply_pick_results(
        &self,
        game_id: GameId,
        results: &[(PickId, PickResult)],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin scoring transaction")?;
        let now_ts = ts(now);
        for (pick_id, result) in results {
            tx.execute(
                "UPDATE picks SET is_correct = ?2, points_earned = ?3, tiebreaker_points = ?4,
                     scored_at = ?5
                 WHERE id = ?1",
                params![
                    pick_id,
                    result.outcome.is_correct(),
                    result.points,
                    result.tiebreaker,
                    now_ts
                ],
            )
            .with_context(|| format!("failed to store result for pick {pick_id}"))?;
        }
        tx.execute(
            "UPDATE games SET scored_at = ?2 WHERE id = ?1",
            params![game_id, now_ts],
        )
        .context("failed to mark game scored")?;
        tx.commit().context("failed to commit scoring")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Standings snapshots
    // ------------------------------------------------------------------

    pub fn snapshot_exists(&self, season_id: SeasonId, scope: Scope) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM standings_snapshots WHERE season_id = ?1 AND group_id IS ?2)",
            params![season_id, scope.group_id()],
            |row| row.get(0),
        )
        .context("failed to check standings snapshot")
    }

    /// Store frozen standings. Rows already present are left untouched.
    pub fn save_snapshot(&self, season_id: SeasonId, scope: Scope, rows: &[SnapshotRow]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin snapshot transaction")?;
        for row in rows {
            tx.execute(
                "INSERT OR IGNORE INTO standings_snapshots
                    (season_id, user_id, group_id, final_rank, wins, losses, ties, total_score,
                     tiebreaker, accuracy, is_playoff_eligible, is_final_eligible)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    season_id,
                    row.user_id,
                    scope.group_id(),
                    row.final_rank,
                    row.wins,
                    row.losses,
                    row.ties,
                    row.total_score,
                    row.tiebreaker,
                    row.accuracy,
                    row.playoff_eligible,
                    row.final_eligible,
                ],
            )
            .context("failed to insert snapshot row")?;
        }
        tx.commit().context("failed to commit snapshot")?;
        Ok(())
    }

    pub fn load_snapshot(&self, season_id: SeasonId, scope: Scope) -> Result<Vec<SnapshotRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT user_id, final_rank, wins, losses, ties, total_score, tiebreaker,
                        accuracy, is_playoff_eligible, is_final_eligible
                 FROM standings_snapshots WHERE season_id = ?1 AND group_id IS ?2
                 ORDER BY final_rank",
            )
            .context("failed to prepare load_snapshot query")?;
        let rows = stmt
            .query_map(params![season_id, scope.group_id()], |row| {
                Ok(SnapshotRow {
                    user_id: row.get(0)?,
                    final_rank: row.get(1)?,
                    wins: row.get(2)?,
                    losses: row.get(3)?,
                    ties: row.get(4)?,
                    total_score: row.get(5)?,
                    tiebreaker: row.get(6)?,
                    accuracy: row.get(7)?,
                    playoff_eligible: row.get(8)?,
                    final_eligible: row.get(9)?,
                })
            })
            .context("failed to query standings snapshot")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map snapshot rows")?;
        Ok(rows)
    }

    /// Flag the finalists of a scope's snapshot.
    pub fn mark_finalists(&self, season_id: SeasonId, scope: Scope, users: &[UserId]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        for user_id in users {
            tx.execute(
                "UPDATE standings_snapshots SET is_final_eligible = 1
                 WHERE season_id = ?1 AND group_id IS ?2 AND user_id = ?3",
                params![season_id, scope.group_id(), user_id],
            )
            .context("failed to mark finalist")?;
        }
        tx.commit().context("failed to commit finalists")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Season winners
    // ------------------------------------------------------------------

    /// Record an award. Re-recording the same award for a scope is a no-op.
    pub fn record_winner(&self, winner: &SeasonWinner) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO season_winners
                (season_id, user_id, group_id, award, total_score, tiebreaker)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                winner.season_id,
                winner.user_id,
                winner.scope.group_id(),
                winner.award.as_str(),
                winner.total_score,
                winner.tiebreaker,
            ],
        )
        .context("failed to record season winner")?;
        Ok(())
    }

    pub fn season_winners(&self, season_id: SeasonId) -> Result<Vec<SeasonWinner>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT season_id, user_id, group_id, award, total_score, tiebreaker
                 FROM season_winners WHERE season_id = ?1
                 ORDER BY IFNULL(group_id, 0), id",
            )
            .context("failed to prepare season_winners query")?;
        let winners = stmt
            .query_map(params![season_id], |row| {
                let award: String = row.get(3)?;
                Ok(SeasonWinner {
                    season_id: row.get(0)?,
                    user_id: row.get(1)?,
                    scope: Scope::from_group_id(row.get(2)?),
                    award: Award::parse(&award).ok_or_else(|| {
                        conversion_error(3, format!("unknown award {award:?}"))
                    })?,
                    total_score: row.get(4)?,
                    tiebreaker: row.get(5)?,
                })
            })
            .context("failed to query season winners")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map season winner rows")?;
        Ok(winners)
    }

    // ------------------------------------------------------------------
    // Admin audit log
    // ------------------------------------------------------------------

    /// Audit rows concerning `target_user_id`, newest first.
    pub fn admin_actions_for(&self, target_user_id: UserId) -> Result<Vec<AdminAction>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT admin_user_id, target_user_id, group_id, action_type, description,
                        pick_id, game_id, season_id, metadata
                 FROM admin_actions WHERE target_user_id = ?1 ORDER BY id DESC",
            )
            .context("failed to prepare admin_actions query")?;
        let actions = stmt
            .query_map(params![target_user_id], |row| {
                let metadata: Option<String> = row.get(8)?;
                Ok(AdminAction {
                    admin_user_id: row.get(0)?,
                    target_user_id: row.get(1)?,
                    group_id: row.get(2)?,
                    action_type: row.get(3)?,
                    description: row.get(4)?,
                    pick_id: row.get(5)?,
                    game_id: row.get(6)?,
                    season_id: row.get(7)?,
                    metadata: metadata.and_then(|json| serde_json::from_str(&json).ok()),
                })
            })
            .context("failed to query admin actions")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map admin action rows")?;
        Ok(actions)
    }

    // ------------------------------------------------------------------
    // Key-value sync state
    // ------------------------------------------------------------------

    /// Persist an arbitrary JSON value under `key`. Uses INSERT OR REPLACE so
    /// repeated saves overwrite the previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str = serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query sync state")?;
        json_str
            .map(|s| serde_json::from_str(&s).context("failed to deserialize state value"))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

/// Timestamps are stored as second-precision RFC 3339 UTC text, which sorts
/// lexicographically.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_ts(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_ts(idx, &t)).transpose()
}

fn insert_admin_action(conn: &Connection, action: &AdminAction) -> Result<i64> {
    let metadata = action
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("failed to serialize admin action metadata")?;
    conn.query_row(
        "INSERT INTO admin_actions
            (admin_user_id, target_user_id, group_id, action_type, description,
             pick_id, game_id, season_id, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING id",
        params![
            action.admin_user_id,
            action.target_user_id,
            action.group_id,
            action.action_type,
            action.description,
            action.pick_id,
            action.game_id,
            action.season_id,
            metadata,
        ],
        |row| row.get(0),
    )
    .context("failed to log admin action")
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn season_from_row(row: &Row<'_>) -> rusqlite::Result<Season> {
    Ok(Season {
        id: row.get(0)?,
        year: row.get(1)?,
        name: row.get(2)?,
        regular_season_weeks: row.get(3)?,
        playoff_weeks: row.get(4)?,
        is_current: row.get(5)?,
        is_complete: row.get(6)?,
    })
}

fn team_from_row(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        abbreviation: row.get(1)?,
        name: row.get(2)?,
        espn_id: row.get(3)?,
    })
}

fn game_from_row(row: &Row<'_>) -> rusqlite::Result<Game> {
    let start: String = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(Game {
        id: row.get(0)?,
        season_id: row.get(1)?,
        week: row.get(2)?,
        home_team_id: row.get(3)?,
        away_team_id: row.get(4)?,
        start_time: parse_ts(5, &start)?,
        status: GameStatus::parse(&status)
            .ok_or_else(|| conversion_error(6, format!("unknown game status {status:?}")))?,
        home_score: row.get(7)?,
        away_score: row.get(8)?,
        espn_id: row.get(9)?,
        scored_at: opt_ts(row, 10)?,
    })
}

fn pick_from_row(row: &Row<'_>) -> rusqlite::Result<Pick> {
    let scored_at = opt_ts(row, 10)?;
    let result = match scored_at {
        Some(_) => Some(PickResult {
            outcome: Outcome::from_is_correct(row.get(7)?),
            points: row.get(8)?,
            tiebreaker: row.get(9)?,
        }),
        None => None,
    };
    let created: String = row.get(11)?;
    let updated: String = row.get(12)?;
    Ok(Pick {
        id: row.get(0)?,
        user_id: row.get(1)?,
        game_id: row.get(2)?,
        season_id: row.get(3)?,
        week: row.get(4)?,
        scope: Scope::from_group_id(row.get(5)?),
        team_id: row.get(6)?,
        result,
        created_at: parse_ts(11, &created)?,
        updated_at: parse_ts(12, &updated)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        picks_are_global: row.get(2)?,
        is_admin: row.get(3)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        created_by: row.get(2)?,
        invite_code: row.get(3)?,
        is_active: row.get(4)?,
        max_members: row.get(5)?,
    })
}
