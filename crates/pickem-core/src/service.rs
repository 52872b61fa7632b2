// League service: the entry point for every write (picks, game states,
// scoring, milestones) and every cached read (stats, leaderboards).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::LeagueConfig;
use crate::db::{Database, PickWrite};
use crate::events::{EventBus, LeagueEvent};
use crate::league::{
    GameId, GameStatus, Group, GroupId, NewPick, Pick, Scope, Season, SeasonId, TeamId, User,
    UserId, Week,
};
use crate::rules::admin::{AdminAction, AdminError, AdminOverride, PICK_OVERRIDE};
use crate::rules::validator::{
    self, Candidate, PickContext, PickPlan, PriorPick, Rejection, Verdict,
};
use crate::scoring::{self, ScoreReport};
use crate::stats::awards::awards_for;
use crate::stats::eligibility::{finalists, snapshot_rows, EligibilityTable};
use crate::stats::leaderboard::{rank_season, rank_week, LeaderboardEntry, WeekEntry};
use crate::stats::season::{self as season_stats, SeasonStats, StatsWindow};
use crate::stats::{Invalidation, StatsCache};

/// League-wide knobs the service needs at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeagueRules {
    pub playoff_qualifiers: usize,
    pub final_qualifiers: usize,
    pub max_group_members: usize,
}

impl From<&LeagueConfig> for LeagueRules {
    fn from(league: &LeagueConfig) -> Self {
        Self {
            playoff_qualifiers: league.playoff_qualifiers,
            final_qualifiers: league.final_qualifiers,
            max_group_members: league.max_group_members,
        }
    }
}

/// A user's selection, made inside a group or outside any group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickRequest {
    pub user_id: UserId,
    pub game_id: GameId,
    pub team_id: TeamId,
    pub group_id: Option<GroupId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Saved(Pick),
    Rejected(Rejection),
}

/// What `record_game_state` did with a reported state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameChange {
    pub game_id: GameId,
    pub week: Week,
    pub from: GameStatus,
    pub to: GameStatus,
    pub score_changed: bool,
    /// False when the report was a no-op or an ignored regression.
    pub applied: bool,
}

impl GameChange {
    pub fn became_final(&self) -> bool {
        self.applied && self.from != GameStatus::Final && self.to == GameStatus::Final
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(Group),
    AlreadyMember(Group),
    UnknownCode,
    GroupInactive,
    GroupFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    NotAMember,
    /// The user is the group's only active admin and must hand over first.
    LastAdmin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    /// Regular-season standings frozen for this many boards.
    RegularSeasonClosed { boards: usize },
    FinalistsDecided { boards: usize },
    SeasonCompleted { winners: usize },
}

pub struct LeagueService {
    db: Database,
    cache: StatsCache,
    events: EventBus,
    rules: LeagueRules,
}

impl LeagueService {
    pub fn new(db: Database, rules: LeagueRules) -> Self {
        Self {
            db,
            cache: StatsCache::new(),
            events: EventBus::new(),
            rules,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeagueEvent> {
        self.events.subscribe()
    }

    /// The one place cached stats are dropped after a write.
    fn invalidate(&self, what: Invalidation) {
        debug!(?what, "invalidating stats cache");
        self.cache.invalidate(what);
    }

    // ------------------------------------------------------------------
    // Seasons and groups
    // ------------------------------------------------------------------

    /// Store the configured season and make it current if no season is.
    pub fn ensure_season(&self, league: &LeagueConfig) -> Result<Season> {
        let season = self.db.upsert_season(&Season::from_config(league))?;
        if self.db.current_season()?.is_none() {
            self.db.set_current_season(season.id)?;
            info!(season_id = season.id, year = season.year, "set current season");
        }
        self.current_season()
    }

    pub fn current_season(&self) -> Result<Season> {
        self.db
            .current_season()?
            .context("no current season configured")
    }

    fn season(&self, season_id: SeasonId) -> Result<Season> {
        self.db
            .season(season_id)?
            .with_context(|| format!("season {season_id} not found"))
    }

    pub fn create_group(&self, name: &str, created_by: UserId) -> Result<Group> {
        let group = self
            .db
            .create_group(name, created_by, self.rules.max_group_members)?;
        info!(group_id = group.id, name, "created group");
        self.invalidate_current_boards()?;
        Ok(group)
    }

    pub fn join_group(&self, user_id: UserId, invite_code: &str) -> Result<JoinOutcome> {
        let Some(group) = self.db.group_by_invite_code(invite_code)? else {
            return Ok(JoinOutcome::UnknownCode);
        };
        if !group.is_active {
            return Ok(JoinOutcome::GroupInactive);
        }
        if self
            .db
            .membership(group.id, user_id)?
            .is_some_and(|m| m.is_active)
        {
            return Ok(JoinOutcome::AlreadyMember(group));
        }
        if self.db.active_members(group.id)?.len() >= group.max_members {
            return Ok(JoinOutcome::GroupFull);
        }
        self.db.add_member(group.id, user_id, false)?;
        info!(group_id = group.id, user_id, "user joined group");
        self.invalidate_current_boards()?;
        Ok(JoinOutcome::Joined(group))
    }

    pub fn leave_group(&self, user_id: UserId, group_id: GroupId) -> Result<LeaveOutcome> {
        let Some(membership) = self
            .db
            .membership(group_id, user_id)?
            .filter(|m| m.is_active)
        else {
            return Ok(LeaveOutcome::NotAMember);
        };
        if membership.is_admin && self.db.active_admin_count(group_id)? <= 1 {
            return Ok(LeaveOutcome::LastAdmin);
        }
        self.db.deactivate_member(group_id, user_id)?;
        info!(group_id, user_id, "user left group");
        self.invalidate_current_boards()?;
        Ok(LeaveOutcome::Left)
    }

    fn invalidate_current_boards(&self) -> Result<()> {
        if let Some(season) = self.db.current_season()? {
            self.invalidate(Invalidation::Season(season.id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Picks
    // ------------------------------------------------------------------

    /// Check a selection against the league rules without writing anything.
    pub fn validate_pick(&self, request: &PickRequest, now: DateTime<Utc>) -> Result<Verdict> {
        let season = self.current_season()?;
        let Some(user) = self.db.user(request.user_id)? else {
            return Ok(Verdict::Rejected(Rejection::UnknownUser));
        };
        let Some(game) = self.db.game(request.game_id)? else {
            return Ok(Verdict::Rejected(Rejection::GameNotFound));
        };
        if let Some(group_id) = request.group_id {
            let active = self
                .db
                .membership(group_id, user.id)?
                .is_some_and(|m| m.is_active);
            if !active {
                return Ok(Verdict::Rejected(Rejection::NotAMember));
            }
        }

        let scope = Scope::for_user(&user, request.group_id);
        let history = self.history(user.id, season.id, scope)?;
        let eligibility = self.eligibility(&season, scope)?.status(user.id, game.week);

        Ok(validator::validate(
            Candidate {
                user_id: user.id,
                team_id: request.team_id,
                scope,
            },
            &PickContext {
                season: &season,
                game: &game,
                history: &history,
                eligibility,
                now,
            },
        ))
    }

    /// Validate and store a pick. A storage uniqueness violation (a
    /// concurrent submission for the same week) comes back as
    /// `Rejection::AlreadyPicked`.
    pub fn submit_pick(&self, request: &PickRequest, now: DateTime<Utc>) -> Result<Submission> {
        match self.validate_pick(request, now)? {
            Verdict::Valid(plan) => self.write_plan(&plan, now),
            Verdict::Rejected(rejection) => {
                debug!(
                    user_id = request.user_id,
                    game_id = request.game_id,
                    %rejection,
                    "pick rejected"
                );
                Ok(Submission::Rejected(rejection))
            }
        }
    }

    /// Store a pick for another user, bypassing the league rules. Integrity
    /// checks and storage constraints still apply, and the audit row is
    /// written in the same transaction as the pick. Group admins reach only
    /// active members of their group whose picks are scoped to it.
    pub fn submit_pick_as_admin(
        &self,
        auth: &AdminOverride,
        request: &PickRequest,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Submission> {
        if !auth.covers(request.group_id) {
            return Err(AdminError::NotAuthorized {
                admin: auth.admin().id,
                group: request.group_id,
            }
            .into());
        }

        let season = self.current_season()?;
        let Some(target) = self.db.user(request.user_id)? else {
            return Ok(Submission::Rejected(Rejection::UnknownUser));
        };
        let scope = Scope::for_user(&target, request.group_id);
        if let Some(group_id) = request.group_id {
            let member = self
                .db
                .membership(group_id, target.id)?
                .is_some_and(|m| m.is_active);
            if !member {
                return Err(AdminError::TargetOutsideGroup {
                    target: target.id,
                    group: group_id,
                }
                .into());
            }
            // Global picks are site-admin only.
            if !auth.is_site_admin() && scope != Scope::Group(group_id) {
                return Err(AdminError::TargetPicksGlobally {
                    target: target.id,
                    group: group_id,
                }
                .into());
            }
        }

        let Some(game) = self.db.game(request.game_id)? else {
            return Ok(Submission::Rejected(Rejection::GameNotFound));
        };
        if let Some(rejection) = validator::check_integrity(&season, &game, request.team_id) {
            return Ok(Submission::Rejected(rejection));
        }

        let current = self
            .db
            .pick_for_week(target.id, season.id, game.week, scope)?;
        let plan = PickPlan {
            pick: NewPick {
                user_id: target.id,
                game_id: game.id,
                season_id: season.id,
                week: game.week,
                scope,
                team_id: request.team_id,
            },
            replaces: current.as_ref().map(|p| p.id),
        };

        let audit = AdminAction {
            admin_user_id: auth.admin().id,
            target_user_id: Some(target.id),
            group_id: request.group_id,
            action_type: PICK_OVERRIDE.to_string(),
            description: reason.to_string(),
            pick_id: None,
            game_id: Some(game.id),
            season_id: Some(season.id),
            metadata: Some(json!({
                "week": game.week,
                "team_id": request.team_id,
                "replaced_pick_id": current.as_ref().map(|p| p.id),
                "previous_team_id": current.as_ref().map(|p| p.team_id),
            })),
        };
        let written = self
            .db
            .write_pick_with_audit(&plan.pick, plan.replaces, now, &audit)?;
        let submission = self.finish_write(written, &plan, true);
        if let Submission::Saved(pick) = &submission {
            info!(
                admin_id = auth.admin().id,
                target_id = target.id,
                pick_id = pick.id,
                "admin pick override"
            );
        }
        Ok(submission)
    }

    fn write_plan(&self, plan: &PickPlan, now: DateTime<Utc>) -> Result<Submission> {
        let written = self.db.write_pick(&plan.pick, plan.replaces, now)?;
        Ok(self.finish_write(written, plan, false))
    }

    fn finish_write(&self, written: PickWrite, plan: &PickPlan, by_admin: bool) -> Submission {
        match written {
            PickWrite::Saved(pick) => {
                info!(
                    pick_id = pick.id,
                    user_id = pick.user_id,
                    week = pick.week,
                    scope = %pick.scope,
                    "pick saved"
                );
                self.invalidate(Invalidation::User {
                    user_id: pick.user_id,
                    season_id: pick.season_id,
                });
                self.events.publish(LeagueEvent::PickSubmitted {
                    pick_id: pick.id,
                    user_id: pick.user_id,
                    game_id: pick.game_id,
                    week: pick.week,
                    scope: pick.scope,
                    team_id: pick.team_id,
                    by_admin,
                });
                Submission::Saved(pick)
            }
            PickWrite::Conflict => {
                warn!(
                    user_id = plan.pick.user_id,
                    week = plan.pick.week,
                    "pick lost a concurrent write"
                );
                Submission::Rejected(Rejection::AlreadyPicked)
            }
        }
    }

    fn history(&self, user_id: UserId, season_id: SeasonId, scope: Scope) -> Result<Vec<PriorPick>> {
        self.db
            .picks_for_user(user_id, season_id, scope)?
            .into_iter()
            .map(|pick| {
                let game = self
                    .db
                    .game(pick.game_id)?
                    .with_context(|| format!("pick {} references missing game", pick.id))?;
                Ok(PriorPick { pick, game })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Games and scoring
    // ------------------------------------------------------------------

    /// Apply a reported status and score to a game. Status only moves
    /// forward; a regression is logged and ignored. A score change on a game
    /// already final clears its scored marker so it is rescored.
    pub fn record_game_state(
        &self,
        game_id: GameId,
        status: GameStatus,
        home_score: Option<i32>,
        away_score: Option<i32>,
    ) -> Result<GameChange> {
        let game = self
            .db
            .game(game_id)?
            .with_context(|| format!("game {game_id} not found"))?;
        let mut change = GameChange {
            game_id,
            week: game.week,
            from: game.status,
            to: status,
            score_changed: (home_score, away_score) != (game.home_score, game.away_score),
            applied: false,
        };

        if !game.status.can_advance_to(status) {
            warn!(game_id, from = %game.status, to = %status, "ignoring status regression");
            return Ok(change);
        }
        if status == game.status && !change.score_changed {
            return Ok(change);
        }

        self.db
            .update_game_state(game_id, status, home_score, away_score)?;
        change.applied = true;
        if game.is_final() && change.score_changed {
            self.db.clear_game_scored(game_id)?;
            info!(game_id, ?home_score, ?away_score, "final score corrected");
        }
        self.invalidate(Invalidation::Season(game.season_id));

        let event = if change.became_final() {
            info!(game_id, ?home_score, ?away_score, "game final");
            LeagueEvent::GameFinal {
                game_id,
                week: game.week,
                home_score,
                away_score,
            }
        } else {
            LeagueEvent::ScoreUpdated {
                game_id,
                status,
                home_score,
                away_score,
            }
        };
        self.events.publish(event);
        Ok(change)
    }

    /// Score every pick on a final game. Safe to repeat.
    pub fn score_game(&self, game_id: GameId, now: DateTime<Utc>) -> Result<ScoreReport> {
        let report = scoring::score_game(&self.db, game_id, now)?;
        self.invalidate(Invalidation::Season(report.season_id));
        for (pick, result) in &report.changed {
            self.events.publish(LeagueEvent::PickScored {
                pick_id: pick.id,
                user_id: pick.user_id,
                game_id: pick.game_id,
                scope: pick.scope,
                result: *result,
            });
        }
        Ok(report)
    }

    /// Score final games not yet marked scored.
    pub fn score_pending_games(&self, season_id: SeasonId, now: DateTime<Utc>) -> Result<Vec<ScoreReport>> {
        self.db
            .unscored_final_games(season_id)?
            .into_iter()
            .map(|game| self.score_game(game.id, now))
            .collect()
    }

    /// Rescore every final game of a season. Returns how many picks changed.
    pub fn rescore_season(&self, season_id: SeasonId, now: DateTime<Utc>) -> Result<usize> {
        let mut changed = 0;
        for game in self.db.games_in_season(season_id)? {
            if game.is_final() {
                changed += self.score_game(game.id, now)?.changed.len();
            }
        }
        info!(season_id, changed, "rescored season");
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Stats and leaderboards
    // ------------------------------------------------------------------

    /// Eligibility lookups backed by a scope's standings snapshot.
    pub fn eligibility(&self, season: &Season, scope: Scope) -> Result<EligibilityTable> {
        let rows = self.db.load_snapshot(season.id, scope)?;
        Ok(EligibilityTable::new(season, &rows))
    }

    pub fn season_stats(
        &self,
        user_id: UserId,
        season_id: SeasonId,
        scope: Scope,
        window: StatsWindow,
    ) -> Result<SeasonStats> {
        if let Some(stats) = self.cache.get_stats(user_id, season_id, scope, window) {
            return Ok(stats);
        }
        let generation = self.cache.generation(season_id);
        let season = self.season(season_id)?;
        let picks = self.db.picks_for_user(user_id, season_id, scope)?;
        let complete = self.db.complete_weeks(season_id)?;
        let table = self.eligibility(&season, scope)?;
        let stats = season_stats::compute(&season, window, user_id, &picks, &complete, &table);
        self.cache
            .put_stats(user_id, season_id, scope, window, generation, stats.clone());
        Ok(stats)
    }

    /// Ranked standings for the global board or one group's board.
    pub fn season_leaderboard(
        &self,
        season_id: SeasonId,
        board: Scope,
        window: StatsWindow,
    ) -> Result<Vec<LeaderboardEntry>> {
        if let Some(entries) = self.cache.get_board(season_id, board, window) {
            return Ok(entries);
        }
        let generation = self.cache.generation(season_id);
        let season = self.season(season_id)?;
        let table = self.eligibility(&season, board)?;
        let entries = self.compute_board(&season, board, window, &table)?;
        self.cache
            .put_board(season_id, board, window, generation, entries.clone());
        Ok(entries)
    }

    /// Points and margins for a single week, for users who picked that week.
    pub fn week_leaderboard(&self, season_id: SeasonId, board: Scope, week: Week) -> Result<Vec<WeekEntry>> {
        let mut entries = Vec::new();
        for (user, scope) in self.board_members(season_id, board)? {
            let Some(pick) = self.db.pick_for_week(user.id, season_id, week, scope)? else {
                continue;
            };
            entries.push(WeekEntry {
                rank: 0,
                user_id: user.id,
                username: user.username,
                team_id: pick.team_id,
                outcome: pick.outcome(),
                points: pick.result.map_or(0.0, |r| r.points),
                tiebreaker: pick.result.map_or(0, |r| r.tiebreaker),
            });
        }
        Ok(rank_week(entries))
    }

    /// Members of a board with the scope their picks live in.
    fn board_members(&self, season_id: SeasonId, board: Scope) -> Result<Vec<(User, Scope)>> {
        Ok(match board {
            Scope::Global => self
                .db
                .global_pickers(season_id)?
                .into_iter()
                .map(|user| (user, Scope::Global))
                .collect(),
            Scope::Group(group_id) => self
                .db
                .active_members(group_id)?
                .into_iter()
                .map(|user| {
                    let scope = Scope::for_user(&user, Some(group_id));
                    (user, scope)
                })
                .collect(),
        })
    }

    fn compute_board(
        &self,
        season: &Season,
        board: Scope,
        window: StatsWindow,
        table: &EligibilityTable,
    ) -> Result<Vec<LeaderboardEntry>> {
        let complete = self.db.complete_weeks(season.id)?;
        let mut rows = Vec::new();
        for (user, scope) in self.board_members(season.id, board)? {
            let picks = self.db.picks_for_user(user.id, season.id, scope)?;
            let stats = season_stats::compute(season, window, user.id, &picks, &complete, table);
            rows.push((user, stats));
        }
        Ok(rank_season(rows))
    }

    // ------------------------------------------------------------------
    // Season milestones
    // ------------------------------------------------------------------

    /// Freeze standings and hand out awards as weeks complete:
    /// regular season closed (playoff qualifiers), playoff rounds complete
    /// (finalists), final week complete (winners). Each step runs once.
    pub fn advance_milestones(&self, season_id: SeasonId) -> Result<Vec<Milestone>> {
        let season = self.season(season_id)?;
        if season.is_complete {
            return Ok(vec![]);
        }
        let complete = self.db.complete_weeks(season.id)?;
        let mut boards = vec![Scope::Global];
        boards.extend(self.db.active_groups()?.into_iter().map(|g| Scope::Group(g.id)));

        let mut reached = Vec::new();

        if complete.contains(&season.regular_season_weeks) {
            let unfrozen = EligibilityTable::unfrozen(&season);
            let mut frozen = 0;
            for &board in &boards {
                if self.db.snapshot_exists(season.id, board)? {
                    continue;
                }
                let standings =
                    self.compute_board(&season, board, StatsWindow::RegularSeason, &unfrozen)?;
                if standings.is_empty() {
                    continue;
                }
                let rows = snapshot_rows(&standings, self.rules.playoff_qualifiers);
                self.db.save_snapshot(season.id, board, &rows)?;
                frozen += 1;
            }
            if frozen > 0 {
                reached.push(Milestone::RegularSeasonClosed { boards: frozen });
            }
        }

        let rounds = season.playoff_rounds();
        if !rounds.is_empty() && rounds.clone().all(|week| complete.contains(&week)) {
            let mut decided = 0;
            for &board in &boards {
                let rows = self.db.load_snapshot(season.id, board)?;
                if rows.is_empty() || rows.iter().any(|r| r.final_eligible) {
                    continue;
                }
                let table = EligibilityTable::new(&season, &rows);
                let standings =
                    self.compute_board(&season, board, StatsWindow::PlayoffRounds, &table)?;
                let chosen = finalists(&standings, &table, self.rules.final_qualifiers);
                if chosen.is_empty() {
                    continue;
                }
                self.db.mark_finalists(season.id, board, &chosen)?;
                decided += 1;
            }
            if decided > 0 {
                reached.push(Milestone::FinalistsDecided { boards: decided });
            }
        }

        if complete.contains(&season.final_week()) {
            let mut winners = 0;
            for &board in &boards {
                let table = self.eligibility(&season, board)?;
                let standings = self.compute_board(&season, board, StatsWindow::FullSeason, &table)?;
                for winner in awards_for(season.id, board, &standings) {
                    self.db.record_winner(&winner)?;
                    winners += 1;
                }
            }
            self.db.mark_season_complete(season.id)?;
            self.events.publish(LeagueEvent::SeasonCompleted {
                season_id: season.id,
            });
            reached.push(Milestone::SeasonCompleted { winners });
        }

        if !reached.is_empty() {
            for milestone in &reached {
                info!(season_id, ?milestone, "season milestone reached");
            }
            self.invalidate(Invalidation::Season(season.id));
        }
        Ok(reached)
    }
}
