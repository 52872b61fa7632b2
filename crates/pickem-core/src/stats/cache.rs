// Memoized stats and leaderboards, dropped through a single invalidation
// entry point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::league::{Scope, SeasonId, UserId};

use super::leaderboard::LeaderboardEntry;
use super::season::{SeasonStats, StatsWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StatsKey {
    user_id: UserId,
    season_id: SeasonId,
    scope: Scope,
    window: StatsWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BoardKey {
    season_id: SeasonId,
    board: Scope,
    window: StatsWindow,
}

/// What a write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// One user's picks changed: their stats and every board of the season.
    User { user_id: UserId, season_id: SeasonId },
    /// Results, game states, or standings changed for the whole season.
    Season(SeasonId),
}

#[derive(Debug, Default)]
struct Entries {
    stats: HashMap<StatsKey, SeasonStats>,
    boards: HashMap<BoardKey, Vec<LeaderboardEntry>>,
    /// Bumped by every invalidation touching the season.
    generations: HashMap<SeasonId, u64>,
}

impl Entries {
    fn generation(&self, season_id: SeasonId) -> u64 {
        self.generations.get(&season_id).copied().unwrap_or(0)
    }
}

/// Readers take a [`StatsCache::generation`] before loading rows and hand it
/// back on `put_*`; a value computed across an invalidation is discarded.
#[derive(Debug, Default)]
pub struct StatsCache {
    entries: Mutex<Entries>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().expect("stats cache mutex poisoned")
    }

    pub fn generation(&self, season_id: SeasonId) -> u64 {
        self.entries().generation(season_id)
    }

    pub fn get_stats(
        &self,
        user_id: UserId,
        season_id: SeasonId,
        scope: Scope,
        window: StatsWindow,
    ) -> Option<SeasonStats> {
        let key = StatsKey {
            user_id,
            season_id,
            scope,
            window,
        };
        self.entries().stats.get(&key).cloned()
    }

    /// Returns false when `generation` is stale and nothing was stored.
    pub fn put_stats(
        &self,
        user_id: UserId,
        season_id: SeasonId,
        scope: Scope,
        window: StatsWindow,
        generation: u64,
        stats: SeasonStats,
    ) -> bool {
        let mut entries = self.entries();
        if entries.generation(season_id) != generation {
            return false;
        }
        let key = StatsKey {
            user_id,
            season_id,
            scope,
            window,
        };
        entries.stats.insert(key, stats);
        true
    }

    pub fn get_board(&self, season_id: SeasonId, board: Scope, window: StatsWindow) -> Option<Vec<LeaderboardEntry>> {
        let key = BoardKey {
            season_id,
            board,
            window,
        };
        self.entries().boards.get(&key).cloned()
    }

    /// Returns false when `generation` is stale and nothing was stored.
    pub fn put_board(
        &self,
        season_id: SeasonId,
        board: Scope,
        window: StatsWindow,
        generation: u64,
        entries: Vec<LeaderboardEntry>,
    ) -> bool {
        let mut cache = self.entries();
        if cache.generation(season_id) != generation {
            return false;
        }
        let key = BoardKey {
            season_id,
            board,
            window,
        };
        cache.boards.insert(key, entries);
        true
    }

    pub fn invalidate(&self, what: Invalidation) {
        let mut entries = self.entries();
        let season = match what {
            Invalidation::User { user_id, season_id } => {
                entries
                    .stats
                    .retain(|k, _| !(k.user_id == user_id && k.season_id == season_id));
                season_id
            }
            Invalidation::Season(season_id) => {
                entries.stats.retain(|k, _| k.season_id != season_id);
                season_id
            }
        };
        entries.boards.retain(|k, _| k.season_id != season);
        *entries.generations.entry(season).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: f64) -> SeasonStats {
        SeasonStats {
            total_score: total,
            ..SeasonStats::default()
        }
    }

    #[test]
    fn user_invalidation_keeps_other_users() {
        let cache = StatsCache::new();
        cache.put_stats(1, 7, Scope::Global, StatsWindow::FullSeason, 0, stats(3.0));
        cache.put_stats(2, 7, Scope::Global, StatsWindow::FullSeason, 0, stats(4.0));
        cache.put_board(7, Scope::Global, StatsWindow::FullSeason, 0, vec![]);

        cache.invalidate(Invalidation::User {
            user_id: 1,
            season_id: 7,
        });

        assert!(cache.get_stats(1, 7, Scope::Global, StatsWindow::FullSeason).is_none());
        assert_eq!(
            cache.get_stats(2, 7, Scope::Global, StatsWindow::FullSeason),
            Some(stats(4.0))
        );
        assert!(cache.get_board(7, Scope::Global, StatsWindow::FullSeason).is_none());
    }

    #[test]
    fn season_invalidation_spares_other_seasons() {
        let cache = StatsCache::new();
        cache.put_stats(1, 7, Scope::Group(2), StatsWindow::RegularSeason, 0, stats(1.0));
        cache.put_stats(1, 8, Scope::Group(2), StatsWindow::RegularSeason, 0, stats(2.0));
        cache.put_board(8, Scope::Group(2), StatsWindow::RegularSeason, 0, vec![]);

        cache.invalidate(Invalidation::Season(7));

        assert!(cache.get_stats(1, 7, Scope::Group(2), StatsWindow::RegularSeason).is_none());
        assert!(cache.get_stats(1, 8, Scope::Group(2), StatsWindow::RegularSeason).is_some());
        assert!(cache.get_board(8, Scope::Group(2), StatsWindow::RegularSeason).is_some());
    }

    #[test]
    fn value_computed_across_an_invalidation_is_dropped() {
        let cache = StatsCache::new();
        let window = StatsWindow::FullSeason;

        // Reader misses and starts computing.
        assert!(cache.get_stats(1, 7, Scope::Global, window).is_none());
        let generation = cache.generation(7);

        // A result lands before the reader stores its value.
        cache.invalidate(Invalidation::Season(7));

        assert!(!cache.put_stats(1, 7, Scope::Global, window, generation, stats(1.0)));
        assert!(!cache.put_board(7, Scope::Global, window, generation, vec![]));
        assert!(cache.get_stats(1, 7, Scope::Global, window).is_none());
        assert!(cache.get_board(7, Scope::Global, window).is_none());

        // A fresh read stores normally.
        let generation = cache.generation(7);
        assert!(cache.put_stats(1, 7, Scope::Global, window, generation, stats(2.0)));
        assert_eq!(cache.get_stats(1, 7, Scope::Global, window), Some(stats(2.0)));
    }

    #[test]
    fn invalidating_one_season_keeps_anothers_generation() {
        let cache = StatsCache::new();
        let generation = cache.generation(8);
        cache.invalidate(Invalidation::User {
            user_id: 1,
            season_id: 7,
        });
        assert!(cache.put_stats(1, 8, Scope::Global, StatsWindow::FullSeason, generation, stats(1.0)));
    }
}
