pub mod awards;
pub mod cache;
pub mod eligibility;
pub mod leaderboard;
pub mod season;

pub use awards::{Award, SeasonWinner};
pub use cache::{Invalidation, StatsCache};
pub use eligibility::{Eligibility, EligibilityTable, SnapshotRow};
pub use leaderboard::{LeaderboardEntry, WeekEntry};
pub use season::{SeasonStats, StatsWindow};
