pub mod game;
pub mod member;
pub mod pick;
pub mod season;

pub use game::{FinalScore, Game, GameId, GameStatus, Team, TeamId};
pub use member::{Group, GroupId, Membership, User, UserId};
pub use pick::{NewPick, Outcome, Pick, PickId, PickResult, Scope};
pub use season::{Season, SeasonId, Week, WeekKind};
