// Admin override: an authorized capability for picking on another user's
// behalf, plus the audit record every override leaves behind.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Database;
use crate::league::{GameId, GroupId, PickId, SeasonId, User, UserId};

pub const PICK_OVERRIDE: &str = "pick_override";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("unknown admin user {0}")]
    UnknownAdmin(UserId),

    #[error("group {0} does not exist")]
    UnknownGroup(GroupId),

    #[error("user {admin} may not act for others in group {group:?}")]
    NotAuthorized {
        admin: UserId,
        group: Option<GroupId>,
    },

    #[error("user {target} is not an active member of group {group}")]
    TargetOutsideGroup { target: UserId, group: GroupId },

    #[error("user {target} picks globally, outside the reach of group {group} admins")]
    TargetPicksGlobally { target: UserId, group: GroupId },
}

/// Proof that `admin` may act for other users within `group` (or anywhere,
/// for a site admin). Only obtainable through [`AdminOverride::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminOverride {
    admin: User,
    group_id: Option<GroupId>,
}

impl AdminOverride {
    /// Site admins may act in any scope; group admins only inside their
    /// active group.
    pub fn authorize(db: &Database, admin_id: UserId, group_id: Option<GroupId>) -> Result<Self> {
        let admin = db.user(admin_id)?.ok_or(AdminError::UnknownAdmin(admin_id))?;

        if let Some(group_id) = group_id {
            db.group(group_id)?.ok_or(AdminError::UnknownGroup(group_id))?;
        }

        let authorized = admin.is_admin
            || match group_id {
                Some(group_id) => db
                    .membership(group_id, admin_id)?
                    .is_some_and(|m| m.is_admin && m.is_active),
                None => false,
            };
        if !authorized {
            return Err(AdminError::NotAuthorized {
                admin: admin_id,
                group: group_id,
            }
            .into());
        }

        Ok(Self { admin, group_id })
    }

    pub fn admin(&self) -> &User {
        &self.admin
    }

    pub fn group_id(&self) -> Option<GroupId> {
        self.group_id
    }

    pub fn is_site_admin(&self) -> bool {
        self.admin.is_admin
    }

    /// Whether this override covers a request made in `group_id`.
    pub fn covers(&self, group_id: Option<GroupId>) -> bool {
        self.admin.is_admin || self.group_id == group_id
    }
}

/// One row of the admin audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAction {
    pub admin_user_id: UserId,
    pub target_user_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub action_type: String,
    pub description: String,
    pub pick_id: Option<PickId>,
    pub game_id: Option<GameId>,
    pub season_id: Option<SeasonId>,
    pub metadata: Option<serde_json::Value>,
}
