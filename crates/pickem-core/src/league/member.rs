// Users, groups, and group membership.

use rand::Rng;
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type GroupId = i64;

const INVITE_CODE_LEN: usize = 8;
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// When set, the user's picks are shared across every group they belong to.
    pub picks_are_global: bool,
    /// Site administrator.
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub created_by: UserId,
    pub invite_code: String,
    pub is_active: bool,
    pub max_members: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub is_admin: bool,
    pub is_active: bool,
}

/// Random invite code without look-alike characters (no 0/O, 1/I).
pub fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}
