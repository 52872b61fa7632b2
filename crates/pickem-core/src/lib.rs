// Library root: league model, storage, pick rules, scoring, and stats.

pub mod config;
pub mod db;
pub mod events;
pub mod league;
pub mod rules;
pub mod scoring;
pub mod service;
pub mod stats;

pub use service::{
    GameChange, JoinOutcome, LeagueRules, LeagueService, LeaveOutcome, Milestone, PickRequest,
    Submission,
};
