pub mod admin;
pub mod validator;

pub use admin::{AdminAction, AdminError, AdminOverride};
pub use validator::{validate, Candidate, PickContext, PickPlan, PriorPick, Rejection, Verdict};
