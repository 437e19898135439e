//! Meetings: invitations, weekly pairings and the matching engine.

pub mod matching;
pub mod model;
pub mod planner;

pub use matching::{Arrangement, Cohort, Profile};
pub use model::{CancelReason, FailureReason, Invitation, Meeting, Side, SideFeedback};
pub use planner::Matchmaker;
