//! Participants: profiles, affiliations, feedback and the chat audit log.

pub mod model;

pub use model::{
    Direction, Feedback, Gender, Group, MeetingFrequency, MeetingMotivation, MessageLogEntry,
    Participant, ParticipationKind, ProfileStatistics,
};
