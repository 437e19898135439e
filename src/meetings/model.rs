//! Invitation and meeting records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::YearWeek;

/// Why a participant declined an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    NoTime,
    NotInMood,
    NoInterest,
}

impl CancelReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::NoTime => "no_time",
            Self::NotInMood => "not_in_mood",
            Self::NoInterest => "no_interest",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "no_time" => Some(Self::NoTime),
            "not_in_mood" => Some(Self::NotInMood),
            "no_interest" => Some(Self::NoInterest),
            _ => None,
        }
    }
}

/// Why a planned meeting did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PartnerDidNotRespond,
    CouldNotAgree,
    ForceMajeure,
}

impl FailureReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::PartnerDidNotRespond => "partner_did_not_respond",
            Self::CouldNotAgree => "could_not_agree",
            Self::ForceMajeure => "force_majeure",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "partner_did_not_respond" => Some(Self::PartnerDidNotRespond),
            "could_not_agree" => Some(Self::CouldNotAgree),
            "force_majeure" => Some(Self::ForceMajeure),
            _ => None,
        }
    }
}

/// A participant's answer to "do you want to meet in week W?".
///
/// One row per (participant, year, week). `accepted == None` means the
/// participant has not decided yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub participant_id: String,
    pub week: YearWeek,
    pub accepted: Option<bool>,
    pub cancel_reason: Option<CancelReason>,
    /// How many times the prompt was delivered.
    pub send_count: u32,
    /// Delivery id of the most recent prompt.
    pub delivery_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub fn new(participant_id: &str, week: YearWeek) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            week,
            accepted: None,
            cancel_reason: None,
            send_count: 0,
            delivery_id: None,
            sent_at: None,
            decided_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn accept(&mut self) {
        self.accepted = Some(true);
        self.cancel_reason = None;
        self.decided_at = Some(Utc::now());
    }

    pub fn decline(&mut self) {
        self.accepted = Some(false);
        self.decided_at = Some(Utc::now());
    }

    pub fn reset_decision(&mut self) {
        self.accepted = None;
        self.cancel_reason = None;
    }

    pub fn record_delivery(&mut self, delivery_id: Option<String>) {
        self.delivery_id = delivery_id;
        self.sent_at = Some(Utc::now());
        self.send_count += 1;
    }
}

/// Which column pair of a meeting belongs to a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

/// Per-side meeting outcome as reported by one participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideFeedback {
    pub took_place: Option<bool>,
    pub happy: Option<bool>,
    pub failure_reason: Option<FailureReason>,
}

/// A pairing of two participants for one ISO week.
///
/// Pairs are unordered; which participant is `a` is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub week: YearWeek,
    pub participant_a: String,
    pub participant_b: String,
    pub a: SideFeedback,
    pub b: SideFeedback,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub broadcast_at: Option<DateTime<Utc>>,
}

impl Meeting {
    pub fn new(week: YearWeek, participant_a: &str, participant_b: &str) -> Self {
        let now = Utc::now();
        Self {
            week,
            participant_a: participant_a.to_string(),
            participant_b: participant_b.to_string(),
            a: SideFeedback::default(),
            b: SideFeedback::default(),
            created_at: now,
            updated_at: now,
            broadcast_at: None,
        }
    }

    pub fn involves(&self, participant_id: &str) -> bool {
        self.participant_a == participant_id || self.participant_b == participant_id
    }

    pub fn side_of(&self, participant_id: &str) -> Option<Side> {
        if self.participant_a == participant_id {
            Some(Side::A)
        } else if self.participant_b == participant_id {
            Some(Side::B)
        } else {
            None
        }
    }

    pub fn partner_of(&self, participant_id: &str) -> Option<&str> {
        match self.side_of(participant_id)? {
            Side::A => Some(&self.participant_b),
            Side::B => Some(&self.participant_a),
        }
    }

    pub fn feedback(&self, side: Side) -> &SideFeedback {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub fn feedback_mut(&mut self, side: Side) -> &mut SideFeedback {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }

    /// True when the participant has not said whether the meeting happened.
    pub fn is_unrated_by(&self, participant_id: &str) -> bool {
        self.side_of(participant_id)
            .is_some_and(|side| self.feedback(side).took_place.is_none())
    }

    /// Clear one participant's answers so feedback can be collected again.
    pub fn reset_feedback(&mut self, participant_id: &str) {
        if let Some(side) = self.side_of(participant_id) {
            *self.feedback_mut(side) = SideFeedback::default();
        }
    }

    /// Either side confirmed the meeting.
    pub fn took_place_aggregated(&self) -> bool {
        self.a.took_place == Some(true) || self.b.took_place == Some(true)
    }

    /// Either side was happy.
    pub fn was_ok_aggregated(&self) -> bool {
        self.a.happy == Some(true) || self.b.happy == Some(true)
    }
}
