//! Participant profile and audit data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

/// Whether the participant works alone or with colleagues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationKind {
    Individual,
    Team,
}

/// How often the participant wants to meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingFrequency {
    /// Twice a week.
    High,
    /// Once a week.
    Medium,
    /// Every other week.
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingMotivation {
    Dating,
    Networking,
    Fun,
}

impl Gender {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Self::Male),
            "F" => Some(Self::Female),
            _ => None,
        }
    }
}

impl ParticipationKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Individual => "I",
            Self::Team => "T",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(Self::Individual),
            "T" => Some(Self::Team),
            _ => None,
        }
    }
}

impl MeetingFrequency {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::High => "H",
            Self::Medium => "M",
            Self::Low => "L",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "H" => Some(Self::High),
            "M" => Some(Self::Medium),
            "L" => Some(Self::Low),
            _ => None,
        }
    }
}

impl MeetingMotivation {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Dating => "D",
            Self::Networking => "N",
            Self::Fun => "HF",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "D" => Some(Self::Dating),
            "N" => Some(Self::Networking),
            "HF" => Some(Self::Fun),
            _ => None,
        }
    }
}

/// A community member known to the bot.
///
/// Created on first contact, edited through the dialog, never hard-deleted:
/// `enabled = false` takes a participant out of invitations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable chat identity (the Telegram user id).
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    /// Chat handle, empty when the participant has none.
    pub username: String,
    pub phone_number: String,
    pub gender: Option<Gender>,
    pub kind: Option<ParticipationKind>,
    /// Affiliation; `None` means unaffiliated.
    pub group: Option<String>,
    pub bio: String,
    pub meeting_frequency: Option<MeetingFrequency>,
    pub meeting_motivation: Option<MeetingMotivation>,
    pub enabled: bool,
    pub first_seen_at: DateTime<Utc>,
    pub registered_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: &str, first_name: &str, last_name: &str, username: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            username: username.to_string(),
            phone_number: String::new(),
            gender: None,
            kind: None,
            group: None,
            bio: String::new(),
            meeting_frequency: None,
            meeting_motivation: None,
            enabled: true,
            first_seen_at: now,
            registered_at: None,
            last_seen_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// Affiliation name, empty when unaffiliated.
    pub fn group_name(&self) -> &str {
        self.group.as_deref().unwrap_or("")
    }

    pub fn is_registered(&self) -> bool {
        self.registered_at.is_some()
    }
}

/// A named affiliation (company, team) participants can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Free-text note about the service. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub participant_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(participant_id: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id: participant_id.to_string(),
            text: text.to_string(),
            sent_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// One line of the chat audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLogEntry {
    pub id: Uuid,
    pub participant_id: String,
    pub direction: Direction,
    pub text: String,
    pub delivery_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl MessageLogEntry {
    pub fn new(participant_id: &str, direction: Direction, text: &str, delivery_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id: participant_id.to_string(),
            direction,
            text: text.to_string(),
            delivery_id: delivery_id.map(String::from),
            sent_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenderCounts {
    pub male: usize,
    pub female: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrequencyCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MotivationCounts {
    pub dating: usize,
    pub networking: usize,
    pub fun: usize,
}

/// Profile breakdown over registered participants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileStatistics {
    pub gender: GenderCounts,
    pub frequency: FrequencyCounts,
    pub motivation: MotivationCounts,
}

impl ProfileStatistics {
    pub fn from_participants<'a>(participants: impl IntoIterator<Item = &'a Participant>) -> Self {
        let mut stats = Self::default();
        for p in participants.into_iter().filter(|p| p.is_registered()) {
            match p.gender {
                Some(Gender::Male) => stats.gender.male += 1,
                Some(Gender::Female) => stats.gender.female += 1,
                None => {}
            }
            match p.meeting_frequency {
                Some(MeetingFrequency::High) => stats.frequency.high += 1,
                Some(MeetingFrequency::Medium) => stats.frequency.medium += 1,
                Some(MeetingFrequency::Low) => stats.frequency.low += 1,
                None => {}
            }
            match p.meeting_motivation {
                Some(MeetingMotivation::Dating) => stats.motivation.dating += 1,
                Some(MeetingMotivation::Networking) => stats.motivation.networking += 1,
                Some(MeetingMotivation::Fun) => stats.motivation.fun += 1,
                None => {}
            }
        }
        stats
    }
}
