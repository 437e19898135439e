//! Conversation states and their persisted form.
//!
//! A participant's dialog is always in exactly one [`DialogState`]. The
//! stored record is a [`StateContext`]: the variant name plus a flat map
//! of parameters (`stage`, `stop_after_finish`, invitation week, ...).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::YearWeek;
use crate::error::DialogError;

/// Sub-steps shared by the name and phone editors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStage {
    AwaitingInput,
    AwaitingConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffiliationStage {
    AwaitingType,
    AwaitingSelection,
    AwaitingInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationStage {
    AwaitingDecision,
    AwaitingCancellationReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackStage {
    AwaitingConfirmation,
    AwaitingRating,
    AwaitingFailureReason,
}

macro_rules! stage_index {
    ($ty:ident { $($variant:ident = $idx:literal),+ $(,)? }) => {
        impl $ty {
            pub fn index(self) -> u64 {
                match self {
                    $(Self::$variant => $idx,)+
                }
            }

            pub fn from_index(index: u64) -> Option<Self> {
                match index {
                    $($idx => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

stage_index!(InputStage { AwaitingInput = 0, AwaitingConfirmation = 1 });
stage_index!(AffiliationStage { AwaitingType = 0, AwaitingSelection = 1, AwaitingInput = 2 });
stage_index!(InvitationStage { AwaitingDecision = 0, AwaitingCancellationReason = 1 });
stage_index!(FeedbackStage { AwaitingConfirmation = 0, AwaitingRating = 1, AwaitingFailureReason = 2 });

/// Closed set of conversation states.
///
/// `stop_after_finish` separates a single-field edit (return to `Null`
/// when done) from the onboarding sequence (move on to the next field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogState {
    WelcomeNewParticipant,
    WelcomeReturningParticipant,
    EditGender { stop_after_finish: bool },
    EditFirstName { stage: InputStage, stop_after_finish: bool },
    EditLastName { stage: InputStage, stop_after_finish: bool },
    EditPhoneNumber { stage: InputStage, stop_after_finish: bool },
    EditAffiliation { stage: AffiliationStage, stop_after_finish: bool },
    EditMeetingFrequency { stop_after_finish: bool },
    EditMeetingMotivation { stop_after_finish: bool },
    EditBio { stop_after_finish: bool },
    ViewProfile,
    AskFeedback,
    RespondToInvitation { week: YearWeek, stage: InvitationStage },
    CollectMeetingFeedback { partner_id: String, week: YearWeek, stage: FeedbackStage },
    Null,
    Error,
}

impl DialogState {
    pub fn edit_gender() -> Self {
        Self::EditGender { stop_after_finish: false }
    }

    pub fn edit_first_name(stop_after_finish: bool) -> Self {
        Self::EditFirstName { stage: InputStage::AwaitingConfirmation, stop_after_finish }
    }

    pub fn edit_last_name(stop_after_finish: bool) -> Self {
        Self::EditLastName { stage: InputStage::AwaitingConfirmation, stop_after_finish }
    }

    pub fn edit_phone_number(stop_after_finish: bool) -> Self {
        Self::EditPhoneNumber { stage: InputStage::AwaitingConfirmation, stop_after_finish }
    }

    pub fn edit_affiliation(stop_after_finish: bool) -> Self {
        Self::EditAffiliation { stage: AffiliationStage::AwaitingType, stop_after_finish }
    }

    pub fn respond_to_invitation(week: YearWeek) -> Self {
        Self::RespondToInvitation { week, stage: InvitationStage::AwaitingDecision }
    }

    pub fn collect_meeting_feedback(partner_id: &str, week: YearWeek) -> Self {
        Self::CollectMeetingFeedback {
            partner_id: partner_id.to_string(),
            week,
            stage: FeedbackStage::AwaitingConfirmation,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::WelcomeNewParticipant => "WelcomeNewParticipant",
            Self::WelcomeReturningParticipant => "WelcomeReturningParticipant",
            Self::EditGender { .. } => "EditGender",
            Self::EditFirstName { .. } => "EditFirstName",
            Self::EditLastName { .. } => "EditLastName",
            Self::EditPhoneNumber { .. } => "EditPhoneNumber",
            Self::EditAffiliation { .. } => "EditAffiliation",
            Self::EditMeetingFrequency { .. } => "EditMeetingFrequency",
            Self::EditMeetingMotivation { .. } => "EditMeetingMotivation",
            Self::EditBio { .. } => "EditBio",
            Self::ViewProfile => "ViewProfile",
            Self::AskFeedback => "AskFeedback",
            Self::RespondToInvitation { .. } => "RespondToInvitation",
            Self::CollectMeetingFeedback { .. } => "CollectMeetingFeedback",
            Self::Null => "Null",
            Self::Error => "Error",
        }
    }

    pub fn stop_after_finish(&self) -> bool {
        match self {
            Self::EditGender { stop_after_finish }
            | Self::EditFirstName { stop_after_finish, .. }
            | Self::EditLastName { stop_after_finish, .. }
            | Self::EditPhoneNumber { stop_after_finish, .. }
            | Self::EditAffiliation { stop_after_finish, .. }
            | Self::EditMeetingFrequency { stop_after_finish }
            | Self::EditMeetingMotivation { stop_after_finish }
            | Self::EditBio { stop_after_finish } => *stop_after_finish,
            _ => false,
        }
    }

    /// Integer sub-step, for variants that have one.
    pub fn stage(&self) -> Option<u64> {
        match self {
            Self::EditFirstName { stage, .. }
            | Self::EditLastName { stage, .. }
            | Self::EditPhoneNumber { stage, .. } => Some(stage.index()),
            Self::EditAffiliation { stage, .. } => Some(stage.index()),
            Self::RespondToInvitation { stage, .. } => Some(stage.index()),
            Self::CollectMeetingFeedback { stage, .. } => Some(stage.index()),
            _ => None,
        }
    }

    pub fn to_context(&self) -> StateContext {
        let mut params = Map::new();
        if let Some(stage) = self.stage() {
            params.insert("stage".into(), Value::from(stage));
        }
        params.insert("stop_after_finish".into(), Value::from(self.stop_after_finish()));
        match self {
            Self::RespondToInvitation { week, .. } => {
                insert_week(&mut params, *week);
            }
            Self::CollectMeetingFeedback { partner_id, week, .. } => {
                params.insert("partner_id".into(), Value::from(partner_id.as_str()));
                insert_week(&mut params, *week);
            }
            _ => {}
        }
        StateContext {
            state_name: self.name().to_string(),
            params,
        }
    }

    /// Rebuild a state from its stored form.
    ///
    /// Unknown names and missing or out-of-range parameters resolve to
    /// [`DialogState::Error`].
    pub fn from_context(context: &StateContext) -> Self {
        match Self::try_from_context(context) {
            Some(state) => state,
            None => {
                tracing::warn!(
                    state = %context.state_name,
                    "Stored conversation state is unknown or malformed, using Error state"
                );
                Self::Error
            }
        }
    }

    fn try_from_context(context: &StateContext) -> Option<Self> {
        let params = &context.params;
        let stop_after_finish = params
            .get("stop_after_finish")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let stage = params.get("stage").and_then(Value::as_u64);

        let input_stage = || match stage {
            None => Some(InputStage::AwaitingConfirmation),
            Some(i) => InputStage::from_index(i),
        };

        let state = match context.state_name.as_str() {
            "WelcomeNewParticipant" => Self::WelcomeNewParticipant,
            "WelcomeReturningParticipant" => Self::WelcomeReturningParticipant,
            "EditGender" => Self::EditGender { stop_after_finish },
            "EditFirstName" => Self::EditFirstName { stage: input_stage()?, stop_after_finish },
            "EditLastName" => Self::EditLastName { stage: input_stage()?, stop_after_finish },
            "EditPhoneNumber" => Self::EditPhoneNumber { stage: input_stage()?, stop_after_finish },
            "EditAffiliation" => Self::EditAffiliation {
                stage: AffiliationStage::from_index(stage.unwrap_or(0))?,
                stop_after_finish,
            },
            "EditMeetingFrequency" => Self::EditMeetingFrequency { stop_after_finish },
            "EditMeetingMotivation" => Self::EditMeetingMotivation { stop_after_finish },
            "EditBio" => Self::EditBio { stop_after_finish },
            "ViewProfile" => Self::ViewProfile,
            "AskFeedback" => Self::AskFeedback,
            "RespondToInvitation" => Self::RespondToInvitation {
                week: read_week(params)?,
                stage: InvitationStage::from_index(stage.unwrap_or(0))?,
            },
            "CollectMeetingFeedback" => Self::CollectMeetingFeedback {
                partner_id: params.get("partner_id")?.as_str()?.to_string(),
                week: read_week(params)?,
                stage: FeedbackStage::from_index(stage.unwrap_or(0))?,
            },
            "Null" => Self::Null,
            "Error" => Self::Error,
            _ => return None,
        };
        Some(state)
    }
}

fn insert_week(params: &mut Map<String, Value>, week: YearWeek) {
    params.insert("year".into(), Value::from(week.year()));
    params.insert("week".into(), Value::from(week.week()));
}

fn read_week(params: &Map<String, Value>) -> Option<YearWeek> {
    let year = i32::try_from(params.get("year")?.as_i64()?).ok()?;
    let week = u32::try_from(params.get("week")?.as_u64()?).ok()?;
    YearWeek::new(year, week)
}

/// Serialized conversation state, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateContext {
    pub state_name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl StateContext {
    pub fn parse(participant_id: &str, raw: &str) -> Result<Self, DialogError> {
        serde_json::from_str(raw).map_err(|e| DialogError::MalformedState {
            participant: participant_id.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"state_name\":\"{}\",\"params\":{{}}}}", self.state_name)
        })
    }

    /// Names of the fields that differ, `state_name` first, then
    /// `params.<key>` in key order. Empty when structurally identical.
    pub fn diff(&self, other: &StateContext) -> Vec<String> {
        let mut changed = Vec::new();
        if self.state_name != other.state_name {
            changed.push("state_name".to_string());
        }
        let mut keys: Vec<&String> = self.params.keys().chain(other.params.keys()).collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            if self.params.get(key) != other.params.get(key) {
                changed.push(format!("params.{key}"));
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week() -> YearWeek {
        YearWeek::new(2024, 12).unwrap()
    }

    #[test]
    fn context_round_trip_keeps_parameters() {
        let states = [
            DialogState::WelcomeNewParticipant,
            DialogState::EditFirstName { stage: InputStage::AwaitingInput, stop_after_finish: true },
            DialogState::EditAffiliation {
                stage: AffiliationStage::AwaitingSelection,
                stop_after_finish: false,
            },
            DialogState::RespondToInvitation {
                week: week(),
                stage: InvitationStage::AwaitingCancellationReason,
            },
            DialogState::CollectMeetingFeedback {
                partner_id: "42".into(),
                week: week(),
                stage: FeedbackStage::AwaitingFailureReason,
            },
            DialogState::Null,
        ];
        for state in states {
            let raw = state.to_context().to_json();
            let parsed = StateContext::parse("1", &raw).unwrap();
            assert_eq!(DialogState::from_context(&parsed), state);
        }
    }

    #[test]
    fn serialized_form_has_flat_params() {
        let ctx = DialogState::respond_to_invitation(week()).to_context();
        let value: Value = serde_json::from_str(&ctx.to_json()).unwrap();
        assert_eq!(value["state_name"], "RespondToInvitation");
        assert_eq!(value["params"]["stage"], 0);
        assert_eq!(value["params"]["year"], 2024);
        assert_eq!(value["params"]["week"], 12);
        assert_eq!(value["params"]["stop_after_finish"], false);
    }

    #[test]
    fn unknown_state_name_becomes_error() {
        let ctx = StateContext {
            state_name: "EditFavouriteColour".into(),
            params: Map::new(),
        };
        assert_eq!(DialogState::from_context(&ctx), DialogState::Error);
    }

    #[test]
    fn missing_required_params_become_error() {
        let ctx = StateContext {
            state_name: "RespondToInvitation".into(),
            params: Map::new(),
        };
        assert_eq!(DialogState::from_context(&ctx), DialogState::Error);

        let mut params = Map::new();
        params.insert("stage".into(), Value::from(7));
        let ctx = StateContext { state_name: "EditFirstName".into(), params };
        assert_eq!(DialogState::from_context(&ctx), DialogState::Error);
    }

    #[test]
    fn stop_after_finish_defaults_to_false() {
        let ctx = StateContext {
            state_name: "EditBio".into(),
            params: Map::new(),
        };
        assert_eq!(
            DialogState::from_context(&ctx),
            DialogState::EditBio { stop_after_finish: false }
        );
    }

    #[test]
    fn name_stages_default_to_confirmation() {
        let ctx = StateContext { state_name: "EditLastName".into(), params: Map::new() };
        assert_eq!(DialogState::from_context(&ctx), DialogState::edit_last_name(false));
    }

    #[test]
    fn diff_reports_changed_fields() {
        let a = DialogState::respond_to_invitation(week()).to_context();
        let b = DialogState::RespondToInvitation {
            week: week(),
            stage: InvitationStage::AwaitingCancellationReason,
        }
        .to_context();
        assert!(a.diff(&a.clone()).is_empty());
        assert_eq!(a.diff(&b), vec!["params.stage".to_string()]);

        let null = DialogState::Null.to_context();
        let changed = a.diff(&null);
        assert_eq!(changed[0], "state_name");
        assert!(changed.contains(&"params.year".to_string()));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            StateContext::parse("7", "{'state_name': 'Null'}"),
            Err(DialogError::MalformedState { .. })
        ));
    }
}
