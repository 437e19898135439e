//! Per-state hooks: enter, message, callback, exit.
//!
//! Handlers never transition on their own. They mutate the participant or
//! the week's records through storage and return a [`Directive`].

use chrono::Utc;
use tracing::{debug, warn};

use crate::channels::{KeyboardButton, MessageEdit, OutgoingMessage, ReplyMarkup};
use crate::clock::{Clock, YearWeek};
use crate::error::Error;
use crate::meetings::{Invitation, Meeting, Side};
use crate::participants::{Feedback, ParticipationKind};

use super::machine::{Dialog, Directive};
use super::replies::*;
use super::state::{AffiliationStage, DialogState, FeedbackStage, InputStage, InvitationStage};

pub(crate) async fn on_enter(
    dialog: &mut Dialog,
    state: &DialogState,
    silent: bool,
) -> Result<Directive, Error> {
    // Invitation rows must exist even when the prompt is suppressed.
    if let DialogState::RespondToInvitation { week, stage } = state {
        return enter_invitation(dialog, *week, *stage, silent).await;
    }
    if silent {
        return Ok(Directive::Stay);
    }

    match state {
        DialogState::WelcomeNewParticipant => {
            let text = welcome_new(&dialog.deps().community);
            dialog
                .send(OutgoingMessage::new(text).with_markup(ReplyMarkup::buttons(&[REGISTER])))
                .await;
        }
        DialogState::WelcomeReturningParticipant => {
            dialog
                .send(
                    OutgoingMessage::new(WELCOME_RETURNING)
                        .with_markup(ReplyMarkup::buttons(&[REGISTER])),
                )
                .await;
        }
        DialogState::EditGender { .. } => {
            let markup = pair(GENDERS[0].1, GENDERS[1].1);
            dialog
                .send(OutgoingMessage::new("1. Please tell us your gender").with_markup(markup))
                .await;
        }
        DialogState::EditFirstName { stage, .. } => {
            return enter_name(dialog, state, *stage, NameField::First).await;
        }
        DialogState::EditLastName { stage, .. } => {
            return enter_name(dialog, state, *stage, NameField::Last).await;
        }
        DialogState::EditPhoneNumber { stage, stop_after_finish } => {
            return enter_phone(dialog, *stage, *stop_after_finish).await;
        }
        DialogState::EditAffiliation { stage, stop_after_finish } => {
            return enter_affiliation(dialog, *stage, *stop_after_finish).await;
        }
        DialogState::EditMeetingFrequency { .. } => {
            dialog
                .send(
                    OutgoingMessage::new("6. How often would you like to go to meetings?")
                        .with_markup(keyboard(&FREQUENCIES)),
                )
                .await;
        }
        DialogState::EditMeetingMotivation { .. } => {
            dialog
                .send(
                    OutgoingMessage::new("7. Which meeting goal is closest to you?")
                        .with_markup(keyboard(&MOTIVATIONS)),
                )
                .await;
        }
        DialogState::EditBio { .. } => {
            dialog
                .send(
                    OutgoingMessage::new(
                        "8. Write a couple of sentences about yourself for the other participants.\n\n\
                         You can also do it later from your profile page.",
                    )
                    .with_markup(ReplyMarkup::Keyboard {
                        rows: vec![vec![KeyboardButton::new(SKIP_BIO)]],
                        one_time: false,
                    }),
                )
                .await;
        }
        DialogState::ViewProfile => enter_profile(dialog).await?,
        DialogState::AskFeedback => {
            dialog.say(FEEDBACK_PROMPT).await;
        }
        DialogState::CollectMeetingFeedback { partner_id, week, stage } => {
            return enter_meeting_feedback(dialog, partner_id, *week, *stage).await;
        }
        DialogState::Error => {
            dialog.say(SESSION_RESET).await;
        }
        DialogState::Null | DialogState::RespondToInvitation { .. } => {}
    }
    Ok(Directive::Stay)
}

pub(crate) async fn on_message(
    dialog: &mut Dialog,
    state: &DialogState,
    text: &str,
) -> Result<Directive, Error> {
    let text = text.trim();
    match state {
        DialogState::WelcomeNewParticipant => {
            if text == REGISTER {
                dialog.say(QUESTIONNAIRE).await;
                return Ok(Directive::Transition(DialogState::edit_gender()));
            }
            dialog
                .send(
                    OutgoingMessage::new(WELCOME_NEW_RETRY)
                        .with_markup(ReplyMarkup::buttons(&[REGISTER])),
                )
                .await;
            Ok(Directive::Stay)
        }
        DialogState::WelcomeReturningParticipant => {
            if text == REGISTER {
                dialog.say(QUESTIONNAIRE).await;
                return Ok(Directive::Transition(DialogState::edit_gender()));
            }
            Ok(Directive::Stay)
        }
        DialogState::EditGender { stop_after_finish } => {
            if let Some(gender) = parse_reply(&GENDERS, text) {
                dialog.participant_mut().gender = Some(gender);
                dialog.save_participant().await?;
            }
            Ok(advance(*stop_after_finish, DialogState::edit_first_name(false)))
        }
        DialogState::EditFirstName { stage, stop_after_finish } => {
            name_message(dialog, NameField::First, *stage, *stop_after_finish, text).await
        }
        DialogState::EditLastName { stage, stop_after_finish } => {
            name_message(dialog, NameField::Last, *stage, *stop_after_finish, text).await
        }
        DialogState::EditPhoneNumber { stage, stop_after_finish } => {
            phone_message(dialog, *stage, *stop_after_finish, text).await
        }
        DialogState::EditAffiliation { stage, stop_after_finish } => {
            affiliation_message(dialog, *stage, *stop_after_finish, text).await
        }
        DialogState::EditMeetingFrequency { stop_after_finish } => {
            let Some(frequency) = parse_reply(&FREQUENCIES, text) else {
                return Ok(Directive::FallBack);
            };
            dialog.participant_mut().meeting_frequency = Some(frequency);
            dialog.save_participant().await?;
            Ok(advance(
                *stop_after_finish,
                DialogState::EditMeetingMotivation { stop_after_finish: false },
            ))
        }
        DialogState::EditMeetingMotivation { stop_after_finish } => {
            let Some(motivation) = parse_reply(&MOTIVATIONS, text) else {
                return Ok(Directive::FallBack);
            };
            dialog.participant_mut().meeting_motivation = Some(motivation);
            dialog.save_participant().await?;
            Ok(advance(*stop_after_finish, DialogState::EditBio { stop_after_finish: false }))
        }
        DialogState::EditBio { .. } => bio_message(dialog, text).await,
        DialogState::AskFeedback => {
            let feedback = Feedback::new(dialog.participant_id(), text);
            dialog.deps().db.insert_feedback(&feedback).await?;
            dialog.say(FEEDBACK_THANKS).await;
            Ok(Directive::Transition(DialogState::Null))
        }
        DialogState::RespondToInvitation { week, stage } => {
            invitation_message(dialog, *week, *stage, text).await
        }
        DialogState::CollectMeetingFeedback { partner_id, week, stage } => {
            meeting_feedback_message(dialog, partner_id, *week, *stage, text).await
        }
        DialogState::Null => {
            dialog.say(UNKNOWN_INPUT).await;
            Ok(Directive::Stay)
        }
        DialogState::ViewProfile | DialogState::Error => Ok(Directive::Stay),
    }
}

pub(crate) async fn on_callback(
    dialog: &mut Dialog,
    state: &DialogState,
    message_id: &str,
    data: &str,
) -> Result<Directive, Error> {
    match state {
        DialogState::ViewProfile | DialogState::Null => Ok(profile_callback(data)),
        DialogState::EditAffiliation { stage: AffiliationStage::AwaitingSelection, stop_after_finish } => {
            affiliation_callback(dialog, *stop_after_finish, message_id, data).await
        }
        _ => {
            debug!(participant = %dialog.participant_id(), state = state.name(), data, "Ignoring callback");
            Ok(Directive::Stay)
        }
    }
}

pub(crate) async fn on_exit(dialog: &mut Dialog, state: &DialogState, silent: bool) -> Result<(), Error> {
    if silent {
        return Ok(());
    }
    match state {
        DialogState::EditGender { .. }
        | DialogState::EditFirstName { .. }
        | DialogState::EditLastName { .. }
        | DialogState::EditPhoneNumber { .. }
        | DialogState::EditAffiliation { .. }
        | DialogState::EditMeetingFrequency { .. }
        | DialogState::EditMeetingMotivation { .. }
        | DialogState::EditBio { .. }
        | DialogState::CollectMeetingFeedback { .. } => dialog.thank().await,
        _ => {}
    }
    Ok(())
}

/// Next onboarding step, or back to idle after a single-field edit.
fn advance(stop_after_finish: bool, next: DialogState) -> Directive {
    if stop_after_finish {
        Directive::Transition(DialogState::Null)
    } else {
        Directive::Transition(next)
    }
}

// ── Names ───────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum NameField {
    First,
    Last,
}

impl NameField {
    fn value(self, dialog: &Dialog) -> &str {
        match self {
            Self::First => &dialog.participant().first_name,
            Self::Last => &dialog.participant().last_name,
        }
    }

    fn set(self, dialog: &mut Dialog, value: &str) {
        let participant = dialog.participant_mut();
        match self {
            Self::First => participant.first_name = value.to_string(),
            Self::Last => participant.last_name = value.to_string(),
        }
    }

    fn state(self, stage: InputStage, stop_after_finish: bool) -> DialogState {
        match self {
            Self::First => DialogState::EditFirstName { stage, stop_after_finish },
            Self::Last => DialogState::EditLastName { stage, stop_after_finish },
        }
    }

    fn next(self) -> DialogState {
        match self {
            Self::First => DialogState::edit_last_name(false),
            Self::Last => DialogState::edit_phone_number(false),
        }
    }

    fn change_reply(self) -> &'static str {
        match self {
            Self::First => OTHER_FIRST_NAME,
            Self::Last => OTHER_LAST_NAME,
        }
    }
}

async fn enter_name(
    dialog: &mut Dialog,
    state: &DialogState,
    stage: InputStage,
    field: NameField,
) -> Result<Directive, Error> {
    let current = field.value(dialog).trim().to_string();
    match stage {
        InputStage::AwaitingConfirmation if current.is_empty() => Ok(Directive::Restage(
            field.state(InputStage::AwaitingInput, state.stop_after_finish()),
        )),
        InputStage::AwaitingConfirmation => {
            let (question, markup) = match field {
                NameField::First => (
                    format!("2. Check your first name: {}. Is it right?", escape_html(&current)),
                    ReplyMarkup::buttons(&[YES, OTHER_FIRST_NAME]),
                ),
                NameField::Last => (
                    format!("3. Check your last name: {}. Is it right?", escape_html(&current)),
                    ReplyMarkup::buttons(&[YES, OTHER_LAST_NAME]),
                ),
            };
            dialog.send(OutgoingMessage::new(question).with_markup(markup)).await;
            Ok(Directive::Stay)
        }
        InputStage::AwaitingInput => {
            match field {
                NameField::First => {
                    dialog.say("2. Send the first name you want to use").await;
                }
                NameField::Last => {
                    dialog
                        .send(
                            OutgoingMessage::new(
                                "3. Send the last name you want to use. \
                                 You can leave it empty with the button below.",
                            )
                            .with_markup(ReplyMarkup::buttons(&[SKIP])),
                        )
                        .await;
                }
            }
            Ok(Directive::Stay)
        }
    }
}

async fn name_message(
    dialog: &mut Dialog,
    field: NameField,
    stage: InputStage,
    stop_after_finish: bool,
    text: &str,
) -> Result<Directive, Error> {
    match stage {
        InputStage::AwaitingInput => {
            if matches!(field, NameField::Last) && text == SKIP {
                field.set(dialog, "");
                dialog.save_participant().await?;
                return Ok(advance(stop_after_finish, field.next()));
            }
            if text.is_empty() {
                return Ok(Directive::FallBack);
            }
            field.set(dialog, text);
            dialog.save_participant().await?;
            Ok(Directive::Restage(field.state(InputStage::AwaitingConfirmation, stop_after_finish)))
        }
        InputStage::AwaitingConfirmation => {
            if text == YES {
                Ok(advance(stop_after_finish, field.next()))
            } else if text == field.change_reply() {
                Ok(Directive::Restage(field.state(InputStage::AwaitingInput, stop_after_finish)))
            } else {
                Ok(Directive::FallBack)
            }
        }
    }
}

// ── Phone ───────────────────────────────────────────────────────────

async fn enter_phone(
    dialog: &mut Dialog,
    stage: InputStage,
    stop_after_finish: bool,
) -> Result<Directive, Error> {
    let phone = dialog.participant().phone_number.clone();
    match stage {
        InputStage::AwaitingConfirmation if phone.is_empty() => Ok(Directive::Restage(
            DialogState::EditPhoneNumber { stage: InputStage::AwaitingInput, stop_after_finish },
        )),
        InputStage::AwaitingConfirmation => {
            dialog
                .send(
                    OutgoingMessage::new(format!("4. Check your phone number: {phone}"))
                        .with_markup(ReplyMarkup::buttons(&[PHONE_CORRECT, PHONE_WRONG])),
                )
                .await;
            Ok(Directive::Stay)
        }
        InputStage::AwaitingInput => {
            dialog
                .send(
                    OutgoingMessage::new(
                        "4. Please send your phone number. Press the button at the bottom \
                         of the screen or type it in a message.",
                    )
                    .with_markup(share_phone()),
                )
                .await;
            Ok(Directive::Stay)
        }
    }
}

async fn phone_message(
    dialog: &mut Dialog,
    stage: InputStage,
    stop_after_finish: bool,
    text: &str,
) -> Result<Directive, Error> {
    let confirm = DialogState::EditPhoneNumber { stage: InputStage::AwaitingConfirmation, stop_after_finish };
    let ask = DialogState::EditPhoneNumber { stage: InputStage::AwaitingInput, stop_after_finish };
    match stage {
        InputStage::AwaitingConfirmation => {
            if text == PHONE_CORRECT {
                Ok(advance(stop_after_finish, DialogState::edit_affiliation(false)))
            } else if text == PHONE_WRONG {
                Ok(Directive::Restage(ask))
            } else {
                Ok(Directive::FallBack)
            }
        }
        InputStage::AwaitingInput => match normalize_phone(text) {
            Some(phone) => {
                dialog.participant_mut().phone_number = phone;
                dialog.save_participant().await?;
                Ok(Directive::Restage(confirm))
            }
            None => {
                dialog.say(PHONE_TYPO).await;
                Ok(Directive::Restage(ask))
            }
        },
    }
}

// ── Affiliation ─────────────────────────────────────────────────────

async fn enter_affiliation(
    dialog: &mut Dialog,
    stage: AffiliationStage,
    stop_after_finish: bool,
) -> Result<Directive, Error> {
    match stage {
        AffiliationStage::AwaitingType => {
            dialog
                .send(
                    OutgoingMessage::new("5. Are you at the coworking alone or with colleagues?")
                        .with_markup(ReplyMarkup::buttons(&[ALONE, WITH_COLLEAGUES])),
                )
                .await;
        }
        AffiliationStage::AwaitingSelection => {
            let groups = dialog.deps().db.list_group_names().await?;
            if groups.is_empty() {
                return Ok(Directive::Restage(DialogState::EditAffiliation {
                    stage: AffiliationStage::AwaitingInput,
                    stop_after_finish,
                }));
            }
            dialog.say("5. Ok, try to find your company in the list").await;
            dialog
                .send(
                    OutgoingMessage::new(GROUP_PICKER_TITLE).with_markup(ReplyMarkup::Inline {
                        rows: group_page(&groups, 0),
                    }),
                )
                .await;
        }
        AffiliationStage::AwaitingInput => {
            dialog
                .say(
                    "5. Ok, then send the name of your company. A full name works best, \
                     so your colleagues recognize it.",
                )
                .await;
        }
    }
    Ok(Directive::Stay)
}

async fn affiliation_message(
    dialog: &mut Dialog,
    stage: AffiliationStage,
    stop_after_finish: bool,
    text: &str,
) -> Result<Directive, Error> {
    let next = DialogState::EditMeetingFrequency { stop_after_finish: false };
    match stage {
        AffiliationStage::AwaitingType if text == ALONE => {
            let participant = dialog.participant_mut();
            participant.kind = Some(ParticipationKind::Individual);
            participant.group = None;
            dialog.save_participant().await?;
            Ok(advance(stop_after_finish, next))
        }
        AffiliationStage::AwaitingType if text == WITH_COLLEAGUES => {
            dialog.participant_mut().kind = Some(ParticipationKind::Team);
            dialog.save_participant().await?;
            Ok(Directive::Restage(DialogState::EditAffiliation {
                stage: AffiliationStage::AwaitingSelection,
                stop_after_finish,
            }))
        }
        AffiliationStage::AwaitingInput => {
            let name = sanitize_group_name(text);
            if name.is_empty() {
                return Ok(Directive::FallBack);
            }
            dialog.deps().db.ensure_group(&name).await?;
            let participant = dialog.participant_mut();
            participant.kind = Some(ParticipationKind::Team);
            participant.group = Some(name);
            dialog.save_participant().await?;
            Ok(advance(stop_after_finish, next))
        }
        AffiliationStage::AwaitingType | AffiliationStage::AwaitingSelection => Ok(Directive::FallBack),
    }
}

async fn affiliation_callback(
    dialog: &mut Dialog,
    stop_after_finish: bool,
    message_id: &str,
    data: &str,
) -> Result<Directive, Error> {
    let (action, argument) = data.split_once('|').unwrap_or((data, ""));
    match action {
        "select" => {
            let groups = dialog.deps().db.list_group_names().await?;
            let Some(name) = groups.into_iter().find(|g| group_key(g) == argument) else {
                warn!(participant = %dialog.participant_id(), group = argument, "Selected group no longer exists");
                return Ok(Directive::FallBack);
            };
            let edit = MessageEdit {
                text: format!("5. You picked the company {}", escape_html(&name)),
                inline: None,
            };
            let participant = dialog.participant_mut();
            participant.kind = Some(ParticipationKind::Team);
            participant.group = Some(name);
            dialog.save_participant().await?;
            dialog.edit(message_id, edit).await;
            Ok(advance(stop_after_finish, DialogState::EditMeetingFrequency { stop_after_finish: false }))
        }
        "show_next" | "show_previous" => {
            let groups = dialog.deps().db.list_group_names().await?;
            let offset = argument.parse::<usize>().unwrap_or(0);
            let offset = page_offset(action, offset, groups.len());
            let edit = MessageEdit {
                text: GROUP_PICKER_TITLE.to_string(),
                inline: Some(group_page(&groups, offset)),
            };
            dialog.edit(message_id, edit).await;
            Ok(Directive::Stay)
        }
        "add_new" => Ok(Directive::Restage(DialogState::EditAffiliation {
            stage: AffiliationStage::AwaitingInput,
            stop_after_finish,
        })),
        _ => Ok(Directive::Stay),
    }
}

// ── Bio & registration ──────────────────────────────────────────────

async fn bio_message(dialog: &mut Dialog, text: &str) -> Result<Directive, Error> {
    dialog.participant_mut().bio = if text == SKIP_BIO { String::new() } else { text.to_string() };
    dialog.save_participant().await?;

    if dialog.participant().is_registered() {
        return Ok(Directive::Transition(DialogState::Null));
    }

    dialog.participant_mut().registered_at = Some(Utc::now());
    dialog.save_participant().await?;

    let week = Clock::next_week();
    let mut invitation = Invitation::new(dialog.participant_id(), week);
    invitation.accept();
    invitation.send_count = 1;
    dialog.deps().db.upsert_invitation(&invitation).await?;
    dialog.deps().matchmaker.rearrange(week).await?;

    dialog.say(REGISTRATION_DONE).await;
    Ok(Directive::Transition(DialogState::Null))
}

// ── Profile ─────────────────────────────────────────────────────────

async fn enter_profile(dialog: &mut Dialog) -> Result<(), Error> {
    let db = &dialog.deps().db;
    let pid = dialog.participant_id();
    let accepted = |inv: Option<Invitation>| inv.is_some_and(|i| i.accepted == Some(true));
    let this_week = accepted(db.get_invitation(pid, Clock::current_week()).await?);
    let next_week = accepted(db.get_invitation(pid, Clock::next_week()).await?);

    let card = profile_card(dialog.participant(), &dialog.deps().community, this_week, next_week);
    dialog
        .send(OutgoingMessage::new(card).with_markup(profile_buttons()))
        .await;
    Ok(())
}

fn profile_callback(data: &str) -> Directive {
    let next = match data.strip_prefix("profile_edit_") {
        Some("first_name") => DialogState::edit_first_name(true),
        Some("last_name") => DialogState::edit_last_name(true),
        Some("phone_number") => DialogState::edit_phone_number(true),
        Some("affiliation") => DialogState::edit_affiliation(true),
        Some("meeting_frequency") => DialogState::EditMeetingFrequency { stop_after_finish: true },
        Some("meeting_motivation") => DialogState::EditMeetingMotivation { stop_after_finish: true },
        Some("bio") => DialogState::EditBio { stop_after_finish: true },
        Some("gender") => DialogState::EditGender { stop_after_finish: true },
        _ => return Directive::Stay,
    };
    Directive::Transition(next)
}

// ── Invitations ─────────────────────────────────────────────────────

async fn enter_invitation(
    dialog: &mut Dialog,
    week: YearWeek,
    stage: InvitationStage,
    silent: bool,
) -> Result<Directive, Error> {
    match stage {
        InvitationStage::AwaitingDecision => {
            let db = dialog.deps().db.clone();
            let mut invitation = db
                .get_invitation(dialog.participant_id(), week)
                .await?
                .unwrap_or_else(|| Invitation::new(dialog.participant_id(), week));

            if !silent {
                let text = invitation_prompt(&week.boundaries_readable(), week == Clock::next_week());
                let delivery = dialog
                    .send(
                        OutgoingMessage::new(text)
                            .with_markup(pair(ACCEPT_INVITATION, DECLINE_INVITATION)),
                    )
                    .await;
                invitation.record_delivery(delivery);
            }
            db.upsert_invitation(&invitation).await?;
        }
        InvitationStage::AwaitingCancellationReason if !silent => {
            dialog
                .send(OutgoingMessage::new("Why is that?").with_markup(keyboard(&CANCEL_REASONS)))
                .await;
        }
        InvitationStage::AwaitingCancellationReason => {}
    }
    Ok(Directive::Stay)
}

async fn invitation_message(
    dialog: &mut Dialog,
    week: YearWeek,
    stage: InvitationStage,
    text: &str,
) -> Result<Directive, Error> {
    let db = dialog.deps().db.clone();
    let Some(mut invitation) = db.get_invitation(dialog.participant_id(), week).await? else {
        dialog.say(MISSING_INVITATION).await;
        return Ok(Directive::Transition(DialogState::Null));
    };

    match stage {
        InvitationStage::AwaitingDecision => {
            let directive = if text == ACCEPT_INVITATION {
                invitation.accept();
                Directive::Transition(DialogState::Null)
            } else if text == DECLINE_INVITATION {
                invitation.decline();
                Directive::Restage(DialogState::RespondToInvitation {
                    week,
                    stage: InvitationStage::AwaitingCancellationReason,
                })
            } else {
                return Ok(Directive::FallBack);
            };
            db.upsert_invitation(&invitation).await?;
            dialog.deps().matchmaker.rearrange(week).await?;
            if invitation.accepted == Some(true) {
                dialog.thank().await;
            }
            Ok(directive)
        }
        InvitationStage::AwaitingCancellationReason => {
            let Some(reason) = parse_reply(&CANCEL_REASONS, text) else {
                return Ok(Directive::FallBack);
            };
            invitation.cancel_reason = Some(reason);
            db.upsert_invitation(&invitation).await?;
            dialog.thank().await;
            Ok(Directive::Transition(DialogState::Null))
        }
    }
}

// ── Meeting feedback ────────────────────────────────────────────────

async fn enter_meeting_feedback(
    dialog: &mut Dialog,
    partner_id: &str,
    week: YearWeek,
    stage: FeedbackStage,
) -> Result<Directive, Error> {
    match stage {
        FeedbackStage::AwaitingConfirmation => {
            let db = dialog.deps().db.clone();
            if db.get_meeting(week, dialog.participant_id(), partner_id).await?.is_none() {
                warn!(participant = %dialog.participant_id(), partner = partner_id, %week, "Meeting not found");
                dialog.say(MISSING_MEETING).await;
                return Ok(Directive::Transition(DialogState::Null));
            }
            let partner_name = db
                .get_participant(partner_id)
                .await?
                .map(|p| p.full_name())
                .unwrap_or_else(|| "your partner".to_string());
            let text = meeting_check(week.week(), &week.boundaries_readable(), &partner_name);
            dialog.send(OutgoingMessage::new(text).with_markup(pair(YES, NO))).await;
        }
        FeedbackStage::AwaitingRating => {
            dialog
                .send(OutgoingMessage::new("Did you enjoy how it went?").with_markup(pair(YES, NO)))
                .await;
        }
        FeedbackStage::AwaitingFailureReason => {
            dialog
                .send(OutgoingMessage::new("Why is that?").with_markup(keyboard(&FAILURE_REASONS)))
                .await;
        }
    }
    Ok(Directive::Stay)
}

async fn meeting_feedback_message(
    dialog: &mut Dialog,
    partner_id: &str,
    week: YearWeek,
    stage: FeedbackStage,
    text: &str,
) -> Result<Directive, Error> {
    let db = dialog.deps().db.clone();
    let pid = dialog.participant_id().to_string();
    let Some(mut meeting) = db.get_meeting(week, &pid, partner_id).await? else {
        dialog.say(MISSING_MEETING).await;
        return Ok(Directive::Transition(DialogState::Null));
    };
    let side = meeting.side_of(&pid).unwrap_or(Side::A);
    let restage = |stage| DialogState::CollectMeetingFeedback {
        partner_id: partner_id.to_string(),
        week,
        stage,
    };

    match stage {
        FeedbackStage::AwaitingConfirmation => {
            let took_place = match text {
                YES => true,
                NO => false,
                _ => return Ok(Directive::FallBack),
            };
            meeting.feedback_mut(side).took_place = Some(took_place);
            db.update_meeting(&meeting).await?;
            Ok(Directive::Restage(restage(if took_place {
                FeedbackStage::AwaitingRating
            } else {
                FeedbackStage::AwaitingFailureReason
            })))
        }
        FeedbackStage::AwaitingRating => {
            let happy = match text {
                YES => true,
                NO => false,
                _ => return Ok(Directive::FallBack),
            };
            meeting.feedback_mut(side).happy = Some(happy);
            db.update_meeting(&meeting).await?;
            next_unrated(dialog, week).await
        }
        FeedbackStage::AwaitingFailureReason => {
            let Some(reason) = parse_reply(&FAILURE_REASONS, text) else {
                return Ok(Directive::FallBack);
            };
            meeting.feedback_mut(side).failure_reason = Some(reason);
            db.update_meeting(&meeting).await?;
            next_unrated(dialog, week).await
        }
    }
}

/// Ask about the next meeting of the week this participant has not rated.
async fn next_unrated(dialog: &Dialog, week: YearWeek) -> Result<Directive, Error> {
    let pid = dialog.participant_id();
    let meetings: Vec<Meeting> = dialog.deps().db.list_meetings(week).await?;
    let next = meetings
        .iter()
        .filter(|m| m.is_unrated_by(pid))
        .find_map(|m| m.partner_of(pid));
    Ok(match next {
        Some(partner) => Directive::Transition(DialogState::collect_meeting_feedback(partner, week)),
        None => Directive::Transition(DialogState::Null),
    })
}
