//! Reply vocabulary, keyboards and prompt text.
//!
//! Button labels double as the recognized input: a reply is matched by
//! exact text against the tables below.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::channels::{InlineButton, KeyboardButton, ReplyMarkup};
use crate::meetings::{CancelReason, FailureReason};
use crate::participants::{Gender, MeetingFrequency, MeetingMotivation, Participant};

pub const REGISTER: &str = "Register";
pub const YES: &str = "Yes";
pub const NO: &str = "No";
pub const OTHER_FIRST_NAME: &str = "No, I want another name";
pub const OTHER_LAST_NAME: &str = "No, my last name is different";
pub const SKIP: &str = "Skip";
pub const PHONE_CORRECT: &str = "Correct";
pub const PHONE_WRONG: &str = "Wrong, there is a typo";
pub const SHARE_PHONE: &str = "Send my phone number from Telegram";
pub const ALONE: &str = "Alone";
pub const WITH_COLLEAGUES: &str = "With colleagues";
pub const SKIP_BIO: &str = "Skip and fill in later";
pub const ACCEPT_INVITATION: &str = "Yes, sure";
pub const DECLINE_INVITATION: &str = "I'll pass";

pub const GENDERS: [(Gender, &str); 2] = [(Gender::Male, "🙋‍♂️"), (Gender::Female, "🙋")];

pub const FREQUENCIES: [(MeetingFrequency, &str); 3] = [
    (MeetingFrequency::High, "Twice a week or more 🐆"),
    (MeetingFrequency::Medium, "Once a week 🐇"),
    (MeetingFrequency::Low, "Every other week 🐢"),
];

pub const MOTIVATIONS: [(MeetingMotivation, &str); 3] = [
    (MeetingMotivation::Dating, "Find my other half ❤"),
    (MeetingMotivation::Networking, "Talk about work"),
    (MeetingMotivation::Fun, "Just have a good time"),
];

pub const CANCEL_REASONS: [(CancelReason, &str); 3] = [
    (CancelReason::NoTime, "Unlikely to find the time"),
    (CancelReason::NotInMood, "Not in the mood"),
    (CancelReason::NoInterest, "Not interested..."),
];

pub const FAILURE_REASONS: [(FailureReason, &str); 3] = [
    (FailureReason::PartnerDidNotRespond, "My partner never got in touch"),
    (FailureReason::CouldNotAgree, "We could not agree on when or where"),
    (FailureReason::ForceMajeure, "Force majeure"),
];

/// Groups shown per page of the affiliation picker.
pub const GROUPS_PER_PAGE: usize = 5;

pub const MENU_DESCRIPTION: &str =
    "\n\nAvailable commands:\n/start: main menu\n/info: help\n/feedback: leave feedback";

pub const THANKS: &str = "Thank you!";
pub const FALL_BACK: &str = "I don't understand your answer. Let's try again.";
pub const UNKNOWN_INPUT: &str = "I don't know how to respond to that...";
pub const SESSION_RESET: &str =
    "Sorry, something went wrong on our side. Your conversation was reset, send /start to continue.";
pub const QUESTIONNAIRE: &str = "Only a short questionnaire of 8 questions is left. Let's go!";
pub const PHONE_TYPO: &str = "Looks like there is a typo in the number. Please try again.";
pub const MISSING_INVITATION: &str =
    "I can't match your answer to an open invitation. Let's just wait for the next one.";
pub const MISSING_MEETING: &str = "Sorry, I could not find that meeting anymore.";
pub const FEEDBACK_PROMPT: &str =
    "Share your overall impression of the service and tell us what you are missing";
pub const FEEDBACK_THANKS: &str =
    "Thanks for your feedback! We will read it carefully and get in touch if needed.";
pub const GROUP_PICKER_TITLE: &str = "Saved companies (you can add yours):";

/// Label for a value in one of the reply tables.
pub fn label_of<T: PartialEq + Copy>(table: &[(T, &'static str)], value: T) -> &'static str {
    table
        .iter()
        .find(|(v, _)| *v == value)
        .map(|(_, label)| *label)
        .unwrap_or("-")
}

/// Value whose button label is exactly `reply`.
pub fn parse_reply<T: Copy>(table: &[(T, &'static str)], reply: &str) -> Option<T> {
    table.iter().find(|(_, label)| *label == reply).map(|(v, _)| *v)
}

pub fn keyboard<T>(table: &[(T, &'static str)]) -> ReplyMarkup {
    let labels: Vec<&str> = table.iter().map(|(_, label)| *label).collect();
    ReplyMarkup::buttons(&labels)
}

/// Two buttons on one row.
pub fn pair(left: &str, right: &str) -> ReplyMarkup {
    ReplyMarkup::Keyboard {
        rows: vec![vec![KeyboardButton::new(left), KeyboardButton::new(right)]],
        one_time: true,
    }
}

pub fn share_phone() -> ReplyMarkup {
    ReplyMarkup::Keyboard {
        rows: vec![vec![KeyboardButton::contact(SHARE_PHONE)]],
        one_time: false,
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

static PHONE_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[0-9]{8,15}$").expect("phone pattern is valid"));

/// Normalize a typed or shared phone number to `+<digits>`.
///
/// Separators (spaces, dashes, dots, parentheses) are dropped and a missing
/// leading `+` is added. Returns `None` unless 8 to 15 digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    let normalized = if compact.starts_with('+') {
        compact
    } else {
        format!("+{compact}")
    };
    PHONE_DIGITS.is_match(&normalized).then_some(normalized)
}

pub fn sanitize_group_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fixed-width picker key for a group name.
///
/// Telegram caps `callback_data` at 64 bytes. The key depends on the name
/// alone, so a picker rendered before another group was added still resolves.
pub fn group_key(name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).simple().to_string()
}

/// One page of the affiliation picker starting at `offset`.
pub fn group_page(groups: &[String], offset: usize) -> Vec<Vec<InlineButton>> {
    let offset = offset.min(groups.len());
    let end = (offset + GROUPS_PER_PAGE).min(groups.len());
    let mut rows: Vec<Vec<InlineButton>> = groups[offset..end]
        .iter()
        .map(|name| {
            let data = format!("select|{}", group_key(name));
            vec![InlineButton::new(name, &data)]
        })
        .collect();
    if offset > 0 {
        rows.insert(0, vec![InlineButton::new("⬆️", &format!("show_previous|{offset}"))]);
    }
    if groups.len() > end {
        rows.push(vec![InlineButton::new("⬇️", &format!("show_next|{offset}"))]);
    } else {
        rows.push(vec![InlineButton::new("Can't find mine", "add_new")]);
    }
    rows
}

/// Offset after pressing a navigation button on the page at `offset`.
pub fn page_offset(action: &str, offset: usize, total: usize) -> usize {
    match action {
        "show_next" if offset + GROUPS_PER_PAGE < total => offset + GROUPS_PER_PAGE,
        "show_previous" if offset >= GROUPS_PER_PAGE => offset - GROUPS_PER_PAGE,
        _ => offset,
    }
}

pub fn welcome_new(community: &str) -> String {
    format!(
        "Hi!\n\nPress the \"{REGISTER}\" button below to join Random Coffee at \"{}\"",
        escape_html(community)
    )
}

pub const WELCOME_NEW_RETRY: &str =
    "I didn't quite get that. Did you want to register? Just press the button below.";

pub const WELCOME_RETURNING: &str = "Hi!\n\nLooks like your registration did not finish last time.\n\nLet's quickly go through it again. Press the \"Register\" button at the bottom of the screen";

pub const REGISTRATION_DONE: &str = "All set, registration is done!\n\nYou are on next week's participant list. \
The invitation will arrive in this chat on Monday or a bit later.\n\n\
Meanwhile you can look at your profile with /start.\n\nSee you soon!";

/// Profile card for the `ViewProfile` state.
pub fn profile_card(
    participant: &Participant,
    community: &str,
    joins_this_week: bool,
    joins_next_week: bool,
) -> String {
    let or_dash = |s: &str| {
        if s.trim().is_empty() {
            "-".to_string()
        } else {
            escape_html(s)
        }
    };
    let yes_no = |b: bool| if b { "Yes" } else { "No" };

    let mut card = format!(
        "<b>Random Coffee {} participant profile</b>\n\n\
         Telegram username: <i>{}</i>\n\
         First name: <i>{}</i>\n\
         Last name: <i>{}</i>\n\
         Phone: <i>{}</i>\n\
         Company: <i>{}</i>\n\
         Meeting frequency: <i>{}</i>\n\
         Meeting goal: <i>{}</i>\n\
         About: <i>{}</i>",
        escape_html(community),
        if participant.username.is_empty() {
            "not set".to_string()
        } else {
            escape_html(&participant.username)
        },
        or_dash(&participant.first_name),
        or_dash(&participant.last_name),
        if participant.phone_number.is_empty() {
            "not set".to_string()
        } else {
            escape_html(&participant.phone_number)
        },
        or_dash(participant.group_name()),
        participant
            .meeting_frequency
            .map(|f| label_of(&FREQUENCIES, f))
            .unwrap_or("-"),
        participant
            .meeting_motivation
            .map(|m| label_of(&MOTIVATIONS, m))
            .unwrap_or("-"),
        or_dash(&participant.bio),
    );

    match participant.registered_at {
        Some(at) => {
            card.push_str(&format!(
                "\n\nJoining this week: <i>{}</i>\nJoining next week: <i>{}</i>\n\nRegistered on {}",
                yes_no(joins_this_week),
                yes_no(joins_next_week),
                at.format("%d.%m.%Y")
            ));
        }
        None => card.push_str(
            "\n\n😧 Registration is not finished yet. Send /start to complete it.",
        ),
    }
    card.push_str(MENU_DESCRIPTION);
    card
}

/// Inline edit buttons under the profile card.
pub fn profile_buttons() -> ReplyMarkup {
    let button = |label: &str, field: &str| InlineButton::new(label, &format!("profile_edit_{field}"));
    ReplyMarkup::Inline {
        rows: vec![
            vec![button("✏️ 1. First name", "first_name"), button("✏️ 2. Last name", "last_name")],
            vec![button("✏️ 3. Phone", "phone_number"), button("✏️ 4. Company", "affiliation")],
            vec![button("✏️ 5. Frequency", "meeting_frequency"), button("✏️ 6. About", "bio")],
            vec![button("✏️ 7. Meeting goal", "meeting_motivation")],
        ],
    }
}

pub fn invitation_prompt(boundaries: &str, is_next_week: bool) -> String {
    if is_next_week {
        format!("Hello again! Would you like to meet someone next week ({boundaries})?")
    } else {
        format!("Hello again! Would you like to meet someone during the week of {boundaries}?")
    }
}

pub fn meeting_check(week_number: u32, boundaries: &str, partner_name: &str) -> String {
    format!(
        "Hi! A quick question.\n\nIn week {week_number} ({boundaries}) you were supposed to meet \
         <b>{}</b>.\n\nDid you manage to meet?",
        escape_html(partner_name)
    )
}

pub const ABOUT: &str = "<b>Random Coffee</b> is a social game where you meet a new random person every week.\n\n\
To join, register and accept the invitation to the next meeting. The bot will pick a partner for you \
and connect you in Telegram.\n\nThere are no rules, just one recommendation: keep your phone charged.";

/// Weekly message listing every partner a participant was matched with.
pub fn meeting_details(participant: &Participant, partners: &[Participant]) -> String {
    let count = partners.len();
    let mut text = format!(
        "Hi, {}!\n\nA new Random Coffee week has started!\n\n\
         We planned {count} {} for you this week:\n\n",
        escape_html(&participant.first_name),
        if count == 1 { "meeting" } else { "meetings" },
    );
    for partner in partners {
        let work = if partner.group_name().is_empty() {
            "Works at the coworking without colleagues".to_string()
        } else {
            format!("Works at the coworking for <i>{}</i>", escape_html(partner.group_name()))
        };
        let about = if partner.bio.trim().is_empty() {
            "Unfortunately wrote nothing about themselves".to_string()
        } else {
            format!("About: <i>{}</i>", escape_html(&partner.bio))
        };
        text.push_str(&format!(
            "<i>{}</i>\nPhone number: <b>{}</b>\n{work}\n{about}\n\n",
            escape_html(&partner.full_name()),
            escape_html(&partner.phone_number),
        ));
    }
    text.push_str(if count == 1 {
        "Text your partner soon, before the week fills up.\n\nGood luck!"
    } else {
        "Text your partners soon, before the week fills up.\n\nGood luck!"
    });
    text
}
