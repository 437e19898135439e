//! End-to-end test of one Random Coffee week.
//!
//! Four people register through the chat flow, get matched for next week,
//! receive their partners' contacts through the admin API and report how
//! the meetings went. Storage is an in-memory libSQL database and outgoing
//! messages are recorded instead of sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use random_coffee::api::{ApiState, admin_routes};
use random_coffee::channels::{
    DeliveryReceipt, InboundEvent, MessageEdit, Messenger, OutgoingMessage, Sender,
};
use random_coffee::clock::{Clock, YearWeek};
use random_coffee::coordinator::Coordinator;
use random_coffee::dialog::DialogDeps;
use random_coffee::dialog::replies::{
    ACCEPT_INVITATION, ALONE, FREQUENCIES, GENDERS, MOTIVATIONS, NO, PHONE_CORRECT, REGISTER,
    SKIP, YES, label_of,
};
use random_coffee::error::ChannelError;
use random_coffee::meetings::Matchmaker;
use random_coffee::participants::{Gender, MeetingFrequency, MeetingMotivation};
use random_coffee::store::{Database, LibSqlBackend};

const API_TOKEN: &str = "admin-token";

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
    next_id: AtomicU64,
}

impl Outbox {
    fn texts_to(&self, chat_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Messenger for Outbox {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(
        &self,
        chat_id: &str,
        message: OutgoingMessage,
    ) -> Result<DeliveryReceipt, ChannelError> {
        self.sent.lock().unwrap().push((chat_id.to_string(), message.text));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DeliveryReceipt { message_id: id.to_string() })
    }

    async fn edit(&self, _chat_id: &str, _message_id: &str, _edit: MessageEdit) -> Result<(), ChannelError> {
        Ok(())
    }
}

struct Harness {
    db: Arc<dyn Database>,
    outbox: Arc<Outbox>,
    coordinator: Arc<Coordinator>,
    api_base: String,
    http: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let outbox = Arc::new(Outbox::default());
        let deps = Arc::new(DialogDeps {
            db: Arc::clone(&db),
            messenger: outbox.clone(),
            matchmaker: Arc::new(Matchmaker::with_seed(Arc::clone(&db), 42)),
            community: "Test Hub".into(),
        });
        let coordinator = Arc::new(Coordinator::new(deps, Duration::ZERO));

        let app = admin_routes(ApiState {
            coordinator: Arc::clone(&coordinator),
            token: Arc::new(SecretString::from(API_TOKEN.to_string())),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            db,
            outbox,
            coordinator,
            api_base: format!("http://127.0.0.1:{port}"),
            http: reqwest::Client::new(),
        }
    }

    fn sender(id: &str) -> Sender {
        Sender {
            id: id.to_string(),
            first_name: format!("Member{id}"),
            last_name: String::new(),
            username: format!("member{id}"),
        }
    }

    async fn say(&self, id: &str, text: &str) {
        let event = InboundEvent::text(Self::sender(id), "1", text);
        self.coordinator.handle_event(event).await.unwrap();
    }

    async fn share_contact(&self, id: &str, phone: &str) {
        let event = InboundEvent::contact(Self::sender(id), "1", phone);
        self.coordinator.handle_event(event).await.unwrap();
    }

    async fn register(&self, id: &str, gender: Gender) {
        self.say(id, "/start").await;
        self.say(id, REGISTER).await;
        self.say(id, label_of(&GENDERS, gender)).await;
        self.say(id, YES).await;
        self.say(id, SKIP).await;
        self.share_contact(id, &format!("+49151000000{id}")).await;
        self.say(id, PHONE_CORRECT).await;
        self.say(id, ALONE).await;
        self.say(id, label_of(&FREQUENCIES, MeetingFrequency::Medium)).await;
        self.say(id, label_of(&MOTIVATIONS, MeetingMotivation::Fun)).await;
        self.say(id, "Coffee first, then everything else").await;
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(API_TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn schedule(&self, week: YearWeek) -> Value {
        self.http
            .get(format!("{}/api/schedule", self.api_base))
            .query(&[("year", week.year().to_string()), ("week", week.week().to_string())])
            .bearer_auth(API_TOKEN)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

fn week_body(week: YearWeek) -> Value {
    json!({"year": week.year(), "week": week.week()})
}

#[tokio::test]
async fn registration_matching_broadcast_and_feedback() {
    let h = Harness::start().await;
    let week = Clock::next_week();
    let ids = ["1", "2", "3", "4"];

    for (i, id) in ids.iter().enumerate() {
        let gender = if i % 2 == 0 { Gender::Male } else { Gender::Female };
        h.register(id, gender).await;
    }

    for id in ids {
        let p = h.db.get_participant(id).await.unwrap().unwrap();
        assert!(p.is_registered(), "participant {id} should be registered");
        assert_eq!(p.phone_number, format!("+49151000000{id}"));
        let invitation = h.db.get_invitation(id, week).await.unwrap().unwrap();
        assert_eq!(invitation.accepted, Some(true));
    }

    // Four compatible participants with one meeting each pair up completely.
    let meetings = h.db.list_meetings(week).await.unwrap();
    assert_eq!(meetings.len(), 2);

    let overview = h.schedule(week).await;
    assert_eq!(overview["funnel"]["accepted"].as_array().unwrap().len(), 4);
    assert_eq!(overview["statistics"]["gender"]["male"], 2);
    assert_eq!(overview["meeting_details_broadcast"], false);

    let (status, body) = h.post("/api/connect_participants", week_body(week)).await;
    assert_eq!(status, 200);
    assert_eq!(body["notified"], 4);
    for m in &meetings {
        let details = h.outbox.texts_to(&m.participant_a);
        let last = details.last().unwrap();
        assert!(last.contains(&format!("Member{}", m.participant_b)));
        assert!(last.contains(&format!("+49151000000{}", m.participant_b)));
    }

    let (status, _) = h.post("/api/connect_participants", week_body(week)).await;
    assert_eq!(status, 409);

    // Pairings are frozen once contacts went out.
    let (status, body) = h.post("/api/shuffle_meetings", week_body(week)).await;
    assert_eq!(status, 200);
    assert_eq!(body["rearranged"], false);
    assert_eq!(h.db.list_meetings(week).await.unwrap().len(), 2);

    let (status, body) = h.post("/api/collect_feedback", week_body(week)).await;
    assert_eq!(status, 200);
    assert_eq!(body["asked"], 4);

    let first = &meetings[0];
    h.say(&first.participant_a, YES).await;
    h.say(&first.participant_a, YES).await;
    h.say(&first.participant_b, NO).await;

    let second = &meetings[1];
    h.say(&second.participant_a, NO).await;

    let overview = h.schedule(week).await;
    assert_eq!(overview["meeting_details_broadcast"], true);
    let rows = overview["meetings"].as_array().unwrap();
    let row = rows
        .iter()
        .find(|r| r["participant_a"]["id"] == first.participant_a.as_str())
        .unwrap();
    assert_eq!(row["took_place"], true);
    assert_eq!(row["was_ok"], true);
    let row = rows
        .iter()
        .find(|r| r["participant_a"]["id"] == second.participant_a.as_str())
        .unwrap();
    assert_eq!(row["took_place"], false);
}

#[tokio::test]
async fn resent_invitation_leaves_the_week_until_accepted() {
    let h = Harness::start().await;
    let week = Clock::next_week();
    for id in ["1", "2"] {
        h.register(id, Gender::Female).await;
    }
    assert_eq!(h.db.list_meetings(week).await.unwrap().len(), 1);

    let (status, _) = h
        .post("/api/resend_invitation", json!({"participant_id": "2", "year": week.year(), "week": week.week()}))
        .await;
    assert_eq!(status, 200);
    assert!(h.db.list_meetings(week).await.unwrap().is_empty());

    h.say("2", ACCEPT_INVITATION).await;
    let invitation = h.db.get_invitation("2", week).await.unwrap().unwrap();
    assert_eq!(invitation.accepted, Some(true));
    assert_eq!(h.db.list_meetings(week).await.unwrap().len(), 1);
}

#[tokio::test]
async fn admin_api_requires_token() {
    let h = Harness::start().await;
    let resp = h
        .http
        .get(format!("{}/api/schedule", h.api_base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let resp = h.http.get(format!("{}/health", h.api_base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}
