//! Matchmaker: loads a week's cohort, runs the engine and persists pairings.
//!
//! Shared by the dialog (invitation answers re-plan the week) and the
//! coordinator (admin shuffles, broadcasts).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::clock::YearWeek;
use crate::error::{DatabaseError, Error, MatchingError};
use crate::meetings::matching::{self, Arrangement, Cohort, Profile};
use crate::meetings::model::Meeting;
use crate::store::Database;

pub struct Matchmaker {
    db: Arc<dyn Database>,
    locks: Mutex<HashMap<YearWeek, Arc<tokio::sync::Mutex<()>>>>,
    rng: Mutex<StdRng>,
}

impl Matchmaker {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self::with_rng(db, StdRng::from_entropy())
    }

    /// Deterministic pairings, for tests.
    pub fn with_seed(db: Arc<dyn Database>, seed: u64) -> Self {
        Self::with_rng(db, StdRng::seed_from_u64(seed))
    }

    fn with_rng(db: Arc<dyn Database>, rng: StdRng) -> Self {
        Self {
            db,
            locks: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Advisory lock serializing planning and broadcasting of one week.
    pub async fn lock_week(&self, week: YearWeek) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(week).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn is_broadcast(&self, week: YearWeek) -> Result<bool, Error> {
        Ok(self.db.week_broadcast(week).await?)
    }

    /// Everyone who accepted the week's invitation, with history and last-week activity.
    pub async fn load_cohort(&self, week: YearWeek) -> Result<Cohort, Error> {
        let mut cohort = Cohort::new(week);

        for invitation in self.db.list_invitations(week).await? {
            if invitation.accepted != Some(true) {
                continue;
            }
            let participant = self
                .db
                .get_participant(&invitation.participant_id)
                .await?
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "participant".into(),
                    id: invitation.participant_id.clone(),
                })?;
            cohort.add_member(&participant.id, Profile::from(&participant));
        }

        for meeting in self.db.list_confirmed_meetings().await? {
            if cohort.profiles.contains_key(&meeting.participant_a)
                || cohort.profiles.contains_key(&meeting.participant_b)
            {
                cohort.add_history(&meeting.participant_a, &meeting.participant_b);
            }
        }

        for meeting in self.db.list_meetings(week.previous()).await? {
            cohort.met_last_week.insert(meeting.participant_a);
            cohort.met_last_week.insert(meeting.participant_b);
        }

        Ok(cohort)
    }

    /// Re-plan a week from scratch.
    ///
    /// Returns `None` without touching anything once the week has been
    /// broadcast, and `None` after clearing old rows when nobody accepted.
    pub async fn rearrange(&self, week: YearWeek) -> Result<Option<Arrangement>, Error> {
        let _guard = self.lock_week(week).await;

        if self.db.week_broadcast(week).await? {
            info!(%week, "Meeting details were already broadcast, keeping pairings");
            return Ok(None);
        }

        let removed = self.db.delete_meetings(week).await?;
        if removed > 0 {
            debug!(%week, removed, "Dropped previous pairings");
        }

        let cohort = self.load_cohort(week).await?;
        if cohort.members.is_empty() {
            info!(%week, "Nobody accepted an invitation, nothing to arrange");
            return Ok(None);
        }

        let arrangement = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            matching::arrange(&cohort, &mut *rng)
        };

        self.store_pairs(&cohort, &arrangement.meetings).await?;

        info!(
            %week,
            cohort = cohort.members.len(),
            meetings = arrangement.meetings.len(),
            left_alone = arrangement.left_alone,
            left_underutilized = arrangement.left_underutilized,
            "Meetings arranged"
        );

        Ok(Some(arrangement))
    }

    /// Insert the pairs, or nothing at all if any of them names someone
    /// outside the cohort.
    async fn store_pairs(&self, cohort: &Cohort, pairs: &[(String, String)]) -> Result<(), Error> {
        if let Some(stranger) = pairs
            .iter()
            .flat_map(|(a, b)| [a, b])
            .find(|id| !cohort.profiles.contains_key(*id))
        {
            return Err(MatchingError::UnknownParticipant {
                participant: stranger.clone(),
                week: cohort.week,
            }
            .into());
        }

        for (a, b) in pairs {
            self.db.insert_meeting(&Meeting::new(cohort.week, a, b)).await?;
        }
        Ok(())
    }
}
