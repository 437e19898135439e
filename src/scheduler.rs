//! Cron-driven weekly jobs.
//!
//! A `tokio::time::interval` ticker checks each configured schedule and
//! fires every job whose next occurrence fell into the last tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::ScheduleConfig;
use crate::coordinator::Coordinator;
use crate::error::{Error, MatchingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Invite everyone for next week.
    SendInvitations,
    /// Send this week's partner contacts.
    BroadcastMeetingDetails,
    /// Ask about this week's meetings.
    CollectFeedback,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendInvitations => "send_invitations",
            Self::BroadcastMeetingDetails => "broadcast_meeting_details",
            Self::CollectFeedback => "collect_feedback",
        }
    }

    pub async fn run(&self, coordinator: &Coordinator) -> Result<usize, Error> {
        match self {
            Self::SendInvitations => coordinator.send_invitations(None).await,
            Self::BroadcastMeetingDetails => {
                match coordinator.broadcast_meeting_details(Clock::current_week()).await {
                    Err(Error::Matching(MatchingError::AlreadyBroadcast(week))) => {
                        info!(%week, "Meeting details already broadcast, skipping");
                        Ok(0)
                    }
                    other => other,
                }
            }
            Self::CollectFeedback => coordinator.collect_feedback(Clock::current_week()).await,
        }
    }
}

struct Entry {
    job: Job,
    schedule: cron::Schedule,
    checked_at: DateTime<Utc>,
}

impl Entry {
    /// Whether an occurrence lies in `(checked_at, now]`. Advances the mark.
    fn due(&mut self, now: DateTime<Utc>) -> bool {
        let fire = self
            .schedule
            .after(&self.checked_at)
            .next()
            .is_some_and(|next| next <= now);
        self.checked_at = now;
        fire
    }
}

pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new(coordinator: Arc<Coordinator>, config: &ScheduleConfig) -> Self {
        Self::starting_at(coordinator, config, Utc::now())
    }

    fn starting_at(coordinator: Arc<Coordinator>, config: &ScheduleConfig, start: DateTime<Utc>) -> Self {
        let entries = [
            (Job::SendInvitations, &config.invite),
            (Job::BroadcastMeetingDetails, &config.broadcast),
            (Job::CollectFeedback, &config.feedback),
        ]
        .into_iter()
        .filter_map(|(job, schedule)| {
            schedule.clone().map(|schedule| Entry {
                job,
                schedule,
                checked_at: start,
            })
        })
        .collect();
        Self { coordinator, entries }
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.entries.iter().map(|e| e.job).collect()
    }

    /// Run every job due at `now`. Returns the jobs that fired.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<Job> {
        let mut fired = Vec::new();
        for entry in &mut self.entries {
            if !entry.due(now) {
                continue;
            }
            let job = entry.job;
            info!(job = job.name(), "Scheduled job firing");
            match job.run(&self.coordinator).await {
                Ok(count) => info!(job = job.name(), count, "Scheduled job finished"),
                Err(e) => error!(job = job.name(), error = %e, "Scheduled job failed"),
            }
            fired.push(job);
        }
        fired
    }
}

/// Spawn the background ticker.
pub fn spawn_scheduler(
    mut scheduler: Scheduler,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            scheduler.tick(Utc::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::dialog::testing::Fixture;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 26, h, m, 0).unwrap()
    }

    fn config(invite: &str) -> ScheduleConfig {
        ScheduleConfig {
            invite: Some(cron::Schedule::from_str(invite).unwrap()),
            tick: Duration::from_secs(60),
            ..ScheduleConfig::default()
        }
    }

    #[test]
    fn entry_fires_once_per_occurrence() {
        let mut entry = Entry {
            job: Job::SendInvitations,
            schedule: cron::Schedule::from_str("0 0 12 * * * *").unwrap(),
            checked_at: at(11, 58),
        };
        assert!(!entry.due(at(11, 59)));
        assert!(entry.due(at(12, 0)));
        assert!(!entry.due(at(12, 1)));
    }

    #[tokio::test]
    async fn only_configured_jobs_are_scheduled() {
        let fx = Fixture::new().await;
        let coordinator = Arc::new(Coordinator::new(fx.deps.clone(), Duration::ZERO));
        let scheduler = Scheduler::new(coordinator, &config("0 0 12 * * Fri *"));
        assert_eq!(scheduler.jobs(), vec![Job::SendInvitations]);
    }

    #[tokio::test]
    async fn due_job_invites_participants() {
        let fx = Fixture::new().await;
        fx.registered("1").await;
        let coordinator = Arc::new(Coordinator::new(fx.deps.clone(), Duration::ZERO));
        let mut scheduler =
            Scheduler::starting_at(coordinator, &config("0 0 12 * * * *"), at(11, 0));

        assert!(scheduler.tick(at(11, 30)).await.is_empty());
        assert_eq!(scheduler.tick(at(12, 0)).await, vec![Job::SendInvitations]);
        let next = Clock::next_week();
        assert!(fx.db.get_invitation("1", next).await.unwrap().is_some());
    }
}
