//! Weekly pairing engine.
//!
//! Pure and synchronous: the caller loads the cohort, profiles and history,
//! hands them over as a [`Cohort`], and persists whatever [`arrange`] returns.
//! The search is a bounded best-of-N random walk, not an optimal assignment.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::Rng;
use serde::Serialize;

use crate::clock::YearWeek;
use crate::participants::{Gender, MeetingFrequency, MeetingMotivation, Participant};

/// Number of randomized passes per invocation.
pub const SHUFFLE_ITERATIONS: usize = 5;

/// The slice of a participant profile the engine looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    /// Affiliation name, empty when unaffiliated.
    pub group: String,
    pub gender: Option<Gender>,
    pub frequency: Option<MeetingFrequency>,
    pub motivation: Option<MeetingMotivation>,
}

impl From<&Participant> for Profile {
    fn from(p: &Participant) -> Self {
        Self {
            group: p.group_name().to_string(),
            gender: p.gender,
            frequency: p.meeting_frequency,
            motivation: p.meeting_motivation,
        }
    }
}

/// Everything needed to plan one week.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub week: YearWeek,
    /// Participants who accepted, in iteration order.
    pub members: Vec<String>,
    pub profiles: BTreeMap<String, Profile>,
    /// Confirmed past partners per member. Need not be symmetric on input.
    pub history: BTreeMap<String, BTreeSet<String>>,
    /// Members who had any meeting in the previous week.
    pub met_last_week: HashSet<String>,
}

impl Cohort {
    pub fn new(week: YearWeek) -> Self {
        Self {
            week,
            members: Vec::new(),
            profiles: BTreeMap::new(),
            history: BTreeMap::new(),
            met_last_week: HashSet::new(),
        }
    }

    /// Add a member with an empty history.
    pub fn add_member(&mut self, id: &str, profile: Profile) {
        if self.profiles.insert(id.to_string(), profile).is_none() {
            self.members.push(id.to_string());
        }
        self.history.entry(id.to_string()).or_default();
    }

    /// Record a confirmed past meeting between two members.
    pub fn add_history(&mut self, a: &str, b: &str) {
        self.history.entry(a.to_string()).or_default().insert(b.to_string());
        self.history.entry(b.to_string()).or_default().insert(a.to_string());
    }
}

/// Result of one [`arrange`] call, including the diagnostics admins see.
#[derive(Debug, Clone, Serialize)]
pub struct Arrangement {
    pub week: YearWeek,
    pub profiles: BTreeMap<String, Profile>,
    pub history: BTreeMap<String, BTreeSet<String>>,
    pub capacity: BTreeMap<String, u32>,
    pub possible_partners: BTreeMap<String, Vec<String>>,
    pub shuffle_iterations: usize,
    /// Pairings of the best pass, initiator first.
    pub meetings: Vec<(String, String)>,
    /// Residual capacity after the best pass.
    pub remaining_capacity: BTreeMap<String, u32>,
    pub left_alone: usize,
    pub left_underutilized: usize,
    pub has_more_people_to_meet: bool,
}

/// Meetings a member may take this week.
///
/// Low frequency means every other week: a member who met someone last
/// week sits this one out.
pub fn capacity_for(profile: &Profile, met_last_week: bool) -> u32 {
    match profile.frequency {
        Some(MeetingFrequency::High) => 2,
        Some(MeetingFrequency::Medium) | None => 1,
        Some(MeetingFrequency::Low) if met_last_week => 0,
        Some(MeetingFrequency::Low) => 1,
    }
}

/// Profile-level compatibility, independent of capacity and history.
///
/// Symmetric: a Dating participant on either side requires different genders.
pub fn compatible(u: &Profile, v: &Profile) -> bool {
    let groups_ok = (u.group.is_empty() && v.group.is_empty()) || u.group != v.group;
    groups_ok && dating_ok(u, v) && dating_ok(v, u)
}

fn dating_ok(from: &Profile, to: &Profile) -> bool {
    from.motivation != Some(MeetingMotivation::Dating) || from.gender != to.gender
}

fn possible_partners(
    cohort: &Cohort,
    history: &BTreeMap<String, BTreeSet<String>>,
    capacity: &BTreeMap<String, u32>,
) -> BTreeMap<String, Vec<String>> {
    cohort
        .members
        .iter()
        .map(|u| (u.clone(), partners_of(u, cohort, history, capacity)))
        .collect()
}

fn partners_of(
    u: &str,
    cohort: &Cohort,
    history: &BTreeMap<String, BTreeSet<String>>,
    capacity: &BTreeMap<String, u32>,
) -> Vec<String> {
    let has_room = |id: &str| capacity.get(id).copied().unwrap_or(0) > 0;
    if !has_room(u) {
        return Vec::new();
    }
    let Some(u_profile) = cohort.profiles.get(u) else {
        return Vec::new();
    };
    let seen = history.get(u);

    cohort
        .members
        .iter()
        .filter(|v| v.as_str() != u)
        .filter(|v| !seen.is_some_and(|s| s.contains(v.as_str())))
        .filter(|v| has_room(v.as_str()))
        .filter(|v| {
            cohort
                .profiles
                .get(v.as_str())
                .is_some_and(|v_profile| compatible(u_profile, v_profile))
        })
        .cloned()
        .collect()
}

struct Pass {
    meetings: Vec<(String, String)>,
    capacity: BTreeMap<String, u32>,
    unmatched: usize,
    underutilized: usize,
}

fn run_pass<R: Rng + ?Sized>(
    cohort: &Cohort,
    initial_history: &BTreeMap<String, BTreeSet<String>>,
    initial_capacity: &BTreeMap<String, u32>,
    rng: &mut R,
) -> Pass {
    let mut history = initial_history.clone();
    let mut capacity = initial_capacity.clone();
    let mut meetings = Vec::new();

    for u in &cohort.members {
        let candidates = partners_of(u, cohort, &history, &capacity);
        if candidates.is_empty() {
            continue;
        }
        let v = candidates[rng.gen_range(0..candidates.len())].clone();

        history.entry(u.clone()).or_default().insert(v.clone());
        history.entry(v.clone()).or_default().insert(u.clone());
        for id in [u, &v] {
            if let Some(c) = capacity.get_mut(id) {
                *c -= 1;
            }
        }
        meetings.push((u.clone(), v));
    }

    let unmatched = capacity
        .iter()
        .filter(|(id, c)| initial_capacity.get(id.as_str()) == Some(*c))
        .count();
    let underutilized = capacity.values().filter(|c| **c > 0).count();

    Pass {
        meetings,
        capacity,
        unmatched,
        underutilized,
    }
}

/// Plan the week's meetings for `cohort`.
///
/// Runs up to [`SHUFFLE_ITERATIONS`] passes, each from the same starting
/// capacity and history. The first pass is the initial best; a later pass
/// replaces it only when it leaves strictly fewer members unmatched *and*
/// strictly fewer under-matched. A pass with neither stops the search.
pub fn arrange<R: Rng + ?Sized>(cohort: &Cohort, rng: &mut R) -> Arrangement {
    let mut history: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for u in &cohort.members {
        let past = cohort.history.get(u).cloned().unwrap_or_default();
        for v in &past {
            history.entry(v.clone()).or_default().insert(u.clone());
        }
        history.entry(u.clone()).or_default().extend(past);
    }
    history.retain(|id, _| cohort.profiles.contains_key(id));

    let capacity: BTreeMap<String, u32> = cohort
        .members
        .iter()
        .filter_map(|id| {
            let profile = cohort.profiles.get(id)?;
            Some((id.clone(), capacity_for(profile, cohort.met_last_week.contains(id))))
        })
        .collect();

    let initial_partners = possible_partners(cohort, &history, &capacity);

    let mut best: Option<Pass> = None;
    for iteration in 0..SHUFFLE_ITERATIONS {
        let pass = run_pass(cohort, &history, &capacity, rng);
        tracing::debug!(
            week = %cohort.week,
            iteration,
            meetings = pass.meetings.len(),
            unmatched = pass.unmatched,
            underutilized = pass.underutilized,
            "Matching pass finished"
        );

        let perfect = pass.unmatched == 0 && pass.underutilized == 0;
        let better = match &best {
            None => true,
            Some(b) => pass.unmatched < b.unmatched && pass.underutilized < b.underutilized,
        };
        if better || perfect {
            best = Some(pass);
        }
        if perfect {
            break;
        }
    }

    let (meetings, remaining_capacity, left_alone, left_underutilized) = match best {
        Some(p) => (p.meetings, p.capacity, p.unmatched, p.underutilized),
        None => (Vec::new(), capacity.clone(), 0, 0),
    };

    let has_more_people_to_meet = initial_partners.values().any(|p| !p.is_empty());

    Arrangement {
        week: cohort.week,
        profiles: cohort.profiles.clone(),
        history,
        capacity,
        possible_partners: initial_partners,
        shuffle_iterations: SHUFFLE_ITERATIONS,
        meetings,
        remaining_capacity,
        left_alone,
        left_underutilized,
        has_more_people_to_meet,
    }
}
