//! Change detection between consecutive poll cycles.
//!
//! Everything in here is a pure function of the previous and current
//! observations: no clocks are read and no collaborators are called, so the
//! poll loop can hand a cycle over and get back exactly the events to fan out.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::db::models::{
    Event, EventKind, FixtureObservation, FixtureStatus, FixtureSummary, Occurrence,
    OccurrenceId, ResourceKey,
};

/// Last-known state of one fixture, as far as change detection cares.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub fixture_id: i64,
    pub home_score: i32,
    pub away_score: i32,
    pub status: FixtureStatus,
    /// Sorted by match clock
    pub occurrences: Vec<Occurrence>,
}

impl Snapshot {
    pub fn from_observation(obs: &FixtureObservation) -> Self {
        Snapshot {
            fixture_id: obs.fixture_id,
            home_score: obs.home_score.unwrap_or(0),
            away_score: obs.away_score.unwrap_or(0),
            status: obs.status.clone(),
            occurrences: sorted_occurrences(&obs.occurrences),
        }
    }

    fn identities(&self) -> HashSet<OccurrenceId> {
        self.occurrences.iter().map(Occurrence::identity).collect()
    }
}

/// Score or status code differs between a snapshot and a fresh observation.
pub fn scoreline_moved(previous: &Snapshot, obs: &FixtureObservation) -> bool {
    previous.home_score != obs.home_score.unwrap_or(0)
        || previous.away_score != obs.away_score.unwrap_or(0)
        || previous.status.short != obs.status.short
}

/// Per-resource working memory: fixture id → last snapshot.
pub type ResourceState = HashMap<i64, Snapshot>;

/// Outcome of comparing two snapshots that differ.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: EventKind,
    /// The newest occurrence absent from the previous snapshot, if any
    pub newest_occurrence: Option<Occurrence>,
}

/// Compare two snapshots of the same fixture. `None` means nothing worth
/// telling subscribers about happened.
pub fn diff(previous: Option<&Snapshot>, current: &Snapshot) -> Option<Change> {
    let Some(prev) = previous else {
        return Some(Change {
            kind: EventKind::MatchStarted,
            newest_occurrence: None,
        });
    };

    let prev_ids = prev.identities();
    let new_occurrences: Vec<&Occurrence> = current
        .occurrences
        .iter()
        .filter(|o| !prev_ids.contains(&o.identity()))
        .collect();

    let score_changed =
        prev.home_score != current.home_score || prev.away_score != current.away_score;
    let status_changed = prev.status.short != current.status.short;
    let occurrences_changed = !new_occurrences.is_empty() || prev_ids != current.identities();
    let clock_advanced = current.status.is_in_progress()
        && match (prev.status.elapsed, current.status.elapsed) {
            (Some(before), Some(now)) => now - before >= 1,
            (None, Some(_)) => true,
            _ => false,
        };

    if !(score_changed || status_changed || occurrences_changed || clock_advanced) {
        return None;
    }

    // Occurrences are clock-sorted, so the last new one is the newest.
    let newest = new_occurrences.last().copied();
    if let Some(kind) = newest.and_then(classify_occurrence) {
        return Some(Change {
            kind,
            newest_occurrence: newest.cloned(),
        });
    }

    let score_rose = current.home_score > prev.home_score || current.away_score > prev.away_score;
    let kind = if score_rose {
        EventKind::Goal
    } else if score_changed {
        // a goal taken back, usually after a VAR review
        EventKind::Var
    } else if status_changed {
        EventKind::StatusUpdate
    } else {
        EventKind::TimeUpdate
    };
    Some(Change {
        kind,
        newest_occurrence: newest.cloned(),
    })
}

/// Map one occurrence onto an event kind. Unknown types return `None` so the
/// caller falls back to score/status/time rules.
pub fn classify_occurrence(occ: &Occurrence) -> Option<EventKind> {
    let detail = occ.detail.to_lowercase();
    match occ.kind.to_lowercase().as_str() {
        "goal" if detail.contains("missed") => Some(EventKind::MissedPenalty),
        "goal" => Some(EventKind::Goal),
        "card" if detail.contains("red") || detail.contains("second yellow") => {
            Some(EventKind::RedCard)
        }
        "card" if detail.contains("yellow") => Some(EventKind::YellowCard),
        "card" => Some(EventKind::Card),
        "subst" | "substitution" => Some(EventKind::Substitution),
        "var" => Some(EventKind::Var),
        _ => None,
    }
}

/// Result of classifying one poll cycle against the previous state.
#[derive(Debug)]
pub struct CycleOutcome {
    /// Events for fixtures still live, in observation order
    pub events: Vec<Event>,
    /// Fixtures present last cycle but absent now; presumed finished
    pub vanished: Vec<i64>,
    /// Replacement for the previous state
    pub state: ResourceState,
}

pub fn classify_cycle(
    key: ResourceKey,
    previous: &ResourceState,
    observations: &[FixtureObservation],
    now: DateTime<Utc>,
) -> CycleOutcome {
    let mut events = Vec::new();
    let mut state = ResourceState::with_capacity(observations.len());

    for obs in observations {
        let snapshot = Snapshot::from_observation(obs);
        if let Some(change) = diff(previous.get(&obs.fixture_id), &snapshot) {
            events.push(build_event(key, obs, change.kind, change.newest_occurrence, now));
        }
        state.insert(obs.fixture_id, snapshot);
    }

    let mut vanished: Vec<i64> = previous
        .keys()
        .filter(|id| !state.contains_key(id))
        .copied()
        .collect();
    vanished.sort_unstable();

    CycleOutcome {
        events,
        vanished,
        state,
    }
}

/// `match_finished` event from an authoritative final observation.
pub fn finished_event(key: ResourceKey, final_obs: &FixtureObservation, now: DateTime<Utc>) -> Event {
    build_event(key, final_obs, EventKind::MatchFinished, None, now)
}

pub fn build_event(
    key: ResourceKey,
    obs: &FixtureObservation,
    kind: EventKind,
    newest_occurrence: Option<Occurrence>,
    now: DateTime<Utc>,
) -> Event {
    Event {
        resource_key: key,
        fixture_id: obs.fixture_id,
        occurred_at: now,
        kind,
        fixture: FixtureSummary::from(obs),
        occurrences: sorted_occurrences(&obs.occurrences),
        newest_occurrence,
    }
}

fn sorted_occurrences(occurrences: &[Occurrence]) -> Vec<Occurrence> {
    let mut sorted = occurrences.to_vec();
    sorted.sort_by_key(Occurrence::clock);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Team;

    fn occ(elapsed: i32, kind: &str, detail: &str, actor: &str) -> Occurrence {
        Occurrence {
            elapsed,
            extra: None,
            kind: kind.into(),
            detail: detail.into(),
            actor_id: Some(actor.len() as i64),
            actor: Some(actor.into()),
            assist: None,
            team_id: Some(1),
            team: Some("Home".into()),
            comments: None,
        }
    }

    fn obs(
        id: i64,
        score: (i32, i32),
        status: &str,
        elapsed: i32,
        occurrences: Vec<Occurrence>,
    ) -> FixtureObservation {
        FixtureObservation {
            fixture_id: id,
            key: ResourceKey::new(39, 2024),
            kickoff: Utc::now(),
            venue: None,
            round: None,
            home: Team { id: 1, name: "Home".into(), logo: Some("https://a/1.png".into()) },
            away: Team { id: 2, name: "Away".into(), logo: Some("https://a/2.png".into()) },
            home_score: Some(score.0),
            away_score: Some(score.1),
            status: FixtureStatus {
                short: status.into(),
                long: String::new(),
                elapsed: Some(elapsed),
            },
            occurrences,
        }
    }

    fn snap(score: (i32, i32), status: &str, elapsed: i32, occurrences: Vec<Occurrence>) -> Snapshot {
        Snapshot::from_observation(&obs(1, score, status, elapsed, occurrences))
    }

    #[test]
    fn test_first_sighting_is_match_started() {
        let curr = snap((0, 0), "1H", 1, vec![]);
        let change = diff(None, &curr).unwrap();
        assert_eq!(change.kind, EventKind::MatchStarted);
        assert!(change.newest_occurrence.is_none());
    }

    #[test]
    fn test_identical_snapshots_do_not_change() {
        let s = snap((1, 0), "1H", 30, vec![occ(23, "Goal", "Normal Goal", "X")]);
        assert!(diff(Some(&s), &s).is_none());
    }

    #[test]
    fn test_new_goal_occurrence() {
        let prev = snap((0, 0), "1H", 22, vec![]);
        let curr = snap((1, 0), "1H", 23, vec![occ(23, "Goal", "Normal Goal", "X")]);
        let change = diff(Some(&prev), &curr).unwrap();
        assert_eq!(change.kind, EventKind::Goal);
        assert_eq!(change.newest_occurrence.unwrap().actor.as_deref(), Some("X"));
    }

    #[test]
    fn test_missed_penalty() {
        let prev = snap((0, 0), "1H", 30, vec![]);
        let curr = snap((0, 0), "1H", 30, vec![occ(30, "Goal", "Missed Penalty", "Y")]);
        assert_eq!(diff(Some(&prev), &curr).unwrap().kind, EventKind::MissedPenalty);
    }

    #[test]
    fn test_card_classification() {
        let prev = snap((0, 0), "2H", 60, vec![]);
        let cases = [
            ("Red Card", EventKind::RedCard),
            ("Second Yellow card", EventKind::RedCard),
            ("Yellow Card", EventKind::YellowCard),
            ("Card upgrade", EventKind::Card),
        ];
        for (detail, expected) in cases {
            let curr = snap((0, 0), "2H", 60, vec![occ(60, "Card", detail, "Z")]);
            assert_eq!(diff(Some(&prev), &curr).unwrap().kind, expected, "{}", detail);
        }
    }

    #[test]
    fn test_substitution_and_var() {
        let prev = snap((0, 0), "2H", 70, vec![]);
        let sub = snap((0, 0), "2H", 70, vec![occ(70, "subst", "Substitution 1", "S")]);
        let var = snap((0, 0), "2H", 70, vec![occ(70, "Var", "Goal cancelled", "V")]);
        assert_eq!(diff(Some(&prev), &sub).unwrap().kind, EventKind::Substitution);
        assert_eq!(diff(Some(&prev), &var).unwrap().kind, EventKind::Var);
    }

    #[test]
    fn test_newest_new_occurrence_wins() {
        let prev = snap((0, 0), "2H", 60, vec![]);
        let curr = snap(
            (1, 0),
            "2H",
            66,
            vec![
                occ(65, "Goal", "Normal Goal", "A"),
                occ(61, "Card", "Yellow Card", "B"),
            ],
        );
        let change = diff(Some(&prev), &curr).unwrap();
        assert_eq!(change.kind, EventKind::Goal);
        assert_eq!(change.newest_occurrence.unwrap().actor.as_deref(), Some("A"));
    }

    #[test]
    fn test_score_without_occurrence_is_goal() {
        let prev = snap((1, 0), "2H", 70, vec![]);
        let curr = snap((2, 0), "2H", 70, vec![]);
        let change = diff(Some(&prev), &curr).unwrap();
        assert_eq!(change.kind, EventKind::Goal);
        assert!(change.newest_occurrence.is_none());
    }

    #[test]
    fn test_score_taken_back_is_var() {
        let prev = snap((2, 0), "2H", 70, vec![occ(68, "Goal", "Normal Goal", "X")]);
        let curr = snap((1, 0), "2H", 71, vec![]);
        let change = diff(Some(&prev), &curr).unwrap();
        assert_eq!(change.kind, EventKind::Var);
        assert!(change.newest_occurrence.is_none());
    }

    #[test]
    fn test_status_change_is_status_update() {
        let prev = snap((0, 0), "1H", 45, vec![]);
        let curr = snap((0, 0), "HT", 45, vec![]);
        assert_eq!(diff(Some(&prev), &curr).unwrap().kind, EventKind::StatusUpdate);
    }

    #[test]
    fn test_clock_advance_is_time_update() {
        let prev = snap((0, 0), "2H", 55, vec![]);
        let curr = snap((0, 0), "2H", 56, vec![]);
        assert_eq!(diff(Some(&prev), &curr).unwrap().kind, EventKind::TimeUpdate);
    }

    #[test]
    fn test_clock_advance_ignored_when_not_in_progress() {
        let prev = snap((0, 0), "NS", 0, vec![]);
        let curr = snap((0, 0), "NS", 3, vec![]);
        assert!(diff(Some(&prev), &curr).is_none());
    }

    #[test]
    fn test_logo_churn_is_ignored_and_diff_is_deterministic() {
        let mut a = obs(1, (1, 0), "1H", 30, vec![occ(23, "Goal", "Normal Goal", "X")]);
        let mut b = a.clone();
        b.home.logo = Some("https://cdn/new-logo.png".into());
        b.occurrences[0].actor = Some("X (renamed)".into());
        let prev = Snapshot::from_observation(&a);
        let curr = Snapshot::from_observation(&b);
        assert!(diff(Some(&prev), &curr).is_none());

        a.status.elapsed = Some(31);
        let later = Snapshot::from_observation(&a);
        let first = diff(Some(&prev), &later);
        let second = diff(Some(&prev), &later);
        assert_eq!(first, second);
    }

    #[test]
    fn test_classify_cycle_reports_vanished_fixtures() {
        let key = ResourceKey::new(39, 2024);
        let now = Utc::now();
        let first = classify_cycle(
            key,
            &ResourceState::new(),
            &[obs(1, (0, 0), "1H", 10, vec![]), obs(2, (0, 0), "1H", 10, vec![])],
            now,
        );
        assert_eq!(first.events.len(), 2);
        assert!(first.events.iter().all(|e| e.kind == EventKind::MatchStarted));
        assert!(first.vanished.is_empty());

        let second = classify_cycle(key, &first.state, &[obs(2, (0, 0), "1H", 10, vec![])], now);
        assert!(second.events.is_empty());
        assert_eq!(second.vanished, vec![1]);
        assert_eq!(second.state.len(), 1);
    }

    #[test]
    fn test_event_occurrences_are_clock_sorted() {
        let key = ResourceKey::new(39, 2024);
        let o = obs(
            1,
            (1, 1),
            "2H",
            80,
            vec![occ(75, "Goal", "Normal Goal", "B"), occ(12, "Goal", "Own Goal", "A")],
        );
        let event = build_event(key, &o, EventKind::Goal, None, Utc::now());
        let minutes: Vec<i32> = event.occurrences.iter().map(|o| o.elapsed).collect();
        assert_eq!(minutes, vec![12, 75]);
        assert_eq!(event.fixture.home_score, 1);
    }
}
