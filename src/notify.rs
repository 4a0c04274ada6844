//! Hand-off of point notifications (goals, red cards, kickoff, full time).
//!
//! The relay only decides *that* something notification-worthy happened and
//! what it should say. Device targeting, delivery and retries belong to
//! whatever implements [`Notifier`].

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::db::models::{Event, EventKind, FixtureSummary, Occurrence, ResourceKey};

/// Latest first-half minute at which a first sighting still counts as the
/// kick-off itself rather than a loop joining a match already underway.
const KICKOFF_GRACE_MINUTES: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub resource_key: ResourceKey,
    pub fixture_id: i64,
    pub kind: EventKind,
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Writes notifications to the log instead of pushing them anywhere.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: Notification) -> Result<()> {
        info!(
            league = n.resource_key.league,
            season = n.resource_key.season,
            fixture = n.fixture_id,
            "🔔 {} | {}",
            n.title,
            n.body
        );
        Ok(())
    }
}

/// Build the notification for an event, or `None` if the kind is not
/// notification-worthy.
pub fn describe(event: &Event) -> Option<Notification> {
    let f = &event.fixture;
    let title = format!(
        "{} {}-{} {}",
        f.home_team, f.home_score, f.away_score, f.away_team
    );
    let who = event.newest_occurrence.as_ref().map(actor_and_minute);

    let body = match event.kind {
        EventKind::Goal => match who {
            Some(who) => format!("⚽ Goal! {}", who),
            None => "⚽ Goal!".to_string(),
        },
        EventKind::MissedPenalty => match who {
            Some(who) => format!("❌ Penalty missed by {}", who),
            None => "❌ Penalty missed".to_string(),
        },
        EventKind::RedCard => match who {
            Some(who) => format!("🟥 Red card for {}", who),
            None => "🟥 Red card".to_string(),
        },
        EventKind::MatchStarted if is_kickoff(f) => "Kick-off!".to_string(),
        EventKind::MatchFinished => format!("Full time ({})", f.status_long),
        _ => return None,
    };

    Some(Notification {
        resource_key: event.resource_key,
        fixture_id: event.fixture_id,
        kind: event.kind,
        title,
        body,
    })
}

/// `match_started` marks a loop's first sighting of a fixture. Only the
/// sighting of a fixture that has just kicked off is worth a push.
fn is_kickoff(f: &FixtureSummary) -> bool {
    f.status == "1H" && f.elapsed.unwrap_or(0) <= KICKOFF_GRACE_MINUTES
}

fn actor_and_minute(occ: &Occurrence) -> String {
    let actor = occ.actor.as_deref().unwrap_or("unknown player");
    match occ.extra {
        Some(extra) => format!("{} {}+{}'", actor, occ.elapsed, extra),
        None => format!("{} {}'", actor, occ.elapsed),
    }
}
