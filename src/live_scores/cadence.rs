use chrono::{DateTime, Utc};
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Sleep used when no upcoming fixture is known at all.
pub const NO_FIXTURE_SLEEP: Duration = Duration::from_secs(24 * HOUR);

/// How long an idle loop should sleep given the next known kickoff.
///
/// | time until kickoff | sleep            |
/// |--------------------|------------------|
/// | > 24h              | 12h              |
/// | 6h ..= 24h         | 3h               |
/// | 1h .. 6h           | 30min            |
/// | 10min .. 1h        | 5min             |
/// | < 10min or past    | `active`         |
/// | unknown            | 24h              |
pub fn sleep_for(now: DateTime<Utc>, next_fixture: Option<DateTime<Utc>>, active: Duration) -> Duration {
    let Some(next) = next_fixture else {
        return NO_FIXTURE_SLEEP;
    };
    let until = (next - now).num_seconds();
    if until <= 0 {
        return active;
    }
    let until = until as u64;

    if until > 24 * HOUR {
        Duration::from_secs(12 * HOUR)
    } else if until >= 6 * HOUR {
        Duration::from_secs(3 * HOUR)
    } else if until >= HOUR {
        Duration::from_secs(30 * MINUTE)
    } else if until >= 10 * MINUTE {
        Duration::from_secs(5 * MINUTE)
    } else {
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const ACTIVE: Duration = Duration::from_secs(15);

    fn at(offset: ChronoDuration) -> Duration {
        let now = Utc::now();
        sleep_for(now, Some(now + offset), ACTIVE)
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(at(ChronoDuration::days(30)), Duration::from_secs(12 * HOUR));
        assert_eq!(at(ChronoDuration::hours(12)), Duration::from_secs(3 * HOUR));
        assert_eq!(at(ChronoDuration::hours(2)), Duration::from_secs(30 * MINUTE));
        assert_eq!(at(ChronoDuration::minutes(30)), Duration::from_secs(5 * MINUTE));
        assert_eq!(at(ChronoDuration::minutes(5)), ACTIVE);
        assert_eq!(at(ChronoDuration::minutes(-5)), ACTIVE);
    }

    #[test]
    fn test_unknown_next_fixture_sleeps_a_day() {
        assert_eq!(sleep_for(Utc::now(), None, ACTIVE), NO_FIXTURE_SLEEP);
    }

    #[test]
    fn test_monotonic_as_kickoff_approaches() {
        let now = Utc::now();
        let mut previous = Duration::MAX;
        // walk from 3 days out down to kickoff in 1 minute steps
        for minutes_out in (0..=3 * 24 * 60).rev() {
            let next = now + ChronoDuration::minutes(minutes_out);
            let sleep = sleep_for(now, Some(next), ACTIVE);
            assert!(sleep <= previous, "non-monotonic at {} minutes", minutes_out);
            previous = sleep;
        }
        assert_eq!(previous, ACTIVE);
    }

    #[test]
    fn test_sleep_never_overshoots_bucket_floor() {
        let now = Utc::now();
        for minutes_out in [11, 61, 6 * 60 + 1, 24 * 60 + 1] {
            let next = now + ChronoDuration::minutes(minutes_out);
            let sleep = sleep_for(now, Some(next), ACTIVE);
            assert!(sleep.as_secs() < minutes_out as u64 * 60);
        }
    }
}
