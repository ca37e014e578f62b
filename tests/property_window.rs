use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use proptest::prelude::*;

use docker_log_harvester::config::CutoffPolicy;
use docker_log_harvester::remote::remote_key;
use docker_log_harvester::window::{ArtifactKind, FixedClock, HourBucket, TimeWindower, WindowKey};

fn windower_at(secs: i64) -> TimeWindower {
    let now = DateTime::<Utc>::from_timestamp(secs, 0).expect("in range");
    TimeWindower::new(Arc::new(FixedClock(now)), chrono_tz::Europe::Paris, 10)
}

fn bucket_strategy() -> impl Strategy<Value = HourBucket> {
    (0_i64..3650, 0_u32..24).prop_map(|(day, hour)| {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).expect("date") + Duration::days(day);
        HourBucket::new(date, hour).expect("valid hour")
    })
}

fn kind_strategy() -> impl Strategy<Value = ArtifactKind> {
    prop_oneof![Just(ArtifactKind::All), Just(ArtifactKind::Errors)]
}

// 2020-01-01 .. 2030-01-01, covering many DST transitions.
const FROM: i64 = 1_577_836_800;
const TO: i64 = 1_893_456_000;

proptest! {
    #[test]
    fn pt_previous_hour_wraps_to_prior_day(bucket in bucket_strategy()) {
        let prev = bucket.previous();
        prop_assert_eq!(prev.hour, (bucket.hour + 23) % 24);
        if bucket.hour == 0 {
            prop_assert_eq!(prev.date + Duration::days(1), bucket.date);
        } else {
            prop_assert_eq!(prev.date, bucket.date);
        }
    }

    #[test]
    fn pt_previous_bucket_is_strictly_earlier(secs in FROM..TO) {
        let w = windower_at(secs);
        let current = w.current_bucket();
        let previous = w.previous_bucket();
        prop_assert!(current.hour < 24);
        prop_assert!(previous < current);
    }

    #[test]
    fn pt_grace_window_matches_minute(secs in FROM..TO) {
        let w = windower_at(secs);
        let minute = (secs / 60) % 60;
        // Paris offsets are whole hours, so the minute is zone-independent.
        prop_assert_eq!(w.is_upload_grace_window(), minute < 10);
    }

    #[test]
    fn pt_remote_keys_are_injective(
        a in ("[a-z0-9][a-z0-9_.-]{0,12}", bucket_strategy(), kind_strategy()),
        b in ("[a-z0-9][a-z0-9_.-]{0,12}", bucket_strategy(), kind_strategy()),
    ) {
        let key_a = remote_key("vps", &WindowKey::new(a.0.clone(), a.1), a.2);
        let key_b = remote_key("vps", &WindowKey::new(b.0.clone(), b.1), b.2);
        prop_assert_eq!(key_a == key_b, a == b);
        prop_assert!(key_a.starts_with("vps/"));
        prop_assert!(key_a.ends_with(".log.gz"));
    }

    #[test]
    fn pt_cutoff_never_precedes_cursor(
        window_secs in 1_u64..7200,
        cursor_offset in -20_000_i64..20_000,
        lookback in any::<bool>(),
    ) {
        let now = DateTime::<Utc>::from_timestamp(1_750_000_000, 0).expect("in range");
        let window = StdDuration::from_secs(window_secs);
        let policy = if lookback {
            CutoffPolicy::Lookback { window }
        } else {
            CutoffPolicy::Sliding { window }
        };
        let cursor = now + Duration::seconds(cursor_offset);

        let without = policy.cutoff(now, None);
        let with = policy.cutoff(now, Some(cursor));
        prop_assert_eq!(without, now - Duration::seconds(window_secs as i64));
        prop_assert!(with >= cursor);
        prop_assert!(with >= without);
    }
}
