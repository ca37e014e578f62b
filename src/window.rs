//! Hourly window arithmetic in a fixed civil timezone.
//!
//! Every artifact name and remote key is derived from an [`HourBucket`]
//! computed here, so bucket boundaries do not depend on the host clock's
//! own timezone.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::constants::ARTIFACT_EXTENSION;

/// Source of "now". Injected so windowing and scheduling are testable
/// without real time passing.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Calendar date plus hour of day, in the reference timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HourBucket {
    pub date: NaiveDate,
    pub hour: u32,
}

impl HourBucket {
    pub fn new(date: NaiveDate, hour: u32) -> Option<Self> {
        (hour < 24).then_some(Self { date, hour })
    }

    /// The civil hour before this one; hour 0 wraps to 23 of the prior day.
    pub fn previous(&self) -> Self {
        if self.hour == 0 {
            Self {
                date: self.date.pred_opt().unwrap_or(NaiveDate::MIN),
                hour: 23,
            }
        } else {
            Self {
                date: self.date,
                hour: self.hour - 1,
            }
        }
    }

    pub fn date_label(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `HHh00min`, the hour component of artifact names.
    pub fn hour_label(&self) -> String {
        format!("{:02}h00min", self.hour)
    }

    pub fn parse_date_label(label: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(label, "%Y-%m-%d").ok()
    }

    pub fn parse_hour_label(label: &str) -> Option<u32> {
        let hour = label.strip_suffix("h00min")?;
        if hour.len() != 2 {
            return None;
        }
        hour.parse::<u32>().ok().filter(|h| *h < 24)
    }
}

impl fmt::Display for HourBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date_label(), self.hour_label())
    }
}

/// Stream class of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    All,
    Errors,
}

impl ArtifactKind {
    pub const BOTH: [ArtifactKind; 2] = [ArtifactKind::All, ArtifactKind::Errors];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Errors => "errors",
        }
    }

    /// `HHh00min_<kind>.log`
    pub fn file_name(self, bucket: &HourBucket) -> String {
        format!(
            "{}_{}.{}",
            bucket.hour_label(),
            self.as_str(),
            ARTIFACT_EXTENSION
        )
    }

    /// Inverse of [`ArtifactKind::file_name`]: recovers the hour and kind.
    pub fn parse_file_name(name: &str) -> Option<(u32, ArtifactKind)> {
        let stem = name.strip_suffix(&format!(".{ARTIFACT_EXTENSION}"))?;
        let (hour, kind) = stem.split_once('_')?;
        let kind = match kind {
            "all" => Self::All,
            "errors" => Self::Errors,
            _ => return None,
        };
        Some((HourBucket::parse_hour_label(hour)?, kind))
    }
}

/// The (container, date, hour) bucket an artifact pair belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub container: String,
    pub bucket: HourBucket,
}

impl WindowKey {
    pub fn new(container: impl Into<String>, bucket: HourBucket) -> Self {
        Self {
            container: container.into(),
            bucket,
        }
    }
}

#[derive(Clone)]
pub struct TimeWindower {
    clock: Arc<dyn Clock>,
    tz: Tz,
    grace_minutes: u32,
}

impl fmt::Debug for TimeWindower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeWindower")
            .field("tz", &self.tz)
            .field("grace_minutes", &self.grace_minutes)
            .finish()
    }
}

impl TimeWindower {
    pub fn new(clock: Arc<dyn Clock>, tz: Tz, grace_minutes: u32) -> Self {
        Self {
            clock,
            tz,
            grace_minutes,
        }
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn now_in_zone(&self) -> DateTime<Tz> {
        self.tz.from_utc_datetime(&self.clock.now().naive_utc())
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn bucket_at(&self, instant: DateTime<Utc>) -> HourBucket {
        let local = self.tz.from_utc_datetime(&instant.naive_utc());
        HourBucket {
            date: local.date_naive(),
            hour: local.hour(),
        }
    }

    pub fn current_bucket(&self) -> HourBucket {
        self.bucket_at(self.clock.now())
    }

    /// The bucket of one real hour ago. Across a DST jump this skips the
    /// civil hour that never existed; when the clock falls back and the
    /// hour repeats, the plain civil predecessor is used instead so the
    /// still-open window is never reported as closed.
    pub fn previous_bucket(&self) -> HourBucket {
        let now = self.clock.now();
        let current = self.bucket_at(now);
        let hour_ago = self.bucket_at(now - Duration::hours(1));
        if hour_ago == current {
            current.previous()
        } else {
            hour_ago
        }
    }

    pub fn is_upload_grace_window(&self) -> bool {
        self.now_in_zone().minute() < self.grace_minutes
    }
}
