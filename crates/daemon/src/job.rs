use std::fmt;
use std::str::FromStr;

use chrono::{Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const DAY_SECS: i64 = 24 * 60 * 60;

/// Lifecycle of a scheduled recording.
///
/// Transitions only move forward: `Pending -> Recording -> {Completed, Failed}`.
/// `Pending -> Failed` is also allowed, for jobs whose capture never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Recording,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Recording => "recording",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Recording)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Recording, JobStatus::Completed)
                | (JobStatus::Recording, JobStatus::Failed)
        )
    }

    /// States a row must be in for `next` to be written over it
    pub fn predecessors(next: JobStatus) -> &'static [JobStatus] {
        match next {
            JobStatus::Pending => &[],
            JobStatus::Recording => &[JobStatus::Pending],
            JobStatus::Completed => &[JobStatus::Recording],
            JobStatus::Failed => &[JobStatus::Pending, JobStatus::Recording],
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "recording" => Ok(JobStatus::Recording),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// One persisted scheduled recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub profile_id: String,
    pub channel_name: String,
    pub channel_url: String,
    /// Unix seconds
    pub start_time: i64,
    /// Unix seconds
    pub end_time: i64,
    pub status: JobStatus,
    pub program_name: Option<String>,
    pub created_at: i64,
}

impl JobRecord {
    /// Program name when present, else the channel name
    pub fn display_name(&self) -> &str {
        match self.program_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.channel_name,
        }
    }
}

/// Input for creating a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub profile_id: String,
    pub channel_name: String,
    pub channel_url: String,
    pub start_time: i64,
    pub end_time: i64,
    pub program_name: Option<String>,
}

impl NewJob {
    /// Build a job, pushing an end that does not follow the start forward by whole days.
    pub fn new(
        profile_id: impl Into<String>,
        channel_name: impl Into<String>,
        channel_url: impl Into<String>,
        start_time: i64,
        end_time: i64,
        program_name: Option<String>,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            channel_name: channel_name.into(),
            channel_url: channel_url.into(),
            start_time,
            end_time: push_end_forward(start_time, end_time),
            program_name,
        }
    }
}

/// `end` if it is after `start`, otherwise `end` plus the fewest 24 hour steps
/// that put it after `start`.
pub fn push_end_forward(start: i64, end: i64) -> i64 {
    if end > start {
        return end;
    }
    let days = (start - end) / DAY_SECS + 1;
    end + days * DAY_SECS
}

/// Turn a date and two local times of day into a unix-second window.
///
/// An end time of day at or before the start lands on the following day.
pub fn resolve_window<Tz: TimeZone>(
    tz: &Tz,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> Option<(i64, i64)> {
    let start_ts = local_timestamp(tz, date.and_time(start))?;
    let end_ts = local_timestamp(tz, date.and_time(end))?;
    if end_ts > start_ts {
        return Some((start_ts, end_ts));
    }
    // Re-resolve on the next calendar day so DST shifts are honoured
    let next = date.checked_add_days(Days::new(1))?;
    match local_timestamp(tz, next.and_time(end)) {
        Some(ts) if ts > start_ts => Some((start_ts, ts)),
        _ => Some((start_ts, push_end_forward(start_ts, end_ts))),
    }
}

fn local_timestamp<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<i64> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp()),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Pending),
            Just(JobStatus::Recording),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
        ]
    }

    #[test]
    fn terminal_states_go_nowhere() {
        for next in [JobStatus::Pending, JobStatus::Recording, JobStatus::Completed, JobStatus::Failed] {
            assert!(!JobStatus::Completed.can_transition_to(next));
            assert!(!JobStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn status_strings_round_trip_through_column_values() {
        assert_eq!("recording".parse::<JobStatus>().unwrap(), JobStatus::Recording);
        assert!("cancelled".parse::<JobStatus>().is_err());
        assert_eq!(JobStatus::Completed.to_string(), "completed");
    }

    #[test]
    fn end_before_start_moves_to_next_day() {
        let job = NewJob::new("p", "BBC One", "http://x", 1_000, 400, None);
        assert_eq!(job.end_time, 400 + DAY_SECS);

        let equal = NewJob::new("p", "BBC One", "http://x", 1_000, 1_000, None);
        assert_eq!(equal.end_time, 1_000 + DAY_SECS);
    }

    #[test]
    fn end_days_before_start_still_lands_after_it() {
        let job = NewJob::new("p", "BBC One", "http://x", 1_000_000, 1_000_000 - 2 * DAY_SECS, None);
        assert!(job.end_time > job.start_time);
        assert_eq!(job.end_time, 1_000_000 + DAY_SECS);

        let exact = NewJob::new("p", "BBC One", "http://x", 1_000_000, 1_000_000 - DAY_SECS + 1, None);
        assert_eq!(exact.end_time, 1_000_001);
    }

    #[test]
    fn window_crossing_midnight() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let start = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        let end = NaiveTime::from_hms_opt(0, 15, 0).unwrap();

        let (s, e) = resolve_window(&Utc, date, start, end).unwrap();
        assert_eq!(e - s, 45 * 60);
    }

    #[test]
    fn window_same_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let start = NaiveTime::from_hms_opt(20, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(21, 0, 0).unwrap();

        let (s, e) = resolve_window(&Utc, date, start, end).unwrap();
        assert_eq!(e - s, 3600);
    }

    #[test]
    fn display_name_prefers_program() {
        let mut job = JobRecord {
            id: 1,
            profile_id: "p".into(),
            channel_name: "Arte".into(),
            channel_url: "http://x".into(),
            start_time: 0,
            end_time: 10,
            status: JobStatus::Pending,
            program_name: Some("Tracks".into()),
            created_at: 0,
        };
        assert_eq!(job.display_name(), "Tracks");
        job.program_name = Some("  ".into());
        assert_eq!(job.display_name(), "Arte");
        job.program_name = None;
        assert_eq!(job.display_name(), "Arte");
    }

    proptest! {
        #[test]
        fn transitions_never_move_backwards(from in status(), to in status()) {
            if from.can_transition_to(to) {
                prop_assert!(!from.is_terminal());
                prop_assert!(from != to);
                prop_assert!(to != JobStatus::Pending);
                prop_assert!(JobStatus::predecessors(to).contains(&from));
            }
        }

        #[test]
        fn pushed_end_always_follows_start(start in -10_000_000i64..10_000_000, end in -10_000_000i64..10_000_000) {
            let job = NewJob::new("p", "c", "u", start, end, None);
            prop_assert!(job.end_time > job.start_time);
            if end > start {
                prop_assert_eq!(job.end_time, end);
            } else {
                prop_assert_eq!((job.end_time - end) % DAY_SECS, 0);
                prop_assert!(job.end_time - start <= DAY_SECS);
            }
        }

        #[test]
        fn resolved_windows_are_positive_and_under_a_day(sh in 0u32..24, sm in 0u32..60, eh in 0u32..24, em in 0u32..60) {
            let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
            let start = NaiveTime::from_hms_opt(sh, sm, 0).unwrap();
            let end = NaiveTime::from_hms_opt(eh, em, 0).unwrap();
            let (s, e) = resolve_window(&Utc, date, start, end).unwrap();
            prop_assert!(e > s);
            prop_assert!(e - s <= DAY_SECS);
        }
    }
}
