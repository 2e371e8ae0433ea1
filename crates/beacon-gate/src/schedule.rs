//! Daily sweep schedule.
//!
//! # Design
//!
//! The sweep loop wakes on a fixed cadence (every minute by default) and asks
//! [`SweepLatch::poll`] whether to fire. The schedule is a local wall-clock
//! `hour:minute` in a named IANA timezone (chrono-tz), so "18:00 in Manila"
//! stays 18:00 regardless of the host's zone.
//!
//! # Once per day
//!
//! The latch remembers the previous poll instant. A poll is *due* when a
//! trigger instant falls in `(previous poll, now]`, so ticks that land late
//! on either side of the trigger cannot step over it. The very first poll
//! has no predecessor and falls back to the `[target, target + grace)`
//! window. The latch also remembers the local date it last fired for; a
//! second due poll on the same date is refused. The mutation itself is gated
//! on `status != Offline`, so even a double fire is a no-op.
//!
//! # DST
//!
//! Comparison is done on naive local time. A trigger inside a spring-forward
//! gap is skipped for that day; a trigger inside a fall-back overlap fires
//! once because of the date latch.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("sweep hour must be 0..=23, got {0}")]
    Hour(u32),
    #[error("sweep minute must be 0..=59, got {0}")]
    Minute(u32),
    #[error("unknown timezone: {0}")]
    Timezone(String),
    #[error("grace must be positive, got {0}s")]
    Grace(i64),
}

/// Local trigger time for the daily sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepSchedule {
    hour: u32,
    minute: u32,
    tz: Tz,
    grace_secs: i64,
}

impl SweepSchedule {
    pub const DEFAULT_GRACE_SECS: i64 = 60;

    pub fn new(hour: u32, minute: u32, tz_name: &str) -> Result<Self, ScheduleError> {
        if hour > 23 {
            return Err(ScheduleError::Hour(hour));
        }
        if minute > 59 {
            return Err(ScheduleError::Minute(minute));
        }
        let tz: Tz = tz_name
            .trim()
            .parse()
            .map_err(|_| ScheduleError::Timezone(tz_name.to_string()))?;
        Ok(Self {
            hour,
            minute,
            tz,
            grace_secs: Self::DEFAULT_GRACE_SECS,
        })
    }

    /// Window for the first poll after startup. Should match the loop cadence.
    pub fn with_grace_secs(mut self, grace_secs: i64) -> Result<Self, ScheduleError> {
        if grace_secs <= 0 {
            return Err(ScheduleError::Grace(grace_secs));
        }
        self.grace_secs = grace_secs;
        Ok(self)
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn target_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        date.and_hms_opt(self.hour, self.minute, 0)
    }

    /// Local date whose trigger `now` falls on, if `now` is inside the due window.
    pub fn due_date(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let local = now.with_timezone(&self.tz).naive_local();
        let date = local.date();
        let target = self.target_on(date)?;
        let delta = local.signed_duration_since(target);
        if delta >= Duration::zero() && delta < Duration::seconds(self.grace_secs) {
            Some(date)
        } else {
            None
        }
    }

    /// Trigger instant for a local date. `None` inside a spring-forward gap.
    fn trigger_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let naive = self.target_on(date)?;
        let at = self.tz.from_local_datetime(&naive).earliest()?;
        Some(at.with_timezone(&Utc))
    }

    /// Local date of the latest trigger in `(after, until]`, if any.
    pub fn crossed_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Option<NaiveDate> {
        if until <= after {
            return None;
        }
        let mut date = until.with_timezone(&self.tz).date_naive();
        // Triggers are one per local day; a few days back covers any DST shift.
        for _ in 0..3 {
            if let Some(at) = self.trigger_on(date) {
                if at <= until {
                    return (at > after).then_some(date);
                }
            }
            date = date.pred_opt()?;
        }
        None
    }

    /// Next trigger instant strictly after `now`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.with_timezone(&self.tz).date_naive();
        for offset in 0..3 {
            let Some(date) = today.checked_add_signed(Duration::days(offset)) else {
                continue;
            };
            if let Some(at) = self.trigger_on(date) {
                if at > now {
                    return at;
                }
            }
        }
        now + Duration::days(1)
    }
}

/// Remembers the last local date the sweep fired for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepLatch {
    last_fired: Option<NaiveDate>,
    last_poll: Option<DateTime<Utc>>,
}

impl SweepLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_fired(&self) -> Option<NaiveDate> {
        self.last_fired
    }

    /// Returns the local date to sweep for, at most once per date.
    ///
    /// The latch is set before the caller runs the sweep: a failed sweep is
    /// not retried within the same day. A clock that steps backwards yields
    /// nothing until it passes the next trigger.
    pub fn poll(&mut self, schedule: &SweepSchedule, now: DateTime<Utc>) -> Option<NaiveDate> {
        let date = match self.last_poll.replace(now) {
            Some(prev) => schedule.crossed_between(prev, now),
            None => schedule.due_date(now),
        }?;
        if self.last_fired == Some(date) {
            return None;
        }
        self.last_fired = Some(date);
        Some(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manila_six_pm() -> SweepSchedule {
        SweepSchedule::new(18, 0, "Asia/Manila").unwrap()
    }

    // 2026-03-02 18:00 Asia/Manila (UTC+8) = 2026-03-02T10:00:00Z
    fn trigger_utc() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn rejects_bad_inputs() {
        assert_eq!(
            SweepSchedule::new(24, 0, "UTC").unwrap_err(),
            ScheduleError::Hour(24)
        );
        assert_eq!(
            SweepSchedule::new(1, 60, "UTC").unwrap_err(),
            ScheduleError::Minute(60)
        );
        assert!(matches!(
            SweepSchedule::new(1, 0, "Mars/Olympus").unwrap_err(),
            ScheduleError::Timezone(_)
        ));
        assert!(SweepSchedule::new(1, 0, "UTC")
            .unwrap()
            .with_grace_secs(0)
            .is_err());
    }

    #[test]
    fn due_only_inside_trigger_minute_local_time() {
        let s = manila_six_pm();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        assert_eq!(s.due_date(trigger_utc()), Some(date));
        assert_eq!(s.due_date(trigger_utc() + Duration::seconds(59)), Some(date));
        assert_eq!(s.due_date(trigger_utc() + Duration::seconds(60)), None);
        assert_eq!(s.due_date(trigger_utc() - Duration::seconds(1)), None);
        // 18:00 UTC is 02:00 next day in Manila: not due.
        assert_eq!(
            s.due_date(Utc.with_ymd_and_hms(2026, 3, 2, 18, 0, 0).unwrap()),
            None
        );
    }

    #[test]
    fn latch_fires_once_per_local_date() {
        let s = manila_six_pm();
        let mut latch = SweepLatch::new();

        assert!(latch.poll(&s, trigger_utc()).is_some());
        assert!(latch.poll(&s, trigger_utc() + Duration::seconds(20)).is_none());
        assert!(latch.poll(&s, trigger_utc() + Duration::seconds(50)).is_none());

        let next_day = trigger_utc() + Duration::days(1);
        assert_eq!(
            latch.poll(&s, next_day),
            Some(NaiveDate::from_ymd_opt(2026, 3, 3).unwrap())
        );
    }

    #[test]
    fn late_ticks_straddling_the_trigger_still_fire() {
        let s = manila_six_pm();
        let mut latch = SweepLatch::new();
        let before = trigger_utc() - Duration::milliseconds(10);
        let after = trigger_utc() + Duration::seconds(60) + Duration::milliseconds(10);

        assert!(latch.poll(&s, before).is_none());
        assert_eq!(
            latch.poll(&s, after),
            Some(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
        );
        assert!(latch.poll(&s, after + Duration::seconds(60)).is_none());
    }

    #[test]
    fn first_poll_outside_grace_does_not_fire() {
        let s = manila_six_pm();
        let mut latch = SweepLatch::new();
        assert!(latch.poll(&s, trigger_utc() + Duration::minutes(30)).is_none());
        // later polls the same evening cross nothing
        assert!(latch.poll(&s, trigger_utc() + Duration::minutes(31)).is_none());
    }

    #[test]
    fn crossed_between_is_half_open() {
        let s = manila_six_pm();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let t = trigger_utc();
        assert_eq!(s.crossed_between(t - Duration::seconds(1), t), Some(date));
        assert_eq!(s.crossed_between(t, t + Duration::seconds(1)), None);
        assert_eq!(s.crossed_between(t + Duration::seconds(5), t), None);
        assert_eq!(
            s.crossed_between(t, t + Duration::days(1)),
            NaiveDate::from_ymd_opt(2026, 3, 3)
        );
    }

    #[test]
    fn next_fire_rolls_to_tomorrow_after_trigger() {
        let s = manila_six_pm();
        assert_eq!(
            s.next_fire_after(trigger_utc() - Duration::minutes(5)),
            trigger_utc()
        );
        assert_eq!(
            s.next_fire_after(trigger_utc()),
            trigger_utc() + Duration::days(1)
        );
    }

    #[test]
    fn spring_forward_gap_skips_day() {
        // America/New_York 2026-03-08: 02:00 -> 03:00.
        let s = SweepSchedule::new(2, 30, "America/New_York").unwrap();
        // 03:00 EDT = 07:00Z; nothing in the window that day.
        let t = Utc.with_ymd_and_hms(2026, 3, 8, 7, 0, 0).unwrap();
        assert_eq!(s.due_date(t), None);
    }
}
