//! Recurrence calculation
//!
//! Computes the next run time of a recurring job. Fixed cadences (hourly,
//! daily, weekly) keep the phase of the original schedule when ticks were
//! missed; cron expressions are delegated to a pluggable [`CronSchedule`].
//!
//! Every computed time is strictly after `now`.

use chrono::{DateTime, Duration, Timelike, Utc};
use std::sync::Arc;

use crate::domain::job::Recurrence;

/// Evaluates cron expressions
pub trait CronSchedule: Send + Sync {
    /// First fire time of `expression` strictly after `after`, if any
    fn next_after(&self, expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Next-run calculator with an optional cron evaluator
#[derive(Clone, Default)]
pub struct RecurrenceCalculator {
    cron: Option<Arc<dyn CronSchedule>>,
}

impl RecurrenceCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cron(cron: Arc<dyn CronSchedule>) -> Self {
        Self { cron: Some(cron) }
    }

    /// Next run after `last` for `kind`, or `None` for one-time jobs
    ///
    /// Cron recurrences fall back to one hour from `now` when no evaluator is
    /// installed or it has no fire time after `now`.
    pub fn next_run(
        &self,
        last: DateTime<Utc>,
        kind: &Recurrence,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match kind {
            Recurrence::Cron(expression) => {
                let evaluated = self
                    .cron
                    .as_ref()
                    .and_then(|cron| cron.next_after(expression, now))
                    .filter(|at| *at > now);
                Some(evaluated.unwrap_or_else(|| now + Duration::hours(1)))
            }
            other => next_run(last, other, now),
        }
    }
}

impl std::fmt::Debug for RecurrenceCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecurrenceCalculator")
            .field("cron", &self.cron.is_some())
            .finish()
    }
}

/// Next run for a fixed cadence
///
/// Adds one unit to `last`. When that is not after `now`, recomputes from
/// `now` keeping the minute and second (hourly), the time of day (daily) or
/// the weekday and time (weekly) of `last`. Returns `None` for
/// [`Recurrence::OneTime`]; cron expressions get the one hour fallback.
pub fn next_run(
    last: DateTime<Utc>,
    kind: &Recurrence,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let step = match kind {
        Recurrence::OneTime => return None,
        Recurrence::Cron(_) => return Some(now + Duration::hours(1)),
        Recurrence::Hourly => Duration::hours(1),
        Recurrence::Daily => Duration::days(1),
        Recurrence::Weekly => Duration::weeks(1),
    };

    let naive = last + step;
    if naive > now {
        return Some(naive);
    }

    let mut candidate = match kind {
        Recurrence::Hourly => now
            .with_minute(last.minute())
            .and_then(|t| t.with_second(last.second()))
            .and_then(|t| t.with_nanosecond(last.nanosecond()))
            .unwrap_or(now),
        Recurrence::Daily => now.date_naive().and_time(last.time()).and_utc(),
        _ => {
            let elapsed = (now - last).num_weeks();
            last + Duration::weeks(elapsed + 1)
        }
    };

    while candidate <= now {
        candidate += step;
    }

    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_naive_step_when_on_time() {
        let last = at(2024, 3, 1, 10, 15, 0);
        let now = at(2024, 3, 1, 10, 15, 1);

        assert_eq!(
            next_run(last, &Recurrence::Hourly, now),
            Some(at(2024, 3, 1, 11, 15, 0))
        );
        assert_eq!(
            next_run(last, &Recurrence::Daily, now),
            Some(at(2024, 3, 2, 10, 15, 0))
        );
        assert_eq!(
            next_run(last, &Recurrence::Weekly, now),
            Some(at(2024, 3, 8, 10, 15, 0))
        );
    }

    #[test]
    fn test_hourly_keeps_minute_after_missed_ticks() {
        let last = at(2024, 3, 1, 10, 15, 30);
        let now = at(2024, 3, 1, 11, 20, 0);

        let next = next_run(last, &Recurrence::Hourly, now).unwrap();
        assert_eq!(next, at(2024, 3, 1, 12, 15, 30));
    }

    #[test]
    fn test_hourly_phase_later_in_current_hour() {
        let last = at(2024, 3, 1, 10, 45, 0);
        let now = at(2024, 3, 1, 13, 20, 0);

        let next = next_run(last, &Recurrence::Hourly, now).unwrap();
        assert_eq!(next, at(2024, 3, 1, 13, 45, 0));
    }

    #[test]
    fn test_daily_keeps_time_of_day() {
        let last = at(2024, 3, 1, 6, 30, 0);

        let next = next_run(last, &Recurrence::Daily, at(2024, 3, 5, 9, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 6, 6, 30, 0));

        let next = next_run(last, &Recurrence::Daily, at(2024, 3, 5, 5, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 5, 6, 30, 0));
    }

    #[test]
    fn test_weekly_advances_whole_weeks() {
        let last = at(2024, 3, 1, 8, 0, 0);
        let now = at(2024, 3, 20, 12, 0, 0);

        let next = next_run(last, &Recurrence::Weekly, now).unwrap();
        assert_eq!(next, at(2024, 3, 22, 8, 0, 0));
        assert_eq!(next.weekday(), last.weekday());
    }

    #[test]
    fn test_one_time_has_no_next_run() {
        let now = Utc::now();
        assert_eq!(next_run(now, &Recurrence::OneTime, now), None);
    }

    #[test]
    fn test_always_strictly_after_now() {
        let last = at(2024, 1, 1, 0, 7, 13);
        let kinds = [Recurrence::Hourly, Recurrence::Daily, Recurrence::Weekly];

        // Sweep `now` over two months in 37 minute steps
        for step in 0..2_400 {
            let now = last + Duration::minutes(37 * step);
            for kind in &kinds {
                let next = next_run(last, kind, now).unwrap();
                assert!(next > now, "{kind} from {last} at {now} gave {next}");
                match kind {
                    Recurrence::Hourly => {
                        assert_eq!((next.minute(), next.second()), (7, 13));
                        assert!(next - now <= Duration::hours(1));
                    }
                    Recurrence::Daily => {
                        assert_eq!(next.time(), last.time());
                        assert!(next - now <= Duration::days(1));
                    }
                    _ => {
                        assert_eq!(next.time(), last.time());
                        assert_eq!(next.weekday(), last.weekday());
                        assert!(next - now <= Duration::weeks(1));
                    }
                }
            }
        }
    }

    #[test]
    fn test_exact_boundary_is_not_reused() {
        let last = at(2024, 3, 1, 10, 0, 0);
        let now = at(2024, 3, 1, 11, 0, 0);

        let next = next_run(last, &Recurrence::Hourly, now).unwrap();
        assert_eq!(next, at(2024, 3, 1, 12, 0, 0));
    }

    struct FixedCron(DateTime<Utc>);

    impl CronSchedule for FixedCron {
        fn next_after(&self, _expression: &str, _after: DateTime<Utc>) -> Option<DateTime<Utc>> {
            Some(self.0)
        }
    }

    #[test]
    fn test_cron_without_evaluator_falls_back_to_one_hour() {
        let now = at(2024, 3, 1, 10, 0, 0);
        let calc = RecurrenceCalculator::new();
        let cron = Recurrence::Cron("0 0 * * * *".to_string());

        assert_eq!(
            calc.next_run(now, &cron, now),
            Some(at(2024, 3, 1, 11, 0, 0))
        );
    }

    #[test]
    fn test_cron_uses_evaluator_when_in_future() {
        let now = at(2024, 3, 1, 10, 0, 0);
        let cron = Recurrence::Cron("*/5 * * * *".to_string());

        let calc = RecurrenceCalculator::with_cron(Arc::new(FixedCron(at(2024, 3, 1, 10, 5, 0))));
        assert_eq!(calc.next_run(now, &cron, now), Some(at(2024, 3, 1, 10, 5, 0)));

        // An evaluator answer that is not after now is ignored
        let calc = RecurrenceCalculator::with_cron(Arc::new(FixedCron(now)));
        assert_eq!(calc.next_run(now, &cron, now), Some(at(2024, 3, 1, 11, 0, 0)));
    }
}
