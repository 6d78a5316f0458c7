// ⏰ Clock - Injected game time
//
// Nothing in the core reads the wall clock directly. Every operation takes a
// `&dyn Clock` and samples it exactly once, so a whole operation sees a single
// "now" and tests can pin time.

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};

// ============================================================================
// CLOCK TRAIT
// ============================================================================

/// Source of the current in-game date
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time (game time == real time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock (tests, turn-based terminal game)
#[derive(Debug, Clone, Copy)]
pub struct ManualClock {
    now: DateTime<Utc>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        ManualClock { now }
    }

    /// Clock set to midnight UTC of `date`
    pub fn at_date(date: NaiveDate) -> Self {
        ManualClock::new(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
    }

    pub fn set(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }

    pub fn advance_days(&mut self, days: i64) {
        self.now += Duration::days(days);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// Game time running `rate` times faster than real time from a fixed epoch
///
/// game_now = game_epoch + (real_now - real_epoch) × rate
#[derive(Debug, Clone, Copy)]
pub struct ScaledClock {
    real_epoch: DateTime<Utc>,
    game_epoch: DateTime<Utc>,
    rate: i32,
}

impl ScaledClock {
    /// Start game time at `game_epoch` now
    pub fn starting_at(game_epoch: DateTime<Utc>, rate: u32) -> Self {
        ScaledClock {
            real_epoch: Utc::now(),
            game_epoch,
            rate: i32::try_from(rate).unwrap_or(i32::MAX),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate.unsigned_abs()
    }

    /// Game time for a given real instant
    pub fn game_time_at(&self, real: DateTime<Utc>) -> DateTime<Utc> {
        let elapsed = real - self.real_epoch;
        elapsed
            .checked_mul(self.rate)
            .and_then(|scaled| self.game_epoch.checked_add_signed(scaled))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Clock for ScaledClock {
    fn now(&self) -> DateTime<Utc> {
        self.game_time_at(Utc::now())
    }
}

// ============================================================================
// CALENDAR HELPERS
// ============================================================================

/// Add calendar months; day-of-month is clamped to the target month's end
pub fn add_months(date: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    date.checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole days from `start` to `end` (negative if `end` is earlier)
pub fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_add_months_clamps_day() {
        let jan31 = Utc.with_ymd_and_hms(1480, 1, 31, 0, 0, 0).unwrap();
        let feb = add_months(jan31, 1);
        // 1480 is a leap year
        assert_eq!(feb, Utc.with_ymd_and_hms(1480, 2, 29, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_days_between() {
        let start = Utc.with_ymd_and_hms(1480, 3, 1, 0, 0, 0).unwrap();
        let end = add_months(start, 3);
        assert_eq!(days_between(start, end), 92);
        assert_eq!(days_between(end, start), -92);
    }

    #[test]
    fn test_manual_clock_advance() {
        let mut clock = ManualClock::at_date(NaiveDate::from_ymd_opt(1480, 3, 1).unwrap());
        let before = clock.now();
        clock.advance_days(10);
        assert_eq!(days_between(before, clock.now()), 10);
    }

    #[test]
    fn test_scaled_clock_rate() {
        let game_epoch = Utc.with_ymd_and_hms(1480, 1, 1, 0, 0, 0).unwrap();
        let clock = ScaledClock::starting_at(game_epoch, 24);
        let one_hour_later = clock.real_epoch + Duration::hours(1);

        // One real hour is one game day at rate 24
        assert_eq!(clock.game_time_at(one_hour_later), game_epoch + Duration::days(1));
        assert_eq!(clock.rate(), 24);
    }
}
