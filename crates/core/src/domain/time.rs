use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

const OFFSET_FORMATS: [&str; 4] =
    ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M%z", "%Y-%m-%d %H:%M:%S%z"];

const LOCAL_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Interprets user and remote time strings against the assistant's zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeContext {
    zone: Tz,
}

impl Default for TimeContext {
    fn default() -> Self {
        Self::utc()
    }
}

impl TimeContext {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn utc() -> Self {
        Self { zone: Tz::UTC }
    }

    pub fn from_zone_name(name: &str) -> Option<Self> {
        Tz::from_str(name.trim()).ok().map(Self::new)
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn zone_name(&self) -> &'static str {
        self.zone.name()
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.zone).fixed_offset()
    }

    /// Accepts RFC 3339, ISO-8601 with a colon-less offset, or a local
    /// wall-clock time which is placed in the configured zone.
    pub fn parse_instant(&self, value: &str) -> Option<DateTime<FixedOffset>> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
            return Some(instant);
        }
        for format in OFFSET_FORMATS {
            if let Ok(instant) = DateTime::parse_from_str(value, format) {
                return Some(instant);
            }
        }
        for format in LOCAL_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
                return self.place_local(naive);
            }
        }
        None
    }

    /// A bare date marks the start of that day.
    pub fn parse_range_start(&self, value: &str) -> Option<DateTime<FixedOffset>> {
        match parse_date(value) {
            Some(date) => self.start_of_day(date),
            None => self.parse_instant(value),
        }
    }

    /// A bare date is inclusive, so the range runs to the start of the next day.
    pub fn parse_range_end(&self, value: &str) -> Option<DateTime<FixedOffset>> {
        match parse_date(value) {
            Some(date) => date.succ_opt().and_then(|next| self.start_of_day(next)),
            None => self.parse_instant(value),
        }
    }

    pub fn localize(&self, instant: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.zone).fixed_offset()
    }

    pub fn day_bounds(
        &self,
        instant: &DateTime<FixedOffset>,
    ) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
        let date = self.localize(instant).date_naive();
        let start = self.start_of_day(date)?;
        let end = date.succ_opt().and_then(|next| self.start_of_day(next))?;
        Some((start, end))
    }

    pub fn today_bounds(&self) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
        self.day_bounds(&self.now())
    }

    pub fn one_day_after(&self, instant: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        *instant + Duration::days(1)
    }

    fn start_of_day(&self, date: NaiveDate) -> Option<DateTime<FixedOffset>> {
        self.place_local(date.and_hms_opt(0, 0, 0)?)
    }

    fn place_local(&self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        self.zone.from_local_datetime(&naive).earliest().map(|local| local.fixed_offset())
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::TimeContext;

    #[test]
    fn parses_offset_without_colon() {
        let context = TimeContext::utc();
        let instant =
            context.parse_instant("2025-07-10T11:20:00-0700").expect("colon-less offset parses");

        assert_eq!(instant.hour(), 11);
        assert_eq!(instant.offset().local_minus_utc(), -7 * 3600);
    }

    #[test]
    fn parses_remote_rfc3339_with_millis() {
        let context = TimeContext::utc();
        let instant =
            context.parse_instant("2024-08-13T15:30:00.000Z").expect("rfc3339 with millis parses");

        assert_eq!(instant.minute(), 30);
        assert_eq!(instant.offset().local_minus_utc(), 0);
    }

    #[test]
    fn local_times_land_in_configured_zone() {
        let context = TimeContext::from_zone_name("America/Los_Angeles").expect("known zone");
        let instant = context.parse_instant("2025-07-10 09:00").expect("local time parses");

        assert_eq!(instant.hour(), 9);
        assert_eq!(instant.offset().local_minus_utc(), -7 * 3600);
    }

    #[test]
    fn bare_date_range_end_is_inclusive() {
        let context = TimeContext::utc();
        let start = context.parse_range_start("2025-07-10").expect("start parses");
        let end = context.parse_range_end("2025-07-10").expect("end parses");

        assert_eq!(start.day(), 10);
        assert_eq!(end.day(), 11);
        assert_eq!(end.hour(), 0);
    }

    #[test]
    fn garbage_is_rejected() {
        let context = TimeContext::utc();
        assert!(context.parse_instant("next tuesday-ish").is_none());
        assert!(context.parse_instant("   ").is_none());
        assert!(TimeContext::from_zone_name("Mars/Olympus_Mons").is_none());
    }
}
