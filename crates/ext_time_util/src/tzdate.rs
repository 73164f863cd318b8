//! `TzDate`: the script-facing calendar instant.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::{CalendarField, CalendarFields, ZonedCalendar};
use crate::duration::{TimeDuration, TimeUnit};
use crate::error::TimeUtilError;
use crate::tools::{icu_to_strftime, parse_timezone, FormatKind, LocalePatterns};

/// Settable `TzDate` components, named as scripts name them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TzDateField {
    Date,
    FullYear,
    Hours,
    Milliseconds,
    Minutes,
    Month,
    Seconds,
}

impl TzDateField {
    fn calendar_field(self) -> CalendarField {
        match self {
            TzDateField::Date => CalendarField::Date,
            TzDateField::FullYear => CalendarField::Year,
            TzDateField::Hours => CalendarField::Hour,
            TzDateField::Milliseconds => CalendarField::Millisecond,
            TzDateField::Minutes => CalendarField::Minute,
            TzDateField::Month => CalendarField::Month,
            TzDateField::Seconds => CalendarField::Second,
        }
    }
}

impl std::str::FromStr for TzDateField {
    type Err = TimeUtilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date" => Ok(TzDateField::Date),
            "fullYear" => Ok(TzDateField::FullYear),
            "hours" => Ok(TzDateField::Hours),
            "milliseconds" => Ok(TzDateField::Milliseconds),
            "minutes" => Ok(TzDateField::Minutes),
            "month" => Ok(TzDateField::Month),
            "seconds" => Ok(TzDateField::Seconds),
            _ => Err(TimeUtilError::invalid_values(format!(
                "Unknown TZDate field: {}",
                s
            ))),
        }
    }
}

/// All readable components at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TzDateComponents {
    pub full_year: i64,
    pub month: i64,
    pub date: i64,
    /// Day of week, Sunday = 0
    pub day: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub milliseconds: i64,
}

/// Locale settings used by the string renderings
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    pub patterns: &'static LocalePatterns,
    pub use_24h: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            patterns: LocalePatterns::english(),
            use_24h: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TzDate {
    calendar: ZonedCalendar,
}

impl TzDate {
    pub fn now(zone: Tz) -> Self {
        Self {
            calendar: ZonedCalendar::now(zone),
        }
    }

    pub fn from_epoch_ms(epoch_ms: i64, zone: Tz) -> Result<Self, TimeUtilError> {
        Ok(Self {
            calendar: ZonedCalendar::new(zone, epoch_ms)?,
        })
    }

    pub fn from_fields(fields: &CalendarFields, zone: Tz) -> Result<Self, TimeUtilError> {
        Ok(Self {
            calendar: ZonedCalendar::from_fields(zone, fields)?,
        })
    }

    /// Zone for a script-supplied id; empty or unknown ids mean the local zone
    pub fn zone_or_local(id: Option<&str>, local: Tz) -> Tz {
        match id.filter(|id| !id.is_empty()) {
            Some(id) => parse_timezone(id).unwrap_or_else(|| {
                debug!(timezone = %id, "unknown timezone, using local zone");
                local
            }),
            None => local,
        }
    }

    pub fn epoch_ms(&self) -> i64 {
        self.calendar.millis()
    }

    pub fn zone(&self) -> Tz {
        self.calendar.zone()
    }

    pub fn timezone(&self) -> &'static str {
        self.calendar.zone().name()
    }

    pub fn components(&self) -> Result<TzDateComponents, TimeUtilError> {
        components_of(&self.calendar)
    }

    pub fn utc_components(&self) -> Result<TzDateComponents, TimeUtilError> {
        components_of(&self.calendar.in_zone(Tz::UTC))
    }

    pub fn get(&self, field: TzDateField) -> Result<i64, TimeUtilError> {
        self.calendar.get(field.calendar_field())
    }

    pub fn get_utc(&self, field: TzDateField) -> Result<i64, TimeUtilError> {
        self.calendar
            .in_zone(Tz::UTC)
            .get(field.calendar_field())
    }

    /// Set a local component; a full year of 0 or less becomes 1
    pub fn set(&mut self, field: TzDateField, value: i64) -> Result<(), TimeUtilError> {
        let value = if field == TzDateField::FullYear && value <= 0 {
            1
        } else {
            value
        };
        self.calendar.set(field.calendar_field(), value)
    }

    /// Set a UTC component by shifting the local one by the same amount
    pub fn set_utc(&mut self, field: TzDateField, value: i64) -> Result<(), TimeUtilError> {
        let local = self.get(field)?;
        let utc = self.get_utc(field)?;
        let target = local
            .checked_add(value)
            .and_then(|v| v.checked_sub(utc))
            .ok_or_else(|| TimeUtilError::invalid_values("Value is out of range"))?;
        self.set(field, target)
    }

    pub fn to_timezone(&self, id: &str) -> Result<TzDate, TimeUtilError> {
        let zone = parse_timezone(id)
            .ok_or_else(|| TimeUtilError::invalid_values("Invalid timezone"))?;
        Ok(self.in_zone(zone))
    }

    pub fn in_zone(&self, zone: Tz) -> TzDate {
        TzDate {
            calendar: self.calendar.in_zone(zone),
        }
    }

    pub fn to_utc(&self) -> TzDate {
        self.in_zone(Tz::UTC)
    }

    /// `self - other` as a normalized duration
    pub fn difference(&self, other: &TzDate) -> Result<TimeDuration, TimeUtilError> {
        let diff = self
            .epoch_ms()
            .checked_sub(other.epoch_ms())
            .ok_or_else(|| TimeUtilError::unknown("limit value reached"))?;
        Ok(TimeDuration::new(diff, TimeUnit::Msecs).normalize())
    }

    pub fn equals_to(&self, other: &TzDate) -> Result<bool, TimeUtilError> {
        Ok(self.difference(other)?.length == 0)
    }

    pub fn earlier_than(&self, other: &TzDate) -> Result<bool, TimeUtilError> {
        Ok(self.difference(other)?.length < 0)
    }

    pub fn later_than(&self, other: &TzDate) -> Result<bool, TimeUtilError> {
        Ok(self.difference(other)?.length > 0)
    }

    /// Offset by a duration. Whole days move the calendar date, so they keep
    /// the wall-clock time across DST changes.
    pub fn add_duration(&self, duration: &TimeDuration) -> Result<TzDate, TimeUtilError> {
        let duration = duration.normalize();
        let field = match duration.unit {
            TimeUnit::Days => CalendarField::Date,
            TimeUnit::Hours => CalendarField::Hour,
            TimeUnit::Mins => CalendarField::Minute,
            TimeUnit::Secs => CalendarField::Second,
            TimeUnit::Msecs => CalendarField::Millisecond,
        };
        let mut calendar = self.calendar;
        calendar.add(field, duration.length)?;
        Ok(TzDate { calendar })
    }

    /// Render with the locale's patterns (`localized`) or the fixed English
    /// ones, which also append the offset and zone name to times.
    pub fn render(
        &self,
        kind: FormatKind,
        localized: bool,
        options: &FormatOptions,
    ) -> Result<String, TimeUtilError> {
        let patterns = if localized {
            options.patterns
        } else {
            LocalePatterns::english()
        };
        let pattern = patterns.pattern(kind, options.use_24h, localized);
        self.calendar.format(&icu_to_strftime(&pattern))
    }

    pub fn to_locale_date_string(&self, options: &FormatOptions) -> Result<String, TimeUtilError> {
        self.render(FormatKind::Date, true, options)
    }

    pub fn to_locale_time_string(&self, options: &FormatOptions) -> Result<String, TimeUtilError> {
        self.render(FormatKind::Time, true, options)
    }

    pub fn to_locale_string(&self, options: &FormatOptions) -> Result<String, TimeUtilError> {
        self.render(FormatKind::DateTime, true, options)
    }

    pub fn to_date_string(&self, options: &FormatOptions) -> Result<String, TimeUtilError> {
        self.render(FormatKind::Date, false, options)
    }

    pub fn to_time_string(&self, options: &FormatOptions) -> Result<String, TimeUtilError> {
        self.render(FormatKind::Time, false, options)
    }

    pub fn to_display_string(&self, options: &FormatOptions) -> Result<String, TimeUtilError> {
        self.render(FormatKind::DateTime, false, options)
    }

    /// Short zone name; numeric abbreviations are spelled as `GMT+hh:mm`
    pub fn timezone_abbreviation(&self) -> Result<String, TimeUtilError> {
        let abbreviation = self.calendar.format("%Z")?;
        if abbreviation.starts_with(['+', '-']) {
            return Ok(format!("GMT{}", self.calendar.format("%:z")?));
        }
        Ok(abbreviation)
    }

    /// Seconds to add to local time to reach UTC (positive west of Greenwich)
    pub fn seconds_from_utc(&self) -> Result<i64, TimeUtilError> {
        let offset = self.calendar.zone_offset_ms()? + self.calendar.dst_offset_ms()?;
        Ok(-offset / 1_000)
    }

    pub fn is_dst(&self) -> Result<bool, TimeUtilError> {
        self.calendar.in_daylight_time()
    }

    /// The last DST transition before this instant, or an unchanged copy when
    /// the zone keeps no daylight saving time.
    pub fn previous_dst_transition(&self) -> Result<TzDate, TimeUtilError> {
        self.dst_transition(self.calendar.previous_transition())
    }

    /// The first DST transition after this instant, or an unchanged copy when
    /// the zone keeps no daylight saving time.
    pub fn next_dst_transition(&self) -> Result<TzDate, TimeUtilError> {
        self.dst_transition(self.calendar.next_transition())
    }

    fn dst_transition(&self, found: Option<i64>) -> Result<TzDate, TimeUtilError> {
        if !self.calendar.uses_daylight_time() {
            return Ok(*self);
        }
        let millis = found.ok_or_else(|| {
            TimeUtilError::unknown(format!("No DST transition found for {}", self.timezone()))
        })?;
        TzDate::from_epoch_ms(millis, self.zone())
    }
}

fn components_of(calendar: &ZonedCalendar) -> Result<TzDateComponents, TimeUtilError> {
    let fields = calendar.fields()?;
    Ok(TzDateComponents {
        full_year: fields.year,
        month: fields.month,
        date: fields.day,
        day: calendar.day_of_week()?,
        hours: fields.hour,
        minutes: fields.minute,
        seconds: fields.second,
        milliseconds: fields.millisecond,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: &str) -> Tz {
        id.parse().unwrap()
    }

    fn date(id: &str, year: i64, month: i64, day: i64, hour: i64, minute: i64) -> TzDate {
        let fields = CalendarFields {
            year,
            month,
            day,
            hour,
            minute,
            second: 0,
            millisecond: 0,
        };
        TzDate::from_fields(&fields, zone(id)).unwrap()
    }

    #[test]
    fn test_zone_fallback() {
        let local = zone("Europe/Berlin");
        assert_eq!(TzDate::zone_or_local(None, local), local);
        assert_eq!(TzDate::zone_or_local(Some(""), local), local);
        assert_eq!(TzDate::zone_or_local(Some("Mars/Base"), local), local);
        assert_eq!(TzDate::zone_or_local(Some("Asia/Seoul"), local), zone("Asia/Seoul"));
    }

    #[test]
    fn test_components() {
        let d = date("Asia/Seoul", 2024, 6, 14, 8, 30);
        let c = d.components().unwrap();
        assert_eq!((c.full_year, c.month, c.date, c.hours, c.minutes), (2024, 6, 14, 8, 30));
        // 2024-07-14 was a Sunday
        assert_eq!(c.day, 0);

        let u = d.utc_components().unwrap();
        assert_eq!((u.date, u.hours), (13, 23));
        assert_eq!(u.day, 6);
    }

    #[test]
    fn test_full_year_clamps_to_one() {
        let mut d = date("UTC", 2024, 0, 1, 0, 0);
        d.set(TzDateField::FullYear, -5).unwrap();
        assert_eq!(d.get(TzDateField::FullYear).unwrap(), 1);
    }

    #[test]
    fn test_set_utc_shifts_local() {
        // 08:30 in Seoul is 23:30 UTC of the previous day
        let mut d = date("Asia/Seoul", 2024, 6, 14, 8, 30);
        d.set_utc(TzDateField::Hours, 1).unwrap();
        assert_eq!(d.get_utc(TzDateField::Hours).unwrap(), 1);
        assert_eq!(d.get(TzDateField::Hours).unwrap(), 10);
        assert_eq!(d.get(TzDateField::Date).unwrap(), 13);

        let mut d = date("Asia/Seoul", 2024, 6, 14, 8, 30);
        d.set_utc(TzDateField::Date, 20).unwrap();
        assert_eq!(d.get_utc(TzDateField::Date).unwrap(), 20);
        assert_eq!(d.get(TzDateField::Date).unwrap(), 21);
    }

    #[test]
    fn test_to_timezone_round_trip() {
        let d = date("America/New_York", 2024, 4, 20, 15, 45);
        let there = d.to_timezone("Asia/Kolkata").unwrap();
        assert_eq!(there.epoch_ms(), d.epoch_ms());
        assert_eq!(there.get(TzDateField::Hours).unwrap(), 1);
        assert_eq!(there.get(TzDateField::Minutes).unwrap(), 15);

        let back = there.to_timezone("America/New_York").unwrap();
        assert_eq!(back.components().unwrap(), d.components().unwrap());
        assert_eq!(back.timezone(), "America/New_York");
    }

    #[test]
    fn test_to_timezone_rejects_unknown_zone() {
        let d = date("UTC", 2024, 0, 1, 0, 0);
        let err = d.to_timezone("Nowhere/Special").unwrap_err();
        assert!(matches!(err, TimeUtilError::InvalidValues { .. }));
    }

    #[test]
    fn test_difference_and_comparisons() {
        let a = date("UTC", 2024, 0, 2, 0, 0);
        let b = date("Asia/Seoul", 2024, 0, 1, 9, 0);
        assert_eq!(a.difference(&b).unwrap(), TimeDuration::new(1, TimeUnit::Days));

        let c = date("UTC", 2024, 0, 1, 1, 30);
        assert_eq!(c.difference(&b).unwrap(), TimeDuration::new(90, TimeUnit::Mins));

        assert!(b.equals_to(&date("UTC", 2024, 0, 1, 0, 0)).unwrap());
        assert!(b.earlier_than(&a).unwrap());
        assert!(a.later_than(&b).unwrap());
    }

    #[test]
    fn test_add_duration_normalizes_first() {
        // 48 hours normalize to 2 days, which keep the wall clock across DST
        let d = date("America/New_York", 2024, 2, 9, 12, 0);
        let later = d.add_duration(&TimeDuration::new(48, TimeUnit::Hours)).unwrap();
        assert_eq!(later.get(TzDateField::Hours).unwrap(), 12);
        assert_eq!(later.get(TzDateField::Date).unwrap(), 11);

        let later = d.add_duration(&TimeDuration::new(25, TimeUnit::Hours)).unwrap();
        assert_eq!(later.get(TzDateField::Hours).unwrap(), 14);

        let earlier = d.add_duration(&TimeDuration::new(-90, TimeUnit::Mins)).unwrap();
        assert_eq!(earlier.get(TzDateField::Hours).unwrap(), 10);
        assert_eq!(earlier.get(TzDateField::Minutes).unwrap(), 30);
    }

    #[test]
    fn test_renderings() {
        let d = date("Asia/Seoul", 2024, 6, 14, 8, 5);
        let options = FormatOptions::default();
        assert_eq!(d.to_date_string(&options).unwrap(), "Sunday, July 14, 2024");
        assert_eq!(d.to_locale_time_string(&options).unwrap(), "8:05:00 AM");
        assert_eq!(d.to_time_string(&options).unwrap(), "8:05:00 AM GMT+0900 KST");

        let options = FormatOptions {
            patterns: LocalePatterns::lookup("en_GB"),
            use_24h: true,
        };
        assert_eq!(d.to_locale_date_string(&options).unwrap(), "Sunday 14 July 2024");
        assert_eq!(
            d.to_locale_string(&options).unwrap(),
            "Sunday 14 July 2024 08:05:00"
        );
    }

    #[test]
    fn test_zone_details() {
        let d = date("Asia/Seoul", 2024, 6, 14, 8, 5);
        assert_eq!(d.timezone_abbreviation().unwrap(), "KST");
        assert_eq!(d.seconds_from_utc().unwrap(), -9 * 3600);
        assert!(!d.is_dst().unwrap());

        let ny = date("America/New_York", 2024, 6, 14, 8, 5);
        assert_eq!(ny.timezone_abbreviation().unwrap(), "EDT");
        assert_eq!(ny.seconds_from_utc().unwrap(), 4 * 3600);
        assert!(ny.is_dst().unwrap());
    }

    #[test]
    fn test_dst_transitions() {
        let seoul = date("Asia/Seoul", 2024, 6, 14, 8, 5);
        assert_eq!(seoul.next_dst_transition().unwrap(), seoul);
        assert_eq!(seoul.previous_dst_transition().unwrap(), seoul);

        let ny = date("America/New_York", 2024, 6, 14, 8, 5);
        let next = ny.next_dst_transition().unwrap();
        assert!(!next.is_dst().unwrap());
        assert_eq!(next.get(TzDateField::Month).unwrap(), 10);
        assert_eq!(next.timezone(), "America/New_York");

        let prev = ny.previous_dst_transition().unwrap();
        assert!(prev.is_dst().unwrap());
        assert_eq!(prev.get(TzDateField::Month).unwrap(), 2);
    }

    #[test]
    fn test_field_names() {
        assert_eq!("fullYear".parse::<TzDateField>().unwrap(), TzDateField::FullYear);
        assert!("day".parse::<TzDateField>().is_err());
    }
}
