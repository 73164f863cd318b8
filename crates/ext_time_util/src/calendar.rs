//! Timezone-bound calendar instant.
//!
//! `ZonedCalendar` keeps nothing but an absolute instant (epoch milliseconds)
//! and a zone. Every field read is derived from those two values through
//! `chrono`/`chrono-tz`; every field write goes through a lenient resolve
//! back to an instant.

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::{OffsetComponents, Tz};
use std::fmt::Write as _;

use crate::error::TimeUtilError;

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const MILLIS_PER_MINUTE: i64 = 60_000;
pub const MILLIS_PER_HOUR: i64 = 3_600_000;
pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// How far the DST transition search looks in either direction
const TRANSITION_SCAN_DAYS: i64 = 731;

/// Calendar components addressable by get/set/add
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarField {
    Year,
    /// Zero-based month (January = 0)
    Month,
    /// Day of month, one-based
    Date,
    Hour,
    Minute,
    Second,
    Millisecond,
}

/// Wall-clock fields of an instant in its zone.
///
/// Values are not range checked: out-of-range values roll over into the
/// next larger field when resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFields {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
    pub millisecond: i64,
}

impl CalendarFields {
    fn get(&self, field: CalendarField) -> i64 {
        match field {
            CalendarField::Year => self.year,
            CalendarField::Month => self.month,
            CalendarField::Date => self.day,
            CalendarField::Hour => self.hour,
            CalendarField::Minute => self.minute,
            CalendarField::Second => self.second,
            CalendarField::Millisecond => self.millisecond,
        }
    }

    fn set(&mut self, field: CalendarField, value: i64) {
        match field {
            CalendarField::Year => self.year = value,
            CalendarField::Month => self.month = value,
            CalendarField::Date => self.day = value,
            CalendarField::Hour => self.hour = value,
            CalendarField::Minute => self.minute = value,
            CalendarField::Second => self.second = value,
            CalendarField::Millisecond => self.millisecond = value,
        }
    }
}

/// An instant bound to a timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonedCalendar {
    zone: Tz,
    millis: i64,
}

impl ZonedCalendar {
    pub fn new(zone: Tz, millis: i64) -> Result<Self, TimeUtilError> {
        utc_from_millis(millis)?;
        Ok(Self { zone, millis })
    }

    pub fn now(zone: Tz) -> Self {
        Self {
            zone,
            millis: Utc::now().timestamp_millis(),
        }
    }

    /// Resolve wall-clock fields in `zone` to an instant
    pub fn from_fields(zone: Tz, fields: &CalendarFields) -> Result<Self, TimeUtilError> {
        let millis = resolve_fields(zone, fields)?;
        Ok(Self { zone, millis })
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Same instant, reinterpreted in another zone
    pub fn in_zone(&self, zone: Tz) -> Self {
        Self {
            zone,
            millis: self.millis,
        }
    }

    fn local(&self) -> Result<DateTime<Tz>, TimeUtilError> {
        Ok(utc_from_millis(self.millis)?.with_timezone(&self.zone))
    }

    pub fn fields(&self) -> Result<CalendarFields, TimeUtilError> {
        let local = self.local()?;
        Ok(CalendarFields {
            year: i64::from(local.year()),
            month: i64::from(local.month0()),
            day: i64::from(local.day()),
            hour: i64::from(local.hour()),
            minute: i64::from(local.minute()),
            second: i64::from(local.second()),
            millisecond: i64::from(local.timestamp_subsec_millis()),
        })
    }

    pub fn get(&self, field: CalendarField) -> Result<i64, TimeUtilError> {
        Ok(self.fields()?.get(field))
    }

    /// Day of week, Sunday = 0
    pub fn day_of_week(&self) -> Result<i64, TimeUtilError> {
        Ok(i64::from(self.local()?.weekday().num_days_from_sunday()))
    }

    /// Overwrite one wall-clock field, letting overflow roll into larger fields
    pub fn set(&mut self, field: CalendarField, value: i64) -> Result<(), TimeUtilError> {
        let mut fields = self.fields()?;
        fields.set(field, value);
        self.millis = resolve_fields(self.zone, &fields)?;
        Ok(())
    }

    /// Add to a field.
    ///
    /// Year, month and date move the wall clock (the day of month is pinned
    /// to the end of a shorter month); smaller fields move absolute time.
    pub fn add(&mut self, field: CalendarField, amount: i64) -> Result<(), TimeUtilError> {
        let step = match field {
            CalendarField::Year | CalendarField::Month => {
                let months = if field == CalendarField::Year {
                    amount.checked_mul(12).ok_or_else(out_of_range)?
                } else {
                    amount
                };
                let mut fields = self.fields()?;
                let total = (fields.year * 12 + fields.month)
                    .checked_add(months)
                    .ok_or_else(out_of_range)?;
                fields.year = total.div_euclid(12);
                fields.month = total.rem_euclid(12);
                fields.day = fields.day.min(days_in_month(fields.year, fields.month)?);
                self.millis = resolve_fields(self.zone, &fields)?;
                return Ok(());
            }
            CalendarField::Date => {
                let mut fields = self.fields()?;
                fields.day = fields.day.checked_add(amount).ok_or_else(out_of_range)?;
                self.millis = resolve_fields(self.zone, &fields)?;
                return Ok(());
            }
            CalendarField::Hour => MILLIS_PER_HOUR,
            CalendarField::Minute => MILLIS_PER_MINUTE,
            CalendarField::Second => MILLIS_PER_SECOND,
            CalendarField::Millisecond => 1,
        };

        let millis = amount
            .checked_mul(step)
            .and_then(|delta| self.millis.checked_add(delta))
            .ok_or_else(out_of_range)?;
        utc_from_millis(millis)?;
        self.millis = millis;
        Ok(())
    }

    fn offsets_at(&self, millis: i64) -> Option<(i64, i64)> {
        offsets(self.zone, millis)
    }

    /// Standard (raw) offset from UTC in milliseconds
    pub fn zone_offset_ms(&self) -> Result<i64, TimeUtilError> {
        self.offsets_at(self.millis)
            .map(|(raw, _)| raw)
            .ok_or_else(out_of_range)
    }

    /// Daylight saving adjustment in milliseconds (0 outside DST)
    pub fn dst_offset_ms(&self) -> Result<i64, TimeUtilError> {
        self.offsets_at(self.millis)
            .map(|(_, dst)| dst)
            .ok_or_else(out_of_range)
    }

    pub fn in_daylight_time(&self) -> Result<bool, TimeUtilError> {
        Ok(self.dst_offset_ms()? != 0)
    }

    /// Whether the zone applies daylight saving in the year following this instant
    pub fn uses_daylight_time(&self) -> bool {
        (0..=12).any(|month| {
            let probe = self.millis.saturating_add(month * 30 * MILLIS_PER_DAY);
            matches!(self.offsets_at(probe), Some((_, dst)) if dst != 0)
        })
    }

    /// First instant after this one at which the zone's offsets change
    pub fn next_transition(&self) -> Option<i64> {
        let here = self.offsets_at(self.millis)?;
        let mut lo = self.millis;
        for _ in 0..TRANSITION_SCAN_DAYS {
            let hi = lo.checked_add(MILLIS_PER_DAY)?;
            if self.offsets_at(hi)? != here {
                return Some(bisect(lo, hi, |t| self.offsets_at(t) != Some(here)));
            }
            lo = hi;
        }
        None
    }

    /// Latest transition strictly before this instant
    pub fn previous_transition(&self) -> Option<i64> {
        let anchor = self.millis.checked_sub(1)?;
        let target = self.offsets_at(anchor)?;
        let mut hi = anchor;
        for _ in 0..TRANSITION_SCAN_DAYS {
            let lo = hi.checked_sub(MILLIS_PER_DAY)?;
            if self.offsets_at(lo)? != target {
                return Some(bisect(lo, hi, |t| self.offsets_at(t) == Some(target)));
            }
            hi = lo;
        }
        None
    }

    /// Render with a chrono `strftime` pattern
    pub fn format(&self, pattern: &str) -> Result<String, TimeUtilError> {
        let local = self.local()?;
        let mut out = String::new();
        write!(out, "{}", local.format(pattern))
            .map_err(|_| TimeUtilError::unknown(format!("Can't format date with '{}'", pattern)))?;
        Ok(out)
    }
}

/// Proleptic Gregorian leap year rule
pub fn is_leap_year(year: i64) -> bool {
    year.rem_euclid(400) == 0 || (year.rem_euclid(4) == 0 && year.rem_euclid(100) != 0)
}

fn out_of_range() -> TimeUtilError {
    TimeUtilError::invalid_values("Value is out of the supported calendar range")
}

fn utc_from_millis(millis: i64) -> Result<DateTime<Utc>, TimeUtilError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(out_of_range)
}

fn offsets(zone: Tz, millis: i64) -> Option<(i64, i64)> {
    let utc = DateTime::<Utc>::from_timestamp_millis(millis)?;
    let offset = zone.offset_from_utc_datetime(&utc.naive_utc());
    Some((
        offset.base_utc_offset().num_milliseconds(),
        offset.dst_offset().num_milliseconds(),
    ))
}

/// Smallest `t` in `(lo, hi]` with `pred(t)`, given `!pred(lo)` and `pred(hi)`
fn bisect(mut lo: i64, mut hi: i64, pred: impl Fn(i64) -> bool) -> i64 {
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

fn days_in_month(year: i64, month0: i64) -> Result<i64, TimeUtilError> {
    let (next_year, next_month0) = if month0 == 11 { (year + 1, 0) } else { (year, month0 + 1) };
    let first = first_of_month(year, month0)?;
    let next = first_of_month(next_year, next_month0)?;
    Ok(next.signed_duration_since(first).num_days())
}

fn first_of_month(year: i64, month0: i64) -> Result<NaiveDate, TimeUtilError> {
    let year = i32::try_from(year).map_err(|_| out_of_range())?;
    let month = u32::try_from(month0 + 1).map_err(|_| out_of_range())?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(out_of_range)
}

fn resolve_fields(zone: Tz, fields: &CalendarFields) -> Result<i64, TimeUtilError> {
    let total_months = fields
        .year
        .checked_mul(12)
        .and_then(|m| m.checked_add(fields.month))
        .ok_or_else(out_of_range)?;
    let first = first_of_month(total_months.div_euclid(12), total_months.rem_euclid(12))?;

    let date = fields
        .day
        .checked_sub(1)
        .and_then(TimeDelta::try_days)
        .and_then(|delta| first.checked_add_signed(delta))
        .ok_or_else(out_of_range)?;

    let time_of_day = fields
        .hour
        .checked_mul(MILLIS_PER_HOUR)
        .and_then(|h| fields.minute.checked_mul(MILLIS_PER_MINUTE)?.checked_add(h))
        .and_then(|t| fields.second.checked_mul(MILLIS_PER_SECOND)?.checked_add(t))
        .and_then(|t| t.checked_add(fields.millisecond))
        .ok_or_else(out_of_range)?;

    let wall = date
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| {
            TimeDelta::try_milliseconds(time_of_day).and_then(|d| midnight.checked_add_signed(d))
        })
        .ok_or_else(out_of_range)?;

    resolve_wall_time(zone, wall)
}

/// Map a wall-clock time to an instant.
///
/// A repeated wall time resolves to the later instant; a skipped one is read
/// with the offset in force before the gap, which lands after it.
fn resolve_wall_time(zone: Tz, wall: NaiveDateTime) -> Result<i64, TimeUtilError> {
    match zone.from_local_datetime(&wall) {
        LocalResult::Single(dt) => Ok(dt.timestamp_millis()),
        LocalResult::Ambiguous(first, second) => {
            Ok(first.timestamp_millis().max(second.timestamp_millis()))
        }
        LocalResult::None => {
            for hours_back in 1..=48 {
                let probe = TimeDelta::try_hours(hours_back)
                    .and_then(|d| wall.checked_sub_signed(d))
                    .ok_or_else(out_of_range)?;
                if let Some(before) = zone.from_local_datetime(&probe).latest() {
                    let offset = i64::from(before.offset().fix().local_minus_utc());
                    let utc = TimeDelta::try_seconds(offset)
                        .and_then(|d| wall.checked_sub_signed(d))
                        .ok_or_else(out_of_range)?;
                    return Ok(utc.and_utc().timestamp_millis());
                }
            }
            Err(TimeUtilError::unknown(format!(
                "Can't resolve wall time {} in {}",
                wall,
                zone.name()
            )))
        }
    }
}
