//! Length-plus-unit time spans.
//!
//! A `TimeDuration` is compared and combined only after both sides are
//! expressed in the same unit, and results are reported in the largest unit
//! that divides the length exactly.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TimeUtilError;

/// Largest magnitude a duration length may take (2^53, the JS safe integer limit)
pub const MAX_SAFE_LENGTH: i64 = 9_007_199_254_740_992;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeUnit {
    Msecs,
    Secs,
    Mins,
    Hours,
    Days,
}

impl TimeUnit {
    /// Coarsest first, the order used when normalizing
    const COARSEST_FIRST: [TimeUnit; 4] = [
        TimeUnit::Days,
        TimeUnit::Hours,
        TimeUnit::Mins,
        TimeUnit::Secs,
    ];

    pub fn millis(self) -> i64 {
        match self {
            TimeUnit::Msecs => 1,
            TimeUnit::Secs => 1_000,
            TimeUnit::Mins => 60_000,
            TimeUnit::Hours => 3_600_000,
            TimeUnit::Days => 86_400_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Msecs => "MSECS",
            TimeUnit::Secs => "SECS",
            TimeUnit::Mins => "MINS",
            TimeUnit::Hours => "HOURS",
            TimeUnit::Days => "DAYS",
        }
    }

    /// Parse a unit tag, substituting `MSECS` for anything unrecognized.
    ///
    /// Unit tags arrive from script code; an unknown tag is not an error here.
    pub fn parse_or_msecs(tag: &str) -> Self {
        tag.parse().unwrap_or_else(|_| {
            debug!(unit = %tag, "unrecognized time unit, using MSECS");
            TimeUnit::Msecs
        })
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = TimeUtilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MSECS" => Ok(TimeUnit::Msecs),
            "SECS" => Ok(TimeUnit::Secs),
            "MINS" => Ok(TimeUnit::Mins),
            "HOURS" => Ok(TimeUnit::Hours),
            "DAYS" => Ok(TimeUnit::Days),
            _ => Err(TimeUtilError::invalid_values(format!(
                "Unknown time unit: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A length of time with its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDuration {
    pub length: i64,
    pub unit: TimeUnit,
}

impl Default for TimeDuration {
    fn default() -> Self {
        Self {
            length: 0,
            unit: TimeUnit::Msecs,
        }
    }
}

impl TimeDuration {
    pub fn new(length: i64, unit: TimeUnit) -> Self {
        Self { length, unit }
    }

    /// Build from a script-supplied unit tag (unknown tags become `MSECS`)
    pub fn from_tag(length: i64, unit: Option<&str>) -> Self {
        Self {
            length,
            unit: unit.map(TimeUnit::parse_or_msecs).unwrap_or(TimeUnit::Msecs),
        }
    }

    /// Replace the unit tag; an unknown tag silently becomes `MSECS`
    pub fn set_unit(&mut self, tag: &str) {
        self.unit = TimeUnit::parse_or_msecs(tag);
    }

    /// Total span in milliseconds. Wide enough that no representable duration overflows.
    pub fn total_millis(&self) -> i128 {
        i128::from(self.length) * i128::from(self.unit.millis())
    }

    /// Re-express the duration in the largest unit that divides it exactly.
    ///
    /// Zero normalizes to `DAYS`. The chosen unit is never finer than the
    /// current one, so the new length never grows in magnitude.
    pub fn normalize(&self) -> TimeDuration {
        let total = self.total_millis();
        for unit in TimeUnit::COARSEST_FIRST {
            let step = i128::from(unit.millis());
            if total % step == 0 {
                // |total / step| <= |length| because unit >= self.unit
                return TimeDuration::new((total / step) as i64, unit);
            }
        }
        TimeDuration::new(self.length, TimeUnit::Msecs)
    }

    /// `self - other`, computed in the finer of the two units and normalized.
    pub fn difference(&self, other: &TimeDuration) -> Result<TimeDuration, TimeUtilError> {
        let (lhs, rhs, unit) = match self.unit.millis().cmp(&other.unit.millis()) {
            std::cmp::Ordering::Greater => (
                scale(self.length, self.unit.millis() / other.unit.millis())?,
                other.length,
                other.unit,
            ),
            std::cmp::Ordering::Less => (
                self.length,
                scale(other.length, other.unit.millis() / self.unit.millis())?,
                self.unit,
            ),
            std::cmp::Ordering::Equal => (self.length, other.length, self.unit),
        };

        let length = lhs
            .checked_sub(rhs)
            .ok_or_else(|| TimeUtilError::unknown("limit value reached"))?;

        let result = if length == 0 {
            TimeDuration::new(0, TimeUnit::Days)
        } else {
            TimeDuration::new(length, unit).normalize()
        };

        ensure_safe_length(result.length)?;
        Ok(result)
    }

    pub fn equals_to(&self, other: &TimeDuration) -> Result<bool, TimeUtilError> {
        Ok(self.difference(other)?.length == 0)
    }

    pub fn less_than(&self, other: &TimeDuration) -> Result<bool, TimeUtilError> {
        Ok(self.difference(other)?.length < 0)
    }

    pub fn greater_than(&self, other: &TimeDuration) -> Result<bool, TimeUtilError> {
        Ok(self.difference(other)?.length > 0)
    }
}

/// Multiply a length by a unit factor, refusing to wrap
fn scale(length: i64, factor: i64) -> Result<i64, TimeUtilError> {
    length
        .checked_mul(factor)
        .ok_or_else(|| TimeUtilError::unknown("limit value reached"))
}

pub(crate) fn ensure_safe_length(length: i64) -> Result<(), TimeUtilError> {
    if length.unsigned_abs() > MAX_SAFE_LENGTH as u64 {
        return Err(TimeUtilError::unknown(
            "The result is beyond the scope that TimeDuration can represent",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_fallback_to_msecs() {
        let mut d = TimeDuration::from_tag(5, Some("WEEKS"));
        assert_eq!(d.unit, TimeUnit::Msecs);
        d.set_unit("HOURS");
        assert_eq!(d.unit, TimeUnit::Hours);
        d.set_unit("hours");
        assert_eq!(d.unit, TimeUnit::Msecs);
        assert!("hours".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn test_normalize_picks_largest_exact_unit() {
        let d = TimeDuration::new(86_400_000, TimeUnit::Msecs).normalize();
        assert_eq!(d, TimeDuration::new(1, TimeUnit::Days));

        let d = TimeDuration::new(90, TimeUnit::Mins).normalize();
        assert_eq!(d, TimeDuration::new(90, TimeUnit::Mins));

        let d = TimeDuration::new(120, TimeUnit::Mins).normalize();
        assert_eq!(d, TimeDuration::new(2, TimeUnit::Hours));

        let d = TimeDuration::new(-7_200, TimeUnit::Secs).normalize();
        assert_eq!(d, TimeDuration::new(-2, TimeUnit::Hours));

        let d = TimeDuration::new(1_500, TimeUnit::Msecs).normalize();
        assert_eq!(d, TimeDuration::new(1_500, TimeUnit::Msecs));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for d in [
            TimeDuration::new(0, TimeUnit::Secs),
            TimeDuration::new(3_600_000, TimeUnit::Msecs),
            TimeDuration::new(61, TimeUnit::Secs),
            TimeDuration::new(i64::MAX, TimeUnit::Days),
            TimeDuration::new(i64::MIN, TimeUnit::Msecs),
        ] {
            let once = d.normalize();
            assert_eq!(once.normalize(), once);
        }
    }

    #[test]
    fn test_difference_converts_coarser_unit() {
        let a = TimeDuration::new(90, TimeUnit::Mins);
        let b = TimeDuration::new(1, TimeUnit::Hours);
        let diff = a.difference(&b).unwrap();
        assert_eq!(diff, TimeDuration::new(30, TimeUnit::Mins));
        assert_ne!(diff.length, 0);

        let back = b.difference(&a).unwrap();
        assert_eq!(back, TimeDuration::new(-30, TimeUnit::Mins));
    }

    #[test]
    fn test_difference_against_zero_round_trips() {
        let a = TimeDuration::new(3, TimeUnit::Hours);
        let b = TimeDuration::new(45, TimeUnit::Mins);
        let diff = a.difference(&b).unwrap();
        let zero = TimeDuration::new(0, diff.unit);
        assert_eq!(diff.difference(&zero).unwrap(), diff.normalize());
    }

    #[test]
    fn test_zero_difference_is_days() {
        let a = TimeDuration::new(60, TimeUnit::Secs);
        let b = TimeDuration::new(1, TimeUnit::Mins);
        let diff = a.difference(&b).unwrap();
        assert_eq!(diff, TimeDuration::new(0, TimeUnit::Days));

        let same = TimeDuration::new(7, TimeUnit::Msecs)
            .difference(&TimeDuration::new(7, TimeUnit::Msecs))
            .unwrap();
        assert_eq!(same.unit, TimeUnit::Days);
    }

    #[test]
    fn test_difference_overflow_is_rejected() {
        let huge = TimeDuration::new(i64::MAX / 2, TimeUnit::Days);
        let tiny = TimeDuration::new(1, TimeUnit::Msecs);
        let err = huge.difference(&tiny).unwrap_err();
        assert!(matches!(err, TimeUtilError::Unknown { .. }));

        let err = tiny.difference(&huge).unwrap_err();
        assert!(matches!(err, TimeUtilError::Unknown { .. }));
    }

    #[test]
    fn test_difference_beyond_safe_range() {
        let a = TimeDuration::new(MAX_SAFE_LENGTH, TimeUnit::Msecs);
        let b = TimeDuration::new(-1, TimeUnit::Msecs);
        let err = a.difference(&b).unwrap_err();
        assert!(matches!(err, TimeUtilError::Unknown { .. }));
    }

    #[test]
    fn test_comparisons() {
        let a = TimeDuration::new(1, TimeUnit::Days);
        let b = TimeDuration::new(24, TimeUnit::Hours);
        let c = TimeDuration::new(25, TimeUnit::Hours);
        assert!(a.equals_to(&b).unwrap());
        assert!(a.less_than(&c).unwrap());
        assert!(c.greater_than(&a).unwrap());
        assert!(!a.greater_than(&b).unwrap());
    }

    #[test]
    fn test_serialization_uses_unit_tags() {
        let d = TimeDuration::new(2, TimeUnit::Hours);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, r#"{"length":2,"unit":"HOURS"}"#);
    }
}
