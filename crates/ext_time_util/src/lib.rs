//! Time utilities extension for the Tizen host runtime.
//!
//! Exposes `TZDate`, `TimeDuration` and the `tizen.time` service to scripts.
//! All calendar arithmetic lives in [`ZonedCalendar`]; the ops below only
//! marshal values across the JS boundary.

use chrono_tz::Tz;
use deno_core::{op2, Extension, OpState};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub mod calendar;
pub mod config;
pub mod duration;
pub mod error;
pub mod time_util;
pub mod tools;
pub mod tzdate;

pub use calendar::{is_leap_year, CalendarField, CalendarFields, ZonedCalendar};
pub use config::TimeUtilConfig;
pub use duration::{TimeDuration, TimeUnit};
pub use error::{TimeUtilError, TimeUtilErrorCode};
pub use time_util::{ChangeKind, ChangeSubscription, TimeChangeEvent, TimeUtil};
pub use tools::{FormatKind, LocalePatterns};
pub use tzdate::{FormatOptions, TzDate, TzDateComponents, TzDateField};

// ============================================================================
// State
// ============================================================================

struct ChangeSlot {
    kind: ChangeKind,
    receiver: Option<mpsc::UnboundedReceiver<TimeChangeEvent>>,
}

pub struct TimeUtilState {
    pub time_util: Arc<TimeUtil>,
    subscriptions: HashMap<u64, ChangeSlot>,
}

impl TimeUtilState {
    pub fn new(time_util: Arc<TimeUtil>) -> Self {
        Self {
            time_util,
            subscriptions: HashMap::new(),
        }
    }
}

/// Initialize time util state in OpState - must be called after creating JsRuntime
pub fn init_time_util_state(op_state: &mut OpState, time_util: Arc<TimeUtil>) {
    op_state.put::<TimeUtilState>(TimeUtilState::new(time_util));
}

fn time_util(state: &OpState) -> Arc<TimeUtil> {
    state.borrow::<TimeUtilState>().time_util.clone()
}

// ============================================================================
// Wire types
// ============================================================================

/// A `TZDate` as scripts hold it: an instant and the zone it is viewed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TzDateValue {
    pub epoch_ms: i64,
    pub timezone: String,
}

impl From<&TzDate> for TzDateValue {
    fn from(date: &TzDate) -> Self {
        Self {
            epoch_ms: date.epoch_ms(),
            timezone: date.timezone().to_string(),
        }
    }
}

impl TzDateValue {
    fn to_date(&self) -> Result<TzDate, TimeUtilError> {
        let zone = tools::parse_timezone(&self.timezone)
            .ok_or_else(|| TimeUtilError::invalid_values("Invalid timezone"))?;
        TzDate::from_epoch_ms(self.epoch_ms, zone)
    }
}

/// Constructor arguments: calendar fields, an epoch instant, or neither (now)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TzDateInit {
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub date: Option<i64>,
    pub hours: Option<i64>,
    pub minutes: Option<i64>,
    pub seconds: Option<i64>,
    pub milliseconds: Option<i64>,
    pub epoch_ms: Option<i64>,
    pub timezone: Option<String>,
}

impl TzDateInit {
    fn build(&self, local: Tz) -> Result<TzDate, TimeUtilError> {
        let zone = TzDate::zone_or_local(self.timezone.as_deref(), local);
        if let Some(year) = self.year {
            let fields = CalendarFields {
                year,
                month: self.month.unwrap_or(0),
                day: self.date.unwrap_or(1),
                hour: self.hours.unwrap_or(0),
                minute: self.minutes.unwrap_or(0),
                second: self.seconds.unwrap_or(0),
                millisecond: self.milliseconds.unwrap_or(0),
            };
            return TzDate::from_fields(&fields, zone);
        }
        match self.epoch_ms {
            Some(epoch_ms) => TzDate::from_epoch_ms(epoch_ms, zone),
            None => Ok(TzDate::now(zone)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DurationValue {
    pub length: i64,
    #[serde(default)]
    pub unit: Option<String>,
}

impl From<&DurationValue> for TimeDuration {
    fn from(value: &DurationValue) -> Self {
        TimeDuration::from_tag(value.length, value.unit.as_deref())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneInfo {
    pub abbreviation: String,
    pub seconds_from_utc: i64,
    pub is_dst: bool,
}

fn parse_format_kind(kind: &str) -> Result<FormatKind, TimeUtilError> {
    match kind {
        "date" => Ok(FormatKind::Date),
        "shortDate" => Ok(FormatKind::ShortDate),
        "time" => Ok(FormatKind::Time),
        "dateTime" => Ok(FormatKind::DateTime),
        _ => Err(TimeUtilError::invalid_values(format!(
            "Unknown format kind: {}",
            kind
        ))),
    }
}

fn parse_change_kind(kind: &str) -> Result<ChangeKind, TimeUtilError> {
    match kind {
        "dateTime" => Ok(ChangeKind::DateTime),
        "timezone" => Ok(ChangeKind::Timezone),
        _ => Err(TimeUtilError::invalid_values(format!(
            "Unknown listener kind: {}",
            kind
        ))),
    }
}

// ============================================================================
// TZDate ops
// ============================================================================

#[op2]
#[serde]
fn op_time_util_tzdate_create(
    state: &mut OpState,
    #[serde] init: TzDateInit,
) -> Result<TzDateValue, TimeUtilError> {
    let local = time_util(state).local_timezone();
    let date = init.build(local)?;
    Ok(TzDateValue::from(&date))
}

#[op2]
#[serde]
fn op_time_util_tzdate_fields(
    #[serde] value: TzDateValue,
    utc: bool,
) -> Result<TzDateComponents, TimeUtilError> {
    let date = value.to_date()?;
    if utc {
        date.utc_components()
    } else {
        date.components()
    }
}

#[op2]
#[serde]
fn op_time_util_tzdate_set_field(
    #[serde] value: TzDateValue,
    #[string] field: String,
    #[smi] field_value: i32,
    utc: bool,
) -> Result<TzDateValue, TimeUtilError> {
    let field: TzDateField = field.parse()?;
    let mut date = value.to_date()?;
    if utc {
        date.set_utc(field, i64::from(field_value))?;
    } else {
        date.set(field, i64::from(field_value))?;
    }
    Ok(TzDateValue::from(&date))
}

#[op2]
#[serde]
fn op_time_util_tzdate_to_timezone(
    #[serde] value: TzDateValue,
    #[string] timezone: String,
) -> Result<TzDateValue, TimeUtilError> {
    let date = value.to_date()?.to_timezone(&timezone)?;
    Ok(TzDateValue::from(&date))
}

#[op2]
#[serde]
fn op_time_util_tzdate_to_local_timezone(
    state: &mut OpState,
    #[serde] value: TzDateValue,
) -> Result<TzDateValue, TimeUtilError> {
    let local = time_util(state).local_timezone();
    let date = value.to_date()?.in_zone(local);
    Ok(TzDateValue::from(&date))
}

#[op2]
#[serde]
fn op_time_util_tzdate_to_utc(#[serde] value: TzDateValue) -> Result<TzDateValue, TimeUtilError> {
    let date = value.to_date()?.to_utc();
    Ok(TzDateValue::from(&date))
}

#[op2]
#[serde]
fn op_time_util_tzdate_difference(
    #[serde] value: TzDateValue,
    #[serde] other: TzDateValue,
) -> Result<TimeDuration, TimeUtilError> {
    value.to_date()?.difference(&other.to_date()?)
}

#[op2]
#[serde]
fn op_time_util_tzdate_add_duration(
    #[serde] value: TzDateValue,
    #[serde] duration: DurationValue,
) -> Result<TzDateValue, TimeUtilError> {
    let date = value.to_date()?.add_duration(&TimeDuration::from(&duration))?;
    Ok(TzDateValue::from(&date))
}

#[op2]
#[string]
fn op_time_util_tzdate_format(
    state: &mut OpState,
    #[serde] value: TzDateValue,
    #[string] kind: String,
    localized: bool,
) -> Result<String, TimeUtilError> {
    let options = time_util(state).format_options();
    let kind = parse_format_kind(&kind)?;
    value.to_date()?.render(kind, localized, &options)
}

#[op2]
#[serde]
fn op_time_util_tzdate_zone_info(#[serde] value: TzDateValue) -> Result<ZoneInfo, TimeUtilError> {
    let date = value.to_date()?;
    Ok(ZoneInfo {
        abbreviation: date.timezone_abbreviation()?,
        seconds_from_utc: date.seconds_from_utc()?,
        is_dst: date.is_dst()?,
    })
}

#[op2]
#[serde]
fn op_time_util_tzdate_dst_transition(
    #[serde] value: TzDateValue,
    next: bool,
) -> Result<TzDateValue, TimeUtilError> {
    let date = value.to_date()?;
    let transition = if next {
        date.next_dst_transition()?
    } else {
        date.previous_dst_transition()?
    };
    Ok(TzDateValue::from(&transition))
}

// ============================================================================
// TimeDuration ops
// ============================================================================

/// `a - b`, normalized; comparisons in JS use the sign of the length
#[op2]
#[serde]
fn op_time_util_duration_difference(
    #[serde] a: DurationValue,
    #[serde] b: DurationValue,
) -> Result<TimeDuration, TimeUtilError> {
    TimeDuration::from(&a).difference(&TimeDuration::from(&b))
}

// ============================================================================
// TimeUtil ops
// ============================================================================

#[op2]
#[serde]
fn op_time_util_get_current_date_time(state: &mut OpState) -> TzDateValue {
    TzDateValue::from(&time_util(state).current_date_time())
}

#[op2]
#[string]
fn op_time_util_get_local_timezone(state: &mut OpState) -> String {
    time_util(state).local_timezone().name().to_string()
}

#[op2]
#[serde]
fn op_time_util_get_available_timezones(state: &mut OpState) -> Vec<String> {
    time_util(state).available_timezones()
}

#[op2]
#[string]
fn op_time_util_get_date_format(state: &mut OpState, short: bool) -> String {
    time_util(state).date_format(short)
}

#[op2]
#[string]
fn op_time_util_get_time_format(state: &mut OpState) -> String {
    time_util(state).time_format()
}

#[op2(fast)]
fn op_time_util_is_leap_year(#[smi] year: i32) -> bool {
    is_leap_year(i64::from(year))
}

/// Install the listener for `kind` ("dateTime" or "timezone"); a previous
/// listener of the same kind is dropped. Returns the subscription id.
#[op2(fast)]
#[bigint]
fn op_time_util_set_change_listener(
    state: &mut OpState,
    #[string] kind: String,
) -> Result<u64, TimeUtilError> {
    let kind = parse_change_kind(&kind)?;
    let subscription = time_util(state).set_change_listener(kind);
    let time_state = state.borrow_mut::<TimeUtilState>();
    time_state.subscriptions.retain(|_, slot| slot.kind != kind);
    time_state.subscriptions.insert(
        subscription.id,
        ChangeSlot {
            kind,
            receiver: Some(subscription.receiver),
        },
    );
    debug!(?kind, id = subscription.id, "change listener set");
    Ok(subscription.id)
}

#[op2(fast)]
fn op_time_util_unset_change_listener(
    state: &mut OpState,
    #[string] kind: String,
) -> Result<bool, TimeUtilError> {
    let kind = parse_change_kind(&kind)?;
    let removed = time_util(state).unset_change_listener(kind);
    state
        .borrow_mut::<TimeUtilState>()
        .subscriptions
        .retain(|_, slot| slot.kind != kind);
    Ok(removed.is_some())
}

/// Wait for the next change event of a subscription; `None` once it was unset
/// or replaced.
#[op2(async)]
#[serde]
async fn op_time_util_change_next(
    state: Rc<RefCell<OpState>>,
    #[bigint] id: u64,
) -> Result<Option<TimeChangeEvent>, TimeUtilError> {
    let mut rx = {
        let mut s = state.borrow_mut();
        let time_state = s.borrow_mut::<TimeUtilState>();
        let Some(slot) = time_state.subscriptions.get_mut(&id) else {
            return Ok(None);
        };
        slot.receiver
            .take()
            .ok_or_else(|| TimeUtilError::not_found("Change listener is already being polled"))?
    };

    let result = rx.recv().await;

    {
        let mut s = state.borrow_mut();
        let time_state = s.borrow_mut::<TimeUtilState>();
        if let Some(slot) = time_state.subscriptions.get_mut(&id) {
            slot.receiver = Some(rx);
        }
    }

    Ok(result)
}

// Include generated extension! macro from build.rs
include!(concat!(env!("OUT_DIR"), "/extension.rs"));

pub fn time_util_extension() -> Extension {
    tizen_time_util::ext()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(epoch_ms: i64, timezone: &str) -> TzDateValue {
        TzDateValue {
            epoch_ms,
            timezone: timezone.to_string(),
        }
    }

    #[test]
    fn test_init_from_fields() {
        let init = TzDateInit {
            year: Some(2024),
            month: Some(1),
            date: Some(29),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        };
        let date = init.build(Tz::Asia__Seoul).unwrap();
        assert_eq!(date.timezone(), "UTC");
        let c = date.components().unwrap();
        assert_eq!((c.full_year, c.month, c.date, c.hours), (2024, 1, 29, 0));
    }

    #[test]
    fn test_init_defaults_to_local_zone() {
        let init = TzDateInit {
            epoch_ms: Some(0),
            timezone: Some("Not/AZone".to_string()),
            ..Default::default()
        };
        let date = init.build(Tz::Asia__Seoul).unwrap();
        assert_eq!(date.timezone(), "Asia/Seoul");
        assert_eq!(date.get(TzDateField::Hours).unwrap(), 9);
    }

    #[test]
    fn test_value_rejects_unknown_zone() {
        let err = value(0, "Atlantis/Capital").to_date().unwrap_err();
        assert_eq!(err.code(), TimeUtilErrorCode::InvalidValues);
    }

    #[test]
    fn test_value_round_trip() {
        let date = value(1_720_911_900_000, "Europe/Paris").to_date().unwrap();
        assert_eq!(TzDateValue::from(&date), value(1_720_911_900_000, "Europe/Paris"));
        let json = serde_json::to_value(TzDateValue::from(&date)).unwrap();
        assert_eq!(json["epochMs"], 1_720_911_900_000i64);
        assert_eq!(json["timezone"], "Europe/Paris");
    }

    #[test]
    fn test_duration_value_falls_back_to_msecs() {
        let d: DurationValue = serde_json::from_str(r#"{"length": 5, "unit": "WEEKS"}"#).unwrap();
        assert_eq!(TimeDuration::from(&d), TimeDuration::new(5, TimeUnit::Msecs));
        let d: DurationValue = serde_json::from_str(r#"{"length": 5}"#).unwrap();
        assert_eq!(TimeDuration::from(&d).unit, TimeUnit::Msecs);
    }

    fn script_runtime() -> deno_core::JsRuntime {
        let mut js = deno_core::JsRuntime::new(deno_core::RuntimeOptions {
            extensions: vec![time_util_extension()],
            ..Default::default()
        });
        let time_util = Arc::new(TimeUtil::new(TimeUtilConfig::default()));
        init_time_util_state(&mut js.op_state().borrow_mut(), time_util);
        js
    }

    fn run_script(js: &mut deno_core::JsRuntime, source: &'static str) {
        if let Err(e) = js.execute_script("[tizen:time]", source) {
            panic!("script failed: {}", e);
        }
    }

    #[test]
    fn test_script_duration_unit_tags() {
        let mut js = script_runtime();
        run_script(
            &mut js,
            r#"
            const d = new tizen.TimeDuration(5, "WEEKS");
            if (d.unit !== "MSECS") throw new Error(`constructed unit ${d.unit}`);
            const diff = d.difference(new tizen.TimeDuration(0, "MSECS"));
            if (diff.unit !== "MSECS" || diff.length !== 5) {
              throw new Error(`difference ${diff.length} ${diff.unit}`);
            }

            let caught = null;
            try {
              d.unit = "WEEKS";
            } catch (e) {
              caught = e;
            }
            if (caught?.name !== "TypeMismatchError") throw new Error(`setter threw ${caught}`);
            if (d.unit !== "MSECS") throw new Error(`unit changed to ${d.unit}`);

            d.unit = "HOURS";
            if (d.unit !== "HOURS") throw new Error(`unit is ${d.unit}`);
            "#,
        );
    }

    #[test]
    fn test_script_errors_carry_names() {
        let mut js = script_runtime();
        run_script(
            &mut js,
            r#"
            const date = new tizen.TZDate(2024, 0, 1, 0, 0, 0, 0, "UTC");
            let caught = null;
            try {
              date.toTimezone("Nowhere/X");
            } catch (e) {
              caught = e;
            }
            if (caught?.name !== "InvalidValuesError" || caught.code !== 9200) {
              throw new Error(`toTimezone threw ${caught?.name} ${caught?.code}`);
            }

            caught = null;
            try {
              tizen.time.setTimezoneChangeListener("not a function");
            } catch (e) {
              caught = e;
            }
            if (caught?.name !== "TypeMismatchError") throw new Error(`listener threw ${caught}`);
            "#,
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(parse_format_kind("dateTime").unwrap(), FormatKind::DateTime);
        assert!(parse_format_kind("weekday").is_err());
        assert_eq!(parse_change_kind("timezone").unwrap(), ChangeKind::Timezone);
        assert!(parse_change_kind("clock").is_err());
    }
}
