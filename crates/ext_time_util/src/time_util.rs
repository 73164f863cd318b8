//! The `TimeUtil` service: local zone tracking, locale formats and change listeners.

use chrono_tz::Tz;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::calendar::is_leap_year;
use crate::config::TimeUtilConfig;
use crate::tools::{self, FormatKind, LocalePatterns};
use crate::tzdate::{FormatOptions, TzDate};

/// A wall-clock jump larger than this counts as a system time change
const CLOCK_JUMP_TOLERANCE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    DateTime,
    Timezone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TimeChangeEvent {
    DateTimeChanged,
    TimezoneChanged { timezone: String },
}

/// Receiving end of a change listener registration
#[derive(Debug)]
pub struct ChangeSubscription {
    pub id: u64,
    pub kind: ChangeKind,
    pub receiver: mpsc::UnboundedReceiver<TimeChangeEvent>,
}

#[derive(Default)]
struct ChangeListeners {
    next_id: u64,
    date_time: Option<(u64, mpsc::UnboundedSender<TimeChangeEvent>)>,
    timezone: Option<(u64, mpsc::UnboundedSender<TimeChangeEvent>)>,
}

impl ChangeListeners {
    fn slot(&mut self, kind: ChangeKind) -> &mut Option<(u64, mpsc::UnboundedSender<TimeChangeEvent>)> {
        match kind {
            ChangeKind::DateTime => &mut self.date_time,
            ChangeKind::Timezone => &mut self.timezone,
        }
    }
}

pub struct TimeUtil {
    config: TimeUtilConfig,
    timezone: Mutex<Tz>,
    listeners: Mutex<ChangeListeners>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TimeUtil {
    pub fn new(config: TimeUtilConfig) -> Self {
        let timezone = tools::local_timezone(&config.localtime_path);
        info!(timezone = %timezone.name(), "time util initialized");
        Self {
            config,
            timezone: Mutex::new(timezone),
            listeners: Mutex::new(ChangeListeners::default()),
        }
    }

    pub fn local_timezone(&self) -> Tz {
        *lock(&self.timezone)
    }

    pub fn current_date_time(&self) -> TzDate {
        TzDate::now(self.local_timezone())
    }

    pub fn available_timezones(&self) -> Vec<String> {
        tools::available_timezones()
    }

    pub fn locale(&self) -> String {
        tools::current_locale(self.config.locale.as_deref())
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            patterns: LocalePatterns::lookup(&self.locale()),
            use_24h: self.config.time_format_24h,
        }
    }

    pub fn date_format(&self, short: bool) -> String {
        let options = self.format_options();
        let kind = if short {
            FormatKind::ShortDate
        } else {
            FormatKind::Date
        };
        tools::script_date_format(&options.patterns.pattern(kind, options.use_24h, true))
    }

    pub fn time_format(&self) -> String {
        let options = self.format_options();
        tools::script_time_format(options.patterns.time(options.use_24h))
    }

    pub fn is_leap_year(&self, year: i64) -> bool {
        is_leap_year(year)
    }

    /// Install the single listener of `kind`, replacing (and closing) any previous one
    pub fn set_change_listener(&self, kind: ChangeKind) -> ChangeSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = lock(&self.listeners);
        listeners.next_id = listeners.next_id.wrapping_add(1).max(1);
        let id = listeners.next_id;
        if let Some((old, _)) = listeners.slot(kind).replace((id, tx)) {
            debug!(?kind, replaced = old, "change listener replaced");
        }
        ChangeSubscription {
            id,
            kind,
            receiver: rx,
        }
    }

    /// Remove the listener of `kind`; returns the id it had
    pub fn unset_change_listener(&self, kind: ChangeKind) -> Option<u64> {
        lock(&self.listeners).slot(kind).take().map(|(id, _)| id)
    }

    fn notify(&self, kind: ChangeKind, event: TimeChangeEvent) {
        let mut listeners = lock(&self.listeners);
        let slot = listeners.slot(kind);
        let gone = match slot.as_ref() {
            Some((id, tx)) => {
                let gone = tx.send(event).is_err();
                if gone {
                    debug!(?kind, id, "change listener receiver gone");
                }
                gone
            }
            None => false,
        };
        if gone {
            *slot = None;
        }
    }

    /// React to a system clock or zone change.
    ///
    /// Re-reads the system zone and fires the timezone listener if it moved,
    /// then always fires the date/time listener. Returns whether the zone changed.
    pub fn handle_system_time_changed(&self) -> bool {
        let changed = match tools::system_timezone(&self.config.localtime_path)
            .and_then(|id| tools::parse_timezone(&id))
        {
            Some(zone) => {
                let mut current = lock(&self.timezone);
                if *current != zone {
                    info!(from = %current.name(), to = %zone.name(), "system timezone changed");
                    *current = zone;
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if changed {
            let timezone = self.local_timezone().name().to_string();
            self.notify(ChangeKind::Timezone, TimeChangeEvent::TimezoneChanged { timezone });
        }
        self.notify(ChangeKind::DateTime, TimeChangeEvent::DateTimeChanged);
        changed
    }

    /// Poll for wall-clock jumps and zone link changes. Must run inside a tokio runtime.
    pub fn spawn_change_watcher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.watch_interval_ms == 0 {
            return None;
        }
        let period = Duration::from_millis(self.config.watch_interval_ms);
        let this = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut mono = Instant::now();
            let mut wall = SystemTime::now();

            loop {
                ticker.tick().await;
                let Some(this) = this.upgrade() else {
                    break;
                };

                let mono_now = Instant::now();
                let wall_now = SystemTime::now();
                let expected = mono_now.duration_since(mono);
                let actual = match wall_now.duration_since(wall) {
                    Ok(forward) => forward,
                    Err(_) => Duration::MAX,
                };
                let jumped = actual.abs_diff(expected) > CLOCK_JUMP_TOLERANCE;
                mono = mono_now;
                wall = wall_now;

                let zone_moved = tools::system_timezone(&this.config.localtime_path)
                    .and_then(|id| tools::parse_timezone(&id))
                    .is_some_and(|zone| zone != this.local_timezone());

                if jumped || zone_moved {
                    debug!(jumped, zone_moved, "system time change detected");
                    this.handle_system_time_changed();
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config_with_link(name: &str) -> TimeUtilConfig {
        TimeUtilConfig {
            localtime_path: std::env::temp_dir().join(name),
            locale: Some("en-US".to_string()),
            time_format_24h: false,
            watch_interval_ms: 0,
        }
    }

    #[cfg(unix)]
    fn point_link(path: &PathBuf, zone: &str) {
        let _ = std::fs::remove_file(path);
        std::os::unix::fs::symlink(format!("/usr/share/zoneinfo/{}", zone), path).unwrap();
    }

    #[test]
    fn test_formats_follow_locale() {
        let util = TimeUtil::new(config_with_link("ext_time_util_formats"));
        assert_eq!(util.date_format(false), "D, M d, y");
        assert_eq!(util.date_format(true), "m/d/y");
        assert_eq!(util.time_format(), "h:m:s ap");
        assert!(util.is_leap_year(2024));
    }

    #[test]
    fn test_missing_link_falls_back() {
        let util = TimeUtil::new(config_with_link("ext_time_util_missing_link"));
        // TZ or UTC, never a panic
        let _ = util.local_timezone();
        assert!(!util.handle_system_time_changed());
    }

    #[cfg(unix)]
    #[test]
    fn test_time_change_notifies_listeners_in_order() {
        let config = config_with_link("ext_time_util_change_link");
        point_link(&config.localtime_path, "Asia/Seoul");
        let util = TimeUtil::new(config.clone());
        assert_eq!(util.local_timezone().name(), "Asia/Seoul");

        let mut tz = util.set_change_listener(ChangeKind::Timezone);
        let mut time = util.set_change_listener(ChangeKind::DateTime);

        // No zone change: only the date/time listener fires
        assert!(!util.handle_system_time_changed());
        assert_eq!(time.receiver.try_recv().unwrap(), TimeChangeEvent::DateTimeChanged);
        assert!(tz.receiver.try_recv().is_err());

        point_link(&config.localtime_path, "Europe/Paris");
        assert!(util.handle_system_time_changed());
        assert_eq!(
            tz.receiver.try_recv().unwrap(),
            TimeChangeEvent::TimezoneChanged {
                timezone: "Europe/Paris".to_string()
            }
        );
        assert_eq!(time.receiver.try_recv().unwrap(), TimeChangeEvent::DateTimeChanged);
        assert_eq!(util.current_date_time().timezone(), "Europe/Paris");

        let _ = std::fs::remove_file(&config.localtime_path);
    }

    #[test]
    fn test_set_replaces_previous_listener() {
        let util = TimeUtil::new(config_with_link("ext_time_util_replace"));
        let mut first = util.set_change_listener(ChangeKind::DateTime);
        let mut second = util.set_change_listener(ChangeKind::DateTime);
        assert_ne!(first.id, second.id);

        util.handle_system_time_changed();
        assert!(matches!(
            first.receiver.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(second.receiver.try_recv().unwrap(), TimeChangeEvent::DateTimeChanged);

        assert_eq!(util.unset_change_listener(ChangeKind::DateTime), Some(second.id));
        assert_eq!(util.unset_change_listener(ChangeKind::DateTime), None);
    }

    #[tokio::test]
    async fn test_watcher_disabled_with_zero_interval() {
        let util = Arc::new(TimeUtil::new(config_with_link("ext_time_util_watch")));
        assert!(util.spawn_change_watcher().is_none());
    }
}
