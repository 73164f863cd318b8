//! Timezone discovery and locale date/time patterns.

use chrono_tz::Tz;
use std::path::Path;
use tracing::{debug, warn};

/// Which rendering of an instant is wanted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// Weekday, month name, day and year
    Date,
    /// Numeric year/month/day
    ShortDate,
    Time,
    DateTime,
}

/// Date and time patterns for a locale, in ICU pattern syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalePatterns {
    pub locale: &'static str,
    pub long_date: &'static str,
    pub short_date: &'static str,
    pub time_12h: &'static str,
    pub time_24h: &'static str,
}

const LOCALE_PATTERNS: &[LocalePatterns] = &[
    LocalePatterns {
        locale: "en",
        long_date: "EEEE, MMMM d, y",
        short_date: "M/d/y",
        time_12h: "h:mm:ss a",
        time_24h: "HH:mm:ss",
    },
    LocalePatterns {
        locale: "en_GB",
        long_date: "EEEE d MMMM y",
        short_date: "dd/MM/y",
        time_12h: "h:mm:ss a",
        time_24h: "HH:mm:ss",
    },
    LocalePatterns {
        locale: "ko",
        long_date: "y년 M월 d일 EEEE",
        short_date: "y. M. d.",
        time_12h: "a h:mm:ss",
        time_24h: "H시 m분 s초",
    },
    LocalePatterns {
        locale: "de",
        long_date: "EEEE, d. MMMM y",
        short_date: "d.M.y",
        time_12h: "h:mm:ss a",
        time_24h: "HH:mm:ss",
    },
    LocalePatterns {
        locale: "fr",
        long_date: "EEEE d MMMM y",
        short_date: "dd/MM/y",
        time_12h: "h:mm:ss a",
        time_24h: "HH:mm:ss",
    },
];

impl LocalePatterns {
    /// Patterns for a locale tag such as `en-US`, `en_GB` or `ko`.
    ///
    /// Tries the full tag, then the language alone, then English.
    pub fn lookup(tag: &str) -> &'static LocalePatterns {
        let normalized = tag.split('.').next().unwrap_or(tag).replace('-', "_");
        let language = normalized.split('_').next().unwrap_or("");

        LOCALE_PATTERNS
            .iter()
            .find(|p| p.locale.eq_ignore_ascii_case(&normalized))
            .or_else(|| {
                LOCALE_PATTERNS
                    .iter()
                    .find(|p| p.locale.eq_ignore_ascii_case(language))
            })
            .unwrap_or(&LOCALE_PATTERNS[0])
    }

    pub fn english() -> &'static LocalePatterns {
        &LOCALE_PATTERNS[0]
    }

    pub fn time(&self, use_24h: bool) -> &'static str {
        if use_24h {
            self.time_24h
        } else {
            self.time_12h
        }
    }

    /// ICU pattern for a rendering kind.
    ///
    /// Non-localized time renderings carry the offset and zone name.
    pub fn pattern(&self, kind: FormatKind, use_24h: bool, localized: bool) -> String {
        let mut pattern = match kind {
            FormatKind::Date => self.long_date.to_string(),
            FormatKind::ShortDate => self.short_date.to_string(),
            FormatKind::Time => self.time(use_24h).to_string(),
            FormatKind::DateTime => format!("{} {}", self.long_date, self.time(use_24h)),
        };
        if !localized && matches!(kind, FormatKind::Time | FormatKind::DateTime) {
            pattern.push_str(" 'GMT'Z v");
        }
        pattern
    }
}

/// Locale tag in effect: the configured one, else the system's, else `en-US`
pub fn current_locale(configured: Option<&str>) -> String {
    configured
        .map(str::to_string)
        .or_else(sys_locale::get_locale)
        .unwrap_or_else(|| "en-US".to_string())
}

/// Every timezone id the runtime knows, sorted
pub fn available_timezones() -> Vec<String> {
    let mut ids: Vec<String> = chrono_tz::TZ_VARIANTS
        .iter()
        .map(|tz| tz.name().to_string())
        .collect();
    ids.sort();
    ids
}

pub fn parse_timezone(id: &str) -> Option<Tz> {
    id.parse::<Tz>().ok()
}

/// Zone id the system clock is configured with, read from the `localtime` symlink.
pub fn system_timezone(localtime_path: &Path) -> Option<String> {
    let target = match std::fs::read_link(localtime_path) {
        Ok(target) => target,
        Err(e) => {
            debug!(path = %localtime_path.display(), error = %e, "localtime is not a symlink");
            return None;
        }
    };
    let target = target.to_string_lossy();
    let id = match target.find("zoneinfo/") {
        Some(idx) => &target[idx + "zoneinfo/".len()..],
        None => target.as_ref(),
    };

    if parse_timezone(id).is_some() {
        Some(id.to_string())
    } else {
        warn!(target = %target, "localtime points at an unknown zone");
        None
    }
}

/// Resolve the local zone: `localtime` symlink, then `TZ`, then UTC
pub fn local_timezone(localtime_path: &Path) -> Tz {
    system_timezone(localtime_path)
        .and_then(|id| parse_timezone(&id))
        .or_else(|| std::env::var("TZ").ok().and_then(|id| parse_timezone(&id)))
        .unwrap_or(Tz::UTC)
}

/// Translate an ICU date pattern to a chrono `strftime` string.
///
/// Quoted text is copied literally; an unterminated quote is dropped.
pub fn icu_to_strftime(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        out.push('\'');
                        i += 2;
                        continue;
                    }
                    break;
                }
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }

        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let mut run = 1;
        while chars.get(i + run) == Some(&c) {
            run += 1;
        }
        i += run;

        let spec = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M' | 'L', 1) => "%-m",
            ('M' | 'L', 2) => "%m",
            ('M' | 'L', 3) => "%b",
            ('M' | 'L', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('D', _) => "%j",
            ('E' | 'c', 1..=3) => "%a",
            ('E' | 'c', _) => "%A",
            ('h' | 'K', 1) => "%-I",
            ('h' | 'K', _) => "%I",
            ('H' | 'k', 1) => "%-H",
            ('H' | 'k', _) => "%H",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', _) => "%3f",
            ('a', _) => "%p",
            ('Z' | 'x' | 'X', _) => "%z",
            ('z' | 'v' | 'V' | 'O', _) => "%Z",
            _ => {
                for _ in 0..run {
                    out.push(c);
                }
                continue;
            }
        };
        out.push_str(spec);
    }

    out
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

/// Collapse runs of the same character to one
fn collapse_repeats(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last = None;
    for c in s.chars() {
        if last != Some(c) {
            out.push(c);
        }
        last = Some(c);
    }
    out
}

/// Simplified date format reported to scripts (`D` weekday, `M` month name,
/// `m` numeric month, `d` day, `y` year)
pub fn script_date_format(pattern: &str) -> String {
    let mut format = pattern.replace('E', "D");
    if format.find("MMM").is_some_and(|idx| idx > 0) {
        format = if format.find("MMMM").is_some_and(|idx| idx > 0) {
            format.replace("MMMM", "M")
        } else {
            format.replace("MMM", "M")
        };
    } else {
        format = format.replace('M', "m");
    }
    collapse_repeats(&format)
}

/// Simplified time format reported to scripts (`h` hour, `m`, `s`, `ap` marker)
pub fn script_time_format(pattern: &str) -> String {
    let format = pattern
        .replace('H', "h")
        .replace('K', "h")
        .replace('k', "h")
        .replace('a', "ap");
    collapse_repeats(&format)
}
