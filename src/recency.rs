//! Extracts a `[updated_after, updated_before]` recency window from ambient
//! context file paths (e.g. the set of memory files currently open in a
//! conversation).

use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecencyWindow {
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

fn dated_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"memory/(\d{4})-(\d{2})-(\d{2})\.md$").expect("static pattern always compiles"))
}

fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    let end = date.and_hms_opt(23, 59, 59).expect("end of day is always valid");
    (Utc.from_utc_datetime(&start), Utc.from_utc_datetime(&end))
}

/// Derives the recency window from the given ambient paths, as of `now`.
pub fn resolve_recency_window(paths: &[String], now: DateTime<Utc>) -> RecencyWindow {
    let re = dated_file_regex();
    let mut window: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

    for path in paths {
        if let Some(caps) = re.captures(path) {
            let year: i32 = caps[1].parse().unwrap_or(0);
            let month: u32 = caps[2].parse().unwrap_or(0);
            let day: u32 = caps[3].parse().unwrap_or(0);
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            let (start, end) = day_bounds(date);
            window = Some(match window {
                Some((existing_start, existing_end)) => (existing_start.min(start), existing_end.max(end)),
                None => (start, end),
            });
        }
    }

    if let Some((start, end)) = window {
        return RecencyWindow {
            updated_after: Some(start),
            updated_before: Some(end),
        };
    }

    if paths.iter().any(|p| p.ends_with("MEMORY.md")) {
        return RecencyWindow {
            updated_after: Some(now - Duration::days(30)),
            updated_before: None,
        };
    }

    RecencyWindow::default()
}
