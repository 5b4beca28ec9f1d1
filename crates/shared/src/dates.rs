use chrono::{DateTime, Duration, NaiveDate, Utc};
use url::Url;

/// Resolve a publication date from the date segments of an article path.
///
/// Article paths carry `/<year>/<month>/<day>/` where the day segment may be
/// prefixed by a weekday letter (`t14`, `m03`). Accepts either a full URL or
/// a bare path.
pub fn date_from_path(path_or_url: &str) -> Option<NaiveDate> {
    let path = match Url::parse(path_or_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => path_or_url.to_string(),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    segments.windows(3).find_map(|w| {
        let year = parse_year(w[0])?;
        let month = parse_month(w[1])?;
        let day = parse_day(w[2])?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

fn parse_year(segment: &str) -> Option<i32> {
    if segment.len() == 4 && segment.bytes().all(|b| b.is_ascii_digit()) {
        segment.parse().ok()
    } else {
        None
    }
}

fn parse_month(segment: &str) -> Option<u32> {
    if segment.is_empty() || segment.len() > 2 || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok().filter(|m| (1..=12).contains(m))
}

fn parse_day(segment: &str) -> Option<u32> {
    let digits = segment.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let digits = digits.strip_suffix(".html").unwrap_or(digits);
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Earliest calendar date still inside a window of `hours` ending at `now`.
/// Saturates at the earliest representable date.
pub fn window_start(now: DateTime<Utc>, hours: u32) -> NaiveDate {
    now.checked_sub_signed(Duration::hours(i64::from(hours)))
        .map(|start| start.date_naive())
        .unwrap_or(NaiveDate::MIN)
}

pub fn in_window(published: NaiveDate, now: DateTime<Utc>, hours: u32) -> bool {
    published >= window_start(now, hours)
}
