use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{Error, Result};
use crate::storage::TransferProgress;

/// HTTP date, e.g. `Mon, 12 Oct 2009 17:50:30 GMT`.
const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

const LOCAL_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

pub fn create_progress_bar(total_bytes: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_bytes);
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Feeds transfer events into a progress bar.
pub fn progress_reporter(pb: &ProgressBar) -> impl FnMut(TransferProgress) + '_ {
    move |progress| {
        if pb.length() != Some(progress.total_bytes) {
            pb.set_length(progress.total_bytes);
        }
        pb.set_position(progress.bytes_transferred);
        pb.set_message(format!("{}%", progress.percent));
    }
}

/// `1234567` -> `1,234,567`
pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    out
}

pub fn format_rfc1123(time: &DateTime<Utc>) -> String {
    time.format(RFC1123_FORMAT).to_string()
}

/// Accepts RFC 3339, RFC 2822, or a local `YYYY-MM-DD[ HH:MM[:SS]]`.
pub fn parse_expiry(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(time.with_timezone(&Utc));
    }
    if let Ok(time) = DateTime::parse_from_rfc2822(text) {
        return Ok(time.with_timezone(&Utc));
    }

    let naive = LOCAL_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| Error::InvalidArgument(format!("Invalid expiry date: {}", text)))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|time| time.with_timezone(&Utc))
        .ok_or_else(|| Error::InvalidArgument(format!("Invalid expiry date: {}", text)))
}
