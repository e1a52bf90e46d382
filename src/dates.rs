//! Date handling for the deletion predicate.
//!
//! Intake sheet dates are plain `YYYY-MM-DD` strings. "Today" is always computed in the configured
//! IANA timezone so that a run shortly after midnight UTC does not delete a day early.

use crate::error::Res;
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

/// The format of dates in the intake sheet.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses a `YYYY-MM-DD` string. Surrounding whitespace is ignored.
pub fn parse_date(s: &str) -> Res<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .with_context(|| format!("Invalid date '{s}', expected YYYY-MM-DD"))
}

/// Parses an IANA timezone name such as `America/Los_Angeles`.
pub fn parse_timezone(name: &str) -> Res<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("Unknown timezone '{name}': {e}"))
}

/// Today's date in `tz`.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// A workspace is due for deletion when its deletion date has been reached and today is not the
/// day the engagement manager was notified.
pub fn should_delete(
    deletion_date: NaiveDate,
    em_notification_date: Option<NaiveDate>,
    today: NaiveDate,
) -> bool {
    let reached = deletion_date <= today;
    let notified_today = em_notification_date == Some(today);
    let due = reached && !notified_today;
    debug!(
        "Deletion date: {deletion_date}, EM notification date: {}, today: {today}, due: {due}",
        em_notification_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    due
}

/// The same predicate over the raw cell strings. An unparsable deletion date is never due. An
/// unparsable notification date cannot equal today, so it does not block deletion.
pub fn should_delete_str(deletion_date: &str, em_notification_date: &str, today: NaiveDate) -> bool {
    let deletion = match parse_date(deletion_date) {
        Ok(d) => d,
        Err(e) => {
            warn!("{e:#}");
            return false;
        }
    };
    let em = parse_date(em_notification_date).ok();
    should_delete(deletion, em, today)
}
