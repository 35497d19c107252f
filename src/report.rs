//! Human-readable views over an [`OutageLedger`]: the per-day report and the
//! status panel. Nothing in here mutates the ledger or touches the disk.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, TimeDelta, TimeZone, Utc};
use colored::Colorize;

use crate::ledger::{ConnectionState, OutageLedger, OutageRecord};

const LONG_TIME: &str = "%Y-%m-%d %H:%M:%S";
const SHORT_TIME: &str = "%H:%M:%S";

/// Renders the ledger grouped by local calendar day.
pub fn render(ledger: &OutageLedger, now: DateTime<Utc>) -> String {
    render_in(ledger, now, &Local)
}

/// Same as [`render`], with days and times taken in `tz`.
pub fn render_in<Tz>(ledger: &OutageLedger, now: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    if ledger.is_empty() {
        return "No outages recorded.\n".to_string();
    }

    let mut lines = Vec::new();
    for (date, outages) in group_by_day(ledger, tz) {
        let total: TimeDelta = outages.iter().map(|outage| outage.duration(now)).sum();

        lines.push(String::new());
        lines.push(format!(
            "{}: out for {}",
            date.format("%Y-%m-%d"),
            format_duration(total)
        ));
        lines.push(String::new());
        lines.extend(
            outages
                .iter()
                .map(|outage| format!("* {}", summary(outage, now, tz, SHORT_TIME))),
        );
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Days in the order they first appear, each with its outages.
fn group_by_day<'a, Tz: TimeZone>(
    ledger: &'a OutageLedger,
    tz: &Tz,
) -> Vec<(NaiveDate, Vec<&'a OutageRecord>)> {
    let mut days: Vec<(NaiveDate, Vec<&OutageRecord>)> = Vec::new();

    for outage in ledger.records() {
        let date = outage.start_time().with_timezone(tz).date_naive();
        match days.iter_mut().find(|(day, _)| *day == date) {
            Some((_, outages)) => outages.push(outage),
            None => days.push((date, vec![outage])),
        }
    }
    days
}

/// `start - end, cause, duration HH:MM:SS, N attempts`
pub fn summary<Tz>(outage: &OutageRecord, now: DateTime<Utc>, tz: &Tz, time_format: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let start = outage.start_time().with_timezone(tz).format(time_format);
    let end = outage.end_time().map_or_else(
        || "ongoing".to_string(),
        |end| end.with_timezone(tz).format(time_format).to_string(),
    );

    format!(
        "{start} - {end}, {}, duration {}, {} attempts",
        outage.cause(),
        format_duration(outage.duration(now)),
        outage.attempt_count()
    )
}

/// `HH:MM:SS`, with hours allowed to grow past a day.
pub fn format_duration(duration: TimeDelta) -> String {
    let secs = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// The block printed by `--status`, and by a foreground session on changes.
/// `from_store` marks a status read back from the persisted ledger rather
/// than observed live.
pub fn status_panel(
    ledger: &OutageLedger,
    status: ConnectionState,
    daemon_pid: Option<i32>,
    from_store: bool,
    now: DateTime<Utc>,
) -> String {
    let status_text = match status {
        ConnectionState::Online => status.to_string().green(),
        ConnectionState::Offline if from_store => {
            format!("{status} since last record").red()
        }
        ConnectionState::Offline => status.to_string().red(),
        ConnectionState::Unknown => status.to_string().yellow(),
    };
    let daemon_text = match daemon_pid {
        Some(pid) => format!("Running (pid {pid})").green(),
        None => "Not running".red(),
    };

    let mut lines = vec![
        format!("Connection status: {status_text}"),
        format!(
            "Outages:           {}, {}",
            ledger.len(),
            format_duration(ledger.total_duration(now))
        ),
        format!("Daemon:            {daemon_text}"),
    ];

    if let Some(outage) = ledger.current() {
        let text = summary(outage, now, &Local, LONG_TIME);
        lines.push(format!("Current outage:    {}", text.yellow()));
    } else if let Some(outage) = ledger.last() {
        let text = summary(outage, now, &Local, LONG_TIME);
        lines.push(format!("Last outage:       {text}"));
    }

    lines.join("\n")
}
