use std::{fmt, fs, io, path::Path};

use chrono::{DateTime, TimeDelta, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::session::write_atomic;

/// Reachability as last observed. `Unknown` only exists until the first probe
/// completes and is never written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "Unknown",
            Self::Online => "Online",
            Self::Offline => "Off-line",
        })
    }
}

/// One contiguous span of lost connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutageRecord {
    start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<DateTime<Utc>>,
    attempt_count: u32,
    cause: String,
}

impl OutageRecord {
    fn new(cause: String, at: DateTime<Utc>) -> Self {
        Self {
            start_time: at,
            end_time: None,
            attempt_count: 0,
            cause,
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn cause(&self) -> &str {
        &self.cause
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Length of the outage, measured up to `now` while it is still open.
    pub fn duration(&self, now: DateTime<Utc>) -> TimeDelta {
        (self.end_time.unwrap_or(now) - self.start_time).max(TimeDelta::zero())
    }
}

/// Chronological, append-only history of outages. Only the last record may be
/// open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutageLedger {
    #[serde(default, rename = "outage")]
    outages: Vec<OutageRecord>,
}

impl OutageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new outage at `at`. Refuses (returns `false`) while another
    /// outage is still open.
    pub fn open<S: Into<String>>(&mut self, cause: S, at: DateTime<Utc>) -> bool {
        if self.current().is_some() {
            warn!("Refusing to open an outage while another one is still open");
            return false;
        }
        self.outages.push(OutageRecord::new(cause.into(), at));
        true
    }

    /// Counts one more failed probe against the open outage.
    pub fn log_attempt(&mut self) -> bool {
        match self.current_mut() {
            Some(outage) => {
                outage.attempt_count += 1;
                true
            }
            None => false,
        }
    }

    /// Ends the open outage at `at` (never before it started). Does nothing
    /// when no outage is open.
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        match self.current_mut() {
            Some(outage) => {
                outage.end_time = Some(at.max(outage.start_time));
                true
            }
            None => false,
        }
    }

    /// Ends an outage left open by a session that never shut down. Its real
    /// end is unknown, so it is placed one polling interval after each counted
    /// attempt, and never later than `now`.
    pub fn close_abandoned(&mut self, interval: TimeDelta, now: DateTime<Utc>) -> bool {
        let Some(outage) = self.current() else {
            return false;
        };
        let attempts = i32::try_from(outage.attempt_count).unwrap_or(i32::MAX);
        let end = interval
            .checked_mul(attempts)
            .and_then(|span| outage.start_time.checked_add_signed(span))
            .map_or(now, |end| end.min(now));
        self.close(end)
    }

    /// This ledger's records followed by `later`'s.
    pub fn concat(&self, later: &OutageLedger) -> OutageLedger {
        let mut outages = self.outages.clone();
        outages.extend_from_slice(&later.outages);
        OutageLedger { outages }
    }

    /// The open outage, if any.
    pub fn current(&self) -> Option<&OutageRecord> {
        self.outages.last().filter(|outage| outage.is_open())
    }

    fn current_mut(&mut self) -> Option<&mut OutageRecord> {
        self.outages.last_mut().filter(|outage| outage.is_open())
    }

    pub fn last(&self) -> Option<&OutageRecord> {
        self.outages.last()
    }

    pub fn records(&self) -> &[OutageRecord] {
        &self.outages
    }

    pub fn len(&self) -> usize {
        self.outages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outages.is_empty()
    }

    pub fn total_duration(&self, now: DateTime<Utc>) -> TimeDelta {
        self.outages
            .iter()
            .map(|outage| outage.duration(now))
            .fold(TimeDelta::zero(), |total, duration| total + duration)
    }

    /// What a reader of the persisted ledger can conclude: an open last
    /// record means the connection was still down when it was written.
    pub fn last_known_state(&self) -> ConnectionState {
        if self.current().is_some() {
            ConnectionState::Offline
        } else {
            ConnectionState::Online
        }
    }

    /// Writes the whole ledger, replacing the previous file atomically.
    pub fn persist(&self, path: &Path) -> Result<(), Error> {
        let content = toml::to_string(self)?;
        write_atomic(path, &content)?;
        Ok(())
    }

    /// Reads a persisted ledger. A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        toml::from_str(&content).map_err(|source| Error::CorruptLedger {
            path: path.to_path_buf(),
            source,
        })
    }
}
