use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, error, info, warn};
use tokio::{
    select,
    signal::unix::{SignalKind, signal},
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use crate::alert::Alerter;
use crate::config::Config;
use crate::daemon;
use crate::error::Error;
use crate::ledger::{ConnectionState, OutageLedger};
use crate::probe::{Probe, ProbeResult};
use crate::report;
use crate::session::Session;

/// What one observation did to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Online and still online.
    Steady,
    /// First observation of the session, and it was online.
    FirstOnline,
    /// An outage was opened.
    WentOffline,
    /// Still down; one more attempt was counted.
    StillOffline,
    /// The open outage was closed.
    BackOnline,
}

impl Transition {
    /// Whether the connection status changed.
    pub fn is_change(self) -> bool {
        matches!(self, Self::FirstOnline | Self::WentOffline | Self::BackOnline)
    }
}

/// The connection state machine. Owns the ledger for the whole session;
/// outages from earlier sessions are only carried through to disk.
pub struct Monitor<P, A> {
    session: Session,
    probe: P,
    alerter: A,
    config: Config,
    status: ConnectionState,
    history: OutageLedger,
    ledger: OutageLedger,
    daemonized: bool,
}

impl<P: Probe, A: Alerter> Monitor<P, A> {
    pub fn new(session: Session, probe: P, alerter: A, config: Config) -> Self {
        Self {
            session,
            probe,
            alerter,
            config,
            status: ConnectionState::Unknown,
            history: OutageLedger::new(),
            ledger: OutageLedger::new(),
            daemonized: false,
        }
    }

    /// Records persisted by earlier sessions, written back ahead of this
    /// session's own. An outage left open by a session that died without
    /// shutting down is closed first.
    pub fn with_history(mut self, mut history: OutageLedger) -> Self {
        let interval =
            TimeDelta::from_std(self.config.polling_interval()).unwrap_or(TimeDelta::MAX);
        if history.close_abandoned(interval, Utc::now()) {
            warn!("Closed an outage left open by a previous session");
        }
        self.history = history;
        self
    }

    pub fn daemonized(mut self, daemonized: bool) -> Self {
        self.daemonized = daemonized;
        self
    }

    pub fn status(&self) -> ConnectionState {
        self.status
    }

    /// Outages observed by this session only.
    pub fn ledger(&self) -> &OutageLedger {
        &self.ledger
    }

    /// Applies one probe result observed at `at`. Pure bookkeeping: no I/O.
    pub fn observe(&mut self, result: &ProbeResult, at: DateTime<Utc>) -> Transition {
        let transition = match (self.status, result) {
            (ConnectionState::Unknown, Ok(())) => Transition::FirstOnline,
            (ConnectionState::Online, Ok(())) => Transition::Steady,
            (ConnectionState::Offline, Ok(())) => {
                self.ledger.close(at);
                Transition::BackOnline
            }
            (ConnectionState::Offline, Err(_)) => {
                self.ledger.log_attempt();
                Transition::StillOffline
            }
            (ConnectionState::Unknown | ConnectionState::Online, Err(cause)) => {
                self.ledger.open(cause.to_string(), at);
                Transition::WentOffline
            }
        };

        self.status = if result.is_ok() {
            ConnectionState::Online
        } else {
            ConnectionState::Offline
        };
        transition
    }

    /// Runs ticks until `token` is cancelled, then always runs the shutdown
    /// sequence.
    pub async fn run(&mut self, token: CancellationToken) {
        info!("Starting connection monitoring...");
        info!(
            "Probing {}:{} every {} seconds (timeout {} seconds)",
            self.config.target_host,
            self.config.target_port,
            self.config.polling_interval_secs,
            self.config.timeout_secs
        );

        loop {
            // Check if we should shutdown before starting new cycle
            if token.is_cancelled() {
                info!("Shutdown requested, stopping monitor");
                break;
            }

            if self.tick(&token).await.is_none() {
                info!("Shutdown requested during probe");
                break;
            }

            // Interruptible sleep
            select! {
                () = sleep(self.config.polling_interval()) => {},
                () = token.cancelled() => {
                    info!("Shutdown requested during sleep");
                    break;
                }
            }
        }

        self.shutdown();
        info!("Connection monitoring stopped gracefully");
    }

    /// One poll: reload config, probe, apply the transition and its side
    /// effects. Returns `None` if cancelled while probing.
    pub async fn tick(&mut self, token: &CancellationToken) -> Option<Transition> {
        self.reload_config();

        let target = self.config.target();
        let result = select! {
            result = self.probe.check(&target) => result,
            () = token.cancelled() => return None,
        };

        let previous = self.status;
        let transition = self.observe(&result, Utc::now());

        match (transition, &result) {
            (Transition::WentOffline, Err(cause)) => warn!("Connection lost: {cause}"),
            (Transition::StillOffline, Err(cause)) => debug!("Still offline: {cause}"),
            (Transition::BackOnline, _) => info!("Connection restored"),
            (Transition::FirstOnline, _) => info!("Connection online"),
            _ => {}
        }

        if transition.is_change() && self.should_alert(previous) {
            self.alert();
        }
        if transition != Transition::Steady {
            self.persist();
        }

        if !self.daemonized && (transition.is_change() || self.status == ConnectionState::Offline)
        {
            self.print_status();
        }

        Some(transition)
    }

    /// Closes any open outage, writes the ledger and prints the report.
    pub fn shutdown(&mut self) {
        if self.ledger.close(Utc::now()) {
            info!("Closed the open outage on shutdown");
        }
        self.persist();

        if self.daemonized {
            println!("\n{}:", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
        }
        println!("{}", report::render(&self.ledger, Utc::now()));

        if self.daemonized {
            self.alert();
            if let Err(e) = daemon::release(&self.session) {
                error!("Failed to remove PID file: {e}");
            }
        }
    }

    fn should_alert(&self, previous: ConnectionState) -> bool {
        previous != ConnectionState::Unknown
            || self.status == ConnectionState::Offline
            || self.config.alert_on_first_online
    }

    fn alert(&self) {
        if self.config.verbal_alerts {
            self.alerter.speak(self.status);
        }
        if self.config.visual_alerts {
            self.alerter.notify(self.status, self.ledger.len());
        }
    }

    /// Writes the earlier history followed by this session's records.
    /// Failures are reported and the in-memory ledger stays authoritative.
    fn persist(&self) {
        let stored = self.history.concat(&self.ledger);
        if let Err(e) = stored.persist(&self.session.ledger_file()) {
            error!("Failed to write outage ledger: {e}");
        }
    }

    fn reload_config(&mut self) {
        match load_valid_config(&self.session) {
            Ok(config) => {
                if config != self.config {
                    info!("Configuration changed");
                }
                self.config = config;
            }
            Err(e) => error!("Keeping previous configuration: {e}"),
        }
    }

    fn print_status(&self) {
        print!("\x1b[2J\x1b[H");
        println!(
            "{}",
            report::status_panel(
                &self.ledger,
                self.status,
                daemon::running_pid(&self.session),
                false,
                Utc::now()
            )
        );
    }
}

/// Cancels `token` on SIGINT, SIGTERM or SIGHUP. Must be called from within
/// the runtime.
pub fn cancel_on_signal(token: CancellationToken) -> Result<(), Error> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = hangup.recv() => info!("Received SIGHUP"),
        }
        token.cancel();
    });
    Ok(())
}

fn load_valid_config(session: &Session) -> Result<Config, Error> {
    let config = Config::load(session)?;
    config.validate()?;
    Ok(config)
}

/// Prints the persisted status every polling interval until cancelled, then
/// the report. Used when a daemon already owns the ledger. Unreadable files
/// leave the last good config and ledger in place.
pub async fn watch(session: &Session, token: CancellationToken) {
    let mut config = Config::default();
    let mut ledger = OutageLedger::new();

    loop {
        match load_valid_config(session) {
            Ok(loaded) => config = loaded,
            Err(e) => error!("Keeping previous configuration: {e}"),
        }
        match OutageLedger::load(&session.ledger_file()) {
            Ok(loaded) => ledger = loaded,
            Err(e) => error!("Keeping previous ledger: {e}"),
        }

        print!("\x1b[2J\x1b[H");
        println!(
            "{}",
            report::status_panel(
                &ledger,
                ledger.last_known_state(),
                daemon::running_pid(session),
                true,
                Utc::now()
            )
        );

        select! {
            () = sleep(config.polling_interval()) => {},
            () = token.cancelled() => {
                println!("{}", report::render(&ledger, Utc::now()));
                return;
            }
        }
    }
}
