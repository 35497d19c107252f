use std::path::PathBuf;

use clap::{Parser, builder::BoolishValueParser};

use crate::config::ConfigOverrides;

/// Watches internet connectivity and keeps a ledger of outages.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Detach and keep monitoring in the background.
    #[arg(long)]
    pub daemonize: bool,

    /// Use a randomized probe instead of the network.
    #[arg(long)]
    pub debug: bool,

    /// Stop the background monitor.
    #[arg(long, conflicts_with_all = ["status", "report", "show_config", "daemonize"])]
    pub stop: bool,

    /// Print the current connection status.
    #[arg(long, conflicts_with_all = ["report", "show_config", "daemonize"])]
    pub status: bool,

    /// Print the status followed by the outage report.
    #[arg(long, conflicts_with_all = ["show_config", "daemonize"])]
    pub report: bool,

    /// Print the effective configuration.
    #[arg(long = "config", conflicts_with = "daemonize")]
    pub show_config: bool,

    /// Directory holding the PID file, ledger, config and logs.
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Speak on connection changes.
    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub verbal_alerts: Option<bool>,

    /// Show a desktop notification on connection changes.
    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub visual_alerts: Option<bool>,

    /// Also alert when the very first probe finds the connection online.
    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub alert_on_first_online: Option<bool>,

    /// Host to connect to.
    #[arg(long, value_name = "HOST")]
    pub target_host: Option<String>,

    /// TCP port to connect to.
    #[arg(long, value_name = "PORT")]
    pub target_port: Option<u16>,

    /// Seconds to wait for a connection.
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Seconds between probes.
    #[arg(long, value_name = "SECS")]
    pub polling_interval_secs: Option<u64>,

    /// Discord webhook notified on connection changes.
    #[arg(long, value_name = "URL")]
    pub webhook_url: Option<String>,

    /// Discord user to mention in webhook notifications.
    #[arg(long, value_name = "ID")]
    pub discord_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Report,
    ShowConfig,
}

impl Args {
    pub fn command(&self) -> Command {
        if self.stop {
            Command::Stop
        } else if self.report {
            Command::Report
        } else if self.status {
            Command::Status
        } else if self.show_config {
            Command::ShowConfig
        } else {
            Command::Start
        }
    }

    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            verbal_alerts: self.verbal_alerts,
            visual_alerts: self.visual_alerts,
            alert_on_first_online: self.alert_on_first_online,
            target_host: self.target_host.clone(),
            target_port: self.target_port,
            timeout_secs: self.timeout_secs,
            polling_interval_secs: self.polling_interval_secs,
            webhook_url: self.webhook_url.clone(),
            discord_id: self.discord_id,
        }
    }
}
