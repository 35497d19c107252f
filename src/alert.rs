use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;
use tokio::process::Command;

use crate::config::Config;
use crate::error::Error;
use crate::ledger::ConnectionState;

const TITLE: &str = "Internet Connection Monitor";

/// Side channel told about every transition. Implementations must not block
/// and must swallow their own failures.
pub trait Alerter {
    fn notify(&self, status: ConnectionState, outage_count: usize);
    fn speak(&self, status: ConnectionState);
}

/// Desktop notification, speech and optional Discord webhook.
#[derive(Debug, Clone, Default)]
pub struct SystemAlerter {
    webhook: Option<Webhook>,
}

#[derive(Debug, Clone)]
struct Webhook {
    url: String,
    discord_id: Option<u64>,
}

impl SystemAlerter {
    pub fn from_config(config: &Config) -> Self {
        let webhook = config.webhook_url.clone().map(|url| Webhook {
            url,
            discord_id: config.discord_id,
        });
        Self { webhook }
    }

    fn spawn_webhook(&self, message: String) {
        let Some(webhook) = self.webhook.clone() else {
            return;
        };

        tokio::spawn(async move {
            if let Err(e) =
                send_discord_notification(&webhook.url, &message, webhook.discord_id.as_ref())
                    .await
            {
                warn!("Failed to send Discord notification: {e}");
            }
        });
    }
}

impl Alerter for SystemAlerter {
    fn notify(&self, status: ConnectionState, outage_count: usize) {
        let body = format!("{outage_count} outages");
        let command = if cfg!(target_os = "macos") {
            let script = format!(
                r#"display notification "{body}" with title "{TITLE}" subtitle "{status}" sound name "Submarine""#
            );
            spawn_detached("osascript", &["-e", script.as_str()])
        } else {
            let message = format!("{status}: {body}");
            spawn_detached("notify-send", &[TITLE, message.as_str()])
        };
        if let Err(e) = command {
            warn!("Visual alert failed: {e}");
        }

        self.spawn_webhook(format!("Internet connection {status} ({body})"));
    }

    fn speak(&self, status: ConnectionState) {
        let phrase = format!("Internet connection {status}");
        let program = if cfg!(target_os = "macos") {
            "say"
        } else {
            "spd-say"
        };
        if let Err(e) = spawn_detached(program, &[phrase.as_str()]) {
            warn!("Verbal alert failed: {e}");
        }
    }
}

/// Starts `program` without waiting on it; the runtime reaps it.
fn spawn_detached(program: &str, args: &[&str]) -> Result<(), Error> {
    Command::new(program).args(args).spawn()?;
    debug!("Spawned {program}");
    Ok(())
}

#[derive(Serialize)]
struct DiscordMessage {
    content: String,
}

async fn send_discord_notification(
    webhook_url: &str,
    message: &str,
    discord_id: Option<&u64>,
) -> Result<(), Error> {
    let client = Client::new();

    // If discord_id is None, we don't want to mention anyone
    let tag = discord_id.map_or(String::new(), |id| format!("<@{id}> "));

    let payload = DiscordMessage {
        content: format!("{tag}{message}"),
    };

    client
        .post(webhook_url)
        .json(&payload)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_comes_from_config() {
        let config = Config {
            webhook_url: Some("https://discord.com/api/webhooks/1/abc".to_string()),
            discord_id: Some(7),
            ..Config::default()
        };
        let alerter = SystemAlerter::from_config(&config);
        let webhook = alerter.webhook.expect("Webhook should be configured");
        assert_eq!(webhook.url, "https://discord.com/api/webhooks/1/abc");
        assert_eq!(webhook.discord_id, Some(7));

        assert!(SystemAlerter::from_config(&Config::default()).webhook.is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_reported_not_panicked() {
        let result = spawn_detached("definitely-not-a-real-notifier", &[]);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_an_error() {
        let result =
            send_discord_notification("http://127.0.0.1:9/webhook", "Test notification", None)
                .await;
        assert!(matches!(result, Err(Error::HttpRequest(_))));
    }

    #[ignore = "This test requires a valid Discord webhook URL and ID"]
    #[tokio::test]
    async fn test_discord_notification() {
        let webhook_url = dotenvy::var("WEBHOOK_URL").expect("WEBHOOK_URL not set");
        let discord_id: u64 = dotenvy::var("DISCORD_ID")
            .expect("DISCORD_ID not set")
            .parse()
            .expect("Invalid DISCORD_ID");
        let message = "Test notification from Rust!";
        let result = send_discord_notification(&webhook_url, message, Some(&discord_id)).await;
        assert!(
            result.is_ok(),
            "Expected notification to be sent successfully"
        );
    }
}
