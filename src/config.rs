use serde::{Deserialize, Serialize};
use std::{fs, io, time::Duration};
use url::Url;

use crate::error::Error;
use crate::probe::Target;
use crate::session::{Session, write_atomic};

/// Options stored in `config.toml`. The monitor re-reads the file on every
/// tick, so edits take effect without a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub verbal_alerts: bool,
    pub visual_alerts: bool,
    /// Alert on the very first observation when it is Online.
    pub alert_on_first_online: bool,
    pub target_host: String,
    pub target_port: u16,
    pub timeout_secs: u64,
    pub polling_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discord_id: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbal_alerts: true,
            visual_alerts: true,
            alert_on_first_online: false,
            target_host: "google.com".to_string(),
            target_port: 80,
            timeout_secs: 5,
            polling_interval_secs: 3,
            webhook_url: None,
            discord_id: None,
        }
    }
}

/// Values given on the command line, applied on top of the stored config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub verbal_alerts: Option<bool>,
    pub visual_alerts: Option<bool>,
    pub alert_on_first_online: Option<bool>,
    pub target_host: Option<String>,
    pub target_port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub polling_interval_secs: Option<u64>,
    pub webhook_url: Option<String>,
    pub discord_id: Option<u64>,
}

impl Config {
    /// Loads the stored config, or the defaults when no file exists yet.
    pub fn load(session: &Session) -> Result<Config, Error> {
        let mut config = Self::read_stored(session)?;

        // if webhook_url is not set use env with dotenvy
        if config.webhook_url.is_none() {
            config.webhook_url = dotenvy::var("WEBHOOK_URL").ok();
        }

        // same for discord_id, ignoring values that are not a user id
        if config.discord_id.is_none() {
            config.discord_id = dotenvy::var("DISCORD_ID")
                .ok()
                .and_then(|id| id.parse().ok());
        }

        Ok(config)
    }

    /// Applies `overrides` to the stored config and writes the result back.
    pub fn update(session: &Session, overrides: &ConfigOverrides) -> Result<Config, Error> {
        let mut config = Self::read_stored(session)?;
        config.apply(overrides);
        config.validate()?;
        config.save(session)?;
        Ok(config)
    }

    pub fn save(&self, session: &Session) -> Result<(), Error> {
        session.ensure_dir()?;
        write_atomic(&session.config_file(), &self.render()?)?;
        Ok(())
    }

    pub fn render(&self) -> Result<String, Error> {
        Ok(toml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.target_host.trim().is_empty() {
            return Err(Error::Config("target_host must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be greater than 0".to_string()));
        }
        if self.polling_interval_secs == 0 {
            return Err(Error::Config(
                "polling_interval_secs must be greater than 0".to_string(),
            ));
        }
        if let Some(webhook_url) = &self.webhook_url {
            Url::parse(webhook_url)?;
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn target(&self) -> Target {
        Target {
            host: self.target_host.clone(),
            port: self.target_port,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(value) = overrides.verbal_alerts {
            self.verbal_alerts = value;
        }
        if let Some(value) = overrides.visual_alerts {
            self.visual_alerts = value;
        }
        if let Some(value) = overrides.alert_on_first_online {
            self.alert_on_first_online = value;
        }
        if let Some(value) = &overrides.target_host {
            self.target_host.clone_from(value);
        }
        if let Some(value) = overrides.target_port {
            self.target_port = value;
        }
        if let Some(value) = overrides.timeout_secs {
            self.timeout_secs = value;
        }
        if let Some(value) = overrides.polling_interval_secs {
            self.polling_interval_secs = value;
        }
        if let Some(value) = &overrides.webhook_url {
            self.webhook_url = Some(value.clone());
        }
        if let Some(value) = overrides.discord_id {
            self.discord_id = Some(value);
        }
    }

    fn read_stored(session: &Session) -> Result<Config, Error> {
        match fs::read_to_string(session.config_file()) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());

        let config = Config::read_stored(&session).expect("Failed to read config");

        assert_eq!(config, Config::default());
        assert!(config.verbal_alerts);
        assert!(config.visual_alerts);
        assert!(!config.alert_on_first_online);
        assert_eq!(config.polling_interval(), Duration::from_secs(3));
        assert_eq!(config.target().timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_config_from_toml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());

        let toml_content = r#"
            verbal_alerts = false
            target_host = "example.com"
            target_port = 443
            polling_interval_secs = 10
            webhook_url = "https://discord.com/api/webhooks/1234567890/abcdefg"
            discord_id = 1234567890
        "#;
        fs::write(session.config_file(), toml_content).expect("Failed to write config");

        let config = Config::load(&session).expect("Failed to parse config");

        assert!(!config.verbal_alerts);
        assert!(config.visual_alerts, "Unset keys should keep their default");
        assert_eq!(config.target_host, "example.com");
        assert_eq!(config.target_port, 443);
        assert_eq!(config.polling_interval_secs, 10);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.discord_id, Some(1_234_567_890));
        assert_eq!(
            config.webhook_url,
            Some("https://discord.com/api/webhooks/1234567890/abcdefg".to_string())
        );
    }

    #[test]
    fn test_update_persists_overrides() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());

        let overrides = ConfigOverrides {
            verbal_alerts: Some(false),
            polling_interval_secs: Some(7),
            ..ConfigOverrides::default()
        };
        Config::update(&session, &overrides).expect("Failed to update config");

        let second = ConfigOverrides {
            visual_alerts: Some(false),
            ..ConfigOverrides::default()
        };
        let config = Config::update(&session, &second).expect("Failed to update config");

        assert!(!config.verbal_alerts, "Earlier override should survive");
        assert!(!config.visual_alerts);
        assert_eq!(config.polling_interval_secs, 7);

        let stored = Config::read_stored(&session).expect("Failed to read config");
        assert_eq!(stored, config);
    }

    #[test]
    fn test_update_rejects_invalid_values_without_writing() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());

        let overrides = ConfigOverrides {
            polling_interval_secs: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(matches!(
            Config::update(&session, &overrides),
            Err(Error::Config(_))
        ));

        let overrides = ConfigOverrides {
            webhook_url: Some("not a url".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(matches!(
            Config::update(&session, &overrides),
            Err(Error::UrlParse(_))
        ));

        assert!(!session.config_file().exists());
    }

    #[test]
    fn test_render_round_trips() {
        let config = Config {
            discord_id: Some(42),
            ..Config::default()
        };
        let rendered = config.render().expect("Failed to render config");
        let parsed: Config = toml::from_str(&rendered).expect("Failed to parse rendered config");
        assert_eq!(parsed, config);
        assert!(!rendered.contains("webhook_url"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());
        fs::write(session.config_file(), "verbal_alerts = \"loud\"").unwrap();

        assert!(matches!(Config::load(&session), Err(Error::TomlParse(_))));
    }
}
