use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::error::Error;

pub const DAEMON_NAME: &str = "connection_monitor";

/// Environment variable that overrides the default base directory.
pub const BASE_DIR_VAR: &str = "CONNECTION_MONITOR_DIR";

/// Everything a monitoring session shares with other invocations lives in one
/// base directory: the PID file, the outage ledger, the config file and the
/// daemon's log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    base_dir: PathBuf,
}

impl Session {
    /// Creates a session rooted at `base_dir`.
    ///
    /// Relative paths are resolved against the current directory, since the
    /// daemon changes its working directory after detaching.
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        let base_dir = base_dir.into();
        let base_dir = std::path::absolute(&base_dir).unwrap_or(base_dir);
        Self { base_dir }
    }

    /// Resolves the base directory from `CONNECTION_MONITOR_DIR` (a `.env` file
    /// works too), falling back to the platform's local data directory.
    pub fn from_env() -> Result<Self, Error> {
        if let Ok(dir) = dotenvy::var(BASE_DIR_VAR) {
            return Ok(Self::new(dir));
        }

        dirs::data_local_dir()
            .map(|dir| Self::new(dir.join(DAEMON_NAME)))
            .ok_or_else(|| Error::Config("Unable to determine a data directory".to_string()))
    }

    pub fn ensure_dir(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn pid_file(&self) -> PathBuf {
        self.base_dir.join("pid")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.base_dir.join("outages.toml")
    }

    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    pub fn stdout_log(&self) -> PathBuf {
        self.base_dir.join("stdout.log")
    }

    pub fn stderr_log(&self) -> PathBuf {
        self.base_dir.join("stderr.log")
    }
}

/// Writes `contents` next to `path` and renames it into place, so a concurrent
/// reader sees either the old file or the new one.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}
