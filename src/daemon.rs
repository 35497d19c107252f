//! Background-instance bookkeeping. The PID file in the session's base
//! directory is the only record of a running daemon; every query re-reads it.

use std::{
    fs::{self, File, OpenOptions},
    io,
    os::fd::AsRawFd,
};

use log::{info, warn};
use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, kill},
        stat::{Mode, umask},
    },
    unistd::{ForkResult, Pid, chdir, dup2, fork, setsid},
};

use crate::error::Error;
use crate::session::{DAEMON_NAME, Session, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Another daemon owns the base directory; nothing was touched.
    AlreadyRunning(i32),
    /// This process is now the detached daemon.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(i32),
    NotRunning,
}

/// PID recorded in the PID file. Missing, unreadable or non-positive
/// contents all read as absent.
pub fn pid(session: &Session) -> Option<i32> {
    fs::read_to_string(session.pid_file())
        .ok()?
        .trim()
        .parse()
        .ok()
        .filter(|pid| *pid > 0)
}

/// True only when the PID file names a process that still exists. A PID file
/// left behind by a dead process is stale and reads as not running.
pub fn is_running(session: &Session) -> bool {
    running_pid(session).is_some()
}

pub fn running_pid(session: &Session) -> Option<i32> {
    pid(session).filter(|pid| process_exists(*pid))
}

fn process_exists(pid: i32) -> bool {
    // EPERM: the process exists but belongs to someone else
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

/// Detaches the current process into a daemon unless one is already running.
///
/// On `Detached` the caller is the grandchild: it has no controlling terminal,
/// its standard streams go to the session's log files and its PID is on disk.
/// The invoking process and the intermediate child exit inside this call.
///
/// Must be called before any other thread (including an async runtime) is
/// started.
pub fn start(session: &Session) -> Result<StartOutcome, Error> {
    if let Some(pid) = running_pid(session) {
        return Ok(StartOutcome::AlreadyRunning(pid));
    }

    session.ensure_dir()?;
    detach()?;

    let pid = std::process::id();
    write_atomic(&session.pid_file(), &format!("{pid}\n"))?;
    println!("{DAEMON_NAME} running with pid: {pid}");

    redirect_output(session)?;
    chdir("/")?;
    umask(Mode::from_bits_truncate(0o022));

    info!("{DAEMON_NAME} daemon started with pid {pid}");
    Ok(StartOutcome::Detached)
}

/// Signals the daemon to terminate and removes its PID file.
///
/// A missing PID file or an already dead process both mean "not running".
/// Any other failure to signal a live process, such as lacking permission, is
/// an error.
pub fn stop(session: &Session) -> Result<StopOutcome, Error> {
    let Some(pid) = pid(session) else {
        remove_pid_file(session)?;
        return Ok(StopOutcome::NotRunning);
    };

    let outcome = match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => StopOutcome::Stopped(pid),
        Err(Errno::ESRCH) => {
            warn!("The process {pid} did not exist, removing stale PID file");
            StopOutcome::NotRunning
        }
        Err(source) => return Err(Error::Signal { pid, source }),
    };

    remove_pid_file(session)?;
    Ok(outcome)
}

/// Removes the PID file if it still names this process.
pub fn release(session: &Session) -> Result<(), Error> {
    let own = i32::try_from(std::process::id()).ok();
    if own.is_some() && pid(session) == own {
        remove_pid_file(session)?;
    }
    Ok(())
}

fn remove_pid_file(session: &Session) -> Result<(), Error> {
    match fs::remove_file(session.pid_file()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Double fork: the first child drops the controlling terminal by starting a
/// new session, the second can never reacquire one because it is not a
/// session leader.
fn detach() -> Result<(), Error> {
    // SAFETY: the process is still single-threaded at this point.
    if let ForkResult::Parent { .. } = unsafe { fork() }? {
        std::process::exit(0);
    }

    setsid()?;

    // SAFETY: as above, the first child is single-threaded.
    if let ForkResult::Parent { .. } = unsafe { fork() }? {
        std::process::exit(0);
    }

    Ok(())
}

fn redirect_output(session: &Session) -> Result<(), Error> {
    let null = File::open("/dev/null")?;
    let stdout = append(session.stdout_log())?;
    let stderr = append(session.stderr_log())?;

    dup2(null.as_raw_fd(), io::stdin().as_raw_fd())?;
    dup2(stdout.as_raw_fd(), io::stdout().as_raw_fd())?;
    dup2(stderr.as_raw_fd(), io::stderr().as_raw_fd())?;
    Ok(())
}

fn append(path: std::path::PathBuf) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Child, Command};
    use tempfile::tempdir;

    fn sleeper() -> Child {
        Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("Failed to spawn sleep")
    }

    fn child_pid(child: &Child) -> i32 {
        i32::try_from(child.id()).expect("PID out of range")
    }

    fn write_pid(session: &Session, contents: &str) {
        fs::write(session.pid_file(), contents).expect("Failed to write PID file");
    }

    /// A PID that is not in use: a reaped child's.
    fn dead_pid() -> i32 {
        let mut child = Command::new("true").spawn().expect("Failed to spawn true");
        let pid = child_pid(&child);
        child.wait().expect("Failed to reap child");
        pid
    }

    #[test]
    fn test_pid_is_best_effort() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());
        assert_eq!(pid(&session), None);

        write_pid(&session, "garbage");
        assert_eq!(pid(&session), None);

        write_pid(&session, "0\n");
        assert_eq!(pid(&session), None, "PID 0 would address our own group");

        write_pid(&session, "-1\n");
        assert_eq!(pid(&session), None);

        write_pid(&session, " 1234\n");
        assert_eq!(pid(&session), Some(1234));
    }

    #[test]
    fn test_live_process_is_running() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());
        let own = std::process::id().to_string();
        write_pid(&session, &own);

        assert!(is_running(&session));
        assert_eq!(running_pid(&session), own.parse().ok());
    }

    #[test]
    fn test_stale_pid_file_is_not_running() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());
        write_pid(&session, &dead_pid().to_string());

        assert!(!is_running(&session));
        assert!(session.pid_file().exists(), "Status checks never delete");
    }

    #[test]
    fn test_stop_terminates_daemon_and_removes_pid_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());
        let mut child = sleeper();
        let pid = child_pid(&child);
        write_pid(&session, &pid.to_string());
        assert!(is_running(&session));

        let outcome = stop(&session).expect("Failed to stop daemon");

        assert_eq!(outcome, StopOutcome::Stopped(pid));
        assert!(!is_running(&session));
        assert!(!session.pid_file().exists());

        let status = child.wait().expect("Failed to reap child");
        assert!(!status.success(), "Child should have been terminated");
    }

    #[test]
    fn test_stop_with_stale_pid_file_cleans_up() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());
        write_pid(&session, &dead_pid().to_string());

        assert_eq!(stop(&session).unwrap(), StopOutcome::NotRunning);
        assert!(!session.pid_file().exists());
    }

    #[test]
    fn test_stop_without_pid_file_is_not_an_error() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());

        assert_eq!(stop(&session).unwrap(), StopOutcome::NotRunning);
    }

    #[test]
    fn test_start_declines_when_already_running() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());
        let mut child = sleeper();
        let pid = child_pid(&child);
        write_pid(&session, &pid.to_string());
        fs::write(session.ledger_file(), "outage = []\n").unwrap();

        let outcome = start(&session).expect("Start should not fail");

        assert_eq!(outcome, StartOutcome::AlreadyRunning(pid));
        assert_eq!(pid_entries(&session), 1);
        assert_eq!(
            fs::read_to_string(session.pid_file()).unwrap(),
            pid.to_string()
        );
        assert_eq!(
            fs::read_to_string(session.ledger_file()).unwrap(),
            "outage = []\n"
        );

        child.kill().ok();
        child.wait().ok();
    }

    #[test]
    fn test_release_only_removes_own_pid_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let session = Session::new(dir.path());

        write_pid(&session, &dead_pid().to_string());
        release(&session).unwrap();
        assert!(session.pid_file().exists());

        write_pid(&session, &std::process::id().to_string());
        release(&session).unwrap();
        assert!(!session.pid_file().exists());
    }

    fn pid_entries(session: &Session) -> usize {
        fs::read_dir(session.base_dir())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("pid"))
            .count()
    }
}
