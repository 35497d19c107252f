use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use connection_monitor::{
    Config, Error, Monitor, OutageLedger, Session,
    alert::SystemAlerter,
    cli::{Args, Command},
    daemon::{self, StartOutcome, StopOutcome},
    probe::ProbeKind,
    report, worker,
};
use log::error;
use tokio_util::sync::CancellationToken;

fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    match run(&Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let session = match &args.base_dir {
        Some(dir) => Session::new(dir),
        None => Session::from_env()?,
    };
    session.ensure_dir()?;

    match args.command() {
        Command::Stop => match daemon::stop(&session)? {
            StopOutcome::Stopped(pid) => println!("Stopped daemon with PID {pid}"),
            StopOutcome::NotRunning => println!("Daemon not running"),
        },
        Command::Status => {
            print_status(&session)?;
        }
        Command::Report => {
            let ledger = print_status(&session)?;
            println!("{}", report::render(&ledger, Utc::now()));
        }
        Command::ShowConfig => print!("{}", Config::load(&session)?.render()?),
        Command::Start => start(args, &session)?,
    }
    Ok(())
}

fn print_status(session: &Session) -> Result<OutageLedger, Error> {
    let ledger = OutageLedger::load(&session.ledger_file())?;
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
    Ok(ledger)
}

fn start(args: &Args, session: &Session) -> Result<(), Error> {
    Config::update(session, &args.overrides())?;

    if !args.daemonize && daemon::is_running(session) {
        return block_on(async {
            worker::watch(session, cancellation()?).await;
            Ok(())
        });
    }

    let history = OutageLedger::load(&session.ledger_file())?;

    if args.daemonize {
        // forks, so it has to happen before the runtime exists
        if let StartOutcome::AlreadyRunning(pid) = daemon::start(session)? {
            println!("Daemon already running with PID {pid}");
            return Ok(());
        }
    }

    let config = Config::load(session)?;
    let mut monitor = Monitor::new(
        session.clone(),
        ProbeKind::select(args.debug),
        SystemAlerter::from_config(&config),
        config,
    )
    .with_history(history)
    .daemonized(args.daemonize);

    block_on(async move {
        monitor.run(cancellation()?).await;
        Ok(())
    })
}

fn block_on<F: Future<Output = Result<(), Error>>>(future: F) -> Result<(), Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}

/// Token cancelled by SIGINT/SIGTERM/SIGHUP. Only valid inside the runtime.
fn cancellation() -> Result<CancellationToken, Error> {
    let token = CancellationToken::new();
    worker::cancel_on_signal(token.clone())?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn args(base_dir: &std::path::Path, command: &str) -> Args {
        Args::try_parse_from([
            "connection-monitor",
            command,
            "--base-dir",
            base_dir.to_str().expect("Non UTF-8 temp dir"),
        ])
        .expect("Failed to parse arguments")
    }

    #[test]
    fn test_one_shot_commands_read_persisted_ledger() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut ledger = OutageLedger::new();
        ledger.open("host unreachable", Utc::now());
        ledger
            .persist(&dir.path().join("outages.toml"))
            .expect("Failed to persist ledger");

        for command in ["--status", "--report", "--config", "--stop"] {
            assert!(
                run(&args(dir.path(), command)).is_ok(),
                "{command} should succeed without a running daemon"
            );
        }

        let stored = OutageLedger::load(&dir.path().join("outages.toml")).unwrap();
        assert_eq!(stored, ledger, "One-shot commands must not write the ledger");
    }

    #[test]
    fn test_status_with_corrupt_ledger_fails() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("outages.toml"), "[[outage]]\nstart_time = 1").unwrap();

        assert!(matches!(
            run(&args(dir.path(), "--status")),
            Err(Error::CorruptLedger { .. })
        ));
    }
}
