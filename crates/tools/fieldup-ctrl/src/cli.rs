//! Definition of the command line interface (CLI).

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use fieldup_update::{
    record_failure, record_success, BootSequencer, FetchStatus, PersistedState, Platform,
    Recovery,
};

use crate::app::CommandApplication;
use crate::config::{load_config, DEFAULT_CONFIG_PATH};
use crate::error::{CtrlError, CtrlResult};
use crate::http_source::HttpSource;
use crate::platform::DevicePlatform;
use crate::status::UpdaterStatus;

pub fn main() -> CtrlResult<()> {
    fieldup_cli::init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let state = config.persisted_state()?;
    match &args.command {
        Command::Boot { once } => {
            config.ensure_state_dir()?;
            let mut platform = DevicePlatform::new(&config);
            if *once {
                platform = platform.without_in_process_sleep();
            }
            let mut sequencer = BootSequencer::new(
                state,
                config.sequencer_config(),
                HttpSource::new(&config),
                CommandApplication::new(&config),
                platform,
            );
            if *once {
                let report = sequencer.run_cycle();
                if !report.succeeded() {
                    warn!("boot cycle completed with a failed application run");
                }
            } else {
                sequencer.run();
            }
        }
        Command::Update => {
            config.ensure_state_dir()?;
            recover(&state);
            let reports = state.fetcher().fetch_all(&mut HttpSource::new(&config));
            for report in &reports {
                println!("{}: {}", report.file, report.status);
            }
            if reports
                .iter()
                .all(|report| report.status == FetchStatus::FetchFailed)
            {
                warn!("no tracked file could be fetched");
            }
        }
        Command::Rollback { force } => {
            recover(&state);
            let engine = state.rollback_engine(config.max_failures);
            let failures = state.counter.read()?;
            if !*force && !engine.needs_rollback(failures) {
                println!(
                    "No rollback necessary, failure count is {failures}/{}.",
                    config.max_failures
                );
                return Ok(());
            }
            let report = engine.rollback(&state.counter);
            DevicePlatform::new(&config).rolled_back(&report);
            for name in &report.restored {
                println!("{name}: restored");
            }
            for name in &report.unavailable {
                println!("{name}: no previous generation");
            }
            for (name, error) in &report.failed {
                println!("{name}: failed ({error})");
            }
            if !report.failed.is_empty() {
                return Err(CtrlError::RollbackFailed(report.failed.len()));
            }
        }
        Command::Mark { outcome } => {
            mark(&state, *outcome)?;
        }
        Command::Status { json } => {
            let status = UpdaterStatus::collect(&config, &state)?;
            status.print();
            if *json {
                serde_json::to_writer(std::io::stdout(), &status)?;
            }
        }
    }
    Ok(())
}

/// Repair operations interrupted by a power loss.
fn recover(state: &PersistedState) {
    for file in &state.files {
        match state.store.recover(file) {
            Ok(Recovery::Nothing) => {}
            Ok(recovery) => info!("repaired interrupted operation on {file}: {recovery:?}"),
            Err(error) => error!("unable to repair {file}: {error}"),
        }
    }
}

fn mark(state: &PersistedState, outcome: MarkOutcome) -> CtrlResult<()> {
    match outcome {
        MarkOutcome::Success => {
            record_success(&state.counter)?;
            println!("Boot marked as successful.");
        }
        MarkOutcome::Failure => {
            let failures = record_failure(&state.counter)?;
            println!("Boot marked as failed, {failures} consecutive failure(s).");
        }
    }
    state.attempt.finish()?;
    Ok(())
}

#[derive(Debug, Parser)]
#[clap(author, about)]
pub struct Args {
    /// Path of the configuration file.
    #[clap(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// The command.
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Run boot cycles.
    Boot {
        /// Run a single cycle and exit.
        #[clap(long)]
        once: bool,
    },
    /// Check all tracked files for updates and install them.
    Update,
    /// Roll back to the previous generation of all tracked files.
    Rollback {
        /// Roll back even if the failure count does not exceed the threshold.
        #[clap(long)]
        force: bool,
    },
    /// Record the outcome of an application run.
    Mark { outcome: MarkOutcome },
    /// Show the state of the updater.
    Status {
        /// Output the state as JSON.
        #[clap(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MarkOutcome {
    Success,
    Failure,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;
    use crate::config::UpdaterConfig;

    #[test]
    fn test_cli() {
        Args::command().debug_assert();
        let args = Args::try_parse_from(["fieldup-ctrl", "rollback", "--force"]).unwrap();
        assert!(matches!(args.command, Command::Rollback { force: true }));
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        let args =
            Args::try_parse_from(["fieldup-ctrl", "mark", "failure", "--config", "/tmp/u.toml"])
                .unwrap();
        assert!(matches!(
            args.command,
            Command::Mark {
                outcome: MarkOutcome::Failure
            }
        ));
        assert_eq!(args.config, PathBuf::from("/tmp/u.toml"));
    }

    #[test]
    fn test_mark_clears_attempt() {
        let tempdir = tempfile::tempdir().unwrap();
        let config = UpdaterConfig {
            state_dir: tempdir.path().to_path_buf(),
            ..UpdaterConfig::default()
        };
        let state = config.persisted_state().unwrap();
        state.attempt.begin(0).unwrap();
        mark(&state, MarkOutcome::Failure).unwrap();
        assert_eq!(state.counter.read().unwrap(), 1);
        assert!(!state.attempt.is_pending());
        mark(&state, MarkOutcome::Success).unwrap();
        assert_eq!(state.counter.read().unwrap(), 0);
    }
}
