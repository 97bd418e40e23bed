//! Running the application as an external command.

use std::path::PathBuf;

use tracing::{debug, info};
use xscript::{cmd, vars, Out, ParentEnv, Run};

use fieldup_update::{Application, ApplicationFault, FailureCounter};

use crate::config::UpdaterConfig;

/// Application started as a command in the state directory.
///
/// The command loads the current generation of the tracked files itself. Any non-zero
/// exit status is a fault.
pub struct CommandApplication {
    command: Vec<String>,
    state_dir: PathBuf,
    counter: FailureCounter,
}

impl CommandApplication {
    pub fn new(config: &UpdaterConfig) -> Self {
        Self {
            command: config.application.command.clone(),
            state_dir: config.state_dir.clone(),
            counter: config.counter(),
        }
    }
}

impl Application for CommandApplication {
    fn run(&mut self) -> Result<(), ApplicationFault> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(ApplicationFault::new("no application command configured"));
        };
        let failures = self.counter.read().unwrap_or(0);
        info!("starting application {program:?}");
        let mut cmd = cmd!(program);
        cmd.extend_args(args);
        let cmd = cmd
            .with_cwd(&self.state_dir)
            .with_vars(vars! {
                FIELDUP_STATE_DIR = &self.state_dir,
                FIELDUP_FAILURE_COUNT = failures.to_string(),
            })
            .with_stdout(Out::Inherit)
            .with_stderr(Out::Inherit);
        ParentEnv.run(cmd).map_err(|error| {
            ApplicationFault::with_source(format!("application {program:?} failed"), error)
        })?;
        debug!("application {program:?} completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn application(state_dir: &std::path::Path, script: &str) -> CommandApplication {
        let mut config = UpdaterConfig {
            state_dir: state_dir.to_path_buf(),
            ..UpdaterConfig::default()
        };
        config.application.command = vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()];
        CommandApplication::new(&config)
    }

    #[test]
    fn test_runs_in_state_dir() {
        let tempdir = tempfile::tempdir().unwrap();
        std::fs::write(tempdir.path().join("main.py"), "").unwrap();
        let mut app = application(
            tempdir.path(),
            r#"test -f main.py && test "$FIELDUP_FAILURE_COUNT" = 2"#,
        );
        app.counter.write(2).unwrap();
        app.run().unwrap();
    }

    #[test]
    fn test_exit_status_is_fault() {
        let tempdir = tempfile::tempdir().unwrap();
        assert!(application(tempdir.path(), "exit 3").run().is_err());
        let mut missing = application(tempdir.path(), "");
        missing.command = vec!["./does-not-exist".to_owned()];
        assert!(missing.run().is_err());
    }
}
