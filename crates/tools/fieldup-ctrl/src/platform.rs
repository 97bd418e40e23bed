//! Device integration of the boot sequence.
//!
//! Device-specific steps, e.g., joining a wireless network or refreshing a display, are
//! delegated to hooks of the `boot-cycle` operation:
//!
//! - `pre-fetch`: establish connectivity, a failing hook means the device is offline.
//! - `post-rollback`: report a rollback, failures are ignored.
//! - `pre-sleep`: prepare the device for sleep, failures are ignored.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};
use xscript::{cmd, vars, ParentEnv, Run, Vars};

use fieldup_hooks::{Hooks, HooksLoader};
use fieldup_update::{Platform, RollbackReport};

use crate::config::UpdaterConfig;

/// Name of the hooks operation.
pub const BOOT_CYCLE_HOOKS: &str = "boot-cycle";

/// Platform of a Linux device.
pub struct DevicePlatform {
    hooks: Hooks,
    state_dir: PathBuf,
    sleep_command: Option<Vec<String>>,
    in_process_sleep: bool,
}

impl DevicePlatform {
    pub fn new(config: &UpdaterConfig) -> Self {
        let hooks = HooksLoader::new(&config.hooks_dir)
            .load_hooks(BOOT_CYCLE_HOOKS)
            .unwrap_or_else(|error| {
                error!("unable to load hooks, continuing without: {error}");
                Hooks::empty(BOOT_CYCLE_HOOKS)
            });
        Self {
            hooks,
            state_dir: config.state_dir.clone(),
            sleep_command: config.sleep.command.clone(),
            in_process_sleep: true,
        }
    }

    /// Skip sleeping within the process if there is no sleep command.
    ///
    /// Used when the process exits after a single cycle.
    pub fn without_in_process_sleep(mut self) -> Self {
        self.in_process_sleep = false;
        self
    }

    fn vars(&self) -> Vars {
        vars! {
            FIELDUP_STATE_DIR = &self.state_dir,
        }
    }

    fn run_sleep_command(&self, command: &[String]) -> bool {
        let Some((program, args)) = command.split_first() else {
            return false;
        };
        let mut cmd = cmd!(program);
        cmd.extend_args(args);
        match ParentEnv.run(cmd) {
            Ok(_) => true,
            Err(error) => {
                error!("sleep command {program:?} failed: {error}");
                false
            }
        }
    }
}

impl Platform for DevicePlatform {
    fn connect(&mut self) -> bool {
        match self.hooks.run_hooks("pre-fetch", self.vars()) {
            Ok(()) => true,
            Err(error) => {
                warn!("{error}, assuming the device is offline");
                false
            }
        }
    }

    fn rolled_back(&mut self, report: &RollbackReport) {
        let mut vars = self.vars();
        vars.set("FIELDUP_RESTORED_FILES", report.restored.join(" "));
        vars.set("FIELDUP_UNAVAILABLE_FILES", report.unavailable.join(" "));
        if let Err(error) = self.hooks.run_hooks("post-rollback", vars) {
            warn!("{error}");
        }
    }

    fn sleep(&mut self, duration: Duration) {
        // Make sure that no data is lost.
        nix::unistd::sync();
        if let Err(error) = self.hooks.run_hooks("pre-sleep", self.vars()) {
            warn!("{error}");
        }
        if let Some(command) = &self.sleep_command {
            if self.run_sleep_command(command) {
                return;
            }
        }
        if self.in_process_sleep {
            info!("sleeping for {}s", duration.as_secs());
            thread::sleep(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use super::*;

    fn install_hook(hooks_dir: &Path, stage: &str, name: &str, script: &str) {
        let stage_dir = hooks_dir.join(BOOT_CYCLE_HOOKS).join(stage);
        fs::create_dir_all(&stage_dir).unwrap();
        let path = stage_dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn platform(root: &Path) -> DevicePlatform {
        let config = UpdaterConfig {
            state_dir: root.join("state"),
            hooks_dir: root.join("hooks"),
            ..UpdaterConfig::default()
        };
        DevicePlatform::new(&config).without_in_process_sleep()
    }

    #[test]
    fn test_connected_without_hooks() {
        let tempdir = tempfile::tempdir().unwrap();
        assert!(platform(tempdir.path()).connect());
    }

    #[test]
    fn test_failing_pre_fetch_hook_means_offline() {
        let tempdir = tempfile::tempdir().unwrap();
        let hooks_dir = tempdir.path().join("hooks");
        install_hook(&hooks_dir, "pre-fetch", "10-wifi", "#!/bin/sh\nexit 1\n");
        assert!(!platform(tempdir.path()).connect());
    }

    #[test]
    fn test_hooks_receive_rollback_report() {
        let tempdir = tempfile::tempdir().unwrap();
        let hooks_dir = tempdir.path().join("hooks");
        let marker = tempdir.path().join("restored");
        install_hook(
            &hooks_dir,
            "post-rollback",
            "10-report",
            &format!(
                "#!/bin/sh\nprintf '%s' \"$FIELDUP_RESTORED_FILES\" > {:?}\n",
                marker
            ),
        );
        let report = RollbackReport {
            restored: vec!["main.py".to_owned(), "weather_utils.py".to_owned()],
            ..RollbackReport::default()
        };
        let mut platform = platform(tempdir.path());
        platform.rolled_back(&report);
        platform.sleep(Duration::from_secs(3600));
        assert_eq!(
            fs::read_to_string(&marker).unwrap(),
            "main.py weather_utils.py"
        );
    }
}
