//! TOML configuration mirroring the simulator's tunables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{self, Context};
use debugger::SessionConfig;
use serde::Deserialize;
use supervisor::SpawnOptions;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Simulator executable; `--vm` on the command line wins.
    pub vm: Option<PathBuf>,
    pub args: Option<Vec<String>>,
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub execution: Execution,
    #[serde(default)]
    pub memory: Memory,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    pub startup_seconds: Option<u64>,
    pub command_seconds: Option<u64>,
    /// Absent means an interactive run is never timed out.
    pub run_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Execution {
    pub run_step_delay: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Memory {
    pub data_section_start: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).wrap_err_with(|| format!("parsing {}", path.display()))
    }

    pub fn spawn_options(&self, binary: PathBuf) -> SpawnOptions {
        let mut options = SpawnOptions::new(binary);
        if let Some(args) = &self.args {
            options.args = args.clone();
        }
        options.working_dir = self.working_dir.clone();
        if let Some(seconds) = self.timeouts.startup_seconds {
            options.startup_timeout = Duration::from_secs(seconds);
        }
        if let Some(delay) = self.execution.run_step_delay {
            options.run_step_delay = delay;
        }
        if let Some(start) = &self.memory.data_section_start {
            options.data_section_start = start.clone();
        }
        options
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        if let Some(seconds) = self.timeouts.command_seconds {
            config.command_timeout = Duration::from_secs(seconds);
        }
        config.run_timeout = self.timeouts.run_seconds.map(Duration::from_secs);
        config
    }
}
