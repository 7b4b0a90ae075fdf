use std::{fs, path::Path};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use tank_arena_core::Battlefield;
use tank_arena_system_ai::SupervisorConfig;

/// Engine settings loaded from an optional TOML file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct EngineConfig {
    /// Arena width in world units.
    pub(crate) width: f64,
    /// Arena height in world units.
    pub(crate) height: f64,
    /// Tick budget of a match.
    pub(crate) max_ticks: u64,
    /// Settings shared by every AI supervisor.
    pub(crate) supervisor: SupervisorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 900.0,
            height: 600.0,
            max_ticks: 5_000,
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads the configuration, falling back to defaults when no path is given.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read engine config {}", path.display()))?;
                Self::parse(&text)
                    .with_context(|| format!("invalid engine config {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        ensure!(
            config.width > 0.0 && config.height > 0.0,
            "battlefield must have a positive size"
        );
        ensure!(
            config.supervisor.processing_time_limit > 0,
            "processing_time_limit must be positive"
        );
        Ok(config)
    }

    pub(crate) fn battlefield(&self) -> Battlefield {
        Battlefield::new(self.width, self.height)
    }
}
