use std::{collections::HashSet, ops::RangeInclusive, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Match description versions this engine can replay.
pub const SUPPORTED_UBD_VERSIONS: RangeInclusive<u32> = 1..=2;

/// Soft per-tick budget assigned to AIs that do not declare one.
pub const DEFAULT_EXECUTION_LIMIT: Duration = Duration::from_millis(100);

/// Reasons a match description is rejected.
#[derive(Debug, Error)]
pub enum MatchDescriptionError {
    /// The document is not valid JSON or misses required fields.
    #[error("match description JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The document declares a version this engine cannot replay.
    #[error("unsupported match description version {0}")]
    UnsupportedVersion(u32),
    /// The document lists no AI.
    #[error("match description lists no AI")]
    EmptyAiList,
    /// An AI declares a zero execution limit.
    #[error("AI '{0}' declares an execution limit of zero")]
    InvalidExecutionLimit(String),
    /// Two AIs share the same name.
    #[error("AI name '{0}' is used more than once")]
    DuplicateName(String),
    /// Team mode is enabled but an AI names no team.
    #[error("team mode requires a team for AI '{0}'")]
    MissingTeam(String),
    /// The random seed is not a finite number.
    #[error("random seed must be a finite number")]
    InvalidSeed,
}

/// Entry of the AI list stored in a match description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDescription {
    /// Display name of the AI.
    pub name: String,
    /// Team the AI fights for.
    #[serde(default)]
    pub team: Option<String>,
    /// Custom payload forwarded to the AI during initialisation.
    #[serde(default)]
    pub init_data: Option<Value>,
    /// Run the AI in an isolated worker instead of in-process.
    #[serde(default)]
    pub use_sandbox: bool,
    /// AI source code.
    pub code: String,
    /// Soft per-tick budget in milliseconds.
    #[serde(default = "default_execution_limit_ms")]
    pub execution_limit: u64,
}

fn default_execution_limit_ms() -> u64 {
    DEFAULT_EXECUTION_LIMIT.as_millis() as u64
}

/// Reproducible description of a whole match (`ubd` document).
///
/// The random seed is the single source of nondeterminism of a match; per-tank
/// seeds derive from it with [`MatchDescription::tank_seed`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDescription {
    /// Format version.
    pub version: u32,
    /// Match-wide random seed.
    pub rng_seed: f64,
    /// Whether AIs fight in named teams.
    #[serde(default)]
    pub team_mode: bool,
    /// AIs taking part in the match.
    pub ai_list: Vec<AiDescription>,
}

impl MatchDescription {
    /// Decodes and validates a match description from JSON text.
    pub fn from_json(text: &str) -> Result<Self, MatchDescriptionError> {
        let description: Self = serde_json::from_str(text)?;
        description.validate()?;
        Ok(description)
    }

    /// Encodes the description as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, MatchDescriptionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the invariants a replayable match relies on.
    pub fn validate(&self) -> Result<(), MatchDescriptionError> {
        if !SUPPORTED_UBD_VERSIONS.contains(&self.version) {
            return Err(MatchDescriptionError::UnsupportedVersion(self.version));
        }
        if !self.rng_seed.is_finite() {
            return Err(MatchDescriptionError::InvalidSeed);
        }
        if self.ai_list.is_empty() {
            return Err(MatchDescriptionError::EmptyAiList);
        }

        let mut names = HashSet::new();
        for ai in &self.ai_list {
            if ai.execution_limit == 0 {
                return Err(MatchDescriptionError::InvalidExecutionLimit(ai.name.clone()));
            }
            if !names.insert(ai.name.as_str()) {
                return Err(MatchDescriptionError::DuplicateName(ai.name.clone()));
            }
            if self.team_mode && ai.team.as_deref().map_or(true, str::is_empty) {
                return Err(MatchDescriptionError::MissingTeam(ai.name.clone()));
            }
        }

        Ok(())
    }

    /// Derives the AI definitions in roster order.
    #[must_use]
    pub fn definitions(&self) -> Vec<AiDefinition> {
        self.ai_list.iter().map(AiDefinition::from).collect()
    }

    /// Seed string handed to the AI of a single tank.
    #[must_use]
    pub fn tank_seed(&self, tank: crate::TankId) -> String {
        format!("{}:{}", self.rng_seed, tank)
    }
}

/// Static configuration of a single AI.
#[derive(Clone, Debug, PartialEq)]
pub struct AiDefinition {
    /// Display name of the AI.
    pub name: String,
    /// Team the AI fights for.
    pub team: Option<String>,
    /// AI source code.
    pub code: String,
    /// Soft per-tick budget.
    pub execution_limit: Duration,
    /// Custom payload forwarded during initialisation.
    pub init_data: Option<Value>,
    /// Run the AI in an isolated worker instead of in-process.
    pub use_sandbox: bool,
}

impl AiDefinition {
    /// Creates an in-process definition with the default execution limit.
    #[must_use]
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: None,
            code: code.into(),
            execution_limit: DEFAULT_EXECUTION_LIMIT,
            init_data: None,
            use_sandbox: false,
        }
    }

    /// Overrides the soft per-tick budget.
    #[must_use]
    pub fn with_execution_limit(mut self, limit: Duration) -> Self {
        self.execution_limit = limit;
        self
    }

    /// Selects the isolated worker variant.
    #[must_use]
    pub fn sandboxed(mut self, use_sandbox: bool) -> Self {
        self.use_sandbox = use_sandbox;
        self
    }

    /// Attaches a custom initialisation payload.
    #[must_use]
    pub fn with_init_data(mut self, init_data: Value) -> Self {
        self.init_data = Some(init_data);
        self
    }

    /// Assigns the AI to a named team.
    #[must_use]
    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }
}

impl From<&AiDescription> for AiDefinition {
    fn from(description: &AiDescription) -> Self {
        Self {
            name: description.name.clone(),
            team: description.team.clone(),
            code: description.code.clone(),
            execution_limit: Duration::from_millis(description.execution_limit),
            init_data: description.init_data.clone(),
            use_sandbox: description.use_sandbox,
        }
    }
}
