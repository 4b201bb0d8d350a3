use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;

use crate::{
    error::{SessionError, SessionResult},
    mutator::DeckFormat,
    policy::PolicyConfig,
    record::BaselineSource,
    scaling::ActionBounds,
};

/// Placeholder replaced by the session deck file name in executable arguments.
pub const DECK_PLACEHOLDER: &str = "{deck}";

/// Complete description of a simulation session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Deck, layout and stepping settings.
    pub session: SessionSection,
    /// Simulator executables.
    #[serde(default)]
    pub executables: ExecutablesConfig,
    /// Deck dialect.
    #[serde(default)]
    pub deck_format: DeckFormat,
    /// Output stream settings.
    #[serde(default)]
    pub output: OutputConfig,
    /// Action scaling.
    #[serde(default)]
    pub actions: ActionBounds,
    /// Reward and termination policy.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Baseline source.
    #[serde(default)]
    pub baseline: BaselineSource,
}

impl SessionConfig {
    /// Builds a configuration in code with defaults for everything else.
    #[must_use]
    pub fn new(
        deck: impl Into<PathBuf>,
        initialize: ExecutableConfig,
        advance: ExecutableConfig,
        control_factors: Vec<String>,
    ) -> Self {
        Self {
            session: SessionSection {
                deck: deck.into(),
                control_factors,
                ..SessionSection::default()
            },
            executables: ExecutablesConfig {
                initialize,
                advance,
            },
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// Relative paths are resolved against the directory holding the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading session config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let resolve = |candidate: &mut PathBuf| {
            if candidate.is_relative() {
                *candidate = source_dir.join(&*candidate);
            }
        };
        resolve(&mut config.session.deck);
        resolve(&mut config.session.output_root);
        if let Some(log) = config.session.telemetry_log.as_mut() {
            resolve(log);
        }
        resolve(&mut config.executables.initialize.path);
        resolve(&mut config.executables.advance.path);

        if config.executables.initialize.args.is_empty() {
            config.executables.initialize.args = default_initialize_args();
        }
        if config.executables.advance.args.is_empty() {
            config.executables.advance.args = default_advance_args();
        }

        if !config.session.deck.is_file() {
            bail!("deck {} does not exist", config.session.deck.display());
        }
        ensure!(
            config.output.tail_window > 0,
            "output.tail_window must be positive"
        );
        config
            .validate()
            .with_context(|| format!("validating {}", path.display()))?;
        Ok(config)
    }

    /// Checks the settings that do not depend on the filesystem.
    pub fn validate(&self) -> SessionResult<()> {
        let invalid =
            |msg: &str| -> SessionResult<()> { Err(SessionError::InvalidConfig(msg.to_string())) };
        if !(self.session.control_horizon.is_finite() && self.session.control_horizon > 0.0) {
            return invalid("control_horizon must be a positive number");
        }
        if self.session.control_factors.is_empty() {
            return invalid("at least one control factor is required");
        }
        let mut seen = HashSet::new();
        if let Some(id) = self
            .session
            .control_factors
            .iter()
            .find(|id| !seen.insert(id.as_str()))
        {
            return Err(SessionError::InvalidConfig(format!(
                "control factor {id} is listed more than once"
            )));
        }
        if !self.actions.is_valid() {
            return invalid("actions.min must be below actions.max");
        }
        if self.session.deck_file.is_empty() || self.session.simulator_log.is_empty() {
            return invalid("deck_file and simulator_log must be named");
        }
        Ok(())
    }
}

/// `[session]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Canonical input deck, copied into every session.
    pub deck: PathBuf,
    /// Directory under which session directories are created.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Fixed session identifier; generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Controlled factors, in action order.
    #[serde(default)]
    pub control_factors: Vec<String>,
    /// Simulated time advanced per step.
    #[serde(default = "default_control_horizon")]
    pub control_horizon: f64,
    /// Name of the mutable deck inside the session directory.
    #[serde(default = "default_deck_file")]
    pub deck_file: String,
    /// Name of the simulator console log inside the session directory.
    #[serde(default = "default_simulator_log")]
    pub simulator_log: String,
    /// Optional JSONL telemetry log.
    #[serde(default)]
    pub telemetry_log: Option<PathBuf>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            deck: PathBuf::new(),
            output_root: default_output_root(),
            session_id: None,
            control_factors: Vec::new(),
            control_horizon: default_control_horizon(),
            deck_file: default_deck_file(),
            simulator_log: default_simulator_log(),
            telemetry_log: None,
        }
    }
}

/// `[executables]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutablesConfig {
    /// Program generating the initial state from the deck.
    pub initialize: ExecutableConfig,
    /// Program advancing the simulation to the deck horizon.
    pub advance: ExecutableConfig,
}

impl Default for ExecutablesConfig {
    fn default() -> Self {
        Self {
            initialize: ExecutableConfig {
                path: PathBuf::new(),
                args: default_initialize_args(),
            },
            advance: ExecutableConfig {
                path: PathBuf::new(),
                args: default_advance_args(),
            },
        }
    }
}

/// A program and its argument template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutableConfig {
    /// Program path.
    pub path: PathBuf,
    /// Arguments; `{deck}` is replaced by the session deck file name.
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExecutableConfig {
    /// Arguments with the deck placeholder substituted.
    #[must_use]
    pub fn args_for(&self, deck: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(DECK_PLACEHOLDER, deck))
            .collect()
    }
}

/// `[output]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Fixed output file name inside the session directory.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Extension used to discover the output file when no name is fixed.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Files whose name ends with one of these survive `close`.
    #[serde(default = "default_retain_suffixes")]
    pub retain_suffixes: Vec<String>,
    /// Initial tail read window in bytes.
    #[serde(default = "default_tail_window")]
    pub tail_window: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_name: None,
            extension: default_extension(),
            retain_suffixes: default_retain_suffixes(),
            tail_window: default_tail_window(),
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("runs")
}

const fn default_control_horizon() -> f64 {
    1.0
}

fn default_deck_file() -> String {
    "MELIN".into()
}

fn default_simulator_log() -> String {
    "MELOG".into()
}

fn default_initialize_args() -> Vec<String> {
    vec![DECK_PLACEHOLDER.into()]
}

fn default_advance_args() -> Vec<String> {
    vec!["ow=o".into(), format!("i={DECK_PLACEHOLDER}")]
}

fn default_extension() -> String {
    "DAT".into()
}

fn default_retain_suffixes() -> Vec<String> {
    vec!["PTF".into(), ".DAT".into()]
}

const fn default_tail_window() -> u64 {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_and_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("pressure.inp"), "TEND 0\n").unwrap();
        let config_path = dir.path().join("session.toml");
        fs::write(
            &config_path,
            r#"
[session]
deck = "pressure.inp"
control_factors = ["CF101", "CF202"]
control_horizon = 10.0

[executables.initialize]
path = "bin/melgen"

[executables.advance]
path = "/opt/melcor/bin/melcor"
args = ["-i", "{deck}"]

[actions]
min = 0.0
max = 2.0
normalized = true

[policy]
kind = "setpoint"
max_deviation = 2.5

[baseline]
kind = "entity_field"
field = "PVOL"
entities = ["CV001", "CV002"]
"#,
        )
        .unwrap();

        let config = SessionConfig::load(&config_path).unwrap();
        assert_eq!(config.session.deck, dir.path().join("pressure.inp"));
        assert_eq!(config.session.output_root, dir.path().join("runs"));
        assert_eq!(config.executables.initialize.path, dir.path().join("bin/melgen"));
        assert_eq!(config.executables.initialize.args, vec!["{deck}".to_string()]);
        assert_eq!(
            config.executables.advance.args_for("MELIN"),
            vec!["-i".to_string(), "MELIN".to_string()]
        );
        assert_eq!(config.session.deck_file, "MELIN");
        assert_eq!(config.deck_format.horizon_keyword, "TEND");
        assert_eq!(config.output.tail_window, 4096);
        assert!(config.actions.normalized);
        assert!(matches!(
            config.policy,
            PolicyConfig::Setpoint { max_deviation, .. } if (max_deviation - 2.5).abs() < f64::EPSILON
        ));
        assert!(matches!(config.baseline, BaselineSource::EntityField { ref field, .. } if field == "PVOL"));
    }

    #[test]
    fn rejects_non_positive_horizon() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("deck.inp"), "TEND 0\n").unwrap();
        let config_path = dir.path().join("session.toml");
        fs::write(
            &config_path,
            r#"
[session]
deck = "deck.inp"
control_factors = ["CF101"]
control_horizon = 0.0

[executables.initialize]
path = "melgen"

[executables.advance]
path = "melcor"
"#,
        )
        .unwrap();
        let err = SessionConfig::load(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("control_horizon"));
    }

    #[test]
    fn built_config_uses_default_argument_templates() {
        let config = SessionConfig::new(
            "deck.inp",
            ExecutableConfig {
                path: "melgen".into(),
                args: default_initialize_args(),
            },
            ExecutableConfig {
                path: "melcor".into(),
                args: default_advance_args(),
            },
            vec!["CF101".into()],
        );
        assert!(config.validate().is_ok());
        assert_eq!(
            config.executables.advance.args_for("MELIN"),
            vec!["ow=o".to_string(), "i=MELIN".to_string()]
        );
        assert!(SessionConfig::default().validate().is_err());
    }

    #[test]
    fn duplicate_control_factors_are_rejected() {
        let config = SessionConfig::new(
            "deck.inp",
            ExecutableConfig {
                path: "melgen".into(),
                args: default_initialize_args(),
            },
            ExecutableConfig {
                path: "melcor".into(),
                args: default_advance_args(),
            },
            vec!["CF101".into(), "CF202".into(), "CF101".into()],
        );
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(msg) if msg.contains("CF101")));
    }
}
