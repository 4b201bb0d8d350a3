//! Session data and the episode state machine.
//!
//! ```text
//! Created --reset--> Ready --step--> Stepping --> Ready | Terminated | Truncated
//!                      ^                  \--error--> Failed
//!                      \------ reset from Created / Terminated / Truncated / Failed
//! ```
//!
//! A [`SimulationSession`] owns one session directory exclusively. Several
//! sessions may run in parallel as long as their identifiers differ.

use std::{
    env,
    ffi::OsStr,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    catalog::{DeckCatalog, TextDeckCatalog},
    config::{OutputConfig, SessionConfig},
    deck::DeckStore,
    error::{SessionError, SessionResult},
    mutator::DeckMutator,
    policy::{RewardPolicy, StepInfo},
    presenter::{NullPresenter, Presenter},
    record::{Baseline, BaselineSource, ObservationRecord},
    runner::{ProcessReport, ProcessRunner},
    tail::OutputTailReader,
    telemetry::SessionTelemetry,
};

/// Filesystem-scoped state of one episode.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    dir: PathBuf,
    deck: DeckStore,
    deck_file: String,
    log_path: PathBuf,
    step_count: u64,
    horizon: f64,
    horizon_increment: f64,
}

impl Session {
    /// Session using the default deck (`MELIN`) and log (`MELOG`) names.
    #[must_use]
    pub fn new(id: impl Into<String>, dir: PathBuf, horizon_increment: f64) -> Self {
        Self::with_file_names(id, dir, horizon_increment, "MELIN", "MELOG")
    }

    /// Session with explicit deck and simulator log names.
    #[must_use]
    pub fn with_file_names(
        id: impl Into<String>,
        dir: PathBuf,
        horizon_increment: f64,
        deck_file: &str,
        log_file: &str,
    ) -> Self {
        Self {
            id: id.into(),
            deck: DeckStore::new(dir.join(deck_file)),
            deck_file: deck_file.to_string(),
            log_path: dir.join(log_file),
            dir,
            step_count: 0,
            horizon: 0.0,
            horizon_increment,
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Absolute session directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The session's mutable deck.
    #[must_use]
    pub const fn deck(&self) -> &DeckStore {
        &self.deck
    }

    /// Deck file name relative to the session directory.
    #[must_use]
    pub fn deck_file_name(&self) -> &str {
        &self.deck_file
    }

    /// Simulator console log.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Control steps taken, counting the reset as the first.
    #[must_use]
    pub const fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Horizon last written into the deck.
    #[must_use]
    pub const fn horizon(&self) -> f64 {
        self.horizon
    }

    /// Simulated time advanced per step.
    #[must_use]
    pub const fn horizon_increment(&self) -> f64 {
        self.horizon_increment
    }

    pub(crate) fn set_step_count(&mut self, step_count: u64) {
        self.step_count = step_count;
    }

    pub(crate) fn set_horizon(&mut self, horizon: f64) {
        self.horizon = horizon;
    }

    /// Locates the output stream: the configured file, or else the first file
    /// (by name) carrying the configured extension.
    pub fn output_path(&self, output: &OutputConfig) -> SessionResult<PathBuf> {
        if let Some(name) = &output.file_name {
            return Ok(self.dir.join(name));
        }
        let extension = OsStr::new(&output.extension);
        let mut candidates: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension() == Some(extension))
            .collect();
        candidates.sort();
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::OutputNotFound(self.dir.clone()))
    }
}

/// Lifecycle state of a [`SimulationSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No episode running.
    Created,
    /// Waiting for the next action.
    Ready,
    /// A step is in progress.
    Stepping,
    /// The policy ended the episode.
    Terminated,
    /// A limit cut the episode short.
    Truncated,
    /// A fatal error ended the episode.
    Failed,
}

impl SessionState {
    /// `true` for states from which `reset` starts a new episode.
    #[must_use]
    pub const fn can_reset(self) -> bool {
        !matches!(self, Self::Ready | Self::Stepping)
    }
}

/// Result of [`SimulationSession::reset`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetOutcome {
    /// Initial observation, shaped by the policy.
    pub observation: Vec<f64>,
    /// Diagnostics; `record` holds the baseline.
    pub info: StepInfo,
}

/// Result of [`SimulationSession::step`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    /// Latest tracked variable values.
    pub observation: Vec<f64>,
    /// Policy reward.
    pub reward: f64,
    /// Episode ended by the task dynamics.
    pub terminated: bool,
    /// Episode cut by a limit.
    pub truncated: bool,
    /// Diagnostics.
    pub info: StepInfo,
}

/// Result of [`SimulationSession::render`].
#[derive(Debug, Clone, PartialEq)]
pub enum RenderStatus {
    /// Fewer than two steps completed.
    Skipped,
    /// The record handed to the presenter.
    Rendered(ObservationRecord),
    /// Rendering failed; the reason was logged.
    Unavailable(String),
}

/// Result of [`SimulationSession::close`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloseSummary {
    /// Files kept in the session directory.
    pub retained: Vec<PathBuf>,
    /// Files deleted.
    pub removed: Vec<PathBuf>,
}

/// Builder for [`SimulationSession`].
pub struct SimulationSessionBuilder {
    config: SessionConfig,
    catalog: Option<Box<dyn DeckCatalog>>,
    policy: Option<Box<dyn RewardPolicy>>,
    presenter: Option<Box<dyn Presenter>>,
    telemetry: Option<SessionTelemetry>,
}

impl SimulationSessionBuilder {
    /// Starts a builder from a configuration.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            catalog: None,
            policy: None,
            presenter: None,
            telemetry: None,
        }
    }

    /// Overrides the deck catalog parsed from the template deck.
    #[must_use]
    pub fn catalog(mut self, catalog: impl DeckCatalog + 'static) -> Self {
        self.catalog = Some(Box::new(catalog));
        self
    }

    /// Overrides the configured reward policy.
    #[must_use]
    pub fn policy(mut self, policy: impl RewardPolicy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Sets the presenter used by `render`.
    #[must_use]
    pub fn presenter(mut self, presenter: impl Presenter + 'static) -> Self {
        self.presenter = Some(Box::new(presenter));
        self
    }

    /// Uses an existing telemetry handle instead of the configured log.
    #[must_use]
    pub fn telemetry(mut self, telemetry: SessionTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Validates the configuration and assembles the session.
    ///
    /// Nothing is written to disk until the first `reset`.
    pub fn build(self) -> SessionResult<SimulationSession> {
        let config = self.config;
        config.validate()?;
        let runner = ProcessRunner::new(
            config.executables.initialize.clone(),
            config.executables.advance.clone(),
        )?;
        let catalog: Box<dyn DeckCatalog> = match self.catalog {
            Some(catalog) => catalog,
            None => Box::new(TextDeckCatalog::load(
                &config.session.deck,
                config.deck_format.record_suffix.as_str(),
            )?),
        };
        let known = catalog.control_factors();
        if let Some(missing) = config
            .session
            .control_factors
            .iter()
            .find(|id| !known.iter().any(|record| &record.id == *id))
        {
            return Err(SessionError::UnknownControlFactor(missing.clone()));
        }
        let variables = catalog.tracked_variables();
        if variables.is_empty() {
            return Err(SessionError::InvalidConfig(
                "deck declares no tracked variables".into(),
            ));
        }

        let id = config
            .session
            .session_id
            .clone()
            .unwrap_or_else(|| generate_id(&config.session.deck));
        let root = if config.session.output_root.is_absolute() {
            config.session.output_root.clone()
        } else {
            env::current_dir()?.join(&config.session.output_root)
        };
        let session = Session::with_file_names(
            id.clone(),
            root.join(&id),
            config.session.control_horizon,
            &config.session.deck_file,
            &config.session.simulator_log,
        );

        let telemetry = match self.telemetry {
            Some(telemetry) => telemetry,
            None => SessionTelemetry::builder("session")
                .maybe_log_path(config.session.telemetry_log.clone())
                .build()
                .map_err(|err| SessionError::InvalidConfig(format!("telemetry: {err:#}")))?,
        };

        Ok(SimulationSession {
            policy: self.policy.unwrap_or_else(|| config.policy.build()),
            presenter: self
                .presenter
                .unwrap_or_else(|| Box::new(NullPresenter)),
            mutator: DeckMutator::new(config.deck_format.clone()),
            tail: OutputTailReader::new(config.output.tail_window),
            state: SessionState::Created,
            baseline: None,
            catalog,
            runner,
            telemetry,
            variables,
            session,
            config,
        })
    }
}

/// One simulator driven as a gym-like control environment.
pub struct SimulationSession {
    config: SessionConfig,
    session: Session,
    state: SessionState,
    catalog: Box<dyn DeckCatalog>,
    mutator: DeckMutator,
    runner: ProcessRunner,
    tail: OutputTailReader,
    policy: Box<dyn RewardPolicy>,
    presenter: Box<dyn Presenter>,
    telemetry: SessionTelemetry,
    variables: Vec<String>,
    baseline: Option<Baseline>,
}

impl std::fmt::Debug for SimulationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationSession")
            .field("session", &self.session)
            .field("state", &self.state)
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

impl SimulationSession {
    /// Returns a builder.
    #[must_use]
    pub fn builder(config: SessionConfig) -> SimulationSessionBuilder {
        SimulationSessionBuilder::new(config)
    }

    /// Session data.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.session.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration the session was built from.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Tracked variables in observation order.
    #[must_use]
    pub fn tracked_variables(&self) -> &[String] {
        &self.variables
    }

    /// Controlled factors in action order.
    #[must_use]
    pub fn control_factors(&self) -> &[String] {
        &self.config.session.control_factors
    }

    /// Baseline captured at the first reset.
    #[must_use]
    pub const fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    /// Starts a fresh episode.
    pub fn reset(&mut self) -> SessionResult<ResetOutcome> {
        if !self.state.can_reset() {
            return Err(SessionError::InvalidTransition { state: self.state });
        }
        match self.try_reset() {
            Ok(outcome) => {
                self.state = SessionState::Ready;
                self.record(
                    LogLevel::Info,
                    "session.reset",
                    json!({
                        "dir": self.session.dir().display().to_string(),
                        "horizon": outcome.info.horizon,
                        "baseline": &outcome.info.record,
                    }),
                );
                Ok(outcome)
            }
            Err(err) => Err(self.fail("reset", err)),
        }
    }

    /// Applies one action and advances the simulator by one control horizon.
    ///
    /// `action[i]` drives `control_factors()[i]`. A call outside the `Ready`
    /// state, or with the wrong number of components, changes nothing.
    pub fn step(&mut self, action: &[f64]) -> SessionResult<StepOutcome> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotReset { state: self.state });
        }
        let expected = self.config.session.control_factors.len();
        if action.len() != expected {
            return Err(SessionError::ActionArityMismatch {
                expected,
                found: action.len(),
            });
        }

        self.state = SessionState::Stepping;
        match self.try_step(action) {
            Ok(outcome) => {
                self.state = if outcome.terminated {
                    SessionState::Terminated
                } else if outcome.truncated {
                    SessionState::Truncated
                } else {
                    SessionState::Ready
                };
                self.record(
                    LogLevel::Info,
                    "session.step",
                    json!({
                        "time": outcome.info.time,
                        "horizon": outcome.info.horizon,
                        "action": &outcome.info.action,
                        "reward": outcome.reward,
                        "terminated": outcome.terminated,
                        "truncated": outcome.truncated,
                    }),
                );
                Ok(outcome)
            }
            Err(err) => Err(self.fail("step", err)),
        }
    }

    /// Hands the latest record to the presenter once two steps have completed.
    ///
    /// Failures are logged and reported, never raised.
    pub fn render(&mut self) -> RenderStatus {
        if self.session.step_count() < 3 {
            return RenderStatus::Skipped;
        }
        let outcome = self
            .latest_record()
            .and_then(|record| self.presenter.present(&record).map(|()| record).map_err(Into::into));
        match outcome {
            Ok(record) => RenderStatus::Rendered(record),
            Err(err) => {
                let reason = err.to_string();
                tracing::warn!(session = self.session.id(), %reason, "render failed");
                self.record(
                    LogLevel::Warn,
                    "session.render.failed",
                    json!({ "reason": &reason }),
                );
                RenderStatus::Unavailable(reason)
            }
        }
    }

    /// Deletes every file in the session directory except the retained output
    /// streams, and returns the session to `Created`.
    pub fn close(&mut self) -> SessionResult<CloseSummary> {
        let mut summary = CloseSummary::default();
        let dir = self.session.dir().to_path_buf();
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if self
                    .config
                    .output
                    .retain_suffixes
                    .iter()
                    .any(|suffix| name.ends_with(suffix.as_str()))
                {
                    summary.retained.push(path);
                    continue;
                }
                let removed = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => summary.removed.push(path),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "could not remove session file");
                    }
                }
            }
        }
        summary.retained.sort();
        summary.removed.sort();
        self.record(
            LogLevel::Info,
            "session.close",
            json!({
                "retained": summary.retained.len(),
                "removed": summary.removed.len(),
            }),
        );
        self.state = SessionState::Created;
        self.session.set_step_count(0);
        Ok(summary)
    }

    fn try_reset(&mut self) -> SessionResult<ResetOutcome> {
        let dir = self.session.dir().to_path_buf();
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        fs::create_dir_all(&dir)?;
        self.session.deck().copy_from(&self.config.session.deck)?;

        self.session.set_step_count(1);
        let horizon = self.mutator.set_time_horizon(&mut self.session)?;
        let report = self.runner.run_initialize(&self.session)?;
        self.record_process(&report);

        if self.baseline.is_none() {
            let baseline = match &self.config.baseline {
                BaselineSource::InitialRecord => Baseline::from_record(&self.latest_record()?),
                source => Baseline::capture(source, self.catalog.as_ref(), &self.variables)?,
            };
            self.baseline = Some(baseline);
        }
        self.mutator.inject_control_block(
            &self.session,
            self.catalog.as_ref(),
            &self.config.session.control_factors,
        )?;

        let baseline = self.current_baseline()?;
        Ok(ResetOutcome {
            observation: self.policy.initial_observation(baseline),
            info: StepInfo {
                step: self.session.step_count(),
                time: 0.0,
                horizon,
                record: baseline.as_map().clone(),
                action: Vec::new(),
            },
        })
    }

    fn try_step(&mut self, action: &[f64]) -> SessionResult<StepOutcome> {
        let scaled = self.config.actions.apply(action);
        self.session.set_step_count(self.session.step_count() + 1);
        let horizon = self.mutator.set_time_horizon(&mut self.session)?;
        self.mutator
            .apply_action(&self.session, &self.config.session.control_factors, &scaled)?;
        let report = self.runner.run_advance(&self.session)?;
        self.record_process(&report);

        let record = self.latest_record()?;
        let observation = record.observation();
        let info = StepInfo {
            step: self.session.step_count(),
            time: record.time,
            horizon,
            record: record.values,
            action: scaled,
        };
        let baseline = self.current_baseline()?;
        Ok(StepOutcome {
            reward: self.policy.reward(&observation, baseline, &info),
            terminated: self.policy.terminated(&observation, baseline, &info),
            truncated: self.policy.truncated(&observation, baseline, &info),
            observation,
            info,
        })
    }

    fn latest_record(&self) -> SessionResult<ObservationRecord> {
        let output = self.session.output_path(&self.config.output)?;
        self.tail.last_record(&output, &self.variables)
    }

    fn current_baseline(&self) -> SessionResult<&Baseline> {
        self.baseline
            .as_ref()
            .ok_or_else(|| SessionError::NotReset { state: self.state })
    }

    fn fail(&mut self, operation: &str, err: SessionError) -> SessionError {
        self.state = SessionState::Failed;
        tracing::warn!(session = self.session.id(), operation, error = %err, "episode failed");
        self.record(
            LogLevel::Error,
            &format!("session.{operation}.failed"),
            json!({ "error": err.to_string() }),
        );
        err
    }

    fn record_process(&self, report: &ProcessReport) {
        let metadata = serde_json::to_value(report).unwrap_or(Value::Null);
        self.record(LogLevel::Debug, "process.exit", metadata);
    }

    fn record(&self, level: LogLevel, event: &str, metadata: Value) {
        if let Err(err) = self.telemetry.log_step(
            level,
            event,
            self.session.id(),
            self.session.step_count(),
            metadata,
        ) {
            tracing::warn!(event, error = %err, "telemetry write failed");
        }
    }
}

fn generate_id(deck: &Path) -> String {
    let stem = deck
        .file_stem()
        .map_or_else(|| "session".to_string(), |stem| stem.to_string_lossy().into_owned());
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{stem}_{}_{}",
        Utc::now().format("%Y_%m_%d-%H_%M_%S"),
        &suffix[..8]
    )
}
