use std::{
    fs::OpenOptions,
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::{
    config::ExecutableConfig,
    error::{SessionError, SessionResult},
    session::Session,
};

/// The two simulator phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Builds the initial state from the deck.
    Initialize,
    /// Advances the simulation to the deck horizon.
    Advance,
}

impl Phase {
    /// Short lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Advance => "advance",
        }
    }
}

/// Outcome of a successful phase run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Phase that ran.
    pub phase: Phase,
    /// Exit code reported by the process.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of the run.
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

/// Runs the simulator executables inside a session directory.
///
/// Both phases block until the process exits. Output goes to the session's
/// simulator log, never to the caller's console.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    initialize: ExecutableConfig,
    advance: ExecutableConfig,
}

impl ProcessRunner {
    /// Validates that both executables exist.
    pub fn new(initialize: ExecutableConfig, advance: ExecutableConfig) -> SessionResult<Self> {
        for exe in [&initialize, &advance] {
            if !exe.path.is_file() {
                return Err(SessionError::ExecutableNotFound(exe.path.clone()));
            }
        }
        Ok(Self {
            initialize,
            advance,
        })
    }

    /// Runs the initialization phase.
    pub fn run_initialize(&self, session: &Session) -> SessionResult<ProcessReport> {
        self.run(Phase::Initialize, session)
    }

    /// Runs the advance phase.
    pub fn run_advance(&self, session: &Session) -> SessionResult<ProcessReport> {
        self.run(Phase::Advance, session)
    }

    fn run(&self, phase: Phase, session: &Session) -> SessionResult<ProcessReport> {
        let exe = match phase {
            Phase::Initialize => &self.initialize,
            Phase::Advance => &self.advance,
        };
        let args = exe.args_for(&session.deck_file_name());
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(session.log_path())?;
        let stderr = stdout.try_clone()?;

        let started = Instant::now();
        let status = Command::new(&exe.path)
            .args(&args)
            .current_dir(session.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .map_err(|source| SessionError::ProcessLaunch {
                phase,
                program: exe.path.clone(),
                source,
            })?;
        let elapsed = started.elapsed();

        tracing::debug!(
            phase = phase.label(),
            program = %exe.path.display(),
            code = ?status.code(),
            elapsed_ms = elapsed.as_millis(),
            "simulator phase finished"
        );
        if !status.success() {
            return Err(SessionError::ProcessFailed {
                phase,
                exit_code: status.code(),
            });
        }
        Ok(ProcessReport {
            phase,
            exit_code: status.code(),
            elapsed,
        })
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(value.as_millis())
    }
}
