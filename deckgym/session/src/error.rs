use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{runner::Phase, session::SessionState};

/// Errors surfaced by the session crate.
///
/// Deck, parse and process errors are fatal to the current episode: the
/// session moves to [`SessionState::Failed`] and nothing is retried.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The deck has no time-horizon register line.
    #[error("no `{keyword}` register found in {}", .path.display())]
    MissingTimeHorizonRegister {
        /// Keyword that was searched for.
        keyword: String,
        /// Deck that was searched.
        path: PathBuf,
    },
    /// The injected control block is missing from the deck.
    #[error("control block marker `{marker}` not found in {}", .path.display())]
    MarkerNotFound {
        /// Marker line that was searched for.
        marker: String,
        /// Deck that was searched.
        path: PathBuf,
    },
    /// The action does not line up with the declared control factors.
    #[error("action has {found} components but {expected} control factor records are available")]
    ActionArityMismatch {
        /// Number of control factor records expected or found in the deck.
        expected: usize,
        /// Number of action components supplied.
        found: usize,
    },
    /// The output stream holds fewer tokens than one full record.
    #[error("output {} holds {found} tokens, need {expected} for one record", .path.display())]
    EmptyOrTruncatedOutput {
        /// Output stream path.
        path: PathBuf,
        /// Tokens required for one record.
        expected: usize,
        /// Tokens actually available.
        found: usize,
    },
    /// A record token is not a number.
    #[error("non-numeric token `{token}` in {}", .path.display())]
    NonNumericToken {
        /// Offending token.
        token: String,
        /// Output stream path.
        path: PathBuf,
    },
    /// A simulator phase exited unsuccessfully.
    #[error("{} phase failed with exit code {}", .phase.label(), describe_exit(.exit_code.as_ref()))]
    ProcessFailed {
        /// Phase that failed.
        phase: Phase,
        /// Exit code, `None` when the process was killed by a signal.
        exit_code: Option<i32>,
    },
    /// A simulator executable could not be launched.
    #[error("failed to launch {} phase ({}): {source}", .phase.label(), .program.display())]
    ProcessLaunch {
        /// Phase being launched.
        phase: Phase,
        /// Program path.
        program: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// `step` was called outside the `Ready` state.
    #[error("step() requires a ready session (call reset() first); current state is {state:?}")]
    NotReset {
        /// State the session was in.
        state: SessionState,
    },
    /// `reset` was called while an episode is still running.
    #[error("reset() is not allowed in state {state:?}")]
    InvalidTransition {
        /// State the session was in.
        state: SessionState,
    },
    /// A requested control factor is not defined in the deck.
    #[error("control factor `{0}` is not defined in the deck")]
    UnknownControlFactor(String),
    /// An entity field used for the baseline is missing or not numeric.
    #[error("entity `{entity}` has no numeric field `{field}`")]
    UnknownEntityField {
        /// Entity identifier.
        entity: String,
        /// Field name.
        field: String,
    },
    /// A simulator executable does not exist.
    #[error("simulator executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),
    /// The output stream could not be located.
    #[error("output stream not found in {}", .0.display())]
    OutputNotFound(PathBuf),
    /// Session configuration is inconsistent.
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    /// Filesystem I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Returns `true` for caller contract violations rather than runtime faults.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::NotReset { .. } | Self::InvalidTransition { .. } | Self::ActionArityMismatch { .. }
        )
    }
}

fn describe_exit(code: Option<&i32>) -> String {
    code.map_or_else(|| "none (terminated by signal)".to_string(), ToString::to_string)
}

/// Convenience alias used across the crate.
pub type SessionResult<T> = Result<T, SessionError>;
