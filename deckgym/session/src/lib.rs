#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! DeckGym session – drives a file-configured, time-stepped simulator as a
//! reset/step/render/close control environment.

/// Deck object catalog.
pub mod catalog;

/// Session configuration.
pub mod config;

/// Whole-file deck storage.
pub mod deck;

/// Error types.
pub mod error;

/// Domain edits on the session deck.
pub mod mutator;

/// Reward and termination policies.
pub mod policy;

/// Render sinks.
pub mod presenter;

/// Observation records and baselines.
pub mod record;

/// Simulator process execution.
pub mod runner;

/// Action bounds.
pub mod scaling;

/// Session data and state machine.
pub mod session;

/// Tail reader for the output stream.
pub mod tail;

/// Structured telemetry.
pub mod telemetry;

#[cfg(test)]
mod testkit;

pub use catalog::{ControlFactorRecord, DeckCatalog, TextDeckCatalog};
pub use config::{ExecutableConfig, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use policy::{DeviationPolicy, PolicyConfig, RewardPolicy, SetpointPolicy, StepInfo};
pub use presenter::{ConsolePresenter, HistoryPresenter, NullPresenter, Presenter};
pub use record::{Baseline, BaselineSource, ObservationRecord};
pub use scaling::ActionBounds;
pub use session::{
    CloseSummary, RenderStatus, ResetOutcome, Session, SessionState, SimulationSession,
    SimulationSessionBuilder, StepOutcome,
};
pub use telemetry::{SessionTelemetry, SessionTelemetryBuilder};
