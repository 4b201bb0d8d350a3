//! Reward and termination policies.
//!
//! A policy is a pure function of the observation, the captured baseline and
//! the step info; the session never lets policies carry state across calls.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::record::Baseline;

/// Diagnostics attached to every reset and step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Step count after the transition.
    pub step: u64,
    /// Simulation time read from the latest record.
    pub time: f64,
    /// Time horizon written into the deck for this step.
    pub horizon: f64,
    /// Latest record keyed by tracked variable (the baseline after a reset).
    pub record: IndexMap<String, f64>,
    /// Action actually written to the deck, after scaling.
    pub action: Vec<f64>,
}

/// Task-specific reward and episode-end rules.
pub trait RewardPolicy: Send + Sync {
    /// Scalar reward for one step.
    fn reward(&self, observation: &[f64], baseline: &Baseline, info: &StepInfo) -> f64;

    /// `true` when the episode ended because of the task dynamics.
    fn terminated(&self, observation: &[f64], baseline: &Baseline, info: &StepInfo) -> bool;

    /// `true` when the episode was cut short by a limit.
    fn truncated(&self, observation: &[f64], baseline: &Baseline, info: &StepInfo) -> bool;

    /// Observation returned by `reset`.
    fn initial_observation(&self, baseline: &Baseline) -> Vec<f64> {
        vec![0.0; baseline.as_map().len()]
    }
}

/// Deviation-sum reward with warmup-gated termination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationPolicy {
    /// Largest tolerated absolute deviation.
    pub max_deviation: f64,
    /// Termination is only considered once the simulation time exceeds this.
    pub warmup_time: f64,
    /// Truncation threshold on simulation time.
    pub max_episode_len: f64,
}

impl RewardPolicy for DeviationPolicy {
    fn reward(&self, observation: &[f64], baseline: &Baseline, _info: &StepInfo) -> f64 {
        -baseline
            .deviations(observation)
            .iter()
            .map(|d| d.abs())
            .sum::<f64>()
    }

    fn terminated(&self, observation: &[f64], baseline: &Baseline, info: &StepInfo) -> bool {
        info.time > self.warmup_time
            && baseline
                .deviations(observation)
                .iter()
                .any(|d| d.abs() > self.max_deviation)
    }

    fn truncated(&self, _observation: &[f64], _baseline: &Baseline, info: &StepInfo) -> bool {
        info.time > self.max_episode_len
    }
}

/// Mean tracking error against fixed setpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointPolicy {
    /// Deviation beyond which the episode is cut.
    pub max_deviation: f64,
    /// Truncation threshold on simulation time.
    pub max_episode_len: f64,
}

impl RewardPolicy for SetpointPolicy {
    fn reward(&self, observation: &[f64], baseline: &Baseline, _info: &StepInfo) -> f64 {
        let deviations = baseline.deviations(observation);
        if deviations.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = deviations.len() as f64;
        -deviations.iter().map(|d| d.abs()).sum::<f64>() / count
    }

    fn terminated(&self, _observation: &[f64], _baseline: &Baseline, _info: &StepInfo) -> bool {
        false
    }

    fn truncated(&self, observation: &[f64], baseline: &Baseline, info: &StepInfo) -> bool {
        info.time >= self.max_episode_len
            || baseline
                .deviations(observation)
                .iter()
                .any(|d| d.abs() > self.max_deviation)
    }

    fn initial_observation(&self, baseline: &Baseline) -> Vec<f64> {
        baseline.values()
    }
}

/// Serializable policy selection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// See [`DeviationPolicy`].
    Deviation {
        /// Largest tolerated absolute deviation.
        #[serde(default = "default_max_deviation")]
        max_deviation: f64,
        /// Warmup time before termination is considered.
        #[serde(default)]
        warmup_time: f64,
        /// Truncation threshold on simulation time.
        #[serde(default = "default_max_episode_len")]
        max_episode_len: f64,
    },
    /// See [`SetpointPolicy`].
    Setpoint {
        /// Deviation beyond which the episode is cut.
        #[serde(default = "default_max_deviation")]
        max_deviation: f64,
        /// Truncation threshold on simulation time.
        #[serde(default = "default_max_episode_len")]
        max_episode_len: f64,
    },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::Deviation {
            max_deviation: default_max_deviation(),
            warmup_time: 0.0,
            max_episode_len: default_max_episode_len(),
        }
    }
}

impl PolicyConfig {
    /// Instantiates the configured policy.
    #[must_use]
    pub fn build(&self) -> Box<dyn RewardPolicy> {
        match *self {
            Self::Deviation {
                max_deviation,
                warmup_time,
                max_episode_len,
            } => Box::new(DeviationPolicy {
                max_deviation,
                warmup_time,
                max_episode_len,
            }),
            Self::Setpoint {
                max_deviation,
                max_episode_len,
            } => Box::new(SetpointPolicy {
                max_deviation,
                max_episode_len,
            }),
        }
    }
}

const fn default_max_deviation() -> f64 {
    1.0e3
}

const fn default_max_episode_len() -> f64 {
    1.0e4
}
