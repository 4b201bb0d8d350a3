use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::DeckCatalog,
    error::{SessionError, SessionResult},
};

/// One row of the simulator output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Simulation time of the record.
    pub time: f64,
    /// Tracked variable values keyed by name, in column order.
    pub values: IndexMap<String, f64>,
}

impl ObservationRecord {
    /// Builds a record by zipping names with values.
    #[must_use]
    pub fn from_columns(time: f64, names: &[String], values: &[f64]) -> Self {
        Self {
            time,
            values: names.iter().cloned().zip(values.iter().copied()).collect(),
        }
    }

    /// Values as a plain observation vector.
    #[must_use]
    pub fn observation(&self) -> Vec<f64> {
        self.values.values().copied().collect()
    }
}

/// Per-variable reference values, immutable once captured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    values: IndexMap<String, f64>,
}

impl Baseline {
    /// Baseline of zeros for the given variables.
    #[must_use]
    pub fn zeros(names: &[String]) -> Self {
        Self {
            values: names.iter().map(|name| (name.clone(), 0.0)).collect(),
        }
    }

    /// Captures a baseline from its configured source.
    pub fn capture(
        source: &BaselineSource,
        catalog: &dyn DeckCatalog,
        names: &[String],
    ) -> SessionResult<Self> {
        match source {
            BaselineSource::None => Ok(Self::zeros(names)),
            BaselineSource::InitialRecord => Err(SessionError::InvalidConfig(
                "initial_record baselines are read from the output stream".into(),
            )),
            BaselineSource::Setpoints { values } => {
                if values.len() != names.len() {
                    return Err(SessionError::InvalidConfig(format!(
                        "{} setpoints declared for {} tracked variables",
                        values.len(),
                        names.len()
                    )));
                }
                Ok(Self {
                    values: names.iter().cloned().zip(values.iter().copied()).collect(),
                })
            }
            BaselineSource::EntityField { field, entities } => {
                if entities.len() != names.len() {
                    return Err(SessionError::InvalidConfig(format!(
                        "{} baseline entities declared for {} tracked variables",
                        entities.len(),
                        names.len()
                    )));
                }
                let values = names
                    .iter()
                    .zip(entities)
                    .map(|(name, entity)| {
                        catalog
                            .entity_field(entity, field)
                            .and_then(|raw| raw.parse::<f64>().ok())
                            .map(|value| (name.clone(), value))
                            .ok_or_else(|| SessionError::UnknownEntityField {
                                entity: entity.clone(),
                                field: field.clone(),
                            })
                    })
                    .collect::<SessionResult<IndexMap<_, _>>>()?;
                Ok(Self { values })
            }
        }
    }

    /// Baseline equal to a record's values.
    #[must_use]
    pub fn from_record(record: &ObservationRecord) -> Self {
        Self {
            values: record.values.clone(),
        }
    }

    /// Reference values in variable order.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.values.values().copied().collect()
    }

    /// Named view of the reference values.
    #[must_use]
    pub const fn as_map(&self) -> &IndexMap<String, f64> {
        &self.values
    }

    /// Signed deviations `observation_i - baseline_i`.
    ///
    /// Missing baseline entries count as zero.
    #[must_use]
    pub fn deviations(&self, observation: &[f64]) -> Vec<f64> {
        observation
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                let reference = self.values.get_index(idx).map_or(0.0, |(_, v)| *v);
                value - reference
            })
            .collect()
    }
}

/// Where the baseline comes from.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaselineSource {
    /// Zero baseline.
    #[default]
    None,
    /// The record the initialize phase leaves in the output stream.
    InitialRecord,
    /// Declared setpoints, one per tracked variable.
    Setpoints {
        /// Values in tracked variable order.
        values: Vec<f64>,
    },
    /// Initial values read from deck entities, one entity per tracked variable.
    EntityField {
        /// Field holding the value, e.g. `PVOL`.
        field: String,
        /// Entity identifiers in tracked variable order.
        entities: Vec<String>,
    },
}
