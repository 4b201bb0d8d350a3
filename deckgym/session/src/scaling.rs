use rand::Rng;
use serde::Deserialize;

/// Bounds applied to every action component before it reaches the deck.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ActionBounds {
    /// Lower bound in deck units.
    #[serde(default = "default_min")]
    pub min: f64,
    /// Upper bound in deck units.
    #[serde(default = "default_max")]
    pub max: f64,
    /// When set, incoming actions live in `[-1, 1]` and are mapped onto `[min, max]`.
    #[serde(default)]
    pub normalized: bool,
}

impl Default for ActionBounds {
    fn default() -> Self {
        Self {
            min: default_min(),
            max: default_max(),
            normalized: false,
        }
    }
}

impl ActionBounds {
    /// Bounds in deck units, optionally normalized.
    #[must_use]
    pub const fn new(min: f64, max: f64, normalized: bool) -> Self {
        Self {
            min,
            max,
            normalized,
        }
    }

    /// Maps one action component to deck units and clips it.
    #[must_use]
    pub fn scale(&self, value: f64) -> f64 {
        let value = if self.normalized {
            self.min + (value.clamp(-1.0, 1.0) + 1.0) * 0.5 * (self.max - self.min)
        } else {
            value
        };
        value.clamp(self.min, self.max)
    }

    /// Applies [`Self::scale`] to every component.
    #[must_use]
    pub fn apply(&self, action: &[f64]) -> Vec<f64> {
        action.iter().map(|value| self.scale(*value)).collect()
    }

    /// Draws a uniform action in the caller's space: `[-1, 1]` when normalized,
    /// `[min, max]` otherwise.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, len: usize) -> Vec<f64> {
        let (low, high) = if self.normalized {
            (-1.0, 1.0)
        } else {
            (self.min, self.max)
        };
        (0..len).map(|_| rng.gen_range(low..=high)).collect()
    }

    /// Returns `true` when the bounds describe a usable range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min < self.max
    }
}

const fn default_min() -> f64 {
    0.0
}

const fn default_max() -> f64 {
    1.0e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn raw_actions_are_clipped() {
        let bounds = ActionBounds::new(0.0, 10.0, false);
        assert_eq!(bounds.apply(&[-3.0, 4.5, 12.0]), vec![0.0, 4.5, 10.0]);
    }

    #[test]
    fn normalized_actions_are_denormalized() {
        let bounds = ActionBounds::new(0.0, 10.0, true);
        assert_eq!(bounds.apply(&[-1.0, 0.0, 1.0, 3.0]), vec![0.0, 5.0, 10.0, 10.0]);
    }

    #[test]
    fn samples_stay_in_the_caller_space() {
        let mut rng = SmallRng::seed_from_u64(7);
        let raw = ActionBounds::new(2.0, 4.0, false);
        assert!(raw.sample(&mut rng, 32).iter().all(|v| (2.0..=4.0).contains(v)));
        let normalized = ActionBounds::new(2.0, 4.0, true);
        assert!(normalized
            .sample(&mut rng, 32)
            .iter()
            .all(|v| (-1.0..=1.0).contains(v)));
        assert!(!ActionBounds::new(1.0, 1.0, false).is_valid());
    }
}
