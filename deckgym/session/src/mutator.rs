use serde::Deserialize;

use crate::{
    catalog::DeckCatalog,
    deck::{locate, locate_all},
    error::{SessionError, SessionResult},
    session::Session,
};

/// Opening delimiter of the injected control block. `apply_action` anchors on it.
pub const CONTROL_BLOCK_OPEN: &str =
    "****************************** CONTROLLERS ******************************";
/// Closing delimiter of the injected control block.
pub const CONTROL_BLOCK_CLOSE: &str =
    "*************************************************************************";

/// Deck dialect: which lines the mutator reads and rewrites.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DeckFormat {
    /// First token of the time-horizon register line.
    #[serde(default = "default_horizon_keyword")]
    pub horizon_keyword: String,
    /// Line after which the control block is inserted.
    #[serde(default = "default_insertion_marker")]
    pub insertion_marker: String,
    /// Suffix identifying a control factor header record.
    #[serde(default = "default_record_suffix")]
    pub record_suffix: String,
    /// Token index of the mutable value on a header record.
    #[serde(default = "default_value_field_index")]
    pub value_field_index: usize,
}

impl Default for DeckFormat {
    fn default() -> Self {
        Self {
            horizon_keyword: default_horizon_keyword(),
            insertion_marker: default_insertion_marker(),
            record_suffix: default_record_suffix(),
            value_field_index: default_value_field_index(),
        }
    }
}

/// Domain operations on a session deck.
#[derive(Debug, Clone, Default)]
pub struct DeckMutator {
    format: DeckFormat,
}

impl DeckMutator {
    /// Creates a mutator for the given deck dialect.
    #[must_use]
    pub const fn new(format: DeckFormat) -> Self {
        Self { format }
    }

    /// Deck dialect in use.
    #[must_use]
    pub const fn format(&self) -> &DeckFormat {
        &self.format
    }

    /// Rewrites the time-horizon register to `increment * step_count` and
    /// records the value on the session.
    ///
    /// The horizon is absolute: it only depends on the current step count,
    /// never on the value previously written.
    pub fn set_time_horizon(&self, session: &mut Session) -> SessionResult<f64> {
        let deck = session.deck();
        let mut lines = deck.read_lines()?;
        let keyword = self.format.horizon_keyword.as_str();
        let registers = locate_all(&lines, |line| line.split_whitespace().next() == Some(keyword));
        if registers.len() > 1 {
            tracing::warn!(
                keyword,
                count = registers.len(),
                "time horizon register matched several lines, rewriting the first"
            );
        }
        let idx = *registers
            .first()
            .ok_or_else(|| SessionError::MissingTimeHorizonRegister {
                keyword: keyword.to_string(),
                path: deck.path().to_path_buf(),
            })?;
        let horizon = horizon_for(session.horizon_increment(), session.step_count());
        lines[idx] = format!("{keyword} {horizon}");
        deck.write_lines(&lines)?;
        session.set_horizon(horizon);
        Ok(horizon)
    }

    /// Inserts the control block holding one header per controlled factor,
    /// in `control_ids` order. Returns the index of the opening delimiter.
    ///
    /// The block goes right after the insertion marker, or before the final
    /// line when the deck has no marker. With several markers the first wins.
    pub fn inject_control_block(
        &self,
        session: &Session,
        catalog: &dyn DeckCatalog,
        control_ids: &[String],
    ) -> SessionResult<usize> {
        let records = catalog.control_factors();
        let headers = control_ids
            .iter()
            .map(|id| {
                records
                    .iter()
                    .find(|record| &record.id == id)
                    .map(|record| record.header.clone())
                    .ok_or_else(|| SessionError::UnknownControlFactor(id.clone()))
            })
            .collect::<SessionResult<Vec<_>>>()?;

        let deck = session.deck();
        let mut lines = deck.read_lines()?;
        let marker = self.format.insertion_marker.as_str();
        let markers = locate_all(&lines, |line| line.contains(marker));
        if markers.len() > 1 {
            tracing::warn!(
                marker,
                count = markers.len(),
                "insertion marker matched several lines, using the first"
            );
        }
        let insert_at = markers
            .first()
            .map_or_else(|| lines.len().saturating_sub(1), |idx| idx + 1);

        let mut block = Vec::with_capacity(headers.len() + 3);
        block.push(String::new());
        block.push(CONTROL_BLOCK_OPEN.to_string());
        block.extend(headers);
        block.push(CONTROL_BLOCK_CLOSE.to_string());
        lines.splice(insert_at..insert_at, block);
        deck.write_lines(&lines)?;
        Ok(insert_at + 1)
    }

    /// Writes each action component into the value field of the matching
    /// header inside the control block. `action[i]` belongs to
    /// `control_ids[i]`; every other line is left untouched.
    pub fn apply_action(
        &self,
        session: &Session,
        control_ids: &[String],
        action: &[f64],
    ) -> SessionResult<usize> {
        if action.len() != control_ids.len() {
            return Err(SessionError::ActionArityMismatch {
                expected: control_ids.len(),
                found: action.len(),
            });
        }
        let deck = session.deck();
        let mut lines = deck.read_lines()?;
        let open = locate(&lines, |line| line.trim() == CONTROL_BLOCK_OPEN).ok_or_else(|| {
            SessionError::MarkerNotFound {
                marker: CONTROL_BLOCK_OPEN.to_string(),
                path: deck.path().to_path_buf(),
            }
        })?;

        let field = self.format.value_field_index;
        let mut updated = 0;
        for line in lines.iter_mut().skip(open + 1) {
            if updated == action.len() || line.trim() == CONTROL_BLOCK_CLOSE {
                break;
            }
            let mut tokens: Vec<String> = line.split_whitespace().map(ToOwned::to_owned).collect();
            if tokens.len() <= field {
                continue;
            }
            let Some(position) = tokens[0]
                .strip_suffix(self.format.record_suffix.as_str())
                .and_then(|id| control_ids.iter().position(|cf| cf == id))
            else {
                continue;
            };
            tokens[field] = action[position].to_string();
            *line = tokens.join(" ");
            updated += 1;
        }
        if updated < action.len() {
            return Err(SessionError::ActionArityMismatch {
                expected: updated,
                found: action.len(),
            });
        }
        deck.write_lines(&lines)?;
        Ok(updated)
    }
}

/// Decimal places kept in a written horizon.
const HORIZON_DECIMALS: i32 = 9;

/// Absolute horizon for a step count, rounded to [`HORIZON_DECIMALS`] places.
#[must_use]
pub fn horizon_for(increment: f64, step_count: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let steps = step_count as f64;
    let scale = 10f64.powi(HORIZON_DECIMALS);
    (increment * steps * scale).round() / scale
}

fn default_horizon_keyword() -> String {
    "TEND".into()
}

fn default_insertion_marker() -> String {
    "*EOR* MELCOR".into()
}

fn default_record_suffix() -> String {
    "00".into()
}

const fn default_value_field_index() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::TextDeckCatalog,
        deck::DeckStore,
        testkit::{write_deck, SAMPLE_DECK},
    };
    use tempfile::tempdir;

    fn session_in(dir: &std::path::Path, increment: f64) -> Session {
        let template = write_deck(dir);
        let session = Session::new("unit", dir.join("session"), increment);
        std::fs::create_dir_all(session.dir()).unwrap();
        session.deck().copy_from(&template).unwrap();
        session
    }

    fn ids() -> Vec<String> {
        vec!["CF101".into(), "CF202".into()]
    }

    #[test]
    fn horizon_is_a_pure_function_of_step_count() {
        let dir = tempdir().unwrap();
        let mut session = session_in(dir.path(), 10.0);
        let mutator = DeckMutator::default();

        session.set_step_count(1);
        assert_eq!(mutator.set_time_horizon(&mut session).unwrap(), 10.0);
        assert!(session.deck().read_lines().unwrap().contains(&"TEND 10".to_string()));

        session.set_step_count(2);
        assert_eq!(mutator.set_time_horizon(&mut session).unwrap(), 20.0);
        // Rewriting the same step twice must not accumulate.
        assert_eq!(mutator.set_time_horizon(&mut session).unwrap(), 20.0);

        session.set_step_count(7);
        assert_eq!(mutator.set_time_horizon(&mut session).unwrap(), 70.0);
        assert_eq!(session.horizon(), 70.0);
        let lines = session.deck().read_lines().unwrap();
        assert_eq!(lines.iter().filter(|l| l.starts_with("TEND")).count(), 1);
        assert!(lines.contains(&"TEND 70".to_string()));
    }

    #[test]
    fn fractional_increments_write_clean_horizons() {
        assert_eq!(horizon_for(0.1, 3).to_string(), "0.3");
        assert_eq!(horizon_for(0.7, 10).to_string(), "7");
        assert_eq!(horizon_for(2.5, 4), 10.0);

        let dir = tempdir().unwrap();
        let mut session = session_in(dir.path(), 0.1);
        session.set_step_count(3);
        DeckMutator::default().set_time_horizon(&mut session).unwrap();
        assert!(session.deck().read_lines().unwrap().contains(&"TEND 0.3".to_string()));
    }

    #[test]
    fn only_the_first_of_several_registers_is_rewritten() {
        let dir = tempdir().unwrap();
        let mut session = Session::new("unit", dir.path().to_path_buf(), 5.0);
        session
            .deck()
            .write_lines(&["TEND 0".into(), "TITLE x".into(), "TEND 99".into()])
            .unwrap();
        session.set_step_count(2);
        DeckMutator::default().set_time_horizon(&mut session).unwrap();
        assert_eq!(
            session.deck().read_lines().unwrap(),
            vec!["TEND 10".to_string(), "TITLE x".into(), "TEND 99".into()]
        );
    }

    #[test]
    fn missing_register_is_reported() {
        let dir = tempdir().unwrap();
        let mut session = Session::new("unit", dir.path().to_path_buf(), 5.0);
        DeckStore::new(session.deck().path())
            .write_lines(&["TITLE x".into()])
            .unwrap();
        session.set_step_count(1);
        let err = DeckMutator::default()
            .set_time_horizon(&mut session)
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingTimeHorizonRegister { .. }));
    }

    #[test]
    fn control_block_lands_after_marker() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path(), 10.0);
        let catalog = TextDeckCatalog::parse(SAMPLE_DECK, "00");
        let open = DeckMutator::default()
            .inject_control_block(&session, &catalog, &ids())
            .unwrap();

        let lines = session.deck().read_lines().unwrap();
        assert_eq!(lines[open - 2], "*EOR* MELCOR");
        assert_eq!(lines[open], CONTROL_BLOCK_OPEN);
        assert_eq!(lines[open + 1], "CF10100 'OVERPRESSURE' MULTIPLY 2 1.0");
        assert_eq!(lines[open + 2], "CF20200 'UNDERPRESSURE' MULTIPLY 2 1.0");
        assert_eq!(lines[open + 3], CONTROL_BLOCK_CLOSE);
        assert_eq!(lines[open + 4], "TITLE 'pressure control'");
    }

    #[test]
    fn control_block_falls_back_before_last_line() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path(), 10.0);
        let without_marker: Vec<String> = SAMPLE_DECK
            .lines()
            .filter(|line| !line.contains("*EOR*"))
            .map(ToOwned::to_owned)
            .collect();
        session.deck().write_lines(&without_marker).unwrap();
        let catalog = TextDeckCatalog::parse(SAMPLE_DECK, "00");

        DeckMutator::default()
            .inject_control_block(&session, &catalog, &ids()[..1])
            .unwrap();
        let lines = session.deck().read_lines().unwrap();
        let n = lines.len();
        assert_eq!(lines[n - 1], ".");
        assert_eq!(lines[n - 2], CONTROL_BLOCK_CLOSE);
        assert_eq!(lines[n - 3], "CF10100 'OVERPRESSURE' MULTIPLY 2 1.0");
    }

    #[test]
    fn unknown_control_factor_is_rejected() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path(), 10.0);
        let catalog = TextDeckCatalog::parse(SAMPLE_DECK, "00");
        let err = DeckMutator::default()
            .inject_control_block(&session, &catalog, &["CF999".to_string()])
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownControlFactor(id) if id == "CF999"));
    }

    #[test]
    fn apply_action_touches_only_controlled_records() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path(), 10.0);
        let catalog = TextDeckCatalog::parse(SAMPLE_DECK, "00");
        let mutator = DeckMutator::default();
        mutator
            .inject_control_block(&session, &catalog, &ids())
            .unwrap();
        let before = session.deck().read_lines().unwrap();

        assert_eq!(mutator.apply_action(&session, &ids(), &[1.5, 0.25]).unwrap(), 2);
        let after = session.deck().read_lines().unwrap();
        assert_eq!(before.len(), after.len());

        let changed: Vec<usize> = (0..before.len()).filter(|&i| before[i] != after[i]).collect();
        assert_eq!(changed.len(), 2);
        assert_eq!(after[changed[0]], "CF10100 'OVERPRESSURE' MULTIPLY 2 1.5");
        assert_eq!(after[changed[1]], "CF20200 'UNDERPRESSURE' MULTIPLY 2 0.25");
        // Definitions above the marker keep their scale.
        assert!(after.contains(&"CF10100 'OVERPRESSURE' MULTIPLY 2 1.0".to_string()));
    }

    #[test]
    fn apply_action_requires_the_control_block() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path(), 10.0);
        let err = DeckMutator::default()
            .apply_action(&session, &ids(), &[1.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, SessionError::MarkerNotFound { .. }));
    }

    #[test]
    fn apply_action_reports_missing_records() {
        let dir = tempdir().unwrap();
        let session = session_in(dir.path(), 10.0);
        let catalog = TextDeckCatalog::parse(SAMPLE_DECK, "00");
        let mutator = DeckMutator::default();
        mutator
            .inject_control_block(&session, &catalog, &ids()[..1])
            .unwrap();
        let before = session.deck().read_lines().unwrap();

        let err = mutator
            .apply_action(&session, &ids(), &[1.0, 2.0])
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::ActionArityMismatch { expected: 1, found: 2 }
        ));
        assert_eq!(session.deck().read_lines().unwrap(), before);

        let err = mutator.apply_action(&session, &ids(), &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ActionArityMismatch { expected: 2, found: 1 }
        ));
    }
}
