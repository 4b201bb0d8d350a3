//! Deck object catalog: typed read access to the entries of a deck.
//!
//! The session only needs three capabilities from a deck library, captured by
//! [`DeckCatalog`]. [`TextDeckCatalog`] is the built-in line-oriented
//! implementation; any other implementation can be injected through the
//! session builder.
//!
//! Recognized lines for the text catalog:
//!
//! - control factor header: `CF10100 'OVERPRESSURE' MULTIPLY 2 1.0`, i.e. an
//!   identifier followed by the record suffix, then name, type, argument
//!   count and scale;
//! - entity field: `CV001 PVOL 101325.0`;
//! - tracked variable: `EDF00110 CVH-P.1`, an `EDF` record whose two-digit
//!   suffix is at least 10.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::SessionResult;

const CONTROL_FACTOR_PREFIX: &str = "CF";
const TRACKED_VARIABLE_PREFIX: &str = "EDF";
const TIME_PSEUDO_VARIABLE: &str = "TIME";
const HEADER_FIELDS: [&str; 4] = ["NAME", "TYPE", "NARGS", "SCALE"];

/// A control factor definition as found in the deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFactorRecord {
    /// Identifier without the record suffix, e.g. `CF101`.
    pub id: String,
    /// Header line exactly as written in the deck.
    pub header: String,
}

impl ControlFactorRecord {
    /// Whitespace tokens of the header line.
    #[must_use]
    pub fn tokens(&self) -> Vec<&str> {
        self.header.split_whitespace().collect()
    }
}

/// Read-only view over the objects declared in a deck.
pub trait DeckCatalog: Send + Sync {
    /// Control factor records in deck order.
    fn control_factors(&self) -> Vec<ControlFactorRecord>;

    /// Value of a named entity field, if present.
    fn entity_field(&self, id: &str, field: &str) -> Option<String>;

    /// Output channels recorded by the simulator, in column order, without the
    /// time pseudo-variable.
    fn tracked_variables(&self) -> Vec<String>;
}

/// Line-oriented deck catalog.
#[derive(Debug, Clone, Default)]
pub struct TextDeckCatalog {
    lines: Vec<String>,
    record_suffix: String,
}

impl TextDeckCatalog {
    /// Parses deck text using the given control factor record suffix.
    #[must_use]
    pub fn parse(text: &str, record_suffix: impl Into<String>) -> Self {
        Self {
            lines: text.lines().map(ToOwned::to_owned).collect(),
            record_suffix: record_suffix.into(),
        }
    }

    /// Loads and parses a deck file.
    pub fn load(path: impl AsRef<Path>, record_suffix: impl Into<String>) -> SessionResult<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text, record_suffix))
    }

    fn header_id<'a>(&self, token: &'a str) -> Option<&'a str> {
        let id = token.strip_suffix(self.record_suffix.as_str())?;
        (id.len() > CONTROL_FACTOR_PREFIX.len() && id.starts_with(CONTROL_FACTOR_PREFIX))
            .then_some(id)
    }

    fn header_for(&self, id: &str) -> Option<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .find(|line| {
                line.split_whitespace()
                    .next()
                    .and_then(|token| self.header_id(token))
                    == Some(id)
            })
    }
}

impl DeckCatalog for TextDeckCatalog {
    fn control_factors(&self) -> Vec<ControlFactorRecord> {
        self.lines
            .iter()
            .filter_map(|line| {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() <= HEADER_FIELDS.len() {
                    return None;
                }
                self.header_id(tokens[0]).map(|id| ControlFactorRecord {
                    id: id.to_string(),
                    header: line.trim_end().to_string(),
                })
            })
            .collect()
    }

    fn entity_field(&self, id: &str, field: &str) -> Option<String> {
        if let Some(position) = HEADER_FIELDS.iter().position(|name| *name == field) {
            if let Some(header) = self.header_for(id) {
                return header
                    .split_whitespace()
                    .nth(position + 1)
                    .map(|value| unquote(value).to_string());
            }
        }
        self.lines.iter().find_map(|line| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(entity), Some(name), Some(value)) if entity == id && name == field => {
                    Some(unquote(value).to_string())
                }
                _ => None,
            }
        })
    }

    fn tracked_variables(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|line| {
                let mut tokens = line.split_whitespace();
                let record = tokens.next()?;
                let digits = record.strip_prefix(TRACKED_VARIABLE_PREFIX)?;
                if digits.len() < 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let slot: u32 = digits[digits.len() - 2..].parse().ok()?;
                if slot < 10 {
                    return None;
                }
                tokens.next().map(|name| unquote(name).to_string())
            })
            .filter(|name| !name.eq_ignore_ascii_case(TIME_PSEUDO_VARIABLE))
            .collect()
    }
}

fn unquote(token: &str) -> &str {
    token.trim_matches(|c| c == '\'' || c == '"')
}
