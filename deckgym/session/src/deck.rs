use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::SessionResult;

/// Owns the mutable deck file of one session.
///
/// Every mutation is a full read-modify-write; there is no undo.
#[derive(Debug, Clone)]
pub struct DeckStore {
    path: PathBuf,
}

impl DeckStore {
    /// Creates a store for the deck at `path`. The file does not need to exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Deck location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the deck as ordered lines without terminators.
    pub fn read_lines(&self) -> SessionResult<Vec<String>> {
        let content = fs::read_to_string(&self.path)?;
        Ok(content.lines().map(ToOwned::to_owned).collect())
    }

    /// Replaces the deck content.
    ///
    /// The new content is written to a sibling file and renamed over the
    /// deck, so a crash never leaves a half-written deck behind. The line
    /// terminator and final newline of the existing deck are kept.
    pub fn write_lines(&self, lines: &[String]) -> SessionResult<()> {
        let (terminator, trailing) = self.line_layout();
        let mut content = lines.join(terminator);
        if trailing {
            content.push_str(terminator);
        }
        let staging = self.path.with_extension("deck-tmp");
        fs::write(&staging, content)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn line_layout(&self) -> (&'static str, bool) {
        match fs::read(&self.path) {
            Ok(bytes) if !bytes.is_empty() => {
                let crlf = bytes.windows(2).any(|pair| pair == b"\r\n");
                (if crlf { "\r\n" } else { "\n" }, bytes.ends_with(b"\n"))
            }
            _ => ("\n", true),
        }
    }

    /// Copies a template deck over this session's deck.
    pub fn copy_from(&self, template: &Path) -> SessionResult<()> {
        fs::copy(template, &self.path)?;
        Ok(())
    }
}

/// Index of the first line matching `predicate`.
pub fn locate<P>(lines: &[String], predicate: P) -> Option<usize>
where
    P: Fn(&str) -> bool,
{
    lines.iter().position(|line| predicate(line))
}

/// Indices of every line matching `predicate`.
pub fn locate_all<P>(lines: &[String], predicate: P) -> Vec<usize>
where
    P: Fn(&str) -> bool,
{
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| predicate(line))
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_replaces_content_instead_of_appending() {
        let dir = tempdir().unwrap();
        let store = DeckStore::new(dir.path().join("MELIN"));
        store
            .write_lines(&["TEND 0".into(), "*EOR* MELCOR".into()])
            .unwrap();
        store.write_lines(&["TEND 10".into()]).unwrap();

        assert_eq!(store.read_lines().unwrap(), vec!["TEND 10".to_string()]);
        assert!(!dir.path().join("MELIN.deck-tmp").exists());
    }

    #[test]
    fn rewrite_keeps_crlf_terminators() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MELIN");
        fs::write(&path, "TEND 0\r\nCV001 PVOL 100.0\r\n*EOR* MELCOR\r\n").unwrap();
        let store = DeckStore::new(&path);

        let mut lines = store.read_lines().unwrap();
        assert_eq!(lines[1], "CV001 PVOL 100.0");
        lines[0] = "TEND 10".into();
        store.write_lines(&lines).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "TEND 10\r\nCV001 PVOL 100.0\r\n*EOR* MELCOR\r\n"
        );

        fs::write(&path, "TEND 0\n.").unwrap();
        store.write_lines(&["TEND 5".into(), ".".into()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "TEND 5\n.");
    }

    #[test]
    fn locate_returns_first_match() {
        let lines: Vec<String> = ["A 1", "TEND 5", "B 2", "TEND 7"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        assert_eq!(locate(&lines, |l| l.starts_with("TEND")), Some(1));
        assert_eq!(locate_all(&lines, |l| l.starts_with("TEND")), vec![1, 3]);
        assert_eq!(locate(&lines, |l| l.starts_with("CF")), None);
    }

    #[test]
    fn reading_missing_deck_is_an_io_error() {
        let dir = tempdir().unwrap();
        let store = DeckStore::new(dir.path().join("missing"));
        assert!(matches!(
            store.read_lines(),
            Err(crate::error::SessionError::Io(_))
        ));
    }
}
