use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
};

use crate::{
    error::{SessionError, SessionResult},
    record::ObservationRecord,
};

/// Bytes budgeted per token when sizing the first read.
const BYTES_PER_TOKEN: u64 = 24;

/// Reads the most recent record of an append-only, whitespace-separated
/// numeric stream without scanning the whole file.
///
/// A record is one line `time v_1 .. v_n`.
#[derive(Debug, Clone, Copy)]
pub struct OutputTailReader {
    initial_window: u64,
}

impl Default for OutputTailReader {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl OutputTailReader {
    /// Reader starting with a window of `initial_window` bytes.
    #[must_use]
    pub const fn new(initial_window: u64) -> Self {
        Self { initial_window }
    }

    /// Returns the last complete record, naming its values after `names`.
    ///
    /// Only newline-terminated rows count: a row the simulator is still
    /// writing is ignored, and the last complete row must hold exactly one
    /// time token plus one token per name.
    pub fn last_record(&self, path: &Path, names: &[String]) -> SessionResult<ObservationRecord> {
        let needed = names.len() + 1;
        let mut file = open(path)?;
        let len = file.metadata()?.len();
        let mut window = self
            .initial_window
            .max(2 * needed as u64 * BYTES_PER_TOKEN);

        loop {
            let start = len.saturating_sub(window);
            // One extra byte tells whether the first row starts inside the window.
            let from = start.saturating_sub(1);
            file.seek(SeekFrom::Start(from))?;
            let mut buf = Vec::with_capacity(usize::try_from(len - from).unwrap_or_default());
            (&mut file).take(len - from).read_to_end(&mut buf)?;

            let text = String::from_utf8_lossy(&buf);
            let covers_file = start == 0;
            let complete = text.rfind('\n').map_or("", |end| &text[..end]);
            // The segment before the first newline may be cut by the window.
            let lines: Vec<&str> = complete.split('\n').collect();
            let row = lines[usize::from(!covers_file)..]
                .iter()
                .rev()
                .find(|line| !line.trim().is_empty());

            if let Some(row) = row {
                return parse_row(row, names, path);
            }
            if covers_file {
                return Err(SessionError::EmptyOrTruncatedOutput {
                    path: path.to_path_buf(),
                    expected: needed,
                    found: 0,
                });
            }
            window = window.saturating_mul(2);
        }
    }
}

/// Parses every complete row of the stream. Used for offline inspection.
pub fn read_all_records(path: &Path, names: &[String]) -> SessionResult<Vec<ObservationRecord>> {
    let mut text = String::new();
    open(path)?.read_to_string(&mut text)?;
    let complete = text.rfind('\n').map_or("", |end| &text[..end]);
    complete
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_row(line, names, path))
        .collect()
}

fn parse_row(line: &str, names: &[String], path: &Path) -> SessionResult<ObservationRecord> {
    let needed = names.len() + 1;
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != needed {
        return Err(SessionError::EmptyOrTruncatedOutput {
            path: path.to_path_buf(),
            expected: needed,
            found: tokens.len(),
        });
    }
    let row = parse_tokens(&tokens, path)?;
    Ok(ObservationRecord::from_columns(row[0], names, &row[1..]))
}

fn open(path: &Path) -> SessionResult<File> {
    File::open(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => SessionError::OutputNotFound(path.to_path_buf()),
        _ => SessionError::Io(err),
    })
}

fn parse_tokens(tokens: &[&str], path: &Path) -> SessionResult<Vec<f64>> {
    tokens
        .iter()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| SessionError::NonNumericToken {
                    token: (*token).to_string(),
                    path: path.to_path_buf(),
                })
        })
        .collect()
}
