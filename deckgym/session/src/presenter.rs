use std::{
    io::{self, Write},
    sync::Arc,
};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::record::ObservationRecord;

/// Receives the latest record whenever the session renders.
pub trait Presenter: Send {
    /// Presents one record.
    fn present(&mut self, record: &ObservationRecord) -> io::Result<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _record: &ObservationRecord) -> io::Result<()> {
        Ok(())
    }
}

/// Prints one summary line per render.
pub struct ConsolePresenter<W: Write + Send = io::Stdout> {
    out: W,
}

impl Default for ConsolePresenter {
    fn default() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> ConsolePresenter<W> {
    /// Presenter writing to `out`.
    pub const fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> Presenter for ConsolePresenter<W> {
    fn present(&mut self, record: &ObservationRecord) -> io::Result<()> {
        let fields: Vec<String> = record
            .values
            .iter()
            .map(|(name, value)| format!("{name}={value:.4e}"))
            .collect();
        writeln!(self.out, "t={:.3} {}", record.time, fields.join(" "))
    }
}

/// Time series accumulated by a [`HistoryPresenter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderHistory {
    /// Simulation times of the rendered records.
    pub times: Vec<f64>,
    /// One series per tracked variable.
    pub series: IndexMap<String, Vec<f64>>,
}

/// Accumulates every rendered record for later plotting.
#[derive(Debug, Clone, Default)]
pub struct HistoryPresenter {
    history: Arc<Mutex<RenderHistory>>,
}

impl HistoryPresenter {
    /// Shared handle to the accumulated history.
    #[must_use]
    pub fn handle(&self) -> Arc<Mutex<RenderHistory>> {
        Arc::clone(&self.history)
    }
}

impl Presenter for HistoryPresenter {
    fn present(&mut self, record: &ObservationRecord) -> io::Result<()> {
        let mut history = self.history.lock();
        history.times.push(record.time);
        for (name, value) in &record.values {
            history.series.entry(name.clone()).or_default().push(*value);
        }
        Ok(())
    }
}
