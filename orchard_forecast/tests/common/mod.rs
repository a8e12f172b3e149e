#![allow(dead_code)]

use chrono::NaiveDate;
use orchard_forecast::{ObservationTable, ProgressContext, ProgressRegistry, ProgressSink};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

pub const COLUMNS: [&str; 7] = [
    "pressure",
    "humidity_min",
    "wind",
    "temperature",
    "radiation",
    "precipitation",
    "humidity",
];

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
}

/// Deterministic daily station record with an annual cycle
pub fn weather_table(days: usize, seed: u64) -> ObservationTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let mut values = vec![Vec::with_capacity(days); COLUMNS.len()];

    for t in 0..days {
        let season = (2.0 * PI * (t as f64 - 100.0) / 365.0).sin();
        let humidity = (65.0 - 15.0 * season + 3.0 * noise.sample(&mut rng)).clamp(20.0, 100.0);
        let rain = if rng.gen::<f64>() < 0.15 {
            rng.gen_range(1.0..15.0)
        } else {
            0.0
        };

        values[0].push(1013.0 + 3.0 * noise.sample(&mut rng));
        values[1].push((humidity - 20.0).max(5.0));
        values[2].push(2.5 + noise.sample(&mut rng).abs());
        values[3].push(16.0 + 8.0 * season + noise.sample(&mut rng));
        values[4].push(18.0e6 + 6.0e6 * season + 1.0e6 * noise.sample(&mut rng));
        values[5].push(rain);
        values[6].push(humidity);
    }

    ObservationTable::new(
        start_date().iter_days().take(days).collect(),
        COLUMNS.iter().map(|c| c.to_string()).collect(),
        values,
    )
    .unwrap()
}

/// Write `table` as a comma separated file with a `date` column
pub fn write_csv(table: &ObservationTable, path: &Path) {
    let mut out = BufWriter::new(File::create(path).unwrap());
    writeln!(out, "date,{}", table.columns().join(",")).unwrap();
    for (i, date) in table.dates().iter().enumerate() {
        let row: Vec<String> = table.row(i).unwrap().iter().map(|v| v.to_string()).collect();
        writeln!(out, "{},{}", date.format("%Y-%m-%d"), row.join(",")).unwrap();
    }
    out.flush().unwrap();
}

/// `(step, substep, total_substeps, last message)` after one progress call
pub type Counters = (usize, usize, usize, String);

/// Forwards to a registered run and records its counters after every call
pub struct RecordingSink {
    registry: Arc<ProgressRegistry>,
    inner: ProgressContext,
    seen: Mutex<Vec<Counters>>,
}

impl RecordingSink {
    fn record(&self) {
        if let Some(s) = self.registry.snapshot(self.inner.run_id()) {
            let last = s.messages.last().map(|m| m.message.clone()).unwrap_or_default();
            self.seen
                .lock()
                .push((s.current_step, s.current_substep, s.total_substeps, last));
        }
    }

    pub fn seen(&self) -> Vec<Counters> {
        self.seen.lock().clone()
    }

    /// Recorded states where the sub-step counter ran past its total
    pub fn overruns(&self) -> Vec<Counters> {
        self.seen()
            .into_iter()
            .filter(|(_, current, total, _)| current > total)
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn update(&self, step: usize, message: &str) {
        self.inner.update(step, message);
        self.record();
    }

    fn substep(&self, message: &str, total: Option<usize>) {
        self.inner.substep(message, total);
        self.record();
    }

    fn note(&self, message: &str) {
        self.inner.note(message);
        self.record();
    }

    fn complete(&self, failed: bool) {
        self.inner.complete(failed);
        self.record();
    }
}

/// Context whose every progress call is recorded
pub fn recording_run(run_id: &str, total_steps: usize) -> (ProgressContext, Arc<RecordingSink>) {
    let registry = Arc::new(ProgressRegistry::new());
    let inner = registry.start_run(run_id, total_steps);
    let sink = Arc::new(RecordingSink {
        registry,
        inner,
        seen: Mutex::new(Vec::new()),
    });
    (ProgressContext::new(run_id, sink.clone()), sink)
}
