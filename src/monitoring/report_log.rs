use crate::monitoring::observer::AggregateMetrics;
use crate::simulation_engine::intersection::IntersectionId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// One CSV row per report. Lists are flattened to `id:queue` pairs separated by `;`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub timestamp: u64,
    pub active_controllers: usize,
    pub stale_controllers: String,
    pub total_waiting: u32,
    pub average_queue: f64,
    pub throughput_per_minute: f64,
    pub total_processed: u64,
    pub congested: String,
    pub degraded: bool,
}

fn join_pairs(pairs: &[(IntersectionId, u32)]) -> String {
    pairs
        .iter()
        .map(|(id, queue)| format!("{}:{}", id, queue))
        .collect::<Vec<_>>()
        .join(";")
}

impl From<&AggregateMetrics> for ReportRecord {
    fn from(metrics: &AggregateMetrics) -> Self {
        Self {
            timestamp: metrics.generated_at_ms,
            active_controllers: metrics.active_controllers,
            stale_controllers: join_pairs(&metrics.stale_controllers),
            total_waiting: metrics.total_waiting,
            average_queue: metrics.average_queue,
            throughput_per_minute: metrics.throughput_per_minute,
            total_processed: metrics.total_processed,
            congested: join_pairs(&metrics.congested),
            degraded: metrics.degraded,
        }
    }
}

/// Appends `record` to a CSV file, writing the header only when the file is new.
fn log_to_csv<T: Serialize>(path: &Path, record: &T) -> Result<(), Box<dyn Error>> {
    let file_exists = path.exists();
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(record)?;
    wtr.flush()?;
    Ok(())
}

pub fn log_report(path: impl AsRef<Path>, metrics: &AggregateMetrics) -> Result<(), Box<dyn Error>> {
    log_to_csv(path.as_ref(), &ReportRecord::from(metrics))
}

pub fn read_reports(path: impl AsRef<Path>) -> Result<Vec<ReportRecord>, Box<dyn Error>> {
    let file = File::open(path.as_ref())?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: ReportRecord = result?;
        records.push(record);
    }
    Ok(records)
}
