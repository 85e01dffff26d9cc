//! Per-chunk execution tracing and CSV export.
//!
//! Collects one record per partition chunk processed by
//! [`crate::engine::ParallelFunction`] when `profile`/`trace_export` is
//! enabled in [`crate::config::ParallelConfig`], and writes them out in the
//! flat CSV format external tooling (spreadsheets, notebooks) can consume
//! directly. Hand-rolled rather than pulled from a CSV crate: the schema is
//! six numeric/enum columns with no quoting or escaping needs, the same
//! "plain `write!` is enough" judgment call the teacher makes for its own
//! `Display` impls (e.g. `gds::core::utils::partition::Partition`).

use std::fmt;
use std::io::{self, Write};

use hdrhistogram::Histogram;

/// The outcome of one chunk's execution, recorded alongside its timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Ok,
    Err,
}

impl fmt::Display for ChunkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkOutcome::Ok => write!(f, "ok"),
            ChunkOutcome::Err => write!(f, "err"),
        }
    }
}

/// One row of the trace: the schedule/task/combine timings for a single
/// partition chunk, in nanoseconds.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRecord {
    pub call_id: u64,
    pub chunk_index: usize,
    pub partition_size: usize,
    pub schedule_ns: u64,
    pub task_ns: u64,
    pub combine_ns: u64,
    pub outcome: ChunkOutcome,
}

/// An in-memory accumulation of [`ChunkRecord`]s for one
/// [`crate::engine::ParallelFunction`] call, exportable as CSV.
///
/// Alongside the flat record list, successful chunks' `task_ns` feed an
/// [`hdrhistogram::Histogram`] so a caller can ask for tail latencies
/// (`p50`/`p99`) without re-scanning every record, the same "keep a
/// histogram next to the raw samples" shape `gds`'s own profiling code
/// uses for per-call timing summaries.
pub struct ChunkTrace {
    records: Vec<ChunkRecord>,
    task_ns_histogram: Histogram<u64>,
}

impl fmt::Debug for ChunkTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkTrace")
            .field("records", &self.records)
            .finish()
    }
}

impl Default for ChunkTrace {
    fn default() -> Self {
        ChunkTrace {
            records: Vec::new(),
            // 3 significant figures is enough resolution for nanosecond
            // scheduling/task timings without the histogram's memory
            // footprint growing unreasonably.
            task_ns_histogram: Histogram::new(3).expect("fixed sigfig is always valid"),
        }
    }
}

impl ChunkTrace {
    pub fn new() -> Self {
        ChunkTrace::default()
    }

    pub fn record(&mut self, record: ChunkRecord) {
        if matches!(record.outcome, ChunkOutcome::Ok) {
            let _ = self.task_ns_histogram.record(record.task_ns);
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The `task_ns` value at `percentile` (0.0-100.0) across successful
    /// chunks recorded so far, or `None` if none have completed yet.
    pub fn task_ns_percentile(&self, percentile: f64) -> Option<u64> {
        if self.task_ns_histogram.is_empty() {
            None
        } else {
            Some(self.task_ns_histogram.value_at_percentile(percentile))
        }
    }

    /// Writes the header followed by one row per recorded chunk, in
    /// recording order, as UTF-8 with LF line endings.
    pub fn write_csv<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(
            writer,
            "call_id,chunk_index,partition_size,schedule_ns,task_ns,combine_ns,outcome"
        )?;
        for record in &self.records {
            writeln!(
                writer,
                "{},{},{},{},{},{},{}",
                record.call_id,
                record.chunk_index,
                record.partition_size,
                record.schedule_ns,
                record.task_ns,
                record.combine_ns,
                record.outcome
            )?;
        }
        Ok(())
    }

    /// Writes the trace to a file path, truncating any existing contents.
    pub fn write_csv_to_path(&self, path: impl AsRef<std::path::Path>) -> io::Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let mut trace = ChunkTrace::new();
        trace.record(ChunkRecord {
            call_id: 1,
            chunk_index: 0,
            partition_size: 100,
            schedule_ns: 500,
            task_ns: 120_000,
            combine_ns: 2_000,
            outcome: ChunkOutcome::Ok,
        });
        trace.record(ChunkRecord {
            call_id: 1,
            chunk_index: 1,
            partition_size: 115,
            schedule_ns: 480,
            task_ns: 130_000,
            combine_ns: 1_800,
            outcome: ChunkOutcome::Err,
        });

        let mut buffer = Vec::new();
        trace.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "call_id,chunk_index,partition_size,schedule_ns,task_ns,combine_ns,outcome"
        );
        assert_eq!(lines.next().unwrap(), "1,0,100,500,120000,2000,ok");
        assert_eq!(lines.next().unwrap(), "1,1,115,480,130000,1800,err");
        assert!(lines.next().is_none());
    }

    #[test]
    fn percentile_ignores_failed_chunks() {
        let mut trace = ChunkTrace::new();
        assert_eq!(trace.task_ns_percentile(50.0), None);

        for task_ns in [100_000u64, 200_000, 300_000] {
            trace.record(ChunkRecord {
                call_id: 1,
                chunk_index: 0,
                partition_size: 10,
                schedule_ns: 0,
                task_ns,
                combine_ns: 0,
                outcome: ChunkOutcome::Ok,
            });
        }
        trace.record(ChunkRecord {
            call_id: 1,
            chunk_index: 3,
            partition_size: 10,
            schedule_ns: 0,
            task_ns: 999_999_999,
            combine_ns: 0,
            outcome: ChunkOutcome::Err,
        });

        let p50 = trace.task_ns_percentile(50.0).unwrap();
        assert!(p50 >= 100_000 && p50 <= 300_000, "p50 = {p50}");
    }

    #[test]
    fn empty_trace_still_writes_header() {
        let trace = ChunkTrace::new();
        let mut buffer = Vec::new();
        trace.write_csv(&mut buffer).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "call_id,chunk_index,partition_size,schedule_ns,task_ns,combine_ns,outcome\n"
        );
    }
}
