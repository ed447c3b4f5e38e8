//! Experiment harness: memory-budget planning, single runs, and parameter
//! sweeps.
//!
//! A run feeds records in timestamp order and schedules `periodic_clean`
//! from the ingestion path whenever the stream has progressed a full window
//! since the last sweep, which satisfies the sketch's cleaning contract.

use std::time::Instant;

use serde::Serialize;

use crate::dataset::Record;
use crate::sketch::{bucket_bits, ConfigError, Sketch};

/// Sketch parameters for one experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SketchParams {
    pub n: u64,
    pub k: u32,
    pub m: u32,
    pub delta1: u32,
    pub delta2: u32,
}

impl SketchParams {
    pub fn build(&self) -> Result<Sketch, ConfigError> {
        Sketch::new(self.n, self.k, self.m, self.delta1, self.delta2)
    }
}

/// Derives a bucket count from a byte budget.
///
/// The per-bucket cost is `k * (delta1 + delta2)` entry bits plus the lock,
/// lock-timestamp, lock-bound, and head fields. At least one bucket is
/// always planned, even when the budget does not cover it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBudget {
    pub bytes: u64,
    pub k: u32,
    pub delta1: u32,
    pub delta2: u32,
}

impl MemoryBudget {
    pub fn plan(&self, n: u64) -> SketchParams {
        let per_bucket = bucket_bits(self.k, self.delta1, self.delta2);
        let total_bits = self.bytes.saturating_mul(8);
        let m = (total_bits / per_bucket).clamp(1, u64::from(u32::MAX)) as u32;
        SketchParams {
            n,
            k: self.k,
            m,
            delta1: self.delta1,
            delta2: self.delta2,
        }
    }
}

/// Results of a single experiment run.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RunReport {
    pub params: SketchParams,
    /// Records fed into the sketch.
    pub records: u64,
    /// Number of `periodic_clean` sweeps triggered.
    pub cleans: u64,
    /// Wall-clock processing time in seconds.
    pub seconds: f64,
    /// Records per second.
    pub throughput: f64,
    /// Final cardinality estimate over the last window.
    pub estimate: f64,
    /// Sketch clock after the last record.
    pub final_time: u64,
    /// Configured bucket-state memory in bits.
    pub memory_bits: u64,
}

/// Feeds `records` (already in timestamp order) through a sketch built from
/// `params` and reports the final estimate.
pub fn run_experiment(params: SketchParams, records: &[Record]) -> Result<RunReport, ConfigError> {
    let mut sketch = params.build()?;
    let clean_interval = params.n;
    let mut last_clean = 0u64;
    let mut cleans = 0u64;

    let start = Instant::now();
    for record in records {
        if record.timestamp.saturating_sub(last_clean) >= clean_interval {
            sketch.periodic_clean(record.timestamp);
            last_clean = record.timestamp;
            cleans += 1;
        }
        sketch.record(record.flow_label, record.element_id, record.timestamp);
    }
    let seconds = start.elapsed().as_secs_f64();

    let estimate = sketch.estimate();
    let records_fed = records.len() as u64;
    Ok(RunReport {
        params,
        records: records_fed,
        cleans,
        seconds,
        throughput: if seconds > 0.0 {
            records_fed as f64 / seconds
        } else {
            0.0
        },
        estimate,
        final_time: sketch.current_time(),
        memory_bits: sketch.memory_bits(),
    })
}

/// Parameter grid for a sweep over bit-widths, entry counts, and memory
/// budgets.
#[derive(Clone, Debug)]
pub struct SweepGrid {
    pub delta1: Vec<u32>,
    pub delta2: Vec<u32>,
    pub k: Vec<u32>,
    pub memory_bytes: Vec<u64>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            delta1: vec![16, 32, 64],
            delta2: vec![16, 24, 32],
            k: vec![32, 64, 128],
            memory_bytes: vec![1024, 4096, 16384],
        }
    }
}

impl SweepGrid {
    /// Runs every grid combination against the same record stream.
    ///
    /// Invalid combinations (for example a window that does not fit the
    /// timestamp bit-width) surface as errors in the result list instead of
    /// aborting the sweep.
    pub fn run(&self, n: u64, records: &[Record]) -> Vec<Result<RunReport, ConfigError>> {
        let mut results = Vec::new();
        for &delta1 in &self.delta1 {
            for &delta2 in &self.delta2 {
                for &k in &self.k {
                    for &bytes in &self.memory_bytes {
                        let budget = MemoryBudget {
                            bytes,
                            k,
                            delta1,
                            delta2,
                        };
                        results.push(run_experiment(budget.plan(n), records));
                    }
                }
            }
        }
        results
    }

    pub fn len(&self) -> usize {
        self.delta1.len() * self.delta2.len() * self.k.len() * self.memory_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::synthetic_records;

    #[test]
    fn budget_planner_derives_bucket_count() {
        let budget = MemoryBudget {
            bytes: 4096,
            k: 64,
            delta1: 32,
            delta2: 16,
        };
        let params = budget.plan(1000);
        // 4096 bytes = 32768 bits; one bucket costs 64*48 + 1 + 16 + 32 + 6
        // = 3127 bits.
        assert_eq!(params.m, 32768 / 3127);
        assert_eq!(params.k, 64);
        assert!(params.build().is_ok());
    }

    #[test]
    fn budget_planner_never_goes_below_one_bucket() {
        let budget = MemoryBudget {
            bytes: 1,
            k: 128,
            delta1: 64,
            delta2: 32,
        };
        assert_eq!(budget.plan(10).m, 1);
    }

    #[test]
    fn run_schedules_cleaning_every_window() {
        let params = SketchParams {
            n: 100,
            k: 4,
            m: 2,
            delta1: 32,
            delta2: 16,
        };
        // Timestamps 0..1000: cleans at 100, 200, ... 900.
        let records: Vec<Record> = (0..1000)
            .map(|i| Record {
                flow_label: i % 4,
                element_id: i,
                timestamp: i,
            })
            .collect();
        let report = run_experiment(params, &records).unwrap();
        assert_eq!(report.records, 1000);
        assert_eq!(report.cleans, 9);
        assert_eq!(report.final_time, 999);
        assert!(report.estimate > 0.0);
        assert_eq!(report.memory_bits, 2 * (4 * 48 + 1 + 16 + 32 + 2));
    }

    #[test]
    fn invalid_combination_surfaces_as_error() {
        let params = SketchParams {
            n: 1_000_000,
            k: 4,
            m: 1,
            delta1: 32,
            delta2: 16, // window cannot fit: max N is (2^16 - 1) / 2
        };
        assert!(run_experiment(params, &[]).is_err());
    }

    #[test]
    fn sweep_covers_the_whole_grid() {
        let grid = SweepGrid {
            delta1: vec![32],
            delta2: vec![16, 24],
            k: vec![4],
            memory_bytes: vec![1024],
        };
        let records = synthetic_records(200, 4, 50, 42);
        let results = grid.run(100, &records);
        assert_eq!(results.len(), grid.len());
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn reports_serialize_to_json() {
        let params = SketchParams {
            n: 100,
            k: 2,
            m: 1,
            delta1: 32,
            delta2: 16,
        };
        let report = run_experiment(params, &[]).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"estimate\""));
        assert!(json.contains("\"delta1\":32"));
    }
}
