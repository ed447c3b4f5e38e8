//! Dataset loading and synthetic stream generation for experiments.
//!
//! The on-disk format is three whitespace-separated columns per line:
//! `<flow_label> <element_id> <timestamp>`. Blank lines and `#` comments are
//! skipped; malformed lines are counted rather than fatal so a single bad
//! row cannot abort a long run.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// One parsed stream record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    pub flow_label: u64,
    pub element_id: u64,
    pub timestamp: u64,
}

/// Counters for a load pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Total lines read, including blanks and comments.
    pub lines: u64,
    /// Lines that parsed into records.
    pub records: u64,
    /// Blank lines and `#` comments.
    pub skipped: u64,
    /// Lines with the wrong column count or unparseable numbers.
    pub malformed: u64,
}

/// Loads a dataset file into memory.
pub fn load_records(path: &Path) -> io::Result<(Vec<Record>, LoadStats)> {
    let file = File::open(path)?;
    read_records(BufReader::new(file))
}

/// Parses records from any buffered reader.
pub fn read_records<R: BufRead>(reader: R) -> io::Result<(Vec<Record>, LoadStats)> {
    let mut records = Vec::new();
    let mut stats = LoadStats::default();

    for line in reader.lines() {
        let line = line?;
        stats.lines += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            stats.skipped += 1;
            continue;
        }
        match parse_line(trimmed) {
            Some(record) => {
                stats.records += 1;
                records.push(record);
            }
            None => stats.malformed += 1,
        }
    }

    Ok((records, stats))
}

fn parse_line(line: &str) -> Option<Record> {
    let mut fields = line.split_whitespace();
    let flow_label = fields.next()?.parse().ok()?;
    let element_id = fields.next()?.parse().ok()?;
    let timestamp = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(Record {
        flow_label,
        element_id,
        timestamp,
    })
}

/// Minimal xorshift PRNG for reproducible synthetic streams.
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

/// Generates `count` records with incrementing timestamps, random flow
/// labels in `[0, flows)` and element ids in `[0, value_range)`.
///
/// The same seed always produces the same stream.
pub fn synthetic_records(count: usize, flows: u64, value_range: u64, seed: u64) -> Vec<Record> {
    assert!(flows > 0);
    assert!(value_range > 0);
    let mut rng = XorShift64::new(seed);
    (0..count)
        .map(|i| Record {
            flow_label: rng.next_u64() % flows,
            element_id: rng.next_u64() % value_range,
            timestamp: i as u64,
        })
        .collect()
}
