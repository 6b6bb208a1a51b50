//! Recorded demonstrations and phase-indexed sampling.
//!
//! A demonstration is the ordered list of measurements from one trace file. Its "length" is the
//! record count, not the elapsed time span, and every query against it is made in terms of a
//! normalized phase in `[0, 1]`.
//!
//! # Trace format
//!
//! Newline-delimited text. Lines beginning with `#` are comments (a version header and a column
//! header are written by [crate::trace::TraceWriter]). Every other non-blank line holds an integer
//! timestamp in nanoseconds followed by up to three `x, y` pairs for the player, the robot and the
//! ball, in that order. Fields may be separated by commas, whitespace, or both.
//!
//! ```text
//! # version 1
//! # timestamp,player_x,player_y,robot_x,robot_y,ball_x,ball_y
//! 16666666,40,560,300,560,52,380
//! 33333333 40 560 301 560 55 371
//! ```
//!
//! Parsing is best effort: a field that cannot be read is logged and taken as `0`, missing trailing
//! fields are zero-filled. Only a stream without a single data record is rejected.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::BipError;
use crate::{Point, StateSample, clamp_phase};

/// Default file-name prefix of trace files in a demonstration directory.
pub const DEFAULT_TRACE_PREFIX: &str = "trace";

/// Number of coordinate fields following the timestamp on a trace line.
const COORDINATE_FIELDS: usize = 6;

/// One sensor frame of a demonstration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Nanoseconds since the start of the trial.
    pub timestamp: u64,
    pub player: Point,
    pub robot: Point,
    pub ball: Point,
}
impl Measurement {
    pub fn new(timestamp: u64, player: Point, robot: Point, ball: Point) -> Self {
        Measurement {
            timestamp,
            player,
            robot,
            ball,
        }
    }
    /// Positional channels of this frame (ball x/y and robot x).
    pub fn to_sample(&self) -> StateSample {
        StateSample::new(self.ball.x, self.ball.y, self.robot.x)
    }
}

/// A single recorded trajectory, immutable after loading.
#[derive(Clone, Debug, PartialEq)]
pub struct Demonstration {
    name: String,
    measurements: Vec<Measurement>,
}
impl Demonstration {
    /// Build a demonstration from already parsed measurements.
    ///
    /// # Errors
    /// [BipError::MalformedLog] if `measurements` is empty.
    pub fn new(name: &str, measurements: Vec<Measurement>) -> Result<Self, BipError> {
        if measurements.is_empty() {
            return Err(BipError::MalformedLog(format!(
                "demonstration '{name}' holds no data records"
            )));
        }
        Ok(Demonstration {
            name: name.to_string(),
            measurements,
        })
    }
    /// Parse a trace from any byte stream.
    ///
    /// Invalid UTF-8 is replaced rather than rejected, so a partially corrupted file still yields
    /// every line that can be read.
    ///
    /// # Arguments
    /// * `reader` - source of the trace text
    /// * `name` - label used in log messages and reports
    ///
    /// # Returns
    /// The demonstration, or [BipError::MalformedLog] if no data record was found.
    pub fn load<R: Read>(mut reader: R, name: &str) -> Result<Self, BipError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let text = String::from_utf8_lossy(&bytes);

        let mut measurements = Vec::new();
        for (line_number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            measurements.push(parse_record(line, line_number + 1, name));
        }
        debug!(
            "Parsed {} records from demonstration '{}'",
            measurements.len(),
            name
        );
        Demonstration::new(name, measurements)
    }
    /// Open and parse a trace file. The demonstration is named after the file stem.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, BipError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path)?;
        Demonstration::load(file, &name)
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Record count.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }
    /// Always false for a constructed demonstration; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }
    /// Phase advanced per sensor tick, `1 / len`.
    pub fn phase_velocity(&self) -> f64 {
        1.0 / self.len() as f64
    }
    /// Time between the first and the last record.
    pub fn duration_ns(&self) -> u64 {
        match (self.measurements.first(), self.measurements.last()) {
            (Some(first), Some(last)) => last.timestamp.saturating_sub(first.timestamp),
            _ => 0,
        }
    }
    /// Record index for a phase: `floor(phase * len)` with the phase clamped to `[0, 1]` and the
    /// index clamped to the last record.
    pub fn index_at(&self, phase: f64) -> usize {
        let last = self.len() - 1;
        let index = (clamp_phase(phase) * self.len() as f64).floor() as usize;
        index.min(last)
    }
    /// Positional sample at `phase`. Out-of-range phases are clamped and logged.
    pub fn sample(&self, phase: f64) -> StateSample {
        if !(0.0..=1.0).contains(&phase) {
            warn!(
                "Phase {} out of range while sampling '{}', clamping to [0, 1]",
                phase, self.name
            );
        }
        self.measurements[self.index_at(phase)].to_sample()
    }
}

/// Parse one non-comment trace line. Never fails; unreadable fields are zero.
fn parse_record(line: &str, line_number: usize, name: &str) -> Measurement {
    let mut tokens = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty());

    let timestamp = match tokens.next() {
        Some(token) => parse_timestamp(token).unwrap_or_else(|| {
            warn!(
                "{}:{}: unreadable timestamp '{}', using 0",
                name, line_number, token
            );
            0
        }),
        None => 0,
    };

    let mut fields = [0.0; COORDINATE_FIELDS];
    for (slot, token) in fields.iter_mut().zip(tokens.by_ref()) {
        *slot = parse_coordinate(token).unwrap_or_else(|| {
            warn!(
                "{}:{}: unreadable field '{}', using 0",
                name, line_number, token
            );
            0.0
        });
    }
    if tokens.next().is_some() {
        debug!("{}:{}: ignoring extra fields", name, line_number);
    }

    Measurement {
        timestamp,
        player: Point::new(fields[0], fields[1]),
        robot: Point::new(fields[2], fields[3]),
        ball: Point::new(fields[4], fields[5]),
    }
}

fn parse_timestamp(token: &str) -> Option<u64> {
    if let Ok(value) = token.parse::<u64>() {
        return Some(value);
    }
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Some(value as u64),
        _ => None,
    }
}

fn parse_coordinate(token: &str) -> Option<f64> {
    if let Ok(value) = token.parse::<i64>() {
        return Some(value as f64);
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Summary of the phase velocities `1 / len` across a set of demonstrations.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub mean_velocity: f64,
    /// Population variance (divided by the demonstration count).
    pub velocity_variance: f64,
}

/// Ordered collection of demonstrations.
#[derive(Clone, Debug, Default)]
pub struct DemonstrationStore {
    demonstrations: Vec<Demonstration>,
}
impl DemonstrationStore {
    pub fn new() -> Self {
        DemonstrationStore::default()
    }
    pub fn push(&mut self, demonstration: Demonstration) {
        self.demonstrations.push(demonstration);
    }
    pub fn len(&self) -> usize {
        self.demonstrations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.demonstrations.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<&Demonstration> {
        self.demonstrations.get(index)
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Demonstration> {
        self.demonstrations.iter()
    }
    pub fn as_slice(&self) -> &[Demonstration] {
        &self.demonstrations
    }
    /// List the files in `dir` whose name starts with `prefix`, sorted by file name.
    pub fn discover<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<Vec<PathBuf>, BipError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix));
            if matches {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
    /// Load the first `count` traces (by file name) from `dir`.
    ///
    /// # Errors
    /// [BipError::InsufficientDemonstrations] if fewer than `count` files match `prefix`; I/O
    /// and parse errors of the individual files are passed through.
    pub fn from_directory<P: AsRef<Path>>(
        dir: P,
        prefix: &str,
        count: usize,
    ) -> Result<Self, BipError> {
        let dir = dir.as_ref();
        let paths = DemonstrationStore::discover(dir, prefix)?;
        if paths.len() < count {
            return Err(BipError::InsufficientDemonstrations {
                required: count,
                available: paths.len(),
            });
        }
        let mut store = DemonstrationStore::new();
        for path in paths.iter().take(count) {
            store.push(Demonstration::from_path(path)?);
        }
        info!(
            "Loaded {} demonstrations from {} ({} matching files)",
            store.len(),
            dir.display(),
            paths.len()
        );
        Ok(store)
    }
    /// Mean and population variance of `1 / len` over the stored demonstrations.
    /// `None` for an empty store.
    pub fn phase_stats(&self) -> Option<PhaseStats> {
        if self.is_empty() {
            return None;
        }
        let n = self.len() as f64;
        let mean_velocity = self.iter().map(|d| d.phase_velocity()).sum::<f64>() / n;
        let velocity_variance = self
            .iter()
            .map(|d| (d.phase_velocity() - mean_velocity).powi(2))
            .sum::<f64>()
            / n;
        Some(PhaseStats {
            mean_velocity,
            velocity_variance,
        })
    }
}
impl FromIterator<Demonstration> for DemonstrationStore {
    fn from_iter<I: IntoIterator<Item = Demonstration>>(iter: I) -> Self {
        DemonstrationStore {
            demonstrations: iter.into_iter().collect(),
        }
    }
}
impl<'a> IntoIterator for &'a DemonstrationStore {
    type Item = &'a Demonstration;
    type IntoIter = std::slice::Iter<'a, Demonstration>;
    fn into_iter(self) -> Self::IntoIter {
        self.demonstrations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::io::Write;

    fn ramp(len: usize) -> Demonstration {
        let measurements = (0..len)
            .map(|k| {
                Measurement::new(
                    k as u64 * 1000,
                    Point::new(1.0, 2.0),
                    Point::new(100.0 + k as f64, 500.0),
                    Point::new(10.0 * (k + 1) as f64, 20.0 * (k + 1) as f64),
                )
            })
            .collect();
        Demonstration::new("ramp", measurements).unwrap()
    }

    #[test]
    fn load_counts_data_records() {
        let text = "1 0 0 10 0 5 6\n2,0,0,11,0,7,8\n3, 0, 0, 12, 0, 9, 10\n";
        let demo = Demonstration::load(text.as_bytes(), "plain").unwrap();
        assert_eq!(demo.len(), 3);
        assert_eq!(demo.measurements()[1].robot.x, 11.0);
        assert_eq!(demo.measurements()[2].ball, Point::new(9.0, 10.0));
    }

    #[test]
    fn load_skips_comments_and_blank_lines() {
        let text = "# version 1\n# timestamp,player_x,player_y,robot_x,robot_y,ball_x,ball_y\n\
                    1 0 0 10 0 5 6\n# mid-trace comment\n\n2 0 0 11 0 7 8\n   \n3 0 0 12 0 9 10";
        let demo = Demonstration::load(text.as_bytes(), "commented").unwrap();
        assert_eq!(demo.len(), 3);
        assert_eq!(demo.measurements()[2].timestamp, 3);
    }

    #[test]
    fn load_is_best_effort() {
        let text = "10 0 0 abc 0 5\nnope 1 2 3 4 5 6\n12.5 1 2 3 4 5 6 7 8\n";
        let demo = Demonstration::load(text.as_bytes(), "partial").unwrap();
        assert_eq!(demo.len(), 3);
        let first = demo.measurements()[0];
        assert_eq!(first.timestamp, 10);
        assert_eq!(first.robot.x, 0.0);
        assert_eq!(first.ball, Point::new(5.0, 0.0));
        assert_eq!(demo.measurements()[1].timestamp, 0);
        assert_eq!(demo.measurements()[1].ball, Point::new(5.0, 6.0));
        assert_eq!(demo.measurements()[2].timestamp, 12);
    }

    #[test]
    fn load_rejects_empty_stream() {
        let result = Demonstration::load("# only a header\n\n".as_bytes(), "empty");
        assert!(matches!(result, Err(BipError::MalformedLog(_))));
    }

    #[test]
    fn sample_clamps_out_of_range_phase() {
        let demo = ramp(10);
        assert_eq!(demo.sample(-0.5), demo.sample(0.0));
        assert_eq!(demo.sample(7.0), demo.sample(1.0));
        assert_eq!(demo.sample(f64::NAN), demo.sample(0.0));
    }

    #[test]
    fn sample_indexes_by_floor() {
        let demo = ramp(10);
        assert_eq!(demo.index_at(0.0), 0);
        assert_eq!(demo.index_at(0.25), 2);
        assert_eq!(demo.index_at(0.99), 9);
        assert_eq!(demo.index_at(1.0), 9);
        let s = demo.sample(0.25);
        assert_eq!(s.ball_x(), 30.0);
        assert_eq!(s.ball_y(), 60.0);
        assert_eq!(s.robot_x(), 102.0);
        assert_eq!(s.phase(), 0.0);
    }

    #[test]
    fn phase_velocity_and_duration() {
        let demo = ramp(100);
        assert_approx_eq!(demo.phase_velocity(), 0.01);
        assert_eq!(demo.duration_ns(), 99_000);
    }

    #[test]
    fn phase_stats_of_mixed_lengths() {
        let store: DemonstrationStore = vec![ramp(10), ramp(20)].into_iter().collect();
        let stats = store.phase_stats().unwrap();
        assert_approx_eq!(stats.mean_velocity, 0.075);
        assert_approx_eq!(stats.velocity_variance, 0.000625);
        assert!(DemonstrationStore::new().phase_stats().is_none());
    }

    #[test]
    fn directory_discovery_sorts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        for (name, ts) in [("trace_b.out", 2), ("trace_a.out", 1), ("other.out", 9)] {
            let mut f = File::create(dir.path().join(name)).unwrap();
            writeln!(f, "{ts} 0 0 1 0 1 1").unwrap();
        }
        let paths = DemonstrationStore::discover(dir.path(), DEFAULT_TRACE_PREFIX).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("trace_a.out"));

        let store = DemonstrationStore::from_directory(dir.path(), DEFAULT_TRACE_PREFIX, 2).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0).unwrap().name(), "trace_a");
        assert_eq!(store.get(1).unwrap().measurements()[0].timestamp, 2);
    }

    #[test]
    fn directory_with_too_few_traces() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = File::create(dir.path().join("trace0")).unwrap();
        writeln!(f, "1 0 0 1 0 1 1").unwrap();
        let result = DemonstrationStore::from_directory(dir.path(), "trace", 8);
        match result {
            Err(BipError::InsufficientDemonstrations {
                required,
                available,
            }) => {
                assert_eq!(required, 8);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
