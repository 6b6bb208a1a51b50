//! Writing traces in the persisted format read by [crate::demonstration::Demonstration::load].
use crate::demonstration::Measurement;
use crate::error::BipError;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub const TRACE_VERSION: u32 = 1;
const COLUMN_HEADER: &str = "timestamp,player_x,player_y,robot_x,robot_y,ball_x,ball_y";

/// Flat row of a trace file. Coordinates are stored as whole screen units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub timestamp: u64,
    pub player_x: i64,
    pub player_y: i64,
    pub robot_x: i64,
    pub robot_y: i64,
    pub ball_x: i64,
    pub ball_y: i64,
}
impl From<&Measurement> for TraceRecord {
    fn from(m: &Measurement) -> Self {
        TraceRecord {
            timestamp: m.timestamp,
            player_x: m.player.x.round() as i64,
            player_y: m.player.y.round() as i64,
            robot_x: m.robot.x.round() as i64,
            robot_y: m.robot.y.round() as i64,
            ball_x: m.ball.x.round() as i64,
            ball_y: m.ball.y.round() as i64,
        }
    }
}

/// Streams measurements to a trace. The version and column comments are written on creation.
pub struct TraceWriter<W: Write> {
    writer: csv::Writer<W>,
    records: usize,
}
impl TraceWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, BipError> {
        TraceWriter::new(File::create(path)?)
    }
}
impl<W: Write> TraceWriter<W> {
    pub fn new(mut inner: W) -> Result<Self, BipError> {
        writeln!(inner, "# version {TRACE_VERSION}")?;
        writeln!(inner, "# {COLUMN_HEADER}")?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        Ok(TraceWriter { writer, records: 0 })
    }
    pub fn write(&mut self, measurement: &Measurement) -> Result<(), BipError> {
        self.writer.serialize(TraceRecord::from(measurement))?;
        self.records += 1;
        Ok(())
    }
    pub fn records_written(&self) -> usize {
        self.records
    }
    /// Flush and hand back the underlying writer.
    pub fn finish(self) -> Result<W, BipError> {
        let mut writer = self.writer;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| BipError::Io(std::io::Error::other(e.to_string())))
    }
}

/// Write a complete trace file.
pub fn write_trace<P: AsRef<Path>>(path: P, measurements: &[Measurement]) -> Result<(), BipError> {
    let mut writer = TraceWriter::create(path)?;
    for measurement in measurements {
        writer.write(measurement)?;
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;
    use crate::demonstration::Demonstration;

    fn sample_measurements() -> Vec<Measurement> {
        (0..5)
            .map(|k| {
                Measurement::new(
                    16_666_666 * (k + 1),
                    Point::new(40.0, 560.0),
                    Point::new(300.0 + k as f64, 560.0),
                    Point::new(52.0 + 3.0 * k as f64, 380.0 - 9.0 * k as f64),
                )
            })
            .collect()
    }

    #[test]
    fn header_and_rows() {
        let mut writer = TraceWriter::new(Vec::new()).unwrap();
        writer.write(&sample_measurements()[0]).unwrap();
        assert_eq!(writer.records_written(), 1);
        let bytes = writer.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# version 1");
        assert_eq!(lines[1], format!("# {COLUMN_HEADER}"));
        assert_eq!(lines[2], "16666666,40,560,300,560,52,380");
    }

    #[test]
    fn written_trace_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace_0.out");
        let measurements = sample_measurements();
        write_trace(&path, &measurements).unwrap();
        let demo = Demonstration::from_path(&path).unwrap();
        assert_eq!(demo.len(), measurements.len());
        assert_eq!(demo.measurements(), measurements.as_slice());
        assert_eq!(demo.name(), "trace_0");
    }
}
