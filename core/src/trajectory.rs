//! Weighted mean trajectories over the demonstrations.
//!
//! At a given phase every demonstration is sampled, its positional channels are scaled by the
//! weights of the member bound to it, and the results are averaged over the demonstrations whose
//! sample carries a ball position. A sample with the ball at zero on either axis is the "ball not
//! in play" sentinel and is left out of both the sum and the count.
use crate::demonstration::Demonstration;
use crate::ensemble::ChannelWeights;
use crate::error::BipError;
use crate::{Channel, NUM_CHANNELS, StateSample};

use nalgebra::DMatrix;
use serde::Serialize;
use std::path::Path;

/// Weighted average of all demonstrations at `phase`.
///
/// Demonstration `i` is scaled by `weights[i]`; demonstrations beyond the end of `weights` use
/// unit weights. The returned sample carries `phase` in its phase channel.
///
/// # Errors
/// [BipError::NoValidSamples] if no demonstration has the ball in play at `phase`.
pub fn weighted_sample(
    demonstrations: &[Demonstration],
    weights: &[ChannelWeights],
    phase: f64,
) -> Result<StateSample, BipError> {
    let mut sum = StateSample::default();
    let mut valid = 0usize;
    for (i, demonstration) in demonstrations.iter().enumerate() {
        let mut sample = demonstration.sample(phase);
        if !sample.has_ball() {
            continue;
        }
        weights
            .get(i)
            .copied()
            .unwrap_or(ChannelWeights::UNIT)
            .apply(&mut sample);
        for channel in Channel::POSITIONAL {
            sum[channel] += sample[channel];
        }
        valid += 1;
    }
    if valid == 0 {
        return Err(BipError::NoValidSamples { phase });
    }
    for channel in Channel::POSITIONAL {
        sum[channel] /= valid as f64;
    }
    sum[Channel::Phase] = phase;
    Ok(sum)
}

/// A `NUM_CHANNELS x n` curve, one column per queried phase.
///
/// The phase row holds the queried phase. Columns at which no demonstration had a valid sample
/// hold `NaN` in the positional rows.
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryCurve {
    matrix: DMatrix<f64>,
}

#[derive(Serialize)]
struct CurveRow {
    phase: f64,
    ball_x: Option<f64>,
    ball_y: Option<f64>,
    robot_x: Option<f64>,
}

impl TrajectoryCurve {
    pub fn len(&self) -> usize {
        self.matrix.ncols()
    }
    pub fn is_empty(&self) -> bool {
        self.matrix.ncols() == 0
    }
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }
    pub fn phase(&self, k: usize) -> Option<f64> {
        (k < self.len()).then(|| self.matrix[(Channel::Phase.index(), k)])
    }
    /// Column `k` as a sample, or `None` if `k` is out of bounds or the column is missing.
    pub fn sample(&self, k: usize) -> Option<StateSample> {
        if k >= self.len() {
            return None;
        }
        let column = self.matrix.column(k);
        if Channel::POSITIONAL
            .iter()
            .any(|c| column[c.index()].is_nan())
        {
            return None;
        }
        let mut sample = StateSample::default();
        for channel in Channel::ALL {
            sample[channel] = column[channel.index()];
        }
        Some(sample)
    }
    /// Number of columns that are not missing.
    pub fn valid_count(&self) -> usize {
        (0..self.len()).filter(|&k| self.sample(k).is_some()).count()
    }
    /// Write the curve as CSV, one row per phase. Missing values are written as empty fields.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), BipError> {
        let mut writer = csv::Writer::from_path(path)?;
        for k in 0..self.len() {
            let phase = self.matrix[(Channel::Phase.index(), k)];
            let row = match self.sample(k) {
                Some(s) => CurveRow {
                    phase,
                    ball_x: Some(s.ball_x()),
                    ball_y: Some(s.ball_y()),
                    robot_x: Some(s.robot_x()),
                },
                None => CurveRow {
                    phase,
                    ball_x: None,
                    ball_y: None,
                    robot_x: None,
                },
            };
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Mean trajectory between two phases.
///
/// Column `k` (for `k` in `0..num_samples`) is the [weighted_sample] at
/// `phase_start + k * (phase_end - phase_start) / num_samples`. A column without valid samples is
/// recorded as missing and the rest of the curve is still produced.
pub fn mean_trajectory(
    demonstrations: &[Demonstration],
    weights: &[ChannelWeights],
    phase_start: f64,
    phase_end: f64,
    num_samples: usize,
) -> TrajectoryCurve {
    let mut matrix = DMatrix::<f64>::zeros(NUM_CHANNELS, num_samples);
    let step = if num_samples > 0 {
        (phase_end - phase_start) / num_samples as f64
    } else {
        0.0
    };
    for k in 0..num_samples {
        let phase = phase_start + k as f64 * step;
        matrix[(Channel::Phase.index(), k)] = phase;
        match weighted_sample(demonstrations, weights, phase) {
            Ok(sample) => {
                for channel in Channel::POSITIONAL {
                    matrix[(channel.index(), k)] = sample[channel];
                }
            }
            Err(_) => {
                for channel in Channel::POSITIONAL {
                    matrix[(channel.index(), k)] = f64::NAN;
                }
            }
        }
    }
    TrajectoryCurve { matrix }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;
    use crate::demonstration::Measurement;
    use assert_approx_eq::assert_approx_eq;

    fn demo(balls: &[(f64, f64)], robot_x: f64) -> Demonstration {
        let measurements = balls
            .iter()
            .enumerate()
            .map(|(k, &(x, y))| {
                Measurement::new(
                    k as u64,
                    Point::default(),
                    Point::new(robot_x, 0.0),
                    Point::new(x, y),
                )
            })
            .collect();
        Demonstration::new("demo", measurements).unwrap()
    }

    #[test]
    fn sentinel_samples_are_excluded() {
        let demos = vec![demo(&[(10.0, 20.0), (0.0, 0.0)], 5.0)];
        let curve = mean_trajectory(&demos, &[], 0.0, 1.0, 2);
        assert_eq!(curve.len(), 2);
        let first = curve.sample(0).unwrap();
        assert_eq!(first.ball_x(), 10.0);
        assert_eq!(first.ball_y(), 20.0);
        assert_eq!(first.robot_x(), 5.0);
        assert!(curve.sample(1).is_none());
        assert_eq!(curve.phase(1), Some(0.5));
        assert_eq!(curve.valid_count(), 1);
        assert!(curve.matrix()[(Channel::BallX.index(), 1)].is_nan());
    }

    #[test]
    fn sentinel_does_not_dilute_average() {
        let demos = vec![
            demo(&[(10.0, 20.0), (12.0, 22.0)], 1.0),
            demo(&[(0.0, 0.0), (0.0, 0.0)], 100.0),
        ];
        let s = weighted_sample(&demos, &[], 0.0).unwrap();
        assert_eq!(s.ball_x(), 10.0);
        assert_eq!(s.ball_y(), 20.0);
        assert_eq!(s.robot_x(), 1.0);
    }

    #[test]
    fn weights_scale_each_demonstration() {
        let demos = vec![demo(&[(10.0, 10.0)], 4.0), demo(&[(30.0, 10.0)], 8.0)];
        let weights = [
            ChannelWeights {
                ball_x: 2.0,
                ball_y: 1.0,
                robot_x: 0.5,
            },
            ChannelWeights::UNIT,
        ];
        let s = weighted_sample(&demos, &weights, 0.3).unwrap();
        assert_approx_eq!(s.ball_x(), 25.0);
        assert_approx_eq!(s.ball_y(), 10.0);
        assert_approx_eq!(s.robot_x(), 5.0);
        assert_eq!(s.phase(), 0.3);
    }

    #[test]
    fn no_valid_samples_is_an_error() {
        let demos = vec![demo(&[(0.0, 3.0)], 1.0), demo(&[(3.0, 0.0)], 1.0)];
        let result = weighted_sample(&demos, &[], 0.7);
        assert!(matches!(result, Err(BipError::NoValidSamples { .. })));
    }

    #[test]
    fn phases_step_linearly() {
        let demos = vec![demo(&[(1.0, 1.0); 4], 0.0)];
        let curve = mean_trajectory(&demos, &[], 0.2, 0.6, 4);
        for k in 0..4 {
            assert_approx_eq!(curve.phase(k).unwrap(), 0.2 + 0.1 * k as f64);
        }
        assert!(curve.phase(4).is_none());
        assert!(mean_trajectory(&demos, &[], 0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn curve_exports_missing_as_empty_fields() {
        let demos = vec![demo(&[(10.0, 20.0), (0.0, 0.0)], 5.0)];
        let curve = mean_trajectory(&demos, &[], 0.0, 1.0, 2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curve.csv");
        curve.to_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "phase,ball_x,ball_y,robot_x");
        assert_eq!(lines[1], "0.0,10.0,20.0,5.0");
        assert_eq!(lines[2], "0.5,,,");
    }
}
