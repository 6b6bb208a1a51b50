//! Phase-indexed ensemble estimation over recorded demonstrations
//!
//! This crate provides the estimation core of a reactive catching robot. A small set of recorded
//! demonstrations (traces of a ball being thrown, the robot moving and the player standing) is used
//! to seed an ensemble filter. Each tick the filter is handed the current elapsed time and a noisy
//! sensor reading and returns a predicted state (ball position and robot position) that a
//! controller can act on. The crate does not render, simulate physics, or dispatch input. Those
//! collaborators only supply sensor readings at a fixed polling cadence and the trace files the
//! demonstrations are loaded from.
//!
//! Primarily built off of three crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the (statically sized) linear algebra used by the filter.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides the
//!   synthetic observation noise that keeps the ensemble spread.
//! - [`csv`](https://crates.io/crates/csv) and [`serde`](https://crates.io/crates/serde): Provide trace and result I/O.
//!
//! ## Crate overview
//!
//! - [demonstration]: Loading recorded traces and phase-indexed sampling of a single demonstration.
//! - [ensemble]: The fixed-size ensemble table (phase, phase velocity and channel weights per member).
//! - [estimator]: The per-tick ensemble Kalman update cycle.
//! - [trajectory]: Weighted mean trajectories over a phase range, for display and diagnostics.
//! - [linalg]: Small dense-matrix helpers (ensemble mean, deviations, covariance, LU inverse).
//! - [sensors]: Sensor readings and the polling cadence that turns elapsed time into a phase scalar.
//! - [trace]: Writing traces in the persisted format read by [demonstration].
//! - [config]: Estimator configuration, loadable from TOML or JSON.
//!
//! ## Phase
//!
//! Every demonstration is indexed by a normalized progress variable, the _phase_ $\phi \in [0, 1]$.
//! A demonstration with $N$ records is sampled at record $\lfloor \phi N \rfloor$ (clamped to the last
//! record). Each ensemble member carries its own phase and phase velocity $\dot\phi = 1/N$ and the
//! phase is recomputed from the absolute phase scalar $s$ (elapsed time multiplied by the sensor
//! frequency, i.e. the number of elapsed sensor ticks) every tick:
//!
//! $$
//! \phi_i = \mathrm{clamp}(s \dot\phi_i, 0, 1)
//! $$
//!
//! ## Channel layout
//!
//! All ensemble-sized quantities share a single channel layout, [Channel]:
//!
//! $$
//! x = [\phi, \dot\phi, b_x, b_y, r_x]
//! $$
//!
//! In the ensemble state the positional rows hold the member's weight for that channel. In the
//! observation space the positional rows hold positions and the phase rows are not observed.
//!
//! ## Ensemble update
//!
//! With $X$ the $5 \times E$ ensemble state, $HX$ the per-member predicted observations and $Y$ the
//! observation ensemble, one update computes
//!
//! $$
//! A = X - \bar{X}, \quad HA = HX - \overline{HX}, \quad
//! S = \frac{1}{E - 1} HA\,HA^T + R, \quad
//! K = \frac{1}{E - 1} A\,HA^T S^{-1}, \quad
//! X \leftarrow X + K (Y - HX)
//! $$
//!
//! with the phase row of $K$ zeroed so that measurements never move the phase directly.

pub mod config;
pub mod demonstration;
pub mod ensemble;
pub mod error;
pub mod estimator;
pub mod linalg;
pub mod sensors;
pub mod trace;
pub mod trajectory;

use nalgebra::{SMatrix, SVector};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::{Index, IndexMut};

pub use config::EstimatorConfig;
pub use demonstration::{Demonstration, DemonstrationStore, Measurement};
pub use ensemble::{ChannelWeights, EnsembleMember, EnsembleModel};
pub use error::BipError;
pub use estimator::PhaseEstimator;
pub use sensors::{SensorReading, SensorSchedule};
pub use trajectory::{TrajectoryCurve, mean_trajectory};

/// Number of ensemble members. Fixed for the lifetime of the process.
pub const ENSEMBLE_SIZE: usize = 8;
/// Number of channels in the shared state/observation layout (see [Channel]).
pub const NUM_CHANNELS: usize = 5;

/// `NUM_CHANNELS x ENSEMBLE_SIZE` matrix, one column per ensemble member.
pub type EnsembleMatrix = SMatrix<f64, NUM_CHANNELS, ENSEMBLE_SIZE>;
/// `NUM_CHANNELS x NUM_CHANNELS` matrix (covariances and gains).
pub type ChannelMatrix = SMatrix<f64, NUM_CHANNELS, NUM_CHANNELS>;
/// Column vector in the shared channel layout.
pub type ChannelVector = SVector<f64, NUM_CHANNELS>;

/// Named channels of the state/observation layout with their fixed row offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Phase = 0,
    PhaseVelocity = 1,
    BallX = 2,
    BallY = 3,
    RobotX = 4,
}
impl Channel {
    pub const ALL: [Channel; NUM_CHANNELS] = [
        Channel::Phase,
        Channel::PhaseVelocity,
        Channel::BallX,
        Channel::BallY,
        Channel::RobotX,
    ];
    /// Channels that are populated by sampling a demonstration or reading a sensor.
    pub const POSITIONAL: [Channel; 3] = [Channel::BallX, Channel::BallY, Channel::RobotX];

    /// Row offset of this channel in every ensemble-sized matrix.
    pub const fn index(self) -> usize {
        self as usize
    }
    pub const fn is_positional(self) -> bool {
        matches!(self, Channel::BallX | Channel::BallY | Channel::RobotX)
    }
    pub const fn name(self) -> &'static str {
        match self {
            Channel::Phase => "phase",
            Channel::PhaseVelocity => "phase_velocity",
            Channel::BallX => "ball_x",
            Channel::BallY => "ball_y",
            Channel::RobotX => "robot_x",
        }
    }
}
impl Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single point in the shared channel layout.
///
/// Samples drawn from a demonstration only populate the positional channels; the phase
/// channels are filled in by the estimator when it reports a prediction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateSample(ChannelVector);
impl Default for StateSample {
    fn default() -> Self {
        StateSample(ChannelVector::zeros())
    }
}
impl Display for StateSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSample")
            .field("phase", &self.phase())
            .field("phase_velocity", &self.phase_velocity())
            .field("ball_x", &self.ball_x())
            .field("ball_y", &self.ball_y())
            .field("robot_x", &self.robot_x())
            .finish()
    }
}
impl StateSample {
    pub fn new(ball_x: f64, ball_y: f64, robot_x: f64) -> Self {
        let mut sample = StateSample::default();
        sample[Channel::BallX] = ball_x;
        sample[Channel::BallY] = ball_y;
        sample[Channel::RobotX] = robot_x;
        sample
    }
    pub fn from_vector(vector: ChannelVector) -> Self {
        StateSample(vector)
    }
    pub fn as_vector(&self) -> &ChannelVector {
        &self.0
    }
    pub fn phase(&self) -> f64 {
        self[Channel::Phase]
    }
    pub fn phase_velocity(&self) -> f64 {
        self[Channel::PhaseVelocity]
    }
    pub fn ball_x(&self) -> f64 {
        self[Channel::BallX]
    }
    pub fn ball_y(&self) -> f64 {
        self[Channel::BallY]
    }
    pub fn robot_x(&self) -> f64 {
        self[Channel::RobotX]
    }
    /// A sample whose ball position is zero on either axis is a sentinel (ball not yet in play)
    /// and does not take part in averaging.
    pub fn has_ball(&self) -> bool {
        self.ball_x() != 0.0 && self.ball_y() != 0.0
    }
}
impl Index<Channel> for StateSample {
    type Output = f64;
    fn index(&self, channel: Channel) -> &f64 {
        &self.0[channel.index()]
    }
}
impl IndexMut<Channel> for StateSample {
    fn index_mut(&mut self, channel: Channel) -> &mut f64 {
        &mut self.0[channel.index()]
    }
}

/// Planar position of a tracked entity, in screen units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}
impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

/// Per-tick estimator interface.
///
/// The caller owns the loop: each sensor tick it hands over the absolute phase scalar (sensor
/// ticks elapsed since the start of the trial) and the current reading, and receives the predicted
/// state. [estimator::PhaseEstimator] is the ensemble implementation.
pub trait StateEstimator {
    fn update(
        &mut self,
        phase_scalar: f64,
        reading: &SensorReading,
    ) -> Result<StateSample, BipError>;
    /// The prediction of the most recent successful update, if any.
    fn get_estimate(&self) -> Option<StateSample>;
    /// Spread of the ensemble state.
    fn get_certainty(&self) -> ChannelMatrix;
}

/// Clamp a phase value into `[0, 1]`. NaN maps to `0`.
pub fn clamp_phase(phase: f64) -> f64 {
    if phase.is_nan() { 0.0 } else { phase.clamp(0.0, 1.0) }
}

/// Uniform noise in `[-range/2, +range/2]`. A non-positive (or NaN) range yields exactly `0`.
pub fn uniform_noise<R: Rng>(range: f64, rng: &mut R) -> f64 {
    if range > 0.0 {
        let half = range / 2.0;
        rng.random_range(-half..=half)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn channel_offsets_are_fixed() {
        for (offset, channel) in Channel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), offset);
        }
        assert!(Channel::POSITIONAL.iter().all(|c| c.is_positional()));
        assert!(!Channel::Phase.is_positional());
        assert!(!Channel::PhaseVelocity.is_positional());
    }

    #[test]
    fn state_sample_accessors() {
        let mut sample = StateSample::new(10.0, 20.0, 30.0);
        sample[Channel::Phase] = 0.25;
        assert_eq!(sample.ball_x(), 10.0);
        assert_eq!(sample.ball_y(), 20.0);
        assert_eq!(sample.robot_x(), 30.0);
        assert_eq!(sample.phase(), 0.25);
        assert_eq!(sample.phase_velocity(), 0.0);
        assert_eq!(sample.as_vector()[Channel::BallY.index()], 20.0);
    }

    #[test]
    fn ball_sentinel() {
        assert!(StateSample::new(10.0, 20.0, 0.0).has_ball());
        assert!(!StateSample::new(0.0, 0.0, 5.0).has_ball());
        assert!(!StateSample::new(10.0, 0.0, 5.0).has_ball());
    }

    #[test]
    fn clamp_phase_bounds() {
        assert_eq!(clamp_phase(-0.5), 0.0);
        assert_eq!(clamp_phase(1.5), 1.0);
        assert_eq!(clamp_phase(0.3), 0.3);
        assert_eq!(clamp_phase(f64::NAN), 0.0);
        assert_eq!(clamp_phase(f64::INFINITY), 1.0);
    }

    #[test]
    fn uniform_noise_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let v = uniform_noise(4.0, &mut rng);
            assert!((-2.0..=2.0).contains(&v));
        }
        assert_eq!(uniform_noise(0.0, &mut rng), 0.0);
        assert_eq!(uniform_noise(-1.0, &mut rng), 0.0);
    }

    #[test]
    fn channel_names_round_trip_through_serde() {
        let json = serde_json::to_string(&Channel::PhaseVelocity).unwrap();
        assert_eq!(json, "\"phase_velocity\"");
        let channel: Channel = serde_json::from_str("\"robot_x\"").unwrap();
        assert_eq!(channel, Channel::RobotX);
        assert_eq!(Channel::BallX.to_string(), "ball_x");
    }
}
