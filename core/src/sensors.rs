//! Sensor readings and the fixed polling cadence they arrive at.
//!
//! The estimator is driven once per sensor tick. The phase scalar handed to
//! [crate::estimator::PhaseEstimator::update] is the number of sensor ticks elapsed since the
//! start of the trial, `abs_ns * frequency / 1e9`, which matches a demonstration's phase velocity
//! of `1 / len` per recorded tick.
use crate::demonstration::Measurement;
use crate::{Channel, ChannelVector, Point};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SENSOR_FREQUENCY_HZ: f64 = 60.0;
const NANOS_PER_SECOND: f64 = 1e9;

/// One raw reading of the tracked entities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub player: Point,
    pub robot: Point,
    pub ball: Point,
}
impl SensorReading {
    pub fn new(player: Point, robot: Point, ball: Point) -> Self {
        SensorReading {
            player,
            robot,
            ball,
        }
    }
    pub fn from_measurement(measurement: &Measurement) -> Self {
        SensorReading {
            player: measurement.player,
            robot: measurement.robot,
            ball: measurement.ball,
        }
    }
    /// The reading in observation space. Phase rows are unobserved and zero.
    pub fn to_observation(&self) -> ChannelVector {
        let mut z = ChannelVector::zeros();
        z[Channel::BallX.index()] = self.ball.x;
        z[Channel::BallY.index()] = self.ball.y;
        z[Channel::RobotX.index()] = self.robot.x;
        z
    }
    /// Add integer noise in `[-max_noise/2, max_noise/2)` to every coordinate, independently.
    /// A `max_noise` of zero returns the reading unchanged.
    pub fn with_noise<R: Rng>(&self, max_noise: u32, rng: &mut R) -> Self {
        if max_noise == 0 {
            return *self;
        }
        let mut jitter = |p: Point| {
            let half = i64::from(max_noise >> 1);
            let dx = rng.random_range(0..i64::from(max_noise)) - half;
            let dy = rng.random_range(0..i64::from(max_noise)) - half;
            Point::new(p.x + dx as f64, p.y + dy as f64)
        };
        SensorReading {
            player: jitter(self.player),
            robot: jitter(self.robot),
            ball: jitter(self.ball),
        }
    }
    /// Add zero-mean Gaussian noise with standard deviation `std_dev` to every coordinate.
    /// A non-positive or non-finite `std_dev` returns the reading unchanged.
    pub fn with_gaussian_noise<R: Rng>(&self, std_dev: f64, rng: &mut R) -> Self {
        let normal = match Normal::new(0.0, std_dev) {
            Ok(normal) if std_dev > 0.0 => normal,
            _ => return *self,
        };
        let mut jitter = |p: Point| {
            let dx = normal.sample(&mut *rng);
            let dy = normal.sample(&mut *rng);
            Point::new(p.x + dx, p.y + dy)
        };
        SensorReading {
            player: jitter(self.player),
            robot: jitter(self.robot),
            ball: jitter(self.ball),
        }
    }
}
impl From<&Measurement> for SensorReading {
    fn from(measurement: &Measurement) -> Self {
        SensorReading::from_measurement(measurement)
    }
}

/// Accumulates elapsed simulation time and fires once per sensor period, carrying the remainder
/// into the next period.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorSchedule {
    frequency_hz: f64,
    elapsed_ns: u64,
}
impl Default for SensorSchedule {
    fn default() -> Self {
        SensorSchedule::new(DEFAULT_SENSOR_FREQUENCY_HZ)
    }
}
impl SensorSchedule {
    pub fn new(frequency_hz: f64) -> Self {
        SensorSchedule {
            frequency_hz,
            elapsed_ns: 0,
        }
    }
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }
    /// Sensor period in whole nanoseconds.
    pub fn period_ns(&self) -> u64 {
        (NANOS_PER_SECOND / self.frequency_hz) as u64
    }
    /// Advance by `elapsed_ns`; true if a sensor reading is due.
    ///
    /// At most one reading fires per call. If the caller falls behind, the backlog drains one
    /// period per subsequent call.
    pub fn poll(&mut self, elapsed_ns: u64) -> bool {
        self.elapsed_ns = self.elapsed_ns.saturating_add(elapsed_ns);
        let period = self.period_ns();
        if self.elapsed_ns >= period {
            self.elapsed_ns -= period;
            true
        } else {
            false
        }
    }
    /// Sensor ticks elapsed at absolute time `abs_ns`.
    pub fn phase_scalar(&self, abs_ns: u64) -> f64 {
        abs_ns as f64 * self.frequency_hz / NANOS_PER_SECOND
    }
    pub fn reset(&mut self) {
        self.elapsed_ns = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn default_cadence_is_sixty_hertz() {
        let schedule = SensorSchedule::default();
        assert_eq!(schedule.frequency_hz(), 60.0);
        assert_eq!(schedule.period_ns(), 16_666_666);
    }

    #[test]
    fn poll_fires_once_per_period() {
        let mut schedule = SensorSchedule::new(100.0); // 10 ms
        let step = 1_000_000; // 1 ms frames
        let fired = (0..1000).filter(|_| schedule.poll(step)).count();
        assert_eq!(fired, 100);
    }

    #[test]
    fn poll_carries_remainder() {
        let mut schedule = SensorSchedule::new(100.0);
        assert!(!schedule.poll(6_000_000));
        assert!(schedule.poll(6_000_000)); // 12 ms, 2 ms carried
        assert!(!schedule.poll(7_000_000)); // 9 ms
        assert!(schedule.poll(1_000_000));
        schedule.reset();
        assert!(!schedule.poll(9_999_999));
    }

    #[test]
    fn phase_scalar_counts_ticks() {
        let schedule = SensorSchedule::default();
        assert_approx_eq!(schedule.phase_scalar(1_000_000_000), 60.0);
        assert_approx_eq!(schedule.phase_scalar(500_000_000), 30.0);
        assert_eq!(schedule.phase_scalar(0), 0.0);
    }

    #[test]
    fn observation_layout() {
        let reading = SensorReading::new(
            Point::new(1.0, 2.0),
            Point::new(3.0, 4.0),
            Point::new(5.0, 6.0),
        );
        let z = reading.to_observation();
        assert_eq!(z[Channel::Phase.index()], 0.0);
        assert_eq!(z[Channel::PhaseVelocity.index()], 0.0);
        assert_eq!(z[Channel::BallX.index()], 5.0);
        assert_eq!(z[Channel::BallY.index()], 6.0);
        assert_eq!(z[Channel::RobotX.index()], 3.0);
    }

    #[test]
    fn noise_is_integer_and_bounded() {
        let mut rng = StdRng::seed_from_u64(11);
        let reading = SensorReading::new(
            Point::new(100.0, 100.0),
            Point::new(200.0, 200.0),
            Point::new(300.0, 300.0),
        );
        assert_eq!(reading.with_noise(0, &mut rng), reading);
        for _ in 0..200 {
            let noisy = reading.with_noise(6, &mut rng);
            let dx = noisy.ball.x - 300.0;
            assert_eq!(dx.fract(), 0.0);
            assert!((-3.0..3.0).contains(&dx));
            assert!((-3.0..3.0).contains(&(noisy.player.y - 100.0)));
        }
    }

    #[test]
    fn gaussian_noise_is_centred() {
        let mut rng = StdRng::seed_from_u64(5);
        let reading =
            SensorReading::new(Point::default(), Point::default(), Point::new(50.0, 50.0));
        assert_eq!(reading.with_gaussian_noise(0.0, &mut rng), reading);
        assert_eq!(reading.with_gaussian_noise(f64::NAN, &mut rng), reading);
        let n = 2000;
        let mean = (0..n)
            .map(|_| reading.with_gaussian_noise(1.0, &mut rng).ball.x)
            .sum::<f64>()
            / n as f64;
        assert!((mean - 50.0).abs() < 0.2);
    }
}
