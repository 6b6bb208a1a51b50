//! Ensemble Kalman estimator over the demonstration ensemble.
//!
//! One call to [StateEstimator::update] runs a complete predict/correct cycle:
//!
//! 1. Replicate the sensor reading over the ensemble with uniform noise (`sensor_noise_range`).
//! 2. Propagate every member's phase from the absolute phase scalar.
//! 3. `A = X - mean(X)`.
//! 4. `HX`: each member's demonstration at its phase, scaled by its weights, plus noise
//!    (`observation_noise_range`).
//! 5. `HA = HX - mean(HX)`.
//! 6. `R`: diagonal, entries drawn from `[range/2, range]` (`measurement_noise_range`).
//! 7. `S = (1/(E-1)) HA HAᵀ + R`, symmetrized.
//! 8. `S⁻¹` by LU. A singular `S` skips the correction and is reported to the caller.
//! 9. `K = (1/(E-1)) A HAᵀ S⁻¹` with the phase and phase-velocity rows zeroed.
//! 10. `X += K (Y - HX)` on the weight rows.
//! 11. Predict the weighted mean of the demonstrations at the updated mean phase.
//!
//! The phase is only ever moved by propagation, and each member's phase velocity stays at the
//! `1/len` of its demonstration. Measurements only reach the weights.
use crate::config::EstimatorConfig;
use crate::demonstration::DemonstrationStore;
use crate::ensemble::EnsembleModel;
use crate::error::BipError;
use crate::linalg;
use crate::sensors::{SensorReading, SensorSchedule};
use crate::trajectory::{self, TrajectoryCurve};
use crate::{
    Channel, ChannelMatrix, ENSEMBLE_SIZE, EnsembleMatrix, NUM_CHANNELS, StateEstimator,
    StateSample, uniform_noise,
};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::{self, Display};
use std::path::Path;

/// Kalman gain `(1/(E-1)) A HAᵀ S⁻¹` with the phase and phase-velocity rows forced to zero.
pub fn kalman_gain(
    a: &EnsembleMatrix,
    ha: &EnsembleMatrix,
    s_inverse: &ChannelMatrix,
) -> ChannelMatrix {
    let mut gain = linalg::cross_covariance(a, ha) * s_inverse;
    gain.row_mut(Channel::Phase.index()).fill(0.0);
    gain.row_mut(Channel::PhaseVelocity.index()).fill(0.0);
    gain
}

/// Diagonal measurement noise with entries uniform in `[range/2, range]`; zero for `range <= 0`.
pub fn measurement_noise<R: Rng>(range: f64, rng: &mut R) -> ChannelMatrix {
    let mut r = ChannelMatrix::zeros();
    if range > 0.0 {
        for i in 0..NUM_CHANNELS {
            r[(i, i)] = rng.random_range(range / 2.0..=range);
        }
    }
    r
}

/// Ensemble Kalman estimator of the phase of an ongoing throw.
///
/// Owns the ensemble (and through it the demonstrations), the configuration, the sensor clock
/// and a seeded random number generator, so two estimators built from the same store and
/// configuration produce the same estimates for the same readings.
#[derive(Clone, Debug)]
pub struct PhaseEstimator {
    ensemble: EnsembleModel,
    config: EstimatorConfig,
    schedule: SensorSchedule,
    rng: StdRng,
    last_gain: Option<ChannelMatrix>,
    last_innovation_covariance: Option<ChannelMatrix>,
    last_estimate: Option<StateSample>,
    ticks: u64,
}
impl Display for PhaseEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseEstimator")
            .field("ticks", &self.ticks)
            .field("mean_phase", &self.ensemble.mean_phase())
            .field("mean_phase_velocity", &self.ensemble.mean_phase_velocity())
            .field("has_estimate", &self.last_estimate.is_some())
            .finish()
    }
}
impl PhaseEstimator {
    /// Seed the ensemble from `store` and take ownership of `config`.
    ///
    /// # Errors
    /// [BipError::Config] for an invalid configuration,
    /// [BipError::InsufficientDemonstrations] if `store` holds fewer than `ENSEMBLE_SIZE`.
    pub fn new(store: &DemonstrationStore, config: EstimatorConfig) -> Result<Self, BipError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut ensemble = EnsembleModel::initialize(store)?;
        if config.initial_weight_spread > 0.0 {
            ensemble = ensemble.with_weight_spread(config.initial_weight_spread, &mut rng);
        }
        info!(
            "Estimator ready: {} members, sensor frequency {} Hz, seed {}",
            ENSEMBLE_SIZE, config.sensor_frequency_hz, config.seed
        );
        Ok(PhaseEstimator {
            ensemble,
            schedule: SensorSchedule::new(config.sensor_frequency_hz),
            config,
            rng,
            last_gain: None,
            last_innovation_covariance: None,
            last_estimate: None,
            ticks: 0,
        })
    }
    /// Load `ENSEMBLE_SIZE` demonstrations matching `config.trace_prefix` from `dir`.
    pub fn from_directory<P: AsRef<Path>>(
        dir: P,
        config: EstimatorConfig,
    ) -> Result<Self, BipError> {
        let store = DemonstrationStore::from_directory(dir, &config.trace_prefix, ENSEMBLE_SIZE)?;
        PhaseEstimator::new(&store, config)
    }
    /// [StateEstimator::update] with the phase scalar derived from absolute time.
    pub fn update_at(
        &mut self,
        abs_ns: u64,
        reading: &SensorReading,
    ) -> Result<StateSample, BipError> {
        let phase_scalar = self.schedule.phase_scalar(abs_ns);
        self.update(phase_scalar, reading)
    }
    /// Advance the sensor clock by `elapsed_ns`; true if a reading (and an update) is due.
    pub fn sensor_due(&mut self, elapsed_ns: u64) -> bool {
        self.schedule.poll(elapsed_ns)
    }
    /// Predicted state at an arbitrary phase under the current weights.
    pub fn forecast(&self, phase: f64) -> Result<StateSample, BipError> {
        let mut sample = trajectory::weighted_sample(
            self.ensemble.demonstrations(),
            &self.ensemble.weights(),
            phase,
        )?;
        sample[Channel::PhaseVelocity] = self.ensemble.mean_phase_velocity();
        Ok(sample)
    }
    /// Mean trajectory under the current weights.
    pub fn mean_trajectory(
        &self,
        phase_start: f64,
        phase_end: f64,
        num_samples: usize,
    ) -> TrajectoryCurve {
        trajectory::mean_trajectory(
            self.ensemble.demonstrations(),
            &self.ensemble.weights(),
            phase_start,
            phase_end,
            num_samples,
        )
    }
    /// Gain of the latest update that reached the correction step.
    pub fn last_gain(&self) -> Option<&ChannelMatrix> {
        self.last_gain.as_ref()
    }
    /// Innovation covariance `S` of the latest update, including a singular one.
    pub fn last_innovation_covariance(&self) -> Option<&ChannelMatrix> {
        self.last_innovation_covariance.as_ref()
    }
    /// Start a new trial: phases back to zero, weights back to their seeded values.
    pub fn reset(&mut self) {
        self.ensemble.reset();
        self.schedule.reset();
        self.last_gain = None;
        self.last_innovation_covariance = None;
        self.last_estimate = None;
        self.ticks = 0;
    }
    /// Current ensemble state, for inspection between updates.
    pub fn ensemble(&self) -> &EnsembleModel {
        &self.ensemble
    }
    /// Configuration the estimator was built with.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }
    /// Number of update calls since construction or the last reset.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn observation_ensemble(&mut self, reading: &SensorReading) -> EnsembleMatrix {
        let z = reading.to_observation();
        let mut y = EnsembleMatrix::zeros();
        for j in 0..ENSEMBLE_SIZE {
            for channel in Channel::POSITIONAL {
                let i = channel.index();
                y[(i, j)] = z[i] + uniform_noise(self.config.sensor_noise_range, &mut self.rng);
            }
        }
        y
    }
}
impl StateEstimator for PhaseEstimator {
    fn update(
        &mut self,
        phase_scalar: f64,
        reading: &SensorReading,
    ) -> Result<StateSample, BipError> {
        self.ticks += 1;
        let observations = self.observation_ensemble(reading);
        self.ensemble.propagate(phase_scalar);

        let a = linalg::deviation(self.ensemble.state(), &self.ensemble.ensemble_mean());
        let hx = self
            .ensemble
            .observation_matrix(self.config.observation_noise_range, &mut self.rng);
        let ha = linalg::deviation(&hx, &linalg::ensemble_mean(&hx));
        let r = measurement_noise(self.config.measurement_noise_range, &mut self.rng);
        let s = linalg::symmetrize(&(linalg::sample_covariance(&ha) + r));
        self.last_innovation_covariance = Some(s);

        let Some(s_inverse) = linalg::lu_inverse(&s) else {
            warn!(
                "Tick {}: innovation covariance is singular, skipping correction",
                self.ticks
            );
            return Err(BipError::SingularCovariance);
        };
        let gain = kalman_gain(&a, &ha, &s_inverse);
        let correction = gain * (observations - hx);
        self.ensemble.apply_correction(&correction);
        self.last_gain = Some(gain);

        let mean = self.ensemble.ensemble_mean();
        let mean_phase = mean[Channel::Phase.index()];
        let mut estimate = trajectory::weighted_sample(
            self.ensemble.demonstrations(),
            &self.ensemble.weights(),
            mean_phase,
        )?;
        estimate[Channel::PhaseVelocity] = mean[Channel::PhaseVelocity.index()];
        debug!(
            "Tick {}: phase scalar {:.3}, mean phase {:.4}, estimate ball=({:.2}, {:.2}) robot_x={:.2}",
            self.ticks,
            phase_scalar,
            mean_phase,
            estimate.ball_x(),
            estimate.ball_y(),
            estimate.robot_x()
        );
        self.last_estimate = Some(estimate);
        Ok(estimate)
    }
    fn get_estimate(&self) -> Option<StateSample> {
        self.last_estimate
    }
    fn get_certainty(&self) -> ChannelMatrix {
        self.ensemble.ensemble_covariance()
    }
}
