//! Fixed-size ensemble of phase hypotheses, one member per demonstration.
use crate::demonstration::{Demonstration, DemonstrationStore};
use crate::error::BipError;
use crate::linalg;
use crate::{
    Channel, ChannelMatrix, ChannelVector, ENSEMBLE_SIZE, EnsembleMatrix, StateSample,
    clamp_phase, uniform_noise,
};

use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Per-channel contribution factors of one member.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelWeights {
    pub ball_x: f64,
    pub ball_y: f64,
    pub robot_x: f64,
}
impl ChannelWeights {
    pub const UNIT: ChannelWeights = ChannelWeights {
        ball_x: 1.0,
        ball_y: 1.0,
        robot_x: 1.0,
    };
    /// Weight for a positional channel; the phase channels have no weight and return `1`.
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::BallX => self.ball_x,
            Channel::BallY => self.ball_y,
            Channel::RobotX => self.robot_x,
            Channel::Phase | Channel::PhaseVelocity => 1.0,
        }
    }
    /// Scale the positional channels of `sample` by these weights.
    pub fn apply(&self, sample: &mut StateSample) {
        for channel in Channel::POSITIONAL {
            sample[channel] *= self.get(channel);
        }
    }
}
impl Default for ChannelWeights {
    fn default() -> Self {
        ChannelWeights::UNIT
    }
}

/// A single ensemble member as read back out of the ensemble matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnsembleMember {
    pub phase: f64,
    pub phase_velocity: f64,
    pub weights: ChannelWeights,
}
impl Display for EnsembleMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsembleMember")
            .field("phase", &self.phase)
            .field("phase_velocity", &self.phase_velocity)
            .field("weight_ball_x", &self.weights.ball_x)
            .field("weight_ball_y", &self.weights.ball_y)
            .field("weight_robot_x", &self.weights.robot_x)
            .finish()
    }
}

/// The ensemble state table.
///
/// Column `i` of the state matrix is member `i`, bound to demonstration `i` for the lifetime of
/// the model. Rows follow [Channel]: phase, phase velocity, then one weight per positional channel.
#[derive(Clone, Debug)]
pub struct EnsembleModel {
    state: EnsembleMatrix,
    initial_state: EnsembleMatrix,
    demonstrations: Vec<Demonstration>,
}
impl Display for EnsembleModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsembleModel")
            .field("members", &ENSEMBLE_SIZE)
            .field("mean_phase", &self.mean_phase())
            .field("mean_phase_velocity", &self.mean_phase_velocity())
            .finish()
    }
}
impl EnsembleModel {
    /// Seed one member per demonstration: phase `0`, phase velocity `1/len`, unit weights.
    ///
    /// Only the first `ENSEMBLE_SIZE` demonstrations of `store` are used.
    ///
    /// # Errors
    /// [BipError::InsufficientDemonstrations] if `store` holds fewer than `ENSEMBLE_SIZE`.
    pub fn initialize(store: &DemonstrationStore) -> Result<Self, BipError> {
        if store.len() < ENSEMBLE_SIZE {
            return Err(BipError::InsufficientDemonstrations {
                required: ENSEMBLE_SIZE,
                available: store.len(),
            });
        }
        if store.len() > ENSEMBLE_SIZE {
            info!(
                "{} demonstrations available, seeding the ensemble from the first {}",
                store.len(),
                ENSEMBLE_SIZE
            );
        }
        let demonstrations: Vec<Demonstration> =
            store.iter().take(ENSEMBLE_SIZE).cloned().collect();
        let mut state = EnsembleMatrix::zeros();
        for (j, demonstration) in demonstrations.iter().enumerate() {
            state[(Channel::Phase.index(), j)] = 0.0;
            state[(Channel::PhaseVelocity.index(), j)] = demonstration.phase_velocity();
            for channel in Channel::POSITIONAL {
                state[(channel.index(), j)] = 1.0;
            }
        }
        Ok(EnsembleModel {
            state,
            initial_state: state,
            demonstrations,
        })
    }
    /// Recompute every member's phase from the absolute phase scalar:
    /// `phase = clamp(phase_scalar * phase_velocity, 0, 1)`.
    pub fn propagate(&mut self, phase_scalar: f64) {
        let (p, v) = (Channel::Phase.index(), Channel::PhaseVelocity.index());
        for j in 0..ENSEMBLE_SIZE {
            self.state[(p, j)] = clamp_phase(phase_scalar * self.state[(v, j)]);
        }
    }
    /// Per-channel mean across members of the current state.
    pub fn ensemble_mean(&self) -> ChannelVector {
        linalg::ensemble_mean(&self.state)
    }
    /// Predicted observation of every member.
    ///
    /// Each member's demonstration is sampled at the member's phase, its positional channels
    /// are scaled by the member's weights, then uniform noise in `[-noise_range/2, noise_range/2]`
    /// is added to the positional channels. The phase rows are not observed and stay zero.
    pub fn observation_matrix<R: Rng>(&self, noise_range: f64, rng: &mut R) -> EnsembleMatrix {
        let mut hx = EnsembleMatrix::zeros();
        for (j, demonstration) in self.demonstrations.iter().enumerate() {
            let mut sample = demonstration.sample(self.state[(Channel::Phase.index(), j)]);
            self.member_weights(j).apply(&mut sample);
            for channel in Channel::POSITIONAL {
                hx[(channel.index(), j)] = sample[channel] + uniform_noise(noise_range, rng);
            }
        }
        hx
    }
    /// Sample covariance `(1/(E-1)) A Aᵀ` of the ensemble state.
    pub fn ensemble_covariance(&self) -> ChannelMatrix {
        let a = linalg::deviation(&self.state, &self.ensemble_mean());
        linalg::sample_covariance(&a)
    }
    /// Raw `5 x E` state, one column per member.
    pub fn state(&self) -> &EnsembleMatrix {
        &self.state
    }
    /// Member `index` read out of the state matrix, `None` past the ensemble size.
    pub fn member(&self, index: usize) -> Option<EnsembleMember> {
        if index >= ENSEMBLE_SIZE {
            return None;
        }
        Some(EnsembleMember {
            phase: self.state[(Channel::Phase.index(), index)],
            phase_velocity: self.state[(Channel::PhaseVelocity.index(), index)],
            weights: self.member_weights(index),
        })
    }
    pub fn members(&self) -> impl Iterator<Item = EnsembleMember> + '_ {
        (0..ENSEMBLE_SIZE).filter_map(|j| self.member(j))
    }
    /// Weights of every member, in member order.
    pub fn weights(&self) -> [ChannelWeights; ENSEMBLE_SIZE] {
        std::array::from_fn(|j| self.member_weights(j))
    }
    fn member_weights(&self, j: usize) -> ChannelWeights {
        ChannelWeights {
            ball_x: self.state[(Channel::BallX.index(), j)],
            ball_y: self.state[(Channel::BallY.index(), j)],
            robot_x: self.state[(Channel::RobotX.index(), j)],
        }
    }
    /// Mean phase across members, the phase the prediction is sampled at.
    pub fn mean_phase(&self) -> f64 {
        self.ensemble_mean()[Channel::Phase.index()]
    }
    pub fn mean_phase_velocity(&self) -> f64 {
        self.ensemble_mean()[Channel::PhaseVelocity.index()]
    }
    /// Demonstrations bound to the members, in member order.
    pub fn demonstrations(&self) -> &[Demonstration] {
        &self.demonstrations
    }
    /// Add the weight rows of `delta` to the ensemble state.
    ///
    /// The phase rows of `delta` are ignored: phase only moves through [EnsembleModel::propagate]
    /// and the phase velocity stays at `1/len`.
    pub fn apply_correction(&mut self, delta: &EnsembleMatrix) {
        for j in 0..ENSEMBLE_SIZE {
            for channel in Channel::POSITIONAL {
                self.state[(channel.index(), j)] += delta[(channel.index(), j)];
            }
        }
    }
    /// Spread the unit weights with uniform noise of width `spread`. The spread weights become
    /// the state that [EnsembleModel::reset] returns to.
    ///
    /// With identical weights the weight rows of the deviation matrix are zero and the Kalman
    /// correction cannot move them, so a non-zero spread is needed for the weights to adapt.
    pub fn with_weight_spread<R: Rng>(mut self, spread: f64, rng: &mut R) -> Self {
        for j in 0..ENSEMBLE_SIZE {
            for channel in Channel::POSITIONAL {
                self.state[(channel.index(), j)] += uniform_noise(spread, rng);
            }
        }
        self.initial_state = self.state;
        self
    }
    /// Return to the state the model was seeded with.
    pub fn reset(&mut self) {
        self.state = self.initial_state;
    }
}
