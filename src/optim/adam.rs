use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math::matrix::Matrix;
use crate::network::params::{Gradients, ModelParameters, ParamTensor};

/// Adam hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamSettings {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamSettings {
    fn default() -> Self {
        AdamSettings {
            learning_rate: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Adam with bias-corrected first and second moments.
///
/// The moment buffers are allocated for one parameter layout; the optimizer
/// never owns the parameters it updates.
#[derive(Debug, Clone)]
pub struct Adam {
    settings: AdamSettings,
    m: ModelParameters,
    v: ModelParameters,
    t: u64,
}

impl Adam {
    /// Allocates zeroed moments shaped like `params`.
    pub fn new(settings: AdamSettings, params: &ModelParameters) -> Adam {
        Adam {
            settings,
            m: ModelParameters::zeros_like(params),
            v: ModelParameters::zeros_like(params),
            t: 0,
        }
    }

    pub fn settings(&self) -> &AdamSettings {
        &self.settings
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> u64 {
        self.t
    }

    /// Applies one update to `params` given `grads`.
    ///
    /// Both must have exactly the shapes the moment buffers were allocated
    /// with; otherwise nothing is modified and `ShapeMismatch` is returned.
    pub fn step(&mut self, params: &mut ModelParameters, grads: &Gradients) -> Result<()> {
        for t in ParamTensor::ALL {
            let want = self.m.tensor(t).shape();
            for (what, got) in [("parameter", params.tensor(t).shape()), ("gradient", grads.tensor(t).shape())] {
                if got != want {
                    return Err(Error::shape_mismatch(
                        format!("{what} {}", t.name()),
                        format!("{}x{}", want.0, want.1),
                        format!("{}x{}", got.0, got.1),
                    ));
                }
            }
        }

        self.t += 1;
        let AdamSettings { learning_rate: lr, beta1: b1, beta2: b2, epsilon: eps } = self.settings;
        let bc1 = 1.0 - b1.powi(self.t.min(i32::MAX as u64) as i32);
        let bc2 = 1.0 - b2.powi(self.t.min(i32::MAX as u64) as i32);

        for t in ParamTensor::ALL {
            update_tensor(
                params.tensor_mut(t),
                grads.tensor(t),
                self.m.tensor_mut(t),
                self.v.tensor_mut(t),
                |m, v| lr * (m / bc1) / ((v / bc2).sqrt() + eps),
                b1,
                b2,
            );
        }
        Ok(())
    }
}

fn update_tensor<F>(param: &mut Matrix, grad: &Matrix, m: &mut Matrix, v: &mut Matrix, delta: F, b1: f64, b2: f64)
where
    F: Fn(f64, f64) -> f64,
{
    for i in 0..param.rows {
        for j in 0..param.cols {
            let g = grad.data[i][j];
            let mi = b1 * m.data[i][j] + (1.0 - b1) * g;
            let vi = b2 * v.data[i][j] + (1.0 - b2) * g * g;
            m.data[i][j] = mi;
            v.data[i][j] = vi;
            param.data[i][j] -= delta(mi, vi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        // With bias correction the first update is lr·g/(|g|+ε) ≈ lr·sign(g).
        let mut params = ModelParameters::zeros(2, 2);
        let mut grads = ModelParameters::zeros(2, 2);
        grads.w1.data[0][0] = 0.5;
        grads.w1.data[1][1] = -3.0;
        let mut adam = Adam::new(AdamSettings::default(), &params);
        adam.step(&mut params, &grads).unwrap();
        assert!((params.w1.data[0][0] + 0.01).abs() < 1e-9);
        assert!((params.w1.data[1][1] - 0.01).abs() < 1e-9);
        assert_eq!(params.w1.data[0][1], 0.0);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn matches_reference_update_over_several_steps() {
        let s = AdamSettings { learning_rate: 0.1, ..AdamSettings::default() };
        let mut params = ModelParameters::zeros(1, 1);
        let mut adam = Adam::new(s, &params);
        let (mut m, mut v, mut theta) = (0.0f64, 0.0f64, 0.0f64);
        for step in 1..=5 {
            let g = 0.3 * step as f64 - 0.7;
            let mut grads = ModelParameters::zeros(1, 1);
            grads.w2.data[0][0] = g;
            adam.step(&mut params, &grads).unwrap();

            m = s.beta1 * m + (1.0 - s.beta1) * g;
            v = s.beta2 * v + (1.0 - s.beta2) * g * g;
            let m_hat = m / (1.0 - s.beta1.powi(step));
            let v_hat = v / (1.0 - s.beta2.powi(step));
            theta -= s.learning_rate * m_hat / (v_hat.sqrt() + s.epsilon);
            assert!((params.w2.data[0][0] - theta).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let mut params = ModelParameters::zeros(3, 2);
        let mut adam = Adam::new(AdamSettings::default(), &params);
        let grads = ModelParameters::zeros(3, 4);
        let before = params.clone();
        assert!(matches!(adam.step(&mut params, &grads), Err(Error::ShapeMismatch { .. })));
        assert_eq!(params, before);
        assert_eq!(adam.steps(), 0);

        let mut other = ModelParameters::zeros(5, 2);
        let grads = ModelParameters::zeros(5, 2);
        assert!(matches!(adam.step(&mut other, &grads), Err(Error::ShapeMismatch { .. })));
    }
}
