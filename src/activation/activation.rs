use serde::{Deserialize, Serialize};
use std::f64::consts::E;

/// Hidden-layer activation. The output layer is always linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Tanh,
    #[serde(rename = "relu")]
    ReLU,
    Sigmoid,
}

impl Activation {
    pub fn function(&self, x: f64) -> f64 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::ReLU => if x > 0.0 { x } else { 0.0 },
            Activation::Sigmoid => {
                // Split on sign so exp() never overflows.
                if x >= 0.0 {
                    1.0 / (1.0 + E.powf(-x))
                } else {
                    let ex = E.powf(x);
                    ex / (1.0 + ex)
                }
            }
        }
    }

    /// Derivative expressed through the activation's own output `a = f(z)`.
    ///
    /// All three activations admit this form, which lets the backward pass
    /// work from the hidden activations alone.
    pub fn derivative_from_output(&self, a: f64) -> f64 {
        match self {
            Activation::Tanh => 1.0 - a * a,
            Activation::ReLU => if a > 0.0 { 1.0 } else { 0.0 },
            Activation::Sigmoid => a * (1.0 - a),
        }
    }

    /// True when the layer should use He rather than Xavier initialization.
    pub fn prefers_he_init(&self) -> bool {
        matches!(self, Activation::ReLU)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivative_matches_finite_difference() {
        let h = 1e-6;
        for act in [Activation::Tanh, Activation::Sigmoid, Activation::ReLU] {
            for &z in &[-1.3, -0.2, 0.4, 2.1] {
                let numeric = (act.function(z + h) - act.function(z - h)) / (2.0 * h);
                let analytic = act.derivative_from_output(act.function(z));
                assert!((numeric - analytic).abs() < 1e-6, "{act:?} at {z}");
            }
        }
    }

    #[test]
    fn sigmoid_is_stable_for_large_inputs() {
        assert_eq!(Activation::Sigmoid.function(-800.0), 0.0);
        assert_eq!(Activation::Sigmoid.function(800.0), 1.0);
    }

    #[test]
    fn serde_names() {
        assert_eq!(serde_json::to_string(&Activation::ReLU).unwrap(), "\"relu\"");
        let a: Activation = serde_json::from_str("\"tanh\"").unwrap();
        assert_eq!(a, Activation::Tanh);
    }
}
