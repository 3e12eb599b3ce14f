use rand::Rng;

use crate::activation::activation::Activation;
use crate::loss::mse::MseLoss;
use crate::math::matrix::Matrix;
use crate::network::params::{Gradients, ModelParameters};

/// Intermediate values of one forward pass, kept for backprop.
#[derive(Debug, Clone)]
pub struct ForwardPass {
    /// Hidden activations, (samples × hidden).
    pub hidden: Matrix,
    /// Predictions, (samples × 1).
    pub output: Matrix,
}

/// input → dense(hidden, activation) → dense(1, linear).
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkModel {
    pub params: ModelParameters,
    pub activation: Activation,
}

impl NetworkModel {
    /// Builds a network with variance-scaled random weights and zero biases.
    ///
    /// Weights are drawn from `rng`, so a seeded generator gives identical
    /// parameters on every run.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        hidden_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> NetworkModel {
        let (w1, w2) = if activation.prefers_he_init() {
            (Matrix::he(input_size, hidden_size, rng), Matrix::he(hidden_size, 1, rng))
        } else {
            (Matrix::xavier(input_size, hidden_size, rng), Matrix::xavier(hidden_size, 1, rng))
        };
        NetworkModel {
            params: ModelParameters {
                w1,
                b1: Matrix::zeros(1, hidden_size),
                w2,
                b2: Matrix::zeros(1, 1),
            },
            activation,
        }
    }

    pub fn from_parameters(params: ModelParameters, activation: Activation) -> NetworkModel {
        NetworkModel { params, activation }
    }

    pub fn forward(&self, x: &Matrix) -> ForwardPass {
        forward_with(&self.params, self.activation, x)
    }

    pub fn predict(&self, x: &Matrix) -> Matrix {
        self.forward(x).output
    }

    /// Gradients of `mean((output - y)²)` with respect to every parameter.
    pub fn backward(&self, x: &Matrix, y: &Matrix, hidden: &Matrix, output: &Matrix) -> Gradients {
        // δ at the linear output: ∂L/∂ŷ
        let d_out = MseLoss::derivative(output, y);

        let w2 = hidden.transpose().matmul(&d_out);
        let b2 = d_out.sum_rows();

        // Propagate through W2, then through the activation.
        let d_hidden = d_out.matmul(&self.params.w2.transpose());
        let act_derivative = hidden.map(|a| self.activation.derivative_from_output(a));
        let d_pre = d_hidden.hadamard(&act_derivative);

        let w1 = x.transpose().matmul(&d_pre);
        let b1 = d_pre.sum_rows();

        Gradients { w1, b1, w2, b2 }
    }

    pub fn loss(&self, x: &Matrix, y: &Matrix) -> f64 {
        evaluate_with(&self.params, self.activation, x, y)
    }
}

/// Forward pass with an arbitrary parameter set.
pub fn forward_with(params: &ModelParameters, activation: Activation, x: &Matrix) -> ForwardPass {
    let hidden = x.matmul(&params.w1).add_row(&params.b1).map(|z| activation.function(z));
    let output = hidden.matmul(&params.w2).add_row(&params.b2);
    ForwardPass { hidden, output }
}

/// MSE of an arbitrary parameter set over `(x, y)`.
pub fn evaluate_with(params: &ModelParameters, activation: Activation, x: &Matrix, y: &Matrix) -> f64 {
    if x.rows == 0 {
        return 0.0;
    }
    MseLoss::loss(&forward_with(params, activation, x).output, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::params::ParamTensor;
    use rand::{rngs::StdRng, SeedableRng};

    fn toy_data() -> (Matrix, Matrix) {
        let x = Matrix::from_data(vec![
            vec![0.5, -1.0, 0.2],
            vec![-0.3, 0.8, 1.1],
            vec![1.2, 0.1, -0.7],
            vec![0.0, -0.4, 0.9],
        ]);
        let y = Matrix::column(&[0.3, 0.9, 0.1, 0.6]);
        (x, y)
    }

    #[test]
    fn gradients_match_finite_differences() {
        let (x, y) = toy_data();
        for activation in [Activation::Tanh, Activation::Sigmoid, Activation::ReLU] {
            let mut model = NetworkModel::new(3, 4, activation, &mut StdRng::seed_from_u64(11));
            // Non-zero biases so every term is exercised.
            model.params.b1 = Matrix::from_data(vec![vec![0.1, -0.2, 0.05, 0.3]]);
            model.params.b2 = Matrix::from_data(vec![vec![0.15]]);

            let pass = model.forward(&x);
            let grads = model.backward(&x, &y, &pass.hidden, &pass.output);

            let h = 1e-6;
            for t in ParamTensor::ALL {
                let (rows, cols) = model.params.tensor(t).shape();
                for r in 0..rows {
                    for c in 0..cols {
                        let base = model.params.tensor(t).data[r][c];
                        let mut plus = model.params.clone();
                        plus.tensor_mut(t).data[r][c] = base + h;
                        let mut minus = model.params.clone();
                        minus.tensor_mut(t).data[r][c] = base - h;
                        let numeric = (evaluate_with(&plus, activation, &x, &y)
                            - evaluate_with(&minus, activation, &x, &y))
                            / (2.0 * h);
                        let analytic = grads.tensor(t).data[r][c];
                        assert!(
                            (numeric - analytic).abs() < 1e-5,
                            "{activation:?} {}[{r},{c}]: numeric {numeric} vs analytic {analytic}",
                            t.name()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn forward_is_pure_and_shaped() {
        let (x, _) = toy_data();
        let model = NetworkModel::new(3, 5, Activation::Tanh, &mut StdRng::seed_from_u64(1));
        let before = model.clone();
        let a = model.forward(&x);
        let b = model.forward(&x);
        assert_eq!(a.output, b.output);
        assert_eq!(a.hidden.shape(), (4, 5));
        assert_eq!(a.output.shape(), (4, 1));
        assert_eq!(model, before);
    }

    #[test]
    fn init_is_seeded_with_zero_biases() {
        let a = NetworkModel::new(4, 4, Activation::ReLU, &mut StdRng::seed_from_u64(42));
        let b = NetworkModel::new(4, 4, Activation::ReLU, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.params, b.params);
        assert!(a.params.b1.flatten().iter().all(|&v| v == 0.0));
        assert_eq!(a.params.b2_value(), 0.0);
    }
}
