use rand::seq::SliceRandom;
use rand::Rng;

use crate::loss::mse::MseLoss;
use crate::math::matrix::Matrix;
use crate::network::network::NetworkModel;
use crate::optim::adam::Adam;

/// Why an epoch could not finish.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EpochFault {
    NonFiniteLoss { batch: usize },
    NonFiniteGradient { batch: usize },
    NonFiniteParameters { batch: usize },
    Optimizer(String),
}

impl std::fmt::Display for EpochFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpochFault::NonFiniteLoss { batch } => write!(f, "non-finite loss in batch {batch}"),
            EpochFault::NonFiniteGradient { batch } => write!(f, "non-finite gradient in batch {batch}"),
            EpochFault::NonFiniteParameters { batch } => {
                write!(f, "non-finite parameters after batch {batch}")
            }
            EpochFault::Optimizer(msg) => write!(f, "{msg}"),
        }
    }
}

/// Runs one full pass of mini-batch Adam over `(x, y)`.
///
/// Sample order is shuffled with `rng` when `shuffle` is set. Every batch
/// gets exactly one optimizer step. Returns the sample-weighted mean of the
/// batch losses, each measured before its own update.
pub(crate) fn run_one_epoch<R: Rng + ?Sized>(
    model: &mut NetworkModel,
    optimizer: &mut Adam,
    x: &Matrix,
    y: &Matrix,
    batch_size: usize,
    shuffle: bool,
    rng: &mut R,
) -> Result<f64, EpochFault> {
    let n = x.rows;
    let mut indices: Vec<usize> = (0..n).collect();
    if shuffle {
        indices.shuffle(rng);
    }

    let mut total_loss = 0.0;
    for (batch, chunk) in indices.chunks(batch_size.max(1)).enumerate() {
        let xb = x.select_rows(chunk);
        let yb = y.select_rows(chunk);

        let pass = model.forward(&xb);
        let loss = MseLoss::loss(&pass.output, &yb);
        if !loss.is_finite() {
            return Err(EpochFault::NonFiniteLoss { batch });
        }
        total_loss += loss * chunk.len() as f64;

        let grads = model.backward(&xb, &yb, &pass.hidden, &pass.output);
        if !grads.is_finite() {
            return Err(EpochFault::NonFiniteGradient { batch });
        }

        optimizer
            .step(&mut model.params, &grads)
            .map_err(|e| EpochFault::Optimizer(e.to_string()))?;
        if !model.params.is_finite() {
            return Err(EpochFault::NonFiniteParameters { batch });
        }
    }

    Ok(total_loss / n.max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::Activation;
    use crate::optim::adam::AdamSettings;
    use rand::{rngs::StdRng, SeedableRng};

    fn line_data(n: usize) -> (Matrix, Matrix) {
        let xs: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64 / n as f64, 1.0 - i as f64 / n as f64]).collect();
        let ys: Vec<f64> = xs.iter().map(|r| 0.3 * r[0] - 0.2 * r[1] + 0.1).collect();
        (Matrix::from_data(xs), Matrix::column(&ys))
    }

    #[test]
    fn loss_decreases_over_epochs() {
        let (x, y) = line_data(40);
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = NetworkModel::new(2, 4, Activation::Tanh, &mut rng);
        let mut adam = Adam::new(AdamSettings::default(), &model.params);
        let first = run_one_epoch(&mut model, &mut adam, &x, &y, 8, true, &mut rng).unwrap();
        let mut last = first;
        for _ in 0..60 {
            last = run_one_epoch(&mut model, &mut adam, &x, &y, 8, true, &mut rng).unwrap();
        }
        assert!(last < first, "{last} !< {first}");
        // 40 samples in batches of 8: five steps per epoch.
        assert_eq!(adam.steps(), 61 * 5);
    }

    #[test]
    fn partial_last_batch_gets_a_step() {
        let (x, y) = line_data(10);
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = NetworkModel::new(2, 3, Activation::ReLU, &mut rng);
        let mut adam = Adam::new(AdamSettings::default(), &model.params);
        run_one_epoch(&mut model, &mut adam, &x, &y, 4, false, &mut rng).unwrap();
        assert_eq!(adam.steps(), 3);
    }

    #[test]
    fn non_finite_targets_fault() {
        let (x, mut y) = line_data(6);
        y.data[2][0] = f64::NAN;
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = NetworkModel::new(2, 3, Activation::Tanh, &mut rng);
        let mut adam = Adam::new(AdamSettings::default(), &model.params);
        let fault = run_one_epoch(&mut model, &mut adam, &x, &y, 6, false, &mut rng).unwrap_err();
        assert_eq!(fault, EpochFault::NonFiniteLoss { batch: 0 });
    }
}
