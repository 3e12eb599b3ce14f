use crate::math::matrix::Matrix;

pub struct MseLoss;

impl MseLoss {
    /// Scalar MSE: mean((predicted - expected)²)
    pub fn loss(predicted: &Matrix, expected: &Matrix) -> f64 {
        let n = (predicted.rows * predicted.cols).max(1) as f64;
        let sum: f64 = predicted
            .data
            .iter()
            .flatten()
            .zip(expected.data.iter().flatten())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        sum / n
    }

    /// ∂L/∂predicted: 2·(predicted - expected) / n
    pub fn derivative(predicted: &Matrix, expected: &Matrix) -> Matrix {
        let n = (predicted.rows * predicted.cols).max(1) as f64;
        predicted.zip_map(expected, |a, b| 2.0 * (a - b) / n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_squares() {
        let p = Matrix::column(&[1.0, 2.0, 3.0]);
        let y = Matrix::column(&[1.0, 0.0, 0.0]);
        assert!((MseLoss::loss(&p, &y) - 13.0 / 3.0).abs() < 1e-12);
        assert_eq!(MseLoss::derivative(&p, &y).flatten(), vec![0.0, 4.0 / 3.0, 2.0]);
    }
}
