use rand::Rng;
use std::f64::consts::PI;

/// Dense row-major `f64` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<Vec<f64>>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix {
            rows,
            cols,
            data: vec![vec![0.0; cols]; rows],
        }
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        // Both draws in (0, 1] so that ln() stays finite.
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    fn normal<R: Rng + ?Sized>(rows: usize, cols: usize, std_dev: f64, rng: &mut R) -> Matrix {
        let mut res = Matrix::zeros(rows, cols);
        for i in 0..rows {
            for j in 0..cols {
                res.data[i][j] = Matrix::sample_standard_normal(rng) * std_dev;
            }
        }
        res
    }

    /// He initialization: samples from N(0, sqrt(2 / rows)).
    ///
    /// Recommended before ReLU layers. Shape is (fan_in, fan_out), so `rows`
    /// is the number of input connections.
    pub fn he<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        Matrix::normal(rows, cols, (2.0 / rows.max(1) as f64).sqrt(), rng)
    }

    /// Xavier (Glorot) initialization: samples from N(0, sqrt(1 / rows)).
    ///
    /// Recommended before Sigmoid/Tanh layers. Keeps the variance of
    /// activations and gradients roughly equal across layers.
    pub fn xavier<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        Matrix::normal(rows, cols, (1.0 / rows.max(1) as f64).sqrt(), rng)
    }

    pub fn from_data(data: Vec<Vec<f64>>) -> Matrix {
        Matrix {
            rows: data.len(),
            cols: data.first().map_or(0, |row| row.len()),
            data,
        }
    }

    /// Builds a matrix from a flat row-major buffer.
    pub fn from_flat(rows: usize, cols: usize, values: &[f64]) -> Option<Matrix> {
        if values.len() != rows * cols {
            return None;
        }
        let data = if cols == 0 {
            vec![Vec::new(); rows]
        } else {
            values.chunks(cols).map(|c| c.to_vec()).collect()
        };
        Some(Matrix { rows, cols, data })
    }

    /// Single-column matrix.
    pub fn column(values: &[f64]) -> Matrix {
        Matrix {
            rows: values.len(),
            cols: 1,
            data: values.iter().map(|&v| vec![v]).collect(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> bool {
        match self.data.get_mut(row).and_then(|r| r.get_mut(col)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn flatten(&self) -> Vec<f64> {
        self.data.iter().flatten().copied().collect()
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);

        for i in 0..res.rows {
            for j in 0..res.cols {
                res.data[i][j] = self.data[j][i];
            }
        }

        res
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .map(|row| row.iter().map(|&x| functor(x)).collect())
                .collect(),
        }
    }

    /// Applies `functor` to matching elements of two same-shape matrices.
    pub fn zip_map<F>(&self, other: &Matrix, functor: F) -> Matrix
    where
        F: Fn(f64, f64) -> f64,
    {
        assert_eq!(self.shape(), other.shape(), "Matrices are of incorrect sizes");
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(ra, rb)| ra.iter().zip(rb.iter()).map(|(&a, &b)| functor(a, b)).collect())
                .collect(),
        }
    }

    /// Element-wise (Hadamard) product of two same-shape matrices.
    pub fn hadamard(&self, other: &Matrix) -> Matrix {
        self.zip_map(other, |a, b| a * b)
    }

    pub fn matmul(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(self.cols, rhs.rows, "Matrices are of incorrect sizes");

        let mut res = Matrix::zeros(self.rows, rhs.cols);

        for i in 0..res.rows {
            for j in 0..res.cols {
                let mut sum = 0.0;

                for k in 0..self.cols {
                    sum += self.data[i][k] * rhs.data[k][j];
                }

                res.data[i][j] = sum;
            }
        }

        res
    }

    /// Adds a 1×cols row vector to every row.
    pub fn add_row(&self, row: &Matrix) -> Matrix {
        assert!(row.rows == 1 && row.cols == self.cols, "Matrices are of incorrect sizes");
        let bias = &row.data[0];
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .map(|r| r.iter().zip(bias.iter()).map(|(a, b)| a + b).collect())
                .collect(),
        }
    }

    /// Column sums as a 1×cols row vector.
    pub fn sum_rows(&self) -> Matrix {
        let mut sums = vec![0.0; self.cols];
        for row in &self.data {
            for (acc, v) in sums.iter_mut().zip(row.iter()) {
                *acc += v;
            }
        }
        Matrix { rows: 1, cols: self.cols, data: vec![sums] }
    }

    /// Gathers the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Matrix {
        Matrix {
            rows: indices.len(),
            cols: self.cols,
            data: indices.iter().map(|&i| self.data[i].clone()).collect(),
        }
    }

    /// The first `n` rows (or all of them when `n >= rows`).
    pub fn head(&self, n: usize) -> Matrix {
        let n = n.min(self.rows);
        Matrix {
            rows: n,
            cols: self.cols,
            data: self.data[..n].to_vec(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().flatten().all(|x| x.is_finite())
    }
}
