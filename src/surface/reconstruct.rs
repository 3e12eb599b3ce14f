//! Loss over a two-dimensional slice of parameter space.
//!
//! Two scalar weight coordinates are swept over a grid while every other
//! parameter stays at its trained value. All evaluation happens on working
//! copies; the trained parameters are never touched.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::activation::activation::Activation;
use crate::checkpoint::bundle::CheckpointBundle;
use crate::data::preprocess::normalized_matrices;
use crate::error::{Error, Result};
use crate::math::matrix::Matrix;
use crate::network::network::evaluate_with;
use crate::network::params::{ModelParameters, WeightCoord};
use crate::train::epoch_stats::WeightSnapshot;

/// Grid extent for [`SurfaceReconstructor::compute_surface`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceRequest {
    pub range1: (f64, f64),
    pub range2: (f64, f64),
    /// Points per axis, at least 2.
    pub resolution: usize,
}

impl SurfaceRequest {
    pub fn validate(&self) -> Result<()> {
        if self.resolution < 2 {
            return Err(Error::Config(format!("surface resolution must be at least 2, got {}", self.resolution)));
        }
        for (name, (lo, hi)) in [("range1", self.range1), ("range2", self.range2)] {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(Error::Config(format!("{name} must be finite with lo < hi, got ({lo}, {hi})")));
            }
        }
        Ok(())
    }
}

/// Loss heights over a rectangular grid.
///
/// `loss[i][j]` is the loss with axis 1 at `grid1[j]` and axis 2 at
/// `grid2[i]`, so rows follow axis 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossSurface {
    pub axes: [WeightCoord; 2],
    pub grid1: Vec<f64>,
    pub grid2: Vec<f64>,
    pub loss: Vec<Vec<f64>>,
}

impl LossSurface {
    /// Smallest and largest finite heights, if any.
    pub fn loss_range(&self) -> Option<(f64, f64)> {
        self.loss
            .iter()
            .flatten()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    pub fn range1(&self) -> (f64, f64) {
        (self.grid1[0], self.grid1[self.grid1.len() - 1])
    }

    pub fn range2(&self) -> (f64, f64) {
        (self.grid2[0], self.grid2[self.grid2.len() - 1])
    }

    /// Bilinear interpolation of the height at `(a, b)`, clamped to the grid.
    pub fn sample(&self, a: f64, b: f64) -> f64 {
        let (fj, fi) = (fractional_index(&self.grid1, a), fractional_index(&self.grid2, b));
        let (j0, i0) = (fj.floor() as usize, fi.floor() as usize);
        let (j1, i1) = ((j0 + 1).min(self.grid1.len() - 1), (i0 + 1).min(self.grid2.len() - 1));
        let (tj, ti) = (fj - j0 as f64, fi - i0 as f64);
        let top = self.loss[i0][j0] * (1.0 - tj) + self.loss[i0][j1] * tj;
        let bottom = self.loss[i1][j0] * (1.0 - tj) + self.loss[i1][j1] * tj;
        top * (1.0 - ti) + bottom * ti
    }
}

fn fractional_index(grid: &[f64], v: f64) -> f64 {
    let (lo, hi) = (grid[0], grid[grid.len() - 1]);
    let t = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);
    t * (grid.len() - 1) as f64
}

/// `n` evenly spaced values from `lo` to `hi`, both endpoints exact.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|k| if k == n - 1 { hi } else { lo + step * k as f64 }).collect()
        }
    }
}

/// One trajectory position projected onto the slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub epoch: usize,
    pub w1: f64,
    pub w2: f64,
    /// Loss on the slice: final parameters with the two coordinates replaced.
    pub loss: f64,
    /// Loss of the snapshot's own full parameters.
    pub snapshot_loss: f64,
}

/// The dataset, trained parameters and two axes a surface is computed over.
#[derive(Debug, Clone)]
pub struct SurfaceReconstructor {
    x: Matrix,
    y: Matrix,
    params: ModelParameters,
    activation: Activation,
    axes: [WeightCoord; 2],
}

impl SurfaceReconstructor {
    /// Fails with `Coordinate` when an axis is outside the parameter shapes,
    /// `Config` when both axes are the same coordinate, and `ShapeMismatch`
    /// when the data does not fit the parameters.
    pub fn new(
        x: Matrix,
        y: Matrix,
        params: ModelParameters,
        activation: Activation,
        axes: [WeightCoord; 2],
        sample_limit: Option<usize>,
    ) -> Result<SurfaceReconstructor> {
        for axis in &axes {
            axis.validate(&params)?;
        }
        if axes[0] == axes[1] {
            return Err(Error::Config(format!("surface axes must be distinct, both are {}", axes[0])));
        }
        if x.rows == 0 {
            return Err(Error::Data("no rows to evaluate the surface on".into()));
        }
        if x.cols != params.input_size() || y.rows != x.rows || y.cols != 1 {
            return Err(Error::shape_mismatch(
                "surface data",
                format!("n x {} inputs and n x 1 targets", params.input_size()),
                format!("{}x{} inputs and {}x{} targets", x.rows, x.cols, y.rows, y.cols),
            ));
        }
        let (x, y) = match sample_limit {
            Some(n) if n > 0 => (x.head(n), y.head(n)),
            _ => (x, y),
        };
        Ok(SurfaceReconstructor { x, y, params, activation, axes })
    }

    /// Builds a reconstructor from a bundle's final parameters and the
    /// cleaned rows it carries in `training_data.csv`.
    pub fn from_bundle(
        bundle: &CheckpointBundle,
        axes: [WeightCoord; 2],
        sample_limit: Option<usize>,
    ) -> Result<SurfaceReconstructor> {
        let rows = bundle.training_data()?.ok_or_else(|| {
            Error::Data(format!("{} has no training_data.csv to evaluate the surface on", bundle.path.display()))
        })?;
        let (x, y) = normalized_matrices(&rows, &bundle.normalization);
        SurfaceReconstructor::new(
            x,
            y,
            bundle.parameters.clone(),
            bundle.config().activation,
            axes,
            sample_limit,
        )
    }

    pub fn axes(&self) -> [WeightCoord; 2] {
        self.axes
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.params
    }

    /// Loss of the trained parameters with the axes set to `(a, b)`.
    pub fn slice_loss(&self, a: f64, b: f64) -> Result<f64> {
        let mut working = self.params.clone();
        self.slice_loss_with(&mut working, a, b)
    }

    fn slice_loss_with(&self, working: &mut ModelParameters, a: f64, b: f64) -> Result<f64> {
        working.set_coord(self.axes[0], a)?;
        working.set_coord(self.axes[1], b)?;
        Ok(evaluate_with(working, self.activation, &self.x, &self.y))
    }

    /// Evaluates the slice on a `resolution × resolution` grid.
    pub fn compute_surface(&self, request: &SurfaceRequest) -> Result<LossSurface> {
        request.validate()?;
        let grid1 = linspace(request.range1.0, request.range1.1, request.resolution);
        let grid2 = linspace(request.range2.0, request.range2.1, request.resolution);

        let mut working = self.params.clone();
        let mut loss = Vec::with_capacity(grid2.len());
        for &b in &grid2 {
            let row = grid1
                .iter()
                .map(|&a| self.slice_loss_with(&mut working, a, b))
                .collect::<Result<Vec<f64>>>()?;
            loss.push(row);
        }
        debug!(
            "computed {}x{} surface over {} and {}",
            request.resolution, request.resolution, self.axes[0], self.axes[1]
        );
        Ok(LossSurface { axes: self.axes, grid1, grid2, loss })
    }

    /// Projects one snapshot onto the slice.
    pub fn project(&self, snapshot: &WeightSnapshot) -> Result<TrajectoryPoint> {
        snapshot.params.check_shapes(self.params.input_size(), self.params.hidden_size())?;
        let w1 = snapshot.params.coord(self.axes[0])?;
        let w2 = snapshot.params.coord(self.axes[1])?;
        Ok(TrajectoryPoint {
            epoch: snapshot.epoch,
            w1,
            w2,
            loss: self.slice_loss(w1, w2)?,
            snapshot_loss: evaluate_with(&snapshot.params, self.activation, &self.x, &self.y),
        })
    }

    /// Projects snapshots in the order given, which should be epoch order.
    pub fn project_trajectory<I>(&self, snapshots: I) -> Result<Vec<TrajectoryPoint>>
    where
        I: IntoIterator<Item = Result<WeightSnapshot>>,
    {
        snapshots.into_iter().map(|s| self.project(&s?)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn reconstructor(axes: [WeightCoord; 2]) -> Result<SurfaceReconstructor> {
        let mut rng = StdRng::seed_from_u64(3);
        let params = crate::network::network::NetworkModel::new(3, 4, Activation::Tanh, &mut rng).params;
        let x = Matrix::from_data((0..12).map(|i| vec![i as f64 * 0.1, 1.0 - i as f64 * 0.05, 0.3]).collect());
        let y = Matrix::column(&(0..12).map(|i| i as f64 / 12.0).collect::<Vec<_>>());
        SurfaceReconstructor::new(x, y, params, Activation::Tanh, axes, None)
    }

    fn default_axes() -> [WeightCoord; 2] {
        [WeightCoord::w1(0, 0), WeightCoord::w2(0)]
    }

    #[test]
    fn grid_layout_and_endpoints() {
        let r = reconstructor(default_axes()).unwrap();
        let s = r.compute_surface(&SurfaceRequest { range1: (-1.0, 1.0), range2: (0.0, 3.0), resolution: 4 }).unwrap();
        assert_eq!(s.grid1, linspace(-1.0, 1.0, 4));
        assert_eq!(s.grid2, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(s.loss.len(), 4);
        // Row index follows axis 2, column index axis 1.
        assert_eq!(s.loss[2][1], r.slice_loss(s.grid1[1], s.grid2[2]).unwrap());
        assert!((s.sample(s.grid1[1], s.grid2[2]) - s.loss[2][1]).abs() < 1e-9);
    }

    #[test]
    fn surface_is_deterministic_and_leaves_params_untouched() {
        let r = reconstructor(default_axes()).unwrap();
        let before = r.parameters().clone();
        let req = SurfaceRequest { range1: (-2.0, 2.0), range2: (-2.0, 2.0), resolution: 7 };
        let a = r.compute_surface(&req).unwrap();
        let b = r.compute_surface(&req).unwrap();
        assert_eq!(a, b);
        assert_eq!(r.parameters(), &before);
    }

    #[test]
    fn at_trained_values_slice_matches_full_loss() {
        let r = reconstructor(default_axes()).unwrap();
        let p = r.parameters().clone();
        let point = r.project(&WeightSnapshot { epoch: 9, params: p.clone() }).unwrap();
        assert_eq!(point.epoch, 9);
        assert_eq!(point.loss, point.snapshot_loss);
        assert_eq!(point.w1, p.w1.data[0][0]);
    }

    #[test]
    fn rejects_bad_axes_and_requests() {
        assert!(matches!(reconstructor([WeightCoord::w1(3, 0), WeightCoord::w2(0)]), Err(Error::Coordinate { .. })));
        assert!(matches!(reconstructor([WeightCoord::w2(5), WeightCoord::w1(0, 0)]), Err(Error::Coordinate { .. })));
        assert!(matches!(reconstructor([WeightCoord::w2(1); 2]), Err(Error::Config(_))));
        let r = reconstructor(default_axes()).unwrap();
        for req in [
            SurfaceRequest { range1: (0.0, 1.0), range2: (0.0, 1.0), resolution: 1 },
            SurfaceRequest { range1: (1.0, 1.0), range2: (0.0, 1.0), resolution: 5 },
            SurfaceRequest { range1: (0.0, 1.0), range2: (0.0, f64::NAN), resolution: 5 },
        ] {
            assert!(matches!(r.compute_surface(&req), Err(Error::Config(_))));
        }
    }

    #[test]
    fn trajectory_rejects_mismatched_snapshots() {
        let r = reconstructor(default_axes()).unwrap();
        let bad = WeightSnapshot { epoch: 1, params: ModelParameters::zeros(3, 5) };
        assert!(matches!(r.project_trajectory(vec![Ok(bad)]), Err(Error::ShapeMismatch { .. })));
    }
}
