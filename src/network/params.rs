use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// Weights and biases of the single-hidden-layer network.
///
/// Shapes: `w1` is (features × hidden), `b1` is (1 × hidden), `w2` is
/// (hidden × 1) and `b2` is (1 × 1).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    pub w1: Matrix,
    pub b1: Matrix,
    pub w2: Matrix,
    pub b2: Matrix,
}

/// Gradients share the parameter layout tensor for tensor.
pub type Gradients = ModelParameters;

impl ModelParameters {
    pub fn zeros(features: usize, hidden: usize) -> ModelParameters {
        ModelParameters {
            w1: Matrix::zeros(features, hidden),
            b1: Matrix::zeros(1, hidden),
            w2: Matrix::zeros(hidden, 1),
            b2: Matrix::zeros(1, 1),
        }
    }

    pub fn zeros_like(other: &ModelParameters) -> ModelParameters {
        ModelParameters {
            w1: Matrix::zeros(other.w1.rows, other.w1.cols),
            b1: Matrix::zeros(other.b1.rows, other.b1.cols),
            w2: Matrix::zeros(other.w2.rows, other.w2.cols),
            b2: Matrix::zeros(other.b2.rows, other.b2.cols),
        }
    }

    pub fn input_size(&self) -> usize {
        self.w1.rows
    }

    pub fn hidden_size(&self) -> usize {
        self.w1.cols
    }

    /// The output bias as a plain scalar.
    pub fn b2_value(&self) -> f64 {
        self.b2.get(0, 0).unwrap_or(0.0)
    }

    pub fn tensor(&self, which: ParamTensor) -> &Matrix {
        match which {
            ParamTensor::W1 => &self.w1,
            ParamTensor::B1 => &self.b1,
            ParamTensor::W2 => &self.w2,
            ParamTensor::B2 => &self.b2,
        }
    }

    pub fn tensor_mut(&mut self, which: ParamTensor) -> &mut Matrix {
        match which {
            ParamTensor::W1 => &mut self.w1,
            ParamTensor::B1 => &mut self.b1,
            ParamTensor::W2 => &mut self.w2,
            ParamTensor::B2 => &mut self.b2,
        }
    }

    /// Shapes in `ParamTensor::ALL` order.
    pub fn shapes(&self) -> [(usize, usize); 4] {
        ParamTensor::ALL.map(|t| self.tensor(t).shape())
    }

    /// Checks that the tensors form a consistent network for `features`
    /// inputs and `hidden` hidden units.
    pub fn check_shapes(&self, features: usize, hidden: usize) -> Result<()> {
        let expected = ModelParameters::zeros(features, hidden).shapes();
        for (t, (want, got)) in ParamTensor::ALL.iter().zip(expected.iter().zip(self.shapes())) {
            if *want != got {
                return Err(Error::shape_mismatch(
                    t.name(),
                    format!("{}x{}", want.0, want.1),
                    format!("{}x{}", got.0, got.1),
                ));
            }
        }
        Ok(())
    }

    pub fn is_finite(&self) -> bool {
        ParamTensor::ALL.iter().all(|&t| self.tensor(t).is_finite())
    }

    /// Reads one scalar coordinate.
    pub fn coord(&self, coord: WeightCoord) -> Result<f64> {
        let m = self.tensor(coord.tensor);
        m.get(coord.row, coord.col).ok_or_else(|| coord.out_of_range(m))
    }

    /// Overwrites one scalar coordinate.
    pub fn set_coord(&mut self, coord: WeightCoord, value: f64) -> Result<()> {
        let m = self.tensor_mut(coord.tensor);
        if m.set(coord.row, coord.col, value) {
            Ok(())
        } else {
            Err(coord.out_of_range(m))
        }
    }
}

/// Names one of the four parameter tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamTensor {
    W1,
    B1,
    W2,
    B2,
}

impl ParamTensor {
    pub const ALL: [ParamTensor; 4] = [ParamTensor::W1, ParamTensor::B1, ParamTensor::W2, ParamTensor::B2];

    /// Array name used in NPZ files and coordinate strings.
    pub fn name(&self) -> &'static str {
        match self {
            ParamTensor::W1 => "W1",
            ParamTensor::B1 => "b1",
            ParamTensor::W2 => "W2",
            ParamTensor::B2 => "b2",
        }
    }

    pub fn from_name(name: &str) -> Option<ParamTensor> {
        ParamTensor::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// A single scalar position in parameter space, e.g. `W1[1,2]`.
///
/// Text forms: `W1[r,c]`, `W2[r]` (column 0), `b1[c]` (row 0) and `b2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightCoord {
    pub tensor: ParamTensor,
    pub row: usize,
    pub col: usize,
}

impl WeightCoord {
    pub fn new(tensor: ParamTensor, row: usize, col: usize) -> WeightCoord {
        WeightCoord { tensor, row, col }
    }

    pub fn w1(row: usize, col: usize) -> WeightCoord {
        WeightCoord::new(ParamTensor::W1, row, col)
    }

    pub fn w2(row: usize) -> WeightCoord {
        WeightCoord::new(ParamTensor::W2, row, 0)
    }

    /// Fails unless the coordinate addresses an existing element of `params`.
    pub fn validate(&self, params: &ModelParameters) -> Result<()> {
        params.coord(*self).map(|_| ())
    }

    fn out_of_range(&self, m: &Matrix) -> Error {
        Error::Coordinate {
            coord: self.to_string(),
            shape: format!("{}x{}", m.rows, m.cols),
        }
    }
}

impl fmt::Display for WeightCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},{}]", self.tensor.name(), self.row, self.col)
    }
}

impl FromStr for WeightCoord {
    type Err = Error;

    fn from_str(s: &str) -> Result<WeightCoord> {
        let bad = || Error::Config(format!("cannot parse weight coordinate '{s}'"));
        let s = s.trim();
        let (name, rest) = match s.find('[') {
            Some(pos) => (&s[..pos], Some(&s[pos..])),
            None => (s, None),
        };
        let tensor = ParamTensor::from_name(name.trim()).ok_or_else(bad)?;
        let indices: Vec<usize> = match rest {
            None => Vec::new(),
            Some(r) => {
                let inner = r.strip_prefix('[').and_then(|r| r.strip_suffix(']')).ok_or_else(bad)?;
                inner
                    .split(',')
                    .map(|p| p.trim().parse::<usize>().map_err(|_| bad()))
                    .collect::<Result<_>>()?
            }
        };
        let (row, col) = match (tensor, indices.as_slice()) {
            (_, [r, c]) => (*r, *c),
            (ParamTensor::B1, [c]) => (0, *c),
            (ParamTensor::W2, [r]) => (*r, 0),
            (ParamTensor::B2, []) => (0, 0),
            _ => return Err(bad()),
        };
        Ok(WeightCoord { tensor, row, col })
    }
}

impl Serialize for WeightCoord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WeightCoord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_coordinate_forms() {
        assert_eq!("W1[1,2]".parse::<WeightCoord>().unwrap(), WeightCoord::w1(1, 2));
        assert_eq!("W2[3]".parse::<WeightCoord>().unwrap(), WeightCoord::w2(3));
        assert_eq!("b1[2]".parse::<WeightCoord>().unwrap(), WeightCoord::new(ParamTensor::B1, 0, 2));
        assert_eq!("b2".parse::<WeightCoord>().unwrap(), WeightCoord::new(ParamTensor::B2, 0, 0));
        assert!("W3[0,0]".parse::<WeightCoord>().is_err());
        assert!("W1[0,".parse::<WeightCoord>().is_err());
        assert!("W1[1]".parse::<WeightCoord>().is_err());
    }

    #[test]
    fn display_round_trips() {
        let c = WeightCoord::w1(0, 3);
        assert_eq!(c.to_string(), "W1[0,3]");
        assert_eq!(c.to_string().parse::<WeightCoord>().unwrap(), c);
    }

    #[test]
    fn out_of_range_is_coordinate_error() {
        let p = ModelParameters::zeros(4, 3);
        assert!(WeightCoord::w1(3, 2).validate(&p).is_ok());
        match WeightCoord::w1(4, 0).validate(&p) {
            Err(Error::Coordinate { shape, .. }) => assert_eq!(shape, "4x3"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(WeightCoord::w2(3).validate(&p).is_err());
    }

    #[test]
    fn shape_check_names_the_tensor() {
        let p = ModelParameters::zeros(4, 3);
        assert!(p.check_shapes(4, 3).is_ok());
        match p.check_shapes(4, 5) {
            Err(Error::ShapeMismatch { what, .. }) => assert_eq!(what, "W1"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
