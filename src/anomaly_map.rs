//! Anomaly-map shapes emitted by model backends and their normalization to a 2-D grid.
//!
//! Different exports emit the per-pixel scores differently: a bare score, a flat
//! vector, a `H x W` grid, or a per-channel `C x H x W` stack. [`RawAnomalyMap`]
//! names those cases and [`AnomalyMap`] is the canonical grid the post-processor
//! works on.

use ndarray::prelude::*;

use crate::errors::{BridgeError, Result};

/// Anomaly map as produced by a model, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAnomalyMap {
    Scalar(f32),
    Vector(Array1<f32>),
    Grid(Array2<f32>),
    /// Channel-first stack, averaged across the leading axis.
    Stack(Array3<f32>),
}

impl RawAnomalyMap {
    /// Classify a dynamic tensor after dropping every unit axis.
    ///
    /// A `[1, 1, 256, 256]` model output becomes a grid, `[1, 3, 64, 64]` a stack
    /// and `[1]` a scalar. Anything left with more than three axes is rejected.
    pub fn from_tensor(tensor: ArrayViewD<'_, f32>) -> Result<Self> {
        let shape = tensor.shape().to_vec();
        if tensor.is_empty() {
            return Err(BridgeError::invalid_shape(&shape, "anomaly map is empty"));
        }

        let squeezed: Vec<usize> = shape.iter().copied().filter(|&d| d != 1).collect();
        let data = tensor.as_standard_layout().into_owned();
        let data = data.into_shape_with_order(IxDyn(&squeezed))?;

        match squeezed.len() {
            0 => Ok(Self::Scalar(data.iter().copied().next().unwrap_or_default())),
            1 => Ok(Self::Vector(data.into_dimensionality::<Ix1>()?)),
            2 => Ok(Self::Grid(data.into_dimensionality::<Ix2>()?)),
            3 => Ok(Self::Stack(data.into_dimensionality::<Ix3>()?)),
            n => Err(BridgeError::invalid_shape(
                &shape,
                format!("{n} non-unit dimensions, expected at most 3"),
            )),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Scalar(_) => vec![],
            Self::Vector(v) => v.shape().to_vec(),
            Self::Grid(g) => g.shape().to_vec(),
            Self::Stack(s) => s.shape().to_vec(),
        }
    }

    /// Collapse into a 2-D grid.
    pub fn normalize(self) -> Result<AnomalyMap> {
        let shape = self.shape();
        let grid = match self {
            Self::Scalar(v) => Array2::from_elem((1, 1), v),
            Self::Vector(v) => {
                let len = v.len();
                v.into_shape_with_order((1, len))?
            }
            Self::Grid(g) => g,
            Self::Stack(s) => s
                .mean_axis(Axis(0))
                .ok_or_else(|| BridgeError::invalid_shape(&shape, "stack has no channels"))?,
        };
        AnomalyMap::new(grid).map_err(|err| match err {
            BridgeError::InvalidShape { reason, .. } => BridgeError::InvalidShape { shape, reason },
            other => other,
        })
    }
}

impl From<f32> for RawAnomalyMap {
    fn from(value: f32) -> Self {
        Self::Scalar(value)
    }
}

impl From<Array2<f32>> for RawAnomalyMap {
    fn from(value: Array2<f32>) -> Self {
        Self::Grid(value)
    }
}

/// Non-empty, finite 2-D grid of anomaly scores.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyMap {
    grid: Array2<f32>,
}

impl AnomalyMap {
    pub fn new(grid: Array2<f32>) -> Result<Self> {
        if grid.is_empty() {
            return Err(BridgeError::invalid_shape(grid.shape(), "anomaly map is empty"));
        }
        if grid.iter().any(|v| !v.is_finite()) {
            return Err(BridgeError::invalid_shape(
                grid.shape(),
                "anomaly map contains non-finite values",
            ));
        }
        Ok(Self { grid })
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.grid.view()
    }

    /// `(width, height)`, matching the `image` crate's ordering.
    pub fn dimensions(&self) -> (u32, u32) {
        let (rows, cols) = self.grid.dim();
        (cols as u32, rows as u32)
    }

    pub fn min(&self) -> f32 {
        self.grid.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max(&self) -> f32 {
        self.grid.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

impl TryFrom<RawAnomalyMap> for AnomalyMap {
    type Error = BridgeError;

    fn try_from(raw: RawAnomalyMap) -> Result<Self> {
        raw.normalize()
    }
}

impl TryFrom<Array2<f32>> for AnomalyMap {
    type Error = BridgeError;

    fn try_from(grid: Array2<f32>) -> Result<Self> {
        Self::new(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_normalizes_to_single_cell() -> Result<()> {
        let map = RawAnomalyMap::Scalar(0.7).normalize()?;
        assert_eq!(map.dimensions(), (1, 1));
        assert_eq!(map.max(), 0.7);

        let literal = AnomalyMap::new(array![[0.7]])?;
        assert_eq!(map, literal);
        Ok(())
    }

    #[test]
    fn test_vector_becomes_single_row() -> Result<()> {
        let map = RawAnomalyMap::Vector(array![0.1, 0.4, 0.2]).normalize()?;
        assert_eq!(map.dimensions(), (3, 1));
        assert_eq!(map.max(), 0.4);
        Ok(())
    }

    #[test]
    fn test_stack_is_averaged_across_channels() -> Result<()> {
        let stack = array![[[0.0, 1.0], [2.0, 3.0]], [[2.0, 3.0], [4.0, 5.0]]];
        let map = RawAnomalyMap::Stack(stack).normalize()?;
        assert_eq!(map.view(), array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(map.max(), 4.0);
        Ok(())
    }

    #[test]
    fn test_from_tensor_squeezes_unit_axes() -> Result<()> {
        let tensor = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 8, 6]));
        let raw = RawAnomalyMap::from_tensor(tensor.view())?;
        assert_eq!(raw.shape(), vec![8, 6]);
        assert!(matches!(raw, RawAnomalyMap::Grid(_)));

        let tensor = ArrayD::<f32>::from_elem(IxDyn(&[1, 1]), 0.25);
        let raw = RawAnomalyMap::from_tensor(tensor.view())?;
        assert_eq!(raw, RawAnomalyMap::Scalar(0.25));

        let tensor = ArrayD::<f32>::zeros(IxDyn(&[1, 3, 4, 4]));
        let raw = RawAnomalyMap::from_tensor(tensor.view())?;
        assert!(matches!(raw, RawAnomalyMap::Stack(_)));
        Ok(())
    }

    #[test]
    fn test_from_tensor_rejects_four_real_dimensions() {
        let tensor = ArrayD::<f32>::zeros(IxDyn(&[2, 3, 4, 4]));
        let err = RawAnomalyMap::from_tensor(tensor.view()).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidShape { .. }));
    }

    #[test]
    fn test_empty_and_non_finite_maps_are_rejected() {
        let empty = Array2::<f32>::zeros((0, 4));
        assert!(matches!(
            AnomalyMap::new(empty),
            Err(BridgeError::InvalidShape { .. })
        ));

        let nan = array![[0.1, f32::NAN]];
        assert!(matches!(
            AnomalyMap::new(nan),
            Err(BridgeError::InvalidShape { .. })
        ));

        let tensor = ArrayD::<f32>::zeros(IxDyn(&[1, 0, 3]));
        assert!(RawAnomalyMap::from_tensor(tensor.view()).is_err());
    }
}
