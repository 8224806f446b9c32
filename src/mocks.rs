use crate::errors::{BridgeError, Result};
use crate::model::InferenceBatch;
use crate::traits::AnomalyModel;
use ndarray::prelude::*;
use parking_lot::Mutex;

/// Test model that returns a canned anomaly tensor.
#[derive(Debug)]
pub struct MockAnomalyModel {
    pub image_size: u32,
    output: Option<ArrayD<f32>>,
    calls: Mutex<usize>,
}

impl MockAnomalyModel {
    pub fn new(image_size: u32, output: ArrayD<f32>) -> Self {
        Self {
            image_size,
            output: Some(output),
            calls: Mutex::new(0),
        }
    }

    /// Model whose output is a `1 x 1 x H x W` tensor built from `grid`.
    pub fn with_grid(grid: Array2<f32>) -> Self {
        let (h, w) = grid.dim();
        let tensor = grid
            .into_shape_with_order(IxDyn(&[1, 1, h, w]))
            .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[1, 1, h, w])));
        Self::new(64, tensor)
    }

    /// Model whose every prediction fails.
    pub fn failing() -> Self {
        Self {
            image_size: 64,
            output: None,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl AnomalyModel for MockAnomalyModel {
    fn input_size(&self) -> u32 {
        self.image_size
    }

    fn predict(&self, batch: &InferenceBatch) -> Result<ArrayD<f32>> {
        *self.calls.lock() += 1;
        let shape = batch.image.shape();
        if shape[1] != 3 || shape[2] != self.image_size as usize {
            return Err(BridgeError::validation(
                "batch",
                format!("unexpected input shape {shape:?}"),
            ));
        }
        self.output.clone().ok_or_else(|| BridgeError::Model {
            operation: "mock inference".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock model configured to fail",
            )),
        })
    }
}

/// Mock that reports a `2 x 2` map with one hot corner.
pub fn create_mock_model() -> MockAnomalyModel {
    MockAnomalyModel::with_grid(array![[0.1, 0.2], [0.9, 0.95]])
}
