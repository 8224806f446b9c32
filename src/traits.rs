use image::RgbImage;
use ndarray::ArrayD;

use crate::anomaly_map::RawAnomalyMap;
use crate::errors::Result;
use crate::model::{InferenceBatch, Normalization};

/// Abstraction over a pretrained anomaly-detection model.
///
/// The request loop only depends on this trait, so tests can drive it with
/// [`crate::mocks::MockAnomalyModel`] instead of an ONNX session.
pub trait AnomalyModel: Send + Sync {
    /// Square side length the model expects.
    fn input_size(&self) -> u32;

    /// Pixel normalization applied before [`AnomalyModel::predict`].
    fn normalization(&self) -> Normalization {
        Normalization::UnitRange
    }

    /// Raw anomaly tensor for one batch (low-level API).
    fn predict(&self, batch: &InferenceBatch) -> Result<ArrayD<f32>>;

    /// Anomaly map for a single frame.
    fn infer(&self, frame: &RgbImage) -> Result<RawAnomalyMap> {
        let batch = InferenceBatch::from_frame(frame, self.input_size(), self.normalization());
        let tensor = self.predict(&batch)?;
        RawAnomalyMap::from_tensor(tensor.view())
    }
}
