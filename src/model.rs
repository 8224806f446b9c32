use std::{fmt, path::Path, str::FromStr};

use crate::{
    errors::{BridgeError, Result},
    postprocess::Classification,
    traits::AnomalyModel,
};
use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use log::{info, warn};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pixel normalization expected by the exported model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// Scale to `[0, 1]` only; exports that embed their own pre-processor want this.
    #[default]
    UnitRange,
    /// `[0, 1]` followed by ImageNet mean/std.
    ImageNet,
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnitRange => "unit",
            Self::ImageNet => "imagenet",
        })
    }
}

impl FromStr for Normalization {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unit" => Ok(Self::UnitRange),
            "imagenet" => Ok(Self::ImageNet),
            other => Err(format!(
                "invalid normalization '{other}'; expected 'unit' or 'imagenet'"
            )),
        }
    }
}

/// Typed model input record.
#[derive(Debug, Clone)]
pub struct InferenceBatch {
    /// `1 x 3 x size x size`, RGB.
    pub image: Array4<f32>,
    pub label: Option<Classification>,
    pub mask: Option<GrayImage>,
}

impl InferenceBatch {
    pub fn new(image: Array4<f32>) -> Self {
        Self {
            image,
            label: None,
            mask: None,
        }
    }

    pub fn from_frame(frame: &RgbImage, size: u32, normalization: Normalization) -> Self {
        Self::new(preprocess(frame, size, normalization))
    }

    pub fn with_label(mut self, label: Classification) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_mask(mut self, mask: GrayImage) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// Resize to `size x size` and lay out as an NCHW tensor.
pub fn preprocess(frame: &RgbImage, size: u32, normalization: Normalization) -> Array4<f32> {
    let resized = imageops::resize(frame, size, size, FilterType::Triangle);
    let mut tensor = resized
        .as_ndarray3()
        .slice_move(s![NewAxis, .., .., ..])
        .mapv(|v| f32::from(v) / 255.0);

    if normalization == Normalization::ImageNet {
        for (c, mut channel) in tensor.axis_iter_mut(Axis(1)).enumerate() {
            channel.mapv_inplace(|v| (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
        }
    }
    tensor
}

/// Anomaly model exported to ONNX (e.g. PatchCore), executed with ONNX Runtime.
pub struct OnnxAnomalyModel {
    pub image_size: u32,
    normalization: Normalization,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxAnomalyModel {
    /// Load the model and run one warm-up inference.
    ///
    /// `fallback_size` is used when the model's spatial input dimensions are dynamic.
    pub fn new(
        model_path: &Path,
        device_id: i32,
        fallback_size: u32,
        output_name: &str,
        normalization: Normalization,
    ) -> Result<Self> {
        let mut session = SessionBuilder::new()
            .map_err(|e| BridgeError::Model {
                operation: "session builder initialization".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| BridgeError::Model {
                operation: "execution provider registration".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| BridgeError::Model {
                operation: "memory pattern configuration".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(model_path)
            .map_err(|e| BridgeError::Model {
                operation: format!("loading model file {}", model_path.display()),
                source: Box::new(e),
            })?;

        let input = session.inputs.first().ok_or_else(|| BridgeError::Model {
            operation: "reading model inputs".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "model declares no inputs",
            )),
        })?;
        let input_name = input.name.clone();
        let image_size = match input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(2).copied())
        {
            Some(dim) if dim > 0 => dim as u32,
            _ => fallback_size,
        };

        let output_name = if session.outputs.iter().any(|o| o.name == output_name) {
            output_name.to_string()
        } else {
            let first = session.outputs.first().ok_or_else(|| BridgeError::Model {
                operation: "reading model outputs".to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "model declares no outputs",
                )),
            })?;
            warn!(
                "model has no output named `{output_name}`, using `{}`",
                first.name
            );
            first.name.clone()
        };

        // warm up
        let data = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data).map_err(|e| BridgeError::Model {
                operation: "warm-up tensor creation".to_string(),
                source: Box::new(e),
            })?])
            .map_err(|e| BridgeError::Model {
                operation: "warm-up inference".to_string(),
                source: Box::new(e),
            })?;
        info!(
            "loaded {} ({input_name} {image_size}x{image_size} → {output_name})",
            model_path.display()
        );

        Ok(Self {
            image_size,
            normalization,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl AnomalyModel for OnnxAnomalyModel {
    fn input_size(&self) -> u32 {
        self.image_size
    }

    fn normalization(&self) -> Normalization {
        self.normalization
    }

    fn predict(&self, batch: &InferenceBatch) -> Result<ArrayD<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&batch.image.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_layout_and_range() {
        let frame = RgbImage::from_pixel(30, 20, Rgb([255, 0, 51]));
        let tensor = preprocess(&frame, 16, Normalization::UnitRange);
        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-2);
        assert!(tensor[[0, 1, 5, 5]].abs() < 1e-2);
        assert!((tensor[[0, 2, 5, 5]] - 0.2).abs() < 1e-2);
    }

    #[test]
    fn test_imagenet_normalization() {
        let frame = RgbImage::from_pixel(8, 8, Rgb([124, 116, 104]));
        let tensor = preprocess(&frame, 8, Normalization::ImageNet);
        for c in 0..3 {
            assert!(tensor[[0, c, 3, 3]].abs() < 0.02);
        }
    }

    #[test]
    fn test_batch_record_fields() {
        let batch = InferenceBatch::from_frame(&RgbImage::new(4, 4), 4, Normalization::UnitRange)
            .with_label(Classification::Anomalous)
            .with_mask(GrayImage::new(4, 4));
        assert_eq!(batch.label, Some(Classification::Anomalous));
        assert_eq!(batch.mask.map(|m| m.dimensions()), Some((4, 4)));
    }

    #[test]
    fn test_normalization_parsing() {
        assert_eq!("ImageNet".parse(), Ok(Normalization::ImageNet));
        assert_eq!("unit".parse(), Ok(Normalization::UnitRange));
        assert!("zscore".parse::<Normalization>().is_err());
    }

    #[test]
    fn test_missing_model_file_is_an_error() {
        let result = OnnxAnomalyModel::new(
            Path::new("does/not/exist.onnx"),
            0,
            512,
            "anomaly_map",
            Normalization::UnitRange,
        );
        assert!(matches!(result, Err(BridgeError::Model { .. })));
    }
}
