use std::{fs, path::Path, path::PathBuf};

use clap::{ArgAction, Parser};
use image::Rgb;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::{
    colormap::ColorRamp,
    encode::OverlayFormat,
    errors::{BridgeError, Result},
    model::Normalization,
    postprocess::OverlayParams,
    protocol::BlankLines,
    session::Staging,
    training::{LayoutKind, TrainingPlan},
};

/// Read image paths from stdin and answer each with an anomaly verdict as JSON.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// ONNX export of the anomaly model.
    #[arg(short, long, default_value = "model.onnx")]
    pub model_path: PathBuf,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Scores strictly above this are reported as BAD.
    #[arg(short, long, default_value_t = 0.5, value_parser = non_negative)]
    pub threshold: f32,

    /// Regions whose enclosing circle is not larger than this are not drawn.
    #[arg(short = 'r', long, default_value_t = 3.0, value_parser = non_negative)]
    pub min_radius: f32,

    /// Input side length used when the model's input dimensions are dynamic.
    #[arg(long, default_value_t = 512)]
    pub input_size: u32,

    /// Name of the model output holding the anomaly map.
    #[arg(long, default_value = "anomaly_map")]
    pub output_name: String,

    /// Pixel normalization: `unit` or `imagenet`.
    #[arg(long, default_value_t = Normalization::UnitRange)]
    pub normalization: Normalization,

    /// `in-memory`, or `temp-file` to round-trip each frame through a temporary PNG.
    #[arg(long, default_value_t = Staging::InMemory)]
    pub staging: Staging,

    /// `skip` blank input lines or `report` them as an error record.
    #[arg(long, default_value_t = BlankLines::Report)]
    pub blank_lines: BlankLines,

    /// Overlay encoding: `jpeg` or `png`.
    #[arg(short = 'f', long, default_value_t = OverlayFormat::Jpeg)]
    pub overlay_format: OverlayFormat,

    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// JSON file overriding the overlay presentation settings.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Omit overlays from responses and write the last response to `--result-file`.
    #[arg(long, action = ArgAction::SetTrue)]
    pub non_interactive: bool,

    #[arg(long, default_value = "output.txt")]
    pub result_file: PathBuf,

    /// Log level used when `RUST_LOG` is unset (error, warn, info, debug, trace).
    #[arg(long, default_value_t = LevelFilter::Warn)]
    pub log_level: LevelFilter,
}

impl Config {
    /// Post-processing parameters: command-line values plus the optional settings file.
    pub fn overlay_params(&self) -> Result<OverlayParams> {
        let settings = match &self.settings {
            Some(path) => OverlaySettings::load(path)?,
            None => OverlaySettings::default(),
        };
        let params = settings.into_params(self.threshold, self.min_radius);
        params.validate()?;
        Ok(params)
    }
}

fn non_negative(s: &str) -> std::result::Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("`{s}` is not a number: {e}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("`{s}` must be a non-negative number"));
    }
    Ok(value)
}

/// Presentation tunables of the overlay, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub binarize_cutoff: u8,
    pub epsilon: f32,
    pub blend_alpha: f32,
    pub color_ramp: ColorRamp,
    pub stroke_color: [u8; 3],
    pub stroke_width: u32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        let params = OverlayParams::default();
        Self {
            binarize_cutoff: params.binarize_cutoff,
            epsilon: params.epsilon,
            blend_alpha: params.blend_alpha,
            color_ramp: params.color_ramp,
            stroke_color: params.stroke_color.0,
            stroke_width: params.stroke_width,
        }
    }
}

impl OverlaySettings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| BridgeError::FileSystem {
            path: path.to_path_buf(),
            operation: "reading overlay settings".to_string(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| BridgeError::Configuration {
            message: format!("invalid overlay settings in {}: {e}", path.display()),
        })
    }

    pub fn into_params(self, threshold: f32, min_region_radius: f32) -> OverlayParams {
        OverlayParams {
            threshold,
            min_region_radius,
            binarize_cutoff: self.binarize_cutoff,
            epsilon: self.epsilon,
            blend_alpha: self.blend_alpha,
            color_ramp: self.color_ramp,
            stroke_color: Rgb(self.stroke_color),
            stroke_width: self.stroke_width,
        }
    }
}

/// Options of a fit-then-evaluate run.
///
/// Argument struct for a trainer binary that embeds this library and supplies
/// its own [`crate::training::TrainingBackend`]; `anomaly-bridge` itself only serves
/// inference. Parse it with `TrainConfig::parse()` and hand
/// [`TrainConfig::into_plan`] to [`crate::training::Orchestrator::new`].
#[derive(Parser, Debug, Clone)]
#[command(about = "Train and evaluate an anomaly model on a dataset")]
pub struct TrainConfig {
    pub dataset_root: PathBuf,

    #[arg(short, long)]
    pub category: String,

    /// `folder` (normal/abnormal directories with an automatic split) or `mvtec-ad`.
    #[arg(short, long, default_value_t = LayoutKind::Folder)]
    pub layout: LayoutKind,

    /// Normal samples, relative to the dataset root (folder layout).
    #[arg(long, default_value = "train/good")]
    pub normal_dir: PathBuf,

    /// Abnormal samples, relative to the dataset root (folder layout).
    #[arg(long, default_value = "test/bad")]
    pub abnormal_dir: PathBuf,

    #[arg(long, default_value_t = 0.8)]
    pub normal_split_ratio: f32,

    #[arg(long)]
    pub train_batch_size: Option<usize>,

    #[arg(long)]
    pub eval_batch_size: Option<usize>,

    #[arg(long)]
    pub max_epochs: Option<usize>,

    #[arg(long)]
    pub num_neighbors: Option<usize>,
}

impl TrainConfig {
    /// Layout presets with any explicit overrides applied.
    pub fn into_plan(self) -> TrainingPlan {
        let layout = self
            .layout
            .into_layout(self.normal_dir, self.abnormal_dir, self.normal_split_ratio);
        let mut plan = TrainingPlan::for_layout(self.dataset_root, self.category, layout);
        if let Some(size) = self.train_batch_size {
            plan.train_batch_size = size;
        }
        if let Some(size) = self.eval_batch_size {
            plan.eval_batch_size = size;
        }
        if let Some(epochs) = self.max_epochs {
            plan.max_epochs = epochs;
        }
        if let Some(neighbors) = self.num_neighbors {
            plan.num_neighbors = neighbors;
        }
        plan
    }
}
