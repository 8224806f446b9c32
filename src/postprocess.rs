//! Anomaly map → classification, score and overlay.
//!
//! [`evaluate`] is pure: it reads the frame and the map, allocates the
//! request-scoped heatmap and composite, and returns them. Nothing here touches
//! the filesystem or shared state.

use image::{imageops, imageops::FilterType, GrayImage, Luma, Rgb, RgbImage};
use imageproc::{
    contours::find_contours,
    drawing::draw_hollow_circle_mut,
    map::{map_colors, map_colors2},
};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    anomaly_map::AnomalyMap,
    colormap::ColorRamp,
    errors::{BridgeError, Result},
    geometry::{min_enclosing_circle, Circle},
};

/// Decision derived from the severity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "GOOD")]
    Normal,
    #[serde(rename = "BAD")]
    Anomalous,
}

impl Classification {
    /// Strictly greater than: a score equal to the threshold is normal.
    pub fn from_score(score: f32, threshold: f32) -> Self {
        if score > threshold {
            Self::Anomalous
        } else {
            Self::Normal
        }
    }

    pub fn is_anomalous(self) -> bool {
        self == Self::Anomalous
    }
}

/// Connected high-severity area, displayed as its minimal enclosing circle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
    pub circle: Circle,
}

/// Parameters of [`evaluate`].
///
/// `threshold` and `min_region_radius` decide what is reported; the rest only
/// change how the overlay looks.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayParams {
    pub threshold: f32,
    pub min_region_radius: f32,
    /// Heatmap intensity at or above which a pixel belongs to a region.
    pub binarize_cutoff: u8,
    pub epsilon: f32,
    /// Weight of the colored heatmap in the blend; the frame gets `1 - blend_alpha`.
    pub blend_alpha: f32,
    pub color_ramp: ColorRamp,
    pub stroke_color: Rgb<u8>,
    pub stroke_width: u32,
}

impl Default for OverlayParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_region_radius: 3.0,
            binarize_cutoff: 60,
            epsilon: 1e-8,
            blend_alpha: 0.3,
            color_ramp: ColorRamp::Jet,
            stroke_color: Rgb([255, 0, 0]),
            stroke_width: 2,
        }
    }
}

impl OverlayParams {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(BridgeError::validation(
                "threshold",
                format!("must be a non-negative number, got {}", self.threshold),
            ));
        }
        if !self.min_region_radius.is_finite() || self.min_region_radius < 0.0 {
            return Err(BridgeError::validation(
                "min_region_radius",
                format!("must be a non-negative number, got {}", self.min_region_radius),
            ));
        }
        if !(0.0..=1.0).contains(&self.blend_alpha) {
            return Err(BridgeError::validation(
                "blend_alpha",
                format!("must lie in [0, 1], got {}", self.blend_alpha),
            ));
        }
        if self.epsilon.is_nan() || self.epsilon <= 0.0 {
            return Err(BridgeError::validation("epsilon", "must be positive"));
        }
        Ok(())
    }
}

/// Result of post-processing one request.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub classification: Classification,
    pub score: f32,
    /// Exactly the regions drawn on `overlay`; empty for a normal result.
    pub regions: Vec<Region>,
    pub overlay: RgbImage,
}

pub fn evaluate(
    frame: &RgbImage,
    anomaly_map: &AnomalyMap,
    params: &OverlayParams,
) -> Result<Evaluation> {
    params.validate()?;
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(BridgeError::validation(
            "frame",
            format!("must have positive dimensions, got {width}x{height}"),
        ));
    }

    let score = anomaly_map.max();
    let classification = Classification::from_score(score, params.threshold);

    let heatmap = rescale_heatmap(anomaly_map, params.epsilon);
    let heatmap = resample(&heatmap, width, height);

    let regions = if classification.is_anomalous() {
        extract_regions(&heatmap, params.binarize_cutoff, params.min_region_radius)
    } else {
        Vec::new()
    };
    debug!(
        "score {score:.4} → {classification:?}, {} region(s) over {width}x{height}",
        regions.len()
    );

    let mut overlay = blend(frame, &heatmap, params.color_ramp, params.blend_alpha);
    for region in &regions {
        draw_region(&mut overlay, region, params.stroke_color, params.stroke_width);
    }

    Ok(Evaluation {
        classification,
        score,
        regions,
        overlay,
    })
}

/// Rescale the map to 0-255 using its own range; a uniform map yields all zeros.
pub fn rescale_heatmap(anomaly_map: &AnomalyMap, epsilon: f32) -> GrayImage {
    // max - min can overflow f32
    let min = f64::from(anomaly_map.min());
    let range = f64::from(anomaly_map.max()) - min + f64::from(epsilon);
    let (width, height) = anomaly_map.dimensions();
    let grid = anomaly_map.view();
    GrayImage::from_fn(width, height, |x, y| {
        let v = (f64::from(grid[[y as usize, x as usize]]) - min) / range;
        Luma([(255.0 * v).clamp(0.0, 255.0) as u8])
    })
}

fn resample(heatmap: &GrayImage, width: u32, height: u32) -> GrayImage {
    if heatmap.dimensions() == (width, height) {
        return heatmap.clone();
    }
    imageops::resize(heatmap, width, height, FilterType::Triangle)
}

/// Minimal enclosing circles of the outer boundaries of the binarized heatmap,
/// keeping only those with a radius strictly above `min_radius`.
pub fn extract_regions(heatmap: &GrayImage, cutoff: u8, min_radius: f32) -> Vec<Region> {
    let binary = map_colors(heatmap, |Luma([v])| {
        Luma([if v >= cutoff { u8::MAX } else { 0 }])
    });

    find_contours::<i32>(&binary)
        .into_iter()
        .filter(|contour| contour.parent.is_none())
        .filter_map(|contour| min_enclosing_circle(&contour.points))
        .filter(|circle| circle.radius > f64::from(min_radius))
        .map(|circle| Region { circle })
        .collect()
}

fn blend(frame: &RgbImage, heatmap: &GrayImage, ramp: ColorRamp, alpha: f32) -> RgbImage {
    map_colors2(frame, heatmap, |Rgb(pixel), Luma([v])| {
        let Rgb(color) = ramp.color(v);
        let mix = |a: u8, b: u8| (a as f32 * (1.0 - alpha) + b as f32 * alpha).round() as u8;
        Rgb([
            mix(pixel[0], color[0]),
            mix(pixel[1], color[1]),
            mix(pixel[2], color[2]),
        ])
    })
}

fn draw_region(canvas: &mut RgbImage, region: &Region, color: Rgb<u8>, stroke_width: u32) {
    let (center, radius) = region.circle.to_pixels();
    let inner = radius - (stroke_width as i32 - 1) / 2;
    for offset in 0..stroke_width.max(1) as i32 {
        let r = inner + offset;
        if r >= 0 {
            draw_hollow_circle_mut(canvas, center, r, color);
        }
    }
}
