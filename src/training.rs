//! Fit-then-evaluate orchestration over an external training backend.
//!
//! The crate does not train models itself. A [`TrainingBackend`] receives a
//! validated [`TrainingPlan`]; the [`Orchestrator`] sequences the run and prints
//! the metrics table.

use std::{
    fmt,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use image::ImageFormat;
use log::info;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::errors::{BridgeError, Result};

const LABEL_WIDTH: usize = 20;
const RULE_WIDTH: usize = 80;

/// Selector for [`DatasetLayout`], as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutKind {
    #[default]
    Folder,
    MvtecAd,
}

impl LayoutKind {
    pub fn into_layout(
        self,
        normal_dir: PathBuf,
        abnormal_dir: PathBuf,
        normal_split_ratio: f32,
    ) -> DatasetLayout {
        match self {
            Self::Folder => DatasetLayout::Folder {
                normal_dir,
                abnormal_dir,
                normal_split_ratio,
            },
            Self::MvtecAd => DatasetLayout::MvtecAd,
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Folder => "folder",
            Self::MvtecAd => "mvtec-ad",
        })
    }
}

impl FromStr for LayoutKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "folder" => Ok(Self::Folder),
            "mvtec-ad" | "mvtec" | "mvtecad" => Ok(Self::MvtecAd),
            other => Err(format!(
                "invalid dataset layout '{other}'; expected 'folder' or 'mvtec-ad'"
            )),
        }
    }
}

/// How samples are arranged under the dataset root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatasetLayout {
    /// Ad-hoc folders of normal and abnormal samples; normal samples are split
    /// between training and testing by `normal_split_ratio`.
    Folder {
        normal_dir: PathBuf,
        abnormal_dir: PathBuf,
        normal_split_ratio: f32,
    },
    /// `<root>/<category>/{train/good, test/<defect>, ground_truth}`.
    MvtecAd,
}

impl DatasetLayout {
    pub fn kind(&self) -> LayoutKind {
        match self {
            Self::Folder { .. } => LayoutKind::Folder,
            Self::MvtecAd => LayoutKind::MvtecAd,
        }
    }
}

/// Everything a backend needs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPlan {
    pub dataset_root: PathBuf,
    pub category: String,
    pub layout: DatasetLayout,
    pub train_batch_size: usize,
    pub eval_batch_size: usize,
    pub max_epochs: usize,
    /// Nearest neighbours used when scoring against the memory bank.
    pub num_neighbors: usize,
}

impl TrainingPlan {
    /// Folder datasets are small and get more epochs; MVTec AD uses smaller batches.
    pub fn for_layout(dataset_root: PathBuf, category: String, layout: DatasetLayout) -> Self {
        let (train_batch_size, eval_batch_size, max_epochs) = match layout.kind() {
            LayoutKind::Folder => (32, 32, 10),
            LayoutKind::MvtecAd => (8, 8, 5),
        };
        Self {
            dataset_root,
            category,
            layout,
            train_batch_size,
            eval_batch_size,
            max_epochs,
            num_neighbors: 6,
        }
    }

    pub fn dataset_name(&self) -> String {
        format!("{}_dataset", self.category)
    }

    /// Directories that must exist and contain at least one image.
    pub fn required_dirs(&self) -> Vec<PathBuf> {
        match &self.layout {
            DatasetLayout::Folder {
                normal_dir,
                abnormal_dir,
                ..
            } => vec![
                self.dataset_root.join(normal_dir),
                self.dataset_root.join(abnormal_dir),
            ],
            DatasetLayout::MvtecAd => {
                let category = self.dataset_root.join(&self.category);
                vec![category.join("train").join("good"), category.join("test")]
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.category.trim().is_empty() {
            return Err(BridgeError::validation("category", "must not be empty"));
        }
        for (field, value) in [
            ("train_batch_size", self.train_batch_size),
            ("eval_batch_size", self.eval_batch_size),
            ("max_epochs", self.max_epochs),
            ("num_neighbors", self.num_neighbors),
        ] {
            if value == 0 {
                return Err(BridgeError::validation(field, "must be at least 1"));
            }
        }
        if let DatasetLayout::Folder {
            normal_split_ratio, ..
        } = &self.layout
        {
            if !(*normal_split_ratio > 0.0 && *normal_split_ratio < 1.0) {
                return Err(BridgeError::validation(
                    "normal_split_ratio",
                    format!("must lie strictly between 0 and 1, got {normal_split_ratio}"),
                ));
            }
        }
        if !self.dataset_root.is_dir() {
            return Err(missing_dir(&self.dataset_root, "dataset root"));
        }
        for dir in self.required_dirs() {
            if !dir.is_dir() {
                return Err(missing_dir(&dir, "dataset directory"));
            }
            if count_images(&dir) == 0 {
                return Err(BridgeError::validation(
                    "dataset",
                    format!("no images found under {}", dir.display()),
                ));
            }
        }
        Ok(())
    }
}

fn missing_dir(path: &Path, what: &str) -> BridgeError {
    BridgeError::FileSystem {
        path: path.to_path_buf(),
        operation: format!("locating {what}"),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "directory does not exist"),
    }
}

pub fn count_images(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| ImageFormat::from_path(e.path()).is_ok())
        .count()
}

/// Image-level test metrics of one dataloader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    #[serde(rename = "image_AUROC")]
    pub image_auroc: f64,
    #[serde(rename = "image_F1Score")]
    pub image_f1: f64,
}

/// External trainer for the anomaly model family.
pub trait TrainingBackend {
    fn fit(&mut self, plan: &TrainingPlan) -> Result<()>;

    /// One entry per test dataloader.
    fn test(&mut self, plan: &TrainingPlan) -> Result<Vec<TestMetrics>>;
}

/// Validates a plan, then drives fit and test on a backend.
pub struct Orchestrator {
    plan: TrainingPlan,
}

impl Orchestrator {
    pub fn new(plan: TrainingPlan) -> Result<Self> {
        plan.validate()?;
        Ok(Self { plan })
    }

    pub fn plan(&self) -> &TrainingPlan {
        &self.plan
    }

    pub fn run<B, W>(&self, backend: &mut B, out: &mut W) -> Result<Vec<TestMetrics>>
    where
        B: TrainingBackend,
        W: Write,
    {
        let plan = &self.plan;
        info!(
            "training {} ({} layout, {} epochs, batch {}/{})",
            plan.dataset_name(),
            plan.layout.kind(),
            plan.max_epochs,
            plan.train_batch_size,
            plan.eval_batch_size
        );

        writeln!(out, "Starting training...")?;
        backend.fit(plan)?;
        writeln!(out, "Training complete.")?;

        writeln!(out, "Starting testing...")?;
        let metrics = backend.test(plan)?;
        write_metrics_table(out, &metrics)?;
        writeln!(out, "Testing complete.")?;
        Ok(metrics)
    }
}

/// Fixed-width metrics report, one block per dataloader.
pub fn write_metrics_table<W: Write>(out: &mut W, metrics: &[TestMetrics]) -> std::io::Result<()> {
    writeln!(
        out,
        "{:<LABEL_WIDTH$} : {:<10} : Explanation",
        "Metric", "Value"
    )?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;
    for (i, m) in metrics.iter().enumerate() {
        writeln!(out, "[DataLoader {i}]")?;
        writeln!(
            out,
            "{:<LABEL_WIDTH$} : {:<10.4} : separability of normal and anomalous images \
             (1.0 = perfect, 0.5 = random guessing)",
            "Image AUROC", m.image_auroc
        )?;
        writeln!(
            out,
            "{:<LABEL_WIDTH$} : {:<10.4} : harmonic mean of image-level precision and recall \
             (higher is better)",
            "Image F1 Score", m.image_f1
        )?;
        writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    fn folder_plan(root: &Path) -> TrainingPlan {
        TrainingPlan::for_layout(
            root.to_path_buf(),
            "zfill".to_string(),
            LayoutKind::Folder.into_layout("good".into(), "bad".into(), 0.8),
        )
    }

    fn add_image(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_layout_presets() {
        let plan = folder_plan(Path::new("data"));
        assert_eq!((plan.max_epochs, plan.num_neighbors), (10, 6));

        let plan = TrainingPlan::for_layout("data".into(), "bottle".into(), DatasetLayout::MvtecAd);
        assert_eq!(
            (plan.train_batch_size, plan.eval_batch_size, plan.max_epochs),
            (8, 8, 5)
        );
        assert_eq!(
            plan.required_dirs(),
            vec![
                PathBuf::from("data/bottle/train/good"),
                PathBuf::from("data/bottle/test")
            ]
        );
    }

    #[test]
    fn test_validate_folder_layout() -> Result<()> {
        let root = TempDir::new()?;
        let plan = folder_plan(root.path());
        assert!(matches!(plan.validate(), Err(BridgeError::FileSystem { .. })));

        add_image(&root.path().join("good"), "a.png");
        fs::create_dir_all(root.path().join("bad"))?;
        assert!(matches!(plan.validate(), Err(BridgeError::Validation { .. })));

        add_image(&root.path().join("bad"), "b.png");
        plan.validate()?;
        Ok(())
    }

    #[test]
    fn test_validate_ranges() {
        let mut plan = folder_plan(Path::new("data"));
        plan.max_epochs = 0;
        assert!(matches!(plan.validate(), Err(BridgeError::Validation { .. })));

        let plan = TrainingPlan::for_layout(
            "data".into(),
            "zfill".into(),
            LayoutKind::Folder.into_layout("good".into(), "bad".into(), 1.0),
        );
        assert!(matches!(plan.validate(), Err(BridgeError::Validation { .. })));
    }

    #[test]
    fn test_metrics_table_format() {
        let mut out = Vec::new();
        write_metrics_table(
            &mut out,
            &[TestMetrics {
                image_auroc: 0.98766,
                image_f1: 0.5,
            }],
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("Metric               : Value      : "));
        assert_eq!(lines[1], "-".repeat(80));
        assert_eq!(lines[2], "[DataLoader 0]");
        assert!(lines[3].starts_with("Image AUROC          : 0.9877     : "));
        assert!(lines[4].starts_with("Image F1 Score       : 0.5000     : "));
    }

    #[test]
    fn test_metrics_deserialize_from_backend_keys() {
        let m: TestMetrics =
            serde_json::from_str(r#"{"image_AUROC": 0.9, "image_F1Score": 0.8}"#).unwrap();
        assert_eq!(m.image_auroc, 0.9);
        assert_eq!(m.image_f1, 0.8);
    }
}
