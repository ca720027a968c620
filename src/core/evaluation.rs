//! Offline scoring of the line detector against labelled image sets.
//!
//! A "nature" set holds photos of real scenes (every hit is a false
//! positive); a "recapture" set holds photos of screens and prints (every hit
//! is a true positive).

use crate::common::{LensCheckError, Result, SpoofConfig};
use crate::core::spoof::{LineSpoofDetector, SpoofDetector};
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::Path;

pub struct LabeledImage {
    pub name: String,
    pub image: DynamicImage,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    pub total_nature: usize,
    pub total_recapture: usize,
    pub false_positives: usize,
    pub true_positives: usize,
    pub precision: f32,
    pub recall: f32,
    pub f1_score: f32,
    pub flagged_nature: Vec<String>,
    pub flagged_recapture: Vec<String>,
    pub errors: Vec<String>,
}

impl EvaluationReport {
    pub fn from_counts(
        false_positives: usize,
        true_positives: usize,
        total_nature: usize,
        total_recapture: usize,
    ) -> Self {
        let flagged = true_positives + false_positives;
        let precision = if flagged > 0 { true_positives as f32 / flagged as f32 } else { 0.0 };
        let recall = if total_recapture > 0 { true_positives as f32 / total_recapture as f32 } else { 0.0 };
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            total_nature,
            total_recapture,
            false_positives,
            true_positives,
            precision,
            recall,
            f1_score,
            ..Self::default()
        }
    }
}

/// Load every `.png` / `.jpg` / `.jpeg` in `dir`, sorted by file name.
/// Unreadable files are skipped with a warning.
pub fn load_image_dir(dir: &Path) -> Result<Vec<LabeledImage>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)
        .map_err(|e| LensCheckError::Storage(format!("Failed to read {}: {}", dir.display(), e)))?
    {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
            .unwrap_or(false);
        if is_image && path.is_file() {
            names.push(path);
        }
    }
    names.sort();

    let images = names
        .par_iter()
        .filter_map(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            match image::open(path) {
                Ok(image) => Some(LabeledImage { name, image }),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect();
    Ok(images)
}

// (name, lines detected) per image
fn run_detector(detector: &dyn SpoofDetector, images: &[LabeledImage]) -> Vec<(String, Result<bool>)> {
    images
        .par_iter()
        .map(|img| (img.name.clone(), detector.analyze(&img.image).map(|v| v.lines_detected)))
        .collect()
}

pub fn evaluate(
    detector: &dyn SpoofDetector,
    nature: &[LabeledImage],
    recapture: &[LabeledImage],
) -> EvaluationReport {
    let mut errors = Vec::new();
    let mut flagged = |results: Vec<(String, Result<bool>)>| -> Vec<String> {
        results
            .into_iter()
            .filter_map(|(name, hit)| match hit {
                Ok(true) => Some(name),
                Ok(false) => None,
                Err(e) => {
                    errors.push(format!("{}: {}", name, e));
                    None
                }
            })
            .collect()
    };

    let flagged_nature = flagged(run_detector(detector, nature));
    let flagged_recapture = flagged(run_detector(detector, recapture));

    EvaluationReport {
        flagged_nature: flagged_nature.clone(),
        flagged_recapture: flagged_recapture.clone(),
        errors,
        ..EvaluationReport::from_counts(
            flagged_nature.len(),
            flagged_recapture.len(),
            nature.len(),
            recapture.len(),
        )
    }
}

pub fn evaluate_dirs(
    detector: &dyn SpoofDetector,
    nature_dir: &Path,
    recapture_dir: &Path,
) -> Result<EvaluationReport> {
    let nature = load_image_dir(nature_dir)?;
    let recapture = load_image_dir(recapture_dir)?;
    Ok(evaluate(detector, &nature, &recapture))
}

/// Inclusive parameter ranges sampled by [`tune`].
#[derive(Debug, Clone)]
pub struct SearchSpace {
    pub canny: (f32, f32),
    pub vote_threshold: (u32, u32),
    pub suppression_radius: (u32, u32),
    pub blur_sigma: (f32, f32),
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            canny: (50.0, 500.0),
            vote_threshold: (50, 500),
            suppression_radius: (1, 50),
            blur_sigma: (0.5, 3.0),
        }
    }
}

impl SearchSpace {
    pub fn sample(&self, rng: &mut impl Rng) -> SpoofConfig {
        let a = rng.gen_range(self.canny.0..=self.canny.1);
        let b = rng.gen_range(self.canny.0..=self.canny.1);
        SpoofConfig {
            canny_low: a.min(b).round(),
            canny_high: a.max(b).round(),
            vote_threshold: rng.gen_range(self.vote_threshold.0..=self.vote_threshold.1),
            suppression_radius: rng.gen_range(self.suppression_radius.0..=self.suppression_radius.1),
            blur_sigma: rng.gen_range(self.blur_sigma.0..=self.blur_sigma.1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Trial {
    pub params: SpoofConfig,
    pub report: EvaluationReport,
}

impl Trial {
    pub const CSV_HEADER: &'static str =
        "canny_low,canny_high,vote_threshold,suppression_radius,blur_sigma,false_positives,true_positives,precision,recall,f1_score";

    pub fn csv_row(&self) -> String {
        let p = &self.params;
        let r = &self.report;
        format!(
            "{},{},{},{},{:.3},{},{},{:.4},{:.4},{:.4}",
            p.canny_low, p.canny_high, p.vote_threshold, p.suppression_radius, p.blur_sigma,
            r.false_positives, r.true_positives, r.precision, r.recall, r.f1_score
        )
    }
}

/// Random search over `space`, returning the trial with the best F1.
/// `on_trial` sees every trial as it completes (progress output, CSV log).
pub fn tune(
    space: &SearchSpace,
    nature: &[LabeledImage],
    recapture: &[LabeledImage],
    iterations: usize,
    seed: u64,
    mut on_trial: impl FnMut(usize, &Trial) -> Result<()>,
) -> Result<Option<Trial>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<Trial> = None;

    for i in 0..iterations {
        let params = space.sample(&mut rng);
        let detector = LineSpoofDetector::new(params.clone())?;
        let trial = Trial { params, report: evaluate(&detector, nature, recapture) };
        on_trial(i, &trial)?;

        if best.as_ref().map_or(true, |b| trial.report.f1_score > b.report.f1_score) {
            best = Some(trial);
        }
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SpoofVerdict;
    use image::{GrayImage, Luma};

    /// Flags any image whose top-left pixel is bright.
    struct BrightCorner;

    impl SpoofDetector for BrightCorner {
        fn analyze(&self, image: &DynamicImage) -> Result<SpoofVerdict> {
            let bright = image.to_luma8().get_pixel(0, 0)[0] > 128;
            Ok(SpoofVerdict { lines_detected: bright, annotated_image: None })
        }
    }

    fn labeled(name: &str, value: u8) -> LabeledImage {
        LabeledImage {
            name: name.to_string(),
            image: DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([value]))),
        }
    }

    #[test]
    fn metrics_from_counts() {
        let report = EvaluationReport::from_counts(1, 3, 10, 4);
        assert!((report.precision - 0.75).abs() < 1e-6);
        assert!((report.recall - 0.75).abs() < 1e-6);
        assert!((report.f1_score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn undefined_metrics_are_zero() {
        let report = EvaluationReport::from_counts(0, 0, 5, 0);
        assert_eq!(report.precision, 0.0);
        assert_eq!(report.recall, 0.0);
        assert_eq!(report.f1_score, 0.0);
    }

    #[test]
    fn evaluate_counts_hits_per_set() {
        let nature = vec![labeled("tree.jpg", 10), labeled("lamp.jpg", 200)];
        let recapture = vec![labeled("tv.jpg", 220), labeled("page.jpg", 240), labeled("dim.jpg", 20)];

        let report = evaluate(&BrightCorner, &nature, &recapture);
        assert_eq!(report.false_positives, 1);
        assert_eq!(report.true_positives, 2);
        assert_eq!(report.flagged_nature, vec!["lamp.jpg"]);
        assert_eq!(report.total_recapture, 3);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn load_image_dir_filters_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        GrayImage::new(2, 2).save(tmp.path().join("b.png")).unwrap();
        GrayImage::new(2, 2).save(tmp.path().join("a.JPG")).unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let images = load_image_dir(tmp.path()).unwrap();
        let names: Vec<_> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.JPG", "b.png"]);
    }

    #[test]
    fn large_sets_keep_input_order() {
        let recapture: Vec<_> = (0..40)
            .map(|i| labeled(&format!("shot_{:02}.png", i), if i % 3 == 0 { 250 } else { 5 }))
            .collect();

        let report = evaluate(&BrightCorner, &[], &recapture);
        let expected: Vec<_> = (0..40).filter(|i| i % 3 == 0).map(|i| format!("shot_{:02}.png", i)).collect();
        assert_eq!(report.flagged_recapture, expected);
        assert_eq!(report.true_positives, 14);
        assert_eq!(report.total_recapture, 40);
    }

    #[test]
    fn load_image_dir_skips_unreadable_files_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..12 {
            GrayImage::new(2, 2).save(tmp.path().join(format!("img_{:02}.png", i))).unwrap();
        }
        fs::write(tmp.path().join("img_05b.png"), "not a png").unwrap();

        let images = load_image_dir(tmp.path()).unwrap();
        let names: Vec<_> = images.iter().map(|i| i.name.clone()).collect();
        let expected: Vec<_> = (0..12).map(|i| format!("img_{:02}.png", i)).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn sampled_params_are_ordered_and_in_range() {
        let space = SearchSpace::default();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let p = space.sample(&mut rng);
            assert!(p.canny_low <= p.canny_high);
            assert!((50..=500).contains(&p.vote_threshold));
            assert!(p.validate().is_ok());
        }
    }

    #[test]
    fn tune_reports_every_trial_and_keeps_best() {
        let nature = vec![labeled("flat.png", 100)];
        let recapture = vec![labeled("flat2.png", 100)];
        let mut rows = Vec::new();

        let best = tune(&SearchSpace::default(), &nature, &recapture, 3, 7, |_, trial| {
            rows.push(trial.csv_row());
            Ok(())
        })
        .unwrap()
        .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(best.report.f1_score, 0.0);
        assert_eq!(Trial::CSV_HEADER.split(',').count(), rows[0].split(',').count());
    }
}
