use crate::common::{ClassifierConfig, LensCheckError, Result, system_models_dir};
use crate::core::types::ClassificationResult;
use ort::{Environment, Session, SessionBuilder, Value, GraphOptimizationLevel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

/// Blocking image classification. The orchestrator runs it on the blocking pool.
pub trait ImageClassifier: Send + Sync + 'static {
    fn classify(&self, image: &DynamicImage) -> Result<ClassificationResult>;
}

pub struct OnnxClassifier {
    session: Session,
    _environment: Arc<Environment>,
    labels: Vec<String>,
    config: ClassifierConfig,
}

impl OnnxClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let model_path = resolve_model_path(&config.model_path);
        if !model_path.exists() {
            return Err(LensCheckError::Model(
                format!("Classifier model not found at: {:?}", model_path)
            ));
        }

        let labels_path = resolve_model_path(&config.labels_path);
        let labels = parse_labels(&std::fs::read_to_string(&labels_path).map_err(|e| {
            LensCheckError::Model(format!("Failed to read labels {:?}: {}", labels_path, e))
        })?);
        if labels.is_empty() {
            return Err(LensCheckError::Model(format!("Labels file {:?} is empty", labels_path)));
        }

        let environment = Arc::new(
            Environment::builder()
                .with_name("lenscheck_classifier")
                .build()
                .map_err(|e| LensCheckError::Model(format!("Failed to create environment: {}", e)))?
        );

        let opt_level = match config.optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        };
        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(opt_level)?
            .with_model_from_file(&model_path)?;

        tracing::info!("Loaded classifier {:?} with {} labels", model_path, labels.len());

        Ok(Self {
            session,
            _environment: environment,
            labels,
            config: config.clone(),
        })
    }

    fn preprocess(&self, image: &DynamicImage) -> Array4<f32> {
        let size = self.config.input_size;
        let rgb = image
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();

        let size = size as usize;
        let mut array = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                array[[0, c, y as usize, x as usize]] =
                    (value - self.config.mean[c]) / self.config.std[c];
            }
        }
        array
    }
}

impl ImageClassifier for OnnxClassifier {
    fn classify(&self, image: &DynamicImage) -> Result<ClassificationResult> {
        let input = self.preprocess(image);
        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let scores: Vec<f32> = outputs[0].try_extract::<f32>()?.view().iter().copied().collect();
        if scores.len() != self.labels.len() {
            return Err(LensCheckError::Model(format!(
                "Model produced {} scores for {} labels", scores.len(), self.labels.len()
            )));
        }

        let probabilities = if self.config.apply_softmax { softmax(&scores) } else { scores };
        let (index, confidence) = top1(&probabilities)
            .ok_or_else(|| LensCheckError::Model("Model produced no scores".into()))?;

        Ok(ClassificationResult::new(self.labels[index].clone(), confidence))
    }
}

// Relative paths that don't exist from the working directory fall back to the system models dir
fn resolve_model_path(path: &Path) -> PathBuf {
    if path.is_relative() && !path.exists() {
        return system_models_dir().join(path);
    }
    path.to_path_buf()
}

/// One label per line; blank lines and `#` comments skipped.
pub fn parse_labels(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![0.0; scores.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

pub fn top1(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_skip_comments_and_blanks() {
        let labels = parse_labels("# order classes\nbottle\n\n  cup \nplate\n");
        assert_eq!(labels, vec!["bottle", "cup", "plate"]);
    }

    #[test]
    fn softmax_sums_to_one_and_keeps_order() {
        let probs = softmax(&[1.0, 3.0, 2.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(top1(&probs).map(|(i, _)| i), Some(1));
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn top1_ignores_nan() {
        assert_eq!(top1(&[f32::NAN, 0.2, 0.1]), Some((1, 0.2)));
        assert_eq!(top1(&[]), None);
    }
}
