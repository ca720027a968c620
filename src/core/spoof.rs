use crate::common::{Result, SpoofConfig};
use crate::core::types::SpoofVerdict;
use image::{DynamicImage, Rgb};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::hough::{detect_lines, draw_polar_lines, LineDetectionOptions, PolarLine};

/// Blocking recapture check. The orchestrator runs it on the blocking pool.
pub trait SpoofDetector: Send + Sync + 'static {
    fn analyze(&self, image: &DynamicImage) -> Result<SpoofVerdict>;
}

/// Flags frames containing long straight lines (screen bezels, page edges,
/// print borders). Wide-angle shots of real objects rarely produce a
/// straight edge long enough to pass the vote threshold.
pub struct LineSpoofDetector {
    config: SpoofConfig,
}

impl LineSpoofDetector {
    pub fn new(config: SpoofConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SpoofConfig {
        &self.config
    }

    pub fn detect_lines(&self, image: &DynamicImage) -> Vec<PolarLine> {
        let gray = image.to_luma8();
        let blurred = gaussian_blur_f32(&gray, self.config.blur_sigma);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);

        detect_lines(
            &edges,
            LineDetectionOptions {
                vote_threshold: self.config.vote_threshold,
                suppression_radius: self.config.suppression_radius,
            },
        )
    }

    /// Verdict plus the lines behind it, from a single detection pass.
    pub fn analyze_with_lines(&self, image: &DynamicImage) -> (SpoofVerdict, Vec<PolarLine>) {
        let lines = self.detect_lines(image);
        tracing::debug!(lines = lines.len(), "Line detection finished");

        let annotated = draw_polar_lines(&image.to_rgb8(), &lines, Rgb([255, 0, 0]));
        let verdict = SpoofVerdict {
            lines_detected: !lines.is_empty(),
            annotated_image: Some(DynamicImage::ImageRgb8(annotated)),
        };
        (verdict, lines)
    }
}

impl SpoofDetector for LineSpoofDetector {
    fn analyze(&self, image: &DynamicImage) -> Result<SpoofVerdict> {
        Ok(self.analyze_with_lines(image).0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn detector() -> LineSpoofDetector {
        LineSpoofDetector::new(SpoofConfig {
            vote_threshold: 150,
            ..SpoofConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn blank_frame_has_no_lines() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(240, 240, Luma([120])));
        let verdict = detector().analyze(&image).unwrap();
        assert!(!verdict.lines_detected);
        assert!(verdict.annotated_image.is_some());
    }

    #[test]
    fn screen_edge_is_detected() {
        // Bright "screen" filling the lower half: one long horizontal edge
        let image = GrayImage::from_fn(240, 240, |_, y| if y < 120 { Luma([10]) } else { Luma([245]) });
        let verdict = detector().analyze(&DynamicImage::ImageLuma8(image)).unwrap();
        assert!(verdict.lines_detected);

        let annotated = verdict.annotated_image.unwrap().to_rgb8();
        assert!(annotated.pixels().any(|p| p.0 == [255, 0, 0]));
    }

    #[test]
    fn short_edges_stay_below_threshold() {
        // 40px square, far shorter than the vote threshold
        let image = GrayImage::from_fn(240, 240, |x, y| {
            if (100..140).contains(&x) && (100..140).contains(&y) { Luma([245]) } else { Luma([10]) }
        });
        let lines = detector().detect_lines(&DynamicImage::ImageLuma8(image));
        assert!(lines.is_empty());
    }

    #[test]
    fn verdict_and_lines_come_from_one_pass() {
        let image = GrayImage::from_fn(240, 240, |x, _| if x < 120 { Luma([10]) } else { Luma([245]) });
        let image = DynamicImage::ImageLuma8(image);
        let detector = detector();

        let (verdict, lines) = detector.analyze_with_lines(&image);
        assert!(verdict.lines_detected);
        assert_eq!(lines.len(), detector.detect_lines(&image).len());
        assert_eq!(
            verdict.annotated_image.map(|i| i.to_rgb8()),
            detector.analyze(&image).unwrap().annotated_image.map(|i| i.to_rgb8())
        );
    }
}
