use crate::core::types::{ClassificationResult, SpoofVerdict, Verdict};

/// Combine the two analysis outcomes of a cycle.
///
/// Line detection strictly dominates: once the auxiliary frame shows lines the
/// classification is ignored whatever its confidence. A missing classification
/// is reported as such rather than accepted.
pub fn fuse(classification: Option<ClassificationResult>, spoof: &SpoofVerdict) -> Verdict {
    if spoof.lines_detected {
        return Verdict::RejectSpoof;
    }

    match classification {
        Some(ClassificationResult { label, confidence }) => Verdict::Accept { label, confidence },
        None => Verdict::NoClassification,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_always_reject() {
        let lines = SpoofVerdict::lines(None);
        assert_eq!(fuse(None, &lines), Verdict::RejectSpoof);
        assert_eq!(
            fuse(Some(ClassificationResult::new("A", 0.99)), &lines),
            Verdict::RejectSpoof
        );
        assert_eq!(
            fuse(Some(ClassificationResult::new("A", 0.0)), &lines),
            Verdict::RejectSpoof
        );
    }

    #[test]
    fn clean_frame_accepts_classification() {
        let verdict = fuse(Some(ClassificationResult::new("A", 0.9)), &SpoofVerdict::clean());
        assert_eq!(verdict, Verdict::Accept { label: "A".into(), confidence: 0.9 });
    }

    #[test]
    fn missing_classification_is_not_an_accept() {
        let verdict = fuse(None, &SpoofVerdict::clean());
        assert_eq!(verdict, Verdict::NoClassification);
        assert!(!verdict.is_accept());
    }
}
