//! Multi-pass OCR with confidence arbitration.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{OcrError, ReceiptError, Result};
use crate::pipeline::CancelFlag;

use super::{ImagePreprocessor, OcrBackend, OcrConfig, OcrResult};

/// One recognition attempt and how it ended.
#[derive(Debug)]
pub struct OcrAttempt {
    pub config: OcrConfig,
    pub outcome: std::result::Result<OcrResult, OcrError>,
}

impl OcrAttempt {
    pub fn new(config: OcrConfig, outcome: std::result::Result<OcrResult, OcrError>) -> Self {
        Self { config, outcome }
    }
}

/// Runs one OCR pass per preprocessed variant and keeps the best.
pub struct OcrArbitrator<B> {
    backend: B,
    preprocessor: ImagePreprocessor,
    whitelist: Option<String>,
}

impl<B: OcrBackend> OcrArbitrator<B> {
    pub fn new(backend: B, preprocessor: ImagePreprocessor) -> Self {
        Self {
            backend,
            preprocessor,
            whitelist: None,
        }
    }

    /// Characters every pass may emit.
    pub fn with_whitelist(mut self, whitelist: Option<String>) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    /// Pick the result with the highest confidence.
    ///
    /// Ties keep the earlier attempt. Failed attempts are skipped; if every
    /// attempt failed the whole recognition fails. No attempts at all yields
    /// an empty result.
    pub fn arbitrate(attempts: Vec<OcrAttempt>) -> std::result::Result<OcrResult, OcrError> {
        let total = attempts.len();
        if total == 0 {
            return Ok(OcrResult::empty());
        }

        let mut best: Option<OcrResult> = None;
        for attempt in attempts {
            match attempt.outcome {
                Ok(result) => {
                    debug!(
                        "OCR attempt {} confidence {:.1}",
                        attempt.config.name, result.confidence
                    );
                    let better = best
                        .as_ref()
                        .is_none_or(|current| result.confidence > current.confidence);
                    if better {
                        best = Some(result);
                    }
                }
                Err(e) => warn!("OCR attempt {} failed: {}", attempt.config.name, e),
            }
        }

        best.ok_or(OcrError::AllAttemptsFailed { attempts: total })
    }

    /// Preprocess `source`, recognize each variant, and return the best text.
    ///
    /// Variants are written to `scratch_dir` and all of them are removed
    /// before this returns, whatever the outcome.
    pub fn recognize_image(
        &self,
        source: &Path,
        scratch_dir: &Path,
        cancel: &CancelFlag,
    ) -> Result<OcrResult> {
        cancel.check()?;

        let variants = self.preprocessor.prepare_variants(source, scratch_dir);
        if variants.is_empty() {
            warn!("No usable variant of {}, nothing to recognize", source.display());
            return Ok(OcrResult::empty());
        }

        let mut attempts = Vec::with_capacity(variants.len());
        for (strategy, raster) in variants {
            // Unvisited variants are dropped, and so deleted, on early return
            cancel.check()?;

            let config = strategy.ocr_config(self.whitelist.as_deref());
            let outcome = self.backend.recognize(raster.path(), &config);

            if let Err(e) = raster.delete() {
                warn!("Failed to delete {} variant: {}", strategy.name(), e);
            }

            attempts.push(OcrAttempt::new(config, outcome));
        }

        let best = Self::arbitrate(attempts).map_err(ReceiptError::from)?;
        info!(
            "Selected {} result ({} confidence {:.1})",
            self.backend.name(),
            best.config_name,
            best.confidence
        );

        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::PageSegMode;
    use crate::test_support::{small_preprocessor, write_test_image, ScriptedBackend};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn attempt(name: &str, outcome: std::result::Result<(&str, f32), &str>) -> OcrAttempt {
        let config = OcrConfig::new(name, PageSegMode::Auto);
        let outcome = outcome
            .map(|(text, confidence)| OcrResult {
                text: text.to_string(),
                confidence,
                processing_time_ms: 0,
                config_name: name.to_string(),
            })
            .map_err(|e| OcrError::Recognition(e.to_string()));
        OcrAttempt::new(config, outcome)
    }

    #[test]
    fn test_highest_confidence_wins_even_second() {
        let best = OcrArbitrator::<ScriptedBackend>::arbitrate(vec![
            attempt("first", Ok(("blurry", 40.0))),
            attempt("second", Ok(("crisp", 85.0))),
        ])
        .unwrap();

        assert_eq!(best.text, "crisp");
        assert_eq!(best.config_name, "second");
    }

    #[test]
    fn test_tie_keeps_first() {
        let best = OcrArbitrator::<ScriptedBackend>::arbitrate(vec![
            attempt("first", Ok(("one", 70.0))),
            attempt("second", Ok(("two", 70.0))),
        ])
        .unwrap();

        assert_eq!(best.text, "one");
    }

    #[test]
    fn test_failed_attempts_excluded() {
        let best = OcrArbitrator::<ScriptedBackend>::arbitrate(vec![
            attempt("first", Err("engine crashed")),
            attempt("second", Ok(("", 0.0))),
        ])
        .unwrap();

        assert_eq!(best.text, "");
    }

    #[test]
    fn test_all_attempts_failed() {
        let err = OcrArbitrator::<ScriptedBackend>::arbitrate(vec![
            attempt("first", Err("a")),
            attempt("second", Err("b")),
        ])
        .unwrap_err();

        assert!(matches!(err, OcrError::AllAttemptsFailed { attempts: 2 }));
        assert!(err.to_string().contains("OCR extraction failed"));
    }

    #[test]
    fn test_no_attempts_is_empty() {
        let best = OcrArbitrator::<ScriptedBackend>::arbitrate(Vec::new()).unwrap();
        assert_eq!(best, OcrResult::empty());
    }

    #[test]
    fn test_recognize_image_pairs_modes_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.png");
        write_test_image(&source);

        let backend = ScriptedBackend::new(vec![Ok(("low", 40.0)), Ok(("high", 85.0))]);
        let arbitrator = OcrArbitrator::new(backend, small_preprocessor());

        let best = arbitrator
            .recognize_image(&source, dir.path(), &CancelFlag::new())
            .unwrap();

        assert_eq!(best.text, "high");
        assert_eq!(
            *arbitrator.backend().seen.lock().unwrap(),
            vec![("contrast_boost".to_string(), true), ("threshold".to_string(), true)]
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_recognize_image_all_failed_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.png");
        write_test_image(&source);

        let backend = ScriptedBackend::new(vec![Err("a"), Err("b")]);
        let arbitrator = OcrArbitrator::new(backend, small_preprocessor());

        let err = arbitrator
            .recognize_image(&source, dir.path(), &CancelFlag::new())
            .unwrap_err();

        assert!(matches!(err, ReceiptError::Ocr(OcrError::AllAttemptsFailed { .. })));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_recognize_image_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.png");
        write_test_image(&source);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let arbitrator = OcrArbitrator::new(ScriptedBackend::new(Vec::new()), small_preprocessor());

        let err = arbitrator
            .recognize_image(&source, dir.path(), &cancel)
            .unwrap_err();

        assert!(matches!(err, ReceiptError::Cancelled));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_cancel_between_passes_removes_variants() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.png");
        write_test_image(&source);

        let cancel = CancelFlag::new();
        let backend = ScriptedBackend::new(vec![Ok(("first", 60.0)), Ok(("second", 90.0))])
            .cancelling(cancel.clone());
        let arbitrator = OcrArbitrator::new(backend, small_preprocessor());

        let err = arbitrator
            .recognize_image(&source, dir.path(), &cancel)
            .unwrap_err();

        assert!(matches!(err, ReceiptError::Cancelled));
        assert_eq!(arbitrator.backend().calls(), 1);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("processed"))
            .collect();
        assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
        assert!(source.exists());
    }

    #[test]
    fn test_unreadable_image_yields_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.png");
        fs::write(&source, b"garbage").unwrap();

        let arbitrator = OcrArbitrator::new(ScriptedBackend::new(Vec::new()), small_preprocessor());
        let best = arbitrator
            .recognize_image(&source, dir.path(), &CancelFlag::new())
            .unwrap();

        assert_eq!(best.text, "");
        assert!(arbitrator.backend().seen.lock().unwrap().is_empty());
    }
}
