//! Upload pipeline orchestration.
//!
//! One upload runs strictly in sequence:
//!
//! ```text
//! image ─▶ [preprocess] ─▶ OCR ─▶ join ─▶ extract ─▶ reconcile ─▶ record
//! ```
//!
//! Extraction problems never fail an upload; they degrade to `steps = 0`.
//! Only OCR, preprocessing, and persistence failures surface as
//! [`PipelineError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::extract::{Confidence, ExtractionResult};
use crate::models::{Reading, UploadSource};
use crate::normalize::join_tokens;
use crate::ocr::{OcrError, TesseractRecognizer, TextRecognizer};
use crate::preprocess::{self, PreprocessError};
use crate::reconcile::{Decision, ReconcilePolicy, Reconciler};
use crate::store::RecordStore;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error("preprocessing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A stored screenshot waiting to be read.
#[derive(Debug, Clone)]
pub struct Upload {
    pub person: String,
    pub image: PathBuf,
    pub source: UploadSource,
    pub received_at: NaiveDateTime,
}

/// Result reported back to the caller for logging or display.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub person: String,
    pub steps: u32,
    pub source: UploadSource,
    pub extractor: &'static str,
    pub confidence: Confidence,
    pub image: String,
    #[serde(flatten)]
    pub decision: Decision,
}

pub struct StepPipeline {
    recognizer: Arc<dyn TextRecognizer>,
    reconciler: Reconciler,
    preprocess: bool,
}

impl StepPipeline {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        store: Arc<dyn RecordStore>,
        policy: ReconcilePolicy,
        preprocess: bool,
    ) -> Self {
        Self {
            recognizer,
            reconciler: Reconciler::new(store, policy),
            preprocess,
        }
    }

    /// Wire the configured OCR command to `store`.
    pub fn from_config(config: &Config, store: Arc<dyn RecordStore>) -> Self {
        Self::new(
            Arc::new(TesseractRecognizer::from_config(&config.ocr)),
            store,
            config.reconcile.policy(),
            config.ocr.preprocess,
        )
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        self.reconciler.store()
    }

    /// OCR an image and extract a step count, without touching the store.
    pub async fn read_steps(
        &self,
        image: &Path,
        source: UploadSource,
    ) -> Result<ExtractionResult, PipelineError> {
        let ocr_input = if self.preprocess && source.wants_preprocessing() {
            let original = image.to_path_buf();
            tokio::task::spawn_blocking(move || preprocess::preprocess_file(&original)).await??
        } else {
            image.to_path_buf()
        };

        let fragments = self.recognizer.recognize(&ocr_input).await?;
        let text = join_tokens(&fragments);
        debug!(engine = self.recognizer.name(), raw = %text, "ocr text");

        let extractor = source.extraction_mode().extractor();
        let result = extractor.extract(&text);
        if let Some(candidate) = result.rejected {
            warn!(
                candidate,
                image = %image.display(),
                "discarded implausible step count"
            );
        }
        info!(
            extractor = extractor.name(),
            steps = result.steps,
            confidence = ?result.confidence,
            "extracted step count"
        );
        Ok(result)
    }

    /// Read the upload and reconcile it into the person's daily record.
    pub async fn process(&self, upload: &Upload) -> Result<UploadOutcome, PipelineError> {
        let extraction = self.read_steps(&upload.image, upload.source).await?;
        let image = upload
            .image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| upload.image.display().to_string());

        let reading = Reading {
            person: upload.person.clone(),
            steps: extraction.steps,
            source_image: image.clone(),
            observed_at: upload.received_at,
        };
        let decision = self.reconciler.reconcile(&reading).await?;
        info!(
            person = %reading.person,
            day = %reading.day(),
            steps = reading.steps,
            decision = decision.label(),
            "reconciled reading"
        );

        Ok(UploadOutcome {
            person: reading.person,
            steps: reading.steps,
            source: upload.source,
            extractor: upload.source.extraction_mode().extractor().name(),
            confidence: extraction.confidence,
            image,
            decision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryRecordStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Returns canned fragments and remembers which image it was shown.
    struct CannedRecognizer {
        fragments: Vec<String>,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl CannedRecognizer {
        fn new(fragments: &[&str]) -> Self {
            Self {
                fragments: fragments.iter().map(|s| s.to_string()).collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextRecognizer for CannedRecognizer {
        fn name(&self) -> &str {
            "canned"
        }

        async fn recognize(&self, image: &Path) -> Result<Vec<String>, OcrError> {
            self.seen.lock().unwrap().push(image.to_path_buf());
            Ok(self.fragments.clone())
        }
    }

    struct BrokenRecognizer;

    #[async_trait]
    impl TextRecognizer for BrokenRecognizer {
        fn name(&self) -> &str {
            "broken"
        }

        async fn recognize(&self, image: &Path) -> Result<Vec<String>, OcrError> {
            Err(OcrError::MissingImage(image.to_path_buf()))
        }
    }

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn upload(person: &str, image: &Path, source: UploadSource, h: u32) -> Upload {
        Upload {
            person: person.into(),
            image: image.to_path_buf(),
            source,
            received_at: at(h),
        }
    }

    #[tokio::test]
    async fn test_health_upload_uses_localized_extractor() {
        let store = Arc::new(InMemoryRecordStore::new());
        let ocr = Arc::new(CannedRecognizer::new(&[
            "10:30",
            "Average 6000 steps",
            "Total Steps",
            "15,320",
        ]));
        let pipeline = StepPipeline::new(ocr, store.clone(), ReconcilePolicy::default(), false);

        let out = pipeline
            .process(&upload("alice", Path::new("/up/a.png"), UploadSource::HealthApp, 9))
            .await
            .unwrap();
        assert_eq!(out.steps, 15320);
        assert_eq!(out.extractor, "localized");
        assert_eq!(out.confidence, Confidence::Anchored);
        assert_eq!(out.image, "a.png");
        assert!(matches!(out.decision, Decision::Inserted { .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_smartband_upload_uses_simple_extractor() {
        let store = Arc::new(InMemoryRecordStore::new());
        // 10:30 has no 3-digit run; the first qualifying number wins
        let ocr = Arc::new(CannedRecognizer::new(&["10:30", "Goal 10000", "Today 4200"]));
        let pipeline = StepPipeline::new(ocr, store, ReconcilePolicy::default(), false);

        let out = pipeline
            .process(&upload("bob", Path::new("/up/b.png"), UploadSource::Smartband, 9))
            .await
            .unwrap();
        assert_eq!(out.steps, 10000);
        assert_eq!(out.extractor, "simple");
    }

    #[tokio::test]
    async fn test_second_upload_reconciles() {
        let store = Arc::new(InMemoryRecordStore::new());
        let low = StepPipeline::new(
            Arc::new(CannedRecognizer::new(&["Today 7,842 steps"])),
            store.clone(),
            ReconcilePolicy::default(),
            false,
        );
        let high = StepPipeline::new(
            Arc::new(CannedRecognizer::new(&["Today 9,001 steps"])),
            store.clone(),
            ReconcilePolicy::default(),
            false,
        );

        low.process(&upload("eve", Path::new("/up/1.png"), UploadSource::HealthApp, 8))
            .await
            .unwrap();
        let out = high
            .process(&upload("eve", Path::new("/up/2.png"), UploadSource::HealthApp, 20))
            .await
            .unwrap();
        assert_eq!(
            out.decision,
            Decision::Updated {
                id: 1,
                previous_steps: 7842
            }
        );
        let again = low
            .process(&upload("eve", Path::new("/up/3.png"), UploadSource::HealthApp, 21))
            .await
            .unwrap();
        assert_eq!(again.decision.label(), "ignored");

        let rec = store.find("eve", at(0).date()).await.unwrap().unwrap();
        assert_eq!(rec.steps, 9001);
        assert_eq!(rec.source_image, "2.png");
        assert_eq!(rec.created_at, at(20));
    }

    #[tokio::test]
    async fn test_ocr_failure_propagates() {
        let store = Arc::new(InMemoryRecordStore::new());
        let pipeline = StepPipeline::new(
            Arc::new(BrokenRecognizer),
            store.clone(),
            ReconcilePolicy::default(),
            false,
        );
        let err = pipeline
            .process(&upload("al", Path::new("/up/x.png"), UploadSource::HealthApp, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Ocr(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_preprocessing_feeds_processed_image_to_ocr() {
        let tmp = TempDir::new().unwrap();
        let image = tmp.path().join("shot.png");
        image::GrayImage::from_pixel(8, 8, image::Luma([200u8]))
            .save(&image)
            .unwrap();

        let ocr = Arc::new(CannedRecognizer::new(&["Total 5000"]));
        let store = Arc::new(InMemoryRecordStore::new());
        let pipeline = StepPipeline::new(ocr.clone(), store, ReconcilePolicy::default(), true);

        let result = pipeline
            .read_steps(&image, UploadSource::HealthApp)
            .await
            .unwrap();
        assert_eq!(result.steps, 5000);
        assert_eq!(
            ocr.seen.lock().unwrap().as_slice(),
            &[tmp.path().join("shot_proc.png")]
        );

        // smartband screenshots go to OCR untouched
        pipeline
            .read_steps(&image, UploadSource::Smartband)
            .await
            .unwrap();
        assert_eq!(ocr.seen.lock().unwrap()[1], image);
    }

    #[tokio::test]
    async fn test_zero_reading_with_strict_policy() {
        let store = Arc::new(InMemoryRecordStore::new());
        let pipeline = StepPipeline::new(
            Arc::new(CannedRecognizer::new(&["Goal 8000 steps"])),
            store.clone(),
            ReconcilePolicy {
                persist_zero: false,
            },
            false,
        );
        let out = pipeline
            .process(&upload("zed", Path::new("/up/z.png"), UploadSource::HealthApp, 9))
            .await
            .unwrap();
        assert_eq!(out.steps, 0);
        assert_eq!(out.decision, Decision::Rejected);
        assert!(store.is_empty());
    }
}
