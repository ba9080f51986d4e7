//! Two-stage OCR: text regions are detected on a probability map, then each
//! region is recognized with a CTC model and the results are grouped into lines.
//!
//! Inference is pluggable through [`InferenceSession`]; [`OrtSession`] runs
//! ONNX models with ONNX Runtime.

use std::path::PathBuf;

use image::{DynamicImage, RgbaImage};
use tracing::instrument;

pub mod angle_net;
pub mod config;
pub mod ctc;
pub mod detection;
pub mod dictionary;
mod error;
pub mod geometry;
pub mod hough;
pub mod lines;
pub mod recognition;
mod result;
pub mod session;
pub mod skew;
pub mod tensor;

use angle_net::AngleNet;
pub use config::{
    DetectionOptions, OcrConfig, OcrConfigOverrides, RecognitionOptions, SkewOptions,
};
use detection::TextDetector;
pub use dictionary::CharacterDictionary;
pub use error::{OcrError, Result};
use lines::{group_lines, project_grouped};
use recognition::TextRecognizer;
pub use result::*;
pub use session::{ExecutionProvider, InferenceSession, OrtSession};

pub use ort as runtime;

pub struct OcrEngineBuilder {
    threads: usize,
    det_path: Option<PathBuf>,
    cls_path: Option<PathBuf>,
    rec_paths: Option<(PathBuf, PathBuf)>,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
    config: OcrConfig,
    det_session: Option<Box<dyn InferenceSession>>,
    cls_session: Option<Box<dyn InferenceSession>>,
    rec_session: Option<(Box<dyn InferenceSession>, CharacterDictionary)>,
}

impl OcrEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    /// Enables direction classification with the given model.
    pub fn cls_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.cls_path = Some(path.into());
        self.config.recognition.use_angle_cls = true;
        self
    }

    pub fn rec_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.rec_paths = Some((model_path.into(), keys_path.into()));
        self
    }

    /// Uses already constructed sessions instead of loading ONNX files.
    pub fn with_sessions(
        mut self,
        detection: impl InferenceSession + 'static,
        recognition: impl InferenceSession + 'static,
        dictionary: CharacterDictionary,
    ) -> Self {
        self.det_session = Some(Box::new(detection));
        self.rec_session = Some((Box::new(recognition), dictionary));
        self
    }

    pub fn with_classifier_session(mut self, session: impl InferenceSession + 'static) -> Self {
        self.cls_session = Some(Box::new(session));
        self.config.recognition.use_angle_cls = true;
        self
    }

    pub fn config(mut self, config: OcrConfig) -> Self {
        self.config = config;
        self
    }

    pub fn overrides(mut self, overrides: &OcrConfigOverrides) -> Self {
        self.config = self.config.with_overrides(overrides);
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.config.detection.max_side_length = max_side_len;
        self
    }

    pub fn auto_deskew(mut self, auto_deskew: bool) -> Self {
        self.config.detection.auto_deskew = auto_deskew;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self), level = "debug")]
    fn init_models(&mut self) -> Result<(TextDetector, Option<AngleNet>, TextRecognizer)> {
        let cache_path = self.cache_path.as_deref();

        let detector = match (self.det_session.take(), self.det_path.take()) {
            (Some(session), _) => TextDetector::new(session),
            (None, Some(path)) => TextDetector::init(
                &path,
                self.threads,
                self.config.detection.max_side_length,
                &self.execution_providers,
                cache_path,
            )?,
            (None, None) => return Err(OcrError::MissingModel("detection")),
        };

        let classifier = match (self.cls_session.take(), self.cls_path.take()) {
            (Some(session), _) => Some(AngleNet::new(session)),
            (None, Some(path)) => Some(AngleNet::init(
                &path,
                self.threads,
                &self.execution_providers,
                cache_path,
            )?),
            (None, None) => None,
        };

        let recognizer = match (self.rec_session.take(), self.rec_paths.take()) {
            (Some((session, dictionary)), _) => TextRecognizer::new(
                session,
                dictionary,
                self.config.recognition.concurrency,
            )?,
            (None, Some((model_path, keys_path))) => TextRecognizer::init(
                &model_path,
                &keys_path,
                self.threads,
                &self.execution_providers,
                cache_path,
                &self.config.recognition,
            )?,
            (None, None) => return Err(OcrError::MissingModel("recognition")),
        };

        Ok((detector, classifier, recognizer))
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<OcrEngine> {
        let (detector, classifier, recognizer) = self.init_models()?;
        Ok(OcrEngine {
            detector,
            classifier,
            recognizer,
            config: self.config,
        })
    }
}

impl Default for OcrEngineBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            det_path: None,
            cls_path: None,
            rec_paths: None,
            cache_path: None,
            execution_providers: session::DEFAULT_PROVIDERS.to_vec(),
            config: OcrConfig::default(),
            det_session: None,
            cls_session: None,
            rec_session: None,
        }
    }
}

/// Owns the inference sessions and the dictionary. Dropping it releases them.
pub struct OcrEngine {
    detector: TextDetector,
    classifier: Option<AngleNet>,
    recognizer: TextRecognizer,
    config: OcrConfig,
}

impl OcrEngine {
    pub fn builder() -> OcrEngineBuilder {
        OcrEngineBuilder::new()
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &CharacterDictionary {
        self.recognizer.dictionary()
    }

    /// Detects, recognizes and groups the text of `image` into lines.
    pub fn recognize(&self, image: &DynamicImage) -> Result<OcrResult> {
        self.run(&image.to_rgba8(), &self.config)
    }

    pub fn recognize_flat(&self, image: &DynamicImage) -> Result<FlatOcrResult> {
        Ok(self.recognize(image)?.flatten())
    }

    /// Like [`recognize`](Self::recognize) with per-call overrides on top of the
    /// engine's configuration. The worker pool size is fixed at build time.
    pub fn recognize_with(
        &self,
        image: &DynamicImage,
        overrides: &OcrConfigOverrides,
    ) -> Result<OcrResult> {
        self.run(&image.to_rgba8(), &self.config.with_overrides(overrides))
    }

    pub fn recognize_bytes(&self, bytes: &[u8]) -> Result<OcrResult> {
        let image = image::load_from_memory(bytes)?;
        self.recognize(&image)
    }

    /// Text boxes in reading order. With auto-deskew enabled they refer to the
    /// deskewed image.
    #[instrument(skip_all, level = "debug")]
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<TextBox>> {
        let detection = self.detector.detect(
            &image.to_rgba8(),
            &self.config.detection,
            &self.config.skew,
        )?;
        Ok(detection.boxes)
    }

    /// Recognizes caller-supplied boxes, returned in reading order.
    #[instrument(skip_all, level = "debug")]
    pub fn recognize_boxes(
        &self,
        image: &DynamicImage,
        boxes: &[TextBox],
    ) -> Result<Vec<RecognitionResult>> {
        Ok(self.recognizer.recognize_boxes(
            &image.to_rgba8(),
            boxes,
            &self.config.recognition,
            self.classifier_for(&self.config.recognition),
        ))
    }

    /// Releases the inference sessions.
    pub fn close(self) {
        drop(self);
    }

    fn classifier_for(&self, options: &RecognitionOptions) -> Option<&AngleNet> {
        if !options.use_angle_cls {
            return None;
        }
        if self.classifier.is_none() {
            log::warn!("Direction classification requested but no classifier model is loaded");
        }
        self.classifier.as_ref()
    }

    #[instrument(skip_all)]
    fn run(&self, image: &RgbaImage, config: &OcrConfig) -> Result<OcrResult> {
        let detection = self
            .detector
            .detect(image, &config.detection, &config.skew)?;
        let source = detection.corrected.as_ref().unwrap_or(image);

        let results = self.recognizer.recognize_boxes(
            source,
            &detection.boxes,
            &config.recognition,
            self.classifier_for(&config.recognition),
        );
        log::debug!(
            "Recognized {} of {} boxes",
            results.len(),
            detection.boxes.len()
        );
        Ok(project_grouped(group_lines(results), detection.skew_angle))
    }
}

impl Drop for OcrEngine {
    fn drop(&mut self) {
        log::debug!("Releasing OCR inference sessions");
    }
}
