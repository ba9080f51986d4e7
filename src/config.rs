//! Pipeline configuration.
//!
//! Every knob has a default. Partial configuration is expressed as
//! [`OcrConfigOverrides`] layers that [`OcrConfig::layered`] applies in order,
//! so the last layer that sets a field wins.

use crate::hough::HoughParams;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOptions {
    /// Longer image side is scaled down to this before detection.
    pub max_side_length: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Probability above which a map pixel counts as text.
    pub threshold: f32,
    /// Minimum mean probability inside a region. 0 keeps everything.
    pub min_box_score: f32,
    /// Regions with a bounding-rect area at or below this (model-input pixels) are noise.
    pub minimum_area_threshold: f32,
    pub padding_vertical: f32,
    pub padding_horizontal: f32,
    /// L1 dilation radius applied to the binary map. 0 disables it.
    pub dilation_radius: u8,
    pub max_candidates: usize,
    pub auto_deskew: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            max_side_length: 960,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            threshold: 0.3,
            min_box_score: 0.0,
            minimum_area_threshold: 20.0,
            padding_vertical: 0.4,
            padding_horizontal: 0.6,
            dilation_radius: 0,
            max_candidates: 1000,
            auto_deskew: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkewOptions {
    pub min_angle: f32,
    pub max_angle: f32,
    /// Regions must have a width/height ratio strictly inside `(min_aspect, max_aspect)`.
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Estimates smaller than this (in degrees) are not worth a rotation.
    pub min_correction: f32,
    pub hough: HoughParams,
}

impl Default for SkewOptions {
    fn default() -> Self {
        Self {
            min_angle: -20.0,
            max_angle: 20.0,
            min_aspect: 0.2,
            max_aspect: 10.0,
            min_correction: 0.1,
            hough: HoughParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOptions {
    pub image_height: u32,
    pub min_width: u32,
    /// Number of boxes recognized in parallel.
    pub concurrency: usize,
    pub use_angle_cls: bool,
    pub cls_threshold: f32,
    /// Apply the majority direction to every crop.
    pub most_angle: bool,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            image_height: 48,
            min_width: 8,
            concurrency: 4,
            use_angle_cls: false,
            cls_threshold: 0.9,
            most_angle: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcrConfig {
    pub detection: DetectionOptions,
    pub skew: SkewOptions,
    pub recognition: RecognitionOptions,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionOverrides {
    pub max_side_length: Option<u32>,
    pub mean: Option<[f32; 3]>,
    pub std: Option<[f32; 3]>,
    pub threshold: Option<f32>,
    pub min_box_score: Option<f32>,
    pub minimum_area_threshold: Option<f32>,
    pub padding_vertical: Option<f32>,
    pub padding_horizontal: Option<f32>,
    pub dilation_radius: Option<u8>,
    pub max_candidates: Option<usize>,
    pub auto_deskew: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkewOverrides {
    pub min_angle: Option<f32>,
    pub max_angle: Option<f32>,
    pub min_aspect: Option<f32>,
    pub max_aspect: Option<f32>,
    pub min_correction: Option<f32>,
    pub hough: Option<HoughParams>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecognitionOverrides {
    pub image_height: Option<u32>,
    pub min_width: Option<u32>,
    pub concurrency: Option<usize>,
    pub use_angle_cls: Option<bool>,
    pub cls_threshold: Option<f32>,
    pub most_angle: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcrConfigOverrides {
    pub detection: DetectionOverrides,
    pub skew: SkewOverrides,
    pub recognition: RecognitionOverrides,
}

fn set<T: Clone>(field: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *field = value.clone();
    }
}

impl DetectionOptions {
    fn apply(&mut self, o: &DetectionOverrides) {
        set(&mut self.max_side_length, &o.max_side_length);
        set(&mut self.mean, &o.mean);
        set(&mut self.std, &o.std);
        set(&mut self.threshold, &o.threshold);
        set(&mut self.min_box_score, &o.min_box_score);
        set(&mut self.minimum_area_threshold, &o.minimum_area_threshold);
        set(&mut self.padding_vertical, &o.padding_vertical);
        set(&mut self.padding_horizontal, &o.padding_horizontal);
        set(&mut self.dilation_radius, &o.dilation_radius);
        set(&mut self.max_candidates, &o.max_candidates);
        set(&mut self.auto_deskew, &o.auto_deskew);
    }
}

impl SkewOptions {
    fn apply(&mut self, o: &SkewOverrides) {
        set(&mut self.min_angle, &o.min_angle);
        set(&mut self.max_angle, &o.max_angle);
        set(&mut self.min_aspect, &o.min_aspect);
        set(&mut self.max_aspect, &o.max_aspect);
        set(&mut self.min_correction, &o.min_correction);
        set(&mut self.hough, &o.hough);
    }
}

impl RecognitionOptions {
    fn apply(&mut self, o: &RecognitionOverrides) {
        set(&mut self.image_height, &o.image_height);
        set(&mut self.min_width, &o.min_width);
        set(&mut self.concurrency, &o.concurrency);
        set(&mut self.use_angle_cls, &o.use_angle_cls);
        set(&mut self.cls_threshold, &o.cls_threshold);
        set(&mut self.most_angle, &o.most_angle);
    }
}

impl OcrConfig {
    /// Applies `layers` over `base` in order; later layers take precedence.
    pub fn layered(base: &OcrConfig, layers: &[OcrConfigOverrides]) -> OcrConfig {
        let mut config = base.clone();
        for layer in layers {
            config.detection.apply(&layer.detection);
            config.skew.apply(&layer.skew);
            config.recognition.apply(&layer.recognition);
        }
        config
    }

    pub fn with_overrides(&self, overrides: &OcrConfigOverrides) -> OcrConfig {
        Self::layered(self, std::slice::from_ref(overrides))
    }
}
