use std::path::Path;

use image::{imageops::FilterType, GrayImage, Rgba, RgbaImage};
use imageproc::{
    contours::{find_contours, BorderType},
    contrast::{threshold_mut, ThresholdType},
    distance_transform::Norm,
    geometric_transformations::{rotate_about_center, Interpolation},
    morphology::dilate_mut,
    point::Point,
};
use ndarray::{s, Array2, Array3, Axis};
use tracing::instrument;

use crate::{
    geometry::{
        apply_padding, calculate_resize_dimensions, contour_bounding_rect,
        filter_and_sort_boxes, padded_dimensions, to_original_coordinates, Rect,
    },
    session::{ExecutionProvider, InferenceSession, OrtSession, ShapeProfile},
    skew::SkewEstimator,
    tensor::{image_to_detection_tensor, probability_map_to_gray},
    DetectionOptions, Result, SkewOptions, TextBox,
};

/// Model input for one detection pass.
#[derive(Debug, Clone)]
pub struct PreprocessResult {
    /// `(3, height, width)` normalised tensor.
    pub tensor: Array3<f32>,
    /// Padded model-input width, a multiple of 32.
    pub width: u32,
    pub height: u32,
    /// `original = padded / resize_ratio`.
    pub resize_ratio: f32,
    pub original_width: u32,
    pub original_height: u32,
}

/// Per-pixel text probability for one detection pass, in model-input space.
#[derive(Debug, Clone)]
pub struct ProbabilityMap {
    pub data: Array2<f32>,
    pub resize_ratio: f32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ProbabilityMap {
    pub fn width(&self) -> u32 {
        self.data.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.data.nrows() as u32
    }

    pub fn to_gray(&self) -> GrayImage {
        probability_map_to_gray(
            self.data.as_slice().unwrap_or_default(),
            self.width(),
            self.height(),
        )
    }

    /// Text pixels become 255, everything else 0.
    pub fn binarize(&self, threshold: f32, dilation_radius: u8) -> GrayImage {
        let mut image = self.to_gray();
        let threshold = (threshold * 255.0) as u8;
        threshold_mut(&mut image, threshold, ThresholdType::Binary);
        if dilation_radius > 0 {
            dilate_mut(&mut image, Norm::L1, dilation_radius);
        }
        image
    }

    /// Mean probability inside `rect`.
    pub fn box_score(&self, rect: &Rect) -> f32 {
        let x0 = rect.x.clamp(0, self.width() as i32) as usize;
        let y0 = rect.y.clamp(0, self.height() as i32) as usize;
        let x1 = (rect.x + rect.width).clamp(0, self.width() as i32) as usize;
        let y1 = (rect.y + rect.height).clamp(0, self.height() as i32) as usize;
        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }
        self.data.slice(s![y0..y1, x0..x1]).mean().unwrap_or(0.0)
    }

    /// Contours → padded rects → boxes in original image space, in reading order.
    #[instrument(level = "trace", skip(self, options))]
    pub fn boxes(&self, options: &DetectionOptions) -> Vec<TextBox> {
        let binary = self.binarize(options.threshold, options.dilation_radius);
        let (max_width, max_height) = (self.width() as i32, self.height() as i32);

        let boxes = find_regions(&binary, options.max_candidates)
            .into_iter()
            .filter(|region| region.rect.area() as f32 > options.minimum_area_threshold)
            .filter(|region| {
                options.min_box_score <= 0.0
                    || self.box_score(&region.rect) >= options.min_box_score
            })
            .map(|region| {
                apply_padding(
                    region.rect,
                    max_width,
                    max_height,
                    options.padding_vertical,
                    options.padding_horizontal,
                )
            })
            .map(|rect| {
                to_original_coordinates(
                    rect,
                    self.resize_ratio,
                    self.original_width,
                    self.original_height,
                )
            })
            .collect();
        filter_and_sort_boxes(boxes)
    }
}

/// An outer contour of a binary image and its bounding rect.
#[derive(Debug, Clone)]
pub(crate) struct Region {
    pub points: Vec<Point<i32>>,
    pub rect: Rect,
}

pub(crate) fn find_regions(binary: &GrayImage, max_candidates: usize) -> Vec<Region> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .take(max_candidates)
        .filter_map(|contour| {
            let rect = contour_bounding_rect(&contour.points)?;
            Some(Region {
                points: contour.points,
                rect,
            })
        })
        .collect()
}

/// Boxes found by a detection pass, plus the deskewed image they refer to
/// when a rotation was applied.
#[derive(Debug, Clone)]
pub struct Detection {
    pub boxes: Vec<TextBox>,
    pub skew_angle: f32,
    pub corrected: Option<RgbaImage>,
}

pub struct TextDetector {
    session: Box<dyn InferenceSession>,
}

impl TextDetector {
    pub fn new(session: impl InferenceSession + 'static) -> Self {
        Self {
            session: Box::new(session),
        }
    }

    #[instrument(level = "debug")]
    pub fn init(
        path: &Path,
        num_threads: usize,
        max_side_len: u32,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<&Path>,
    ) -> Result<Self> {
        let session = OrtSession::init(
            path,
            num_threads,
            execution_providers,
            cache_path,
            &ShapeProfile::detection(max_side_len),
        )?;
        Ok(Self::new(session))
    }

    /// Resizes to fit `max_side_length`, pads to multiples of 32 and normalises.
    #[instrument(level = "debug", skip(image, options))]
    pub fn preprocess(image: &RgbaImage, options: &DetectionOptions) -> PreprocessResult {
        let (original_width, original_height) = image.dimensions();
        let dims = calculate_resize_dimensions(
            original_width,
            original_height,
            options.max_side_length,
        );
        let (width, height) = padded_dimensions(dims.width, dims.height);

        let mut padded = RgbaImage::new(width, height);
        if dims.ratio == 1.0 {
            image::imageops::replace(&mut padded, image, 0, 0);
        } else {
            let resized =
                image::imageops::resize(image, dims.width, dims.height, FilterType::Triangle);
            image::imageops::replace(&mut padded, &resized, 0, 0);
        }

        PreprocessResult {
            tensor: image_to_detection_tensor(&padded, &options.mean, &options.std),
            width,
            height,
            resize_ratio: dims.ratio,
            original_width,
            original_height,
        }
    }

    /// Runs the model. `Ok(None)` when it produced no usable output.
    #[instrument(level = "debug", skip(self, image, options))]
    pub fn probability_map(
        &self,
        image: &RgbaImage,
        options: &DetectionOptions,
    ) -> Result<Option<ProbabilityMap>> {
        let PreprocessResult {
            tensor,
            width,
            height,
            resize_ratio,
            original_width,
            original_height,
        } = Self::preprocess(image, options);

        let Some(output) = self.session.run(tensor.insert_axis(Axis(0)))? else {
            log::warn!("Detection model returned no output tensor");
            return Ok(None);
        };
        let shape = output.shape();
        if shape.len() < 2 || output.is_empty() {
            log::warn!("Detection output has unusable shape {shape:?}");
            return Ok(None);
        }
        let map_height = shape[shape.len() - 2];
        let map_width = shape[shape.len() - 1];
        if (map_width, map_height) != (width as usize, height as usize) {
            log::warn!(
                "Detection output is {map_width}x{map_height}, model input was {width}x{height}"
            );
        }

        let data = Array2::from_shape_vec(
            (map_height, map_width),
            output.iter().take(map_height * map_width).copied().collect(),
        )?;
        Ok(Some(ProbabilityMap {
            data,
            resize_ratio,
            original_width,
            original_height,
        }))
    }

    /// One detection pass without skew correction.
    #[instrument(level = "debug", skip(self, image, options))]
    pub fn detect_boxes(
        &self,
        image: &RgbaImage,
        options: &DetectionOptions,
    ) -> Result<Vec<TextBox>> {
        let Some(map) = self.probability_map(image, options)? else {
            return Ok(Vec::new());
        };
        let boxes = map.boxes(options);
        log::debug!("Detected {} text boxes", boxes.len());
        Ok(boxes)
    }

    /// Detection with optional skew estimation and correction beforehand.
    #[instrument(level = "debug", skip_all)]
    pub fn detect(
        &self,
        image: &RgbaImage,
        options: &DetectionOptions,
        skew_options: &SkewOptions,
    ) -> Result<Detection> {
        if !options.auto_deskew {
            return Ok(Detection {
                boxes: self.detect_boxes(image, options)?,
                skew_angle: 0.0,
                corrected: None,
            });
        }

        let angle = SkewEstimator::new(options, skew_options).estimate(self, image)?;
        if angle.abs() < skew_options.min_correction {
            log::debug!("Estimated skew {angle:.2}° is below the correction threshold");
            return Ok(Detection {
                boxes: self.detect_boxes(image, options)?,
                skew_angle: 0.0,
                corrected: None,
            });
        }

        log::debug!("Rotating image by {:.2}° to correct skew", -angle);
        let corrected = rotate_about_center(
            image,
            (-angle).to_radians(),
            Interpolation::Bilinear,
            Rgba([255, 255, 255, 255]),
        );
        let boxes = self.detect_boxes(&corrected, options)?;
        Ok(Detection {
            boxes,
            skew_angle: angle,
            corrected: Some(corrected),
        })
    }
}
