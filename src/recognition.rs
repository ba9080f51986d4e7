use std::path::Path;

use image::{imageops::FilterType, DynamicImage, RgbaImage};
use ndarray::{Array2, Axis};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use tracing::instrument;

use crate::{
    angle_net::AngleNet,
    ctc::{CtcDecoder, DecodedText},
    geometry::{compare_reading_order, sort_by_comparator},
    session::{ExecutionProvider, InferenceSession, OrtSession, ShapeProfile},
    tensor::image_to_recognition_tensor,
    CharacterDictionary, RecognitionOptions, RecognitionResult, Result, TextBox,
};

/// Cuts `bounds` out of `image`. `None` when nothing of it lies inside.
pub fn crop_box(image: &RgbaImage, bounds: &TextBox) -> Option<RgbaImage> {
    let crop = image::imageops::crop_imm(image, bounds.x, bounds.y, bounds.width, bounds.height)
        .to_image();
    if crop.width() == 0 || crop.height() == 0 {
        None
    } else {
        Some(crop)
    }
}

/// Grayscale copy of `crop` scaled to `height`, keeping its aspect ratio.
pub fn resize_for_recognition(crop: &RgbaImage, height: u32, min_width: u32) -> RgbaImage {
    let aspect_ratio = crop.width() as f32 / crop.height().max(1) as f32;
    let width = ((height as f32 * aspect_ratio).round() as u32)
        .max(min_width)
        .min(u16::MAX as u32);
    let gray = image::imageops::grayscale(crop);
    let resized = image::imageops::resize(&gray, width, height, FilterType::Triangle);
    DynamicImage::ImageLuma8(resized).to_rgba8()
}

pub struct TextRecognizer {
    session: Box<dyn InferenceSession>,
    dictionary: CharacterDictionary,
    pool: ThreadPool,
}

impl TextRecognizer {
    /// `concurrency` bounds how many boxes are in flight at once.
    pub fn new(
        session: impl InferenceSession + 'static,
        dictionary: CharacterDictionary,
        concurrency: usize,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("textscan-rec-{i}"))
            .build()?;
        Ok(Self {
            session: Box::new(session),
            dictionary,
            pool,
        })
    }

    #[instrument(level = "debug")]
    pub fn init(
        model_path: &Path,
        keys_path: &Path,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<&Path>,
        options: &RecognitionOptions,
    ) -> Result<Self> {
        let session = OrtSession::init(
            model_path,
            num_threads,
            execution_providers,
            cache_path,
            &ShapeProfile::recognition(options.image_height),
        )?;
        let dictionary = CharacterDictionary::from_keys_file(keys_path)?;
        Self::new(session, dictionary, options.concurrency)
    }

    pub fn dictionary(&self) -> &CharacterDictionary {
        &self.dictionary
    }

    /// Recognizes every box independently and returns the results in reading
    /// order. A box that cannot be cropped, classified or decoded is logged and
    /// left out without affecting the others.
    #[instrument(level = "debug", skip_all, fields(boxes = boxes.len()))]
    pub fn recognize_boxes(
        &self,
        image: &RgbaImage,
        boxes: &[TextBox],
        options: &RecognitionOptions,
        classifier: Option<&AngleNet>,
    ) -> Vec<RecognitionResult> {
        let valid = boxes
            .iter()
            .filter(|bounds| {
                if bounds.is_empty() {
                    log::warn!("Skipping box with invalid dimensions: {bounds:?}");
                }
                !bounds.is_empty()
            })
            .copied()
            .collect::<Vec<_>>();

        let mut crops = self.pool.install(|| {
            valid
                .par_iter()
                .filter_map(|bounds| match crop_box(image, bounds) {
                    Some(crop) => Some((*bounds, crop)),
                    None => {
                        log::warn!("Box {bounds:?} lies outside the image, skipping");
                        None
                    }
                })
                .collect::<Vec<_>>()
        });

        #[cfg(feature = "debug")]
        for (i, (_, crop)) in crops.iter().enumerate() {
            if let Err(err) = crop.save(format!("part_images/{i}.png")) {
                log::warn!("Failed to save crop {i}: {err}");
            }
        }

        if let Some(classifier) = classifier {
            let (bounds, mut images): (Vec<_>, Vec<_>) = crops.into_iter().unzip();
            let angles = self.pool.install(|| {
                classifier.get_angles(&images, options.most_angle, options.cls_threshold)
            });
            for (crop, angle) in images.iter_mut().zip(angles) {
                if angle.is_flipped() {
                    *crop = image::imageops::rotate180(crop);
                }
            }
            crops = bounds.into_iter().zip(images).collect();
        }

        let mut results = self.pool.install(|| {
            crops
                .into_par_iter()
                .filter_map(|(bounds, crop)| {
                    let decoded = match self.recognize_crop(&crop, options) {
                        Ok(Some(decoded)) => decoded,
                        Ok(None) => return None,
                        Err(err) => {
                            log::warn!("Recognition failed for box {bounds:?}, skipping: {err}");
                            return None;
                        }
                    };
                    if decoded.text.trim().is_empty() {
                        log::trace!("Box {bounds:?} decoded to empty text");
                        return None;
                    }
                    Some(RecognitionResult {
                        text: decoded.text,
                        bounds,
                        confidence: decoded.confidence,
                        character_scores: decoded.character_scores,
                    })
                })
                .collect::<Vec<_>>()
        });

        sort_by_comparator(&mut results, |a, b| compare_reading_order(&a.bounds, &b.bounds));
        results
    }

    /// Recognizes a single crop. `Ok(None)` when the model produced no usable output.
    #[instrument(level = "trace", skip(self, crop, options))]
    pub fn recognize_crop(
        &self,
        crop: &RgbaImage,
        options: &RecognitionOptions,
    ) -> Result<Option<DecodedText>> {
        let image = resize_for_recognition(crop, options.image_height, options.min_width);
        let tensor = image_to_recognition_tensor(&image).insert_axis(Axis(0));
        let Some(output) = self.session.run(tensor)? else {
            log::warn!("Recognition model returned no output tensor");
            return Ok(None);
        };

        log::trace!("Output tensor size: {:?}", output.shape());
        let num_classes = output.shape().last().copied().unwrap_or(0);
        if output.ndim() < 2 || num_classes == 0 {
            log::warn!("Recognition output has unusable shape {:?}", output.shape());
            return Ok(None);
        }
        let sequence_length = output.len() / num_classes;
        let logits = Array2::from_shape_vec(
            (sequence_length, num_classes),
            output.iter().copied().collect(),
        )?;

        Ok(Some(CtcDecoder::new(&self.dictionary).decode(logits.view())))
    }
}
