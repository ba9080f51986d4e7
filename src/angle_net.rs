use std::path::Path;

use float_ord::FloatOrd;
use image::{imageops::FilterType, RgbaImage};
use ndarray::Axis;
use rayon::prelude::*;
use tracing::instrument;

use crate::{
    session::{ExecutionProvider, InferenceSession, OrtSession, ShapeProfile},
    tensor::image_to_detection_tensor,
    Angle, Result,
};

const DEST_WIDTH: u32 = 192;
const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const STD_VALUES: [f32; 3] = [0.5, 0.5, 0.5];

const UPRIGHT: Angle = Angle {
    index: 0,
    score: 0.0,
};

/// Classifies text crops as upright (index 0) or upside down (index 1).
pub struct AngleNet {
    session: Box<dyn InferenceSession>,
}

impl AngleNet {
    pub fn new(session: impl InferenceSession + 'static) -> Self {
        Self {
            session: Box::new(session),
        }
    }

    #[instrument(level = "debug")]
    pub fn init(
        path: &Path,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<&Path>,
    ) -> Result<Self> {
        let session = OrtSession::init(
            path,
            num_threads,
            execution_providers,
            cache_path,
            &ShapeProfile::classifier(),
        )?;
        Ok(Self::new(session))
    }

    /// Classifies every crop in parallel on the current rayon pool. A crop the
    /// model fails on is treated as upright.
    #[instrument(level = "debug", skip(self, images))]
    pub fn get_angles(
        &self,
        images: &[RgbaImage],
        most_angle: bool,
        threshold: f32,
    ) -> Vec<Angle> {
        let angles = images
            .par_iter()
            .map(|image| {
                self.get_angle(image).unwrap_or_else(|err| {
                    log::warn!("Direction classification failed, keeping crop upright: {err}");
                    UPRIGHT
                })
            })
            .collect::<Vec<_>>();
        resolve_angles(angles, most_angle, threshold)
    }

    /// Raw classification of one crop. A model without output counts as upright.
    #[instrument(level = "trace", skip(self, image))]
    pub fn get_angle(&self, image: &RgbaImage) -> Result<Angle> {
        let image = image::imageops::resize(image, DEST_WIDTH, DEST_HEIGHT, FilterType::Triangle);
        let tensor =
            image_to_detection_tensor(&image, &MEAN_VALUES, &STD_VALUES).insert_axis(Axis(0));
        let Some(output) = self.session.run(tensor)? else {
            log::warn!("Direction classifier returned no output tensor");
            return Ok(UPRIGHT);
        };

        let angle = output
            .iter()
            .enumerate()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .map(|(index, score)| Angle {
                index,
                score: *score,
            })
            .unwrap_or(UPRIGHT);
        Ok(angle)
    }
}

/// Demotes low-confidence flips to upright and, with `most_angle`, gives
/// every crop the majority direction.
pub fn resolve_angles(mut angles: Vec<Angle>, most_angle: bool, threshold: f32) -> Vec<Angle> {
    for angle in angles.iter_mut() {
        if angle.is_flipped() && angle.score < threshold {
            angle.index = 0;
        }
    }

    if most_angle && !angles.is_empty() {
        let flipped = angles.iter().filter(|angle| angle.is_flipped()).count() as f32;
        let half = angles.len() as f32 / 2.0;
        let most_angle_index = if flipped < half { 0 } else { 1 };
        for angle in angles.iter_mut() {
            angle.index = most_angle_index;
        }
    }
    angles
}
