//! Skew estimation for the whole page.
//!
//! Three independent estimators look at the binarised detection map:
//! minimum-area rectangles of text regions, least-squares fits through the
//! bottom edge of each region, and long straight segments from a Hough
//! transform. Their weighted samples are merged by [`consensus_angle`].

use geo::{Coord, LineString, MinimumRotatedRect, Polygon};
use image::{GrayImage, Luma, RgbaImage};
use imageproc::{
    morphology::{grayscale_close, Mask},
    point::Point,
};
use tracing::instrument;

use crate::{
    detection::{find_regions, ProbabilityMap, Region, TextDetector},
    hough::{probabilistic_hough, HoughParams},
    DetectionOptions, Result, SkewOptions,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleMeasurement {
    /// Degrees in `[-45, 45]`.
    pub angle: f32,
    pub weight: f32,
}

/// Folds any angle onto `[-45, 45]` modulo 90°.
pub fn normalize_angle(angle: f32) -> f32 {
    let mut angle = angle % 180.0;
    while angle > 45.0 {
        angle -= 90.0;
    }
    while angle < -45.0 {
        angle += 90.0;
    }
    angle
}

fn elongation(aspect: f32) -> f32 {
    if aspect <= 0.0 {
        0.0
    } else {
        aspect.min(1.0 / aspect)
    }
}

fn to_geo_poly(points: &[Point<i32>]) -> Polygon<f32> {
    let points = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect();
    Polygon::new(LineString::new(points), vec![])
}

/// Angle of the longer of the first two edges of a rotated rectangle.
fn rect_angle(rect: &Polygon<f32>) -> Option<f32> {
    let coords = &rect.exterior().0;
    if coords.len() < 3 {
        return None;
    }
    let edge = |a: Coord<f32>, b: Coord<f32>| (b.x - a.x, b.y - a.y);
    let first = edge(coords[0], coords[1]);
    let second = edge(coords[1], coords[2]);
    let (dx, dy) = if first.0.hypot(first.1) >= second.0.hypot(second.1) {
        first
    } else {
        second
    };
    if dx.hypot(dy) < f32::EPSILON {
        return None;
    }
    Some(dy.atan2(dx).to_degrees())
}

/// Orientation of each region's minimum-area rectangle.
pub(crate) fn shape_angles(regions: &[Region]) -> Vec<AngleMeasurement> {
    regions
        .iter()
        .filter(|region| region.points.len() >= 3)
        .filter_map(|region| {
            let rect = to_geo_poly(&region.points).minimum_rotated_rect()?;
            let angle = normalize_angle(rect_angle(&rect)?);
            let area = region.rect.area() as f32;
            let weight = (area + 1.0).ln() * 2.0 * elongation(region.rect.aspect_ratio());
            Some(AngleMeasurement { angle, weight })
        })
        .collect()
}

/// Least-squares slope through `(x, y)` samples.
fn fit_slope(samples: &[(f32, f32)]) -> Option<f32> {
    let n = samples.len() as f32;
    let (sum_x, sum_y, sum_xy, sum_xx) = samples.iter().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sxy, sxx), &(x, y)| (sx + x, sy + y, sxy + x * y, sxx + x * x),
    );
    let denominator = n * sum_xx - sum_x * sum_x;
    if samples.len() < 2 || denominator.abs() < f32::EPSILON {
        return None;
    }
    Some((n * sum_xy - sum_x * sum_y) / denominator)
}

/// Slope of each region's bottom edge, sampled as the lowest point in each
/// horizontal third of the contour.
pub(crate) fn baseline_angles(regions: &[Region]) -> Vec<AngleMeasurement> {
    regions
        .iter()
        .filter_map(|region| {
            let mut points = region.points.clone();
            points.sort_by_key(|p| p.x);
            let n = points.len();
            let samples = (0..3)
                .filter_map(|i| {
                    points[i * n / 3..(i + 1) * n / 3]
                        .iter()
                        .max_by_key(|p| p.y)
                        .map(|p| (p.x as f32, p.y as f32))
                })
                .collect::<Vec<_>>();
            let slope = fit_slope(&samples)?;
            let angle = normalize_angle(slope.atan().to_degrees());
            let weight = region.rect.area() as f32 * elongation(region.rect.aspect_ratio());
            Some(AngleMeasurement { angle, weight })
        })
        .collect()
}

/// Long straight segments after bridging gaps between characters.
pub(crate) fn line_angles(
    binary: &GrayImage,
    params: &HoughParams,
    min_angle: f32,
    max_angle: f32,
) -> Vec<AngleMeasurement> {
    let kernel = Mask::from_image(&GrayImage::from_pixel(3, 1, Luma([255])), 1, 0);
    let closed = grayscale_close(binary, &kernel);
    probabilistic_hough(&closed, params)
        .into_iter()
        .map(|segment| AngleMeasurement {
            angle: normalize_angle(segment.angle_degrees()),
            weight: segment.length(),
        })
        .filter(|m| (min_angle..=max_angle).contains(&m.angle))
        .collect()
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f32], q: f32) -> f32 {
    let position = q * (sorted.len() - 1) as f32;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Outlier-robust weighted mean of all measurements.
///
/// Samples outside the 1.5×IQR fences or outside `[min_angle, max_angle]`
/// are dropped. If nothing survives, the median of all samples is used.
/// The result is clamped to `[min_angle, max_angle]`; no samples gives 0.
pub fn consensus_angle(measurements: &[AngleMeasurement], min_angle: f32, max_angle: f32) -> f32 {
    let mut angles = measurements
        .iter()
        .map(|m| m.angle)
        .filter(|a| a.is_finite())
        .collect::<Vec<_>>();
    if angles.is_empty() {
        return 0.0;
    }
    angles.sort_by(f32::total_cmp);

    let q1 = quantile(&angles, 0.25);
    let q3 = quantile(&angles, 0.75);
    let iqr = q3 - q1;
    let (low, high) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

    let survivors = measurements
        .iter()
        .filter(|m| m.angle >= low && m.angle <= high)
        .filter(|m| m.angle >= min_angle && m.angle <= max_angle)
        .collect::<Vec<_>>();

    let angle = if survivors.is_empty() {
        quantile(&angles, 0.5)
    } else {
        let total_weight = survivors.iter().map(|m| m.weight.max(0.0)).sum::<f32>();
        if total_weight > 0.0 {
            survivors
                .iter()
                .map(|m| m.angle * m.weight.max(0.0))
                .sum::<f32>()
                / total_weight
        } else {
            survivors.iter().map(|m| m.angle).sum::<f32>() / survivors.len() as f32
        }
    };
    angle.clamp(min_angle, max_angle)
}

pub struct SkewEstimator<'a> {
    detection: &'a DetectionOptions,
    options: &'a SkewOptions,
}

impl<'a> SkewEstimator<'a> {
    pub fn new(detection: &'a DetectionOptions, options: &'a SkewOptions) -> Self {
        Self { detection, options }
    }

    /// Runs one detection pass over `image` and estimates its skew in degrees.
    /// Positive angles mean text lines descend to the right.
    #[instrument(level = "debug", skip_all)]
    pub fn estimate(&self, detector: &TextDetector, image: &RgbaImage) -> Result<f32> {
        let Some(map) = detector.probability_map(image, self.detection)? else {
            return Ok(0.0);
        };
        Ok(self.estimate_from_probability_map(&map))
    }

    pub fn estimate_from_probability_map(&self, map: &ProbabilityMap) -> f32 {
        let SkewOptions {
            min_angle,
            max_angle,
            min_aspect,
            max_aspect,
            ..
        } = *self.options;

        let binary = map.binarize(self.detection.threshold, self.detection.dilation_radius);
        let regions = find_regions(&binary, self.detection.max_candidates)
            .into_iter()
            .filter(|region| region.rect.area() as f32 >= self.detection.minimum_area_threshold)
            .filter(|region| {
                let aspect = region.rect.aspect_ratio();
                aspect > min_aspect && aspect < max_aspect
            })
            .collect::<Vec<_>>();

        let shape = shape_angles(&regions);
        let baseline = baseline_angles(&regions);
        let lines = line_angles(&binary, &self.options.hough, min_angle, max_angle);
        log::debug!(
            "Skew samples: {} shape, {} baseline, {} line",
            shape.len(),
            baseline.len(),
            lines.len()
        );

        let measurements = [shape, baseline, lines].concat();
        let angle = consensus_angle(&measurements, min_angle, max_angle);
        log::debug!("Estimated skew {angle:.2}° from {} samples", measurements.len());
        angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use imageproc::drawing::draw_polygon_mut;
    use ndarray::Array2;

    fn m(angle: f32, weight: f32) -> AngleMeasurement {
        AngleMeasurement { angle, weight }
    }

    /// Filled bars of `length`×`thickness`, rotated by `degrees` about their centres.
    fn bars(width: u32, height: u32, centres: &[(f32, f32)], degrees: f32) -> GrayImage {
        let mut image = GrayImage::new(width, height);
        let (sin, cos) = degrees.to_radians().sin_cos();
        let (half_length, half_thickness) = (110.0f32, 7.0f32);
        for &(cx, cy) in centres {
            let corners = [
                (-half_length, -half_thickness),
                (half_length, -half_thickness),
                (half_length, half_thickness),
                (-half_length, half_thickness),
            ]
            .map(|(x, y)| {
                Point::new(
                    (cx + x * cos - y * sin).round() as i32,
                    (cy + x * sin + y * cos).round() as i32,
                )
            });
            draw_polygon_mut(&mut image, &corners, Luma([255]));
        }
        image
    }

    fn regions_of(image: &GrayImage) -> Vec<Region> {
        find_regions(image, 1000)
    }

    fn map_of(image: &GrayImage) -> ProbabilityMap {
        let data = Array2::from_shape_fn(
            (image.height() as usize, image.width() as usize),
            |(y, x)| image.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0,
        );
        ProbabilityMap {
            data,
            resize_ratio: 1.0,
            original_width: image.width(),
            original_height: image.height(),
        }
    }

    #[test]
    fn angles_fold_into_forty_five_degrees() {
        assert_eq!(normalize_angle(0.0), 0.0);
        assert_eq!(normalize_angle(30.0), 30.0);
        assert_eq!(normalize_angle(95.0), 5.0);
        assert_eq!(normalize_angle(-85.0), 5.0);
        assert_eq!(normalize_angle(-60.0), 30.0);
        assert_eq!(normalize_angle(180.0), 0.0);
        assert_eq!(normalize_angle(45.0), 45.0);
    }

    #[test]
    fn out_of_range_outlier_is_ignored_despite_weight() {
        let angle = consensus_angle(&[m(5.0, 1.0), m(5.0, 1.0), m(50.0, 100.0)], -20.0, 20.0);
        assert!((angle - 5.0).abs() < 1e-4, "{angle}");
    }

    #[test]
    fn iqr_fences_drop_outliers() {
        let samples = [m(1.0, 1.0), m(2.0, 1.0), m(2.0, 1.0), m(3.0, 1.0), m(18.0, 50.0)];
        let angle = consensus_angle(&samples, -20.0, 20.0);
        assert!((angle - 2.0).abs() < 1e-4, "{angle}");
    }

    #[test]
    fn zero_weights_fall_back_to_plain_mean() {
        let angle = consensus_angle(&[m(2.0, 0.0), m(4.0, 0.0)], -20.0, 20.0);
        assert!((angle - 3.0).abs() < 1e-4);
    }

    #[test]
    fn fully_filtered_samples_use_the_clamped_median() {
        let angle = consensus_angle(&[m(30.0, 1.0), m(32.0, 1.0), m(40.0, 1.0)], -20.0, 20.0);
        assert_eq!(angle, 20.0);
    }

    #[test]
    fn no_samples_means_no_correction() {
        assert_eq!(consensus_angle(&[], -20.0, 20.0), 0.0);
    }

    #[test]
    fn shape_and_baseline_agree_on_a_rotated_bar() {
        let image = bars(400, 200, &[(200.0, 100.0)], 5.0);
        let regions = regions_of(&image);
        assert_eq!(regions.len(), 1);

        let shape = shape_angles(&regions);
        assert_eq!(shape.len(), 1);
        assert!((shape[0].angle - 5.0).abs() < 1.0, "{shape:?}");
        assert!(shape[0].weight > 0.0);

        let baseline = baseline_angles(&regions);
        assert_eq!(baseline.len(), 1);
        assert!((baseline[0].angle - 5.0).abs() < 1.0, "{baseline:?}");
    }

    #[test]
    fn baseline_needs_horizontal_spread() {
        let region = Region {
            points: vec![Point::new(3, 0), Point::new(3, 5), Point::new(3, 9)],
            rect: Rect::new(3, 0, 1, 10),
        };
        assert!(baseline_angles(&[region]).is_empty());
    }

    #[test]
    fn hough_lines_follow_the_bars() {
        let image = bars(400, 320, &[(200.0, 80.0), (200.0, 240.0)], -4.0);
        let lines = line_angles(&image, &HoughParams::default(), -20.0, 20.0);
        assert!(!lines.is_empty());
        let weighted = consensus_angle(&lines, -20.0, 20.0);
        assert!((weighted + 4.0).abs() < 2.0, "{weighted}");
    }

    #[test]
    fn estimates_page_skew() {
        let image = bars(400, 320, &[(200.0, 60.0), (200.0, 160.0), (200.0, 260.0)], 5.0);
        let detection = DetectionOptions::default();
        let skew = SkewOptions::default();
        let angle =
            SkewEstimator::new(&detection, &skew).estimate_from_probability_map(&map_of(&image));
        assert!((angle - 5.0).abs() < 2.0, "{angle}");
    }

    #[test]
    fn blank_page_has_no_skew() {
        let image = GrayImage::new(128, 64);
        let detection = DetectionOptions::default();
        let skew = SkewOptions::default();
        let angle =
            SkewEstimator::new(&detection, &skew).estimate_from_probability_map(&map_of(&image));
        assert_eq!(angle, 0.0);
    }
}
