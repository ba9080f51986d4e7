use std::{
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_polygon_mut},
    point::Point,
    rect::Rect,
};
use ndarray::{Array3, Array4, ArrayD, Axis};
use textscan::{
    CharacterDictionary, InferenceSession, OcrConfigOverrides, OcrEngine, OcrError, Result,
    TextBox,
};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Marks every pixel darker than mid-gray as text.
struct DarkPixelDetector;

impl InferenceSession for DarkPixelDetector {
    fn run(&self, input: Array4<f32>) -> Result<Option<ArrayD<f32>>> {
        let red = input.index_axis(Axis(0), 0).index_axis(Axis(0), 0).to_owned();
        let map = red.mapv(|v| if v < 0.0 { 1.0 } else { 0.0 });
        Ok(Some(map.insert_axis(Axis(0)).insert_axis(Axis(0)).into_dyn()))
    }
}

struct NoOutput;

impl InferenceSession for NoOutput {
    fn run(&self, _input: Array4<f32>) -> Result<Option<ArrayD<f32>>> {
        Ok(None)
    }
}

/// Always reads "HI" with 0.9 confidence.
struct ScriptedRecognizer;

impl InferenceSession for ScriptedRecognizer {
    fn run(&self, input: Array4<f32>) -> Result<Option<ArrayD<f32>>> {
        assert_eq!(input.shape()[2], 48);
        let steps = [0, 1, 1, 0, 2, 2, 0];
        let num_classes = 4;
        let logits = Array3::from_shape_fn((1, steps.len(), num_classes), |(_, t, c)| {
            if c == steps[t] {
                0.9
            } else {
                0.1 / 3.0
            }
        });
        Ok(Some(logits.into_dyn()))
    }
}

/// Counts its calls and always reports an upright crop.
struct CountingClassifier(Arc<AtomicUsize>);

impl InferenceSession for CountingClassifier {
    fn run(&self, _input: Array4<f32>) -> Result<Option<ArrayD<f32>>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ndarray::arr2(&[[0.9f32, 0.1]]).into_dyn()))
    }
}

fn dictionary() -> CharacterDictionary {
    CharacterDictionary::from_keys(["H", "I"])
}

fn engine() -> OcrEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    OcrEngine::builder()
        .with_sessions(DarkPixelDetector, ScriptedRecognizer, dictionary())
        .build()
        .expect("Failed to build engine")
}

fn page(width: u32, height: u32, words: &[(i32, i32, u32, u32)]) -> DynamicImage {
    let mut image = RgbaImage::from_pixel(width, height, WHITE);
    for &(x, y, w, h) in words {
        draw_filled_rect_mut(&mut image, Rect::at(x, y).of_size(w, h), BLACK);
    }
    DynamicImage::ImageRgba8(image)
}

#[test]
fn single_line_is_recognized() {
    let ocr = engine();
    let image = page(320, 160, &[(40, 60, 200, 24)]);

    let result = ocr.recognize(&image).expect("Failed recognition.");
    assert_eq!(result.lines.len(), 1);
    assert_eq!(result.lines[0].len(), 1);
    assert_eq!(result.text, "HI");
    assert!(result.confidence > 0.0);
    assert_eq!(result.skew_angle, 0.0);

    let rendered = TextBox::new(40, 60, 200, 24);
    let bounds = result.lines[0][0].bounds;
    assert!(bounds.intersects(&rendered), "{bounds:?}");
    assert_eq!(bounds, TextBox::new(26, 50, 228, 44));
}

#[test]
fn detect_and_recognize_boxes_compose() {
    let ocr = engine();
    let image = page(320, 160, &[(40, 60, 200, 24)]);

    let boxes = ocr.detect(&image).unwrap();
    assert_eq!(boxes, vec![TextBox::new(26, 50, 228, 44)]);

    let results = ocr.recognize_boxes(&image, &boxes).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "HI");
    assert_eq!(results[0].character_scores.len(), 2);
}

#[test]
fn grouped_and_flat_views_match() {
    let ocr = engine();
    let image = page(320, 160, &[(20, 30, 80, 20), (140, 32, 80, 20), (20, 100, 100, 20)]);

    let grouped = ocr.recognize(&image).unwrap();
    let flat = ocr.recognize_flat(&image).unwrap();

    assert_eq!(grouped.lines.len(), 2);
    assert_eq!(grouped.text, "HI HI\nHI");
    assert_eq!(flat.text, grouped.text);
    assert_eq!(flat.results.len(), grouped.lines.iter().flatten().count());
    assert_eq!(flat.results, grouped.lines.concat());
    assert!((flat.confidence - grouped.confidence).abs() < 1e-6);
}

#[test]
fn specks_never_reach_the_output() {
    let ocr = engine();
    let image = page(128, 64, &[(10, 10, 4, 4), (60, 40, 2, 3)]);

    let result = ocr.recognize(&image).unwrap();
    assert!(result.is_empty());
    assert_eq!(result.text, "");
    assert_eq!(result.confidence, 0.0);
}

#[test]
fn missing_detection_output_is_not_an_error() {
    let ocr = OcrEngine::builder()
        .with_sessions(NoOutput, ScriptedRecognizer, dictionary())
        .build()
        .unwrap();
    let result = ocr.recognize(&page(64, 64, &[(10, 10, 40, 12)])).unwrap();
    assert!(result.is_empty());
}

#[test]
fn encoded_images_are_accepted() {
    let ocr = engine();
    let image = page(320, 160, &[(40, 60, 200, 24)]);
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();

    let result = ocr.recognize_bytes(bytes.get_ref()).unwrap();
    assert_eq!(result.text, "HI");

    assert!(matches!(
        ocr.recognize_bytes(b"not an image"),
        Err(OcrError::Image(_))
    ));
}

#[test]
fn skewed_page_is_straightened_before_detection() {
    let ocr = engine();
    let mut image = RgbaImage::from_pixel(640, 320, WHITE);
    let (sin, cos) = 5.0f32.to_radians().sin_cos();
    for cy in [80.0f32, 160.0, 240.0] {
        let corners = [(-110.0f32, -7.0f32), (110.0, -7.0), (110.0, 7.0), (-110.0, 7.0)].map(
            |(x, y)| {
                Point::new(
                    (320.0 + x * cos - y * sin).round() as i32,
                    (cy + x * sin + y * cos).round() as i32,
                )
            },
        );
        draw_polygon_mut(&mut image, &corners, BLACK);
    }
    let image = DynamicImage::ImageRgba8(image);

    let mut overrides = OcrConfigOverrides::default();
    overrides.detection.auto_deskew = Some(true);
    let result = ocr.recognize_with(&image, &overrides).unwrap();

    assert!((result.skew_angle - 5.0).abs() < 2.0, "{}", result.skew_angle);
    assert_eq!(result.lines.len(), 3);
    for line in &result.lines {
        let bounds = line[0].bounds;
        assert!(bounds.height < 60, "{bounds:?}");
    }

    let plain = ocr.recognize(&image).unwrap();
    assert_eq!(plain.skew_angle, 0.0);
}

#[test]
fn repeated_runs_are_identical() {
    let ocr = engine();
    let words = (0..6)
        .flat_map(|row| (0..3).map(move |col| (10 + col * 100, 10 + row * 50, 80, 20)))
        .collect::<Vec<_>>();
    let image = page(320, 320, &words);

    let first = ocr.recognize(&image).unwrap();
    let second = ocr.recognize(&image).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.lines.len(), 6);
    assert!(first.lines.iter().all(|line| line.len() == 3));
    ocr.close();
}

#[test]
fn classifier_runs_only_when_enabled() {
    let _ = env_logger::builder().is_test(true).try_init();
    let calls = Arc::new(AtomicUsize::new(0));
    let ocr = OcrEngine::builder()
        .with_sessions(DarkPixelDetector, ScriptedRecognizer, dictionary())
        .with_classifier_session(CountingClassifier(calls.clone()))
        .build()
        .unwrap();
    assert!(ocr.config().recognition.use_angle_cls);

    let image = page(320, 160, &[(20, 30, 80, 20), (20, 100, 100, 20)]);
    let result = ocr.recognize(&image).unwrap();
    assert_eq!(result.text, "HI\nHI");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let mut overrides = OcrConfigOverrides::default();
    overrides.recognition.use_angle_cls = Some(false);
    let result = ocr.recognize_with(&image, &overrides).unwrap();
    assert_eq!(result.lines.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn builder_requires_models() {
    assert!(matches!(
        OcrEngine::builder().build(),
        Err(OcrError::MissingModel("detection"))
    ));
}
