use std::cmp::Ordering;

use imageproc::point::Point;

use crate::TextBox;

/// Network stride of the detection model. Input sides must be multiples of it.
pub const STRIDE: u32 = 32;

/// Boxes this small or smaller on either side are dropped after scaling.
pub const MIN_BOX_SIDE: u32 = 5;

/// Integer rectangle in model-input (padded) space. Unlike [`TextBox`] it may
/// carry negative or empty extents while it is being adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    /// Width over height, 0 for degenerate rects.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height <= 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeDimensions {
    pub width: u32,
    pub height: u32,
    pub ratio: f32,
}

/// Fits `width`×`height` inside `max_side`, keeping the aspect ratio.
pub fn calculate_resize_dimensions(width: u32, height: u32, max_side: u32) -> ResizeDimensions {
    let longer = width.max(height);
    if longer <= max_side || longer == 0 {
        return ResizeDimensions {
            width,
            height,
            ratio: 1.0,
        };
    }
    let ratio = max_side as f32 / longer as f32;
    let target_width = ((width as f32 * ratio).round() as u32).max(1);
    let target_height = ((height as f32 * ratio).round() as u32).max(1);
    log::debug!(
        "Resize will change image dimensions from (w: {width}, h: {height}) to (w: {target_width}, h: {target_height}) with ratio {ratio}."
    );
    ResizeDimensions {
        width: target_width,
        height: target_height,
        ratio,
    }
}

/// Rounds both sides up to the next multiple of [`STRIDE`].
pub fn padded_dimensions(width: u32, height: u32) -> (u32, u32) {
    let pad = |side: u32| side.div_ceil(STRIDE).max(1) * STRIDE;
    (pad(width), pad(height))
}

/// Grows `rect` around its centre and clamps it to `[0, max_width]`×`[0, max_height]`.
///
/// Both paddings are fractions of the rect's *height*: text is wider than it is
/// tall, and stroke thickness follows the height.
pub fn apply_padding(
    rect: Rect,
    max_width: i32,
    max_height: i32,
    padding_vertical: f32,
    padding_horizontal: f32,
) -> Rect {
    let pad_y = (rect.height as f32 * padding_vertical).round() as i32;
    let pad_x = (rect.height as f32 * padding_horizontal).round() as i32;

    let left = (rect.x - pad_x).max(0);
    let top = (rect.y - pad_y).max(0);
    let right = (rect.x + rect.width + pad_x).min(max_width);
    let bottom = (rect.y + rect.height + pad_y).min(max_height);

    Rect::new(left, top, right - left, bottom - top)
}

/// Maps a rect from model-input space back onto the original image.
///
/// The result may be empty when the rect lies entirely outside the original
/// image, i.e. in the padding area.
pub fn to_original_coordinates(
    rect: Rect,
    resize_ratio: f32,
    original_width: u32,
    original_height: u32,
) -> TextBox {
    let scale = |v: i32| (v as f32 / resize_ratio).round() as i64;

    let x = scale(rect.x).clamp(0, original_width as i64) as u32;
    let y = scale(rect.y).clamp(0, original_height as i64) as u32;
    let width = scale(rect.width).clamp(0, (original_width - x) as i64) as u32;
    let height = scale(rect.height).clamp(0, (original_height - y) as i64) as u32;

    TextBox::new(x, y, width, height)
}

/// Reading-order comparator. Two boxes are on the same line when their tops
/// are closer than a quarter of their summed heights.
///
/// This is not a total order: chains of staggered boxes can be non-transitive.
pub fn compare_reading_order(a: &TextBox, b: &TextBox) -> Ordering {
    let dy = (a.y as f32 - b.y as f32).abs();
    let same_line = dy < (a.height as f32 + b.height as f32) / 4.0;
    if same_line {
        a.x.cmp(&b.x)
    } else {
        a.y.cmp(&b.y)
    }
}

/// Stable insertion sort driven by `compare`.
///
/// `slice::sort_by` may panic on comparators that are not total orders, which
/// [`compare_reading_order`] is not. Inputs are a page worth of boxes.
pub fn sort_by_comparator<T>(items: &mut [T], mut compare: impl FnMut(&T, &T) -> Ordering) {
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && compare(&items[j - 1], &items[j]) == Ordering::Greater {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}

pub fn sort_reading_order(boxes: &mut [TextBox]) {
    sort_by_comparator(boxes, compare_reading_order);
}

/// Drops boxes with a side of [`MIN_BOX_SIDE`] pixels or less and sorts the
/// rest into reading order.
pub fn filter_and_sort_boxes(mut boxes: Vec<TextBox>) -> Vec<TextBox> {
    boxes.retain(|b| b.width > MIN_BOX_SIDE && b.height > MIN_BOX_SIDE);
    sort_reading_order(&mut boxes);
    boxes
}

/// Axis-aligned bounding rect of a contour, inclusive of its extreme pixels.
pub fn contour_bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(Rect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}
