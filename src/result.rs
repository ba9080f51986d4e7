/// Axis-aligned text region in the coordinate space of the original image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn intersects(&self, other: &TextBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub text: String,
    pub bounds: TextBox,
    /// Mean of `character_scores`, in `[0, 1]`.
    pub confidence: f32,
    pub character_scores: Vec<f32>,
}

/// Recognized text grouped into reading-order lines.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcrResult {
    pub text: String,
    pub lines: Vec<Vec<RecognitionResult>>,
    pub confidence: f32,
    /// Rotation in degrees that was removed before detection, 0 if none.
    pub skew_angle: f32,
}

/// Same data as [`OcrResult`] without the line structure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatOcrResult {
    pub text: String,
    pub results: Vec<RecognitionResult>,
    pub confidence: f32,
    pub skew_angle: f32,
}

impl OcrResult {
    pub fn flatten(&self) -> FlatOcrResult {
        crate::lines::project_flat(&self.lines, self.skew_angle)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Output of the direction classifier for a single crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angle {
    pub index: usize,
    pub score: f32,
}

impl Angle {
    pub fn is_flipped(&self) -> bool {
        self.index == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxes_touching_at_an_edge_do_not_intersect() {
        let a = TextBox::new(0, 0, 10, 10);
        let b = TextBox::new(10, 0, 10, 10);
        let c = TextBox::new(9, 9, 5, 5);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(b.intersects(&c));
    }
}
