use crate::{FlatOcrResult, OcrResult, RecognitionResult};

/// Splits reading-ordered results into lines.
///
/// A result joins the current line while its top is within half the line's
/// average box height of the previous result's top.
pub fn group_lines(results: Vec<RecognitionResult>) -> Vec<Vec<RecognitionResult>> {
    let mut lines: Vec<Vec<RecognitionResult>> = Vec::new();
    let mut current: Vec<RecognitionResult> = Vec::new();
    let mut average_height = 0.0f32;

    for result in results {
        let Some(previous) = current.last() else {
            average_height = result.bounds.height as f32;
            current.push(result);
            continue;
        };

        let gap = (result.bounds.y as f32 - previous.bounds.y as f32).abs();
        if gap <= average_height * 0.5 {
            current.push(result);
            average_height = current
                .iter()
                .map(|item| item.bounds.height as f32)
                .sum::<f32>()
                / current.len() as f32;
        } else {
            average_height = result.bounds.height as f32;
            lines.push(std::mem::replace(&mut current, vec![result]));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn line_text(line: &[RecognitionResult]) -> String {
    line.iter()
        .map(|item| item.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn mean_confidence<'a>(items: impl Iterator<Item = &'a RecognitionResult>) -> f32 {
    let (sum, count) = items.fold((0.0f32, 0usize), |(sum, count), item| {
        (sum + item.confidence, count + 1)
    });
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

fn joined_text(lines: &[Vec<RecognitionResult>]) -> String {
    lines
        .iter()
        .map(|line| line_text(line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn project_grouped(lines: Vec<Vec<RecognitionResult>>, skew_angle: f32) -> OcrResult {
    OcrResult {
        text: joined_text(&lines),
        confidence: mean_confidence(lines.iter().flatten()),
        lines,
        skew_angle,
    }
}

pub fn project_flat(lines: &[Vec<RecognitionResult>], skew_angle: f32) -> FlatOcrResult {
    FlatOcrResult {
        text: joined_text(lines),
        results: lines.iter().flatten().cloned().collect(),
        confidence: mean_confidence(lines.iter().flatten()),
        skew_angle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextBox;

    fn item(text: &str, x: u32, y: u32, height: u32, confidence: f32) -> RecognitionResult {
        RecognitionResult {
            text: text.to_string(),
            bounds: TextBox::new(x, y, 40, height),
            confidence,
            character_scores: vec![confidence; text.len()],
        }
    }

    #[test]
    fn groups_by_vertical_gap() {
        let results = vec![
            item("Hello", 0, 10, 20, 0.9),
            item("world", 50, 14, 20, 0.7),
            item("next", 0, 60, 20, 0.8),
            item("line", 50, 62, 24, 0.6),
        ];
        let lines = group_lines(results);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 2);
        assert_eq!(lines[1].len(), 2);

        let grouped = project_grouped(lines, 0.0);
        assert_eq!(grouped.text, "Hello world\nnext line");
        assert!((grouped.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn gap_equal_to_threshold_stays_on_the_line() {
        let lines = group_lines(vec![item("a", 0, 0, 20, 1.0), item("b", 50, 10, 20, 1.0)]);
        assert_eq!(lines.len(), 1);
        let lines = group_lines(vec![item("a", 0, 0, 20, 1.0), item("b", 50, 11, 20, 1.0)]);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn flat_and_grouped_views_agree() {
        let lines = group_lines(vec![
            item("one", 0, 0, 20, 0.5),
            item("two", 0, 40, 20, 1.0),
            item("three", 60, 42, 20, 0.9),
        ]);
        let grouped = project_grouped(lines.clone(), 1.5);
        let flat = grouped.flatten();
        assert_eq!(flat.text, grouped.text);
        assert_eq!(flat.results.len(), grouped.lines.iter().flatten().count());
        assert_eq!(flat.confidence, grouped.confidence);
        assert_eq!(flat.skew_angle, 1.5);
    }

    #[test]
    fn empty_input_has_zero_confidence() {
        let grouped = project_grouped(group_lines(Vec::new()), 0.0);
        assert!(grouped.lines.is_empty());
        assert_eq!(grouped.text, "");
        assert_eq!(grouped.confidence, 0.0);
    }
}
