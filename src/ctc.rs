use ndarray::{ArrayView1, ArrayView2};
use tracing::instrument;

use crate::{dictionary::UNKNOWN_TOKEN, CharacterDictionary, Result};

pub const BLANK_INDEX: usize = 0;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedText {
    pub text: String,
    /// Probability of each emitted symbol.
    pub character_scores: Vec<f32>,
    /// Mean of `character_scores`, 0 when nothing was emitted.
    pub confidence: f32,
}

/// Greedy (best path) CTC decoding against a [`CharacterDictionary`].
#[derive(Debug, Clone, Copy)]
pub struct CtcDecoder<'a> {
    dictionary: &'a CharacterDictionary,
}

/// First maximum of `row`; NaNs never win.
fn argmax(row: ArrayView1<f32>) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &value) in row.iter().enumerate() {
        match best {
            Some((_, max)) if !(value > max) => {}
            _ if value.is_nan() => {}
            _ => best = Some((i, value)),
        }
    }
    best
}

/// Probability of the winning class. Rows that already look like a
/// distribution are read directly, anything else goes through softmax.
fn class_probability(row: ArrayView1<f32>, max: f32) -> f32 {
    if row.iter().all(|v| (0.0..=1.0).contains(v)) {
        return max;
    }
    let sum = row
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - max).exp())
        .sum::<f32>();
    if sum > 0.0 {
        (1.0 / sum).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl<'a> CtcDecoder<'a> {
    pub fn new(dictionary: &'a CharacterDictionary) -> Self {
        Self { dictionary }
    }

    /// Decodes `(sequence_length, num_classes)` scores into text.
    #[instrument(level = "trace", skip(self, logits))]
    pub fn decode(&self, logits: ArrayView2<f32>) -> DecodedText {
        let num_classes = logits.ncols();
        if num_classes != self.dictionary.len() {
            log::warn!(
                "Model predicts {num_classes} classes but the dictionary has {} entries",
                self.dictionary.len()
            );
        }
        let last_index = self.dictionary.last_index();

        let mut text = String::new();
        let mut character_scores = Vec::new();
        let mut last_char_index = None;

        for row in logits.outer_iter() {
            // A row with no finite score separates symbols like a blank.
            let Some((index, max)) = argmax(row) else {
                last_char_index = None;
                continue;
            };
            let repeated = last_char_index == Some(index);
            last_char_index = Some(index);
            if index == BLANK_INDEX || repeated {
                continue;
            }

            let Some(symbol) = self.dictionary.get(index) else {
                log::warn!(
                    "Decoded class {index} is outside the dictionary ({} entries)",
                    self.dictionary.len()
                );
                continue;
            };
            let symbol = if Some(index) == last_index {
                if symbol == UNKNOWN_TOKEN {
                    continue;
                }
                " "
            } else {
                symbol
            };
            text.push_str(symbol);
            character_scores.push(class_probability(row, max));
        }

        let confidence = if character_scores.is_empty() {
            0.0
        } else {
            character_scores.iter().sum::<f32>() / character_scores.len() as f32
        };
        DecodedText {
            text,
            character_scores,
            confidence,
        }
    }

    /// Decodes a row-major buffer of `sequence_length * num_classes` scores.
    pub fn decode_flat(
        &self,
        logits: &[f32],
        sequence_length: usize,
        num_classes: usize,
    ) -> Result<DecodedText> {
        let view = ArrayView2::from_shape((sequence_length, num_classes), logits)?;
        Ok(self.decode(view))
    }
}
