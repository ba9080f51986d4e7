use std::path::Path;

use crate::{OcrError, Result};

/// Placeholder written into slot 0, which the CTC decoder treats as blank.
pub const BLANK_TOKEN: &str = "#";

/// When the final slot holds this marker, decoding it emits nothing.
pub const UNKNOWN_TOKEN: &str = "<unk>";

/// Index-addressed symbol table for the recognition model's output classes.
///
/// Index 0 is the CTC blank; the last index is conventionally a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterDictionary {
    entries: Vec<String>,
}

impl CharacterDictionary {
    /// Uses `entries` exactly as given, blank and trailing slot included.
    pub fn from_entries(entries: Vec<String>) -> Self {
        Self { entries }
    }

    /// Builds the table from a PaddleOCR style key list: the blank is
    /// prepended and a space appended.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = [BLANK_TOKEN.to_string()]
            .into_iter()
            .chain(keys.into_iter().map(Into::into))
            .chain([" ".to_string()])
            .collect();
        Self { entries }
    }

    /// Parses one key per line with trailing whitespace trimmed. A key that is
    /// itself whitespace (e.g. a literal space line) is kept as is.
    pub fn parse_keys(content: &str) -> Self {
        Self::from_keys(content.lines().map(|line| {
            let trimmed = line.trim_end();
            if trimmed.is_empty() && !line.is_empty() {
                line.to_string()
            } else {
                trimmed.to_string()
            }
        }))
    }

    pub fn from_keys_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| OcrError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dictionary = Self::parse_keys(&content);
        log::debug!(
            "Loaded {} dictionary entries from {}",
            dictionary.len(),
            path.display()
        );
        Ok(dictionary)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_get_blank_and_space() {
        let dict = CharacterDictionary::from_keys(["a", "b"]);
        assert_eq!(dict.len(), 4);
        assert_eq!(dict.get(0), Some(BLANK_TOKEN));
        assert_eq!(dict.get(1), Some("a"));
        assert_eq!(dict.get(3), Some(" "));
        assert_eq!(dict.last_index(), Some(3));
    }

    #[test]
    fn parse_trims_trailing_whitespace() {
        let dict = CharacterDictionary::parse_keys("a \nb\t\r\n \nc");
        assert_eq!(dict.get(1), Some("a"));
        assert_eq!(dict.get(2), Some("b"));
        assert_eq!(dict.get(3), Some(" "));
        assert_eq!(dict.get(4), Some("c"));
        assert_eq!(dict.len(), 6);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = CharacterDictionary::from_keys_file("does/not/exist.txt").unwrap_err();
        assert!(matches!(err, OcrError::Io { .. }));
        assert!(err.to_string().contains("does/not/exist.txt"));
    }
}
