use crate::ConfigError;
use std::fs;
use std::path::Path;

/// Lowercase phrases that mark a comment for storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerSet {
    phrases: Vec<String>,
}

impl TriggerSet {
    /// Reads one phrase per line. Blank lines are ignored.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::from_io(path, &e))?;
        Ok(Self::from_phrases(raw.lines()))
    }

    pub fn from_phrases<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    /// True iff any phrase is a substring of the lowercased `text`.
    pub fn matches(&self, text: &str) -> bool {
        if self.phrases.is_empty() {
            return false;
        }
        let lowered = text.to_lowercase();
        self.phrases.iter().any(|p| lowered.contains(p.as_str()))
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}
