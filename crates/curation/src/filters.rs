use crate::{CurationError, Record, Result, ScoreField, TextField};

/// Scores a record and decides whether it is kept.
///
/// `score` may fail when the record lacks what the filter needs; the
/// pipeline treats that as fatal.
pub trait DocumentFilter: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, index: usize, record: &Record) -> Result<i64>;
    fn keep(&self, score: i64) -> bool;
}

/// Keeps records whose field has `min_words..=max_words` whitespace-separated words.
#[derive(Clone, Debug)]
pub struct WordCountFilter {
    pub field: TextField,
    pub min_words: usize,
    pub max_words: usize,
}

impl WordCountFilter {
    pub fn new(field: TextField, min_words: usize, max_words: usize) -> Result<Self> {
        if min_words > max_words {
            return Err(CurationError::InvalidBounds { min: min_words, max: max_words });
        }
        Ok(Self { field, min_words, max_words })
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

impl DocumentFilter for WordCountFilter {
    fn name(&self) -> &'static str {
        "word_count"
    }

    fn score(&self, index: usize, record: &Record) -> Result<i64> {
        let text = record
            .text(self.field)
            .ok_or(CurationError::MissingField { index, field: self.field.name() })?;
        Ok(word_count(text) as i64)
    }

    fn keep(&self, score: i64) -> bool {
        score >= self.min_words as i64 && score <= self.max_words as i64
    }
}

/// Keeps records whose precomputed score is at least `threshold`.
#[derive(Clone, Debug)]
pub struct ScoreThresholdFilter {
    pub field: ScoreField,
    pub threshold: i64,
}

impl ScoreThresholdFilter {
    pub fn new(field: ScoreField, threshold: i64) -> Self {
        Self { field, threshold }
    }
}

impl DocumentFilter for ScoreThresholdFilter {
    fn name(&self) -> &'static str {
        self.field.name()
    }

    fn score(&self, index: usize, record: &Record) -> Result<i64> {
        record
            .score(self.field)
            .ok_or(CurationError::MissingField { index, field: self.field.name() })
    }

    fn keep(&self, score: i64) -> bool {
        score >= self.threshold
    }
}
