use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    CurationError, DocumentFilter, DocumentModifier, Record, Result, ScoreField,
    ScoreThresholdFilter, TextField, TextNormalizer, WordCountFilter,
};

pub enum Stage {
    /// Rewrites one text field of every record.
    Modify {
        field: TextField,
        modifier: Arc<dyn DocumentModifier>,
    },
    /// Scores every record, stores the score under `score_field`, drops failures.
    Filter {
        filter: Arc<dyn DocumentFilter>,
        score_field: String,
    },
}

impl Stage {
    pub fn modify(field: TextField, modifier: impl DocumentModifier + 'static) -> Self {
        Stage::Modify { field, modifier: Arc::new(modifier) }
    }

    pub fn filter(filter: impl DocumentFilter + 'static) -> Self {
        let score_field = filter.name().to_string();
        Stage::Filter { filter: Arc::new(filter), score_field }
    }

    pub fn name(&self) -> String {
        match self {
            Stage::Modify { field, modifier } => format!("{}({})", modifier.name(), field.name()),
            Stage::Filter { score_field, .. } => format!("filter({score_field})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub name: String,
    pub records_in: usize,
    pub records_out: usize,
}

/// Dataset paired with each record's position in the source file.
pub type Indexed = Vec<(usize, Record)>;

/// Ordered list of stages; each consumes the previous stage's output.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn run(&self, records: Vec<Record>) -> Result<(Vec<Record>, Vec<StageStats>)> {
        let indexed = records.into_iter().enumerate().collect();
        let (out, stats) = self.run_indexed(indexed)?;
        for s in &stats {
            info!(stage = %s.name, records_in = s.records_in, records_out = s.records_out, "curation stage");
        }
        Ok((out.into_iter().map(|(_, r)| r).collect(), stats))
    }

    /// Runs every stage over one slice of the dataset. Any stage error aborts.
    pub fn run_indexed(&self, mut records: Indexed) -> Result<(Indexed, Vec<StageStats>)> {
        let mut stats = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let records_in = records.len();
            match stage {
                Stage::Modify { field, modifier } => {
                    for (_, rec) in records.iter_mut() {
                        if let Some(text) = rec.text_mut(*field) {
                            *text = modifier.modify(text);
                        }
                    }
                }
                Stage::Filter { filter, score_field } => {
                    let mut kept = Vec::with_capacity(records.len());
                    for (index, mut rec) in records {
                        let score = filter.score(index, &rec)?;
                        if filter.keep(score) {
                            rec.scores.insert(score_field.clone(), score);
                            kept.push((index, rec));
                        }
                    }
                    records = kept;
                }
            }
            stats.push(StageStats {
                name: stage.name(),
                records_in,
                records_out: records.len(),
            });
        }

        Ok((records, stats))
    }
}

/// Sums per-chunk stage counts into whole-dataset counts.
pub fn merge_stats(chunks: &[Vec<StageStats>]) -> Vec<StageStats> {
    let mut merged: Vec<StageStats> = Vec::new();
    for chunk in chunks {
        for (i, s) in chunk.iter().enumerate() {
            match merged.get_mut(i) {
                Some(m) => {
                    m.records_in += s.records_in;
                    m.records_out += s.records_out;
                }
                None => merged.push(s.clone()),
            }
        }
    }
    merged
}

#[derive(Clone, Debug)]
pub struct CurationSettings {
    pub min_words: usize,
    pub max_words: usize,
    pub score_threshold: i64,
}

impl Default for CurationSettings {
    fn default() -> Self {
        Self { min_words: 50, max_words: 500, score_threshold: 0 }
    }
}

/// Normalize title and question, then filter on question length and score.
pub fn law_qa_pipeline(settings: &CurationSettings) -> Result<Pipeline> {
    Ok(Pipeline::new()
        .stage(Stage::modify(TextField::Title, TextNormalizer::new()))
        .stage(Stage::modify(TextField::Question, TextNormalizer::new()))
        .stage(Stage::filter(WordCountFilter::new(
            TextField::Question,
            settings.min_words,
            settings.max_words,
        )?))
        .stage(Stage::filter(ScoreThresholdFilter::new(
            ScoreField::QuestionScore,
            settings.score_threshold,
        ))))
}

pub fn ensure_non_empty<T>(records: &[T], after: &str) -> Result<()> {
    if records.is_empty() {
        return Err(CurationError::EmptyDataset(after.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(words: usize, score: Option<i64>) -> Record {
        Record {
            title: format!("t{words}"),
            question: vec!["w"; words].join(" "),
            question_score: score,
            ..Default::default()
        }
    }

    #[test]
    fn test_stages_apply_in_order_and_record_scores() {
        let p = law_qa_pipeline(&CurationSettings::default()).unwrap();
        let input = vec![rec(10, Some(1)), rec(60, Some(-2)), rec(60, Some(3))];
        let (out, stats) = p.run(input).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].scores.get("word_count"), Some(&60));
        assert_eq!(out[0].scores.get("question_score"), Some(&3));

        let counts: Vec<(usize, usize)> = stats.iter().map(|s| (s.records_in, s.records_out)).collect();
        assert_eq!(counts, vec![(3, 3), (3, 3), (3, 2), (2, 1)]);
    }

    #[test]
    fn test_missing_score_aborts_the_run() {
        let p = law_qa_pipeline(&CurationSettings::default()).unwrap();
        let err = p.run(vec![rec(60, Some(1)), rec(60, None)]).unwrap_err();
        assert!(matches!(err, CurationError::MissingField { index: 1, field: "question_score" }));
    }

    #[test]
    fn test_records_dropped_before_score_filter_need_no_score() {
        let p = law_qa_pipeline(&CurationSettings::default()).unwrap();
        let (out, _) = p.run(vec![rec(5, None), rec(60, Some(0))]).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_chunked_stats_merge_to_sequential() {
        let p = law_qa_pipeline(&CurationSettings::default()).unwrap();
        let all: Vec<Record> = (0..10).map(|i| rec(40 + i * 3, Some(i as i64 - 3))).collect();
        let (seq_out, seq_stats) = p.run(all.clone()).unwrap();

        let indexed: Indexed = all.into_iter().enumerate().collect();
        let (a, b) = indexed.split_at(4);
        let (out_a, st_a) = p.run_indexed(a.to_vec()).unwrap();
        let (out_b, st_b) = p.run_indexed(b.to_vec()).unwrap();

        let chunked: Vec<Record> = out_a.into_iter().chain(out_b).map(|(_, r)| r).collect();
        assert_eq!(chunked, seq_out);
        assert_eq!(merge_stats(&[st_a, st_b]), seq_stats);
    }

    #[test]
    fn test_ensure_non_empty() {
        assert!(ensure_non_empty::<Record>(&[], "filtering").is_err());
        assert!(ensure_non_empty(&[1], "filtering").is_ok());
    }
}
