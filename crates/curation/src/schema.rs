use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tags as shipped upstream: either a list or an already comma-joined string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tags {
    List(Vec<String>),
    Joined(String),
}

impl Tags {
    /// Comma-joined form, e.g. `contracts,leases`.
    pub fn joined(&self) -> String {
        match self {
            Tags::List(items) => items
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(","),
            Tags::Joined(s) => s.trim().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.joined().split(',').all(|t| t.trim().is_empty())
    }
}

/// One raw Q&A item. Identity is its position in the source dataset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SourceRecord")]
pub struct Record {
    pub title: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_score: Option<i64>,

    /// Score artifacts written by filters, keyed by artifact name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<String, i64>,
}

#[derive(Deserialize)]
struct SourceAnswer {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    score: Option<i64>,
}

/// Wire shape: flat records plus the upstream dump layout, where the
/// question score is `score` and answers sit in `answers[]`.
#[derive(Deserialize)]
struct SourceRecord {
    #[serde(default, alias = "question_title")]
    title: String,
    #[serde(alias = "question_body")]
    question: String,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    tags: Option<Tags>,
    #[serde(default, alias = "score")]
    question_score: Option<i64>,
    #[serde(default)]
    answer_score: Option<i64>,
    #[serde(default)]
    answers: Vec<SourceAnswer>,
    #[serde(default)]
    scores: BTreeMap<String, i64>,
}

impl From<SourceRecord> for Record {
    fn from(src: SourceRecord) -> Self {
        let first = src.answers.into_iter().next();
        let (first_body, first_score) = match first {
            Some(a) => (a.body, a.score),
            None => (None, None),
        };
        Record {
            title: src.title,
            question: src.question,
            answer: src.answer.or(first_body),
            // an empty tag list counts as no tags
            tags: src.tags.filter(|t| !t.is_empty()),
            question_score: src.question_score,
            answer_score: src.answer_score.or(first_score),
            scores: src.scores,
        }
    }
}

impl Record {
    pub fn text(&self, field: TextField) -> Option<&str> {
        match field {
            TextField::Title => Some(&self.title),
            TextField::Question => Some(&self.question),
            TextField::Answer => self.answer.as_deref(),
        }
    }

    pub fn text_mut(&mut self, field: TextField) -> Option<&mut String> {
        match field {
            TextField::Title => Some(&mut self.title),
            TextField::Question => Some(&mut self.question),
            TextField::Answer => self.answer.as_mut(),
        }
    }

    /// True when the record carries at least one non-blank tag.
    pub fn has_tags(&self) -> bool {
        self.tags.as_ref().is_some_and(|t| !t.is_empty())
    }

    pub fn score(&self, field: ScoreField) -> Option<i64> {
        match field {
            ScoreField::QuestionScore => self.question_score,
            ScoreField::AnswerScore => self.answer_score,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextField {
    Title,
    Question,
    Answer,
}

impl TextField {
    pub fn name(self) -> &'static str {
        match self {
            TextField::Title => "title",
            TextField::Question => "question",
            TextField::Answer => "answer",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreField {
    QuestionScore,
    AnswerScore,
}

impl ScoreField {
    pub fn name(self) -> &'static str {
        match self {
            ScoreField::QuestionScore => "question_score",
            ScoreField::AnswerScore => "answer_score",
        }
    }
}

/// Instruction/response row consumed by the trainer and generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedRecord {
    pub input: String,
    pub output: String,
    pub filename: String,
}

pub const CURATED_FILE: &str = "law-stackexchange-curated.jsonl";
pub const TRAIN_FILE: &str = "train.jsonl";
pub const VAL_FILE: &str = "val.jsonl";
pub const SUBMISSION_FILE: &str = "submission.jsonl";
pub const SUBMISSION_SOURCE_FILE: &str = "evaluation-dataset-verified-for-participants.jsonl";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_list_and_string_join_the_same() {
        let list: Tags = serde_json::from_str(r#"["contracts", "leases"]"#).unwrap();
        let joined: Tags = serde_json::from_str(r#""contracts,leases""#).unwrap();
        assert_eq!(list.joined(), "contracts,leases");
        assert_eq!(joined.joined(), "contracts,leases");
    }

    #[test]
    fn test_record_accepts_upstream_field_names() {
        let line = r#"{"question_title":"Lease issue","question_body":"Can my landlord do this?","tags":["leases"],"question_score":4,"license":"cc-by-sa"}"#;
        let rec: Record = serde_json::from_str(line).unwrap();
        assert_eq!(rec.title, "Lease issue");
        assert_eq!(rec.question, "Can my landlord do this?");
        assert_eq!(rec.question_score, Some(4));
        assert!(rec.answer.is_none());
    }

    #[test]
    fn test_upstream_dump_layout() {
        let line = r#"{"question_id":1,"tags":["contract-law"],"score":3,"license":"cc-by-sa",
            "question_title":"Lease","question_body":"Can my landlord do this?",
            "answers":[{"answer_id":9,"body":"Probably not.","score":5},{"answer_id":10,"body":"Maybe.","score":1}]}"#;
        let rec: Record = serde_json::from_str(line).unwrap();
        assert_eq!(rec.question_score, Some(3));
        assert_eq!(rec.answer.as_deref(), Some("Probably not."));
        assert_eq!(rec.answer_score, Some(5));
        assert!(rec.has_tags());
    }

    #[test]
    fn test_empty_tags_count_as_absent() {
        for tags in [r#"[]"#, r#""""#, r#"[" ", ""]"#, r#"" , ""#] {
            let line = format!(r#"{{"title":"t","question":"q","tags":{tags}}}"#);
            let rec: Record = serde_json::from_str(&line).unwrap();
            assert!(rec.tags.is_none(), "tags={tags}");
            assert!(!rec.has_tags());
        }
    }

    #[test]
    fn test_serialized_record_reads_back() {
        let rec = Record {
            title: "t".into(),
            question: "q".into(),
            tags: Some(Tags::List(vec!["tort".into()])),
            question_score: Some(2),
            ..Default::default()
        };
        let back: Record = serde_json::from_str(&serde_json::to_string(&rec).unwrap()).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_submission_record_without_tags() {
        let rec: Record = serde_json::from_str(r#"{"title":"t","question":"q"}"#).unwrap();
        assert!(rec.tags.is_none());
        assert!(rec.question_score.is_none());
    }
}
