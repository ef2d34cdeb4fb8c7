use crate::{FormattedRecord, Record};

pub const DEFAULT_PREAMBLE: &str = "Generate a comma-separated list of tags that best \
categorize the following legal question from a Q&A forum. Respond only with the tags.\n\n";

/// Instruction template folding title and question into `input`.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    pub preamble: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self { preamble: DEFAULT_PREAMBLE.to_string() }
    }
}

impl PromptTemplate {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self { preamble: preamble.into() }
    }

    pub fn render(&self, title: &str, question: &str) -> String {
        format!("{}TITLE:\n{}\n\nQUESTION:\n{}", self.preamble, title, question)
    }

    /// Total: records without tags get an empty `output`.
    pub fn format(&self, record: &Record, filename: &str) -> FormattedRecord {
        FormattedRecord {
            input: self.render(&record.title, &record.question),
            output: record.tags.as_ref().map(|t| t.joined()).unwrap_or_default(),
            filename: filename.to_string(),
        }
    }

    pub fn format_all(&self, records: &[Record], filename: &str) -> Vec<FormattedRecord> {
        records.iter().map(|r| self.format(r, filename)).collect()
    }
}
