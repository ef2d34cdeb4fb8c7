//! Document curation for instruction fine-tuning.
//!
//! Turns raw Q&A records into `{input, output, filename}` rows: text
//! normalization, score-based filtering, prompt formatting and a seeded
//! train/validation split.

pub mod error;
pub mod schema;
pub mod normalize;
pub mod filters;
pub mod pipeline;
pub mod format;
pub mod split;
pub mod jsonl;

pub use error::*;
pub use schema::*;
pub use normalize::*;
pub use filters::*;
pub use pipeline::*;
pub use format::*;
pub use split::*;
pub use jsonl::*;
