//! Text handling ahead of synthesis.
//!
//! - [`lang`] - script detection used for cross-language cloning and segmentation
//! - [`segment`] - sentence segmentation and per-sentence length budgets
//! - [`normalize`] - optional punctuation and number normalization

pub mod lang;
pub mod normalize;
pub mod segment;

pub use lang::{classify_body, classify_prompt, Script, ScriptCounts};
pub use normalize::TextNormalizer;
pub use segment::{segment, utterance_max_len};
