//! Embedded-tag extraction from audio container formats.

mod tag_extractor;

pub use tag_extractor::{AudioFormat, ExtractError, TagCandidate, TagExtractor};
