//! Restaurant entity extraction from post text: the `TextExtractor`
//! contract, the Gemini adapter, and confidence thresholding.

pub mod error;
pub mod extractor;
pub mod gemini;
pub mod outcome;
pub mod parse;
mod retry;

pub use error::{ExtractionError, ExtractorError};
pub use extractor::{Candidate, TextExtractor};
pub use gemini::GeminiExtractor;
pub use outcome::{EntityExtractor, ExtractionOutcome, ExtractionSettings};
pub use parse::parse_candidates;
