pub mod geometry;
pub mod normalizer;
pub mod prompts;
pub mod worker;

pub use normalizer::normalize;
pub use worker::{AnalysisDispatcher, AnalysisError, AnalysisWorker};
