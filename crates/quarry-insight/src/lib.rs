pub mod classify;
pub mod cluster;
pub mod label;
pub mod language;
pub mod metrics;
pub mod normalize;
pub mod prompts;
pub mod spans;
pub mod synthesis;

pub use classify::{ClassifyOutcome, ConversationClassifier, KeywordClassifier};
pub use cluster::{ClusteringEngine, ClusteringOutcome};
pub use label::generate_label;
pub use language::{HeuristicLanguageDetector, LanguageDetector};
pub use metrics::{ClusterQuality, QualityReport};
pub use normalize::{clean_text, DropReason, FilterReport, NormalizeOutcome, Normalizer};
pub use spans::SpanExtractor;
pub use synthesis::{InsightSynthesizer, SynthesisFailure, SynthesisOutcome};
