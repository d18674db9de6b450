pub mod embed;
pub mod similarity;
pub mod store;

pub use embed::{embedding_text, BatchEmbedder, EmbedFailure, EmbedOutcome};
pub use similarity::cosine_similarity;
pub use store::{Neighbor, SimilarityMatrix, StoreSnapshot, VectorStore};
