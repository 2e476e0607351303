pub mod bm25;
pub mod corpus;

pub use bm25::DocumentIndex;
pub use corpus::DocumentChunk;
