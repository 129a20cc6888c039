//! Retrieval layer: vector similarity search over historical SQL queries.

pub mod vector_store;

pub use vector_store::{
    Document, InMemoryVectorStore, RetrievedCandidate, SourceMeta, VectorIndex,
};
