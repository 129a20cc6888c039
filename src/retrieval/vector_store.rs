//! Vector Store
//!
//! In-memory vector store over embedded historical queries with cosine
//! similarity search. The store is built once and treated as immutable for
//! the process lifetime; concurrent readers need no locking.

use crate::embedding::{Embedder, Embedding};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Metadata carried by a retrieved document: the historical query it came
/// from, its description, and the tables it references.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMeta {
    pub sql: Option<String>,
    pub description: Option<String>,
    pub tables: Vec<String>,
}

/// One retrieval hit, owned by the pipeline invocation that requested it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedCandidate {
    pub content: String,
    pub score: f32,
    pub source: SourceMeta,
}

/// Opaque similarity-index collaborator.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedCandidate>>;
}

/// Document in the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub source: SourceMeta,
    pub embedding: Option<Embedding>,
}

/// In-memory vector store with linear cosine-similarity search.
///
/// Adequate for the historical-query corpora this assistant indexes
/// (thousands of documents); an ANN index is a drop-in replacement behind
/// the `VectorIndex` trait if that ever changes.
pub struct InMemoryVectorStore {
    /// Document storage: id -> Document
    documents: HashMap<String, Document>,
    /// Embeddings in insertion order for the search scan
    embeddings: Vec<(String, Embedding)>,
    /// Dimension all embeddings must share
    dimension: usize,
    embedder: Arc<dyn Embedder>,
}

#[derive(Serialize, Deserialize)]
struct PersistedStore {
    dimension: usize,
    documents: Vec<Document>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            documents: HashMap::new(),
            embeddings: Vec::new(),
            dimension,
            embedder,
        }
    }

    /// Add a document to the store. Documents without an embedding are kept
    /// but never returned by search.
    pub fn add_document(&mut self, document: Document) -> Result<()> {
        if let Some(ref embedding) = document.embedding {
            if embedding.len() != self.dimension {
                return Err(AssistantError::Retrieval(format!(
                    "Embedding dimension {} doesn't match store dimension {}",
                    embedding.len(),
                    self.dimension
                )));
            }
            self.embeddings
                .push((document.id.clone(), embedding.clone()));
        }
        self.documents.insert(document.id.clone(), document);
        Ok(())
    }

    pub fn add_documents(&mut self, documents: Vec<Document>) -> Result<()> {
        for doc in documents {
            self.add_document(doc)?;
        }
        Ok(())
    }

    /// Search with an already-computed query embedding.
    pub fn search_embedding(
        &self,
        query_embedding: &Embedding,
        top_k: usize,
    ) -> Result<Vec<RetrievedCandidate>> {
        if self.embeddings.is_empty() {
            return Ok(Vec::new());
        }

        if query_embedding.len() != self.dimension {
            return Err(AssistantError::Retrieval(format!(
                "Query embedding dimension {} doesn't match store dimension {}",
                query_embedding.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(f32, &Document)> = Vec::with_capacity(self.embeddings.len());
        for (doc_id, embedding) in &self.embeddings {
            if let Some(doc) = self.documents.get(doc_id) {
                scored.push((cosine_similarity(query_embedding, embedding), doc));
            }
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, doc)| RetrievedCandidate {
                content: doc.text.clone(),
                score,
                source: doc.source.clone(),
            })
            .collect())
    }

    pub fn get_document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Save the store to disk as JSON, embeddings included, so a loaded
    /// store is immediately searchable.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let persisted = PersistedStore {
            dimension: self.dimension,
            documents: self.documents.values().cloned().collect(),
        };
        let encoded = serde_json::to_string(&persisted)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Load a previously saved store.
    pub fn load<P: AsRef<Path>>(path: P, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let encoded = std::fs::read_to_string(path)?;
        let persisted: PersistedStore = serde_json::from_str(&encoded)?;

        let mut store = Self::new(persisted.dimension, embedder);
        store.add_documents(persisted.documents)?;
        Ok(store)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorStore {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedCandidate>> {
        let query_embedding = self.embedder.embed(query).await?;
        self.search_embedding(&query_embedding, k)
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
