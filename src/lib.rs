//! querypilot: retrieval-augmented natural-language-to-SQL assistant core.
//!
//! Users ask questions in plain language; the pipeline retrieves similar
//! historical queries from a vector index, injects warehouse schema
//! context, asks a generation model for SQL, extracts a single statement
//! from the free-form output and validates it against a read-only safety
//! policy. The execution gateway is the only path to the warehouse and
//! enforces validation, billing ceilings and timeouts on every call.

pub mod config;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod gateway;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
pub mod schema;
pub mod sql_guard;
pub mod warehouse;

pub use config::AssistantConfig;
pub use error::{AssistantError, Result};
pub use extraction::{ExtractedSql, ExtractionMethod, SqlExtractor};
pub use gateway::{ExecutionGateway, ExecutionRequest, FailureKind, QueryExecutionResult};
pub use pipeline::{ErrorCode, PipelineResponse, QueryOptions, QueryPipeline};
pub use prompts::AgentKind;
pub use retrieval::{InMemoryVectorStore, RetrievedCandidate, VectorIndex};
pub use schema::SchemaCatalog;
pub use sql_guard::{validate, Verdict};
pub use warehouse::{BigQueryEngine, WarehouseEngine};
